//! cbvh CLI - Compress triangle soups into clustered quantized BVHs.

use std::env;
use std::fs::File;
use std::io::{BufReader, ErrorKind};
use std::path::Path;

use anyhow::{bail, Context, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use cbvh::bvh::{build_bvh, Triangle};
use cbvh::quant::{self, io::read_header, CompressConfig, FieldLayout};
use cbvh::util::Vec3;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

fn main() {
    let args: Vec<String> = env::args().collect();

    // Parse global flags
    let mut level = "info";
    let mut filtered_args: Vec<&str> = Vec::new();
    for arg in &args[1..] {
        match arg.as_str() {
            "-v" | "--verbose" => level = "debug",
            "-vv" | "--trace" => level = "trace",
            "-q" | "--quiet" => level = "error",
            _ => filtered_args.push(arg),
        }
    }
    init_tracing(level);

    if filtered_args.is_empty() {
        print_help();
        return;
    }

    let result = match filtered_args[0] {
        "compress" | "c" => cmd_compress(&filtered_args[1..]),
        "info" | "i" => match filtered_args.get(1) {
            Some(path) => cmd_info(path),
            None => usage("cbvh info <file.cbvh>"),
        },
        "config" => cmd_config(filtered_args.get(1).copied()),
        "help" | "h" | "-h" | "--help" => {
            print_help();
            Ok(())
        }
        // A bare .cbvh path is shorthand for info
        path if path.ends_with(".cbvh") => cmd_info(path),
        other => {
            eprintln!("Unknown command: {}", other);
            eprintln!("Run 'cbvh help' for usage");
            std::process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        let capacity = e
            .downcast_ref::<cbvh::Error>()
            .is_some_and(|e| e.is_capacity_overflow());
        if capacity {
            eprintln!("Hint: raise --t-switch for fewer, larger clusters");
            eprintln!("      or lower it for more, smaller ones");
        }
        std::process::exit(1);
    }
}

fn init_tracing(default_level: &str) {
    // RUST_LOG wins over the verbosity flags
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr));
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("tracing subscriber already installed");
    }
}

fn usage(text: &str) -> ! {
    eprintln!("Error: missing argument");
    eprintln!("Usage: {}", text);
    std::process::exit(1);
}

fn print_help() {
    println!("cbvh - Clustered quantized BVH compressor");
    println!();
    println!("USAGE:");
    println!("    cbvh [OPTIONS] <COMMAND> [ARGS]");
    println!();
    println!("COMMANDS:");
    println!("    c, compress <tris.bin> <out.cbvh>   Build a SAH BVH and compress it");
    println!("    i, info     <file.cbvh>             Show header, tables and replay stats");
    println!("    config      [path]                  Print or write the default config JSON");
    println!("    h, help                             Show this help");
    println!();
    println!("COMPRESS OPTIONS:");
    println!("    --config <file.json>   Load layout and cost coefficients");
    println!("    --t-trv-int <x>        Quantized box test cost");
    println!("    --t-switch <x>         Extra cost of entering a new cluster");
    println!("    --t-ist <x>            Triangle intersection cost");
    println!("    --leaf-bits <n>        Bits for the leaf triangle count (1..=14)");
    println!();
    println!("OPTIONS:");
    println!("    -v, --verbose    Show debug output");
    println!("    -vv, --trace     Show trace output (very verbose)");
    println!("    -q, --quiet      Errors only");
    println!();
    println!("NOTES:");
    println!("    - tris.bin is a raw little-endian triangle soup, 9 x f32 per triangle");
    println!("    - RUST_LOG overrides the verbosity flags");
}

fn cmd_compress(args: &[&str]) -> Result<()> {
    let mut positional = Vec::new();
    let mut config = CompressConfig::default();
    let mut overrides: Vec<(&str, &str)> = Vec::new();

    let mut iter = args.iter();
    while let Some(&arg) = iter.next() {
        match arg {
            "--config" | "--t-trv-int" | "--t-switch" | "--t-ist" | "--leaf-bits" => {
                let value = iter.next().with_context(|| format!("{} needs a value", arg))?;
                overrides.push((arg, *value));
            }
            _ => positional.push(arg),
        }
    }
    let [input, output] = positional[..] else {
        usage("cbvh compress <tris.bin> <out.cbvh> [--config cfg.json] [--t-switch x] ...");
    };

    // Config file first so explicit flags override it
    if let Some((_, path)) = overrides.iter().find(|(k, _)| *k == "--config") {
        config = CompressConfig::load(path).with_context(|| format!("loading config {}", path))?;
    }
    for (key, value) in overrides {
        match key {
            "--t-trv-int" => config.costs.t_trv_int = parse(key, value)?,
            "--t-switch" => config.costs.t_switch = parse(key, value)?,
            "--t-ist" => config.costs.t_ist = parse(key, value)?,
            "--leaf-bits" => {
                config.layout = FieldLayout {
                    leaf_bits: parse(key, value)?,
                    ..config.layout
                }
            }
            _ => {}
        }
    }
    config.validate()?;

    let triangles = read_triangle_soup(input)?;
    tracing::info!("Read {} triangles from {}", triangles.len(), input);

    let bvh = build_bvh(&triangles, config.layout.max_prims_per_leaf())?;
    tracing::info!("Built BVH with {} nodes", bvh.node_count());

    let compressed = quant::compress(&bvh, &triangles, &config)?;
    quant::save(output, &compressed).with_context(|| format!("writing {}", output))?;

    println!("{}", compressed.stats());
    println!("Wrote {}", output);
    Ok(())
}

fn cmd_info(path: &str) -> Result<()> {
    tracing::info!("Opening {}", path);

    let header = read_header(&mut BufReader::new(File::open(path)?))?;
    let compressed = quant::load(path).with_context(|| format!("reading {}", path))?;
    let stats = compressed.stats();

    println!("File:       {}", path);
    println!("Version:    {}", header.version);
    println!(
        "Layout:     {} leaf bits, {} index bits, inv-scale weight {}",
        header.layout.leaf_bits,
        header.layout.index_bits(),
        header.layout.inv_scale_weight
    );
    println!("Capacity:   {} nodes per cluster", header.layout.max_nodes_per_cluster());
    println!();
    println!("{}", stats);
    println!();

    let replay = quant::replay(&compressed)?;
    tracing::debug!("Replay visited {} records", replay.visited_nodes);
    println!("Traversal:");
    println!("  node stack:     {}", replay.node_stack_depth);
    println!("  cluster stack:  {}", replay.cluster_stack_depth);
    println!("  reached leaves: {}", replay.visited_leaves);
    println!("  reached tris:   {}", replay.visited_triangles);
    let unreached = replay.unreached(&compressed);
    if unreached > 0 {
        println!("  unreached:      {}", unreached);
    }
    Ok(())
}

fn cmd_config(path: Option<&str>) -> Result<()> {
    let config = CompressConfig::default();
    match path {
        Some(path) => {
            config.save(path)?;
            println!("Wrote {}", path);
        }
        None => println!("{}", config.to_json()?),
    }
    Ok(())
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    match value.parse() {
        Ok(v) => Ok(v),
        Err(_) => bail!("invalid value for {}: {}", key, value),
    }
}

/// Read a raw little-endian triangle soup (9 x f32 per triangle).
fn read_triangle_soup(path: impl AsRef<Path>) -> Result<Vec<Triangle>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let len = file.metadata()?.len();
    if len % 36 != 0 {
        bail!("{} is {} bytes, not a multiple of 36", path.display(), len);
    }

    let mut r = BufReader::new(file);
    let mut triangles = Vec::with_capacity((len / 36) as usize);
    let mut v = [0f32; 9];
    loop {
        match r.read_f32_into::<LittleEndian>(&mut v) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        triangles.push(Triangle::new(
            Vec3::new(v[0], v[1], v[2]),
            Vec3::new(v[3], v[4], v[5]),
            Vec3::new(v[6], v[7], v[8]),
        ));
    }

    if let Some(i) = triangles.iter().position(|t| !t.aabb().is_finite()) {
        bail!("triangle {} has non-finite coordinates", i);
    }
    Ok(triangles)
}
