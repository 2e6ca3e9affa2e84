//! Container file for a compressed BVH.
//!
//! ```text
//! +----------------------+
//! | Magic: "CBVH"        |  4 bytes
//! | Version              |  u16
//! | Leaf bits (B)        |  u8
//! | Reserved             |  u8
//! | Inverse-scale weight |  f32
//! | Cluster count        |  u32
//! | Node count           |  u32
//! | Triangle count       |  u32
//! +----------------------+
//! | Cluster table        |  36 bytes each
//! | Node table           |   8 bytes each
//! | Triangle table       |  36 bytes each
//! +----------------------+
//! ```
//!
//! Every field is little-endian.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use super::config::FieldLayout;
use super::encode::CompressedBvh;
use super::gpu_data::{GpuCluster, GpuNode, GpuTriangle};
use crate::util::{Error, Result};

/// File magic.
pub const CBVH_MAGIC: &[u8; 4] = b"CBVH";

/// Current container version.
pub const CBVH_VERSION: u16 = 1;

/// Header size in bytes.
pub const HEADER_SIZE: usize = 24;

/// Parsed container header.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Header {
    pub version: u16,
    pub layout: FieldLayout,
    pub clusters: u32,
    pub nodes: u32,
    pub triangles: u32,
}

/// Write `data` to `w`.
pub fn write_compressed<W: Write>(w: &mut W, data: &CompressedBvh) -> Result<()> {
    let leaf_bits = u8::try_from(data.layout.leaf_bits).map_err(|_| {
        Error::InvalidConfig(format!(
            "leaf_bits {} does not fit u8",
            data.layout.leaf_bits
        ))
    })?;

    w.write_all(CBVH_MAGIC)?;
    w.write_u16::<LittleEndian>(CBVH_VERSION)?;
    w.write_u8(leaf_bits)?;
    w.write_u8(0)?; // reserved
    w.write_f32::<LittleEndian>(data.layout.inv_scale_weight)?;
    w.write_u32::<LittleEndian>(count_u32(data.clusters.len())?)?;
    w.write_u32::<LittleEndian>(count_u32(data.nodes.len())?)?;
    w.write_u32::<LittleEndian>(count_u32(data.triangles.len())?)?;

    for c in &data.clusters {
        for v in c.ref_bounds {
            w.write_f32::<LittleEndian>(v)?;
        }
        w.write_f32::<LittleEndian>(c.inv_scale)?;
        w.write_u32::<LittleEndian>(c.node_offset)?;
        w.write_u32::<LittleEndian>(c.trig_offset)?;
    }

    for n in &data.nodes {
        w.write_all(&n.bounds)?;
        w.write_u16::<LittleEndian>(n.data)?;
    }

    for t in &data.triangles {
        for p in [t.p0, t.p1, t.p2] {
            for v in p {
                w.write_f32::<LittleEndian>(v)?;
            }
        }
    }

    Ok(())
}

/// Read only the header.
pub fn read_header<R: Read>(r: &mut R) -> Result<Header> {
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if &magic != CBVH_MAGIC {
        return Err(Error::format(format!("bad magic {:?}", magic)));
    }

    let version = r.read_u16::<LittleEndian>()?;
    if version != CBVH_VERSION {
        return Err(Error::format(format!("unsupported version {}", version)));
    }

    let leaf_bits = r.read_u8()? as u32;
    let _reserved = r.read_u8()?;
    let layout = FieldLayout {
        leaf_bits,
        inv_scale_weight: r.read_f32::<LittleEndian>()?,
    };
    layout
        .validate()
        .map_err(|e| Error::format(format!("bad layout: {}", e)))?;

    Ok(Header {
        version,
        layout,
        clusters: r.read_u32::<LittleEndian>()?,
        nodes: r.read_u32::<LittleEndian>()?,
        triangles: r.read_u32::<LittleEndian>()?,
    })
}

/// Read a complete container from `r`.
///
/// Cluster offsets are checked against the table sizes so the result can be
/// indexed without further bounds checks.
pub fn read_compressed<R: Read>(r: &mut R) -> Result<CompressedBvh> {
    let header = read_header(r)?;

    // Counts come from the file; grow as records actually arrive
    let mut clusters = Vec::new();
    for _ in 0..header.clusters {
        let mut ref_bounds = [0f32; 6];
        r.read_f32_into::<LittleEndian>(&mut ref_bounds)?;
        clusters.push(GpuCluster {
            ref_bounds,
            inv_scale: r.read_f32::<LittleEndian>()?,
            node_offset: r.read_u32::<LittleEndian>()?,
            trig_offset: r.read_u32::<LittleEndian>()?,
        });
    }

    let mut nodes = Vec::new();
    for _ in 0..header.nodes {
        let mut bounds = [0u8; 6];
        r.read_exact(&mut bounds)?;
        nodes.push(GpuNode {
            bounds,
            data: r.read_u16::<LittleEndian>()?,
        });
    }

    let mut triangles = Vec::new();
    for _ in 0..header.triangles {
        let mut p = [0f32; 9];
        r.read_f32_into::<LittleEndian>(&mut p)?;
        triangles.push(GpuTriangle {
            p0: [p[0], p[1], p[2]],
            p1: [p[3], p[4], p[5]],
            p2: [p[6], p[7], p[8]],
        });
    }

    check_offsets(&clusters, nodes.len(), triangles.len())?;

    Ok(CompressedBvh {
        layout: header.layout,
        clusters,
        nodes,
        triangles,
    })
}

/// Write `data` to a file at `path`.
pub fn save(path: impl AsRef<Path>, data: &CompressedBvh) -> Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    write_compressed(&mut w, data)?;
    w.flush()?;
    Ok(())
}

/// Read a container file from `path`.
pub fn load(path: impl AsRef<Path>) -> Result<CompressedBvh> {
    let mut r = BufReader::new(File::open(path)?);
    read_compressed(&mut r)
}

fn count_u32(n: usize) -> Result<u32> {
    u32::try_from(n).map_err(|_| Error::format(format!("table of {} records exceeds u32", n)))
}

fn check_offsets(clusters: &[GpuCluster], nodes: usize, triangles: usize) -> Result<()> {
    let mut prev = (0usize, 0usize);
    for (i, c) in clusters.iter().enumerate() {
        let cur = (c.node_offset as usize, c.trig_offset as usize);
        let backwards = cur.0 < prev.0 || cur.1 < prev.1;
        if (i == 0 && cur != (0, 0)) || backwards || cur.0 > nodes || cur.1 > triangles {
            return Err(Error::format(format!(
                "cluster {} offsets ({}, {}) out of order or past tables ({}, {})",
                i, cur.0, cur.1, nodes, triangles
            )));
        }
        prev = cur;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CompressedBvh {
        let layout = FieldLayout::default();
        CompressedBvh {
            layout,
            clusters: vec![GpuCluster {
                ref_bounds: [0.0, 2.0, -1.0, 1.0, 0.5, 0.75],
                inv_scale: 16320.0,
                node_offset: 0,
                trig_offset: 0,
            }],
            nodes: vec![
                GpuNode {
                    bounds: [0, 128, 0, 255, 0, 31],
                    data: 0x9000,
                },
                GpuNode {
                    bounds: [127, 255, 0, 255, 0, 31],
                    data: 0x9001,
                },
            ],
            triangles: vec![
                GpuTriangle {
                    p0: [0.0, -1.0, 0.5],
                    p1: [1.0, 0.0, 0.5],
                    p2: [0.0, 1.0, 0.75],
                },
                GpuTriangle {
                    p0: [1.0, -1.0, 0.5],
                    p1: [2.0, 0.0, 0.5],
                    p2: [1.0, 1.0, 0.75],
                },
            ],
        }
    }

    #[test]
    fn test_header_layout() {
        let mut buf = Vec::new();
        write_compressed(&mut buf, &sample()).unwrap();
        assert_eq!(&buf[0..4], CBVH_MAGIC);
        assert_eq!(u16::from_le_bytes([buf[4], buf[5]]), CBVH_VERSION);
        assert_eq!(buf[6], 3);
        assert_eq!(buf[7], 0);
        assert_eq!(f32::from_le_bytes(buf[8..12].try_into().unwrap()), 128.0);
        assert_eq!(u32::from_le_bytes(buf[12..16].try_into().unwrap()), 1);
        assert_eq!(buf.len(), HEADER_SIZE + 36 + 2 * 8 + 2 * 36);
        // First node record: six bounds then the tag
        let node = HEADER_SIZE + 36;
        assert_eq!(&buf[node..node + 6], &[0, 128, 0, 255, 0, 31]);
        assert_eq!(u16::from_le_bytes([buf[node + 6], buf[node + 7]]), 0x9000);
    }

    #[test]
    fn test_write_read() {
        let data = sample();
        let mut buf = Vec::new();
        write_compressed(&mut buf, &data).unwrap();
        let back = read_compressed(&mut buf.as_slice()).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn test_bad_magic() {
        let mut buf = Vec::new();
        write_compressed(&mut buf, &sample()).unwrap();
        buf[0] = b'X';
        assert!(matches!(
            read_compressed(&mut buf.as_slice()),
            Err(Error::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_truncated() {
        let mut buf = Vec::new();
        write_compressed(&mut buf, &sample()).unwrap();
        buf.truncate(buf.len() - 4);
        assert!(matches!(read_compressed(&mut buf.as_slice()), Err(Error::Io(_))));
    }

    #[test]
    fn test_bad_offsets() {
        let mut data = sample();
        data.clusters[0].trig_offset = 5;
        let mut buf = Vec::new();
        write_compressed(&mut buf, &data).unwrap();
        assert!(matches!(
            read_compressed(&mut buf.as_slice()),
            Err(Error::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scene.cbvh");
        let data = sample();
        save(&path, &data).unwrap();
        assert_eq!(load(&path).unwrap(), data);
    }
}
