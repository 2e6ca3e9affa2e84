//! # cbvh
//!
//! Cost-optimizing compressor that turns a float BVH into clusters of 8-byte
//! quantized nodes for GPU ray traversal.
//!
//! Each cluster shares one reference box and one scaling factor, and every
//! node stores six 8-bit bounds plus a 16-bit tagged field that points to an
//! in-cluster child pair, a run of leaf triangles, or another cluster. Where
//! clusters start is chosen by a dynamic program over the expected traversal
//! cost.
//!
//! ## Modules
//!
//! - [`util`] - Errors and bounding-box math
//! - [`bvh`] - Input tree types and a SAH builder
//! - [`quant`] - Policy solver, partitioner, encoder, decoder and file I/O
//!
//! ## Example
//!
//! ```ignore
//! use cbvh::prelude::*;
//!
//! let bvh = build_bvh(&triangles, FieldLayout::default().max_prims_per_leaf())?;
//! let compressed = compress(&bvh, &triangles, &CompressConfig::default())?;
//! cbvh::quant::save("scene.cbvh", &compressed)?;
//! ```

pub mod bvh;
pub mod quant;
pub mod util;

// Re-export commonly used types
pub use util::{Error, Result};
pub use quant::{compress, CompressConfig, CompressedBvh};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::bvh::{build_bvh, Bvh, BvhNode, Triangle};
    pub use crate::quant::{
        compress, replay, ChildRef, CompressConfig, CompressedBvh, CostParams, FieldLayout,
    };
    pub use crate::util::{Aabb, Error, Result, Vec3};
}
