//! Clustered quantization of a BVH into 8-byte node records.
//!
//! ## Pipeline
//!
//! 1. [`policy`] - offset-indexed cost tables, then a top-down commit of
//!    STAY/SWITCH per internal node
//! 2. [`partition`] - breadth-first assignment of nodes to clusters
//! 3. [`encode`] - per-cluster quantization and tagged child fields
//!
//! [`format`] holds the 16-bit field codec the GPU decoder mirrors, and
//! [`replay`] walks finished output with that decoder alone.

pub mod config;
pub mod encode;
pub mod format;
pub mod frame;
pub mod gpu_data;
pub mod io;
pub mod partition;
pub mod policy;
pub mod replay;

pub use config::{CompressConfig, CostParams, FieldLayout};
pub use encode::{compress, CompressStats, CompressedBvh};
pub use format::{is_switch, ChildRef};
pub use frame::{QuantBounds, QuantFrame};
pub use gpu_data::{GpuCluster, GpuNode, GpuTriangle};
pub use io::{load, save};
pub use policy::{Policy, PolicyTable};
pub use replay::{replay, ReplayStats};
