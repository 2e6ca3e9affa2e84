//! Error types for the BVH compressor.

use thiserror::Error;

/// Main error type for compression and container I/O.
///
/// Every build failure is fatal for the current invocation: the compressor
/// either produces a complete structure or nothing.
#[derive(Error, Debug)]
pub enum Error {
    /// A node's bounding box contains NaN or infinite coordinates
    #[error("Node {node} has non-finite bounds")]
    NonFiniteBounds { node: usize },

    /// A frame anchor has zero extent on every axis
    #[error("Node {node} has a degenerate bounding box and cannot anchor a quantization frame")]
    DegenerateFrame { node: usize },

    /// A quantized coordinate fell outside `[0, 256]`
    #[error("Quantized value {value} on axis {axis} is outside its reference frame")]
    OutOfFrame { axis: usize, value: i32 },

    /// The root must be an internal node
    #[error("Root node is a leaf; at least two top-level children are required")]
    RootIsLeaf,

    /// Structurally invalid input tree
    #[error("Invalid tree: {0}")]
    InvalidTree(String),

    /// A cluster holds more nodes than the index field can address
    #[error("Cluster {cluster} holds {nodes} nodes (capacity {capacity})")]
    ClusterOverflow {
        cluster: usize,
        nodes: usize,
        capacity: usize,
    },

    /// Local first-child index does not fit the index field
    #[error("Child index {index} does not fit (capacity {capacity})")]
    ChildIndexOverflow { index: usize, capacity: usize },

    /// Leaf triangle count does not fit the count field
    #[error("Leaf holds {count} triangles (max {max})")]
    LeafCountOverflow { count: usize, max: usize },

    /// Leaf triangle offset does not fit the offset field
    #[error("Leaf triangle offset {offset} does not fit (capacity {capacity})")]
    LeafOffsetOverflow { offset: usize, capacity: usize },

    /// Target cluster id does not fit 15 bits
    #[error("Cluster id {id} does not fit (max {max})")]
    ClusterIdOverflow { id: usize, max: usize },

    /// Invalid configuration value
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Malformed compressed container or dangling decoded pointer
    #[error("Invalid compressed data: {0}")]
    InvalidFormat(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Config (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create an invalid tree error.
    pub fn tree(msg: impl Into<String>) -> Self {
        Self::InvalidTree(msg.into())
    }

    /// Create an invalid format error.
    pub fn format(msg: impl Into<String>) -> Self {
        Self::InvalidFormat(msg.into())
    }

    /// True for the bit-field capacity failures.
    ///
    /// These are recoverable only by retuning the cost coefficients and
    /// rebuilding from scratch.
    pub fn is_capacity_overflow(&self) -> bool {
        matches!(
            self,
            Self::ClusterOverflow { .. }
                | Self::ChildIndexOverflow { .. }
                | Self::LeafCountOverflow { .. }
                | Self::LeafOffsetOverflow { .. }
                | Self::ClusterIdOverflow { .. }
        )
    }
}

/// Result type alias for compressor operations.
pub type Result<T> = std::result::Result<T, Error>;
