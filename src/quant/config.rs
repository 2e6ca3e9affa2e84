//! Compression configuration.
//!
//! [`FieldLayout`] is the single immutable description of the 16-bit tagged
//! field and the capacities it implies. It is threaded through every pass.
//! [`CostParams`] carries the traversal cost coefficients.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::util::{Error, Result};

/// Total width of the tagged field below the role bit.
pub const PAYLOAD_BITS: u32 = 15;

/// Largest quantized coordinate.
pub const QUANT_MAX: i32 = 255;

/// Split of the 16-bit tagged field.
///
/// ```text
/// INTERNAL: |1|0 .. 0|  first-child local index  |
///     LEAF: |1| count|  local triangle offset    |
///   SWITCH: |0|      target cluster id           |
///            ^ \ B  / \       15 - B bits        /
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldLayout {
    /// Bits reserved for the leaf triangle count (B).
    pub leaf_bits: u32,
    /// Numerator of the per-cluster inverse scale stored for the GPU
    /// (`inv_scale_weight / scaling_factor`).
    pub inv_scale_weight: f32,
}

impl Default for FieldLayout {
    fn default() -> Self {
        Self {
            leaf_bits: 3,
            inv_scale_weight: 128.0,
        }
    }
}

impl FieldLayout {
    /// Layout with `leaf_bits` count bits and the default scale weight.
    pub fn with_leaf_bits(leaf_bits: u32) -> Result<Self> {
        let layout = Self {
            leaf_bits,
            ..Self::default()
        };
        layout.validate()?;
        Ok(layout)
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..PAYLOAD_BITS).contains(&self.leaf_bits) {
            return Err(Error::InvalidConfig(format!(
                "leaf_bits must be in 1..={}, got {}",
                PAYLOAD_BITS - 1,
                self.leaf_bits
            )));
        }
        if !(self.inv_scale_weight.is_finite() && self.inv_scale_weight > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "inv_scale_weight must be finite and positive, got {}",
                self.inv_scale_weight
            )));
        }
        Ok(())
    }

    /// Width of the index/offset field (15 - B).
    #[inline]
    pub const fn index_bits(&self) -> u32 {
        PAYLOAD_BITS - self.leaf_bits
    }

    /// Nodes a single cluster can address.
    #[inline]
    pub const fn max_nodes_per_cluster(&self) -> usize {
        1 << self.index_bits()
    }

    /// Triangles a single cluster can address.
    #[inline]
    pub const fn max_trigs_per_cluster(&self) -> usize {
        self.max_nodes_per_cluster()
    }

    /// Largest triangle count a leaf record can hold (2^B - 1).
    #[inline]
    pub const fn max_prims_per_leaf(&self) -> usize {
        (1 << self.leaf_bits) - 1
    }

    /// Number of addressable clusters.
    #[inline]
    pub const fn max_clusters(&self) -> usize {
        1 << PAYLOAD_BITS
    }
}

/// Traversal cost coefficients for the policy solver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostParams {
    /// Cost of one quantized box test inside the current frame.
    pub t_trv_int: f32,
    /// Extra cost of crossing into a new frame.
    pub t_switch: f32,
    /// Cost of one ray/triangle intersection.
    pub t_ist: f32,
}

impl Default for CostParams {
    fn default() -> Self {
        Self {
            t_trv_int: 0.5,
            t_switch: 1.0,
            t_ist: 1.0,
        }
    }
}

impl CostParams {
    pub fn new(t_trv_int: f32, t_switch: f32, t_ist: f32) -> Self {
        Self {
            t_trv_int,
            t_switch,
            t_ist,
        }
    }

    /// Coefficients must be finite and non-negative.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("t_trv_int", self.t_trv_int),
            ("t_switch", self.t_switch),
            ("t_ist", self.t_ist),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::InvalidConfig(format!(
                    "{} must be finite and non-negative, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

/// Everything a compression run needs besides the tree itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressConfig {
    pub layout: FieldLayout,
    pub costs: CostParams,
}

impl CompressConfig {
    pub fn new(layout: FieldLayout, costs: CostParams) -> Self {
        Self { layout, costs }
    }

    pub fn validate(&self) -> Result<()> {
        self.layout.validate()?;
        self.costs.validate()
    }

    /// Load from a JSON file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Save as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
