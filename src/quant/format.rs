//! 16-bit tagged child field.
//!
//! Bit 15 separates in-cluster children (set) from a cluster switch (clear).
//! For in-cluster children the next B bits hold the leaf triangle count,
//! zero meaning the children are internal nodes. The remaining `15 - B` bits
//! carry the local first-child index or the local triangle offset.

use super::config::FieldLayout;
use crate::util::{Error, Result};

/// Bit marking children that live in the current cluster.
pub const LOCAL_FLAG: u16 = 1 << 15;

/// Mask of the 15 bits below the role bit.
pub const PAYLOAD_MASK: u16 = !LOCAL_FLAG;

/// Check if a field points into another cluster.
#[inline]
pub const fn is_switch(data: u16) -> bool {
    (data & LOCAL_FLAG) == 0
}

/// Decoded role of a node record's children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChildRef {
    /// Children are `nodes[first_child]`, `nodes[first_child + 1]` of this cluster.
    Internal { first_child: u16 },
    /// Triangles `trigs[offset..offset + count]` of this cluster.
    Leaf { count: u16, offset: u16 },
    /// Children are the first two nodes of the target cluster.
    Switch { cluster: u16 },
}

impl FieldLayout {
    #[inline]
    const fn index_mask(&self) -> u16 {
        ((1u32 << self.index_bits()) - 1) as u16
    }

    /// Pack a child reference, rejecting values that overflow their field.
    pub fn encode(&self, child: ChildRef) -> Result<u16> {
        let capacity = self.max_nodes_per_cluster();
        match child {
            ChildRef::Internal { first_child } => {
                if first_child as usize >= capacity {
                    return Err(Error::ChildIndexOverflow {
                        index: first_child as usize,
                        capacity,
                    });
                }
                Ok(LOCAL_FLAG | first_child)
            }
            ChildRef::Leaf { count, offset } => {
                let max = self.max_prims_per_leaf();
                if count == 0 || count as usize > max {
                    return Err(Error::LeafCountOverflow {
                        count: count as usize,
                        max,
                    });
                }
                if offset as usize >= self.max_trigs_per_cluster() {
                    return Err(Error::LeafOffsetOverflow {
                        offset: offset as usize,
                        capacity: self.max_trigs_per_cluster(),
                    });
                }
                Ok(LOCAL_FLAG | (count << self.index_bits()) | offset)
            }
            ChildRef::Switch { cluster } => {
                if cluster as usize >= self.max_clusters() {
                    return Err(Error::ClusterIdOverflow {
                        id: cluster as usize,
                        max: self.max_clusters() - 1,
                    });
                }
                Ok(cluster)
            }
        }
    }

    /// Unpack a tagged field. Total over all 16-bit values.
    #[inline]
    pub fn decode(&self, data: u16) -> ChildRef {
        if is_switch(data) {
            return ChildRef::Switch {
                cluster: data & PAYLOAD_MASK,
            };
        }
        let count = (data & PAYLOAD_MASK) >> self.index_bits();
        let low = data & self.index_mask();
        if count == 0 {
            ChildRef::Internal { first_child: low }
        } else {
            ChildRef::Leaf { count, offset: low }
        }
    }
}
