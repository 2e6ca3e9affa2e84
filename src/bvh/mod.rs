//! Float-precision input BVH consumed by the compressor.
//!
//! Flat array layout:
//! - node 0 is the root
//! - children of an internal node are always allocated as an adjacent pair,
//!   so one index (`first_child`) addresses both
//! - leaves reference a contiguous run of `prim_indices`

pub mod build;

pub use build::build_bvh;

use crate::util::{Aabb, Error, Result, Vec3};

/// Input BVH node.
///
/// Internal node: `prim_count == 0`, `first_child_or_prim` = first child index
/// Leaf node: `prim_count > 0`, `first_child_or_prim` = first entry in `prim_indices`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BvhNode {
    pub bounds: Aabb,
    pub prim_count: u32,
    pub first_child_or_prim: u32,
}

impl BvhNode {
    /// Internal node whose children are `first_child` and `first_child + 1`.
    pub fn internal(bounds: Aabb, first_child: u32) -> Self {
        Self {
            bounds,
            prim_count: 0,
            first_child_or_prim: first_child,
        }
    }

    /// Leaf covering `prim_indices[first_prim..first_prim + count]`.
    pub fn leaf(bounds: Aabb, first_prim: u32, count: u32) -> Self {
        Self {
            bounds,
            prim_count: count,
            first_child_or_prim: first_prim,
        }
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.prim_count != 0
    }

    /// Indices of the child pair. Only meaningful for internal nodes.
    #[inline]
    pub fn children(&self) -> (usize, usize) {
        let left = self.first_child_or_prim as usize;
        (left, left + 1)
    }

    /// Range into the primitive index array. Only meaningful for leaves.
    #[inline]
    pub fn prim_range(&self) -> std::ops::Range<usize> {
        let first = self.first_child_or_prim as usize;
        first..first + self.prim_count as usize
    }
}

/// Triangle primitive (three vertex positions).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triangle {
    pub p0: Vec3,
    pub p1: Vec3,
    pub p2: Vec3,
}

impl Triangle {
    pub fn new(p0: Vec3, p1: Vec3, p2: Vec3) -> Self {
        Self { p0, p1, p2 }
    }

    /// Compute AABB of this triangle.
    pub fn aabb(&self) -> Aabb {
        let mut b = Aabb::from_point(self.p0);
        b.expand_by_point(self.p1);
        b.expand_by_point(self.p2);
        b
    }

    /// Centroid of the triangle.
    pub fn centroid(&self) -> Vec3 {
        (self.p0 + self.p1 + self.p2) / 3.0
    }
}

/// Input hierarchy: node array plus primitive index array.
#[derive(Debug, Clone, Default)]
pub struct Bvh {
    /// Flat node array (index 0 = root).
    pub nodes: Vec<BvhNode>,
    /// Triangle indices referenced by leaves.
    pub prim_indices: Vec<usize>,
}

impl Bvh {
    pub fn new(nodes: Vec<BvhNode>, prim_indices: Vec<usize>) -> Self {
        Self {
            nodes,
            prim_indices,
        }
    }

    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Check the structural contract the compressor relies on.
    ///
    /// Rejects non-finite bounds, a leaf root, child pairs past the end of the
    /// node array, primitive ranges past the index or triangle arrays, and any
    /// node reachable from the root along more than one path (cycles and
    /// shared child pairs).
    pub fn validate(&self, triangle_count: usize) -> Result<()> {
        let root = self
            .nodes
            .first()
            .ok_or_else(|| Error::tree("empty node array"))?;
        if root.is_leaf() {
            return Err(Error::RootIsLeaf);
        }

        let n = self.nodes.len();
        for (i, node) in self.nodes.iter().enumerate() {
            if !node.bounds.is_finite() {
                return Err(Error::NonFiniteBounds { node: i });
            }

            if node.is_leaf() {
                let range = node.prim_range();
                if range.end > self.prim_indices.len() {
                    return Err(Error::tree(format!(
                        "leaf {} references primitives {:?} past index array of {}",
                        i,
                        range,
                        self.prim_indices.len()
                    )));
                }
                let mut prims = self.prim_indices[range].iter();
                if let Some(&bad) = prims.find(|&&p| p >= triangle_count) {
                    return Err(Error::tree(format!(
                        "leaf {} references triangle {} of {}",
                        i, bad, triangle_count
                    )));
                }
            } else {
                let (left, right) = node.children();
                if left == 0 || right >= n {
                    return Err(Error::tree(format!(
                        "node {} has child pair ({}, {}) outside 1..{}",
                        i, left, right, n
                    )));
                }
            }
        }

        // Every pair index is in range now, so the walk can index freely
        let mut seen = vec![false; n];
        seen[0] = true;
        let mut stack = vec![0usize];
        while let Some(idx) = stack.pop() {
            let node = &self.nodes[idx];
            if node.is_leaf() {
                continue;
            }
            let (left, right) = node.children();
            for child in [left, right] {
                if std::mem::replace(&mut seen[child], true) {
                    return Err(Error::tree(format!(
                        "node {} reached twice (again from node {})",
                        child, idx
                    )));
                }
                stack.push(child);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box(x: f32) -> Aabb {
        Aabb::new(Vec3::new(x, 0.0, 0.0), Vec3::new(x + 1.0, 1.0, 1.0))
    }

    fn three_node_tree() -> Bvh {
        let root = Aabb::new(Vec3::ZERO, Vec3::new(2.0, 1.0, 1.0));
        Bvh::new(
            vec![
                BvhNode::internal(root, 1),
                BvhNode::leaf(unit_box(0.0), 0, 1),
                BvhNode::leaf(unit_box(1.0), 1, 1),
            ],
            vec![0, 1],
        )
    }

    #[test]
    fn test_validate_ok() {
        assert!(three_node_tree().validate(2).is_ok());
    }

    #[test]
    fn test_validate_leaf_root() {
        let bvh = Bvh::new(vec![BvhNode::leaf(unit_box(0.0), 0, 1)], vec![0]);
        assert!(matches!(bvh.validate(1), Err(Error::RootIsLeaf)));
    }

    #[test]
    fn test_validate_non_finite() {
        let mut bvh = three_node_tree();
        bvh.nodes[2].bounds.max.y = f32::INFINITY;
        assert!(matches!(
            bvh.validate(2),
            Err(Error::NonFiniteBounds { node: 2 })
        ));
    }

    #[test]
    fn test_validate_dangling_child() {
        let mut bvh = three_node_tree();
        bvh.nodes[0].first_child_or_prim = 2;
        assert!(matches!(bvh.validate(2), Err(Error::InvalidTree(_))));
    }

    #[test]
    fn test_validate_cycle() {
        // Node 1 points back at its own pair
        let b = unit_box(0.0);
        let bvh = Bvh::new(
            vec![
                BvhNode::internal(b, 1),
                BvhNode::internal(b, 1),
                BvhNode::leaf(b, 0, 1),
            ],
            vec![0],
        );
        assert!(matches!(bvh.validate(1), Err(Error::InvalidTree(_))));
    }

    #[test]
    fn test_validate_shared_pair() {
        // Nodes 1 and 2 both claim the pair (3, 4)
        let b = unit_box(0.0);
        let bvh = Bvh::new(
            vec![
                BvhNode::internal(b, 1),
                BvhNode::internal(b, 3),
                BvhNode::internal(b, 3),
                BvhNode::leaf(b, 0, 1),
                BvhNode::leaf(b, 1, 1),
            ],
            vec![0, 1],
        );
        assert!(matches!(bvh.validate(2), Err(Error::InvalidTree(_))));
    }

    #[test]
    fn test_validate_triangle_range() {
        let bvh = three_node_tree();
        assert!(matches!(bvh.validate(1), Err(Error::InvalidTree(_))));
    }

    #[test]
    fn test_triangle_aabb() {
        let t = Triangle::new(
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(2.0, 0.0, 1.0),
            Vec3::new(1.0, 3.0, 0.0),
        );
        let b = t.aabb();
        assert_eq!(b.min, Vec3::ZERO);
        assert_eq!(b.max, Vec3::new(2.0, 3.0, 1.0));
        assert_eq!(t.centroid(), Vec3::new(1.0, 1.0, 1.0 / 3.0));
    }
}
