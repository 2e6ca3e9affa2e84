//! SAH-based BVH builder.
//!
//! Produces the float-precision input hierarchy the compressor consumes:
//! binned Surface Area Heuristic splits, child pairs allocated adjacently,
//! and leaves capped at a caller-chosen size so they fit the leaf-count field.

use super::{Bvh, BvhNode, Triangle};
use crate::util::{Aabb, Error, Result, Vec3};

/// Number of SAH bins for split evaluation.
const NUM_BINS: usize = 12;

/// Cost ratio: traversal vs intersection.
const TRAVERSAL_COST: f32 = 1.0;
const INTERSECT_COST: f32 = 1.0;

/// SAH bin for evaluating split candidates.
#[derive(Clone, Copy)]
struct Bin {
    bounds: Aabb,
    count: usize,
}

impl Bin {
    const EMPTY: Self = Self {
        bounds: Aabb::EMPTY,
        count: 0,
    };
}

/// Best split candidate found by binning.
struct Split {
    axis: usize,
    pos: f32,
    cost: f32,
}

/// Build a BVH from triangles using SAH.
///
/// Leaves never hold more than `max_leaf_size` triangles. The root is always
/// split when it holds two or more triangles, so the result has two top-level
/// children whenever that is possible.
#[tracing::instrument(skip_all, fields(tri_count = triangles.len(), max_leaf_size))]
pub fn build_bvh(triangles: &[Triangle], max_leaf_size: usize) -> Result<Bvh> {
    let n = triangles.len();
    if n == 0 {
        return Err(Error::tree("cannot build a BVH over zero triangles"));
    }
    if max_leaf_size == 0 {
        return Err(Error::InvalidConfig("max_leaf_size must be at least 1".into()));
    }

    // Pre-compute centroids and AABBs
    let centroids: Vec<Vec3> = triangles.iter().map(|t| t.centroid()).collect();
    let aabbs: Vec<Aabb> = triangles.iter().map(|t| t.aabb()).collect();

    // Working index array (will be reordered by partitioning)
    let mut indices: Vec<usize> = (0..n).collect();

    // Worst case: 2*n - 1 nodes for a full binary tree
    let mut nodes: Vec<BvhNode> = Vec::with_capacity(2 * n);
    nodes.push(BvhNode::internal(Aabb::EMPTY, 0));

    struct Task {
        node_idx: usize,
        start: usize,
        end: usize, // exclusive
    }

    let mut stack = vec![Task {
        node_idx: 0,
        start: 0,
        end: n,
    }];

    while let Some(task) = stack.pop() {
        let start = task.start;
        let end = task.end;
        let count = end - start;

        let mut node_aabb = Aabb::EMPTY;
        for &idx in &indices[start..end] {
            node_aabb.expand_by_box(&aabbs[idx]);
        }

        if count == 1 {
            nodes[task.node_idx] = BvhNode::leaf(node_aabb, start as u32, 1);
            continue;
        }

        let mut centroid_bounds = Aabb::EMPTY;
        for &idx in &indices[start..end] {
            centroid_bounds.expand_by_point(centroids[idx]);
        }

        let split = find_best_split(&indices[start..end], &aabbs, &centroids, &centroid_bounds);

        // Leaf when it fits and SAH prefers it; the root always splits
        let leaf_cost = count as f32 * INTERSECT_COST * node_aabb.area();
        let prefers_leaf = split.as_ref().map_or(true, |s| s.cost >= leaf_cost);
        if task.node_idx != 0 && count <= max_leaf_size && prefers_leaf {
            nodes[task.node_idx] = BvhNode::leaf(node_aabb, start as u32, count as u32);
            continue;
        }

        let mid = match &split {
            Some(s) => {
                partition(&mut indices[start..end], |&idx| centroids[idx][s.axis] < s.pos) + start
            }
            None => start,
        };

        // Fallback: if partition is degenerate, split in middle
        let mid = if mid == start || mid == end {
            (start + end) / 2
        } else {
            mid
        };

        let left_idx = nodes.len();
        let right_idx = left_idx + 1;
        nodes.push(BvhNode::internal(Aabb::EMPTY, 0));
        nodes.push(BvhNode::internal(Aabb::EMPTY, 0));

        nodes[task.node_idx] = BvhNode::internal(node_aabb, left_idx as u32);

        // Push children (right first so left is processed first)
        stack.push(Task {
            node_idx: right_idx,
            start: mid,
            end,
        });
        stack.push(Task {
            node_idx: left_idx,
            start,
            end: mid,
        });
    }

    tracing::debug!(nodes = nodes.len(), "SAH build finished");

    Ok(Bvh {
        nodes,
        prim_indices: indices,
    })
}

/// SAH binned split search across all 3 axes. `None` if every axis is degenerate.
fn find_best_split(
    indices: &[usize],
    aabbs: &[Aabb],
    centroids: &[Vec3],
    centroid_bounds: &Aabb,
) -> Option<Split> {
    let mut best: Option<Split> = None;

    let mut parent = Aabb::EMPTY;
    for &idx in indices {
        parent.expand_by_box(&aabbs[idx]);
    }
    let parent_area = parent.area();

    for axis in 0..3 {
        let extent = centroid_bounds.max[axis] - centroid_bounds.min[axis];
        if extent < 1e-8 {
            continue; // degenerate axis
        }

        let mut bins = [Bin::EMPTY; NUM_BINS];
        let inv_extent = NUM_BINS as f32 / extent;

        for &idx in indices {
            let bin_id = ((centroids[idx][axis] - centroid_bounds.min[axis]) * inv_extent) as usize;
            let bin_id = bin_id.min(NUM_BINS - 1);
            bins[bin_id].bounds.expand_by_box(&aabbs[idx]);
            bins[bin_id].count += 1;
        }

        // Sweep from left: prefix areas and counts
        let mut left_area = [0.0f32; NUM_BINS - 1];
        let mut left_count = [0usize; NUM_BINS - 1];
        let mut sweep = Aabb::EMPTY;
        let mut sweep_count = 0;
        for i in 0..NUM_BINS - 1 {
            sweep.expand_by_box(&bins[i].bounds);
            sweep_count += bins[i].count;
            left_area[i] = if sweep_count > 0 { sweep.area() } else { 0.0 };
            left_count[i] = sweep_count;
        }

        // Sweep from right and evaluate SAH cost
        sweep = Aabb::EMPTY;
        sweep_count = 0;
        for i in (1..NUM_BINS).rev() {
            sweep.expand_by_box(&bins[i].bounds);
            sweep_count += bins[i].count;
            if sweep_count == 0 || left_count[i - 1] == 0 {
                continue;
            }
            let cost = TRAVERSAL_COST * parent_area
                + INTERSECT_COST
                    * (left_count[i - 1] as f32 * left_area[i - 1]
                        + sweep_count as f32 * sweep.area());

            if best.as_ref().map_or(true, |b| cost < b.cost) {
                best = Some(Split {
                    axis,
                    pos: centroid_bounds.min[axis] + (i as f32 / NUM_BINS as f32) * extent,
                    cost,
                });
            }
        }
    }

    best
}

/// Partition slice in-place. Returns count of elements where predicate is true.
fn partition<T, F>(slice: &mut [T], pred: F) -> usize
where
    F: Fn(&T) -> bool,
{
    let mut left = 0;
    let mut right = slice.len();
    while left < right {
        if pred(&slice[left]) {
            left += 1;
        } else {
            right -= 1;
            slice.swap(left, right);
        }
    }
    left
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_tri(cx: f32, cy: f32, cz: f32) -> Triangle {
        Triangle::new(
            Vec3::new(cx - 0.5, cy - 0.5, cz),
            Vec3::new(cx + 0.5, cy - 0.5, cz),
            Vec3::new(cx, cy + 0.5, cz),
        )
    }

    #[test]
    fn test_empty_input() {
        assert!(build_bvh(&[], 7).is_err());
    }

    #[test]
    fn test_single_triangle() {
        let bvh = build_bvh(&[make_tri(0.0, 0.0, 0.0)], 7).unwrap();
        assert_eq!(bvh.nodes.len(), 1);
        assert!(bvh.nodes[0].is_leaf());
        assert_eq!(bvh.nodes[0].prim_count, 1);
    }

    #[test]
    fn test_root_always_splits() {
        let tris = vec![make_tri(0.0, 0.0, 0.0), make_tri(1.0, 0.0, 0.0), make_tri(2.0, 0.0, 0.0)];
        let bvh = build_bvh(&tris, 7).unwrap();
        assert!(!bvh.nodes[0].is_leaf());
        assert_eq!(bvh.nodes[0].children(), (1, 2));
        assert!(bvh.validate(tris.len()).is_ok());
    }

    #[test]
    fn test_many_triangles_builds_tree() {
        let tris: Vec<Triangle> = (0..100).map(|i| make_tri(i as f32 * 2.0, 0.0, 0.0)).collect();
        let bvh = build_bvh(&tris, 7).unwrap();

        assert!(bvh.nodes.len() > 1, "BVH should have internal nodes");
        assert!(bvh.validate(tris.len()).is_ok());

        // All triangle indices must be present
        let mut sorted = bvh.prim_indices.clone();
        sorted.sort();
        assert_eq!(sorted, (0..100).collect::<Vec<_>>());

        // Root AABB must encompass all triangles
        let root = &bvh.nodes[0];
        assert!(root.bounds.min.x < 0.0);
        assert!(root.bounds.max.x > 198.0);
    }

    #[test]
    fn test_leaf_size_cap() {
        // Coincident centroids defeat SAH binning; the cap must still hold
        let tris: Vec<Triangle> = (0..40).map(|_| make_tri(0.0, 0.0, 0.0)).collect();
        let bvh = build_bvh(&tris, 3).unwrap();
        for node in bvh.nodes.iter().filter(|n| n.is_leaf()) {
            assert!(node.prim_count <= 3);
        }
        let total: u32 = bvh.nodes.iter().map(|n| n.prim_count).sum();
        assert_eq!(total, 40);
    }

    #[test]
    fn test_children_contained() {
        let tris: Vec<Triangle> = (0..64)
            .map(|i| make_tri((i % 8) as f32, (i / 8) as f32, (i % 3) as f32))
            .collect();
        let bvh = build_bvh(&tris, 7).unwrap();
        for node in bvh.nodes.iter().filter(|n| !n.is_leaf()) {
            let (l, r) = node.children();
            assert!(node.bounds.contains(&bvh.nodes[l].bounds));
            assert!(node.bounds.contains(&bvh.nodes[r].bounds));
        }
    }
}
