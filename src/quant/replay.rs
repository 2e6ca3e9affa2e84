//! Decoder-only traversal of a compressed structure.
//!
//! Walks every reachable record the way a GPU traversal would, using only the
//! cluster table and [`FieldLayout::decode`](super::config::FieldLayout). It
//! reports the stack sizes a traversal kernel must reserve and rejects any
//! decoded pointer that leaves its table.

use super::encode::CompressedBvh;
use super::format::ChildRef;
use crate::util::{Aabb, Error, Result};

/// One visited node record.
#[derive(Debug, Clone, Copy)]
pub struct Visit {
    pub cluster: usize,
    /// Index within the cluster's node range.
    pub local: usize,
    /// Generations below the root (root children are depth 1).
    pub depth: usize,
    /// Clusters entered on the path to this record, cluster 0 included.
    pub cluster_depth: usize,
    /// Dequantized box of the record.
    pub bounds: Aabb,
    pub child: ChildRef,
}

/// Traversal requirements and reachability counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Deepest record depth; a depth-first node stack needs this many slots.
    pub node_stack_depth: usize,
    /// Most clusters on one path; the cluster frame stack needs this many slots.
    pub cluster_stack_depth: usize,
    pub visited_nodes: usize,
    pub visited_leaves: usize,
    /// Sum of leaf triangle counts over visited leaves.
    pub visited_triangles: usize,
    /// Records visited per cluster.
    pub cluster_nodes: Vec<usize>,
}

impl ReplayStats {
    /// Records no traversal can reach.
    pub fn unreached(&self, data: &CompressedBvh) -> usize {
        data.nodes.len() - self.visited_nodes
    }
}

/// Replay the whole structure, discarding per-record visits.
pub fn replay(data: &CompressedBvh) -> Result<ReplayStats> {
    replay_with(data, |_| {})
}

/// Replay the whole structure, calling `visit` once per reachable record.
///
/// Fails with [`Error::InvalidFormat`] on a pointer outside its table or a
/// record reached twice.
pub fn replay_with<F>(data: &CompressedBvh, mut visit: F) -> Result<ReplayStats>
where
    F: FnMut(&Visit),
{
    let mut stats = ReplayStats {
        cluster_nodes: vec![0; data.cluster_count()],
        ..Default::default()
    };
    if data.clusters.is_empty() {
        return Err(Error::format("no clusters"));
    }

    let mut seen = vec![false; data.nodes.len()];
    let mut stack: Vec<(usize, usize, usize, usize)> = Vec::new();
    push_pair(data, &mut stack, 0, 0, 1, 1)?;

    while let Some((cluster, local, depth, cluster_depth)) = stack.pop() {
        let global = data.cluster_nodes(cluster).start + local;
        if std::mem::replace(&mut seen[global], true) {
            return Err(Error::format(format!("node record {} reached twice", global)));
        }

        let record = &data.nodes[global];
        let child = data.decode(record);
        visit(&Visit {
            cluster,
            local,
            depth,
            cluster_depth,
            bounds: data.dequantize(cluster, record),
            child,
        });

        stats.visited_nodes += 1;
        stats.cluster_nodes[cluster] += 1;
        stats.node_stack_depth = stats.node_stack_depth.max(depth);
        stats.cluster_stack_depth = stats.cluster_stack_depth.max(cluster_depth);

        match child {
            ChildRef::Internal { first_child } => {
                let first = first_child as usize;
                push_pair(data, &mut stack, cluster, first, depth + 1, cluster_depth)?;
            }
            ChildRef::Leaf { count, offset } => {
                let range = data.cluster_triangles(cluster);
                let end = offset as usize + count as usize;
                if end > range.len() {
                    return Err(Error::format(format!(
                        "leaf in cluster {} references triangles {}..{} of {}",
                        cluster,
                        offset,
                        end,
                        range.len()
                    )));
                }
                stats.visited_leaves += 1;
                stats.visited_triangles += count as usize;
            }
            ChildRef::Switch { cluster: target } => {
                let target = target as usize;
                if target >= data.cluster_count() {
                    return Err(Error::format(format!(
                        "switch to cluster {} of {}",
                        target,
                        data.cluster_count()
                    )));
                }
                push_pair(data, &mut stack, target, 0, depth + 1, cluster_depth + 1)?;
            }
        }
    }

    tracing::debug!(
        visited = stats.visited_nodes,
        node_stack = stats.node_stack_depth,
        cluster_stack = stats.cluster_stack_depth,
        "replay finished"
    );
    Ok(stats)
}

fn push_pair(
    data: &CompressedBvh,
    stack: &mut Vec<(usize, usize, usize, usize)>,
    cluster: usize,
    first: usize,
    depth: usize,
    cluster_depth: usize,
) -> Result<()> {
    let len = data.cluster_nodes(cluster).len();
    if first + 1 >= len {
        return Err(Error::format(format!(
            "child pair {} in cluster {} past its {} records",
            first, cluster, len
        )));
    }
    stack.push((cluster, first + 1, depth, cluster_depth));
    stack.push((cluster, first, depth, cluster_depth));
    Ok(())
}
