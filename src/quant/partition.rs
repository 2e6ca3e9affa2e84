//! Breadth-first cluster partitioner.
//!
//! Applies a committed [`PolicyTable`] to the tree. Cluster 0 is anchored on
//! the root and seeded with the root's two children. Every internal node
//! appends its child pair either to its own cluster (STAY) or to a freshly
//! allocated cluster anchored on itself (SWITCH).

use std::collections::VecDeque;

use super::policy::{Policy, PolicyTable};
use crate::bvh::Bvh;

/// One cluster's membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterNodes {
    /// Node whose box anchors the cluster's frame.
    pub anchor: usize,
    /// Member node ids in visitation order. Child pairs stay adjacent.
    pub nodes: Vec<usize>,
}

/// Output of the partition pass.
#[derive(Debug, Clone)]
pub struct Partition {
    /// Clusters in creation order; cluster 0 is the top cluster.
    pub clusters: Vec<ClusterNodes>,
    /// Position of each node inside its cluster's node list.
    pub local_index: Vec<usize>,
    /// Owning cluster of each node; `None` only for the root.
    pub cluster_of: Vec<Option<usize>>,
}

impl Partition {
    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }

    /// Node count of the largest cluster.
    pub fn largest_cluster(&self) -> usize {
        self.clusters.iter().map(|c| c.nodes.len()).max().unwrap_or(0)
    }
}

/// Assign every node to a cluster.
#[tracing::instrument(skip_all, fields(nodes = bvh.node_count()))]
pub fn partition(bvh: &Bvh, policy: &PolicyTable) -> Partition {
    let n = bvh.node_count();
    let mut clusters: Vec<ClusterNodes> = Vec::new();
    let mut local_index = vec![0usize; n];
    let mut cluster_of: Vec<Option<usize>> = vec![None; n];

    let mut queue: VecDeque<(usize, Option<usize>)> = VecDeque::new();
    queue.push_back((0, None));

    while let Some((idx, cluster)) = queue.pop_front() {
        let node = &bvh.nodes[idx];
        if node.is_leaf() {
            continue;
        }

        let child_cluster = match (policy.get(idx), cluster) {
            (Policy::Stay, Some(current)) => current,
            // The root has no cluster of its own and always starts one
            (Policy::Switch, _) | (Policy::Stay, None) => {
                clusters.push(ClusterNodes {
                    anchor: idx,
                    nodes: Vec::new(),
                });
                clusters.len() - 1
            }
        };

        let (left, right) = node.children();
        let members = &mut clusters[child_cluster].nodes;
        for child in [left, right] {
            local_index[child] = members.len();
            members.push(child);
            cluster_of[child] = Some(child_cluster);
            queue.push_back((child, Some(child_cluster)));
        }
    }

    tracing::debug!(clusters = clusters.len(), "partition finished");

    Partition {
        clusters,
        local_index,
        cluster_of,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bvh::BvhNode;
    use crate::quant::config::CostParams;
    use crate::quant::frame::anchor_frames;
    use crate::quant::policy::solve_policy;
    use crate::util::{Aabb, Vec3};

    /// Complete tree of the given depth over unit cubes laid along x.
    fn complete_tree(depth: u32) -> Bvh {
        let leaves = 1usize << depth;
        let total = 2 * leaves - 1;
        let first_leaf = leaves - 1;
        let mut nodes = vec![BvhNode::internal(Aabb::EMPTY, 0); total];
        for i in (0..total).rev() {
            if i >= first_leaf {
                let x = (i - first_leaf) as f32;
                let b = Aabb::new(Vec3::new(x, 0.0, 0.0), Vec3::new(x + 1.0, 1.0, 1.0));
                nodes[i] = BvhNode::leaf(b, (i - first_leaf) as u32, 1);
            } else {
                let mut b = nodes[2 * i + 1].bounds;
                b.expand_by_box(&nodes[2 * i + 2].bounds);
                nodes[i] = BvhNode::internal(b, (2 * i + 1) as u32);
            }
        }
        Bvh::new(nodes, (0..leaves).collect())
    }

    #[test]
    fn test_single_cluster_when_switching_is_expensive() {
        let bvh = complete_tree(3);
        let frames = anchor_frames(&bvh).unwrap();
        let policy = solve_policy(&bvh, &frames, &CostParams::new(1.0, 1e9, 1.0)).unwrap();
        let part = partition(&bvh, &policy);

        assert_eq!(part.cluster_count(), 1);
        assert_eq!(part.clusters[0].anchor, 0);
        // Every node except the root, in breadth-first order
        assert_eq!(part.clusters[0].nodes, (1..15).collect::<Vec<_>>());
        assert_eq!(part.cluster_of[0], None);
        for i in 1..15 {
            assert_eq!(part.cluster_of[i], Some(0));
            assert_eq!(part.local_index[i], i - 1);
        }
    }

    #[test]
    fn test_switch_opens_cluster_anchored_on_node() {
        let bvh = complete_tree(2);
        let frames = anchor_frames(&bvh).unwrap();
        let mut policy = solve_policy(&bvh, &frames, &CostParams::new(1.0, 1e9, 1.0)).unwrap();
        // Force node 2 to switch
        policy = forced(&bvh, policy, 2, Policy::Switch);
        assert_eq!(policy.stay_count(), 1);
        assert_eq!(policy.switch_count(), 1);
        let part = partition(&bvh, &policy);

        assert_eq!(part.cluster_count(), 2);
        assert_eq!(part.clusters[0].nodes, vec![1, 2, 3, 4]);
        assert_eq!(part.clusters[1].anchor, 2);
        assert_eq!(part.clusters[1].nodes, vec![5, 6]);
        assert_eq!(part.local_index[5], 0);
        assert_eq!(part.local_index[6], 1);
        assert_eq!(part.largest_cluster(), 4);
    }

    #[test]
    fn test_children_share_cluster() {
        let bvh = complete_tree(4);
        let frames = anchor_frames(&bvh).unwrap();
        let policy = solve_policy(&bvh, &frames, &CostParams::new(1.0, 0.0, 1.0)).unwrap();
        let part = partition(&bvh, &policy);

        for (i, node) in bvh.nodes.iter().enumerate().filter(|(_, n)| !n.is_leaf()) {
            let (l, r) = node.children();
            assert_eq!(part.cluster_of[l], part.cluster_of[r]);
            assert_eq!(part.local_index[r], part.local_index[l] + 1);
            let switched = i == 0 || policy.get(i) == Policy::Switch;
            assert_eq!(part.cluster_of[i] != part.cluster_of[l], switched);
        }
    }

    fn forced(bvh: &Bvh, policy: PolicyTable, node: usize, value: Policy) -> PolicyTable {
        let mut decisions = policy.as_slice().to_vec();
        decisions[node] = value;
        PolicyTable::from_decisions(bvh, decisions)
    }
}
