//! Cost model and policy solver.
//!
//! For every node the solver keeps a small table indexed by *offset*: the
//! number of generations between the node and the ancestor whose box anchors
//! its frame, minus one. Offset 0 anchors on the parent (the parent started a
//! fresh frame); the last offset anchors on the root. Each entry holds the
//! cheapest subtree cost under that assumption and the choice that achieves it.
//!
//! Pass 1 fills the tables bottom-up. Pass 2 walks top-down from the root and
//! replays the recorded choices, never recomputing a cost.

use super::config::CostParams;
use super::frame::QuantFrame;
use crate::bvh::Bvh;
use crate::util::{Error, Result};

/// Decision recorded for an internal node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Policy {
    /// Children are encoded in this node's cluster and frame.
    #[default]
    Stay,
    /// Children start a new cluster anchored on this node.
    Switch,
}

#[derive(Debug, Clone, Copy)]
struct CostEntry {
    cost: f32,
    choice: Policy,
}

/// Offset-indexed cost tables for every non-root node, stored in one arena.
#[derive(Debug, Clone)]
pub struct CostTable {
    /// First arena slot of each node's table.
    start: Vec<usize>,
    /// Table length (the node's depth, root = 0).
    depth: Vec<usize>,
    entries: Vec<CostEntry>,
}

impl CostTable {
    /// Generations between `node` and the root.
    #[inline]
    pub fn depth(&self, node: usize) -> usize {
        self.depth[node]
    }

    /// Cheapest subtree cost of `node` when its frame is anchored `offset + 1`
    /// generations up.
    #[inline]
    pub fn cost(&self, node: usize, offset: usize) -> f32 {
        self.entry(node, offset).cost
    }

    /// Choice that achieves [`CostTable::cost`] for the same arguments.
    #[inline]
    pub fn choice(&self, node: usize, offset: usize) -> Policy {
        self.entry(node, offset).choice
    }

    /// Total expected cost of the best encoding of the whole tree.
    pub fn root_cost(&self, bvh: &Bvh) -> f32 {
        let (left, right) = bvh.nodes[0].children();
        self.cost(left, 0) + self.cost(right, 0)
    }

    /// Number of arena entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    fn entry(&self, node: usize, offset: usize) -> &CostEntry {
        debug_assert!(offset < self.depth[node]);
        &self.entries[self.start[node] + offset]
    }
}

/// Committed per-node policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyTable {
    policy: Vec<Policy>,
    stays: usize,
    switches: usize,
}

impl PolicyTable {
    #[inline]
    pub fn get(&self, node: usize) -> Policy {
        self.policy[node]
    }

    pub fn as_slice(&self) -> &[Policy] {
        &self.policy
    }

    /// STAY decisions among internal non-root nodes.
    pub fn stay_count(&self) -> usize {
        self.stays
    }

    /// SWITCH decisions among internal non-root nodes.
    pub fn switch_count(&self) -> usize {
        self.switches
    }

    /// Table with the given per-node decisions. Counts cover internal non-root
    /// nodes of `bvh` only; entries for leaves are ignored.
    #[cfg(test)]
    pub(crate) fn from_decisions(bvh: &Bvh, policy: Vec<Policy>) -> Self {
        let (mut stays, mut switches) = (0, 0);
        for (node, &p) in bvh.nodes.iter().zip(&policy).skip(1) {
            match (node.is_leaf(), p) {
                (true, _) => {}
                (false, Policy::Stay) => stays += 1,
                (false, Policy::Switch) => switches += 1,
            }
        }
        Self {
            policy,
            stays,
            switches,
        }
    }
}

/// Pre-order walk from the root, recording parent and depth of every node.
fn preorder(bvh: &Bvh) -> (Vec<usize>, Vec<usize>, Vec<usize>) {
    let n = bvh.node_count();
    let mut order = Vec::with_capacity(n);
    let mut parent = vec![0usize; n];
    let mut depth = vec![0usize; n];

    let mut stack = vec![0usize];
    while let Some(idx) = stack.pop() {
        order.push(idx);
        let node = &bvh.nodes[idx];
        if !node.is_leaf() {
            let (left, right) = node.children();
            for child in [right, left] {
                parent[child] = idx;
                depth[child] = depth[idx] + 1;
                stack.push(child);
            }
        }
    }

    (order, parent, depth)
}

/// Pass 1: fill the offset-indexed cost tables bottom-up.
///
/// `frames[i]` must hold the frame anchored on node `i` for every internal node.
pub fn solve_costs(
    bvh: &Bvh,
    frames: &[Option<QuantFrame>],
    costs: &CostParams,
) -> Result<CostTable> {
    let (order, parent, depth) = preorder(bvh);

    let mut start = vec![0usize; bvh.node_count()];
    let mut total = 0usize;
    for &idx in &order {
        start[idx] = total;
        total += depth[idx];
    }

    let mut table = CostTable {
        start,
        depth,
        entries: vec![
            CostEntry {
                cost: 0.0,
                choice: Policy::Stay,
            };
            total
        ],
    };

    // Children precede parents in reverse pre-order
    for &idx in order.iter().rev() {
        let node = &bvh.nodes[idx];
        let mut anchor = parent[idx];

        for offset in 0..table.depth[idx] {
            let frame = frames[anchor]
                .as_ref()
                .ok_or_else(|| Error::tree(format!("anchor {} has no frame", anchor)))?;
            let half_area = frame
                .quantized_box(&node.bounds)
                .inspect_err(|e| tracing::error!(node = idx, anchor, "{}", e))?
                .half_area();

            let entry = if node.is_leaf() {
                CostEntry {
                    cost: costs.t_ist * node.prim_count as f32 * half_area,
                    choice: Policy::Stay,
                }
            } else {
                let (left, right) = node.children();
                let traverse = 2.0 * costs.t_trv_int * half_area;
                let stay = traverse + table.cost(left, offset + 1) + table.cost(right, offset + 1);
                let switch = traverse
                    + costs.t_switch * half_area
                    + table.cost(left, 0)
                    + table.cost(right, 0);
                debug_assert!(stay.is_finite() && switch.is_finite());

                if switch < stay {
                    CostEntry {
                        cost: switch,
                        choice: Policy::Switch,
                    }
                } else {
                    CostEntry {
                        cost: stay,
                        choice: Policy::Stay,
                    }
                }
            };

            let slot = table.start[idx] + offset;
            table.entries[slot] = entry;
            anchor = parent[anchor];
        }
    }

    tracing::debug!(entries = table.len(), "cost tables filled");
    Ok(table)
}

/// Pass 2: replay the recorded choices top-down.
pub fn commit(bvh: &Bvh, table: &CostTable) -> PolicyTable {
    let mut policy = vec![Policy::Stay; bvh.node_count()];
    let mut stays = 0;
    let mut switches = 0;

    // The virtual super-root always starts cluster 0
    policy[0] = Policy::Switch;

    let (left, right) = bvh.nodes[0].children();
    let mut stack = vec![(right, 0usize), (left, 0usize)];
    while let Some((idx, offset)) = stack.pop() {
        let node = &bvh.nodes[idx];
        if node.is_leaf() {
            continue;
        }

        let (left, right) = node.children();
        let choice = table.choice(idx, offset);
        policy[idx] = choice;
        let child_offset = match choice {
            Policy::Stay => {
                stays += 1;
                offset + 1
            }
            Policy::Switch => {
                switches += 1;
                0
            }
        };
        stack.push((right, child_offset));
        stack.push((left, child_offset));
    }

    PolicyTable {
        policy,
        stays,
        switches,
    }
}

/// Run both passes.
#[tracing::instrument(skip_all, fields(nodes = bvh.node_count()))]
pub fn solve_policy(
    bvh: &Bvh,
    frames: &[Option<QuantFrame>],
    costs: &CostParams,
) -> Result<PolicyTable> {
    let table = solve_costs(bvh, frames, costs)?;
    let policy = commit(bvh, &table);
    tracing::debug!(
        stay = policy.stay_count(),
        switch = policy.switch_count(),
        cost = table.root_cost(bvh),
        "policy committed"
    );
    Ok(policy)
}
