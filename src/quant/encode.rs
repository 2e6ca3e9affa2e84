//! Cluster encoder and the compressed structure it produces.
//!
//! Runs the whole pipeline: validate, solve the policy, partition, then
//! quantize every cluster's nodes against its anchor frame and emit the
//! tagged child fields. Triangles are re-emitted per cluster in node-list
//! order so each cluster's run is contiguous.

use std::fmt;
use std::ops::Range;

use rayon::prelude::*;

use super::config::{CompressConfig, FieldLayout};
use super::format::ChildRef;
use super::frame::{anchor_frames, QuantFrame};
use super::gpu_data::{GpuCluster, GpuNode, GpuTriangle};
use super::partition::{partition, ClusterNodes, Partition};
use super::policy::solve_policy;
use crate::bvh::{Bvh, Triangle};
use crate::util::{Aabb, Error, Result};

/// Flat, cluster-grouped output tables.
#[derive(Debug, Clone, PartialEq)]
pub struct CompressedBvh {
    /// Field layout the node table was encoded with.
    pub layout: FieldLayout,
    pub clusters: Vec<GpuCluster>,
    pub nodes: Vec<GpuNode>,
    pub triangles: Vec<GpuTriangle>,
}

/// Summary of a compressed structure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompressStats {
    pub clusters: usize,
    pub nodes: usize,
    pub triangles: usize,
    /// INTERNAL records (children stay in the cluster).
    pub internal: usize,
    /// LEAF records.
    pub leaves: usize,
    /// SWITCH records (children open another cluster).
    pub switches: usize,
    pub largest_cluster: usize,
    /// Size of the three tables in bytes.
    pub bytes: usize,
}

impl fmt::Display for CompressStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "clusters:        {}", self.clusters)?;
        writeln!(f, "nodes:           {}", self.nodes)?;
        writeln!(f, "  internal:      {}", self.internal)?;
        writeln!(f, "  leaf:          {}", self.leaves)?;
        writeln!(f, "  switch:        {}", self.switches)?;
        writeln!(f, "triangles:       {}", self.triangles)?;
        writeln!(f, "largest cluster: {}", self.largest_cluster)?;
        write!(f, "table bytes:     {}", self.bytes)
    }
}

impl CompressedBvh {
    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }

    /// Node table range owned by `cluster`.
    pub fn cluster_nodes(&self, cluster: usize) -> Range<usize> {
        let start = self.clusters[cluster].node_offset as usize;
        let end = self
            .clusters
            .get(cluster + 1)
            .map_or(self.nodes.len(), |c| c.node_offset as usize);
        start..end
    }

    /// Triangle table range owned by `cluster`.
    pub fn cluster_triangles(&self, cluster: usize) -> Range<usize> {
        let start = self.clusters[cluster].trig_offset as usize;
        let end = self
            .clusters
            .get(cluster + 1)
            .map_or(self.triangles.len(), |c| c.trig_offset as usize);
        start..end
    }

    /// Decode a node record's tagged field.
    #[inline]
    pub fn decode(&self, node: &GpuNode) -> ChildRef {
        self.layout.decode(node.data)
    }

    /// World-space box traversal tests for `node`, which lives in `cluster`.
    pub fn dequantize(&self, cluster: usize, node: &GpuNode) -> Aabb {
        self.clusters[cluster].frame().dequantize(&node.bounds)
    }

    pub fn clusters_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.clusters)
    }

    pub fn nodes_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.nodes)
    }

    pub fn triangles_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.triangles)
    }

    /// Count records by role. Works equally on freshly built and loaded data.
    pub fn stats(&self) -> CompressStats {
        let mut stats = CompressStats {
            clusters: self.clusters.len(),
            nodes: self.nodes.len(),
            triangles: self.triangles.len(),
            bytes: self.clusters_bytes().len()
                + self.nodes_bytes().len()
                + self.triangles_bytes().len(),
            ..Default::default()
        };
        for node in &self.nodes {
            match self.decode(node) {
                ChildRef::Internal { .. } => stats.internal += 1,
                ChildRef::Leaf { .. } => stats.leaves += 1,
                ChildRef::Switch { .. } => stats.switches += 1,
            }
        }
        stats.largest_cluster = (0..self.clusters.len())
            .map(|c| self.cluster_nodes(c).len())
            .max()
            .unwrap_or(0);
        stats
    }
}

/// Compress `bvh` over `triangles`.
///
/// Either the whole structure is produced or the build fails. Capacity
/// errors ([`Error::is_capacity_overflow`]) are resolved by retuning the cost
/// coefficients and rebuilding.
#[tracing::instrument(
    skip_all,
    fields(nodes = bvh.node_count(), tri_count = triangles.len())
)]
pub fn compress(
    bvh: &Bvh,
    triangles: &[Triangle],
    config: &CompressConfig,
) -> Result<CompressedBvh> {
    config.validate()?;
    bvh.validate(triangles.len())?;
    let layout = config.layout;

    // Phase 1: policy and partition (sequential)
    let frames = anchor_frames(bvh)?;
    let policy = solve_policy(bvh, &frames, &config.costs)?;
    let part = partition(bvh, &policy);
    check_capacity(&part, &layout)?;

    // Phase 2: encode clusters independently (CPU-bound)
    let encoded: Vec<Result<EncodedCluster>> = part
        .clusters
        .par_iter()
        .enumerate()
        .map(|(id, cluster)| {
            let frame = frames[cluster.anchor].as_ref().ok_or_else(|| {
                Error::tree(format!("cluster {} anchor {} is a leaf", id, cluster.anchor))
            })?;
            encode_cluster(bvh, triangles, &part, &layout, id, cluster, frame)
        })
        .collect();

    // Phase 3: lay clusters out back to back; first failing cluster wins
    let mut out = CompressedBvh {
        layout,
        clusters: Vec::with_capacity(part.cluster_count()),
        nodes: Vec::with_capacity(bvh.node_count().saturating_sub(1)),
        triangles: Vec::with_capacity(triangles.len()),
    };
    for (cluster, result) in part.clusters.iter().zip(encoded) {
        let enc = result?;
        let frame = enc.frame;
        out.clusters.push(GpuCluster::new(
            &frame,
            layout.inv_scale_weight,
            offset_u32(out.nodes.len())?,
            offset_u32(out.triangles.len())?,
        ));
        debug_assert_eq!(enc.nodes.len(), cluster.nodes.len());
        out.nodes.extend(enc.nodes);
        out.triangles.extend(enc.triangles);
    }

    tracing::debug!(
        clusters = out.clusters.len(),
        nodes = out.nodes.len(),
        triangles = out.triangles.len(),
        "compression finished"
    );
    Ok(out)
}

struct EncodedCluster {
    frame: QuantFrame,
    nodes: Vec<GpuNode>,
    triangles: Vec<GpuTriangle>,
}

fn check_capacity(part: &Partition, layout: &FieldLayout) -> Result<()> {
    if part.cluster_count() > layout.max_clusters() {
        tracing::warn!(
            clusters = part.cluster_count(),
            max = layout.max_clusters(),
            "too many clusters, lower t_trv_int or raise t_switch"
        );
        return Err(Error::ClusterIdOverflow {
            id: part.cluster_count() - 1,
            max: layout.max_clusters() - 1,
        });
    }

    let capacity = layout.max_nodes_per_cluster();
    if let Some((cluster, c)) = part
        .clusters
        .iter()
        .enumerate()
        .find(|(_, c)| c.nodes.len() > capacity)
    {
        tracing::warn!(
            cluster,
            nodes = c.nodes.len(),
            capacity,
            "cluster too large, lower t_switch or raise t_trv_int"
        );
        return Err(Error::ClusterOverflow {
            cluster,
            nodes: c.nodes.len(),
            capacity,
        });
    }
    Ok(())
}

fn encode_cluster(
    bvh: &Bvh,
    triangles: &[Triangle],
    part: &Partition,
    layout: &FieldLayout,
    id: usize,
    cluster: &ClusterNodes,
    frame: &QuantFrame,
) -> Result<EncodedCluster> {
    let mut nodes = Vec::with_capacity(cluster.nodes.len());
    let mut trigs = Vec::new();

    for &idx in &cluster.nodes {
        let node = &bvh.nodes[idx];
        let bounds = frame
            .quantize(&node.bounds)
            .inspect_err(|e| tracing::error!(node = idx, cluster = id, "{}", e))?;

        let child = if node.is_leaf() {
            let child = leaf_ref(layout, node.prim_count as usize, trigs.len())?;
            trigs.extend(
                bvh.prim_indices[node.prim_range()]
                    .iter()
                    .map(|&p| GpuTriangle::from(&triangles[p])),
            );
            child
        } else {
            let (left, _) = node.children();
            match part.cluster_of[left] {
                Some(c) if c == id => local_ref(layout, part.local_index[left])?,
                Some(c) => switch_ref(layout, c)?,
                None => return Err(Error::tree(format!("node {} was never partitioned", left))),
            }
        };

        nodes.push(GpuNode {
            bounds,
            data: layout.encode(child)?,
        });
    }

    Ok(EncodedCluster {
        frame: *frame,
        nodes,
        triangles: trigs,
    })
}

// Range checks run on usize so nothing is truncated before `FieldLayout::encode`.

fn leaf_ref(layout: &FieldLayout, count: usize, offset: usize) -> Result<ChildRef> {
    let max = layout.max_prims_per_leaf();
    if count == 0 || count > max {
        return Err(Error::LeafCountOverflow { count, max });
    }
    let capacity = layout.max_trigs_per_cluster();
    if offset >= capacity {
        return Err(Error::LeafOffsetOverflow { offset, capacity });
    }
    Ok(ChildRef::Leaf {
        count: count as u16,
        offset: offset as u16,
    })
}

fn local_ref(layout: &FieldLayout, index: usize) -> Result<ChildRef> {
    let capacity = layout.max_nodes_per_cluster();
    if index >= capacity {
        return Err(Error::ChildIndexOverflow { index, capacity });
    }
    Ok(ChildRef::Internal {
        first_child: index as u16,
    })
}

fn switch_ref(layout: &FieldLayout, cluster: usize) -> Result<ChildRef> {
    if cluster >= layout.max_clusters() {
        return Err(Error::ClusterIdOverflow {
            id: cluster,
            max: layout.max_clusters() - 1,
        });
    }
    Ok(ChildRef::Switch {
        cluster: cluster as u16,
    })
}

fn offset_u32(offset: usize) -> Result<u32> {
    u32::try_from(offset).map_err(|_| Error::tree(format!("table offset {} exceeds u32", offset)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bvh::BvhNode;
    use crate::quant::config::CostParams;
    use crate::util::Vec3;

    fn tri(x: f32) -> Triangle {
        Triangle::new(
            Vec3::new(x, 0.0, 0.0),
            Vec3::new(x + 1.0, 0.0, 0.0),
            Vec3::new(x, 1.0, 1.0),
        )
    }

    fn three_node(tris: &[Triangle]) -> Bvh {
        let mut root = tris[0].aabb();
        root.expand_by_box(&tris[1].aabb());
        Bvh::new(
            vec![
                BvhNode::internal(root, 1),
                BvhNode::leaf(tris[0].aabb(), 0, 1),
                BvhNode::leaf(tris[1].aabb(), 1, 1),
            ],
            vec![0, 1],
        )
    }

    #[test]
    fn test_two_leaves_single_cluster() {
        let tris = [tri(0.0), tri(1.0)];
        let bvh = three_node(&tris);
        let out = compress(&bvh, &tris, &CompressConfig::default()).unwrap();

        assert_eq!(out.cluster_count(), 1);
        assert_eq!(out.nodes.len(), 2);
        assert_eq!(out.decode(&out.nodes[0]), ChildRef::Leaf { count: 1, offset: 0 });
        assert_eq!(out.decode(&out.nodes[1]), ChildRef::Leaf { count: 1, offset: 1 });
        assert_eq!(out.triangles[0], GpuTriangle::from(&tris[0]));
        assert_eq!(out.triangles[1], GpuTriangle::from(&tris[1]));
        assert_eq!(out.clusters[0].ref_bounds, bvh.nodes[0].bounds.to_bounds());
    }

    #[test]
    fn test_triangles_follow_leaf_order() {
        let tris = [tri(0.0), tri(1.0)];
        let mut bvh = three_node(&tris);
        // Leaves reference the triangles in reverse
        bvh.prim_indices = vec![1, 0];
        bvh.nodes[1].bounds = tris[1].aabb();
        bvh.nodes[2].bounds = tris[0].aabb();
        let out = compress(&bvh, &tris, &CompressConfig::default()).unwrap();
        assert_eq!(out.triangles[0], GpuTriangle::from(&tris[1]));
        assert_eq!(out.triangles[1], GpuTriangle::from(&tris[0]));
    }

    #[test]
    fn test_leaf_count_overflow() {
        let tris: Vec<Triangle> = (0..9).map(|i| tri(i as f32)).collect();
        let mut root = Aabb::EMPTY;
        tris.iter().for_each(|t| root.expand_by_box(&t.aabb()));
        let bvh = Bvh::new(
            vec![
                BvhNode::internal(root, 1),
                BvhNode::leaf(root, 0, 8),
                BvhNode::leaf(tris[8].aabb(), 8, 1),
            ],
            (0..9).collect(),
        );
        let err = compress(&bvh, &tris, &CompressConfig::default()).unwrap_err();
        assert!(matches!(err, Error::LeafCountOverflow { count: 8, max: 7 }));
        assert!(err.is_capacity_overflow());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let tris = [tri(0.0), tri(1.0)];
        let bvh = three_node(&tris);
        let config = CompressConfig::new(FieldLayout::default(), CostParams::new(-1.0, 1.0, 1.0));
        assert!(matches!(
            compress(&bvh, &tris, &config),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_stats_and_ranges() {
        let tris = [tri(0.0), tri(1.0)];
        let bvh = three_node(&tris);
        let out = compress(&bvh, &tris, &CompressConfig::default()).unwrap();
        let stats = out.stats();
        assert_eq!(stats.clusters, 1);
        assert_eq!(stats.leaves, 2);
        assert_eq!(stats.internal + stats.switches, 0);
        assert_eq!(stats.largest_cluster, 2);
        assert_eq!(stats.bytes, 36 + 2 * 8 + 2 * 36);
        assert_eq!(out.cluster_nodes(0), 0..2);
        assert_eq!(out.cluster_triangles(0), 0..2);
    }
}
