//! GPU-facing records of the compressed structure.
//!
//! All three are plain `#[repr(C)]` structs with no padding, so the tables can
//! be uploaded as-is through `bytemuck::cast_slice`.

use bytemuck::{Pod, Zeroable};

use super::config::QUANT_MAX;
use super::frame::{QuantBounds, QuantFrame};
use crate::bvh::Triangle;
use crate::util::Aabb;

/// Cluster table record (36 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuCluster {
    /// Anchor box as `[xmin, xmax, ymin, ymax, zmin, zmax]`.
    pub ref_bounds: [f32; 6],
    /// `inv_scale_weight / scaling_factor`.
    pub inv_scale: f32,
    /// First record of this cluster in the node table.
    pub node_offset: u32,
    /// First record of this cluster in the triangle table.
    pub trig_offset: u32,
}

impl GpuCluster {
    pub fn new(frame: &QuantFrame, weight: f32, node_offset: u32, trig_offset: u32) -> Self {
        Self {
            ref_bounds: frame.reference.to_bounds(),
            inv_scale: frame.inv_scale(weight),
            node_offset,
            trig_offset,
        }
    }

    pub fn reference(&self) -> Aabb {
        Aabb::from_bounds(self.ref_bounds)
    }

    /// Quantization frame of this cluster.
    ///
    /// The step is recomputed from the stored reference box, so it matches
    /// the encoder bit for bit. `inv_scale` is only for the GPU.
    pub fn frame(&self) -> QuantFrame {
        let reference = self.reference();
        QuantFrame::from_parts(reference, reference.max_extent() / QUANT_MAX as f32)
    }
}

/// Node table record (8 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct GpuNode {
    /// `[qxmin, qxmax, qymin, qymax, qzmin, qzmax]`.
    pub bounds: QuantBounds,
    /// Tagged child field.
    pub data: u16,
}

/// Triangle table record (36 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuTriangle {
    pub p0: [f32; 3],
    pub p1: [f32; 3],
    pub p2: [f32; 3],
}

impl From<&Triangle> for GpuTriangle {
    fn from(t: &Triangle) -> Self {
        Self {
            p0: t.p0.to_array(),
            p1: t.p1.to_array(),
            p2: t.p2.to_array(),
        }
    }
}

impl From<&GpuTriangle> for Triangle {
    fn from(t: &GpuTriangle) -> Self {
        Triangle::new(t.p0.into(), t.p1.into(), t.p2.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::Vec3;

    #[test]
    fn test_record_sizes() {
        assert_eq!(std::mem::size_of::<GpuCluster>(), 36);
        assert_eq!(std::mem::size_of::<GpuNode>(), 8);
        assert_eq!(std::mem::size_of::<GpuTriangle>(), 36);
    }

    #[test]
    fn test_node_byte_layout() {
        let node = GpuNode {
            bounds: [1, 2, 3, 4, 5, 6],
            data: 0x8123,
        };
        let bytes: &[u8] = bytemuck::bytes_of(&node);
        assert_eq!(&bytes[..6], &[1, 2, 3, 4, 5, 6]);
        assert_eq!(u16::from_ne_bytes([bytes[6], bytes[7]]), 0x8123);
    }

    #[test]
    fn test_cluster_frame() {
        let frame = QuantFrame::new(0, Aabb::new(Vec3::ZERO, Vec3::new(2.0, 1.0, 1.0))).unwrap();
        let cluster = GpuCluster::new(&frame, 128.0, 10, 20);
        assert_eq!(cluster.ref_bounds, [0.0, 2.0, 0.0, 1.0, 0.0, 1.0]);
        assert_eq!(cluster.reference(), frame.reference);
        assert_eq!(cluster.frame(), frame);
        assert!((cluster.inv_scale - 128.0 * 255.0 / 2.0).abs() < 0.01);
    }
}
