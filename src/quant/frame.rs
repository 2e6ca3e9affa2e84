//! Per-cluster quantization frame.
//!
//! A frame is anchored on one node's bounding box. One scalar step, the
//! anchor's largest extent divided by 255, is shared by all three axes.
//! Minima round down and maxima round up so a dequantized box always
//! contains the true box. The one exception is a coordinate landing on
//! 256, which is clamped to 255 and undershoots by less than one step.

use super::config::QUANT_MAX;
use crate::bvh::Bvh;
use crate::util::{ceil_to_i32, floor_to_i32, Aabb, Error, Result, Vec3};

/// Quantized bounds in `[qxmin, qxmax, qymin, qymax, qzmin, qzmax]` order.
pub type QuantBounds = [u8; 6];

/// Reference frame for one cluster.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuantFrame {
    /// Bounding box of the anchor node.
    pub reference: Aabb,
    /// World units per quantization step.
    pub scale: f32,
}

impl QuantFrame {
    /// Frame anchored on node `node` with bounds `reference`.
    ///
    /// Fails on a zero-extent anchor instead of producing a zero step.
    pub fn new(node: usize, reference: Aabb) -> Result<Self> {
        let scale = reference.max_extent() / QUANT_MAX as f32;
        if !(scale > 0.0 && scale.is_finite()) {
            return Err(Error::DegenerateFrame { node });
        }
        Ok(Self { reference, scale })
    }

    /// Rebuild a frame from a stored reference box and step.
    pub fn from_parts(reference: Aabb, scale: f32) -> Self {
        Self { reference, scale }
    }

    /// Inverse step premultiplied by `weight`, as stored for the GPU.
    #[inline]
    pub fn inv_scale(&self, weight: f32) -> f32 {
        weight / self.scale
    }

    /// Quantize `bounds` conservatively against this frame.
    ///
    /// Values outside `[0, 256]` mean the box is not inside the anchor box.
    pub fn quantize(&self, bounds: &Aabb) -> Result<QuantBounds> {
        let mut out = [0u8; 6];
        for axis in 0..3 {
            let origin = self.reference.min[axis];
            let lo = floor_to_i32((bounds.min[axis] - origin) / self.scale);
            let hi = ceil_to_i32((bounds.max[axis] - origin) / self.scale);
            out[axis * 2] = clamp_step(axis, lo)?;
            out[axis * 2 + 1] = clamp_step(axis, hi)?;
        }
        Ok(out)
    }

    /// World-space box described by quantized bounds.
    pub fn dequantize(&self, q: &QuantBounds) -> Aabb {
        let origin = self.reference.min;
        Aabb::new(
            origin + Vec3::new(q[0] as f32, q[2] as f32, q[4] as f32) * self.scale,
            origin + Vec3::new(q[1] as f32, q[3] as f32, q[5] as f32) * self.scale,
        )
    }

    /// The box traversal will actually test for `bounds` in this frame.
    pub fn quantized_box(&self, bounds: &Aabb) -> Result<Aabb> {
        Ok(self.dequantize(&self.quantize(bounds)?))
    }
}

/// Frames anchored on every internal node, `None` for leaves.
///
/// Every internal node may anchor a frame for some descendant during cost
/// evaluation, so a single degenerate internal box fails the build here.
pub fn anchor_frames(bvh: &Bvh) -> Result<Vec<Option<QuantFrame>>> {
    bvh.nodes
        .iter()
        .enumerate()
        .map(|(i, node)| {
            if node.is_leaf() {
                Ok(None)
            } else {
                QuantFrame::new(i, node.bounds).map(Some)
            }
        })
        .collect()
}

#[inline]
fn clamp_step(axis: usize, value: i32) -> Result<u8> {
    match value {
        0..=QUANT_MAX => Ok(value as u8),
        // One past the top: tighten to the last representable step
        v if v == QUANT_MAX + 1 => Ok(QUANT_MAX as u8),
        _ => Err(Error::OutOfFrame { axis, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> QuantFrame {
        QuantFrame::new(0, Aabb::new(Vec3::ZERO, Vec3::new(255.0, 10.0, 1.0))).unwrap()
    }

    #[test]
    fn test_scale_uses_longest_axis() {
        let f = frame();
        assert_eq!(f.scale, 1.0);
        assert_eq!(f.inv_scale(128.0), 128.0);
    }

    #[test]
    fn test_degenerate_anchor() {
        let flat = Aabb::from_point(Vec3::new(1.0, 2.0, 3.0));
        assert!(matches!(
            QuantFrame::new(4, flat),
            Err(Error::DegenerateFrame { node: 4 })
        ));
        // Flat on two axes is still a usable frame
        let line = Aabb::new(Vec3::ZERO, Vec3::new(0.0, 0.0, 2.0));
        assert!(QuantFrame::new(0, line).is_ok());
    }

    #[test]
    fn test_rounding_is_conservative() {
        let f = frame();
        let b = Aabb::new(Vec3::new(1.5, 2.25, 0.1), Vec3::new(3.5, 2.75, 0.9));
        let q = f.quantize(&b).unwrap();
        assert_eq!(q, [1, 4, 2, 3, 0, 1]);
        assert!(f.dequantize(&q).contains(&b));
    }

    #[test]
    fn test_full_anchor_maps_to_full_range() {
        let f = frame();
        let q = f.quantize(&f.reference).unwrap();
        assert_eq!(q[0], 0);
        assert_eq!(q[1], 255);
    }

    #[test]
    fn test_clamp_256() {
        let f = frame();
        let b = Aabb::new(Vec3::new(254.5, 0.0, 0.0), Vec3::new(255.5, 1.0, 1.0));
        let q = f.quantize(&b).unwrap();
        assert_eq!(q[1], 255);
        let d = f.dequantize(&q);
        assert!(b.max.x - d.max.x < f.scale);
    }

    #[test]
    fn test_anchor_frames() {
        use crate::bvh::BvhNode;

        let root = Aabb::new(Vec3::ZERO, Vec3::new(2.0, 1.0, 1.0));
        let left = Aabb::new(Vec3::ZERO, Vec3::ONE);
        let right = Aabb::new(Vec3::new(1.0, 0.0, 0.0), Vec3::new(2.0, 1.0, 1.0));
        let mut bvh = Bvh::new(
            vec![
                BvhNode::internal(root, 1),
                BvhNode::leaf(left, 0, 1),
                BvhNode::leaf(right, 1, 1),
            ],
            vec![0, 1],
        );
        let frames = anchor_frames(&bvh).unwrap();
        assert_eq!(frames[0].unwrap().scale, 2.0 / 255.0);
        assert!(frames[1].is_none() && frames[2].is_none());

        bvh.nodes[0].bounds = Aabb::from_point(Vec3::ONE);
        assert!(matches!(
            anchor_frames(&bvh),
            Err(Error::DegenerateFrame { node: 0 })
        ));
    }

    #[test]
    fn test_out_of_frame() {
        let f = frame();
        let b = Aabb::new(Vec3::new(-2.0, 0.0, 0.0), Vec3::new(1.0, 1.0, 1.0));
        assert!(matches!(
            f.quantize(&b),
            Err(Error::OutOfFrame { axis: 0, value: -2 })
        ));
        let b = Aabb::new(Vec3::ZERO, Vec3::new(300.0, 1.0, 1.0));
        assert!(matches!(f.quantize(&b), Err(Error::OutOfFrame { axis: 0, .. })));
    }
}
