//! Utility types shared across the crate.
//!
//! - [`Aabb`] - Axis-aligned bounding box over glam vectors
//! - [`Error`] / [`Result`] - Error handling

mod error;
mod math;

pub use error::*;
pub use math::*;
