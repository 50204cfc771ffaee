//! The sampler graph.
//!
//! An arena of tagged sampler nodes addressed by [`arena::SamplerId`], with
//! push-based change propagation replacing the reference design's
//! signal/slot objects.

pub mod arena;
pub mod rect;
pub mod signal;
pub mod transform;

pub use arena::{ArgumentValue, BindError, SamplerArena, SamplerId, SamplerNode};
pub use rect::Rect;
pub use signal::Signal;
pub use transform::Affine;
