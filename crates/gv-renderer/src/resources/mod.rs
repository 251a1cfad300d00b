//! GPU resource management.
//!
//! Merged batch geometry lives on the CPU in [`RenderGeometry`](crate::batch::RenderGeometry);
//! this module mirrors it into wgpu buffers and uploads only what changed.

mod batch;

pub use batch::*;
