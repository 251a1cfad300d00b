//! GV Viewer Renderer
//!
//! Batching, per-mesh color state and color-key picking for the viewer.
//!
//! # Architecture
//!
//! - [`color_state::ColorState`] - Resolves each mesh's displayed color from its visual tags
//! - [`batch::RenderBatchRegistry`] - Merged batches and the per-frame color flush
//! - [`batch::BatchBuilder`] - Cooperative, chunked batch construction
//! - [`picking::PickingIndex`] - Color-key proxies, pixel picking and vertex snapping
//! - [`resources::BatchBufferManager`] - GPU mirror of merged batches
//! - [`context::RenderContext`] - GPU context abstraction
//!
//! # Example
//!
//! ```ignore
//! use gv_renderer::{ColorState, RenderBatchRegistry, BatchBuilder, build_batch_mode};
//!
//! let mode = build_batch_mode(policy, max_meshes, &scene, &mut colors, &builder).await?;
//! registry.install(mode);
//!
//! // Once per frame
//! registry.prepare_frame(&scene, &mut colors);
//! buffers.sync(&ctx, &mut registry);
//! ```

pub mod batch;
pub mod camera;
pub mod color_state;
pub mod context;
pub mod error;
pub mod picking;
pub mod resources;

// Re-exports for convenience
pub use batch::*;
pub use camera::*;
pub use color_state::{ColorState, Resolved};
pub use context::RenderContext;
pub use error::PickError;
pub use picking::{
    GpuPickTarget, KeyAllocator, PickTarget, PickingIndex, PickingProxy, SoftwarePickTarget,
};
pub use resources::{BatchBufferManager, BatchBuffers, UploadStats};
