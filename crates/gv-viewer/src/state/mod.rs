//! Viewer state

mod measure;
mod viewer;

pub use measure::{MeasureTool, Measurement};
pub use viewer::{BuiltBatches, PickHit, RebuildJob, ViewerEvent, ViewerState};

use parking_lot::Mutex;
use std::sync::Arc;

pub type SharedViewerState = Arc<Mutex<ViewerState>>;
