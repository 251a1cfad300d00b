//! GV Viewer
//!
//! Orchestrates the viewer core: model loading, visual-state tags, batch
//! rebuilds, per-frame color flushes, picking and measurement.

pub mod config;
pub mod state;

pub use config::{AppConfig, ConfigManager, SharedConfig};
pub use state::{MeasureTool, Measurement, PickHit, SharedViewerState, ViewerEvent, ViewerState};
