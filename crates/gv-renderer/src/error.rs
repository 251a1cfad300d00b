//! Renderer error types.

/// Picking-related errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PickError {
    #[error("All picking color keys are in use")]
    KeySpaceExhausted,
    #[error("GPU pick pass failed: {0}")]
    Gpu(String),
}
