//! Error types shared across the viewer crates.

use crate::mesh::MeshId;
use crate::policy::MergePolicy;

/// Viewer-related errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ViewerError {
    #[error("Unknown merge policy: {0}")]
    UnknownMergePolicy(String),
    #[error("Merge policy {0:?} is not implemented")]
    UnsupportedMergePolicy(MergePolicy),
    #[error("Unknown mesh: {0}")]
    UnknownMesh(MeshId),
    #[error("Mesh already loaded: {0}")]
    DuplicateMesh(MeshId),
}

pub type Result<T, E = ViewerError> = std::result::Result<T, E>;
