//! Batching and coloring tunables.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ViewerError;

/// How loaded meshes are merged into GPU batches.
///
/// "No merging" is expressed as `Option::<MergePolicy>::None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MergePolicy {
    /// One batch for the whole scene.
    #[serde(rename = "scene")]
    Scene,
    /// One batch per model.
    #[serde(rename = "model")]
    Model,
    /// One or more batches per model, each holding a bounded number of meshes.
    #[serde(rename = "model+")]
    ModelPlus,
    /// Oriented-bounding-box fast render mode. Not implemented.
    #[serde(rename = "obb")]
    OrientedBoundingBox,
}

impl MergePolicy {
    pub fn name(&self) -> &'static str {
        match self {
            MergePolicy::Scene => "scene",
            MergePolicy::Model => "model",
            MergePolicy::ModelPlus => "model+",
            MergePolicy::OrientedBoundingBox => "obb",
        }
    }

    /// Parses an optional policy, where `"none"` or an empty string disables merging.
    pub fn parse_optional(s: &str) -> Result<Option<Self>, ViewerError> {
        match s.trim() {
            "" | "none" | "null" => Ok(None),
            other => other.parse().map(Some),
        }
    }
}

impl fmt::Display for MergePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MergePolicy {
    type Err = ViewerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "scene" => Ok(MergePolicy::Scene),
            "model" => Ok(MergePolicy::Model),
            "model+" => Ok(MergePolicy::ModelPlus),
            "obb" => Ok(MergePolicy::OrientedBoundingBox),
            other => Err(ViewerError::UnknownMergePolicy(other.to_string())),
        }
    }
}

/// Batch construction settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Active merge policy (None renders every mesh individually)
    pub merge_policy: Option<MergePolicy>,
    /// Meshes processed between cooperative yields while building a batch
    pub build_chunk_size: usize,
    /// Maximum meshes per batch for the "model+" policy
    pub model_plus_max_meshes: usize,
}

impl BatchConfig {
    pub const DEFAULT_BUILD_CHUNK_SIZE: usize = 100;
    pub const DEFAULT_MODEL_PLUS_MAX_MESHES: usize = 1000;
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            merge_policy: Some(MergePolicy::Model),
            build_chunk_size: Self::DEFAULT_BUILD_CHUNK_SIZE,
            model_plus_max_meshes: Self::DEFAULT_MODEL_PLUS_MAX_MESHES,
        }
    }
}

/// Colors applied by the visual-state priority chain
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorSettings {
    /// Color of meshes hidden behind an isolation
    pub isolation_color: [f32; 3],
    /// Opacity of meshes hidden behind an isolation
    pub isolation_opacity: f32,
    /// Color of selected meshes
    pub selection_color: [f32; 3],
    /// Color of the hovered mesh
    pub highlight_color: [f32; 3],
}

impl Default for ColorSettings {
    fn default() -> Self {
        Self {
            isolation_color: [0.8, 0.8, 0.8],
            isolation_opacity: 0.15,
            selection_color: [0.13, 0.59, 0.95],
            highlight_color: [1.0, 0.76, 0.03],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_policies() {
        assert_eq!("scene".parse::<MergePolicy>(), Ok(MergePolicy::Scene));
        assert_eq!("model+".parse::<MergePolicy>(), Ok(MergePolicy::ModelPlus));
        assert_eq!(MergePolicy::parse_optional("none"), Ok(None));
        assert_eq!(
            "octree".parse::<MergePolicy>(),
            Err(ViewerError::UnknownMergePolicy("octree".to_string()))
        );
    }

    #[test]
    fn test_policy_name_roundtrip() {
        for policy in [
            MergePolicy::Scene,
            MergePolicy::Model,
            MergePolicy::ModelPlus,
            MergePolicy::OrientedBoundingBox,
        ] {
            assert_eq!(policy.name().parse::<MergePolicy>(), Ok(policy));
        }
    }
}
