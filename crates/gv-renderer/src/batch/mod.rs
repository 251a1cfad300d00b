//! Mesh batching.
//!
//! Loaded meshes are grouped into [`MergeGroup`]s according to the active
//! [`MergePolicy`], each group is concatenated into one [`RenderGeometry`]
//! by the [`BatchBuilder`], and the [`RenderBatchRegistry`] keeps colors in
//! those buffers in sync with the per-mesh visual state.

mod builder;
mod geometry;
mod registry;

pub use builder::*;
pub use geometry::*;
pub use registry::*;

use gv_core::{MeshId, MergePolicy, ModelId, Result, SceneMeshes, ViewerError};

/// Ordered list of meshes merged into one GPU buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeGroup {
    /// Model the group was cut from, None for whole-scene groups.
    pub model: Option<ModelId>,
    pub meshes: Vec<MeshId>,
}

impl MergeGroup {
    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }
}

/// Groups the loaded meshes according to a merge policy.
///
/// `None` yields no groups; the caller then renders every mesh on its own.
/// Mesh order inside each group follows load order.
pub fn group_meshes(
    scene: &SceneMeshes,
    policy: Option<MergePolicy>,
    model_plus_max_meshes: usize,
) -> Result<Vec<MergeGroup>> {
    let Some(policy) = policy else {
        return Ok(Vec::new());
    };

    let groups = match policy {
        MergePolicy::Scene => {
            let meshes: Vec<MeshId> = scene.mesh_ids().cloned().collect();
            if meshes.is_empty() {
                Vec::new()
            } else {
                vec![MergeGroup {
                    model: None,
                    meshes,
                }]
            }
        }
        MergePolicy::Model => scene
            .models()
            .filter(|(_, meshes)| !meshes.is_empty())
            .map(|(model, meshes)| MergeGroup {
                model: Some(model.clone()),
                meshes: meshes.to_vec(),
            })
            .collect(),
        MergePolicy::ModelPlus => {
            let chunk = model_plus_max_meshes.max(1);
            scene
                .models()
                .flat_map(|(model, meshes)| {
                    meshes.chunks(chunk).map(move |part| MergeGroup {
                        model: Some(model.clone()),
                        meshes: part.to_vec(),
                    })
                })
                .collect()
        }
        MergePolicy::OrientedBoundingBox => {
            return Err(ViewerError::UnsupportedMergePolicy(policy));
        }
    };

    Ok(groups)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use gv_core::{MeshGeometry, SourceMesh};

    use super::*;

    fn scene(models: &[(&str, usize)]) -> SceneMeshes {
        let mut scene = SceneMeshes::new();
        for (name, count) in models {
            let model = ModelId::new(*name);
            let meshes = (0..*count)
                .map(|i| {
                    SourceMesh::new(&model, format!("m{i}"), Arc::new(MeshGeometry::quad(1.0)))
                })
                .collect();
            scene.add_model(&model, meshes).unwrap();
        }
        scene
    }

    #[test]
    fn test_scene_policy_single_group() {
        let scene = scene(&[("a", 2), ("b", 1)]);
        let groups = group_meshes(&scene, Some(MergePolicy::Scene), 1000).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 3);
    }

    #[test]
    fn test_model_policy_skips_empty_models() {
        let scene = scene(&[("a", 2), ("empty", 0), ("b", 1)]);
        let groups = group_meshes(&scene, Some(MergePolicy::Model), 1000).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].model, Some(ModelId::new("a")));
        assert_eq!(groups[1].meshes, vec![MeshId::from_raw("b|m0")]);
    }

    #[test]
    fn test_model_plus_policy_chunks_models() {
        let scene = scene(&[("a", 5), ("b", 2)]);
        let groups = group_meshes(&scene, Some(MergePolicy::ModelPlus), 2).unwrap();
        let sizes: Vec<usize> = groups.iter().map(|g| g.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1, 2]);
    }

    #[test]
    fn test_unmerged_and_empty_scene() {
        let scene = scene(&[("a", 3)]);
        assert!(group_meshes(&scene, None, 1000).unwrap().is_empty());
        let empty = SceneMeshes::new();
        assert!(group_meshes(&empty, Some(MergePolicy::Scene), 1000).unwrap().is_empty());
    }

    #[test]
    fn test_obb_policy_is_fatal() {
        let scene = scene(&[("a", 1)]);
        let err = group_meshes(&scene, Some(MergePolicy::OrientedBoundingBox), 1000);
        assert_eq!(
            err,
            Err(ViewerError::UnsupportedMergePolicy(MergePolicy::OrientedBoundingBox))
        );
    }
}
