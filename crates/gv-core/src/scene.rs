//! Loaded mesh bookkeeping.
//!
//! `SceneMeshes` is the single source of truth for which meshes are loaded
//! and how they are grouped into models. The batching policies read the
//! model grouping from here.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Result, ViewerError};
use crate::mesh::{MeshId, ModelId, SourceMesh};

/// Loaded meshes grouped by model, in load order.
#[derive(Debug, Clone, Default)]
pub struct SceneMeshes {
    meshes: HashMap<MeshId, Arc<SourceMesh>>,
    models: Vec<(ModelId, Vec<MeshId>)>,
    revision: u64,
}

impl SceneMeshes {
    /// Creates an empty scene.
    pub fn new() -> Self {
        Self::default()
    }

    /// Membership revision, bumped whenever meshes are added or removed.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Adds meshes to a model, creating the model on first use.
    ///
    /// Fails without modifying the scene if any mesh id is already loaded.
    pub fn add_model(&mut self, model: &ModelId, meshes: Vec<SourceMesh>) -> Result<Vec<MeshId>> {
        let mut seen = std::collections::HashSet::new();
        for mesh in &meshes {
            if self.meshes.contains_key(&mesh.id) || !seen.insert(mesh.id.clone()) {
                return Err(ViewerError::DuplicateMesh(mesh.id.clone()));
            }
        }

        let ids: Vec<MeshId> = meshes.iter().map(|m| m.id.clone()).collect();
        let slot = match self.models.iter().position(|(id, _)| id == model) {
            Some(pos) => pos,
            None => {
                self.models.push((model.clone(), Vec::new()));
                self.models.len() - 1
            }
        };
        self.models[slot].1.extend(ids.iter().cloned());
        for mesh in meshes {
            self.meshes.insert(mesh.id.clone(), Arc::new(mesh));
        }
        self.revision += 1;

        tracing::debug!(
            "Model {} now has {} meshes ({} loaded in total)",
            model,
            self.models[slot].1.len(),
            self.meshes.len()
        );
        Ok(ids)
    }

    /// Removes a model and returns its meshes. Unknown models are a no-op.
    pub fn remove_model(&mut self, model: &ModelId) -> Vec<Arc<SourceMesh>> {
        let Some(pos) = self.models.iter().position(|(id, _)| id == model) else {
            return Vec::new();
        };
        let (_, ids) = self.models.remove(pos);
        self.revision += 1;
        ids.iter().filter_map(|id| self.meshes.remove(id)).collect()
    }

    /// Gets a mesh by id.
    pub fn get(&self, id: &MeshId) -> Option<&Arc<SourceMesh>> {
        self.meshes.get(id)
    }

    /// Returns true if the mesh is loaded.
    pub fn contains(&self, id: &MeshId) -> bool {
        self.meshes.contains_key(id)
    }

    /// Returns true if the model is loaded.
    pub fn contains_model(&self, model: &ModelId) -> bool {
        self.models.iter().any(|(id, _)| id == model)
    }

    /// Returns the number of loaded meshes.
    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    /// Returns true if no mesh is loaded.
    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }

    /// Iterates over models and their mesh ids in load order.
    pub fn models(&self) -> impl Iterator<Item = (&ModelId, &[MeshId])> {
        self.models.iter().map(|(id, meshes)| (id, meshes.as_slice()))
    }

    /// Mesh ids of a model, or None if the model is unknown.
    pub fn model_meshes(&self, model: &ModelId) -> Option<&[MeshId]> {
        self.models
            .iter()
            .find(|(id, _)| id == model)
            .map(|(_, meshes)| meshes.as_slice())
    }

    /// Iterates over every mesh id in load order.
    pub fn mesh_ids(&self) -> impl Iterator<Item = &MeshId> {
        self.models.iter().flat_map(|(_, meshes)| meshes.iter())
    }

    /// Removes everything.
    pub fn clear(&mut self) {
        self.meshes.clear();
        self.models.clear();
        self.revision += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::MeshGeometry;

    fn mesh(model: &ModelId, name: &str) -> SourceMesh {
        SourceMesh::new(model, name, Arc::new(MeshGeometry::quad(1.0)))
    }

    #[test]
    fn test_add_and_remove_model() {
        let mut scene = SceneMeshes::new();
        let a = ModelId::new("a");
        let b = ModelId::new("b");
        scene.add_model(&a, vec![mesh(&a, "m0"), mesh(&a, "m1")]).unwrap();
        scene.add_model(&b, vec![mesh(&b, "m0")]).unwrap();
        assert_eq!(scene.len(), 3);

        let order: Vec<&str> = scene.mesh_ids().map(|id| id.as_str()).collect();
        assert_eq!(order, vec!["a|m0", "a|m1", "b|m0"]);

        let removed = scene.remove_model(&a);
        assert_eq!(removed.len(), 2);
        assert_eq!(scene.len(), 1);
        assert!(!scene.contains_model(&a));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut scene = SceneMeshes::new();
        let a = ModelId::new("a");
        scene.add_model(&a, vec![mesh(&a, "m0")]).unwrap();
        assert_eq!(scene.remove_model(&a).len(), 1);
        let revision = scene.revision();
        assert!(scene.remove_model(&a).is_empty());
        assert_eq!(scene.revision(), revision);
    }

    #[test]
    fn test_duplicate_mesh_rejected() {
        let mut scene = SceneMeshes::new();
        let a = ModelId::new("a");
        scene.add_model(&a, vec![mesh(&a, "m0")]).unwrap();
        let err = scene.add_model(&a, vec![mesh(&a, "m1"), mesh(&a, "m0")]);
        assert!(matches!(err, Err(ViewerError::DuplicateMesh(_))));
        assert_eq!(scene.len(), 1);
    }
}
