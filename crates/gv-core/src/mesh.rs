//! Source mesh definitions.
//!
//! Meshes are produced by the model loader and only read by the rest of
//! the viewer. Every mesh carries a stable string id of the form
//! `modelId|meshName`.

use std::fmt;
use std::sync::Arc;

use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

use crate::color::ColorRgbRmo;

/// Identifier of a loaded model (the model guid).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelId(String);

impl ModelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable mesh identifier, `modelId|meshName`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MeshId(String);

impl MeshId {
    /// Separator between the model id and the mesh name.
    pub const SEPARATOR: char = '|';

    /// Builds the id for a mesh of the given model.
    pub fn new(model: &ModelId, mesh_name: &str) -> Self {
        Self(format!("{}{}{}", model.as_str(), Self::SEPARATOR, mesh_name))
    }

    /// Wraps an already formatted id string.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the model part of the id.
    pub fn model_part(&self) -> &str {
        self.0
            .split_once(Self::SEPARATOR)
            .map(|(model, _)| model)
            .unwrap_or(&self.0)
    }

    /// Returns the mesh name part of the id.
    pub fn mesh_part(&self) -> &str {
        self.0
            .split_once(Self::SEPARATOR)
            .map(|(_, mesh)| mesh)
            .unwrap_or("")
    }
}

impl fmt::Display for MeshId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Indexed triangle geometry in mesh-local space.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshGeometry {
    /// Vertex positions.
    pub positions: Vec<[f32; 3]>,
    /// Triangle indices into `positions`.
    pub indices: Vec<u32>,
}

impl MeshGeometry {
    /// Creates indexed geometry.
    pub fn new(positions: Vec<[f32; 3]>, indices: Vec<u32>) -> Self {
        Self { positions, indices }
    }

    /// Creates geometry from a triangle soup, generating sequential indices.
    pub fn non_indexed(positions: Vec<[f32; 3]>) -> Self {
        let indices = (0..positions.len() as u32).collect();
        Self { positions, indices }
    }

    /// Axis-aligned box centered at the origin.
    pub fn cuboid(half_extents: Vec3) -> Self {
        let h = half_extents;
        let positions = vec![
            [-h.x, -h.y, -h.z],
            [h.x, -h.y, -h.z],
            [h.x, h.y, -h.z],
            [-h.x, h.y, -h.z],
            [-h.x, -h.y, h.z],
            [h.x, -h.y, h.z],
            [h.x, h.y, h.z],
            [-h.x, h.y, h.z],
        ];
        #[rustfmt::skip]
        let indices = vec![
            4, 5, 6, 4, 6, 7, // +z
            1, 0, 3, 1, 3, 2, // -z
            5, 1, 2, 5, 2, 6, // +x
            0, 4, 7, 0, 7, 3, // -x
            7, 6, 2, 7, 2, 3, // +y
            0, 1, 5, 0, 5, 4, // -y
        ];
        Self { positions, indices }
    }

    /// Unit quad in the XY plane facing +Z, scaled by `size`.
    pub fn quad(size: f32) -> Self {
        let s = size * 0.5;
        Self {
            positions: vec![[-s, -s, 0.0], [s, -s, 0.0], [s, s, 0.0], [-s, s, 0.0]],
            indices: vec![0, 1, 2, 0, 2, 3],
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty() || self.indices.is_empty()
    }

    /// Returns the local-space bounds, or None for empty geometry.
    pub fn bounds(&self) -> Option<(Vec3, Vec3)> {
        if self.positions.is_empty() {
            return None;
        }

        let mut min = Vec3::splat(f32::INFINITY);
        let mut max = Vec3::splat(f32::NEG_INFINITY);
        for p in &self.positions {
            let pos = Vec3::from(*p);
            min = min.min(pos);
            max = max.max(pos);
        }
        Some((min, max))
    }
}

/// Material parameters read from the mesh's native material.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MaterialInfo {
    pub base_color: [f32; 3],
    pub roughness: f32,
    pub metalness: f32,
    pub opacity: f32,
}

impl Default for MaterialInfo {
    fn default() -> Self {
        Self {
            base_color: [0.8, 0.8, 0.8],
            roughness: 1.0,
            metalness: 0.0,
            opacity: 1.0,
        }
    }
}

impl From<MaterialInfo> for ColorRgbRmo {
    fn from(m: MaterialInfo) -> Self {
        ColorRgbRmo::new(
            m.base_color[0],
            m.base_color[1],
            m.base_color[2],
            m.roughness,
            m.metalness,
            m.opacity,
        )
    }
}

/// A renderable unit produced by the model loader.
#[derive(Debug, Clone)]
pub struct SourceMesh {
    pub id: MeshId,
    pub model: ModelId,
    pub name: String,
    pub geometry: Arc<MeshGeometry>,
    /// World transform matrix.
    pub transform: Mat4,
    /// Native material, if the loader found one.
    pub material: Option<MaterialInfo>,
}

impl SourceMesh {
    /// Creates a mesh with identity transform and no material.
    pub fn new(model: &ModelId, name: impl Into<String>, geometry: Arc<MeshGeometry>) -> Self {
        let name = name.into();
        Self {
            id: MeshId::new(model, &name),
            model: model.clone(),
            name,
            geometry,
            transform: Mat4::IDENTITY,
            material: None,
        }
    }

    /// Sets the world transform.
    pub fn with_transform(mut self, transform: Mat4) -> Self {
        self.transform = transform;
        self
    }

    /// Sets the native material.
    pub fn with_material(mut self, material: MaterialInfo) -> Self {
        self.material = Some(material);
        self
    }

    pub fn vertex_count(&self) -> usize {
        self.geometry.vertex_count()
    }

    pub fn index_count(&self) -> usize {
        self.geometry.index_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mesh_id_format() {
        let model = ModelId::new("guid-1");
        let id = MeshId::new(&model, "Wall_01");
        assert_eq!(id.as_str(), "guid-1|Wall_01");
        assert_eq!(id.model_part(), "guid-1");
        assert_eq!(id.mesh_part(), "Wall_01");
    }

    #[test]
    fn test_non_indexed_geometry_gets_sequential_indices() {
        let geometry =
            MeshGeometry::non_indexed(vec![[0.0; 3], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]);
        assert_eq!(geometry.indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_cuboid_bounds() {
        let geometry = MeshGeometry::cuboid(Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(geometry.index_count(), 36);
        let (min, max) = geometry.bounds().unwrap();
        assert_eq!(min, Vec3::new(-1.0, -2.0, -3.0));
        assert_eq!(max, Vec3::new(1.0, 2.0, 3.0));
        assert!(MeshGeometry::default().bounds().is_none());
    }
}
