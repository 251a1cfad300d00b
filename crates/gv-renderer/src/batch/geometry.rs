//! Merged batch geometry.

use std::collections::HashMap;
use std::ops::Range;

use glam::Vec3;
use gv_core::{ColorRgbRmo, MeshId, SourceMesh};

/// Part of a [`RenderGeometry`] owned by one source mesh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshSlice {
    /// Entries of the index buffer that belong to the mesh.
    pub index_range: Range<usize>,
    /// Vertices that belong to the mesh.
    pub vertex_range: Range<u32>,
    /// Whether the mesh's current color is fully opaque.
    pub opaque: bool,
}

/// Concatenated buffers for one merge group.
///
/// Positions are in world space. Colors and roughness/metalness/opacity are
/// stored per vertex as packed bytes. Every index-buffer entry belongs to
/// exactly one mesh slice.
#[derive(Debug, Clone, Default)]
pub struct RenderGeometry {
    positions: Vec<[f32; 3]>,
    indices: Vec<u32>,
    colors: Vec<[u8; 4]>,
    rmo: Vec<[u8; 4]>,
    order: Vec<MeshId>,
    slices: HashMap<MeshId, MeshSlice>,
    dirty_vertices: Vec<Range<u32>>,
    indices_dirty: bool,
}

impl RenderGeometry {
    pub(crate) fn with_capacity(vertices: usize, indices: usize, meshes: usize) -> Self {
        Self {
            positions: Vec::with_capacity(vertices),
            indices: Vec::with_capacity(indices),
            colors: Vec::with_capacity(vertices),
            rmo: Vec::with_capacity(vertices),
            order: Vec::with_capacity(meshes),
            slices: HashMap::with_capacity(meshes),
            dirty_vertices: Vec::new(),
            indices_dirty: false,
        }
    }

    /// Appends a mesh in world space, painting all of its vertices with `color`.
    pub(crate) fn push_mesh(&mut self, mesh: &SourceMesh, color: ColorRgbRmo) {
        let vertex_offset = self.positions.len() as u32;
        let index_start = self.indices.len();

        self.positions.extend(
            mesh.geometry
                .positions
                .iter()
                .map(|p| mesh.transform.transform_point3(Vec3::from(*p)).to_array()),
        );
        self.indices
            .extend(mesh.geometry.indices.iter().map(|i| i + vertex_offset));

        let count = mesh.geometry.positions.len();
        self.colors
            .extend(std::iter::repeat_n(color.rgb_bytes(), count));
        self.rmo.extend(std::iter::repeat_n(color.rmo_bytes(), count));

        self.order.push(mesh.id.clone());
        self.slices.insert(
            mesh.id.clone(),
            MeshSlice {
                index_range: index_start..self.indices.len(),
                vertex_range: vertex_offset..self.positions.len() as u32,
                opaque: color.is_opaque(),
            },
        );
    }

    pub fn positions(&self) -> &[[f32; 3]] {
        &self.positions
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn colors(&self) -> &[[u8; 4]] {
        &self.colors
    }

    pub fn rmo(&self) -> &[[u8; 4]] {
        &self.rmo
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    /// Meshes in the order they were appended.
    pub fn mesh_order(&self) -> &[MeshId] {
        &self.order
    }

    pub fn slice(&self, id: &MeshId) -> Option<&MeshSlice> {
        self.slices.get(id)
    }

    pub fn contains(&self, id: &MeshId) -> bool {
        self.slices.contains_key(id)
    }

    /// True if any mesh in the batch is not fully opaque.
    pub fn has_transparent(&self) -> bool {
        self.slices.values().any(|s| !s.opaque)
    }

    /// Number of leading index entries owned by opaque meshes.
    ///
    /// Only meaningful once the index buffer is sorted opaque-first.
    pub fn opaque_index_count(&self) -> usize {
        self.slices
            .values()
            .filter(|s| s.opaque)
            .map(|s| s.index_range.len())
            .sum()
    }

    /// Overwrites the color of every vertex of a mesh.
    ///
    /// Returns false if the mesh is not part of this batch.
    pub fn write_color(&mut self, id: &MeshId, color: ColorRgbRmo) -> bool {
        let Some(slice) = self.slices.get_mut(id) else {
            return false;
        };
        slice.opaque = color.is_opaque();

        let range = slice.vertex_range.clone();
        let (start, end) = (range.start as usize, range.end as usize);
        self.colors[start..end].fill(color.rgb_bytes());
        self.rmo[start..end].fill(color.rmo_bytes());
        if !range.is_empty() {
            self.dirty_vertices.push(range);
        }
        true
    }

    /// Reorders the index buffer so that opaque meshes are drawn first.
    ///
    /// Positions and colors do not move. Within each partition meshes keep
    /// their append order.
    pub fn sort_opaque_first(&mut self) {
        let mut sorted = Vec::with_capacity(self.indices.len());
        let mut ranges = Vec::with_capacity(self.order.len());

        for opaque_pass in [true, false] {
            for id in &self.order {
                let Some(slice) = self.slices.get(id) else {
                    continue;
                };
                if slice.opaque != opaque_pass {
                    continue;
                }
                let start = sorted.len();
                sorted.extend_from_slice(&self.indices[slice.index_range.clone()]);
                ranges.push((id.clone(), start..sorted.len()));
            }
        }

        for (id, range) in ranges {
            if let Some(slice) = self.slices.get_mut(&id) {
                slice.index_range = range;
            }
        }
        self.indices = sorted;
        self.indices_dirty = true;
    }

    /// Drains the vertex ranges written since the last call, merged and sorted.
    pub fn take_dirty_vertex_ranges(&mut self) -> Vec<Range<u32>> {
        let mut ranges = std::mem::take(&mut self.dirty_vertices);
        ranges.sort_by_key(|r| r.start);

        let mut merged: Vec<Range<u32>> = Vec::with_capacity(ranges.len());
        for range in ranges {
            match merged.last_mut() {
                Some(last) if range.start <= last.end => last.end = last.end.max(range.end),
                _ => merged.push(range),
            }
        }
        merged
    }

    /// Returns true once after the index buffer was reordered.
    pub fn take_indices_dirty(&mut self) -> bool {
        std::mem::take(&mut self.indices_dirty)
    }

    pub fn position_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.positions)
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    pub fn color_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.colors)
    }

    pub fn rmo_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.rmo)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use gv_core::{MeshGeometry, ModelId};

    use super::*;

    fn geometry_with(opacities: &[f32]) -> RenderGeometry {
        let model = ModelId::new("m");
        let mut geometry = RenderGeometry::default();
        for (i, opacity) in opacities.iter().enumerate() {
            let mesh = SourceMesh::new(&model, format!("q{i}"), Arc::new(MeshGeometry::quad(1.0)));
            let color = ColorRgbRmo {
                opacity: *opacity,
                ..ColorRgbRmo::default()
            };
            geometry.push_mesh(&mesh, color);
        }
        geometry
    }

    #[test]
    fn test_push_offsets_indices() {
        let geometry = geometry_with(&[1.0, 1.0]);
        assert_eq!(&geometry.indices()[6..], &[4, 5, 6, 4, 6, 7]);
        let slice = geometry.slice(&MeshId::from_raw("m|q1")).unwrap();
        assert_eq!(slice.index_range, 6..12);
        assert_eq!(slice.vertex_range, 4..8);
    }

    #[test]
    fn test_write_color_marks_vertices_dirty() {
        let mut geometry = geometry_with(&[1.0, 1.0, 1.0]);
        let red = ColorRgbRmo::new(1.0, 0.0, 0.0, 1.0, 0.0, 1.0);
        assert!(geometry.write_color(&MeshId::from_raw("m|q2"), red));
        assert!(geometry.write_color(&MeshId::from_raw("m|q1"), red));
        assert!(!geometry.write_color(&MeshId::from_raw("m|missing"), red));

        assert_eq!(geometry.colors()[4], [255, 0, 0, 255]);
        assert_eq!(geometry.take_dirty_vertex_ranges(), vec![4..12]);
        assert!(geometry.take_dirty_vertex_ranges().is_empty());
    }

    #[test]
    fn test_sort_keeps_slices_contiguous() {
        let mut geometry = geometry_with(&[0.5, 1.0, 0.5, 1.0]);
        geometry.sort_opaque_first();
        assert!(geometry.take_indices_dirty());

        let order: Vec<_> = ["m|q1", "m|q3", "m|q0", "m|q2"]
            .iter()
            .map(|id| geometry.slice(&MeshId::from_raw(*id)).unwrap().index_range.clone())
            .collect();
        assert_eq!(order, vec![0..6, 6..12, 12..18, 18..24]);
        assert_eq!(&geometry.indices()[0..3], &[4, 5, 6]);
        assert_eq!(geometry.opaque_index_count(), 12);
    }
}
