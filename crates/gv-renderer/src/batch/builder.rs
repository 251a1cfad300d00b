//! Chunked batch construction.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use gv_core::{SceneMeshes, SourceMesh};

use super::{MergeGroup, RenderGeometry};
use crate::color_state::ColorState;

/// Builds merged geometry for merge groups.
///
/// Meshes are appended in chunks of `chunk_size`; the build yields to the
/// executor between chunks so the host thread can keep handling input and
/// frames. The chunk size never affects the output.
#[derive(Debug, Clone)]
pub struct BatchBuilder {
    chunk_size: usize,
}

impl BatchBuilder {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Concatenates a group's meshes into one geometry.
    ///
    /// Every vertex is painted with its mesh's currently resolved color.
    /// Returns None when the group has no vertices or indices. Meshes that
    /// are no longer loaded are skipped.
    pub async fn build_geometry(
        &self,
        group: &MergeGroup,
        scene: &SceneMeshes,
        colors: &mut ColorState,
    ) -> Option<RenderGeometry> {
        let meshes: Vec<&Arc<SourceMesh>> =
            group.meshes.iter().filter_map(|id| scene.get(id)).collect();

        let vertex_count: usize = meshes.iter().map(|m| m.vertex_count()).sum();
        let index_count: usize = meshes.iter().map(|m| m.index_count()).sum();
        if vertex_count == 0 || index_count == 0 {
            return None;
        }

        let mut geometry = RenderGeometry::with_capacity(vertex_count, index_count, meshes.len());
        for (i, chunk) in meshes.chunks(self.chunk_size).enumerate() {
            if i > 0 {
                yield_now().await;
            }
            for mesh in chunk {
                let color = colors.resolve(mesh).color;
                geometry.push_mesh(mesh, color);
            }
        }

        Some(geometry)
    }

    /// Builds every group in order.
    pub async fn build_groups(
        &self,
        groups: &[MergeGroup],
        scene: &SceneMeshes,
        colors: &mut ColorState,
    ) -> Vec<Option<RenderGeometry>> {
        let mut built = Vec::with_capacity(groups.len());
        for group in groups {
            built.push(self.build_geometry(group, scene, colors).await);
        }
        built
    }
}

impl Default for BatchBuilder {
    fn default() -> Self {
        Self::new(gv_core::BatchConfig::DEFAULT_BUILD_CHUNK_SIZE)
    }
}

/// Returns a future that is pending exactly once, waking itself immediately.
pub fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}

/// Future returned by [`yield_now`].
#[derive(Debug)]
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use glam::{Mat4, Vec3};
    use gv_core::{ColorSettings, MaterialInfo, MeshGeometry, MeshId, ModelId};

    use super::*;

    fn scene(count: usize) -> SceneMeshes {
        let model = ModelId::new("m");
        let meshes = (0..count)
            .map(|i| {
                let geometry = if i % 2 == 0 {
                    MeshGeometry::quad(1.0)
                } else {
                    MeshGeometry::cuboid(Vec3::splat(0.5))
                };
                SourceMesh::new(&model, format!("mesh{i}"), Arc::new(geometry))
                    .with_transform(Mat4::from_translation(Vec3::new(i as f32, 0.0, 0.0)))
                    .with_material(MaterialInfo {
                        base_color: [i as f32 / count as f32, 0.5, 0.25],
                        ..MaterialInfo::default()
                    })
            })
            .collect();
        let mut scene = SceneMeshes::new();
        scene.add_model(&model, meshes).unwrap();
        scene
    }

    fn whole(scene: &SceneMeshes) -> MergeGroup {
        MergeGroup {
            model: None,
            meshes: scene.mesh_ids().cloned().collect(),
        }
    }

    fn assert_coverage(geometry: &RenderGeometry) {
        let mut covered = vec![false; geometry.index_count()];
        for id in geometry.mesh_order() {
            for i in geometry.slice(id).unwrap().index_range.clone() {
                assert!(!covered[i], "index entry {i} owned twice");
                covered[i] = true;
            }
        }
        assert!(covered.iter().all(|c| *c));
    }

    #[test]
    fn test_three_meshes_one_group() {
        let scene = scene(3);
        let mut colors = ColorState::new(ColorSettings::default());
        let geometry = pollster::block_on(BatchBuilder::new(2).build_geometry(
            &whole(&scene),
            &scene,
            &mut colors,
        ))
        .unwrap();

        assert_eq!(geometry.index_count(), 6 + 36 + 6);
        assert_eq!(geometry.vertex_count(), 4 + 8 + 4);
        assert_coverage(&geometry);
    }

    #[test]
    fn test_coverage_for_various_sizes() {
        for count in [1, 2, 7, 25] {
            let scene = scene(count);
            let mut colors = ColorState::default();
            let geometry = pollster::block_on(BatchBuilder::new(3).build_geometry(
                &whole(&scene),
                &scene,
                &mut colors,
            ))
            .unwrap();
            assert_eq!(geometry.mesh_order().len(), count);
            assert_coverage(&geometry);
        }
    }

    #[test]
    fn test_empty_group_builds_nothing() {
        let scene = scene(0);
        let mut colors = ColorState::default();
        let group = MergeGroup {
            model: None,
            meshes: Vec::new(),
        };
        let built = pollster::block_on(BatchBuilder::default().build_geometry(
            &group,
            &scene,
            &mut colors,
        ));
        assert!(built.is_none());

        let mut degenerate = SceneMeshes::new();
        let model = ModelId::new("d");
        degenerate
            .add_model(
                &model,
                vec![SourceMesh::new(&model, "void", Arc::new(MeshGeometry::default()))],
            )
            .unwrap();
        let built = pollster::block_on(BatchBuilder::default().build_geometry(
            &whole(&degenerate),
            &degenerate,
            &mut colors,
        ));
        assert!(built.is_none());
    }

    #[test]
    fn test_build_is_deterministic_and_chunk_independent() {
        let scene = scene(11);
        let group = whole(&scene);
        let mut colors = ColorState::default();

        let a = pollster::block_on(BatchBuilder::new(4).build_geometry(&group, &scene, &mut colors))
            .unwrap();
        let b = pollster::block_on(BatchBuilder::new(4).build_geometry(&group, &scene, &mut colors))
            .unwrap();
        let c = pollster::block_on(BatchBuilder::new(1).build_geometry(&group, &scene, &mut colors))
            .unwrap();

        for other in [&b, &c] {
            assert_eq!(a.position_bytes(), other.position_bytes());
            assert_eq!(a.index_bytes(), other.index_bytes());
            assert_eq!(a.color_bytes(), other.color_bytes());
            assert_eq!(a.rmo_bytes(), other.rmo_bytes());
        }
    }

    #[test]
    fn test_positions_are_world_space() {
        let scene = scene(2);
        let mut colors = ColorState::default();
        let geometry = pollster::block_on(BatchBuilder::default().build_geometry(
            &whole(&scene),
            &scene,
            &mut colors,
        ))
        .unwrap();
        let slice = geometry.slice(&MeshId::from_raw("m|mesh1")).unwrap();
        let first = geometry.positions()[slice.vertex_range.start as usize];
        assert_eq!(first, [0.5, -0.5, -0.5]);
    }

    #[test]
    fn test_build_yields_between_chunks() {
        let scene = scene(3);
        let group = whole(&scene);
        let mut colors = ColorState::default();
        let builder = BatchBuilder::new(1);

        let mut future = std::pin::pin!(builder.build_geometry(&group, &scene, &mut colors));
        let mut cx = Context::from_waker(std::task::Waker::noop());
        let mut pending = 0;
        let geometry = loop {
            match future.as_mut().poll(&mut cx) {
                Poll::Ready(geometry) => break geometry,
                Poll::Pending => pending += 1,
            }
        };
        assert_eq!(pending, 2);
        let ids: HashSet<_> = geometry.unwrap().mesh_order().iter().cloned().collect();
        assert_eq!(ids.len(), 3);
    }
}
