//! Color-key picking.
//!
//! Every loaded mesh gets a [`PickingProxy`]: the same geometry and
//! transform, drawn flat with a unique 24-bit color key. Picking renders
//! the proxies into a single pixel through a [`PickTarget`] and decodes the
//! pixel back into a mesh id. Key 0 is the background.
//!
//! Vertex snapping casts a ray against one proxy and returns the vertex of
//! the hit triangle whose barycentric weight dominates.

mod gpu;
mod raycast;
mod software;

pub use gpu::GpuPickTarget;
pub use raycast::*;
pub use software::SoftwarePickTarget;

use std::collections::HashMap;
use std::sync::Arc;

use glam::{Mat4, Vec2, Vec3};
use gv_core::{MeshGeometry, MeshId, SourceMesh};

use crate::camera::Camera;
use crate::error::PickError;

/// Key reserved for "no mesh".
pub const BACKGROUND_KEY: u32 = 0;
/// Largest key representable in 24-bit RGB.
pub const MAX_KEY: u32 = 0xFF_FFFF;

/// Encodes a key as RGB bytes.
pub fn key_to_rgb(key: u32) -> [u8; 3] {
    [(key >> 16) as u8, (key >> 8) as u8, key as u8]
}

/// Decodes RGB bytes into a key.
pub fn rgb_to_key(rgb: [u8; 3]) -> u32 {
    ((rgb[0] as u32) << 16) | ((rgb[1] as u32) << 8) | rgb[2] as u32
}

/// Hands out unique color keys, reusing released keys first.
#[derive(Debug, Clone)]
pub struct KeyAllocator {
    next: u32,
    free: Vec<u32>,
}

impl KeyAllocator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Creates an allocator whose counter starts at `next` (clamped to a valid key).
    pub fn starting_at(next: u32) -> Self {
        Self {
            next: next.clamp(1, MAX_KEY),
            free: Vec::new(),
        }
    }

    /// Allocates a key for which `in_use` returns false.
    ///
    /// The counter wraps from [`MAX_KEY`] back to 1, never producing the
    /// background key.
    pub fn allocate(&mut self, in_use: impl Fn(u32) -> bool) -> Option<u32> {
        if let Some(key) = self.free.pop() {
            return Some(key);
        }

        for _ in 0..MAX_KEY {
            let key = self.next;
            self.next = if key >= MAX_KEY { 1 } else { key + 1 };
            if !in_use(key) {
                return Some(key);
            }
        }
        None
    }

    /// Returns a key to the free pool.
    pub fn release(&mut self, key: u32) {
        if key != BACKGROUND_KEY && !self.free.contains(&key) {
            self.free.push(key);
        }
    }

    pub fn free_len(&self) -> usize {
        self.free.len()
    }
}

impl Default for KeyAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Flat-colored shadow of a source mesh in the picking scene.
#[derive(Debug, Clone)]
pub struct PickingProxy {
    pub mesh: MeshId,
    pub key: u32,
    pub geometry: Arc<MeshGeometry>,
    pub transform: Mat4,
}

impl PickingProxy {
    pub fn rgb(&self) -> [u8; 3] {
        key_to_rgb(self.key)
    }

    /// Key color as normalized floats, alpha 1.
    pub fn color(&self) -> [f32; 4] {
        let [r, g, b] = self.rgb();
        [r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0, 1.0]
    }
}

/// Something that can render the picking scene into one pixel.
pub trait PickTarget {
    /// Renders all proxies through `camera` into a 1x1 target and returns
    /// the RGBA pixel. Background must read back as key 0.
    fn render_pixel(&mut self, camera: &Camera, index: &PickingIndex) -> Result<[u8; 4], PickError>;
}

/// Picking scene: one proxy per loaded mesh plus the key maps.
#[derive(Debug, Default)]
pub struct PickingIndex {
    proxies: HashMap<MeshId, PickingProxy>,
    by_key: HashMap<u32, MeshId>,
    keys: KeyAllocator,
    revision: u64,
}

impl PickingIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an index whose key counter starts at `next_key`.
    pub fn with_key_allocator(keys: KeyAllocator) -> Self {
        Self {
            keys,
            ..Self::default()
        }
    }

    /// Adds a proxy for a mesh and returns its key.
    ///
    /// Adding an already indexed mesh replaces its geometry and transform
    /// but keeps its key.
    pub fn add(&mut self, mesh: &SourceMesh) -> Result<u32, PickError> {
        if let Some(proxy) = self.proxies.get_mut(&mesh.id) {
            proxy.geometry = mesh.geometry.clone();
            proxy.transform = mesh.transform;
            self.revision += 1;
            return Ok(proxy.key);
        }

        let by_key = &self.by_key;
        let Some(key) = self.keys.allocate(|k| by_key.contains_key(&k)) else {
            tracing::warn!("No picking key left for mesh {}", mesh.id);
            return Err(PickError::KeySpaceExhausted);
        };

        self.by_key.insert(key, mesh.id.clone());
        self.proxies.insert(
            mesh.id.clone(),
            PickingProxy {
                mesh: mesh.id.clone(),
                key,
                geometry: mesh.geometry.clone(),
                transform: mesh.transform,
            },
        );
        self.revision += 1;
        Ok(key)
    }

    /// Removes a mesh's proxy and releases its key. Unknown ids are a no-op.
    pub fn remove(&mut self, id: &MeshId) {
        if let Some(proxy) = self.proxies.remove(id) {
            self.by_key.remove(&proxy.key);
            self.keys.release(proxy.key);
            self.revision += 1;
        }
    }

    pub fn key_of(&self, id: &MeshId) -> Option<u32> {
        self.proxies.get(id).map(|p| p.key)
    }

    pub fn mesh_for_key(&self, key: u32) -> Option<&MeshId> {
        self.by_key.get(&key)
    }

    pub fn proxy(&self, id: &MeshId) -> Option<&PickingProxy> {
        self.proxies.get(id)
    }

    pub fn proxies(&self) -> impl Iterator<Item = &PickingProxy> {
        self.proxies.values()
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    /// Bumped whenever a proxy is added, replaced or removed.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Resolves a canvas pixel to the mesh drawn there.
    ///
    /// The camera is narrowed to the 1x1 window at `(x, y)` for the duration
    /// of the pick and restored before returning. Points outside the
    /// viewport and the background resolve to None.
    pub fn mesh_at(
        &self,
        camera: &mut Camera,
        width: u32,
        height: u32,
        x: f32,
        y: f32,
        target: &mut dyn PickTarget,
    ) -> Result<Option<MeshId>, PickError> {
        let (w, h) = (width as f32, height as f32);
        if width == 0 || height == 0 || !(0.0..w).contains(&x) || !(0.0..h).contains(&y) {
            return Ok(None);
        }

        let saved = camera.view_offset();
        camera.set_view_offset(w, h, x, y, 1.0, 1.0);
        let pixel = target.render_pixel(camera, self);
        camera.restore_view_offset(saved);

        let [r, g, b, _] = pixel?;
        let key = rgb_to_key([r, g, b]);
        if key == BACKGROUND_KEY {
            return Ok(None);
        }
        Ok(self.mesh_for_key(key).cloned())
    }

    /// Snaps a screen point on a known mesh to the nearest dominant vertex.
    ///
    /// `ndc` is the pointer position in normalized device coordinates.
    /// Returns the world-space vertex, or None if the ray misses, the hit
    /// triangle is degenerate or no vertex weight dominates.
    pub fn snap_point_at(&self, camera: &Camera, ndc: Vec2, id: &MeshId) -> Option<Vec3> {
        let proxy = self.proxies.get(id)?;
        let (origin, dir) = camera.ndc_ray(ndc);

        let to_local = proxy.transform.inverse();
        let local_origin = to_local.transform_point3(origin);
        let local_dir = to_local.transform_vector3(dir);

        let geometry = &proxy.geometry;
        let hit = first_hit(local_origin, local_dir, &geometry.positions, &geometry.indices)?;

        let corners = hit.triangle.map(|i| Vec3::from(geometry.positions[i as usize]));
        let point = local_origin + local_dir * hit.t;
        let weights = barycentric(point, corners[0], corners[1], corners[2])?;
        let vertex = dominant_vertex(weights)?;

        Some(proxy.transform.transform_point3(corners[vertex]))
    }
}

#[cfg(test)]
mod tests {
    use gv_core::ModelId;

    use super::*;
    use approx::assert_relative_eq;

    fn mesh(name: &str) -> SourceMesh {
        SourceMesh::new(&ModelId::new("m"), name, Arc::new(MeshGeometry::quad(1.0)))
    }

    #[test]
    fn test_key_rgb_roundtrip() {
        for key in [1, 255, 256, 0x12_3456, MAX_KEY] {
            assert_eq!(rgb_to_key(key_to_rgb(key)), key);
        }
    }

    #[test]
    fn test_released_key_is_reused_first() {
        let mut index = PickingIndex::new();
        let a = mesh("a");
        let b = mesh("b");
        let c = mesh("c");
        index.add(&a).unwrap();
        let key_b = index.add(&b).unwrap();

        index.remove(&b.id);
        assert_eq!(index.add(&c).unwrap(), key_b);
        assert_eq!(index.mesh_for_key(key_b), Some(&c.id));
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_live_keys_never_exceed_live_meshes() {
        let mut index = PickingIndex::new();
        let meshes: Vec<_> = (0..10).map(|i| mesh(&format!("m{i}"))).collect();
        for round in 0..3 {
            for m in &meshes {
                index.add(m).unwrap();
            }
            for m in meshes.iter().skip(round) {
                index.remove(&m.id);
            }
            assert_eq!(index.by_key.len(), index.len());
            assert!(index.proxies().all(|p| p.key <= 10));
        }
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut index = PickingIndex::new();
        let a = mesh("a");
        index.add(&a).unwrap();
        index.remove(&a.id);
        index.remove(&a.id);
        assert!(index.is_empty());
        assert_eq!(index.keys.free_len(), 1);
    }

    #[test]
    fn test_allocator_wraps_and_skips_background() {
        let mut keys = KeyAllocator::starting_at(MAX_KEY);
        assert_eq!(keys.allocate(|_| false), Some(MAX_KEY));
        assert_eq!(keys.allocate(|_| false), Some(1));
        assert_eq!(keys.allocate(|k| k == 2), Some(3));
    }

    #[test]
    fn test_snap_to_dominant_vertex() {
        let index = {
            let mut index = PickingIndex::new();
            let model = ModelId::new("m");
            let triangle = MeshGeometry::new(
                vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
                vec![0, 1, 2],
            );
            let mesh = SourceMesh::new(&model, "tri", Arc::new(triangle))
                .with_transform(Mat4::from_translation(Vec3::new(10.0, 0.0, 0.0)));
            index.add(&mesh).unwrap();
            index
        };
        let id = MeshId::from_raw("m|tri");

        // Hit point with weights (0.5, 0.3, 0.2) -> vertex A.
        let target = Vec3::new(10.3, 0.2, 0.0);
        let camera = Camera::new(1.0).looking_at(target + Vec3::Z * 5.0, target);
        let snap = index.snap_point_at(&camera, Vec2::ZERO, &id).unwrap();
        assert_relative_eq!(snap.x, 10.0, epsilon = 1e-5);
        assert_relative_eq!(snap.y, 0.0, epsilon = 1e-5);

        // Near the centroid no vertex dominates.
        let centroid = Vec3::new(10.0 + 1.0 / 3.0, 1.0 / 3.0, 0.0);
        let camera = Camera::new(1.0).looking_at(centroid + Vec3::Z * 5.0, centroid);
        assert!(index.snap_point_at(&camera, Vec2::ZERO, &id).is_none());

        // Unknown mesh.
        assert!(index.snap_point_at(&camera, Vec2::ZERO, &MeshId::from_raw("m|x")).is_none());
    }
}
