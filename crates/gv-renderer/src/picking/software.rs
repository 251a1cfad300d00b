//! CPU pick target.

use glam::{Vec2, Vec3};

use super::{BACKGROUND_KEY, PickTarget, PickingIndex, first_hit, key_to_rgb, ray_aabb_intersection};
use crate::camera::Camera;
use crate::error::PickError;

/// Resolves the pick pixel by ray casting every proxy on the CPU.
///
/// Produces the same pixel a depth-tested flat-color pass would: the key of
/// the nearest proxy under the pixel center, or the background.
#[derive(Debug, Default, Clone, Copy)]
pub struct SoftwarePickTarget;

impl SoftwarePickTarget {
    pub fn new() -> Self {
        Self
    }
}

impl PickTarget for SoftwarePickTarget {
    fn render_pixel(&mut self, camera: &Camera, index: &PickingIndex) -> Result<[u8; 4], PickError> {
        // The narrowed frustum maps the pixel center to NDC origin.
        let (origin, dir) = camera.ndc_ray(Vec2::ZERO);

        let mut nearest: Option<(f32, u32)> = None;
        for proxy in index.proxies() {
            let to_local = proxy.transform.inverse();
            let local_origin = to_local.transform_point3(origin);
            let local_dir = to_local.transform_vector3(dir);

            let Some((min, max)) = proxy.geometry.bounds() else {
                continue;
            };
            if ray_aabb_intersection(local_origin, local_dir, min, max).is_none() {
                continue;
            }

            let geometry = &proxy.geometry;
            let Some(hit) = first_hit(local_origin, local_dir, &geometry.positions, &geometry.indices)
            else {
                continue;
            };

            let world = proxy.transform.transform_point3(local_origin + local_dir * hit.t);
            let distance = world.distance(origin);
            if distance < camera.near || distance > camera.far * far_slack(dir, camera) {
                continue;
            }
            if nearest.is_none_or(|(d, _)| distance < d) {
                nearest = Some((distance, proxy.key));
            }
        }

        let key = nearest.map_or(BACKGROUND_KEY, |(_, key)| key);
        let [r, g, b] = key_to_rgb(key);
        Ok([r, g, b, 255])
    }
}

/// Far plane distance along an off-axis ray, relative to `far`.
fn far_slack(dir: Vec3, camera: &Camera) -> f32 {
    let forward = (camera.target - camera.eye).normalize_or_zero();
    let cos = dir.dot(forward);
    if cos > f32::EPSILON { 1.0 / cos } else { 1.0 }
}
