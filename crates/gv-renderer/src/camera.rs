//! Perspective camera with view-offset support.
//!
//! The view offset narrows the projection to a sub-rectangle of the full
//! viewport without changing the view direction, which is what the picking
//! pass uses to render a single pixel.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3, Vec4};

/// Sub-rectangle of a larger viewport, in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewOffset {
    pub full_width: f32,
    pub full_height: f32,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Camera uniform data for the GPU.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CameraUniform {
    pub view_proj: [[f32; 4]; 4],
    pub eye: [f32; 4],
}

impl Default for CameraUniform {
    fn default() -> Self {
        Self {
            view_proj: Mat4::IDENTITY.to_cols_array_2d(),
            eye: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

/// Right-handed perspective camera producing wgpu clip space (depth 0..1).
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    pub eye: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    /// Vertical field of view in radians.
    pub fov_y: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
    view_offset: Option<ViewOffset>,
}

impl Camera {
    /// Creates a camera looking at the origin from +Z.
    pub fn new(aspect: f32) -> Self {
        Self {
            eye: Vec3::new(0.0, 0.0, 5.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            fov_y: 45f32.to_radians(),
            aspect,
            near: 0.1,
            far: 1000.0,
            view_offset: None,
        }
    }

    /// Sets eye and target.
    pub fn looking_at(mut self, eye: Vec3, target: Vec3) -> Self {
        self.eye = eye;
        self.target = target;
        self
    }

    pub fn set_fov_degrees(&mut self, fov: f32) {
        self.fov_y = fov.to_radians();
    }

    pub fn update_aspect(&mut self, aspect: f32) {
        self.aspect = aspect;
    }

    /// Narrows the projection to a sub-rectangle of a `full_width` x `full_height` viewport.
    pub fn set_view_offset(
        &mut self,
        full_width: f32,
        full_height: f32,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    ) {
        self.view_offset = Some(ViewOffset {
            full_width,
            full_height,
            x,
            y,
            width,
            height,
        });
    }

    /// Replaces the view offset wholesale (used to restore a saved state).
    pub fn restore_view_offset(&mut self, offset: Option<ViewOffset>) {
        self.view_offset = offset;
    }

    pub fn clear_view_offset(&mut self) {
        self.view_offset = None;
    }

    pub fn view_offset(&self) -> Option<ViewOffset> {
        self.view_offset
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye, self.target, self.up)
    }

    pub fn projection_matrix(&self) -> Mat4 {
        let mut top = self.near * (self.fov_y * 0.5).tan();
        let mut height = 2.0 * top;
        let mut width = self.aspect * height;
        let mut left = -0.5 * width;

        if let Some(view) = self.view_offset {
            left += view.x * width / view.full_width;
            top -= view.y * height / view.full_height;
            width *= view.width / view.full_width;
            height *= view.height / view.full_height;
        }

        frustum_rh(left, left + width, top - height, top, self.near, self.far)
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    pub fn uniform(&self) -> CameraUniform {
        CameraUniform {
            view_proj: self.view_projection().to_cols_array_2d(),
            eye: self.eye.extend(1.0).to_array(),
        }
    }

    /// World-space ray through a normalized device coordinate.
    pub fn ndc_ray(&self, ndc: Vec2) -> (Vec3, Vec3) {
        let inv = self.view_projection().inverse();
        let near = project(inv, Vec4::new(ndc.x, ndc.y, 0.0, 1.0));
        let far = project(inv, Vec4::new(ndc.x, ndc.y, 1.0, 1.0));
        (near, (far - near).normalize())
    }

    /// World-space ray through a canvas pixel position.
    pub fn screen_to_ray(&self, screen_x: f32, screen_y: f32, width: f32, height: f32) -> (Vec3, Vec3) {
        self.ndc_ray(canvas_to_ndc(screen_x, screen_y, width, height))
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(16.0 / 9.0)
    }
}

/// Converts a canvas position (origin top-left, y down) to NDC.
pub fn canvas_to_ndc(x: f32, y: f32, width: f32, height: f32) -> Vec2 {
    Vec2::new(x / width * 2.0 - 1.0, -(y / height * 2.0 - 1.0))
}

fn project(m: Mat4, v: Vec4) -> Vec3 {
    let p = m * v;
    p.truncate() / p.w
}

/// Off-center right-handed perspective projection with depth mapped to 0..1.
fn frustum_rh(left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) -> Mat4 {
    let rl = right - left;
    let tb = top - bottom;
    let nf = near - far;
    Mat4::from_cols(
        Vec4::new(2.0 * near / rl, 0.0, 0.0, 0.0),
        Vec4::new(0.0, 2.0 * near / tb, 0.0, 0.0),
        Vec4::new((right + left) / rl, (top + bottom) / tb, far / nf, -1.0),
        Vec4::new(0.0, 0.0, near * far / nf, 0.0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_projection_matches_glam_without_offset() {
        let camera = Camera::new(1.5);
        let expected = Mat4::perspective_rh(camera.fov_y, 1.5, camera.near, camera.far);
        let actual = camera.projection_matrix();
        for (a, e) in actual.to_cols_array().iter().zip(expected.to_cols_array()) {
            assert_relative_eq!(*a, e, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_center_ray_points_at_target() {
        let camera = Camera::new(1.0).looking_at(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO);
        let (origin, dir) = camera.ndc_ray(Vec2::ZERO);
        assert_relative_eq!(origin.x, 0.0, epsilon = 1e-4);
        assert_relative_eq!(dir.z, -1.0, epsilon = 1e-4);
    }

    #[test]
    fn test_view_offset_center_matches_pixel_ray() {
        let mut camera = Camera::new(2.0).looking_at(Vec3::new(1.0, 2.0, 8.0), Vec3::ZERO);
        let (w, h) = (200.0, 100.0);
        let (_, full_dir) = camera.screen_to_ray(30.5, 70.5, w, h);

        camera.set_view_offset(w, h, 30.0, 70.0, 1.0, 1.0);
        let (_, narrowed_dir) = camera.ndc_ray(Vec2::ZERO);
        assert_relative_eq!(full_dir.x, narrowed_dir.x, epsilon = 1e-4);
        assert_relative_eq!(full_dir.y, narrowed_dir.y, epsilon = 1e-4);
        assert_relative_eq!(full_dir.z, narrowed_dir.z, epsilon = 1e-4);
    }
}
