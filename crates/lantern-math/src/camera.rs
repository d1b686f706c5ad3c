// SPDX-License-Identifier: CEPL-1.0
use glam::{Mat4, Vec3, Vec4};

/// Projection plus view matrices in Vulkan conventions: clip depth in
/// `[0, 1]`, y pointing down.
#[derive(Clone, Copy, Debug)]
pub struct Camera {
    projection: Mat4,
    view: Mat4,
    inverse_view: Mat4,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            projection: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
            inverse_view: Mat4::IDENTITY,
        }
    }
}

impl Camera {
    /// World up for this engine's y-down convention.
    pub const UP: Vec3 = Vec3::new(0.0, -1.0, 0.0);

    pub fn set_orthographic_projection(
        &mut self,
        left: f32,
        right: f32,
        top: f32,
        bottom: f32,
        near: f32,
        far: f32,
    ) {
        self.projection = Mat4::from_cols(
            Vec4::new(2.0 / (right - left), 0.0, 0.0, 0.0),
            Vec4::new(0.0, 2.0 / (bottom - top), 0.0, 0.0),
            Vec4::new(0.0, 0.0, 1.0 / (far - near), 0.0),
            Vec4::new(
                -(right + left) / (right - left),
                -(bottom + top) / (bottom - top),
                -near / (far - near),
                1.0,
            ),
        );
    }

    pub fn set_perspective_projection(&mut self, fovy: f32, aspect: f32, near: f32, far: f32) {
        assert!(
            aspect.abs() > f32::EPSILON,
            "perspective projection needs a non-zero aspect ratio"
        );
        let tan_half = (fovy / 2.0).tan();
        self.projection = Mat4::from_cols(
            Vec4::new(1.0 / (aspect * tan_half), 0.0, 0.0, 0.0),
            Vec4::new(0.0, 1.0 / tan_half, 0.0, 0.0),
            Vec4::new(0.0, 0.0, far / (far - near), 1.0),
            Vec4::new(0.0, 0.0, -(far * near) / (far - near), 0.0),
        );
    }

    pub fn set_view_direction(&mut self, position: Vec3, direction: Vec3, up: Vec3) {
        let w = direction.normalize();
        let u = w.cross(up).normalize();
        let v = w.cross(u);
        self.set_basis(position, u, v, w);
    }

    pub fn set_view_target(&mut self, position: Vec3, target: Vec3, up: Vec3) {
        self.set_view_direction(position, target - position, up);
    }

    /// View from a position and Y-X-Z Tait-Bryan angles, the same rotation
    /// order `Transform` uses.
    pub fn set_view_yxz(&mut self, position: Vec3, rotation: Vec3) {
        let (s1, c1) = rotation.y.sin_cos();
        let (s2, c2) = rotation.x.sin_cos();
        let (s3, c3) = rotation.z.sin_cos();
        let u = Vec3::new(c1 * c3 + s1 * s2 * s3, c2 * s3, c1 * s2 * s3 - c3 * s1);
        let v = Vec3::new(c3 * s1 * s2 - c1 * s3, c2 * c3, c1 * c3 * s2 + s1 * s3);
        let w = Vec3::new(c2 * s1, -s2, c1 * c2);
        self.set_basis(position, u, v, w);
    }

    fn set_basis(&mut self, position: Vec3, u: Vec3, v: Vec3, w: Vec3) {
        self.view = Mat4::from_cols(
            Vec4::new(u.x, v.x, w.x, 0.0),
            Vec4::new(u.y, v.y, w.y, 0.0),
            Vec4::new(u.z, v.z, w.z, 0.0),
            Vec4::new(-u.dot(position), -v.dot(position), -w.dot(position), 1.0),
        );
        self.inverse_view = Mat4::from_cols(
            u.extend(0.0),
            v.extend(0.0),
            w.extend(0.0),
            position.extend(1.0),
        );
    }

    pub fn projection(&self) -> Mat4 {
        self.projection
    }

    pub fn view(&self) -> Mat4 {
        self.view
    }

    pub fn inverse_view(&self) -> Mat4 {
        self.inverse_view
    }

    pub fn position(&self) -> Vec3 {
        self.inverse_view.w_axis.truncate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_and_inverse_view_cancel() {
        let mut cam = Camera::default();
        cam.set_view_yxz(Vec3::new(1.0, -2.0, -5.0), Vec3::new(0.4, -0.9, 0.1));
        assert!((cam.view() * cam.inverse_view()).abs_diff_eq(Mat4::IDENTITY, 1e-5));

        cam.set_view_target(Vec3::new(-1.0, -2.0, -20.0), Vec3::new(0.0, 0.0, 2.5), Camera::UP);
        assert!((cam.view() * cam.inverse_view()).abs_diff_eq(Mat4::IDENTITY, 1e-5));
    }

    #[test]
    fn position_comes_from_inverse_view() {
        let mut cam = Camera::default();
        let pos = Vec3::new(3.0, 1.0, -7.0);
        cam.set_view_yxz(pos, Vec3::new(0.2, 1.1, 0.0));
        assert!(cam.position().abs_diff_eq(pos, 1e-6));
    }

    #[test]
    fn target_ends_up_on_positive_view_z() {
        let mut cam = Camera::default();
        cam.set_view_target(Vec3::ZERO, Vec3::new(0.0, 0.0, 4.0), Camera::UP);
        let p = cam.view() * Vec4::new(0.0, 0.0, 4.0, 1.0);
        assert!(p.truncate().abs_diff_eq(Vec3::new(0.0, 0.0, 4.0), 1e-6));
    }

    #[test]
    fn perspective_maps_near_and_far_to_unit_depth() {
        let mut cam = Camera::default();
        cam.set_perspective_projection(50f32.to_radians(), 1.5, 0.1, 100.0);
        let near = cam.projection() * Vec4::new(0.0, 0.0, 0.1, 1.0);
        let far = cam.projection() * Vec4::new(0.0, 0.0, 100.0, 1.0);
        assert!((near.z / near.w).abs() < 1e-5);
        assert!((far.z / far.w - 1.0).abs() < 1e-5);
    }

    #[test]
    fn orthographic_maps_box_corners_to_clip_cube() {
        let mut cam = Camera::default();
        cam.set_orthographic_projection(-2.0, 2.0, -1.0, 1.0, 0.0, 10.0);
        let p = cam.projection() * Vec4::new(2.0, 1.0, 10.0, 1.0);
        assert!(p.truncate().abs_diff_eq(Vec3::new(1.0, 1.0, 1.0), 1e-6));
    }
}
