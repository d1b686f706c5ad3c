// SPDX-License-Identifier: CEPL-1.0
use glam::{Mat3, Mat4, Vec3, Vec4};

/// Translation, scale and Tait-Bryan rotation (radians) of a scene object.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub translation: Vec3,
    pub scale: Vec3,
    /// Angles about x, y, z. Applied in Y, X, Z order.
    pub rotation: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            scale: Vec3::ONE,
            rotation: Vec3::ZERO,
        }
    }
}

/// Sines and cosines of the three rotation angles, shared by both matrices.
struct Trig {
    c1: f32,
    s1: f32,
    c2: f32,
    s2: f32,
    c3: f32,
    s3: f32,
}

impl Trig {
    fn of(rotation: Vec3) -> Self {
        let (s1, c1) = rotation.y.sin_cos();
        let (s2, c2) = rotation.x.sin_cos();
        let (s3, c3) = rotation.z.sin_cos();
        Self { c1, s1, c2, s2, c3, s3 }
    }

    /// Columns of Ry * Rx * Rz.
    fn columns(&self) -> [Vec3; 3] {
        let Self { c1, s1, c2, s2, c3, s3 } = *self;
        [
            Vec3::new(c1 * c3 + s1 * s2 * s3, c2 * s3, c1 * s2 * s3 - c3 * s1),
            Vec3::new(c3 * s1 * s2 - c1 * s3, c2 * c3, c1 * c3 * s2 + s1 * s3),
            Vec3::new(c2 * s1, -s2, c1 * c2),
        ]
    }
}

impl Transform {
    pub fn from_translation(translation: Vec3) -> Self {
        Self {
            translation,
            ..Self::default()
        }
    }

    /// Model matrix `T * Ry * Rx * Rz * S`.
    pub fn mat4(&self) -> Mat4 {
        let [x, y, z] = Trig::of(self.rotation).columns();
        Mat4::from_cols(
            (x * self.scale.x).extend(0.0),
            (y * self.scale.y).extend(0.0),
            (z * self.scale.z).extend(0.0),
            self.translation.extend(1.0),
        )
    }

    /// Inverse-transpose of the upper 3x3 of [`Transform::mat4`].
    ///
    /// Rotation is orthonormal, so the inverse-transpose only rescales each
    /// column by the reciprocal of its scale factor. Scale must be non-zero.
    pub fn normal_matrix(&self) -> Mat3 {
        debug_assert!(
            self.scale.x != 0.0 && self.scale.y != 0.0 && self.scale.z != 0.0,
            "normal matrix needs non-zero scale"
        );
        let inv_scale = self.scale.recip();
        let [x, y, z] = Trig::of(self.rotation).columns();
        Mat3::from_cols(x * inv_scale.x, y * inv_scale.y, z * inv_scale.z)
    }

    /// `S^-1 * Rz(-z) * Rx(-x) * Ry(-y) * T(-t)`, the exact inverse of `mat4`.
    pub fn inverse_mat4(&self) -> Mat4 {
        let [x, y, z] = Trig::of(self.rotation).columns();
        let inv_scale = self.scale.recip();
        // rotation inverse is its transpose; rows of R become columns.
        let rot_t = Mat3::from_cols(x, y, z).transpose();
        let linear = Mat3::from_diagonal(inv_scale) * rot_t;
        let t = -(linear * self.translation);
        Mat4::from_cols(
            linear.x_axis.extend(0.0),
            linear.y_axis.extend(0.0),
            linear.z_axis.extend(0.0),
            Vec4::new(t.x, t.y, t.z, 1.0),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::{FRAC_PI_2, PI};

    fn samples() -> Vec<Transform> {
        vec![
            Transform::default(),
            Transform {
                translation: Vec3::new(1.0, -2.0, 3.5),
                scale: Vec3::new(2.0, 0.5, 3.0),
                rotation: Vec3::new(0.3, -1.2, 2.1),
            },
            Transform {
                translation: Vec3::new(-0.5, 0.5, 0.0),
                scale: Vec3::new(3.0, 1.5, 3.0),
                rotation: Vec3::new(PI, FRAC_PI_2, -PI / 3.0),
            },
            Transform {
                translation: Vec3::splat(10.0),
                scale: Vec3::new(-1.0, 0.01, 7.0),
                rotation: Vec3::new(-2.5, 0.0, 0.7),
            },
        ]
    }

    #[test]
    fn mat4_matches_composed_rotations() {
        for t in samples() {
            let expected = Mat4::from_translation(t.translation)
                * Mat4::from_rotation_y(t.rotation.y)
                * Mat4::from_rotation_x(t.rotation.x)
                * Mat4::from_rotation_z(t.rotation.z)
                * Mat4::from_scale(t.scale);
            assert!(t.mat4().abs_diff_eq(expected, 1e-5), "{t:?}");
        }
    }

    #[test]
    fn mat4_times_inverse_is_identity() {
        for t in samples() {
            let product = t.mat4() * t.inverse_mat4();
            assert!(product.abs_diff_eq(Mat4::IDENTITY, 1e-4), "{t:?}: {product}");
            let product = t.inverse_mat4() * t.mat4();
            assert!(product.abs_diff_eq(Mat4::IDENTITY, 1e-4), "{t:?}: {product}");
        }
    }

    #[test]
    fn normal_matrix_is_inverse_transpose() {
        for t in samples() {
            let expected = Mat3::from_mat4(t.mat4()).inverse().transpose();
            assert!(t.normal_matrix().abs_diff_eq(expected, 1e-3), "{t:?}");
        }
    }

    #[test]
    fn translation_lands_in_last_column() {
        let t = Transform::from_translation(Vec3::new(4.0, 5.0, 6.0));
        assert_eq!(t.mat4().w_axis, Vec4::new(4.0, 5.0, 6.0, 1.0));
    }
}
