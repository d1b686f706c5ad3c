// SPDX-License-Identifier: CEPL-1.0
use std::f32::consts::TAU;

use bitflags::bitflags;
use glam::Vec3;
use lantern_math::{Camera, Transform};
use lantern_platform::winit::keyboard::KeyCode;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Keys: u16 {
        const MOVE_LEFT     = 1 << 0;
        const MOVE_RIGHT    = 1 << 1;
        const MOVE_FORWARD  = 1 << 2;
        const MOVE_BACKWARD = 1 << 3;
        const MOVE_UP       = 1 << 4;
        const MOVE_DOWN     = 1 << 5;
        const LOOK_LEFT     = 1 << 6;
        const LOOK_RIGHT    = 1 << 7;
        const LOOK_UP       = 1 << 8;
        const LOOK_DOWN     = 1 << 9;
    }
}

impl Keys {
    pub fn from_key_code(code: KeyCode) -> Option<Self> {
        Some(match code {
            KeyCode::KeyA => Keys::MOVE_LEFT,
            KeyCode::KeyD => Keys::MOVE_RIGHT,
            KeyCode::KeyW => Keys::MOVE_FORWARD,
            KeyCode::KeyS => Keys::MOVE_BACKWARD,
            KeyCode::KeyE => Keys::MOVE_UP,
            KeyCode::KeyQ => Keys::MOVE_DOWN,
            KeyCode::ArrowLeft => Keys::LOOK_LEFT,
            KeyCode::ArrowRight => Keys::LOOK_RIGHT,
            KeyCode::ArrowUp => Keys::LOOK_UP,
            KeyCode::ArrowDown => Keys::LOOK_DOWN,
            _ => return None,
        })
    }
}

/// Pitch stays short of straight up/down so yaw remains meaningful.
const MAX_PITCH: f32 = 1.5;

/// Fly-camera movement in the XZ plane driven by held keys.
#[derive(Debug)]
pub struct MovementController {
    held: Keys,
    pub move_speed: f32,
    pub look_speed: f32,
}

impl MovementController {
    pub fn new(move_speed: f32, look_speed: f32) -> Self {
        Self {
            held: Keys::empty(),
            move_speed,
            look_speed,
        }
    }

    pub fn on_key(&mut self, code: KeyCode, pressed: bool) {
        if let Some(k) = Keys::from_key_code(code) {
            self.held.set(k, pressed);
        }
    }

    pub fn held(&self) -> Keys {
        self.held
    }

    /// Applies one frame of look and movement to `viewer`.
    pub fn move_in_plane_xz(&self, dt: f32, viewer: &mut Transform) {
        let held = self.held;
        let axis = |pos: Keys, neg: Keys| held.contains(pos) as i32 as f32 - held.contains(neg) as i32 as f32;

        let rotate = Vec3::new(
            axis(Keys::LOOK_UP, Keys::LOOK_DOWN),
            axis(Keys::LOOK_RIGHT, Keys::LOOK_LEFT),
            0.0,
        );
        if rotate.length_squared() > f32::EPSILON {
            viewer.rotation += self.look_speed * dt * rotate.normalize();
        }
        viewer.rotation.x = viewer.rotation.x.clamp(-MAX_PITCH, MAX_PITCH);
        viewer.rotation.y = viewer.rotation.y.rem_euclid(TAU);

        let yaw = viewer.rotation.y;
        let forward = Vec3::new(yaw.sin(), 0.0, yaw.cos());
        let right = Vec3::new(forward.z, 0.0, -forward.x);
        let up = Camera::UP;

        let dir = forward * axis(Keys::MOVE_FORWARD, Keys::MOVE_BACKWARD)
            + right * axis(Keys::MOVE_RIGHT, Keys::MOVE_LEFT)
            + up * axis(Keys::MOVE_UP, Keys::MOVE_DOWN);
        if dir.length_squared() > f32::EPSILON {
            viewer.translation += self.move_speed * dt * dir.normalize();
        }
    }
}

/// Viewer rotation (pitch, yaw, 0) that looks from `from` towards `to`,
/// in the convention used by `Camera::set_view_yxz`.
pub fn look_at_rotation(from: Vec3, to: Vec3) -> Vec3 {
    let d = to - from;
    if d.length_squared() <= f32::EPSILON {
        return Vec3::ZERO;
    }
    let yaw = d.x.atan2(d.z);
    let pitch = (-d.y).atan2(d.x.hypot(d.z));
    Vec3::new(pitch, yaw, 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller_with(keys: &[KeyCode]) -> MovementController {
        let mut c = MovementController::new(2.0, 1.0);
        for &k in keys {
            c.on_key(k, true);
        }
        c
    }

    #[test]
    fn forward_at_zero_yaw_is_positive_z() {
        let c = controller_with(&[KeyCode::KeyW]);
        let mut t = Transform::default();
        c.move_in_plane_xz(0.5, &mut t);
        assert!(t.translation.abs_diff_eq(Vec3::new(0.0, 0.0, 1.0), 1e-6));
    }

    #[test]
    fn diagonal_movement_is_normalized() {
        let c = controller_with(&[KeyCode::KeyW, KeyCode::KeyD]);
        let mut t = Transform::default();
        c.move_in_plane_xz(1.0, &mut t);
        assert!((t.translation.length() - 2.0).abs() < 1e-5);
    }

    #[test]
    fn up_key_moves_towards_negative_y() {
        let c = controller_with(&[KeyCode::KeyE]);
        let mut t = Transform::default();
        c.move_in_plane_xz(1.0, &mut t);
        assert!(t.translation.y < 0.0);
    }

    #[test]
    fn released_key_stops_movement() {
        let mut c = controller_with(&[KeyCode::KeyW]);
        c.on_key(KeyCode::KeyW, false);
        assert!(c.held().is_empty());
        let mut t = Transform::default();
        c.move_in_plane_xz(1.0, &mut t);
        assert_eq!(t.translation, Vec3::ZERO);
    }

    #[test]
    fn pitch_is_clamped_and_yaw_wraps() {
        let c = controller_with(&[KeyCode::ArrowUp]);
        let mut t = Transform::default();
        c.move_in_plane_xz(10.0, &mut t);
        assert_eq!(t.rotation.x, MAX_PITCH);

        let c = controller_with(&[KeyCode::ArrowLeft]);
        let mut t = Transform::default();
        c.move_in_plane_xz(1.0, &mut t);
        assert!((t.rotation.y - (TAU - 1.0)).abs() < 1e-5);
    }

    #[test]
    fn unmapped_keys_are_ignored() {
        let c = controller_with(&[KeyCode::KeyZ]);
        assert!(c.held().is_empty());
    }

    #[test]
    fn look_at_straight_ahead_is_zero() {
        let r = look_at_rotation(Vec3::new(0.0, 0.0, -2.5), Vec3::ZERO);
        assert!(r.abs_diff_eq(Vec3::ZERO, 1e-6));
    }

    #[test]
    fn look_at_matches_camera_forward() {
        let from = Vec3::new(-1.0, -2.0, -2.0);
        let to = Vec3::new(0.5, 0.0, 1.0);
        let r = look_at_rotation(from, to);
        let mut cam = Camera::default();
        cam.set_view_yxz(from, r);
        let ahead = cam.view().transform_point3(to);
        // target lies on the camera's +z axis
        assert!(ahead.x.abs() < 1e-4 && ahead.y.abs() < 1e-4);
        assert!(ahead.z > 0.0);
    }
}
