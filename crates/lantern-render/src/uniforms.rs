// SPDX-License-Identifier: CEPL-1.0
//! Host-side mirrors of shader-visible blocks. Field order and padding follow
//! std140 for the uniform block and the push-constant rules for the rest.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};

/// Lights the global uniform block has room for.
pub const MAX_LIGHTS: usize = 10;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct PointLight {
    /// w ignored.
    pub position: Vec4,
    /// w is intensity.
    pub color: Vec4,
}

/// Set 0, binding 0 of every pipeline.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct GlobalUbo {
    pub projection: Mat4,
    pub view: Mat4,
    pub inverse_view: Mat4,
    /// rgb + intensity in w.
    pub ambient_light_color: Vec4,
    pub point_lights: [PointLight; MAX_LIGHTS],
    pub num_lights: i32,
    pub _pad: [i32; 3],
}

impl Default for GlobalUbo {
    fn default() -> Self {
        Self {
            projection: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
            inverse_view: Mat4::IDENTITY,
            ambient_light_color: Vec4::new(1.0, 1.0, 1.0, 0.02),
            point_lights: [PointLight::default(); MAX_LIGHTS],
            num_lights: 0,
            _pad: [0; 3],
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct MeshPushConstants {
    pub model_matrix: Mat4,
    /// Only the upper 3x3 is meaningful; a full mat4 keeps the layout simple.
    pub normal_matrix: Mat4,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct PointLightPushConstants {
    pub position: Vec4,
    pub color: Vec4,
    pub radius: f32,
    pub _pad: [f32; 3],
}

impl PointLightPushConstants {
    pub fn new(position: Vec4, color: Vec4, radius: f32) -> Self {
        Self {
            position,
            color,
            radius,
            _pad: [0.0; 3],
        }
    }
}
