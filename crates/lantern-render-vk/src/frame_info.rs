// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use lantern_math::Camera;
use lantern_render::Scene;

use crate::mesh::Mesh;

/// Everything a render system needs to record one frame.
pub struct FrameInfo<'a> {
    pub frame_index: usize,
    pub frame_time: f32,
    pub command_buffer: vk::CommandBuffer,
    pub camera: &'a Camera,
    pub global_descriptor_set: vk::DescriptorSet,
    pub scene: &'a Scene<Mesh>,
}
