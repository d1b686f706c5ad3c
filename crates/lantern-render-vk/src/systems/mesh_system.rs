// SPDX-License-Identifier: CEPL-1.0
use std::mem::size_of;
use std::sync::Arc;

use anyhow::Result;
use ash::vk;
use glam::Mat4;
use lantern_render::MeshPushConstants;

use crate::device::Device;
use crate::frame_info::FrameInfo;
use crate::pipeline::{Pipeline, PipelineConfig, PipelineLayout};
use crate::shaders::ShaderSource;

/// Draws every scene object that has a mesh, lit by the global uniform
/// block in set 0.
pub struct MeshRenderSystem {
    device: Arc<Device>,
    // pipeline first: it is destroyed before the layout it was built with
    pipeline: Pipeline,
    layout: PipelineLayout,
}

impl MeshRenderSystem {
    pub fn new(
        device: Arc<Device>,
        render_pass: vk::RenderPass,
        global_set_layout: vk::DescriptorSetLayout,
        shaders: ShaderSource<'_>,
    ) -> Result<Self> {
        let layout = PipelineLayout::new(
            device.clone(),
            &[global_set_layout],
            size_of::<MeshPushConstants>() as u32,
        )?;
        let config = PipelineConfig {
            pipeline_layout: layout.handle(),
            render_pass,
            ..Default::default()
        };
        let pipeline = Pipeline::new(
            device.clone(),
            &shaders.load("simple_shader.vert")?,
            &shaders.load("simple_shader.frag")?,
            &config,
        )?;
        Ok(Self {
            device,
            pipeline,
            layout,
        })
    }

    pub fn render(&self, frame: &FrameInfo<'_>) {
        let cmd = frame.command_buffer;
        self.pipeline.bind(cmd);
        unsafe {
            self.device.handle().cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.layout.handle(),
                0,
                &[frame.global_descriptor_set],
                &[],
            );
        }

        for obj in frame.scene.objects() {
            let Some(mesh) = obj.mesh().and_then(|h| frame.scene.mesh(h)) else {
                continue;
            };
            let push = MeshPushConstants {
                model_matrix: obj.transform.mat4(),
                normal_matrix: Mat4::from_mat3(obj.transform.normal_matrix()),
            };
            self.layout.push(cmd, &push);
            mesh.bind(cmd);
            mesh.draw(cmd);
        }
    }
}
