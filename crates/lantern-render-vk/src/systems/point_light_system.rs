// SPDX-License-Identifier: CEPL-1.0
use std::mem::size_of;
use std::sync::Arc;

use anyhow::Result;
use ash::vk;
use lantern_render::{collect_point_lights, lights_back_to_front, GlobalUbo, PointLightPushConstants};

use crate::device::Device;
use crate::frame_info::FrameInfo;
use crate::pipeline::{Pipeline, PipelineConfig, PipelineLayout};
use crate::shaders::ShaderSource;

/// Billboarded light markers. The quad is generated in the vertex shader,
/// so the pipeline has no vertex input; markers are alpha blended and drawn
/// back to front.
pub struct PointLightSystem {
    device: Arc<Device>,
    pipeline: Pipeline,
    layout: PipelineLayout,
}

impl PointLightSystem {
    pub fn new(
        device: Arc<Device>,
        render_pass: vk::RenderPass,
        global_set_layout: vk::DescriptorSetLayout,
        shaders: ShaderSource<'_>,
    ) -> Result<Self> {
        let layout = PipelineLayout::new(
            device.clone(),
            &[global_set_layout],
            size_of::<PointLightPushConstants>() as u32,
        )?;
        let mut config = PipelineConfig {
            pipeline_layout: layout.handle(),
            render_pass,
            ..Default::default()
        };
        config.enable_alpha_blending();
        config.without_vertex_input();
        let pipeline = Pipeline::new(
            device.clone(),
            &shaders.load("point_light.vert")?,
            &shaders.load("point_light.frag")?,
            &config,
        )?;
        Ok(Self {
            device,
            pipeline,
            layout,
        })
    }

    /// Copies every light in the scene into `ubo`.
    pub fn update(&self, frame: &FrameInfo<'_>, ubo: &mut GlobalUbo) {
        collect_point_lights(frame.scene, ubo);
    }

    pub fn render(&self, frame: &FrameInfo<'_>) {
        let lights = lights_back_to_front(frame.scene, frame.camera.position());
        if lights.is_empty() {
            return;
        }

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

        for obj in lights {
            let Some(light) = obj.point_light else {
                continue;
            };
            let push = PointLightPushConstants::new(
                obj.transform.translation.extend(1.0),
                obj.color.extend(light.intensity),
                obj.transform.scale.x,
            );
            self.layout.push(cmd, &push);
            unsafe { self.device.handle().cmd_draw(cmd, 6, 1, 0, 0) };
        }
    }
}
