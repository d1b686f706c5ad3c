// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use anyhow::{Context, Result};
use ash::vk;
use lantern_render::RenderError;
use tracing::info;

use crate::device::Device;
use crate::mesh;

/// Fixed-function state for a graphics pipeline. Plain data only; the
/// create-info structs are assembled when the pipeline is built.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub binding_descriptions: Vec<vk::VertexInputBindingDescription>,
    pub attribute_descriptions: Vec<vk::VertexInputAttributeDescription>,
    pub topology: vk::PrimitiveTopology,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub color_blend_attachment: vk::PipelineColorBlendAttachmentState,
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare_op: vk::CompareOp,
    pub dynamic_states: Vec<vk::DynamicState>,
    pub pipeline_layout: vk::PipelineLayout,
    pub render_pass: vk::RenderPass,
    pub subpass: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            binding_descriptions: mesh::binding_descriptions(),
            attribute_descriptions: mesh::attribute_descriptions(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::CLOCKWISE,
            color_blend_attachment: vk::PipelineColorBlendAttachmentState {
                blend_enable: vk::FALSE,
                src_color_blend_factor: vk::BlendFactor::ONE,
                dst_color_blend_factor: vk::BlendFactor::ZERO,
                color_blend_op: vk::BlendOp::ADD,
                src_alpha_blend_factor: vk::BlendFactor::ONE,
                dst_alpha_blend_factor: vk::BlendFactor::ZERO,
                alpha_blend_op: vk::BlendOp::ADD,
                color_write_mask: vk::ColorComponentFlags::RGBA,
            },
            depth_test: true,
            depth_write: true,
            depth_compare_op: vk::CompareOp::LESS,
            dynamic_states: vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR],
            pipeline_layout: vk::PipelineLayout::null(),
            render_pass: vk::RenderPass::null(),
            subpass: 0,
        }
    }
}

impl PipelineConfig {
    /// Standard "over" blending on colour, alpha passed through.
    pub fn enable_alpha_blending(&mut self) {
        self.color_blend_attachment = vk::PipelineColorBlendAttachmentState {
            blend_enable: vk::TRUE,
            src_color_blend_factor: vk::BlendFactor::SRC_ALPHA,
            dst_color_blend_factor: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
            color_blend_op: vk::BlendOp::ADD,
            src_alpha_blend_factor: vk::BlendFactor::ONE,
            dst_alpha_blend_factor: vk::BlendFactor::ZERO,
            alpha_blend_op: vk::BlendOp::ADD,
            color_write_mask: vk::ColorComponentFlags::RGBA,
        };
    }

    /// Drops all vertex input, for pipelines that generate geometry in the
    /// vertex shader.
    pub fn without_vertex_input(&mut self) {
        self.binding_descriptions.clear();
        self.attribute_descriptions.clear();
    }

    fn check(&self) -> Result<(), RenderError> {
        if self.pipeline_layout == vk::PipelineLayout::null() {
            return Err(RenderError::MissingPipelineLayout);
        }
        if self.render_pass == vk::RenderPass::null() {
            return Err(RenderError::MissingRenderPass);
        }
        Ok(())
    }
}

pub struct Pipeline {
    device: Arc<Device>,
    pipeline: vk::Pipeline,
}

impl Pipeline {
    pub fn new(
        device: Arc<Device>,
        vert_code: &[u32],
        frag_code: &[u32],
        config: &PipelineConfig,
    ) -> Result<Self> {
        config.check()?;

        let d = device.handle();
        unsafe {
            let vert = create_shader_module(d, vert_code)?;
            let frag = match create_shader_module(d, frag_code) {
                Ok(m) => m,
                Err(e) => {
                    d.destroy_shader_module(vert, None);
                    return Err(e);
                }
            };
            let result = create_graphics_pipeline(d, vert, frag, config);
            // modules are only needed during pipeline creation
            d.destroy_shader_module(vert, None);
            d.destroy_shader_module(frag, None);
            let pipeline = result?;

            info!("graphics pipeline created");
            Ok(Self { device, pipeline })
        }
    }

    pub fn bind(&self, cmd: vk::CommandBuffer) {
        unsafe {
            self.device
                .handle()
                .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline)
        };
    }

    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_pipeline(self.pipeline, None) };
    }
}

unsafe fn create_shader_module(d: &ash::Device, code: &[u32]) -> Result<vk::ShaderModule> {
    let ci = vk::ShaderModuleCreateInfo {
        s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
        code_size: code.len() * 4,
        p_code: code.as_ptr(),
        ..Default::default()
    };
    Ok(unsafe { d.create_shader_module(&ci, None) }.context("create_shader_module")?)
}

unsafe fn create_graphics_pipeline(
    d: &ash::Device,
    vert: vk::ShaderModule,
    frag: vk::ShaderModule,
    config: &PipelineConfig,
) -> Result<vk::Pipeline> {
    let entry = c"main";
    let stages = [
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::VERTEX,
            module: vert,
            p_name: entry.as_ptr(),
            ..Default::default()
        },
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::FRAGMENT,
            module: frag,
            p_name: entry.as_ptr(),
            ..Default::default()
        },
    ];

    let vertex_input = vk::PipelineVertexInputStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
        vertex_binding_description_count: config.binding_descriptions.len() as u32,
        p_vertex_binding_descriptions: config.binding_descriptions.as_ptr(),
        vertex_attribute_description_count: config.attribute_descriptions.len() as u32,
        p_vertex_attribute_descriptions: config.attribute_descriptions.as_ptr(),
        ..Default::default()
    };
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
        topology: config.topology,
        primitive_restart_enable: vk::FALSE,
        ..Default::default()
    };
    // viewport and scissor are dynamic, only the counts matter here
    let viewport_state = vk::PipelineViewportStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
        viewport_count: 1,
        scissor_count: 1,
        ..Default::default()
    };
    let rasterization = vk::PipelineRasterizationStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
        depth_clamp_enable: vk::FALSE,
        rasterizer_discard_enable: vk::FALSE,
        polygon_mode: config.polygon_mode,
        cull_mode: config.cull_mode,
        front_face: config.front_face,
        depth_bias_enable: vk::FALSE,
        line_width: 1.0,
        ..Default::default()
    };
    let multisample = vk::PipelineMultisampleStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
        rasterization_samples: vk::SampleCountFlags::TYPE_1,
        sample_shading_enable: vk::FALSE,
        min_sample_shading: 1.0,
        ..Default::default()
    };
    let color_blend = vk::PipelineColorBlendStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
        logic_op_enable: vk::FALSE,
        logic_op: vk::LogicOp::COPY,
        attachment_count: 1,
        p_attachments: &config.color_blend_attachment,
        ..Default::default()
    };
    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_DEPTH_STENCIL_STATE_CREATE_INFO,
        depth_test_enable: config.depth_test.into(),
        depth_write_enable: config.depth_write.into(),
        depth_compare_op: config.depth_compare_op,
        depth_bounds_test_enable: vk::FALSE,
        stencil_test_enable: vk::FALSE,
        min_depth_bounds: 0.0,
        max_depth_bounds: 1.0,
        ..Default::default()
    };
    let dynamic = vk::PipelineDynamicStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
        dynamic_state_count: config.dynamic_states.len() as u32,
        p_dynamic_states: config.dynamic_states.as_ptr(),
        ..Default::default()
    };

    let ci = vk::GraphicsPipelineCreateInfo {
        s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
        stage_count: stages.len() as u32,
        p_stages: stages.as_ptr(),
        p_vertex_input_state: &vertex_input,
        p_input_assembly_state: &input_assembly,
        p_viewport_state: &viewport_state,
        p_rasterization_state: &rasterization,
        p_multisample_state: &multisample,
        p_color_blend_state: &color_blend,
        p_depth_stencil_state: &depth_stencil,
        p_dynamic_state: &dynamic,
        layout: config.pipeline_layout,
        render_pass: config.render_pass,
        subpass: config.subpass,
        base_pipeline_index: -1,
        ..Default::default()
    };

    let pipelines = unsafe {
        d.create_graphics_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&ci), None)
    }
    .map_err(|(_, e)| e)
    .context("failed to create graphics pipeline")?;
    Ok(pipelines[0])
}

/// Pipeline layout with one push-constant range visible to the vertex and
/// fragment stages.
pub struct PipelineLayout {
    device: Arc<Device>,
    layout: vk::PipelineLayout,
}

impl PipelineLayout {
    pub fn new(
        device: Arc<Device>,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_size: u32,
    ) -> Result<Self> {
        let range = vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            offset: 0,
            size: push_constant_size,
        };
        let ci = vk::PipelineLayoutCreateInfo {
            s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
            set_layout_count: set_layouts.len() as u32,
            p_set_layouts: set_layouts.as_ptr(),
            push_constant_range_count: 1,
            p_push_constant_ranges: &range,
            ..Default::default()
        };
        let layout = unsafe { device.handle().create_pipeline_layout(&ci, None) }
            .context("failed to create pipeline layout")?;
        Ok(Self { device, layout })
    }

    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }

    /// Pushes `value` to both stages at offset 0.
    pub fn push<T: bytemuck::Pod>(&self, cmd: vk::CommandBuffer, value: &T) {
        unsafe {
            self.device.handle().cmd_push_constants(
                cmd,
                self.layout,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                0,
                bytemuck::bytes_of(value),
            )
        };
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_pipeline_layout(self.layout, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_layout() -> vk::PipelineLayout {
        use ash::vk::Handle;
        vk::PipelineLayout::from_raw(1)
    }

    #[test]
    fn default_config_matches_mesh_pipeline() {
        let c = PipelineConfig::default();
        assert_eq!(c.attribute_descriptions.len(), 4);
        assert_eq!(c.binding_descriptions.len(), 1);
        assert_eq!(c.cull_mode, vk::CullModeFlags::NONE);
        assert_eq!(c.depth_compare_op, vk::CompareOp::LESS);
        assert_eq!(c.color_blend_attachment.blend_enable, vk::FALSE);
        assert_eq!(c.dynamic_states.len(), 2);
    }

    #[test]
    fn alpha_blending_uses_src_alpha() {
        let mut c = PipelineConfig::default();
        c.enable_alpha_blending();
        c.without_vertex_input();
        assert_eq!(c.color_blend_attachment.blend_enable, vk::TRUE);
        assert_eq!(
            c.color_blend_attachment.dst_color_blend_factor,
            vk::BlendFactor::ONE_MINUS_SRC_ALPHA
        );
        assert!(c.attribute_descriptions.is_empty());
    }

    #[test]
    fn missing_layout_is_rejected_first() {
        let c = PipelineConfig::default();
        assert!(matches!(c.check(), Err(RenderError::MissingPipelineLayout)));
    }

    #[test]
    fn missing_render_pass_is_rejected() {
        let c = PipelineConfig {
            pipeline_layout: dummy_layout(),
            ..Default::default()
        };
        assert!(matches!(c.check(), Err(RenderError::MissingRenderPass)));
    }
}
