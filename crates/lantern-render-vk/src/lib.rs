// SPDX-License-Identifier: CEPL-1.0
//! Vulkan backend: device and swapchain management, GPU buffers, descriptor
//! sets, pipelines, meshes, the frame orchestrator and the render systems.
#![deny(unsafe_op_in_unsafe_fn)]

mod buffer;
mod descriptors;
mod device;
mod frame_info;
mod mesh;
mod pipeline;
mod renderer;
mod shaders;
mod swapchain;
pub mod systems;

pub use ash::vk;
pub use buffer::{alignment, Buffer};
pub use descriptors::{
    DescriptorPool, DescriptorPoolBuilder, DescriptorSetLayout, DescriptorSetLayoutBuilder,
    DescriptorWriter, LayoutBinding,
};
pub use device::{Device, QueueFamilies, SurfaceSupport};
pub use frame_info::FrameInfo;
pub use mesh::{attribute_descriptions, binding_descriptions, Mesh};
pub use pipeline::{Pipeline, PipelineConfig, PipelineLayout};
pub use renderer::Renderer;
pub use shaders::ShaderSource;
pub use swapchain::{PresentMode, Swapchain};
