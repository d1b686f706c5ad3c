// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use anyhow::{Context, Result};
use ash::prelude::VkResult;
use ash::vk;
use lantern_render::{RenderSize, MAX_FRAMES_IN_FLIGHT};
use tracing::info;

use crate::device::Device;

/// Requested presentation behaviour. Unsupported choices fall back to FIFO,
/// which every implementation provides.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PresentMode {
    Fifo,
    #[default]
    Mailbox,
    Immediate,
}

impl PresentMode {
    fn to_vk(self) -> vk::PresentModeKHR {
        match self {
            PresentMode::Fifo => vk::PresentModeKHR::FIFO,
            PresentMode::Mailbox => vk::PresentModeKHR::MAILBOX,
            PresentMode::Immediate => vk::PresentModeKHR::IMMEDIATE,
        }
    }
}

pub(crate) fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .unwrap_or(formats[0])
}

pub(crate) fn choose_present_mode(modes: &[vk::PresentModeKHR], wanted: PresentMode) -> vk::PresentModeKHR {
    let want = wanted.to_vk();
    if modes.contains(&want) {
        want
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// The surface's fixed extent when it has one, otherwise the window size
/// clamped to what the surface allows.
pub(crate) fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, window: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: window
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: window
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One more than the minimum, capped by the maximum (0 means no maximum).
pub(crate) fn image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let want = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        want.min(caps.max_image_count)
    } else {
        want
    }
}

struct DepthAttachment {
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
}

/// Presentable images plus everything that has to be rebuilt with them:
/// per-image depth buffers, the render pass, framebuffers and the
/// acquire/submit synchronisation.
pub struct Swapchain {
    device: Arc<Device>,
    swapchain: vk::SwapchainKHR,
    image_format: vk::Format,
    depth_format: vk::Format,
    extent: vk::Extent2D,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    depth: Vec<DepthAttachment>,
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
    // per frame slot
    image_available: Vec<vk::Semaphore>,
    in_flight: Vec<vk::Fence>,
    // per swapchain image
    render_finished: Vec<vk::Semaphore>,
    images_in_flight: Vec<vk::Fence>,
    current_frame: usize,
}

impl Swapchain {
    /// Builds a swapchain for `window`. When `previous` is given its handle
    /// is passed as `old_swapchain` and its frame slot carries over; the
    /// caller drops it afterwards.
    pub fn new(
        device: Arc<Device>,
        window: RenderSize,
        present_mode: PresentMode,
        previous: Option<&Swapchain>,
    ) -> Result<Self> {
        let mut sc = Self {
            device,
            swapchain: vk::SwapchainKHR::null(),
            image_format: vk::Format::UNDEFINED,
            depth_format: vk::Format::UNDEFINED,
            extent: vk::Extent2D::default(),
            images: Vec::new(),
            image_views: Vec::new(),
            depth: Vec::new(),
            render_pass: vk::RenderPass::null(),
            framebuffers: Vec::new(),
            image_available: Vec::new(),
            in_flight: Vec::new(),
            render_finished: Vec::new(),
            images_in_flight: Vec::new(),
            current_frame: previous.map_or(0, |p| p.current_frame),
        };
        // partially built state is released by Drop on error
        let old = previous.map_or(vk::SwapchainKHR::null(), |p| p.swapchain);
        unsafe {
            sc.create_swapchain(window, present_mode, old)?;
            sc.create_image_views()?;
            sc.create_render_pass()?;
            sc.create_depth_resources()?;
            sc.create_framebuffers()?;
            sc.create_sync_objects()?;
        }
        Ok(sc)
    }

    unsafe fn create_swapchain(
        &mut self,
        window: RenderSize,
        present_mode: PresentMode,
        old_swapchain: vk::SwapchainKHR,
    ) -> Result<()> {
        let support = self.device.surface_support()?;
        let caps = support.capabilities;
        let surface_format = choose_surface_format(&support.formats);
        let mode = choose_present_mode(&support.present_modes, present_mode);
        let extent = choose_extent(&caps, window);
        let min_count = image_count(&caps);

        let families = self.device.queue_families();
        let family_indices = [families.graphics, families.present];
        let (sharing_mode, index_count) = if families.graphics != families.present {
            (vk::SharingMode::CONCURRENT, 2)
        } else {
            (vk::SharingMode::EXCLUSIVE, 0)
        };

        let swap_info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: self.device.surface(),
            min_image_count: min_count,
            image_format: surface_format.format,
            image_color_space: surface_format.color_space,
            image_extent: extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: sharing_mode,
            queue_family_index_count: index_count,
            p_queue_family_indices: family_indices.as_ptr(),
            pre_transform: caps.current_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode: mode,
            clipped: vk::TRUE,
            old_swapchain,
            ..Default::default()
        };

        let loader = self.device.swapchain_loader();
        self.swapchain = unsafe { loader.create_swapchain(&swap_info, None) }.context("create_swapchain")?;
        self.images = unsafe { loader.get_swapchain_images(self.swapchain) }?;
        self.image_format = surface_format.format;
        self.extent = extent;

        info!(
            "swapchain: format {:?} / {:?}, present mode {:?}, extent {}x{}, images {} (min {})",
            surface_format.format,
            surface_format.color_space,
            mode,
            extent.width,
            extent.height,
            self.images.len(),
            caps.min_image_count
        );
        Ok(())
    }

    unsafe fn create_image_views(&mut self) -> Result<()> {
        let d = self.device.handle();
        for &image in &self.images {
            let iv_info = vk::ImageViewCreateInfo {
                s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
                image,
                view_type: vk::ImageViewType::TYPE_2D,
                format: self.image_format,
                subresource_range: subresource_range(vk::ImageAspectFlags::COLOR),
                ..Default::default()
            };
            self.image_views
                .push(unsafe { d.create_image_view(&iv_info, None) }?);
        }
        Ok(())
    }

    unsafe fn create_render_pass(&mut self) -> Result<()> {
        self.depth_format = self.device.find_supported_format(
            &[
                vk::Format::D32_SFLOAT,
                vk::Format::D32_SFLOAT_S8_UINT,
                vk::Format::D24_UNORM_S8_UINT,
            ],
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        )?;

        let attachments = [
            vk::AttachmentDescription {
                format: self.image_format,
                samples: vk::SampleCountFlags::TYPE_1,
                load_op: vk::AttachmentLoadOp::CLEAR,
                store_op: vk::AttachmentStoreOp::STORE,
                stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
                stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
                ..Default::default()
            },
            vk::AttachmentDescription {
                format: self.depth_format,
                samples: vk::SampleCountFlags::TYPE_1,
                load_op: vk::AttachmentLoadOp::CLEAR,
                store_op: vk::AttachmentStoreOp::DONT_CARE,
                stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
                stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                ..Default::default()
            },
        ];
        let color_ref = vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        };
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };
        let subpass = vk::SubpassDescription {
            pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
            color_attachment_count: 1,
            p_color_attachments: &color_ref,
            p_depth_stencil_attachment: &depth_ref,
            ..Default::default()
        };
        let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
        let dependency = vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: stages,
            src_access_mask: vk::AccessFlags::empty(),
            dst_stage_mask: stages,
            dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            ..Default::default()
        };
        let rp_info = vk::RenderPassCreateInfo {
            s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
            attachment_count: attachments.len() as u32,
            p_attachments: attachments.as_ptr(),
            subpass_count: 1,
            p_subpasses: &subpass,
            dependency_count: 1,
            p_dependencies: &dependency,
            ..Default::default()
        };
        self.render_pass = unsafe { self.device.handle().create_render_pass(&rp_info, None) }
            .context("create_render_pass")?;
        Ok(())
    }

    unsafe fn create_depth_resources(&mut self) -> Result<()> {
        for _ in 0..self.images.len() {
            let img_ci = vk::ImageCreateInfo {
                s_type: vk::StructureType::IMAGE_CREATE_INFO,
                image_type: vk::ImageType::TYPE_2D,
                format: self.depth_format,
                extent: vk::Extent3D {
                    width: self.extent.width,
                    height: self.extent.height,
                    depth: 1,
                },
                mip_levels: 1,
                array_layers: 1,
                samples: vk::SampleCountFlags::TYPE_1,
                tiling: vk::ImageTiling::OPTIMAL,
                usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                sharing_mode: vk::SharingMode::EXCLUSIVE,
                ..Default::default()
            };
            let (image, memory) = self
                .device
                .create_image_with_info(&img_ci, vk::MemoryPropertyFlags::DEVICE_LOCAL)?;
            let view_ci = vk::ImageViewCreateInfo {
                s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
                image,
                view_type: vk::ImageViewType::TYPE_2D,
                format: self.depth_format,
                subresource_range: subresource_range(vk::ImageAspectFlags::DEPTH),
                ..Default::default()
            };
            let view = match unsafe { self.device.handle().create_image_view(&view_ci, None) } {
                Ok(v) => v,
                Err(e) => {
                    unsafe {
                        self.device.handle().destroy_image(image, None);
                        self.device.handle().free_memory(memory, None);
                    }
                    return Err(e).context("depth image view");
                }
            };
            self.depth.push(DepthAttachment { image, memory, view });
        }
        Ok(())
    }

    unsafe fn create_framebuffers(&mut self) -> Result<()> {
        for (i, &color) in self.image_views.iter().enumerate() {
            let attachments = [color, self.depth[i].view];
            let fb_info = vk::FramebufferCreateInfo {
                s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
                render_pass: self.render_pass,
                attachment_count: attachments.len() as u32,
                p_attachments: attachments.as_ptr(),
                width: self.extent.width,
                height: self.extent.height,
                layers: 1,
                ..Default::default()
            };
            self.framebuffers
                .push(unsafe { self.device.handle().create_framebuffer(&fb_info, None) }?);
        }
        Ok(())
    }

    unsafe fn create_sync_objects(&mut self) -> Result<()> {
        let d = self.device.handle();
        let sem_ci = vk::SemaphoreCreateInfo::default();
        let fence_ci = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: vk::FenceCreateFlags::SIGNALED,
            ..Default::default()
        };
        unsafe {
            for _ in 0..MAX_FRAMES_IN_FLIGHT {
                self.image_available.push(d.create_semaphore(&sem_ci, None)?);
                self.in_flight.push(d.create_fence(&fence_ci, None)?);
            }
            for _ in 0..self.images.len() {
                self.render_finished.push(d.create_semaphore(&sem_ci, None)?);
            }
        }
        self.images_in_flight = vec![vk::Fence::null(); self.images.len()];
        Ok(())
    }

    /// Waits for the current slot's fence, then acquires the next image.
    /// Returns the image index and whether the swapchain is suboptimal.
    pub fn acquire_next_image(&self) -> VkResult<(u32, bool)> {
        let fence = self.in_flight[self.current_frame];
        unsafe {
            self.device
                .handle()
                .wait_for_fences(std::slice::from_ref(&fence), true, u64::MAX)?;
            self.device.swapchain_loader().acquire_next_image(
                self.swapchain,
                u64::MAX,
                self.image_available[self.current_frame],
                vk::Fence::null(),
            )
        }
    }

    /// Submits `buffers` for `image_index` and presents it. The frame slot
    /// advances whether or not presentation succeeds; the result is the
    /// present result (`Ok(true)` when suboptimal).
    pub fn submit_command_buffers(&mut self, buffers: &[vk::CommandBuffer], image_index: u32) -> VkResult<bool> {
        let d = self.device.handle();
        let img = image_index as usize;
        let frame = self.current_frame;

        unsafe {
            // another slot may still be rendering into this image
            let previous = self.images_in_flight[img];
            if previous != vk::Fence::null() {
                d.wait_for_fences(std::slice::from_ref(&previous), true, u64::MAX)?;
            }
            self.images_in_flight[img] = self.in_flight[frame];

            let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
            let submit = vk::SubmitInfo {
                s_type: vk::StructureType::SUBMIT_INFO,
                wait_semaphore_count: 1,
                p_wait_semaphores: &self.image_available[frame],
                p_wait_dst_stage_mask: wait_stages.as_ptr(),
                command_buffer_count: buffers.len() as u32,
                p_command_buffers: buffers.as_ptr(),
                signal_semaphore_count: 1,
                p_signal_semaphores: &self.render_finished[img],
                ..Default::default()
            };
            d.reset_fences(std::slice::from_ref(&self.in_flight[frame]))?;
            d.queue_submit(
                self.device.graphics_queue(),
                std::slice::from_ref(&submit),
                self.in_flight[frame],
            )?;

            let present = vk::PresentInfoKHR {
                s_type: vk::StructureType::PRESENT_INFO_KHR,
                wait_semaphore_count: 1,
                p_wait_semaphores: &self.render_finished[img],
                swapchain_count: 1,
                p_swapchains: &self.swapchain,
                p_image_indices: &image_index,
                ..Default::default()
            };
            let result = self
                .device
                .swapchain_loader()
                .queue_present(self.device.present_queue(), &present);

            self.current_frame = (self.current_frame + 1) % MAX_FRAMES_IN_FLIGHT;
            result
        }
    }

    /// True when image and depth formats match, i.e. pipelines built
    /// against `other`'s render pass remain valid.
    pub fn compare_swap_formats(&self, other: &Swapchain) -> bool {
        self.image_format == other.image_format && self.depth_format == other.depth_format
    }

    pub fn framebuffer(&self, index: usize) -> vk::Framebuffer {
        self.framebuffers[index]
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn image_view(&self, index: usize) -> vk::ImageView {
        self.image_views[index]
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn image_format(&self) -> vk::Format {
        self.image_format
    }

    pub fn depth_format(&self) -> vk::Format {
        self.depth_format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn width(&self) -> u32 {
        self.extent.width
    }

    pub fn height(&self) -> u32 {
        self.extent.height
    }

    pub fn extent_aspect_ratio(&self) -> f32 {
        self.extent.width as f32 / self.extent.height as f32
    }

    pub fn current_frame(&self) -> usize {
        self.current_frame
    }
}

// Callers wait for the device to go idle before dropping a swapchain.
impl Drop for Swapchain {
    fn drop(&mut self) {
        let d = self.device.handle();
        unsafe {
            for &view in &self.image_views {
                d.destroy_image_view(view, None);
            }
            self.image_views.clear();

            if self.swapchain != vk::SwapchainKHR::null() {
                self.device
                    .swapchain_loader()
                    .destroy_swapchain(self.swapchain, None);
                self.swapchain = vk::SwapchainKHR::null();
            }

            for depth in self.depth.drain(..) {
                d.destroy_image_view(depth.view, None);
                d.destroy_image(depth.image, None);
                d.free_memory(depth.memory, None);
            }

            for &fb in &self.framebuffers {
                d.destroy_framebuffer(fb, None);
            }
            self.framebuffers.clear();

            if self.render_pass != vk::RenderPass::null() {
                d.destroy_render_pass(self.render_pass, None);
                self.render_pass = vk::RenderPass::null();
            }

            for s in self.image_available.drain(..).chain(self.render_finished.drain(..)) {
                d.destroy_semaphore(s, None);
            }
            for f in self.in_flight.drain(..) {
                d.destroy_fence(f, None);
            }
            self.images_in_flight.clear();
        }
    }
}

fn subresource_range(aspect_mask: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR { format, color_space }
    }

    #[test]
    fn prefers_bgra_srgb() {
        let formats = [
            fmt(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            fmt(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(choose_surface_format(&formats).format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn falls_back_to_first_format() {
        let formats = [
            fmt(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            fmt(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT),
        ];
        assert_eq!(choose_surface_format(&formats).format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn present_mode_uses_preference_when_available() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(
            choose_present_mode(&modes, PresentMode::Mailbox),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&modes, PresentMode::Immediate),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn fixed_surface_extent_wins() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D { width: 640, height: 480 },
            ..Default::default()
        };
        let e = choose_extent(&caps, RenderSize { width: 800, height: 600 });
        assert_eq!((e.width, e.height), (640, 480));
    }

    #[test]
    fn free_extent_is_clamped() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D { width: u32::MAX, height: u32::MAX },
            min_image_extent: vk::Extent2D { width: 16, height: 16 },
            max_image_extent: vk::Extent2D { width: 1024, height: 1024 },
            ..Default::default()
        };
        let e = choose_extent(&caps, RenderSize { width: 4000, height: 8 });
        assert_eq!((e.width, e.height), (1024, 16));
    }

    #[test]
    fn image_count_is_min_plus_one_capped() {
        let mut caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(image_count(&caps), 3);
        caps.max_image_count = 2;
        assert_eq!(image_count(&caps), 2);
    }

    #[test]
    fn subresource_range_covers_one_level_of_the_given_aspect() {
        let depth = subresource_range(vk::ImageAspectFlags::DEPTH);
        assert_eq!(depth.aspect_mask, vk::ImageAspectFlags::DEPTH);
        assert_eq!((depth.level_count, depth.layer_count), (1, 1));
        assert_eq!(
            subresource_range(vk::ImageAspectFlags::COLOR).aspect_mask,
            vk::ImageAspectFlags::COLOR
        );
    }
}
