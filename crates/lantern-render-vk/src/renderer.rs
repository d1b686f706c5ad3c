// SPDX-License-Identifier: CEPL-1.0
//! Frame orchestration: owns the swapchain and one command buffer per frame
//! slot, and drives acquire, record, submit and present.

use std::sync::Arc;

use anyhow::{Context, Result};
use ash::prelude::VkResult;
use ash::vk;
use glam::Vec4;
use lantern_render::{
    acquire_outcome, present_outcome, FrameCycle, RecreateGate, RenderError, SurfaceStatus, SwapchainOutcome,
    WindowSurface, MAX_FRAMES_IN_FLIGHT,
};
use tracing::{debug, info};

use crate::device::Device;
use crate::swapchain::{PresentMode, Swapchain};

/// Folds the `ERROR_OUT_OF_DATE_KHR` error and the suboptimal flag of an
/// acquire or present into a status; anything else stays an error.
fn surface_status(result: VkResult<bool>) -> Result<SurfaceStatus, vk::Result> {
    match result {
        Ok(false) => Ok(SurfaceStatus::Optimal),
        Ok(true) => Ok(SurfaceStatus::Suboptimal),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(SurfaceStatus::OutOfDate),
        Err(e) => Err(e),
    }
}

pub struct Renderer {
    device: Arc<Device>,
    swapchain: Swapchain,
    command_buffers: Vec<vk::CommandBuffer>,
    cycle: FrameCycle,
    clear_color: Vec4,
    present_mode: PresentMode,
    recreate: RecreateGate,
}

impl Renderer {
    pub fn new(
        device: Arc<Device>,
        window: &impl WindowSurface,
        present_mode: PresentMode,
        clear_color: Vec4,
    ) -> Result<Self> {
        let swapchain = Swapchain::new(device.clone(), window.extent(), present_mode, None)?;

        let ai = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: device.command_pool(),
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: MAX_FRAMES_IN_FLIGHT as u32,
            ..Default::default()
        };
        let command_buffers = unsafe { device.handle().allocate_command_buffers(&ai) }
            .context("allocate_command_buffers")?;

        Ok(Self {
            device,
            swapchain,
            command_buffers,
            cycle: FrameCycle::new(),
            clear_color,
            present_mode,
            recreate: RecreateGate::new(),
        })
    }

    /// Rebuilds the swapchain for the window's current extent. A zero
    /// extent (minimised window) defers the rebuild to the next
    /// `begin_frame`; returns whether a new swapchain exists.
    fn recreate_swapchain(&mut self, window: &impl WindowSurface) -> Result<bool> {
        let Some(extent) = self.recreate.request(window.extent()) else {
            debug!("window extent is zero, deferring swapchain recreation");
            return Ok(false);
        };
        self.device.wait_idle()?;

        let new = Swapchain::new(
            self.device.clone(),
            extent,
            self.present_mode,
            Some(&self.swapchain),
        )?;
        if !new.compare_swap_formats(&self.swapchain) {
            return Err(RenderError::SwapchainFormatChanged.into());
        }
        // old swapchain is retired here, after the new one took over
        self.swapchain = new;
        self.recreate.complete();
        info!(
            "swapchain recreated {}x{}",
            self.swapchain.width(),
            self.swapchain.height()
        );
        Ok(true)
    }

    /// Acquires the next image and begins recording. `None` means no frame
    /// can be drawn right now (swapchain out of date or window minimised);
    /// the caller simply skips this frame.
    pub fn begin_frame(&mut self, window: &mut impl WindowSurface) -> Result<Option<vk::CommandBuffer>> {
        assert!(
            !self.cycle.is_in_progress(),
            "can't call begin_frame while already in progress"
        );

        if self.recreate.is_pending() && !self.recreate_swapchain(window)? {
            return Ok(None);
        }

        let acquired = self.swapchain.acquire_next_image();
        match acquire_outcome(surface_status(acquired.map(|(_, suboptimal)| suboptimal))) {
            SwapchainOutcome::Continue => {}
            SwapchainOutcome::Recreate => {
                self.recreate_swapchain(window)?;
                return Ok(None);
            }
            SwapchainOutcome::Fatal(e) => return Err(e).context("failed to acquire swap chain image"),
        }
        let Ok((image_index, _)) = acquired else {
            unreachable!("acquire continues only on success");
        };

        self.cycle.begin(image_index);
        let cmd = self.current_command_buffer();
        let bi = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            ..Default::default()
        };
        let res = unsafe { self.device.handle().begin_command_buffer(cmd, &bi) };
        res.context("failed to begin recording command buffer")?;
        Ok(Some(cmd))
    }

    /// Finishes recording, submits and presents. Recreates the swapchain
    /// when presentation reports it stale or the window was resized.
    pub fn end_frame(&mut self, window: &mut impl WindowSurface) -> Result<()> {
        assert!(
            self.cycle.is_in_progress(),
            "can't call end_frame while frame is not in progress"
        );
        let cmd = self.current_command_buffer();
        let res = unsafe { self.device.handle().end_command_buffer(cmd) };
        res.context("failed to record command buffer")?;

        let image_index = self.cycle.image_index();
        let result = self
            .swapchain
            .submit_command_buffers(std::slice::from_ref(&cmd), image_index);
        // the slot advances even when presentation fails
        self.cycle.end();

        match present_outcome(surface_status(result), window.was_resized()) {
            SwapchainOutcome::Continue => {}
            SwapchainOutcome::Recreate => {
                window.reset_resized();
                self.recreate_swapchain(window)?;
            }
            SwapchainOutcome::Fatal(e) => return Err(e).context("failed to present swap chain image"),
        }
        Ok(())
    }

    pub fn begin_swapchain_render_pass(&self, cmd: vk::CommandBuffer) {
        assert!(
            self.cycle.is_in_progress(),
            "can't call begin_swapchain_render_pass if frame is not in progress"
        );
        assert_eq!(
            cmd,
            self.current_command_buffer(),
            "can't begin render pass on command buffer from a different frame"
        );

        let extent = self.swapchain.extent();
        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color.to_array(),
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];
        let rp_begin = vk::RenderPassBeginInfo {
            s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
            render_pass: self.swapchain.render_pass(),
            framebuffer: self
                .swapchain
                .framebuffer(self.cycle.image_index() as usize),
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            },
            clear_value_count: clear_values.len() as u32,
            p_clear_values: clear_values.as_ptr(),
            ..Default::default()
        };
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };

        let d = self.device.handle();
        unsafe {
            d.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);
            d.cmd_set_viewport(cmd, 0, std::slice::from_ref(&viewport));
            d.cmd_set_scissor(cmd, 0, std::slice::from_ref(&scissor));
        }
    }

    pub fn end_swapchain_render_pass(&self, cmd: vk::CommandBuffer) {
        assert!(
            self.cycle.is_in_progress(),
            "can't call end_swapchain_render_pass if frame is not in progress"
        );
        assert_eq!(
            cmd,
            self.current_command_buffer(),
            "can't end render pass on command buffer from a different frame"
        );
        unsafe { self.device.handle().cmd_end_render_pass(cmd) };
    }

    pub fn frame_index(&self) -> usize {
        assert!(
            self.cycle.is_in_progress(),
            "cannot get frame index when frame not in progress"
        );
        self.cycle.frame_index()
    }

    pub fn current_command_buffer(&self) -> vk::CommandBuffer {
        assert!(
            self.cycle.is_in_progress(),
            "cannot get command buffer when frame not in progress"
        );
        self.command_buffers[self.cycle.frame_index()]
    }

    pub fn is_frame_in_progress(&self) -> bool {
        self.cycle.is_in_progress()
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.swapchain.extent_aspect_ratio()
    }

    pub fn swapchain_render_pass(&self) -> vk::RenderPass {
        self.swapchain.render_pass()
    }

    pub fn image_count(&self) -> usize {
        self.swapchain.image_count()
    }

    pub fn set_clear_color(&mut self, color: Vec4) {
        self.clear_color = color;
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        // nothing may still be executing from our command buffers
        let _ = self.device.wait_idle();
        unsafe {
            self.device
                .handle()
                .free_command_buffers(self.device.command_pool(), &self.command_buffers);
        }
        self.command_buffers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suboptimal_flag_and_out_of_date_become_statuses() {
        assert_eq!(surface_status(Ok(false)), Ok(SurfaceStatus::Optimal));
        assert_eq!(surface_status(Ok(true)), Ok(SurfaceStatus::Suboptimal));
        assert_eq!(
            surface_status(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)),
            Ok(SurfaceStatus::OutOfDate)
        );
    }

    #[test]
    fn other_vulkan_errors_stay_fatal() {
        let status = surface_status(Err(vk::Result::ERROR_DEVICE_LOST));
        assert_eq!(
            present_outcome(status, true),
            SwapchainOutcome::Fatal(vk::Result::ERROR_DEVICE_LOST)
        );
        assert_eq!(
            acquire_outcome(surface_status(Err(vk::Result::ERROR_SURFACE_LOST_KHR))),
            SwapchainOutcome::Fatal(vk::Result::ERROR_SURFACE_LOST_KHR)
        );
    }
}
