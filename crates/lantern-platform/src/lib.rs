// SPDX-License-Identifier: CEPL-1.0
//! Window ownership and resize tracking on top of winit.

use anyhow::{Context, Result};
use lantern_render::{RenderSize, WindowSurface};
use tracing::info;

pub use winit;

use winit::{
    dpi::{LogicalSize, PhysicalSize},
    event_loop::ActiveEventLoop,
    window::Window,
};

/// Latest framebuffer size plus a sticky "resized" flag, consumed by the
/// renderer when it recreates the swapchain.
#[derive(Debug, Clone, Copy)]
pub struct ResizeTracker {
    size: RenderSize,
    resized: bool,
}

impl ResizeTracker {
    pub fn new(size: RenderSize) -> Self {
        Self {
            size,
            resized: false,
        }
    }

    pub fn on_resized(&mut self, size: RenderSize) {
        if size != self.size {
            self.resized = true;
        }
        self.size = size;
    }

    pub fn size(&self) -> RenderSize {
        self.size
    }

    pub fn was_resized(&self) -> bool {
        self.resized
    }

    pub fn reset(&mut self) {
        self.resized = false;
    }
}

pub struct WindowState {
    window: Window,
    tracker: ResizeTracker,
}

impl WindowState {
    pub fn create(event_loop: &ActiveEventLoop, title: &str, width: u32, height: u32) -> Result<Self> {
        let window = event_loop
            .create_window(
                Window::default_attributes()
                    .with_title(title)
                    .with_inner_size(LogicalSize::new(width, height))
                    .with_resizable(true),
            )
            .context("create_window")?;
        let size = to_render_size(window.inner_size());
        info!("window created {}x{}", size.width, size.height);
        Ok(Self {
            window,
            tracker: ResizeTracker::new(size),
        })
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn on_resized(&mut self, size: PhysicalSize<u32>) {
        self.tracker.on_resized(to_render_size(size));
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }
}

impl WindowSurface for WindowState {
    fn extent(&self) -> RenderSize {
        self.tracker.size()
    }

    fn was_resized(&self) -> bool {
        self.tracker.was_resized()
    }

    fn reset_resized(&mut self) {
        self.tracker.reset();
    }
}

fn to_render_size(size: PhysicalSize<u32>) -> RenderSize {
    RenderSize {
        width: size.width,
        height: size.height,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn size(width: u32, height: u32) -> RenderSize {
        RenderSize { width, height }
    }

    #[test]
    fn resize_flag_sticks_until_reset() {
        let mut t = ResizeTracker::new(size(800, 600));
        assert!(!t.was_resized());
        t.on_resized(size(1024, 768));
        t.on_resized(size(1024, 768));
        assert!(t.was_resized());
        assert_eq!(t.size(), size(1024, 768));
        t.reset();
        assert!(!t.was_resized());
    }

    #[test]
    fn same_size_is_not_a_resize() {
        let mut t = ResizeTracker::new(size(800, 600));
        t.on_resized(size(800, 600));
        assert!(!t.was_resized());
    }

    #[test]
    fn minimize_is_tracked_as_zero_extent() {
        let mut t = ResizeTracker::new(size(800, 600));
        t.on_resized(size(0, 0));
        assert!(t.size().is_zero());
        assert!(t.was_resized());
    }
}
