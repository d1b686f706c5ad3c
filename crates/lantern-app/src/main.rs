// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
mod config;
mod controller;
mod demo;

use std::mem::size_of;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use glam::{Vec3, Vec4};
use lantern_core::{init_tracing, FrameClock};
use lantern_math::{Camera, Transform};
use lantern_platform::WindowState;
use lantern_render::{GlobalUbo, Scene, WindowSurface, MAX_FRAMES_IN_FLIGHT};
use lantern_render_vk::systems::{MeshRenderSystem, PointLightSystem};
use lantern_render_vk::{
    vk, Buffer, DescriptorPool, DescriptorSetLayout, DescriptorWriter, Device, FrameInfo, Mesh,
    PresentMode, Renderer, ShaderSource,
};
use tracing::{error, info};

use lantern_platform::winit::{
    application::ApplicationHandler,
    event::{ElementState, KeyEvent, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::PhysicalKey,
    window::WindowId,
};

use config::{load_cfg, AppCfg, PresentModeCfg};
use controller::{look_at_rotation, MovementController};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML config
    #[arg(long, default_value = "lantern.toml")]
    config: PathBuf,
    /// Enable Vulkan validation layers
    #[arg(long)]
    validation: bool,
    /// Override the configured present mode
    #[arg(long, value_enum)]
    present_mode: Option<PresentModeCfg>,
}

/// GPU-side state. Fields drop top to bottom, so systems and descriptors go
/// before the buffers and renderer they reference; the device goes last.
struct Gpu {
    point_light_system: PointLightSystem,
    mesh_system: MeshRenderSystem,
    global_sets: Vec<vk::DescriptorSet>,
    _global_pool: DescriptorPool,
    _global_layout: DescriptorSetLayout,
    ubo_buffers: Vec<Buffer>,
    scene: Scene<Mesh>,
    renderer: Renderer,
    device: Arc<Device>,
}

impl Gpu {
    fn new(window: &WindowState, cfg: &AppCfg, validation: bool, present_mode: PresentMode) -> Result<Self> {
        let device = Device::new(window.window(), window.window(), &cfg.window.title, validation)?;
        let renderer = Renderer::new(
            device.clone(),
            window,
            present_mode,
            Vec4::from_array(cfg.render.clear_color),
        )?;

        let mut ubo_buffers = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT);
        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            let mut buf = Buffer::uniform(
                device.clone(),
                size_of::<GlobalUbo>() as vk::DeviceSize,
                1,
                vk::MemoryPropertyFlags::HOST_VISIBLE,
            )?;
            buf.map()?;
            ubo_buffers.push(buf);
        }

        let global_pool = DescriptorPool::builder()
            .max_sets(MAX_FRAMES_IN_FLIGHT as u32)
            .add_pool_size(vk::DescriptorType::UNIFORM_BUFFER, MAX_FRAMES_IN_FLIGHT as u32)
            .build(device.clone())?;
        let global_layout = DescriptorSetLayout::builder()
            .add_binding(
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
                vk::ShaderStageFlags::ALL_GRAPHICS,
            )
            .build(device.clone())?;
        let global_sets = ubo_buffers
            .iter()
            .map(|buf| {
                DescriptorWriter::new(&global_layout, &global_pool)
                    .write_buffer(0, buf.descriptor_info())
                    .build()
            })
            .collect::<Result<Vec<_>>>()?;

        let shaders = match &cfg.assets.shader_dir {
            Some(dir) => ShaderSource::Dir(dir),
            None => ShaderSource::Embedded,
        };
        let mesh_system = MeshRenderSystem::new(
            device.clone(),
            renderer.swapchain_render_pass(),
            global_layout.handle(),
            shaders,
        )?;
        let point_light_system = PointLightSystem::new(
            device.clone(),
            renderer.swapchain_render_pass(),
            global_layout.handle(),
            shaders,
        )?;

        let scene = demo::build_scene(&device, &cfg.assets, &cfg.lights)?;

        Ok(Self {
            point_light_system,
            mesh_system,
            global_sets,
            _global_pool: global_pool,
            _global_layout: global_layout,
            ubo_buffers,
            scene,
            renderer,
            device,
        })
    }
}

impl Drop for Gpu {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            error!("wait_idle on shutdown: {e:#}");
        }
    }
}

/// Global uniform block for this frame's camera, before lights are added.
fn camera_ubo(camera: &Camera, ambient_light_color: Vec4) -> GlobalUbo {
    GlobalUbo {
        projection: camera.projection(),
        view: camera.view(),
        inverse_view: camera.inverse_view(),
        ambient_light_color,
        ..Default::default()
    }
}

struct App {
    cfg: AppCfg,
    validation: bool,
    present_mode: PresentMode,

    window: Option<WindowState>,
    gpu: Option<Gpu>,

    camera: Camera,
    viewer: Transform,
    controller: MovementController,
    clock: FrameClock,

    exiting: bool,
    frames: u32,
    last_fps_instant: Instant,
}

impl App {
    fn new(args: Args) -> Self {
        let cfg = load_cfg(&args.config);
        let validation = args.validation || cfg.render.validation;
        let present_mode = args.present_mode.unwrap_or(cfg.render.present_mode).into();

        let position = Vec3::from_array(cfg.camera.position);
        let target = Vec3::from_array(cfg.camera.target);
        let viewer = Transform {
            translation: position,
            rotation: look_at_rotation(position, target),
            ..Default::default()
        };
        let mut camera = Camera::default();
        camera.set_view_target(position, target, Camera::UP);

        let controller = MovementController::new(cfg.camera.move_speed, cfg.camera.look_speed);

        Self {
            cfg,
            validation,
            present_mode,
            window: None,
            gpu: None,
            camera,
            viewer,
            controller,
            clock: FrameClock::new(),
            exiting: false,
            frames: 0,
            last_fps_instant: Instant::now(),
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let w = &self.cfg.window;
        let window = WindowState::create(event_loop, &w.title, w.width, w.height)?;
        let gpu = Gpu::new(&window, &self.cfg, self.validation, self.present_mode)?;
        info!(
            "vulkan ready: present mode {:?}, validation {}",
            self.present_mode, self.validation
        );
        self.window = Some(window);
        self.gpu = Some(gpu);
        self.clock = FrameClock::new();
        Ok(())
    }

    /// Updates the world and records one frame. Returns whether a frame was
    /// actually submitted.
    fn draw_frame(&mut self) -> Result<bool> {
        let (Some(window), Some(gpu)) = (self.window.as_mut(), self.gpu.as_mut()) else {
            return Ok(false);
        };

        let dt = self.clock.tick();
        self.controller.move_in_plane_xz(dt, &mut self.viewer);
        self.camera
            .set_view_yxz(self.viewer.translation, self.viewer.rotation);
        demo::orbit_lights(&mut gpu.scene, dt * self.cfg.lights.orbit_speed);

        let Some(cmd) = gpu.renderer.begin_frame(window)? else {
            return Ok(false);
        };

        let cam = &self.cfg.camera;
        self.camera.set_perspective_projection(
            cam.fov_degrees.to_radians(),
            gpu.renderer.aspect_ratio(),
            cam.near,
            cam.far,
        );

        let frame_index = gpu.renderer.frame_index();
        let frame = FrameInfo {
            frame_index,
            frame_time: dt,
            command_buffer: cmd,
            camera: &self.camera,
            global_descriptor_set: gpu.global_sets[frame_index],
            scene: &gpu.scene,
        };

        let mut ubo = camera_ubo(&self.camera, Vec4::from_array(self.cfg.render.ambient_light));
        gpu.point_light_system.update(&frame, &mut ubo);
        let ubo_buffer = &mut gpu.ubo_buffers[frame_index];
        ubo_buffer.write_to_buffer(&ubo)?;
        ubo_buffer.flush()?;

        gpu.renderer.begin_swapchain_render_pass(cmd);
        // opaque geometry first, blended light markers on top
        gpu.mesh_system.render(&frame);
        gpu.point_light_system.render(&frame);
        gpu.renderer.end_swapchain_render_pass(cmd);
        gpu.renderer.end_frame(window)?;
        Ok(true)
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        self.exiting = true;
        // GPU state first: the surface must go before the window it targets
        self.gpu = None;
        self.window = None;
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.init(event_loop) {
                error!("init failed: {e:#}");
                self.shutdown(event_loop);
                return;
            }
        }
        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(w) = &self.window {
            w.request_redraw();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        if let Some(window) = &self.window {
            if window_id != window.window().id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.shutdown(event_loop);
            }

            WindowEvent::Resized(new_size) => {
                if let Some(w) = &mut self.window {
                    w.on_resized(new_size);
                    info!("Resized → {}x{}", new_size.width, new_size.height);
                    w.request_redraw();
                }
            }

            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(code),
                        state,
                        repeat: false,
                        ..
                    },
                ..
            } => {
                self.controller
                    .on_key(code, state == ElementState::Pressed);
            }

            WindowEvent::RedrawRequested => {
                if self.exiting {
                    return;
                }
                match self.draw_frame() {
                    Ok(true) => self.frames = self.frames.saturating_add(1),
                    Ok(false) => {}
                    Err(e) => {
                        error!("render error: {e:#}");
                        self.shutdown(event_loop);
                    }
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }
        let Some(w) = &self.window else {
            return;
        };

        if w.extent().is_zero() {
            // minimised: sleep until the next resize
            event_loop.set_control_flow(ControlFlow::Wait);
            self.frames = 0;
            return;
        }
        event_loop.set_control_flow(ControlFlow::Poll);
        w.request_redraw();

        let now = Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let event_loop: EventLoop<()> = EventLoop::new()?;

    let mut app = App::new(args);
    event_loop.run_app(&mut app)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Mat4;

    #[test]
    fn camera_ubo_carries_camera_and_ambient() {
        let mut camera = Camera::default();
        camera.set_view_yxz(Vec3::new(0.0, -1.0, -2.5), Vec3::ZERO);
        camera.set_perspective_projection(50f32.to_radians(), 1.5, 0.1, 100.0);
        let ambient = Vec4::new(1.0, 1.0, 1.0, 0.02);

        let ubo = camera_ubo(&camera, ambient);
        assert_eq!(ubo.projection, camera.projection());
        assert_eq!(ubo.view, camera.view());
        assert!((ubo.view * ubo.inverse_view).abs_diff_eq(Mat4::IDENTITY, 1e-5));
        assert_eq!(ubo.ambient_light_color, ambient);
        assert_eq!(ubo.num_lights, 0);
        assert_eq!(ubo._pad, [0; 3]);
    }
}
