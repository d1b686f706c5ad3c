// SPDX-License-Identifier: CEPL-1.0
//! Backend-independent half of the renderer: the frame state machine, the
//! scene model, shader-visible data layouts and mesh loading.

mod error;
mod frame;
mod lights;
mod mesh_data;
mod scene;
mod surface;
mod uniforms;

pub use error::RenderError;
pub use frame::{FrameCycle, FramePhase, MAX_FRAMES_IN_FLIGHT};
pub use lights::{collect_point_lights, lights_back_to_front};
pub use mesh_data::{MeshData, Vertex};
pub use scene::{MeshArena, MeshHandle, ObjectId, PointLightComponent, Scene, SceneObject};
pub use surface::{acquire_outcome, present_outcome, RecreateGate, SurfaceStatus, SwapchainOutcome};
pub use uniforms::{GlobalUbo, MeshPushConstants, PointLight, PointLightPushConstants, MAX_LIGHTS};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub fn is_zero(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// What the frame orchestrator needs from the window it presents to.
pub trait WindowSurface {
    /// Current drawable size in physical pixels.
    fn extent(&self) -> RenderSize;
    /// True once the window has been resized since the last reset.
    fn was_resized(&self) -> bool;
    fn reset_resized(&mut self);
}
