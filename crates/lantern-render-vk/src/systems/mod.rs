// SPDX-License-Identifier: CEPL-1.0
//! Render systems: each owns a pipeline layout and pipeline and records its
//! draws into the frame's command buffer.

mod mesh_system;
mod point_light_system;

pub use mesh_system::MeshRenderSystem;
pub use point_light_system::PointLightSystem;
