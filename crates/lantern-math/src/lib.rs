// SPDX-License-Identifier: CEPL-1.0
//! Transform and camera math shared by the scene model and the renderer.

mod camera;
mod transform;

pub use camera::Camera;
pub use glam;
pub use transform::Transform;
