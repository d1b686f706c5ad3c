// SPDX-License-Identifier: CEPL-1.0
//! Demo scene: configured models plus a ring of coloured point lights
//! orbiting the vertical axis.

use std::f32::consts::TAU;
use std::sync::Arc;

use anyhow::{Context, Result};
use glam::{Quat, Vec3};
use lantern_math::{Camera, Transform};
use lantern_render::Scene;
use lantern_render_vk::{Device, Mesh};
use tracing::info;

use crate::config::{AssetsCfg, LightsCfg};

/// Evenly spaced positions on the light ring, paired with their colours.
pub fn light_ring(cfg: &LightsCfg) -> Vec<(Vec3, Vec3)> {
    let n = cfg.colors.len();
    cfg.colors
        .iter()
        .enumerate()
        .map(|(i, &color)| {
            let angle = i as f32 * TAU / n as f32;
            let pos = Vec3::new(
                cfg.orbit_radius * angle.cos(),
                cfg.height,
                cfg.orbit_radius * angle.sin(),
            );
            (pos, Vec3::from_array(color))
        })
        .collect()
}

/// Rotates every point light about the world up axis by `angle` radians.
pub fn orbit_lights<M>(scene: &mut Scene<M>, angle: f32) {
    let rot = Quat::from_axis_angle(Camera::UP, angle);
    for obj in scene.objects_mut().filter(|o| o.point_light.is_some()) {
        obj.transform.translation = rot * obj.transform.translation;
    }
}

pub fn build_scene(device: &Arc<Device>, assets: &AssetsCfg, lights: &LightsCfg) -> Result<Scene<Mesh>> {
    let mut scene = Scene::new();

    for model in &assets.models {
        let mesh = Mesh::from_file(device, &model.path)
            .with_context(|| format!("model {}", model.path.display()))?;
        let handle = scene.add_mesh(mesh);
        let obj = scene.create_object();
        obj.color = Vec3::from_array(model.color);
        obj.transform = Transform {
            translation: Vec3::from_array(model.translation),
            rotation: Vec3::from_array(model.rotation),
            scale: Vec3::from_array(model.scale),
        };
        let id = obj.id();
        scene.set_mesh(id, Some(handle));
    }

    for (pos, color) in light_ring(lights) {
        let light = scene.create_point_light(lights.intensity, lights.radius, color);
        light.transform.translation = pos;
    }

    info!(
        "scene: {} objects, {} meshes",
        scene.len(),
        scene.meshes().len()
    );
    Ok(scene)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_is_evenly_spaced_at_height() {
        let cfg = LightsCfg {
            colors: vec![[1.0, 0.0, 0.0]; 4],
            orbit_radius: 2.0,
            height: -1.0,
            ..Default::default()
        };
        let ring = light_ring(&cfg);
        assert_eq!(ring.len(), 4);
        assert!(ring[0].0.abs_diff_eq(Vec3::new(2.0, -1.0, 0.0), 1e-6));
        assert!(ring[1].0.abs_diff_eq(Vec3::new(0.0, -1.0, 2.0), 1e-5));
        assert!(ring.iter().all(|(p, _)| p.y == -1.0));
    }

    #[test]
    fn orbit_moves_lights_only() {
        let mut scene: Scene<()> = Scene::new();
        let plain = scene.create_object();
        plain.transform.translation = Vec3::X;
        let plain = plain.id();
        let light = scene.create_point_light(0.2, 0.1, Vec3::ONE);
        light.transform.translation = Vec3::new(1.0, -1.0, 0.0);
        let light = light.id();

        orbit_lights(&mut scene, TAU / 4.0);

        assert_eq!(scene.get(plain).unwrap().transform.translation, Vec3::X);
        let moved = scene.get(light).unwrap().transform.translation;
        assert!((moved.y + 1.0).abs() < 1e-6);
        assert!((moved.length() - 2f32.sqrt()).abs() < 1e-5);
        assert!(moved.x.abs() < 1e-5);
    }
}
