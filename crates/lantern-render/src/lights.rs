// SPDX-License-Identifier: CEPL-1.0
use glam::Vec3;

use crate::{GlobalUbo, PointLight, Scene, SceneObject, MAX_LIGHTS};

/// Copies every point light in `scene` into `ubo` and sets `num_lights`.
///
/// Panics when the scene holds more than [`MAX_LIGHTS`] lights.
pub fn collect_point_lights<M>(scene: &Scene<M>, ubo: &mut GlobalUbo) {
    let mut count = 0;
    for obj in scene.objects() {
        let Some(light) = obj.point_light else {
            continue;
        };
        assert!(count < MAX_LIGHTS, "point lights exceed maximum of {MAX_LIGHTS}");
        ubo.point_lights[count] = PointLight {
            position: obj.transform.translation.extend(1.0),
            color: obj.color.extend(light.intensity),
        };
        count += 1;
    }
    ubo.num_lights = count as i32;
}

/// Point lights ordered farthest-first from `camera`, for blending.
///
/// The sort is stable: equally distant lights keep id order.
pub fn lights_back_to_front<M>(scene: &Scene<M>, camera: Vec3) -> Vec<&SceneObject> {
    let mut lights: Vec<(f32, &SceneObject)> = scene
        .objects()
        .filter(|o| o.point_light.is_some())
        .map(|o| (camera.distance_squared(o.transform.translation), o))
        .collect();
    lights.sort_by(|a, b| b.0.total_cmp(&a.0));
    lights.into_iter().map(|(_, o)| o).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn light_at(scene: &mut Scene<()>, pos: Vec3) -> crate::ObjectId {
        let obj = scene.create_point_light(1.0, 0.1, Vec3::ONE);
        obj.transform.translation = pos;
        obj.id()
    }

    #[test]
    fn collects_only_lights() {
        let mut scene: Scene<()> = Scene::new();
        scene.create_object().transform.translation = Vec3::X;
        let light = scene.create_point_light(0.5, 0.1, Vec3::new(1.0, 0.0, 0.0));
        light.transform.translation = Vec3::new(1.0, 2.0, 3.0);

        let mut ubo = GlobalUbo::default();
        collect_point_lights(&scene, &mut ubo);
        assert_eq!(ubo.num_lights, 1);
        assert_eq!(ubo.point_lights[0].position.truncate(), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(ubo.point_lights[0].color.w, 0.5);
    }

    #[test]
    fn exactly_max_lights_is_fine() {
        let mut scene = Scene::new();
        for i in 0..MAX_LIGHTS {
            light_at(&mut scene, Vec3::splat(i as f32));
        }
        let mut ubo = GlobalUbo::default();
        collect_point_lights(&scene, &mut ubo);
        assert_eq!(ubo.num_lights, MAX_LIGHTS as i32);
    }

    #[test]
    #[should_panic(expected = "exceed maximum")]
    fn too_many_lights_panics() {
        let mut scene = Scene::new();
        for i in 0..=MAX_LIGHTS {
            light_at(&mut scene, Vec3::splat(i as f32));
        }
        collect_point_lights(&scene, &mut GlobalUbo::default());
    }

    #[test]
    fn sorts_far_to_near_and_keeps_ties() {
        let mut scene = Scene::new();
        let near = light_at(&mut scene, Vec3::new(0.0, 0.0, 1.0));
        let far = light_at(&mut scene, Vec3::new(0.0, 0.0, 9.0));
        let tie_a = light_at(&mut scene, Vec3::new(3.0, 0.0, 0.0));
        let tie_b = light_at(&mut scene, Vec3::new(-3.0, 0.0, 0.0));
        scene.create_object();

        let order: Vec<_> = lights_back_to_front(&scene, Vec3::ZERO)
            .into_iter()
            .map(|o| o.id())
            .collect();
        assert_eq!(order, vec![far, tie_a, tie_b, near]);
    }
}
