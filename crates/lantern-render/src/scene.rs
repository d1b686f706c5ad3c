// SPDX-License-Identifier: CEPL-1.0
use std::collections::BTreeMap;

use glam::Vec3;
use lantern_math::Transform;
use slotmap::{new_key_type, SlotMap};

new_key_type! {
    /// Key of a mesh stored in a [`MeshArena`].
    pub struct MeshHandle;
}

/// Identity of a scene object. Assigned by the owning [`Scene`], never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(u64);

impl ObjectId {
    pub fn get(self) -> u64 {
        self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointLightComponent {
    pub intensity: f32,
}

/// Something placed in the world. Deliberately not `Clone`.
#[derive(Debug)]
pub struct SceneObject {
    id: ObjectId,
    mesh: Option<MeshHandle>,
    pub color: Vec3,
    pub transform: Transform,
    pub point_light: Option<PointLightComponent>,
}

impl SceneObject {
    fn new(id: ObjectId) -> Self {
        Self {
            id,
            mesh: None,
            color: Vec3::ZERO,
            transform: Transform::default(),
            point_light: None,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn mesh(&self) -> Option<MeshHandle> {
        self.mesh
    }
}

struct Slot<M> {
    mesh: M,
    refs: usize,
}

/// Meshes shared between scene objects. Each entry counts the objects that
/// reference it; an entry is dropped when its last reference is released.
pub struct MeshArena<M> {
    slots: SlotMap<MeshHandle, Slot<M>>,
}

impl<M> Default for MeshArena<M> {
    fn default() -> Self {
        Self {
            slots: SlotMap::with_key(),
        }
    }
}

impl<M> MeshArena<M> {
    /// Stores `mesh` with no references yet.
    pub fn insert(&mut self, mesh: M) -> MeshHandle {
        self.slots.insert(Slot { mesh, refs: 0 })
    }

    pub fn get(&self, handle: MeshHandle) -> Option<&M> {
        self.slots.get(handle).map(|s| &s.mesh)
    }

    pub fn refs(&self, handle: MeshHandle) -> Option<usize> {
        self.slots.get(handle).map(|s| s.refs)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Panics on a stale handle.
    fn acquire(&mut self, handle: MeshHandle) {
        let slot = self
            .slots
            .get_mut(handle)
            .expect("mesh handle does not belong to this arena");
        slot.refs += 1;
    }

    /// Drops the mesh and returns it once no object references it.
    fn release(&mut self, handle: MeshHandle) -> Option<M> {
        let slot = self.slots.get_mut(handle)?;
        slot.refs = slot.refs.saturating_sub(1);
        if slot.refs == 0 {
            self.slots.remove(handle).map(|s| s.mesh)
        } else {
            None
        }
    }
}

/// Objects keyed by id plus the meshes they share. `M` is the backend's mesh
/// type; tests use plain values.
pub struct Scene<M> {
    objects: BTreeMap<ObjectId, SceneObject>,
    meshes: MeshArena<M>,
    next_id: u64,
}

impl<M> Default for Scene<M> {
    fn default() -> Self {
        Self {
            objects: BTreeMap::new(),
            meshes: MeshArena::default(),
            next_id: 0,
        }
    }
}

impl<M> Scene<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Meshes added here stay alive until the last object using them is
    /// removed or the scene itself is dropped.
    pub fn add_mesh(&mut self, mesh: M) -> MeshHandle {
        self.meshes.insert(mesh)
    }

    pub fn mesh(&self, handle: MeshHandle) -> Option<&M> {
        self.meshes.get(handle)
    }

    pub fn meshes(&self) -> &MeshArena<M> {
        &self.meshes
    }

    /// Creates an empty object with the next id.
    pub fn create_object(&mut self) -> &mut SceneObject {
        let id = ObjectId(self.next_id);
        self.next_id += 1;
        self.objects.entry(id).or_insert_with(|| SceneObject::new(id))
    }

    /// Light-only object; `radius` lives in `transform.scale.x`.
    pub fn create_point_light(&mut self, intensity: f32, radius: f32, color: Vec3) -> &mut SceneObject {
        let obj = self.create_object();
        obj.color = color;
        obj.transform.scale.x = radius;
        obj.point_light = Some(PointLightComponent { intensity });
        obj
    }

    /// Points `id` at `mesh`, releasing whatever it referenced before.
    ///
    /// Panics when `id` is not in the scene or `mesh` is stale.
    pub fn set_mesh(&mut self, id: ObjectId, mesh: Option<MeshHandle>) {
        let obj = self
            .objects
            .get_mut(&id)
            .expect("object id does not belong to this scene");
        if let Some(new) = mesh {
            self.meshes.acquire(new);
        }
        if let Some(old) = std::mem::replace(&mut obj.mesh, mesh) {
            if self.meshes.release(old).is_some() {
                tracing::debug!(?old, "mesh released");
            }
        }
    }

    /// Erases the object and releases its mesh reference.
    pub fn remove(&mut self, id: ObjectId) -> Option<SceneObject> {
        let mut obj = self.objects.remove(&id)?;
        if let Some(handle) = obj.mesh.take() {
            if self.meshes.release(handle).is_some() {
                tracing::debug!(?handle, "mesh released");
            }
        }
        Some(obj)
    }

    pub fn get(&self, id: ObjectId) -> Option<&SceneObject> {
        self.objects.get(&id)
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut SceneObject> {
        self.objects.get_mut(&id)
    }

    /// Objects in id order.
    pub fn objects(&self) -> impl Iterator<Item = &SceneObject> {
        self.objects.values()
    }

    pub fn objects_mut(&mut self) -> impl Iterator<Item = &mut SceneObject> {
        self.objects.values_mut()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic_and_not_reused() {
        let mut scene: Scene<()> = Scene::new();
        let a = scene.create_object().id();
        let b = scene.create_object().id();
        assert!(b > a);
        scene.remove(b);
        let c = scene.create_object().id();
        assert!(c > b);
        assert_eq!(scene.objects().map(|o| o.id()).collect::<Vec<_>>(), vec![a, c]);
    }

    #[test]
    fn scenes_count_ids_independently() {
        let mut one: Scene<()> = Scene::new();
        let mut two: Scene<()> = Scene::new();
        one.create_object();
        assert_eq!(two.create_object().id().get(), 0);
    }

    #[test]
    fn shared_mesh_lives_until_last_reference_goes() {
        let mut scene = Scene::new();
        let vase = scene.add_mesh("vase");
        let a = scene.create_object().id();
        let b = scene.create_object().id();
        scene.set_mesh(a, Some(vase));
        scene.set_mesh(b, Some(vase));
        assert_eq!(scene.meshes().refs(vase), Some(2));

        scene.remove(a);
        assert_eq!(scene.mesh(vase), Some(&"vase"));
        assert_eq!(scene.meshes().refs(vase), Some(1));

        scene.remove(b);
        assert_eq!(scene.mesh(vase), None);
        assert!(scene.meshes().is_empty());
    }

    #[test]
    fn swapping_mesh_releases_previous() {
        let mut scene = Scene::new();
        let flat = scene.add_mesh(1);
        let smooth = scene.add_mesh(2);
        let id = scene.create_object().id();
        scene.set_mesh(id, Some(flat));
        scene.set_mesh(id, Some(smooth));
        assert_eq!(scene.mesh(flat), None);
        assert_eq!(scene.get(id).and_then(|o| o.mesh()), Some(smooth));

        scene.set_mesh(id, None);
        assert!(scene.meshes().is_empty());
    }

    #[test]
    fn reassigning_same_mesh_keeps_it() {
        let mut scene = Scene::new();
        let m = scene.add_mesh(7);
        let id = scene.create_object().id();
        scene.set_mesh(id, Some(m));
        scene.set_mesh(id, Some(m));
        assert_eq!(scene.meshes().refs(m), Some(1));
    }

    #[test]
    fn point_light_factory_stores_radius_in_scale() {
        let mut scene: Scene<()> = Scene::new();
        let light = scene.create_point_light(0.2, 0.1, Vec3::new(1.0, 0.1, 0.1));
        assert_eq!(light.transform.scale.x, 0.1);
        assert_eq!(light.point_light, Some(PointLightComponent { intensity: 0.2 }));
        assert_eq!(light.mesh(), None);
    }
}
