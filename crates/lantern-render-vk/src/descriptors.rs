// SPDX-License-Identifier: CEPL-1.0
//! Descriptor set layouts, pools and a writer that fills a set from a
//! layout's bindings.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use ash::vk;
use lantern_render::RenderError;

use crate::device::Device;

#[derive(Clone, Copy, Debug)]
pub struct LayoutBinding {
    pub ty: vk::DescriptorType,
    pub stages: vk::ShaderStageFlags,
    pub count: u32,
}

#[derive(Default)]
pub struct DescriptorSetLayoutBuilder {
    bindings: BTreeMap<u32, LayoutBinding>,
}

impl DescriptorSetLayoutBuilder {
    pub fn add_binding(self, binding: u32, ty: vk::DescriptorType, stages: vk::ShaderStageFlags) -> Self {
        self.add_binding_array(binding, ty, stages, 1)
    }

    pub fn add_binding_array(
        mut self,
        binding: u32,
        ty: vk::DescriptorType,
        stages: vk::ShaderStageFlags,
        count: u32,
    ) -> Self {
        assert!(!self.bindings.contains_key(&binding), "binding already in use");
        self.bindings.insert(binding, LayoutBinding { ty, stages, count });
        self
    }

    pub fn build(self, device: Arc<Device>) -> Result<DescriptorSetLayout> {
        let raw: Vec<vk::DescriptorSetLayoutBinding> = self
            .bindings
            .iter()
            .map(|(&binding, b)| vk::DescriptorSetLayoutBinding {
                binding,
                descriptor_type: b.ty,
                descriptor_count: b.count,
                stage_flags: b.stages,
                ..Default::default()
            })
            .collect();
        let ci = vk::DescriptorSetLayoutCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
            binding_count: raw.len() as u32,
            p_bindings: raw.as_ptr(),
            ..Default::default()
        };
        let layout = unsafe { device.handle().create_descriptor_set_layout(&ci, None) }
            .context("failed to create descriptor set layout")?;
        Ok(DescriptorSetLayout {
            device,
            layout,
            bindings: self.bindings,
        })
    }
}

/// A descriptor set layout together with the binding table it was built
/// from, which the writer validates against.
pub struct DescriptorSetLayout {
    device: Arc<Device>,
    layout: vk::DescriptorSetLayout,
    bindings: BTreeMap<u32, LayoutBinding>,
}

impl DescriptorSetLayout {
    pub fn builder() -> DescriptorSetLayoutBuilder {
        DescriptorSetLayoutBuilder::default()
    }

    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    pub fn binding(&self, binding: u32) -> Option<&LayoutBinding> {
        self.bindings.get(&binding)
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_set_layout(self.layout, None)
        };
    }
}

pub struct DescriptorPoolBuilder {
    pool_sizes: Vec<vk::DescriptorPoolSize>,
    max_sets: u32,
    flags: vk::DescriptorPoolCreateFlags,
}

impl Default for DescriptorPoolBuilder {
    fn default() -> Self {
        Self {
            pool_sizes: Vec::new(),
            max_sets: 1000,
            flags: vk::DescriptorPoolCreateFlags::empty(),
        }
    }
}

impl DescriptorPoolBuilder {
    pub fn add_pool_size(mut self, ty: vk::DescriptorType, count: u32) -> Self {
        self.pool_sizes.push(vk::DescriptorPoolSize {
            ty,
            descriptor_count: count,
        });
        self
    }

    pub fn pool_flags(mut self, flags: vk::DescriptorPoolCreateFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn max_sets(mut self, count: u32) -> Self {
        self.max_sets = count;
        self
    }

    pub fn build(self, device: Arc<Device>) -> Result<DescriptorPool> {
        let ci = vk::DescriptorPoolCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
            flags: self.flags,
            max_sets: self.max_sets,
            pool_size_count: self.pool_sizes.len() as u32,
            p_pool_sizes: self.pool_sizes.as_ptr(),
            ..Default::default()
        };
        let pool = unsafe { device.handle().create_descriptor_pool(&ci, None) }
            .context("failed to create descriptor pool")?;
        Ok(DescriptorPool { device, pool })
    }
}

pub struct DescriptorPool {
    device: Arc<Device>,
    pool: vk::DescriptorPool,
}

/// Pool exhaustion is reported as a typed error; anything else stays a raw
/// Vulkan failure.
fn allocation_error(result: vk::Result) -> anyhow::Error {
    match result {
        vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL => {
            RenderError::DescriptorPoolExhausted.into()
        }
        other => anyhow::Error::new(other).context("allocate_descriptor_sets"),
    }
}

impl DescriptorPool {
    pub fn builder() -> DescriptorPoolBuilder {
        DescriptorPoolBuilder::default()
    }

    pub fn allocate_descriptor(&self, layout: &DescriptorSetLayout) -> Result<vk::DescriptorSet> {
        let layouts = [layout.handle()];
        let ai = vk::DescriptorSetAllocateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
            descriptor_pool: self.pool,
            descriptor_set_count: 1,
            p_set_layouts: layouts.as_ptr(),
            ..Default::default()
        };
        let sets = unsafe { self.device.handle().allocate_descriptor_sets(&ai) }
            .map_err(allocation_error)?;
        Ok(sets[0])
    }

    /// Requires the pool to have been built with `FREE_DESCRIPTOR_SET`.
    pub fn free_descriptors(&self, sets: &[vk::DescriptorSet]) -> Result<()> {
        let res = unsafe { self.device.handle().free_descriptor_sets(self.pool, sets) };
        res.context("free_descriptor_sets")
    }

    pub fn reset_pool(&self) -> Result<()> {
        let res = unsafe {
            self.device
                .handle()
                .reset_descriptor_pool(self.pool, vk::DescriptorPoolResetFlags::empty())
        };
        res.context("reset_descriptor_pool")
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_descriptor_pool(self.pool, None) };
    }
}

enum PendingInfo {
    Buffer(vk::DescriptorBufferInfo),
    Image(vk::DescriptorImageInfo),
}

struct PendingWrite {
    ty: vk::DescriptorType,
    info: PendingInfo,
}

/// Panics unless the layout declares `binding` as a single descriptor.
fn check_single_binding(bindings: &BTreeMap<u32, LayoutBinding>, binding: u32) -> vk::DescriptorType {
    let Some(desc) = bindings.get(&binding) else {
        panic!("layout does not contain specified binding {binding}");
    };
    assert_eq!(
        desc.count, 1,
        "binding single descriptor info, but binding expects multiple"
    );
    desc.ty
}

/// Collects buffer and image writes for the bindings of one layout, then
/// allocates a set and applies them.
pub struct DescriptorWriter<'a> {
    layout: &'a DescriptorSetLayout,
    pool: &'a DescriptorPool,
    writes: BTreeMap<u32, PendingWrite>,
}

impl<'a> DescriptorWriter<'a> {
    pub fn new(layout: &'a DescriptorSetLayout, pool: &'a DescriptorPool) -> Self {
        Self {
            layout,
            pool,
            writes: BTreeMap::new(),
        }
    }

    pub fn write_buffer(mut self, binding: u32, info: vk::DescriptorBufferInfo) -> Self {
        let ty = check_single_binding(&self.layout.bindings, binding);
        self.writes.insert(
            binding,
            PendingWrite {
                ty,
                info: PendingInfo::Buffer(info),
            },
        );
        self
    }

    pub fn write_image(mut self, binding: u32, info: vk::DescriptorImageInfo) -> Self {
        let ty = check_single_binding(&self.layout.bindings, binding);
        self.writes.insert(
            binding,
            PendingWrite {
                ty,
                info: PendingInfo::Image(info),
            },
        );
        self
    }

    pub fn build(self) -> Result<vk::DescriptorSet> {
        let set = self.pool.allocate_descriptor(self.layout)?;
        self.overwrite(set);
        Ok(set)
    }

    /// Applies the collected writes to an existing set.
    pub fn overwrite(&self, set: vk::DescriptorSet) {
        let writes: Vec<vk::WriteDescriptorSet> = self
            .writes
            .iter()
            .map(|(&binding, w)| {
                let mut write = vk::WriteDescriptorSet {
                    s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                    dst_set: set,
                    dst_binding: binding,
                    descriptor_count: 1,
                    descriptor_type: w.ty,
                    ..Default::default()
                };
                match &w.info {
                    PendingInfo::Buffer(b) => write.p_buffer_info = b,
                    PendingInfo::Image(i) => write.p_image_info = i,
                }
                write
            })
            .collect();
        unsafe { self.pool.device().handle().update_descriptor_sets(&writes, &[]) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_exhaustion_is_typed() {
        for r in [
            vk::Result::ERROR_OUT_OF_POOL_MEMORY,
            vk::Result::ERROR_FRAGMENTED_POOL,
        ] {
            let err = allocation_error(r);
            assert!(matches!(
                err.downcast_ref::<RenderError>(),
                Some(RenderError::DescriptorPoolExhausted)
            ));
        }
    }

    #[test]
    fn other_allocation_failures_stay_raw() {
        let err = allocation_error(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        assert!(err.downcast_ref::<RenderError>().is_none());
        assert_eq!(
            err.root_cause().downcast_ref::<vk::Result>(),
            Some(&vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)
        );
    }

    #[test]
    fn builder_keeps_bindings_by_slot() {
        let b = DescriptorSetLayout::builder()
            .add_binding(1, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, vk::ShaderStageFlags::FRAGMENT)
            .add_binding(0, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::ALL_GRAPHICS);
        let slots: Vec<u32> = b.bindings.keys().copied().collect();
        assert_eq!(slots, vec![0, 1]);
        assert_eq!(b.bindings[&0].count, 1);
    }

    #[test]
    #[should_panic(expected = "binding already in use")]
    fn duplicate_binding_panics() {
        let _ = DescriptorSetLayout::builder()
            .add_binding(0, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::VERTEX)
            .add_binding(0, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::FRAGMENT);
    }

    #[test]
    fn pool_builder_defaults() {
        let b = DescriptorPool::builder().add_pool_size(vk::DescriptorType::UNIFORM_BUFFER, 2);
        assert_eq!(b.max_sets, 1000);
        assert_eq!(b.pool_sizes.len(), 1);
        assert!(b.flags.is_empty());
    }

    fn uniform_at_zero() -> BTreeMap<u32, LayoutBinding> {
        DescriptorSetLayout::builder()
            .add_binding(0, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::ALL_GRAPHICS)
            .add_binding_array(1, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, vk::ShaderStageFlags::FRAGMENT, 4)
            .bindings
    }

    #[test]
    fn write_target_reports_binding_type() {
        assert_eq!(
            check_single_binding(&uniform_at_zero(), 0),
            vk::DescriptorType::UNIFORM_BUFFER
        );
    }

    #[test]
    #[should_panic(expected = "does not contain specified binding 3")]
    fn writing_missing_binding_panics() {
        check_single_binding(&uniform_at_zero(), 3);
    }

    #[test]
    #[should_panic(expected = "binding expects multiple")]
    fn single_write_to_array_binding_panics() {
        check_single_binding(&uniform_at_zero(), 1);
    }
}
