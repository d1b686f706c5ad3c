// SPDX-License-Identifier: CEPL-1.0
//! GPU meshes: device-local vertex and optional index buffers filled
//! through a staging copy.

use std::mem::{offset_of, size_of};
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use ash::vk;
use bytemuck::Pod;
use lantern_render::{MeshData, RenderError, Vertex};

use crate::buffer::Buffer;
use crate::device::Device;

pub fn binding_descriptions() -> Vec<vk::VertexInputBindingDescription> {
    vec![vk::VertexInputBindingDescription {
        binding: 0,
        stride: size_of::<Vertex>() as u32,
        input_rate: vk::VertexInputRate::VERTEX,
    }]
}

pub fn attribute_descriptions() -> Vec<vk::VertexInputAttributeDescription> {
    let attr = |location, format, offset: usize| vk::VertexInputAttributeDescription {
        location,
        binding: 0,
        format,
        offset: offset as u32,
    };
    vec![
        attr(0, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, position)),
        attr(1, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, color)),
        attr(2, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, normal)),
        attr(3, vk::Format::R32G32_SFLOAT, offset_of!(Vertex, uv)),
    ]
}

pub struct Mesh {
    device: Arc<Device>,
    vertex_buffer: Buffer,
    vertex_count: u32,
    index_buffer: Option<Buffer>,
    index_count: u32,
}

impl Mesh {
    pub fn new(device: &Arc<Device>, data: &MeshData) -> Result<Self> {
        if data.vertices.len() < 3 {
            return Err(RenderError::TooFewVertices(data.vertices.len()).into());
        }
        let vertex_buffer = upload(device, &data.vertices, vk::BufferUsageFlags::VERTEX_BUFFER)?;
        let index_buffer = if data.indices.is_empty() {
            None
        } else {
            Some(upload(device, &data.indices, vk::BufferUsageFlags::INDEX_BUFFER)?)
        };
        Ok(Self {
            device: device.clone(),
            vertex_buffer,
            vertex_count: data.vertices.len() as u32,
            index_buffer,
            index_count: data.indices.len() as u32,
        })
    }

    pub fn from_file(device: &Arc<Device>, path: impl AsRef<Path>) -> Result<Self> {
        let data = MeshData::load_obj(path)?;
        Self::new(device, &data)
    }

    pub fn bind(&self, cmd: vk::CommandBuffer) {
        let d = self.device.handle();
        unsafe {
            d.cmd_bind_vertex_buffers(cmd, 0, &[self.vertex_buffer.handle()], &[0]);
            if let Some(ib) = &self.index_buffer {
                d.cmd_bind_index_buffer(cmd, ib.handle(), 0, vk::IndexType::UINT32);
            }
        }
    }

    pub fn draw(&self, cmd: vk::CommandBuffer) {
        let d = self.device.handle();
        unsafe {
            if self.index_buffer.is_some() {
                d.cmd_draw_indexed(cmd, self.index_count, 1, 0, 0, 0);
            } else {
                d.cmd_draw(cmd, self.vertex_count, 1, 0, 0);
            }
        }
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }
}

/// Copies `items` into a new device-local buffer via a host-visible
/// staging buffer that is released before returning.
fn upload<T: Pod>(device: &Arc<Device>, items: &[T], usage: vk::BufferUsageFlags) -> Result<Buffer> {
    let instance_size = size_of::<T>() as vk::DeviceSize;
    let count = items.len() as u32;

    let mut staging = Buffer::new(
        device.clone(),
        instance_size,
        count,
        vk::BufferUsageFlags::TRANSFER_SRC,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        1,
    )?;
    staging.map()?;
    staging.write_slice(items)?;

    let target = Buffer::new(
        device.clone(),
        instance_size,
        count,
        usage | vk::BufferUsageFlags::TRANSFER_DST,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
        1,
    )?;
    device.copy_buffer(staging.handle(), target.handle(), staging.buffer_size())?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attributes_cover_vertex_layout() {
        let attrs = attribute_descriptions();
        let locations: Vec<u32> = attrs.iter().map(|a| a.location).collect();
        assert_eq!(locations, vec![0, 1, 2, 3]);
        assert_eq!(attrs[1].offset, 12);
        assert_eq!(attrs[3].format, vk::Format::R32G32_SFLOAT);
        assert_eq!(attrs[3].offset, 36);
    }

    #[test]
    fn single_interleaved_binding() {
        let b = binding_descriptions();
        assert_eq!(b.len(), 1);
        assert_eq!(b[0].stride, 44);
        assert_eq!(b[0].input_rate, vk::VertexInputRate::VERTEX);
    }
}
