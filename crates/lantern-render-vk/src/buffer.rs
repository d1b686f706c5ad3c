// SPDX-License-Identifier: CEPL-1.0
//! Host- or device-visible buffers holding `instance_count` equally strided
//! instances, with optional persistent mapping.

use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::Arc;

use anyhow::{Context, Result};
use ash::vk;
use bytemuck::Pod;
use lantern_render::RenderError;

use crate::device::Device;

/// Rounds `instance_size` up to a multiple of `min_offset_alignment`, which
/// Vulkan guarantees is zero or a power of two.
pub fn alignment(instance_size: vk::DeviceSize, min_offset_alignment: vk::DeviceSize) -> vk::DeviceSize {
    if min_offset_alignment > 0 {
        (instance_size + min_offset_alignment - 1) & !(min_offset_alignment - 1)
    } else {
        instance_size
    }
}

fn check_range(len: u64, offset: u64, size: u64) -> Result<(), RenderError> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(RenderError::OutOfBounds { len, offset, size }),
    }
}

/// Bytes a mapping of `size` at `offset` covers. `WHOLE_SIZE` runs to the
/// end of the buffer; an explicit size must stay inside it.
fn mapping_len(size: u64, offset: u64, buffer_size: u64) -> Result<u64, RenderError> {
    if size == vk::WHOLE_SIZE {
        check_range(0, offset, buffer_size)?;
        Ok(buffer_size - offset)
    } else {
        check_range(size, offset, buffer_size)?;
        Ok(size)
    }
}

/// Copies `data` into `mapping` at `offset`.
fn write_mapped(mapping: &mut [u8], data: &[u8], offset: u64) -> Result<(), RenderError> {
    check_range(data.len() as u64, offset, mapping.len() as u64)?;
    let start = offset as usize;
    mapping[start..start + data.len()].copy_from_slice(data);
    Ok(())
}

pub struct Buffer {
    device: Arc<Device>,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    /// Start of the mapping and the number of bytes it covers.
    mapped: Option<(NonNull<u8>, vk::DeviceSize)>,
    buffer_size: vk::DeviceSize,
    instance_count: u32,
    instance_size: vk::DeviceSize,
    alignment_size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    memory_properties: vk::MemoryPropertyFlags,
}

impl Buffer {
    pub fn new(
        device: Arc<Device>,
        instance_size: vk::DeviceSize,
        instance_count: u32,
        usage: vk::BufferUsageFlags,
        memory_properties: vk::MemoryPropertyFlags,
        min_offset_alignment: vk::DeviceSize,
    ) -> Result<Self> {
        let alignment_size = alignment(instance_size, min_offset_alignment);
        let buffer_size = alignment_size * instance_count as vk::DeviceSize;
        let (buffer, memory) = device
            .create_buffer(buffer_size, usage, memory_properties)
            .with_context(|| format!("buffer of {instance_count} x {alignment_size} bytes"))?;
        tracing::debug!(buffer_size, ?usage, "buffer created");
        Ok(Self {
            device,
            buffer,
            memory,
            mapped: None,
            buffer_size,
            instance_count,
            instance_size,
            alignment_size,
            usage,
            memory_properties,
        })
    }

    /// Uniform buffer whose stride honours the device's offset alignment,
    /// and the non-coherent atom size when the memory is not coherent.
    pub fn uniform(
        device: Arc<Device>,
        instance_size: vk::DeviceSize,
        instance_count: u32,
        memory_properties: vk::MemoryPropertyFlags,
    ) -> Result<Self> {
        let limits = device.properties().limits;
        let mut min_align = limits.min_uniform_buffer_offset_alignment;
        if !memory_properties.contains(vk::MemoryPropertyFlags::HOST_COHERENT) {
            min_align = min_align.max(limits.non_coherent_atom_size);
        }
        Self::new(
            device,
            instance_size,
            instance_count,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            memory_properties,
            min_align,
        )
    }

    /// Maps the whole buffer.
    pub fn map(&mut self) -> Result<()> {
        self.map_range(vk::WHOLE_SIZE, 0)
    }

    pub fn map_range(&mut self, size: vk::DeviceSize, offset: vk::DeviceSize) -> Result<()> {
        if self.mapped.is_some() {
            return Err(RenderError::AlreadyMapped.into());
        }
        let len = mapping_len(size, offset, self.buffer_size)?;
        let ptr: *mut c_void = unsafe {
            self.device
                .handle()
                .map_memory(self.memory, offset, size, vk::MemoryMapFlags::empty())
        }
        .context("map_memory")?;
        // writes are relative to the mapped offset, not the buffer start
        self.mapped = NonNull::new(ptr.cast::<u8>()).map(|p| (p, len));
        Ok(())
    }

    pub fn unmap(&mut self) {
        if self.mapped.take().is_some() {
            unsafe { self.device.handle().unmap_memory(self.memory) };
        }
    }

    pub fn is_mapped(&self) -> bool {
        self.mapped.is_some()
    }

    /// The mapped bytes, if any. Reads see host writes immediately; device
    /// writes need `invalidate` first on non-coherent memory.
    pub fn mapped_bytes(&self) -> Option<&[u8]> {
        self.mapped
            .map(|(ptr, len)| unsafe { std::slice::from_raw_parts(ptr.as_ptr(), len as usize) })
    }

    /// Copies raw bytes into the mapping at `offset`.
    pub fn write_bytes(&mut self, data: &[u8], offset: vk::DeviceSize) -> Result<(), RenderError> {
        let (dst, len) = self.mapped.ok_or(RenderError::NotMapped)?;
        // SAFETY: the mapping stays valid for `len` bytes until `unmap`, which
        // needs `&mut self`.
        let mapping = unsafe { std::slice::from_raw_parts_mut(dst.as_ptr(), len as usize) };
        write_mapped(mapping, data, offset)
    }

    /// Writes `value` at the start of the buffer.
    pub fn write_to_buffer<T: Pod>(&mut self, value: &T) -> Result<(), RenderError> {
        self.write_bytes(bytemuck::bytes_of(value), 0)
    }

    /// Writes `value` at a byte offset into the mapping.
    pub fn write_to_buffer_at<T: Pod>(&mut self, value: &T, offset: vk::DeviceSize) -> Result<(), RenderError> {
        self.write_bytes(bytemuck::bytes_of(value), offset)
    }

    /// Writes a whole slice starting at the beginning of the buffer.
    pub fn write_slice<T: Pod>(&mut self, values: &[T]) -> Result<(), RenderError> {
        self.write_bytes(bytemuck::cast_slice(values), 0)
    }

    /// Writes `value` into instance slot `index`, honouring the alignment stride.
    pub fn write_to_index<T: Pod>(&mut self, value: &T, index: u32) -> Result<(), RenderError> {
        self.write_bytes(bytemuck::bytes_of(value), self.index_offset(index))
    }

    fn index_offset(&self, index: u32) -> vk::DeviceSize {
        index as vk::DeviceSize * self.alignment_size
    }

    fn coherent(&self) -> bool {
        self.memory_properties
            .contains(vk::MemoryPropertyFlags::HOST_COHERENT)
    }

    fn memory_range(&self, size: vk::DeviceSize, offset: vk::DeviceSize) -> vk::MappedMemoryRange<'static> {
        vk::MappedMemoryRange {
            s_type: vk::StructureType::MAPPED_MEMORY_RANGE,
            memory: self.memory,
            offset,
            size,
            ..Default::default()
        }
    }

    /// Makes host writes to the whole buffer visible to the device.
    pub fn flush(&self) -> Result<()> {
        self.flush_range(vk::WHOLE_SIZE, 0)
    }

    /// Skipped for coherent memory.
    pub fn flush_range(&self, size: vk::DeviceSize, offset: vk::DeviceSize) -> Result<()> {
        if self.coherent() {
            return Ok(());
        }
        let range = self.memory_range(size, offset);
        let res = unsafe {
            self.device
                .handle()
                .flush_mapped_memory_ranges(std::slice::from_ref(&range))
        };
        res.context("flush_mapped_memory_ranges")
    }

    pub fn flush_index(&self, index: u32) -> Result<()> {
        self.flush_range(self.alignment_size, self.index_offset(index))
    }

    /// Makes device writes to the whole buffer visible to the host.
    pub fn invalidate(&self) -> Result<()> {
        self.invalidate_range(vk::WHOLE_SIZE, 0)
    }

    /// Skipped for coherent memory.
    pub fn invalidate_range(&self, size: vk::DeviceSize, offset: vk::DeviceSize) -> Result<()> {
        if self.coherent() {
            return Ok(());
        }
        let range = self.memory_range(size, offset);
        let res = unsafe {
            self.device
                .handle()
                .invalidate_mapped_memory_ranges(std::slice::from_ref(&range))
        };
        res.context("invalidate_mapped_memory_ranges")
    }

    pub fn invalidate_index(&self, index: u32) -> Result<()> {
        self.invalidate_range(self.alignment_size, self.index_offset(index))
    }

    pub fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        self.descriptor_info_range(vk::WHOLE_SIZE, 0)
    }

    pub fn descriptor_info_range(&self, size: vk::DeviceSize, offset: vk::DeviceSize) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo {
            buffer: self.buffer,
            offset,
            range: size,
        }
    }

    pub fn descriptor_info_for_index(&self, index: u32) -> vk::DescriptorBufferInfo {
        self.descriptor_info_range(self.alignment_size, self.index_offset(index))
    }

    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn buffer_size(&self) -> vk::DeviceSize {
        self.buffer_size
    }

    pub fn instance_count(&self) -> u32 {
        self.instance_count
    }

    pub fn instance_size(&self) -> vk::DeviceSize {
        self.instance_size
    }

    pub fn alignment_size(&self) -> vk::DeviceSize {
        self.alignment_size
    }

    pub fn usage_flags(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    pub fn memory_property_flags(&self) -> vk::MemoryPropertyFlags {
        self.memory_properties
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.unmap();
        unsafe {
            let d = self.device.handle();
            if self.buffer != vk::Buffer::null() {
                d.destroy_buffer(self.buffer, None);
                self.buffer = vk::Buffer::null();
            }
            if self.memory != vk::DeviceMemory::null() {
                d.free_memory(self.memory, None);
                self.memory = vk::DeviceMemory::null();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_rounds_up_to_power_of_two() {
        assert_eq!(alignment(544, 256), 768);
        assert_eq!(alignment(256, 256), 256);
        assert_eq!(alignment(1, 64), 64);
        assert_eq!(alignment(44, 0), 44);
    }

    #[test]
    fn mapped_write_reads_back_identically() {
        let mut mapping = vec![0u8; 64];
        let data: Vec<u8> = (0..64).collect();
        write_mapped(&mut mapping, &data, 0).unwrap();
        assert_eq!(mapping, data);
    }

    #[test]
    fn mapped_write_at_instance_offset() {
        let mut mapping = vec![0u8; 32];
        let value: u32 = 0xdead_beef;
        write_mapped(&mut mapping, bytemuck::bytes_of(&value), alignment(4, 16)).unwrap();
        assert_eq!(&mapping[16..20], bytemuck::bytes_of(&value));
        assert!(mapping[..16].iter().all(|&b| b == 0));
        assert!(write_mapped(&mut mapping, &[0; 8], 28).is_err());
    }

    #[test]
    fn range_check_accepts_exact_fit() {
        assert!(check_range(16, 48, 64).is_ok());
        assert!(check_range(0, 64, 64).is_ok());
    }

    #[test]
    fn range_check_rejects_overrun_and_overflow() {
        assert!(matches!(
            check_range(17, 48, 64),
            Err(RenderError::OutOfBounds { len: 17, offset: 48, size: 64 })
        ));
        assert!(check_range(1, u64::MAX, 64).is_err());
    }

    #[test]
    fn mapping_len_stays_inside_the_buffer() {
        assert_eq!(mapping_len(vk::WHOLE_SIZE, 0, 64).unwrap(), 64);
        assert_eq!(mapping_len(vk::WHOLE_SIZE, 16, 64).unwrap(), 48);
        assert_eq!(mapping_len(16, 48, 64).unwrap(), 16);
        assert!(matches!(
            mapping_len(64, 0, 4),
            Err(RenderError::OutOfBounds { len: 64, offset: 0, size: 4 })
        ));
        assert!(mapping_len(8, 60, 64).is_err());
        assert!(mapping_len(vk::WHOLE_SIZE, 65, 64).is_err());
    }
}
