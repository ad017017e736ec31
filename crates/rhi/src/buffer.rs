//! GPU buffers backed by `gpu-allocator`.
//!
//! Vertex and index buffers live in device-local memory and are filled
//! through a [`BufferUsage::Staging`] buffer plus a one-shot copy. Uniform
//! and staging buffers are host-visible and stay persistently mapped, so
//! [`Buffer::write_bytes`] is a plain memory copy.
//!
//! ```no_run
//! use std::sync::Arc;
//! use vkframe_rhi::buffer::{Buffer, BufferUsage};
//! use vkframe_rhi::device::Device;
//!
//! # fn example(device: Arc<Device>) -> Result<(), vkframe_rhi::RhiError> {
//! let vertices: [f32; 6] = [0.0, 0.5, -0.5, -0.5, 0.5, -0.5];
//! let staging = Buffer::new_with_data(
//!     device.clone(),
//!     BufferUsage::Staging,
//!     bytemuck::cast_slice(&vertices),
//! )?;
//! let vertex_buffer = Buffer::new(device, BufferUsage::Vertex, staging.size())?;
//! // record a copy from `staging` into `vertex_buffer` ...
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use bytemuck::Pod;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// What a buffer is for. Determines usage flags and memory placement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    Vertex,
    Index,
    Uniform,
    Staging,
}

impl BufferUsage {
    pub fn to_vk_usage(self) -> vk::BufferUsageFlags {
        match self {
            BufferUsage::Vertex => {
                vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Index => {
                vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
            BufferUsage::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
        }
    }

    pub fn memory_location(self) -> MemoryLocation {
        match self {
            BufferUsage::Vertex | BufferUsage::Index => MemoryLocation::GpuOnly,
            BufferUsage::Uniform | BufferUsage::Staging => MemoryLocation::CpuToGpu,
        }
    }

    /// Whether buffers of this kind are host-visible and mapped.
    pub fn is_host_visible(self) -> bool {
        self.memory_location() == MemoryLocation::CpuToGpu
    }

    pub fn name(self) -> &'static str {
        match self {
            BufferUsage::Vertex => "vertex",
            BufferUsage::Index => "index",
            BufferUsage::Uniform => "uniform",
            BufferUsage::Staging => "staging",
        }
    }
}

/// A `vk::Buffer` and its memory allocation.
pub struct Buffer {
    device: Arc<Device>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
    usage: BufferUsage,
}

impl Buffer {
    /// Creates a buffer of `size` bytes.
    ///
    /// # Errors
    ///
    /// Fails for a zero size, or when buffer creation, allocation or binding
    /// fails. Partially created objects are released before returning.
    pub fn new(device: Arc<Device>, usage: BufferUsage, size: vk::DeviceSize) -> RhiResult<Self> {
        if size == 0 {
            return Err(RhiError::InvalidHandle("buffer size must be non-zero".into()));
        }

        let info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage.to_vk_usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { device.handle().create_buffer(&info, None)? };
        let requirements = unsafe { device.handle().get_buffer_memory_requirements(buffer) };

        let allocation = device.with_allocator(|allocator| {
            Ok(allocator.allocate(&AllocationCreateDesc {
                name: usage.name(),
                requirements,
                location: usage.memory_location(),
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })?)
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.handle().destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        // From here on Drop releases both the buffer and the allocation.
        let buffer = Self {
            device,
            buffer,
            allocation: Some(allocation),
            size,
            usage,
        };
        if let Some(allocation) = buffer.allocation.as_ref() {
            unsafe {
                buffer.device.handle().bind_buffer_memory(
                    buffer.buffer,
                    allocation.memory(),
                    allocation.offset(),
                )?;
            }
        }

        debug!("Created {} buffer ({} bytes)", usage.name(), size);
        Ok(buffer)
    }

    /// Creates a host-visible buffer holding `data`.
    pub fn new_with_data(device: Arc<Device>, usage: BufferUsage, data: &[u8]) -> RhiResult<Self> {
        let buffer = Self::new(device, usage, data.len() as vk::DeviceSize)?;
        buffer.write_bytes(0, data)?;
        Ok(buffer)
    }

    /// Copies `data` into the mapped memory at `offset`.
    ///
    /// # Errors
    ///
    /// Fails if the buffer is not host-visible or the write runs past the end.
    pub fn write_bytes(&self, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        if data.is_empty() {
            return Ok(());
        }

        let end = offset + data.len() as vk::DeviceSize;
        if end > self.size {
            return Err(RhiError::InvalidHandle(format!(
                "write of {} bytes at offset {} exceeds {} byte {} buffer",
                data.len(),
                offset,
                self.size,
                self.usage.name()
            )));
        }

        let mapped = self
            .allocation
            .as_ref()
            .and_then(|allocation| allocation.mapped_ptr())
            .ok_or_else(|| {
                RhiError::InvalidHandle(format!("{} buffer is not mapped", self.usage.name()))
            })?;

        unsafe {
            let dst = mapped.as_ptr().cast::<u8>().add(offset as usize);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        }
        Ok(())
    }

    /// Writes a `Pod` value at offset 0.
    pub fn write<T: Pod>(&self, value: &T) -> RhiResult<()> {
        self.write_bytes(0, bytemuck::bytes_of(value))
    }

    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    #[inline]
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    /// Descriptor info covering the whole buffer.
    pub fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo::default()
            .buffer(self.buffer)
            .offset(0)
            .range(self.size)
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            let freed = self
                .device
                .with_allocator(|allocator| Ok(allocator.free(allocation)?));
            if let Err(e) = freed {
                error!("Failed to free {} buffer allocation: {}", self.usage.name(), e);
            }
        }

        unsafe { self.device.handle().destroy_buffer(self.buffer, None) };
        debug!("Destroyed {} buffer ({} bytes)", self.usage.name(), self.size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry_buffers_are_device_local_transfer_targets() {
        for usage in [BufferUsage::Vertex, BufferUsage::Index] {
            assert_eq!(usage.memory_location(), MemoryLocation::GpuOnly);
            assert!(usage.to_vk_usage().contains(vk::BufferUsageFlags::TRANSFER_DST));
            assert!(!usage.is_host_visible());
        }
        assert!(
            BufferUsage::Vertex
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::VERTEX_BUFFER)
        );
        assert!(
            BufferUsage::Index
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::INDEX_BUFFER)
        );
    }

    #[test]
    fn test_uniform_and_staging_are_host_visible() {
        assert!(BufferUsage::Uniform.is_host_visible());
        assert!(BufferUsage::Staging.is_host_visible());
        assert_eq!(
            BufferUsage::Staging.to_vk_usage(),
            vk::BufferUsageFlags::TRANSFER_SRC
        );
        assert_eq!(
            BufferUsage::Uniform.to_vk_usage(),
            vk::BufferUsageFlags::UNIFORM_BUFFER
        );
    }

    #[test]
    fn test_buffer_usage_name() {
        assert_eq!(BufferUsage::Vertex.name(), "vertex");
        assert_eq!(BufferUsage::Uniform.name(), "uniform");
    }
}
