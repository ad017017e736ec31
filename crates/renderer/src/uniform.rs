//! Per-slot uniform buffers.

use std::sync::Arc;

use ash::vk;
use bytemuck::Pod;
use tracing::debug;
use vkframe_rhi::buffer::{Buffer, BufferUsage};
use vkframe_rhi::device::Device;

use crate::context::DeviceContext;
use crate::registry::GpuResource;
use crate::{MAX_FRAMES_IN_FLIGHT, RenderError, RenderResult};

/// One host-visible buffer per frame slot.
///
/// Write a slot only after that slot's fence has been waited on; the frame
/// renderer's update callback is the place for it.
pub struct UniformBuffer {
    buffers: Vec<Buffer>,
    size: vk::DeviceSize,
}

impl UniformBuffer {
    pub fn new(device: Arc<Device>, size: vk::DeviceSize) -> RenderResult<Self> {
        let buffers = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|_| Buffer::new(device.clone(), BufferUsage::Uniform, size))
            .collect::<Result<Vec<_>, _>>()?;
        debug!("Created {} uniform buffers of {} bytes", buffers.len(), size);
        Ok(Self { buffers, size })
    }

    /// Sized for one `T`.
    pub fn for_type<T: Pod>(device: Arc<Device>) -> RenderResult<Self> {
        Self::new(device, std::mem::size_of::<T>() as vk::DeviceSize)
    }

    fn slot(&self, slot: usize) -> RenderResult<&Buffer> {
        self.buffers.get(slot).ok_or(RenderError::SlotOutOfRange(slot))
    }

    /// Copies `data` to the start of `slot`'s buffer.
    pub fn update(&self, slot: usize, data: &[u8]) -> RenderResult<()> {
        self.slot(slot)?.write_bytes(0, data)?;
        Ok(())
    }

    pub fn update_pod<T: Pod>(&self, slot: usize, value: &T) -> RenderResult<()> {
        self.update(slot, bytemuck::bytes_of(value))
    }

    pub fn descriptor_info(&self, slot: usize) -> RenderResult<vk::DescriptorBufferInfo> {
        Ok(self.slot(slot)?.descriptor_info())
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }
}

impl GpuResource<DeviceContext> for UniformBuffer {
    fn release(&mut self, _ctx: &DeviceContext) {
        self.buffers.clear();
    }
}
