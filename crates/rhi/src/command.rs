//! Command pools, command buffer lifecycle and command recording.
//!
//! Pool and buffer lifecycle are device-level operations on raw handles,
//! because the command session owns them per frame slot. Recording goes
//! through [`Recorder`], a borrowed view pairing the device with one
//! command buffer.
//!
//! ```no_run
//! use ash::vk;
//! use vkframe_rhi::device::Device;
//!
//! # fn example(device: &Device) -> Result<(), vkframe_rhi::RhiError> {
//! let pool = device.create_command_pool(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)?;
//! let cmd = device.allocate_command_buffers(pool, 1)?[0];
//!
//! device.begin_command_buffer(cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
//! device.recorder(cmd).draw(3, 1, 0, 0);
//! device.end_command_buffer(cmd)?;
//! # Ok(())
//! # }
//! ```

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;

// ============================================================================
// Pool and buffer lifecycle
// ============================================================================

impl Device {
    /// Creates a command pool on the graphics queue family.
    pub fn create_command_pool(
        &self,
        flags: vk::CommandPoolCreateFlags,
    ) -> RhiResult<vk::CommandPool> {
        let info = vk::CommandPoolCreateInfo::default()
            .flags(flags)
            .queue_family_index(self.graphics_family());
        let pool = unsafe { self.handle().create_command_pool(&info, None)? };
        debug!("Created command pool {:?} ({:?})", pool, flags);
        Ok(pool)
    }

    /// Destroys a pool and implicitly frees every buffer allocated from it.
    pub fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.handle().destroy_command_pool(pool, None) };
        debug!("Destroyed command pool {:?}", pool);
    }

    /// Allocates `count` primary command buffers.
    pub fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> RhiResult<Vec<vk::CommandBuffer>> {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);
        let buffers = unsafe { self.handle().allocate_command_buffers(&info)? };
        debug!("Allocated {} command buffer(s)", buffers.len());
        Ok(buffers)
    }

    pub fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        if buffers.is_empty() {
            return;
        }
        unsafe { self.handle().free_command_buffers(pool, buffers) };
    }

    pub fn reset_command_buffer(&self, buffer: vk::CommandBuffer) -> RhiResult<()> {
        unsafe {
            self.handle()
                .reset_command_buffer(buffer, vk::CommandBufferResetFlags::empty())?
        };
        Ok(())
    }

    pub fn begin_command_buffer(
        &self,
        buffer: vk::CommandBuffer,
        usage: vk::CommandBufferUsageFlags,
    ) -> RhiResult<()> {
        let info = vk::CommandBufferBeginInfo::default().flags(usage);
        unsafe { self.handle().begin_command_buffer(buffer, &info)? };
        Ok(())
    }

    pub fn end_command_buffer(&self, buffer: vk::CommandBuffer) -> RhiResult<()> {
        unsafe { self.handle().end_command_buffer(buffer)? };
        Ok(())
    }

    /// Borrows `buffer` for recording.
    #[inline]
    pub fn recorder(&self, buffer: vk::CommandBuffer) -> Recorder<'_> {
        Recorder {
            device: self,
            buffer,
        }
    }
}

// ============================================================================
// Recording
// ============================================================================

/// A command buffer in the recording state, paired with its device.
///
/// All methods assume the buffer is between `begin_command_buffer` and
/// `end_command_buffer`; Vulkan validation catches misuse.
#[derive(Clone, Copy)]
pub struct Recorder<'a> {
    device: &'a Device,
    buffer: vk::CommandBuffer,
}

impl Recorder<'_> {
    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    // ------------------------------------------------------------------------
    // Render passes and dynamic state
    // ------------------------------------------------------------------------

    /// Begins `render_pass` on `framebuffer` covering the full `extent`.
    pub fn begin_render_pass(
        &self,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: &[vk::ClearValue],
    ) {
        let info = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(clear_values);
        unsafe {
            self.device
                .handle()
                .cmd_begin_render_pass(self.buffer, &info, vk::SubpassContents::INLINE);
        }
    }

    pub fn end_render_pass(&self) {
        unsafe { self.device.handle().cmd_end_render_pass(self.buffer) };
    }

    pub fn set_viewport(&self, viewport: vk::Viewport) {
        unsafe {
            self.device
                .handle()
                .cmd_set_viewport(self.buffer, 0, &[viewport]);
        }
    }

    pub fn set_scissor(&self, scissor: vk::Rect2D) {
        unsafe {
            self.device
                .handle()
                .cmd_set_scissor(self.buffer, 0, &[scissor]);
        }
    }

    pub fn set_depth_bias(&self, constant_factor: f32, clamp: f32, slope_factor: f32) {
        unsafe {
            self.device.handle().cmd_set_depth_bias(
                self.buffer,
                constant_factor,
                clamp,
                slope_factor,
            );
        }
    }

    // ------------------------------------------------------------------------
    // Binding
    // ------------------------------------------------------------------------

    pub fn bind_graphics_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe {
            self.device.handle().cmd_bind_pipeline(
                self.buffer,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline,
            );
        }
    }

    pub fn bind_descriptor_sets(
        &self,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        unsafe {
            self.device.handle().cmd_bind_descriptor_sets(
                self.buffer,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                first_set,
                sets,
                &[],
            );
        }
    }

    pub fn push_constants_bytes(
        &self,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        unsafe {
            self.device
                .handle()
                .cmd_push_constants(self.buffer, layout, stages, offset, data);
        }
    }

    pub fn bind_vertex_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize) {
        unsafe {
            self.device
                .handle()
                .cmd_bind_vertex_buffers(self.buffer, 0, &[buffer], &[offset]);
        }
    }

    pub fn bind_index_buffer(
        &self,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        unsafe {
            self.device
                .handle()
                .cmd_bind_index_buffer(self.buffer, buffer, offset, index_type);
        }
    }

    // ------------------------------------------------------------------------
    // Drawing and transfer
    // ------------------------------------------------------------------------

    pub fn draw(
        &self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        unsafe {
            self.device.handle().cmd_draw(
                self.buffer,
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            );
        }
    }

    pub fn draw_indexed(
        &self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.device.handle().cmd_draw_indexed(
                self.buffer,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            );
        }
    }

    /// Copies `size` bytes from the start of `src` to the start of `dst`.
    pub fn copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) {
        let region = vk::BufferCopy::default().size(size);
        unsafe {
            self.device
                .handle()
                .cmd_copy_buffer(self.buffer, src, dst, &[region]);
        }
    }

    /// Copies tightly packed texels from `src` into mip 0 of `image`, which
    /// must be in `TRANSFER_DST_OPTIMAL`.
    pub fn copy_buffer_to_image(&self, src: vk::Buffer, image: vk::Image, extent: vk::Extent2D) {
        let region = vk::BufferImageCopy::default()
            .image_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .mip_level(0)
                    .layer_count(1),
            )
            .image_extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            });
        unsafe {
            self.device.handle().cmd_copy_buffer_to_image(
                self.buffer,
                src,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
    }

    /// Linear blit between two mip levels of the same image: the source
    /// level in `TRANSFER_SRC_OPTIMAL`, the destination in
    /// `TRANSFER_DST_OPTIMAL`.
    pub fn blit_image(&self, image: vk::Image, region: &vk::ImageBlit) {
        unsafe {
            self.device.handle().cmd_blit_image(
                self.buffer,
                image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                std::slice::from_ref(region),
                vk::Filter::LINEAR,
            );
        }
    }

    // ------------------------------------------------------------------------
    // Synchronization
    // ------------------------------------------------------------------------

    pub fn pipeline_barrier(
        &self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        image_barriers: &[vk::ImageMemoryBarrier<'_>],
    ) {
        unsafe {
            self.device.handle().cmd_pipeline_barrier(
                self.buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                image_barriers,
            );
        }
    }
}
