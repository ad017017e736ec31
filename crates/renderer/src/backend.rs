//! The seam between the frame orchestration logic and Vulkan.
//!
//! Every component in this crate talks to the GPU through these traits,
//! using raw `ash::vk` handles. [`crate::DeviceContext`] implements them
//! over `vkframe_rhi`; the unit tests implement them with a recording mock.
//!
//! Objects created through a backend are owned by the caller, which must
//! hand them back to the matching `destroy_*` method once the GPU no longer
//! references them.

use ash::vk;
use vkframe_rhi::RhiResult;
use vkframe_rhi::image::{AttachmentImageDesc, SamplerDesc};
use vkframe_rhi::pipeline::PipelineDesc;
use vkframe_rhi::render_pass::RenderPassDesc;

/// Outcome of acquiring a swapchain image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// `index` is ready once the signal semaphore fires. A suboptimal
    /// swapchain can still be rendered to and presented.
    Image { index: u32, suboptimal: bool },
    /// The surface changed; nothing was acquired and nothing was signaled.
    OutOfDate,
}

/// Outcome of queueing a present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    /// Presented (or dropped) against a swapchain that is out of date or
    /// suboptimal. The swapchain should be recreated.
    NeedsRecreate,
}

/// The one submission a frame makes.
#[derive(Debug, Clone, Copy)]
pub struct FrameSubmission {
    pub command_buffer: vk::CommandBuffer,
    pub wait_semaphore: vk::Semaphore,
    pub wait_stage: vk::PipelineStageFlags,
    pub signal_semaphore: vk::Semaphore,
    pub fence: vk::Fence,
}

/// An attachment image and its view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
}

/// Fences, semaphores and the acquire/submit/present cycle.
pub trait SyncBackend {
    fn create_fence(&self, signaled: bool) -> RhiResult<vk::Fence>;
    fn destroy_fence(&self, fence: vk::Fence);
    /// Blocks until `fence` is signaled or `timeout` nanoseconds pass.
    fn wait_for_fence(&self, fence: vk::Fence, timeout: u64) -> RhiResult<()>;
    fn reset_fence(&self, fence: vk::Fence) -> RhiResult<()>;

    fn create_semaphore(&self) -> RhiResult<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    fn acquire_next_image(&self, signal: vk::Semaphore) -> RhiResult<AcquireOutcome>;
    fn submit_frame(&self, submission: &FrameSubmission) -> RhiResult<()>;
    fn present(&self, image_index: u32, wait: vk::Semaphore) -> RhiResult<PresentOutcome>;

    fn wait_idle(&self) -> RhiResult<()>;
}

/// Command pools, command buffers and one-shot submission.
pub trait CommandBackend {
    /// Creates a pool whose buffers can be reset individually.
    fn create_command_pool(&self) -> RhiResult<vk::CommandPool>;
    fn destroy_command_pool(&self, pool: vk::CommandPool);
    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> RhiResult<Vec<vk::CommandBuffer>>;
    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]);
    fn reset_command_buffer(&self, buffer: vk::CommandBuffer) -> RhiResult<()>;
    fn begin_command_buffer(
        &self,
        buffer: vk::CommandBuffer,
        usage: vk::CommandBufferUsageFlags,
    ) -> RhiResult<()>;
    fn end_command_buffer(&self, buffer: vk::CommandBuffer) -> RhiResult<()>;
    /// Submits `buffer` on the graphics queue and blocks until the queue is idle.
    fn submit_and_wait(&self, buffer: vk::CommandBuffer) -> RhiResult<()>;
}

/// Render targets, pipelines and the swapchain they attach to.
pub trait TargetBackend {
    fn surface_format(&self) -> vk::Format;
    fn surface_extent(&self) -> vk::Extent2D;
    fn swapchain_image_views(&self) -> Vec<vk::ImageView>;
    /// Sample count the main pass renders with.
    fn msaa_samples(&self) -> vk::SampleCountFlags;
    /// Depth format of the main pass.
    fn depth_format(&self) -> vk::Format;

    /// Records the window size the next swapchain should match.
    fn set_window_extent(&self, extent: vk::Extent2D);
    /// Rebuilds the swapchain for the current window size. Image views
    /// returned earlier become invalid.
    fn recreate_swapchain(&self) -> RhiResult<()>;

    fn create_render_pass(&self, desc: &RenderPassDesc) -> RhiResult<vk::RenderPass>;
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);
    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        views: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> RhiResult<vk::Framebuffer>;
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);
    fn create_attachment(&self, desc: &AttachmentImageDesc) -> RhiResult<AttachmentImage>;
    fn destroy_attachment(&self, attachment: AttachmentImage);
    fn create_sampler(&self, desc: &SamplerDesc) -> RhiResult<vk::Sampler>;
    fn destroy_sampler(&self, sampler: vk::Sampler);
    fn create_graphics_pipeline(&self, desc: &PipelineDesc) -> RhiResult<vk::Pipeline>;
    fn destroy_pipeline(&self, pipeline: vk::Pipeline);
}

/// Command recording. `buffer` must be in the recording state.
pub trait CommandRecorder {
    fn cmd_begin_render_pass(
        &self,
        buffer: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: &[vk::ClearValue],
    );
    fn cmd_end_render_pass(&self, buffer: vk::CommandBuffer);
    fn cmd_set_viewport(&self, buffer: vk::CommandBuffer, viewport: vk::Viewport);
    fn cmd_set_scissor(&self, buffer: vk::CommandBuffer, scissor: vk::Rect2D);
    fn cmd_set_depth_bias(&self, buffer: vk::CommandBuffer, constant: f32, clamp: f32, slope: f32);
    fn cmd_bind_pipeline(&self, buffer: vk::CommandBuffer, pipeline: vk::Pipeline);
    fn cmd_bind_descriptor_sets(
        &self,
        buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    );
    fn cmd_push_constants(
        &self,
        buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        data: &[u8],
    );
    fn cmd_bind_vertex_buffer(&self, buffer: vk::CommandBuffer, vertex_buffer: vk::Buffer);
    fn cmd_bind_index_buffer(
        &self,
        buffer: vk::CommandBuffer,
        index_buffer: vk::Buffer,
        index_type: vk::IndexType,
    );
    fn cmd_draw(&self, buffer: vk::CommandBuffer, vertex_count: u32);
    fn cmd_draw_indexed(&self, buffer: vk::CommandBuffer, index_count: u32);
    fn cmd_copy_buffer(
        &self,
        buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    );
    /// Copies into mip 0 of a color image in `TRANSFER_DST_OPTIMAL`.
    fn cmd_copy_buffer_to_image(
        &self,
        buffer: vk::CommandBuffer,
        src: vk::Buffer,
        image: vk::Image,
        extent: vk::Extent2D,
    );
    /// Linear blit between two mip levels of `image`.
    fn cmd_blit_image(&self, buffer: vk::CommandBuffer, image: vk::Image, region: &vk::ImageBlit);
    fn cmd_image_barrier(
        &self,
        buffer: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barrier: &vk::ImageMemoryBarrier<'_>,
    );
}

/// Everything the frame renderer needs from the GPU.
pub trait GpuBackend: SyncBackend + CommandBackend + TargetBackend + CommandRecorder {}

impl<T> GpuBackend for T where T: SyncBackend + CommandBackend + TargetBackend + CommandRecorder + ?Sized
{}
