//! The Vulkan-backed implementation of the backend traits.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ash::vk;
use tracing::{debug, info, warn};
use vkframe_core::RendererConfig;
use vkframe_rhi::RhiResult;
use vkframe_rhi::descriptor::DescriptorPool;
use vkframe_rhi::device::Device;
use vkframe_rhi::image::{AttachmentImageDesc, Image, Sampler, SamplerDesc};
use vkframe_rhi::instance::Instance;
use vkframe_rhi::physical_device::{find_depth_format, resolve_sample_count, select_physical_device};
use vkframe_rhi::pipeline::{Pipeline, PipelineDesc};
use vkframe_rhi::render_pass::{Framebuffer, RenderPass, RenderPassDesc};
use vkframe_rhi::surface::Surface;
use vkframe_rhi::swapchain::{AcquireResult, Swapchain};

use crate::RenderResult;
use crate::backend::{
    AcquireOutcome, AttachmentImage, CommandBackend, CommandRecorder, FrameSubmission,
    PresentOutcome, SyncBackend, TargetBackend,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// RAII objects handed out by raw handle, destroyed on removal.
struct ObjectTable<K, V> {
    kind: &'static str,
    objects: Mutex<HashMap<K, V>>,
}

impl<K: Eq + Hash + Copy + std::fmt::Debug, V> ObjectTable<K, V> {
    fn new(kind: &'static str) -> Self {
        Self {
            kind,
            objects: Mutex::new(HashMap::new()),
        }
    }

    fn insert(&self, key: K, value: V) -> K {
        lock(&self.objects).insert(key, value);
        key
    }

    fn remove(&self, key: K) {
        if lock(&self.objects).remove(&key).is_none() {
            warn!("Destroying unknown {} {:?}", self.kind, key);
        }
    }

    fn clear(&self) {
        let mut objects = lock(&self.objects);
        if !objects.is_empty() {
            warn!("{} {}(s) still alive at shutdown", objects.len(), self.kind);
        }
        objects.clear();
    }
}

/// Instance, device, swapchain and the render targets built on them.
///
/// Passed by reference to every component that touches the GPU. Render
/// passes, framebuffers, attachments, samplers and pipelines created through
/// [`TargetBackend`] live in internal tables until their `destroy_*` call,
/// or until the context drops.
pub struct DeviceContext {
    // Fields drop top to bottom: everything built on the device first, then
    // the device, surface and instance.
    pipelines: ObjectTable<vk::Pipeline, Pipeline>,
    framebuffers: ObjectTable<vk::Framebuffer, Framebuffer>,
    render_passes: ObjectTable<vk::RenderPass, RenderPass>,
    attachments: ObjectTable<vk::Image, Image>,
    samplers: ObjectTable<vk::Sampler, Sampler>,
    descriptor_pool: DescriptorPool,
    swapchain: Mutex<Swapchain>,
    window_extent: Mutex<vk::Extent2D>,
    msaa_samples: vk::SampleCountFlags,
    depth_format: vk::Format,
    device: Arc<Device>,
    surface: Surface,
    instance: Instance,
}

impl DeviceContext {
    /// Picks a GPU for `surface` and builds the device, swapchain and
    /// descriptor pool.
    pub fn new(
        instance: Instance,
        surface: Surface,
        config: &RendererConfig,
        extent: vk::Extent2D,
    ) -> RenderResult<Self> {
        let info = select_physical_device(instance.handle(), &surface)?;
        let device = Device::new(&instance, &info)?;
        let msaa_samples = resolve_sample_count(config.msaa_samples, info.max_usable_sample_count());
        let depth_format = find_depth_format(instance.handle(), info.device)?;
        let swapchain = Swapchain::new(&instance, device.clone(), &surface, extent.width, extent.height)?;
        let descriptor_pool = DescriptorPool::new(device.clone(), config.descriptor_pool_max_sets)?;

        info!(
            "Device context ready: {}x{} swapchain, x{} MSAA",
            swapchain.extent().width,
            swapchain.extent().height,
            msaa_samples.as_raw()
        );

        Ok(Self {
            pipelines: ObjectTable::new("pipeline"),
            framebuffers: ObjectTable::new("framebuffer"),
            render_passes: ObjectTable::new("render pass"),
            attachments: ObjectTable::new("attachment"),
            samplers: ObjectTable::new("sampler"),
            descriptor_pool,
            swapchain: Mutex::new(swapchain),
            window_extent: Mutex::new(extent),
            msaa_samples,
            depth_format,
            device,
            surface,
            instance,
        })
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    #[inline]
    pub fn descriptor_pool(&self) -> &DescriptorPool {
        &self.descriptor_pool
    }

    #[inline]
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    #[inline]
    pub fn surface(&self) -> &Surface {
        &self.surface
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            warn!("wait_idle failed during teardown: {}", e);
        }
        self.pipelines.clear();
        self.framebuffers.clear();
        self.render_passes.clear();
        self.attachments.clear();
        self.samplers.clear();
        debug!("Device context released");
    }
}

impl SyncBackend for DeviceContext {
    fn create_fence(&self, signaled: bool) -> RhiResult<vk::Fence> {
        self.device.create_fence(signaled)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        self.device.destroy_fence(fence);
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout: u64) -> RhiResult<()> {
        self.device.wait_for_fence(fence, timeout)
    }

    fn reset_fence(&self, fence: vk::Fence) -> RhiResult<()> {
        self.device.reset_fence(fence)
    }

    fn create_semaphore(&self) -> RhiResult<vk::Semaphore> {
        self.device.create_semaphore()
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.device.destroy_semaphore(semaphore);
    }

    fn acquire_next_image(&self, signal: vk::Semaphore) -> RhiResult<AcquireOutcome> {
        Ok(match lock(&self.swapchain).acquire_next_image(signal)? {
            AcquireResult::Image { index, suboptimal } => AcquireOutcome::Image { index, suboptimal },
            AcquireResult::OutOfDate => AcquireOutcome::OutOfDate,
        })
    }

    fn submit_frame(&self, submission: &FrameSubmission) -> RhiResult<()> {
        let wait_semaphores = [submission.wait_semaphore];
        let wait_stages = [submission.wait_stage];
        let command_buffers = [submission.command_buffer];
        let signal_semaphores = [submission.signal_semaphore];
        let info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);
        // The slot's objects come from FrameSynchronizer, which only submits
        // a fully recorded buffer with an unsignaled fence.
        unsafe { self.device.submit_graphics(&[info], submission.fence) }
    }

    fn present(&self, image_index: u32, wait: vk::Semaphore) -> RhiResult<PresentOutcome> {
        let needs_recreate = lock(&self.swapchain).present(image_index, wait)?;
        Ok(if needs_recreate {
            PresentOutcome::NeedsRecreate
        } else {
            PresentOutcome::Presented
        })
    }

    fn wait_idle(&self) -> RhiResult<()> {
        self.device.wait_idle()
    }
}

impl CommandBackend for DeviceContext {
    fn create_command_pool(&self) -> RhiResult<vk::CommandPool> {
        self.device
            .create_command_pool(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        self.device.destroy_command_pool(pool);
    }

    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> RhiResult<Vec<vk::CommandBuffer>> {
        self.device.allocate_command_buffers(pool, count)
    }

    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        self.device.free_command_buffers(pool, buffers);
    }

    fn reset_command_buffer(&self, buffer: vk::CommandBuffer) -> RhiResult<()> {
        self.device.reset_command_buffer(buffer)
    }

    fn begin_command_buffer(
        &self,
        buffer: vk::CommandBuffer,
        usage: vk::CommandBufferUsageFlags,
    ) -> RhiResult<()> {
        self.device.begin_command_buffer(buffer, usage)
    }

    fn end_command_buffer(&self, buffer: vk::CommandBuffer) -> RhiResult<()> {
        self.device.end_command_buffer(buffer)
    }

    fn submit_and_wait(&self, buffer: vk::CommandBuffer) -> RhiResult<()> {
        let command_buffers = [buffer];
        let info = vk::SubmitInfo::default().command_buffers(&command_buffers);
        unsafe { self.device.submit_graphics(&[info], vk::Fence::null())? };
        self.device.graphics_queue_wait_idle()
    }
}

impl TargetBackend for DeviceContext {
    fn surface_format(&self) -> vk::Format {
        lock(&self.swapchain).format()
    }

    fn surface_extent(&self) -> vk::Extent2D {
        lock(&self.swapchain).extent()
    }

    fn swapchain_image_views(&self) -> Vec<vk::ImageView> {
        lock(&self.swapchain).image_views().to_vec()
    }

    fn msaa_samples(&self) -> vk::SampleCountFlags {
        self.msaa_samples
    }

    fn depth_format(&self) -> vk::Format {
        self.depth_format
    }

    fn set_window_extent(&self, extent: vk::Extent2D) {
        *lock(&self.window_extent) = extent;
    }

    fn recreate_swapchain(&self) -> RhiResult<()> {
        let extent = *lock(&self.window_extent);
        lock(&self.swapchain).recreate(extent.width, extent.height)
    }

    fn create_render_pass(&self, desc: &RenderPassDesc) -> RhiResult<vk::RenderPass> {
        let render_pass = RenderPass::new(self.device.clone(), desc)?;
        Ok(self.render_passes.insert(render_pass.handle(), render_pass))
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.render_passes.remove(render_pass);
    }

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        views: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> RhiResult<vk::Framebuffer> {
        let framebuffer = Framebuffer::new(self.device.clone(), render_pass, views, extent)?;
        Ok(self.framebuffers.insert(framebuffer.handle(), framebuffer))
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.framebuffers.remove(framebuffer);
    }

    fn create_attachment(&self, desc: &AttachmentImageDesc) -> RhiResult<AttachmentImage> {
        let image = Image::new(self.device.clone(), *desc)?;
        let attachment = AttachmentImage {
            image: image.handle(),
            view: image.view(),
        };
        self.attachments.insert(attachment.image, image);
        Ok(attachment)
    }

    fn destroy_attachment(&self, attachment: AttachmentImage) {
        self.attachments.remove(attachment.image);
    }

    fn create_sampler(&self, desc: &SamplerDesc) -> RhiResult<vk::Sampler> {
        let sampler = Sampler::new(self.device.clone(), desc)?;
        Ok(self.samplers.insert(sampler.handle(), sampler))
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        self.samplers.remove(sampler);
    }

    fn create_graphics_pipeline(&self, desc: &PipelineDesc) -> RhiResult<vk::Pipeline> {
        let pipeline = Pipeline::new(self.device.clone(), desc)?;
        Ok(self.pipelines.insert(pipeline.handle(), pipeline))
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.pipelines.remove(pipeline);
    }
}

impl CommandRecorder for DeviceContext {
    fn cmd_begin_render_pass(
        &self,
        buffer: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: &[vk::ClearValue],
    ) {
        self.device
            .recorder(buffer)
            .begin_render_pass(render_pass, framebuffer, extent, clear_values);
    }

    fn cmd_end_render_pass(&self, buffer: vk::CommandBuffer) {
        self.device.recorder(buffer).end_render_pass();
    }

    fn cmd_set_viewport(&self, buffer: vk::CommandBuffer, viewport: vk::Viewport) {
        self.device.recorder(buffer).set_viewport(viewport);
    }

    fn cmd_set_scissor(&self, buffer: vk::CommandBuffer, scissor: vk::Rect2D) {
        self.device.recorder(buffer).set_scissor(scissor);
    }

    fn cmd_set_depth_bias(&self, buffer: vk::CommandBuffer, constant: f32, clamp: f32, slope: f32) {
        self.device
            .recorder(buffer)
            .set_depth_bias(constant, clamp, slope);
    }

    fn cmd_bind_pipeline(&self, buffer: vk::CommandBuffer, pipeline: vk::Pipeline) {
        self.device.recorder(buffer).bind_graphics_pipeline(pipeline);
    }

    fn cmd_bind_descriptor_sets(
        &self,
        buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        self.device
            .recorder(buffer)
            .bind_descriptor_sets(layout, first_set, sets);
    }

    fn cmd_push_constants(
        &self,
        buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        data: &[u8],
    ) {
        self.device
            .recorder(buffer)
            .push_constants_bytes(layout, stages, 0, data);
    }

    fn cmd_bind_vertex_buffer(&self, buffer: vk::CommandBuffer, vertex_buffer: vk::Buffer) {
        self.device.recorder(buffer).bind_vertex_buffer(vertex_buffer, 0);
    }

    fn cmd_bind_index_buffer(
        &self,
        buffer: vk::CommandBuffer,
        index_buffer: vk::Buffer,
        index_type: vk::IndexType,
    ) {
        self.device
            .recorder(buffer)
            .bind_index_buffer(index_buffer, 0, index_type);
    }

    fn cmd_draw(&self, buffer: vk::CommandBuffer, vertex_count: u32) {
        self.device.recorder(buffer).draw(vertex_count, 1, 0, 0);
    }

    fn cmd_draw_indexed(&self, buffer: vk::CommandBuffer, index_count: u32) {
        self.device
            .recorder(buffer)
            .draw_indexed(index_count, 1, 0, 0, 0);
    }

    fn cmd_copy_buffer(
        &self,
        buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    ) {
        self.device.recorder(buffer).copy_buffer(src, dst, size);
    }

    fn cmd_copy_buffer_to_image(
        &self,
        buffer: vk::CommandBuffer,
        src: vk::Buffer,
        image: vk::Image,
        extent: vk::Extent2D,
    ) {
        self.device
            .recorder(buffer)
            .copy_buffer_to_image(src, image, extent);
    }

    fn cmd_blit_image(&self, buffer: vk::CommandBuffer, image: vk::Image, region: &vk::ImageBlit) {
        self.device.recorder(buffer).blit_image(image, region);
    }

    fn cmd_image_barrier(
        &self,
        buffer: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barrier: &vk::ImageMemoryBarrier<'_>,
    ) {
        self.device
            .recorder(buffer)
            .pipeline_barrier(src_stage, dst_stage, std::slice::from_ref(barrier));
    }
}
