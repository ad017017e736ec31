//! Recording backend for unit tests.
//!
//! Hands out unique fake handles, logs every command in order and tracks
//! which objects are alive. Fences are real: a submitted fence is signaled
//! from another thread after a configurable delay, and waits block on it.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use ash::vk::{self, Handle};
use vkframe_rhi::image::{AttachmentImageDesc, SamplerDesc};
use vkframe_rhi::pipeline::PipelineDesc;
use vkframe_rhi::render_pass::RenderPassDesc;
use vkframe_rhi::vertex::Vertex;
use vkframe_rhi::{RhiError, RhiResult};

use crate::backend::{
    AcquireOutcome, AttachmentImage, CommandBackend, CommandRecorder, FrameSubmission,
    PresentOutcome, SyncBackend, TargetBackend,
};
use crate::program::ProgramInterface;

const IMAGE_COUNT: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    WaitFence(vk::Fence),
    ResetFence(vk::Fence),
    Acquire,
    Submit(vk::CommandBuffer),
    Present(u32),
    WaitIdle,
    DestroyPipeline(vk::Pipeline),
    ResetCommandBuffer(vk::CommandBuffer),
    BeginCommandBuffer {
        buffer: vk::CommandBuffer,
        usage: vk::CommandBufferUsageFlags,
    },
    EndCommandBuffer(vk::CommandBuffer),
    FreeCommandBuffers(Vec<vk::CommandBuffer>),
    SubmitAndWait(vk::CommandBuffer),
    RecreateSwapchain,
    CreateFramebuffer {
        views: usize,
        extent: vk::Extent2D,
    },
    BeginRenderPass {
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: usize,
    },
    EndRenderPass,
    SetViewport {
        width: f32,
        height: f32,
    },
    SetScissor(vk::Extent2D),
    SetDepthBias {
        constant: f32,
        slope: f32,
    },
    BindPipeline(vk::Pipeline),
    BindDescriptorSets {
        first_set: u32,
        sets: Vec<vk::DescriptorSet>,
    },
    PushConstants {
        stages: vk::ShaderStageFlags,
        size: usize,
    },
    BindVertexBuffer(vk::Buffer),
    BindIndexBuffer(vk::Buffer, vk::IndexType),
    Draw(u32),
    DrawIndexed(u32),
    CopyBuffer {
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    },
    CopyBufferToImage {
        src: vk::Buffer,
        image: vk::Image,
        extent: vk::Extent2D,
    },
    BlitImage {
        src_mip: u32,
        dst_mip: u32,
        /// Far corner of the destination region.
        dst_size: [i32; 2],
    },
    ImageBarrier {
        base_mip: u32,
        levels: u32,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },
}

type FenceState = Arc<(Mutex<bool>, Condvar)>;
/// Submissions whose fence has not been signaled yet.
type InFlight = Arc<(Mutex<usize>, Condvar)>;

struct State {
    events: Vec<Event>,
    fences: HashMap<vk::Fence, FenceState>,
    semaphores: HashSet<vk::Semaphore>,
    command_pools: HashSet<vk::CommandPool>,
    render_passes: HashMap<vk::RenderPass, RenderPassDesc>,
    framebuffers: HashMap<vk::Framebuffer, vk::Extent2D>,
    attachments: HashMap<vk::Image, AttachmentImageDesc>,
    samplers: HashSet<vk::Sampler>,
    pipelines: HashMap<vk::Pipeline, PipelineDesc>,
    last_pipeline: Option<PipelineDesc>,
    last_sampler: Option<SamplerDesc>,
    last_submission: Option<FrameSubmission>,
    acquires: VecDeque<AcquireOutcome>,
    presents: VecDeque<PresentOutcome>,
    acquired: u32,
    extent: vk::Extent2D,
    window_extent: vk::Extent2D,
    image_views: Vec<vk::ImageView>,
    msaa_samples: vk::SampleCountFlags,
    fence_delay: Duration,
}

pub struct MockBackend {
    state: Mutex<State>,
    in_flight: InFlight,
    next_handle: AtomicU64,
}

impl MockBackend {
    pub fn new() -> Self {
        let extent = vk::Extent2D {
            width: 1280,
            height: 720,
        };
        let backend = Self {
            state: Mutex::new(State {
                events: Vec::new(),
                fences: HashMap::new(),
                semaphores: HashSet::new(),
                command_pools: HashSet::new(),
                render_passes: HashMap::new(),
                framebuffers: HashMap::new(),
                attachments: HashMap::new(),
                samplers: HashSet::new(),
                pipelines: HashMap::new(),
                last_pipeline: None,
                last_sampler: None,
                last_submission: None,
                acquires: VecDeque::new(),
                presents: VecDeque::new(),
                acquired: 0,
                extent,
                window_extent: extent,
                image_views: Vec::new(),
                msaa_samples: vk::SampleCountFlags::TYPE_1,
                fence_delay: Duration::ZERO,
            }),
            in_flight: Arc::new((Mutex::new(0), Condvar::new())),
            next_handle: AtomicU64::new(0x1000),
        };
        let views = backend.fresh_views();
        backend.state().image_views = views;
        backend
    }

    /// A program interface with fake handles, with or without a fragment
    /// stage.
    pub fn program(with_fragment: bool) -> ProgramInterface {
        ProgramInterface {
            layout: vk::PipelineLayout::from_raw(0xA1),
            vertex_module: vk::ShaderModule::from_raw(0xA2),
            fragment_module: with_fragment.then(|| vk::ShaderModule::from_raw(0xA3)),
            vertex_bindings: vec![Vertex::binding_description()],
            vertex_attributes: Vertex::attribute_descriptions().to_vec(),
            push_stages: if with_fragment {
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
            } else {
                vk::ShaderStageFlags::VERTEX
            },
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    fn handle<H: Handle>(&self) -> H {
        H::from_raw(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    fn fresh_views(&self) -> Vec<vk::ImageView> {
        (0..IMAGE_COUNT).map(|_| self.handle()).collect()
    }

    fn log(&self, event: Event) {
        self.state().events.push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.state().events.clone()
    }

    pub fn clear_events(&self) {
        self.state().events.clear();
    }

    /// Delay between a submission and its fence signaling.
    pub fn set_fence_delay(&self, delay: Duration) {
        self.state().fence_delay = delay;
    }

    pub fn push_acquire(&self, outcome: AcquireOutcome) {
        self.state().acquires.push_back(outcome);
    }

    pub fn push_present(&self, outcome: PresentOutcome) {
        self.state().presents.push_back(outcome);
    }

    pub fn set_msaa_samples(&self, samples: vk::SampleCountFlags) {
        self.state().msaa_samples = samples;
    }

    pub fn is_fence_signaled(&self, fence: vk::Fence) -> bool {
        let state = self.state().fences.get(&fence).cloned();
        state.is_some_and(|s| *s.0.lock().unwrap())
    }

    pub fn last_submission(&self) -> Option<FrameSubmission> {
        self.state().last_submission
    }

    pub fn last_pipeline(&self) -> Option<PipelineDesc> {
        self.state().last_pipeline.clone()
    }

    pub fn last_sampler(&self) -> Option<SamplerDesc> {
        self.state().last_sampler
    }

    pub fn image_count(&self) -> usize {
        IMAGE_COUNT
    }

    pub fn live_fences(&self) -> usize {
        self.state().fences.len()
    }

    pub fn live_semaphores(&self) -> usize {
        self.state().semaphores.len()
    }

    pub fn live_command_pools(&self) -> usize {
        self.state().command_pools.len()
    }

    pub fn live_render_passes(&self) -> usize {
        self.state().render_passes.len()
    }

    pub fn live_framebuffers(&self) -> usize {
        self.state().framebuffers.len()
    }

    pub fn live_framebuffer_extents(&self) -> Vec<vk::Extent2D> {
        self.state().framebuffers.values().copied().collect()
    }

    pub fn live_attachments(&self) -> usize {
        self.state().attachments.len()
    }

    pub fn live_samplers(&self) -> usize {
        self.state().samplers.len()
    }

    pub fn live_pipelines(&self) -> usize {
        self.state().pipelines.len()
    }

    fn fence_state(&self, fence: vk::Fence) -> RhiResult<FenceState> {
        self.state()
            .fences
            .get(&fence)
            .cloned()
            .ok_or_else(|| RhiError::InvalidHandle(format!("unknown fence {fence:?}")))
    }
}

fn set_signaled(fence: &FenceState, signaled: bool) {
    let (lock, condvar) = &**fence;
    *lock.lock().unwrap() = signaled;
    condvar.notify_all();
}

impl SyncBackend for MockBackend {
    fn create_fence(&self, signaled: bool) -> RhiResult<vk::Fence> {
        let fence = self.handle();
        self.state()
            .fences
            .insert(fence, Arc::new((Mutex::new(signaled), Condvar::new())));
        Ok(fence)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        self.state().fences.remove(&fence);
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout: u64) -> RhiResult<()> {
        self.log(Event::WaitFence(fence));
        let state = self.fence_state(fence)?;
        let (lock, condvar) = &*state;
        let guard = lock.lock().unwrap();
        if timeout == u64::MAX {
            let _signaled = condvar.wait_while(guard, |s| !*s).unwrap();
            Ok(())
        } else {
            let (_guard, result) = condvar
                .wait_timeout_while(guard, Duration::from_nanos(timeout), |s| !*s)
                .unwrap();
            if result.timed_out() {
                Err(RhiError::VulkanError(vk::Result::TIMEOUT))
            } else {
                Ok(())
            }
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> RhiResult<()> {
        self.log(Event::ResetFence(fence));
        set_signaled(&self.fence_state(fence)?, false);
        Ok(())
    }

    fn create_semaphore(&self) -> RhiResult<vk::Semaphore> {
        let semaphore = self.handle();
        self.state().semaphores.insert(semaphore);
        Ok(semaphore)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.state().semaphores.remove(&semaphore);
    }

    fn acquire_next_image(&self, _signal: vk::Semaphore) -> RhiResult<AcquireOutcome> {
        let mut state = self.state();
        state.events.push(Event::Acquire);
        if let Some(outcome) = state.acquires.pop_front() {
            return Ok(outcome);
        }
        let index = state.acquired % IMAGE_COUNT as u32;
        state.acquired += 1;
        Ok(AcquireOutcome::Image {
            index,
            suboptimal: false,
        })
    }

    fn submit_frame(&self, submission: &FrameSubmission) -> RhiResult<()> {
        let fence = self.fence_state(submission.fence)?;
        let delay = {
            let mut state = self.state();
            state.events.push(Event::Submit(submission.command_buffer));
            state.last_submission = Some(*submission);
            state.fence_delay
        };
        if delay.is_zero() {
            set_signaled(&fence, true);
        } else {
            *self.in_flight.0.lock().unwrap() += 1;
            let in_flight = Arc::clone(&self.in_flight);
            thread::spawn(move || {
                thread::sleep(delay);
                set_signaled(&fence, true);
                let (lock, condvar) = &*in_flight;
                *lock.lock().unwrap() -= 1;
                condvar.notify_all();
            });
        }
        Ok(())
    }

    fn present(&self, image_index: u32, _wait: vk::Semaphore) -> RhiResult<PresentOutcome> {
        let mut state = self.state();
        state.events.push(Event::Present(image_index));
        Ok(state
            .presents
            .pop_front()
            .unwrap_or(PresentOutcome::Presented))
    }

    /// Blocks until every submitted fence has signaled.
    fn wait_idle(&self) -> RhiResult<()> {
        self.log(Event::WaitIdle);
        let (lock, condvar) = &*self.in_flight;
        let _idle = condvar.wait_while(lock.lock().unwrap(), |n| *n > 0).unwrap();
        Ok(())
    }
}

impl CommandBackend for MockBackend {
    fn create_command_pool(&self) -> RhiResult<vk::CommandPool> {
        let pool = self.handle();
        self.state().command_pools.insert(pool);
        Ok(pool)
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        self.state().command_pools.remove(&pool);
    }

    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> RhiResult<Vec<vk::CommandBuffer>> {
        if !self.state().command_pools.contains(&pool) {
            return Err(RhiError::InvalidHandle(format!("unknown pool {pool:?}")));
        }
        Ok((0..count).map(|_| self.handle()).collect())
    }

    fn free_command_buffers(&self, _pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        self.log(Event::FreeCommandBuffers(buffers.to_vec()));
    }

    fn reset_command_buffer(&self, buffer: vk::CommandBuffer) -> RhiResult<()> {
        self.log(Event::ResetCommandBuffer(buffer));
        Ok(())
    }

    fn begin_command_buffer(
        &self,
        buffer: vk::CommandBuffer,
        usage: vk::CommandBufferUsageFlags,
    ) -> RhiResult<()> {
        self.log(Event::BeginCommandBuffer { buffer, usage });
        Ok(())
    }

    fn end_command_buffer(&self, buffer: vk::CommandBuffer) -> RhiResult<()> {
        self.log(Event::EndCommandBuffer(buffer));
        Ok(())
    }

    fn submit_and_wait(&self, buffer: vk::CommandBuffer) -> RhiResult<()> {
        self.log(Event::SubmitAndWait(buffer));
        Ok(())
    }
}

impl TargetBackend for MockBackend {
    fn surface_format(&self) -> vk::Format {
        vk::Format::B8G8R8A8_SRGB
    }

    fn surface_extent(&self) -> vk::Extent2D {
        self.state().extent
    }

    fn swapchain_image_views(&self) -> Vec<vk::ImageView> {
        self.state().image_views.clone()
    }

    fn msaa_samples(&self) -> vk::SampleCountFlags {
        self.state().msaa_samples
    }

    fn depth_format(&self) -> vk::Format {
        vk::Format::D32_SFLOAT
    }

    fn set_window_extent(&self, extent: vk::Extent2D) {
        self.state().window_extent = extent;
    }

    fn recreate_swapchain(&self) -> RhiResult<()> {
        let views = self.fresh_views();
        let mut state = self.state();
        state.events.push(Event::RecreateSwapchain);
        state.extent = state.window_extent;
        state.image_views = views;
        Ok(())
    }

    fn create_render_pass(&self, desc: &RenderPassDesc) -> RhiResult<vk::RenderPass> {
        desc.validate()?;
        let render_pass = self.handle();
        self.state().render_passes.insert(render_pass, desc.clone());
        Ok(render_pass)
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.state().render_passes.remove(&render_pass);
    }

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        views: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> RhiResult<vk::Framebuffer> {
        let mut state = self.state();
        let attachments = state
            .render_passes
            .get(&render_pass)
            .map(|desc| desc.attachments.len())
            .ok_or_else(|| RhiError::InvalidHandle(format!("unknown render pass {render_pass:?}")))?;
        if attachments != views.len() {
            return Err(RhiError::InvalidHandle(format!(
                "{} views for {} attachments",
                views.len(),
                attachments
            )));
        }
        let framebuffer = self.handle();
        state.framebuffers.insert(framebuffer, extent);
        state.events.push(Event::CreateFramebuffer {
            views: views.len(),
            extent,
        });
        Ok(framebuffer)
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.state().framebuffers.remove(&framebuffer);
    }

    fn create_attachment(&self, desc: &AttachmentImageDesc) -> RhiResult<AttachmentImage> {
        let attachment = AttachmentImage {
            image: self.handle(),
            view: self.handle(),
        };
        self.state().attachments.insert(attachment.image, *desc);
        Ok(attachment)
    }

    fn destroy_attachment(&self, attachment: AttachmentImage) {
        self.state().attachments.remove(&attachment.image);
    }

    fn create_sampler(&self, desc: &SamplerDesc) -> RhiResult<vk::Sampler> {
        let sampler = self.handle();
        let mut state = self.state();
        state.samplers.insert(sampler);
        state.last_sampler = Some(*desc);
        Ok(sampler)
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        self.state().samplers.remove(&sampler);
    }

    fn create_graphics_pipeline(&self, desc: &PipelineDesc) -> RhiResult<vk::Pipeline> {
        let pipeline = self.handle();
        let mut state = self.state();
        state.pipelines.insert(pipeline, desc.clone());
        state.last_pipeline = Some(desc.clone());
        Ok(pipeline)
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        let mut state = self.state();
        state.events.push(Event::DestroyPipeline(pipeline));
        state.pipelines.remove(&pipeline);
    }
}

impl CommandRecorder for MockBackend {
    fn cmd_begin_render_pass(
        &self,
        _buffer: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: &[vk::ClearValue],
    ) {
        self.log(Event::BeginRenderPass {
            render_pass,
            framebuffer,
            extent,
            clear_values: clear_values.len(),
        });
    }

    fn cmd_end_render_pass(&self, _buffer: vk::CommandBuffer) {
        self.log(Event::EndRenderPass);
    }

    fn cmd_set_viewport(&self, _buffer: vk::CommandBuffer, viewport: vk::Viewport) {
        self.log(Event::SetViewport {
            width: viewport.width,
            height: viewport.height,
        });
    }

    fn cmd_set_scissor(&self, _buffer: vk::CommandBuffer, scissor: vk::Rect2D) {
        self.log(Event::SetScissor(scissor.extent));
    }

    fn cmd_set_depth_bias(&self, _buffer: vk::CommandBuffer, constant: f32, _clamp: f32, slope: f32) {
        self.log(Event::SetDepthBias { constant, slope });
    }

    fn cmd_bind_pipeline(&self, _buffer: vk::CommandBuffer, pipeline: vk::Pipeline) {
        self.log(Event::BindPipeline(pipeline));
    }

    fn cmd_bind_descriptor_sets(
        &self,
        _buffer: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        self.log(Event::BindDescriptorSets {
            first_set,
            sets: sets.to_vec(),
        });
    }

    fn cmd_push_constants(
        &self,
        _buffer: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        data: &[u8],
    ) {
        self.log(Event::PushConstants {
            stages,
            size: data.len(),
        });
    }

    fn cmd_bind_vertex_buffer(&self, _buffer: vk::CommandBuffer, vertex_buffer: vk::Buffer) {
        self.log(Event::BindVertexBuffer(vertex_buffer));
    }

    fn cmd_bind_index_buffer(
        &self,
        _buffer: vk::CommandBuffer,
        index_buffer: vk::Buffer,
        index_type: vk::IndexType,
    ) {
        self.log(Event::BindIndexBuffer(index_buffer, index_type));
    }

    fn cmd_draw(&self, _buffer: vk::CommandBuffer, vertex_count: u32) {
        self.log(Event::Draw(vertex_count));
    }

    fn cmd_draw_indexed(&self, _buffer: vk::CommandBuffer, index_count: u32) {
        self.log(Event::DrawIndexed(index_count));
    }

    fn cmd_copy_buffer(
        &self,
        _buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    ) {
        self.log(Event::CopyBuffer { src, dst, size });
    }

    fn cmd_copy_buffer_to_image(
        &self,
        _buffer: vk::CommandBuffer,
        src: vk::Buffer,
        image: vk::Image,
        extent: vk::Extent2D,
    ) {
        self.log(Event::CopyBufferToImage { src, image, extent });
    }

    fn cmd_blit_image(&self, _buffer: vk::CommandBuffer, _image: vk::Image, region: &vk::ImageBlit) {
        let far = region.dst_offsets[1];
        self.log(Event::BlitImage {
            src_mip: region.src_subresource.mip_level,
            dst_mip: region.dst_subresource.mip_level,
            dst_size: [far.x, far.y],
        });
    }

    fn cmd_image_barrier(
        &self,
        _buffer: vk::CommandBuffer,
        _src_stage: vk::PipelineStageFlags,
        _dst_stage: vk::PipelineStageFlags,
        barrier: &vk::ImageMemoryBarrier<'_>,
    ) {
        self.log(Event::ImageBarrier {
            base_mip: barrier.subresource_range.base_mip_level,
            levels: barrier.subresource_range.level_count,
            old: barrier.old_layout,
            new: barrier.new_layout,
        });
    }
}
