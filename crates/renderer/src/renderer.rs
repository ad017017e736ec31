//! The per-frame loop.
//!
//! [`FrameRenderer`] owns the command session and the render stages, and
//! drives one frame per [`FrameRenderer::render_frame`] call:
//!
//! 1. wait for the slot, acquire an image and begin recording
//! 2. let the caller update per-slot data
//! 3. record the shadow stage, then the main stage
//! 4. submit and present
//!
//! Swapchain invalidation (out of date at acquire, out of date or
//! suboptimal at present, a resize) rebuilds the main pass targets before
//! the next frame is begun.

use ash::vk;
use tracing::{debug, error, info};
use vkframe_core::RendererConfig;

use crate::backend::GpuBackend;
use crate::batch::{DrawBatchManager, DrawStats};
use crate::command_session::{CommandSession, FrameDescriptor};
use crate::program::ProgramInterface;
use crate::render_pass::{DepthBias, MainPass, PassController, ShadowPass};
use crate::RenderResult;

/// Stages of a frame, in recording order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Shadow,
    Main,
}

/// What [`FrameRenderer::render_frame`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// The frame was submitted and presented.
    Rendered(DrawStats),
    /// The swapchain was out of date. It has been rebuilt and nothing was
    /// recorded.
    Skipped,
    /// The window has no area; rendering is suspended until a resize.
    Minimized,
}

/// A pass and the batches drawn inside it.
struct RenderStage<B: ?Sized + 'static> {
    pass: PassController,
    /// Created with the stage's pipeline.
    batches: Option<DrawBatchManager<B>>,
    /// Disabled stages still begin and end their pass, so their targets
    /// are cleared, but draw nothing.
    enabled: bool,
}

impl<B: GpuBackend + ?Sized + 'static> RenderStage<B> {
    fn new(pass: PassController) -> Self {
        Self {
            pass,
            batches: None,
            enabled: true,
        }
    }

    fn record(
        &mut self,
        backend: &B,
        frame: &FrameDescriptor,
    ) -> RenderResult<DrawStats> {
        self.pass.begin_pass(backend, frame)?;
        let stats = match &self.batches {
            Some(batches) if self.enabled => batches.draw_all(backend, frame),
            _ => DrawStats::default(),
        };
        self.pass.end_pass(backend, frame)?;
        Ok(stats)
    }

    fn destroy(&mut self, backend: &B) {
        if let Some(mut batches) = self.batches.take() {
            batches.destroy(backend);
        }
        self.pass.destroy(backend);
    }
}

/// Shadow + main pass renderer over a [`GpuBackend`].
pub struct FrameRenderer<B: GpuBackend + ?Sized + 'static> {
    session: CommandSession,
    shadow: RenderStage<B>,
    main: RenderStage<B>,
    minimized: bool,
}

impl<B: GpuBackend + ?Sized + 'static> FrameRenderer<B> {
    /// Creates the command session and initializes both passes.
    pub fn new(backend: &B, config: &RendererConfig) -> RenderResult<Self> {
        let mut session = CommandSession::new(backend)?;

        let mut shadow = RenderStage::new(PassController::Shadow(ShadowPass::new(
            config.shadow.map_size,
            DepthBias {
                constant: config.shadow.depth_bias_constant,
                slope: config.shadow.depth_bias_slope,
            },
        )));
        let mut main = RenderStage::new(PassController::Main(MainPass::new(config.clear_color)));

        let initialized = shadow
            .pass
            .init(backend)
            .and_then(|()| main.pass.init(backend));
        if let Err(e) = initialized {
            shadow.pass.destroy(backend);
            main.pass.destroy(backend);
            session.destroy(backend);
            return Err(e);
        }

        info!("Frame renderer ready");
        Ok(Self {
            session,
            shadow,
            main,
            minimized: false,
        })
    }

    fn stage(&self, kind: StageKind) -> &RenderStage<B> {
        match kind {
            StageKind::Shadow => &self.shadow,
            StageKind::Main => &self.main,
        }
    }

    fn stage_mut(&mut self, kind: StageKind) -> &mut RenderStage<B> {
        match kind {
            StageKind::Shadow => &mut self.shadow,
            StageKind::Main => &mut self.main,
        }
    }

    /// Builds the pipeline of `kind` for `program`.
    ///
    /// The first call creates the stage's batch manager. Later calls swap
    /// the new pipeline into it and keep its batches.
    pub fn build_pipeline(
        &mut self,
        backend: &B,
        kind: StageKind,
        program: &ProgramInterface,
    ) -> RenderResult<&mut DrawBatchManager<B>> {
        let stage = self.stage_mut(kind);
        let pipeline = stage.pass.build_pipeline(backend, program)?;
        let binding = program.bind_to(pipeline);
        let batches = match stage.batches.take() {
            Some(mut batches) => {
                batches.set_binding(binding);
                batches
            }
            None => DrawBatchManager::new(binding),
        };
        Ok(stage.batches.insert(batches))
    }

    pub fn batches(&self, kind: StageKind) -> Option<&DrawBatchManager<B>> {
        self.stage(kind).batches.as_ref()
    }

    pub fn batches_mut(&mut self, kind: StageKind) -> Option<&mut DrawBatchManager<B>> {
        self.stage_mut(kind).batches.as_mut()
    }

    pub fn pass(&self, kind: StageKind) -> &PassController {
        &self.stage(kind).pass
    }

    /// Shadow map descriptor info for the main pass's sets.
    pub fn shadow_map_info(&self) -> Option<vk::DescriptorImageInfo> {
        self.shadow.pass.shadow_map_info()
    }

    pub fn set_shadows_enabled(&mut self, enabled: bool) {
        if self.shadow.enabled != enabled {
            info!("Shadow rendering {}", if enabled { "enabled" } else { "disabled" });
        }
        self.shadow.enabled = enabled;
    }

    pub fn shadows_enabled(&self) -> bool {
        self.shadow.enabled
    }

    #[inline]
    pub fn is_minimized(&self) -> bool {
        self.minimized
    }

    /// Current size of the main pass targets.
    pub fn extent(&self) -> vk::Extent2D {
        self.main.pass.extent()
    }

    #[inline]
    pub fn session(&self) -> &CommandSession {
        &self.session
    }

    /// Renders one frame.
    ///
    /// `update` runs once the slot's previous work has retired and before
    /// anything is recorded. It gets the frame slot, so per-slot uniform
    /// buffers can be written there safely.
    pub fn render_frame<F>(&mut self, backend: &B, update: F) -> RenderResult<FrameStatus>
    where
        F: FnOnce(usize) -> RenderResult<()>,
    {
        if self.minimized {
            return Ok(FrameStatus::Minimized);
        }

        let Some(frame) = self.session.begin_frame(backend)? else {
            debug!("Swapchain out of date at acquire");
            self.recreate(backend)?;
            return Ok(FrameStatus::Skipped);
        };

        update(frame.slot())?;

        let mut stats = self.shadow.record(backend, &frame)?;
        stats += self.main.record(backend, &frame)?;

        let end = self.session.end_frame(backend, frame)?;
        if end.needs_recreate {
            debug!("Swapchain out of date or suboptimal at present");
            self.recreate(backend)?;
        }
        Ok(FrameStatus::Rendered(stats))
    }

    /// Follows a window resize. A zero-sized window suspends rendering;
    /// any other size rebuilds the swapchain targets right away.
    pub fn resize(&mut self, backend: &B, width: u32, height: u32) -> RenderResult<()> {
        if width == 0 || height == 0 {
            if !self.minimized {
                info!("Window minimized, rendering suspended");
            }
            self.minimized = true;
            return Ok(());
        }
        self.minimized = false;
        backend.set_window_extent(vk::Extent2D { width, height });
        self.recreate(backend)
    }

    /// Rebuilds every stage's swapchain-dependent targets.
    pub fn recreate(&mut self, backend: &B) -> RenderResult<()> {
        self.shadow.pass.recreate(backend)?;
        self.main.pass.recreate(backend)?;
        let extent = self.extent();
        info!("Render targets recreated at {}x{}", extent.width, extent.height);
        Ok(())
    }

    /// Waits for the GPU, then destroys batches, passes (with their
    /// pipelines) and the command session.
    pub fn shutdown(&mut self, backend: &B) {
        if let Err(e) = backend.wait_idle() {
            error!("wait_idle failed during shutdown: {}", e);
        }
        self.shadow.destroy(backend);
        self.main.destroy(backend);
        self.session.destroy(backend);
        info!("Frame renderer shut down");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use ash::vk::Handle;

    use super::*;
    use crate::backend::{AcquireOutcome, PresentOutcome, TargetBackend};
    use crate::batch::RenderObject;
    use crate::mesh::MeshBinding;
    use crate::mock::{Event, MockBackend};
    use crate::{MAX_FRAMES_IN_FLIGHT, RenderError};

    fn config() -> RendererConfig {
        let mut config = RendererConfig::default();
        config.shadow.map_size = 256;
        config
    }

    fn renderer(backend: &MockBackend) -> FrameRenderer<MockBackend> {
        let mut renderer = FrameRenderer::new(backend, &config()).unwrap();
        let mesh = MeshBinding::non_indexed(vk::Buffer::from_raw(0xB0), 36);

        let shadow = renderer
            .build_pipeline(backend, StageKind::Shadow, &MockBackend::program(false))
            .unwrap();
        let casters = shadow.create_batch("shadow").unwrap();
        shadow.add_object(RenderObject::new(mesh), casters).unwrap();

        let main = renderer
            .build_pipeline(backend, StageKind::Main, &MockBackend::program(true))
            .unwrap();
        let white = main.create_batch("white").unwrap();
        main.add_object(RenderObject::new(mesh), white).unwrap();
        main.add_object(RenderObject::new(mesh), white).unwrap();
        renderer
    }

    fn count(events: &[Event], pred: impl Fn(&Event) -> bool) -> usize {
        events.iter().filter(|e| pred(e)).count()
    }

    #[test]
    fn test_frame_draws_both_stages() {
        let backend = MockBackend::new();
        let mut renderer = renderer(&backend);
        let status = renderer.render_frame(&backend, |_| Ok(())).unwrap();
        assert_eq!(
            status,
            FrameStatus::Rendered(DrawStats {
                descriptor_binds: 0,
                draw_calls: 3,
            })
        );
    }

    #[test]
    fn test_shadow_recorded_before_main() {
        let backend = MockBackend::new();
        let mut renderer = renderer(&backend);
        renderer.render_frame(&backend, |_| Ok(())).unwrap();

        let passes: Vec<vk::Extent2D> = backend
            .events()
            .into_iter()
            .filter_map(|e| match e {
                Event::BeginRenderPass { extent, .. } => Some(extent),
                _ => None,
            })
            .collect();
        assert_eq!(
            passes,
            vec![
                vk::Extent2D {
                    width: 256,
                    height: 256,
                },
                backend.surface_extent(),
            ]
        );
    }

    #[test]
    fn test_out_of_date_skips_and_recreates_once() {
        let backend = MockBackend::new();
        let mut renderer = renderer(&backend);
        backend.clear_events();
        backend.push_acquire(AcquireOutcome::OutOfDate);

        assert_eq!(
            renderer.render_frame(&backend, |_| Ok(())).unwrap(),
            FrameStatus::Skipped
        );
        let events = backend.events();
        assert_eq!(count(&events, |e| matches!(e, Event::Draw(_))), 0);
        assert_eq!(count(&events, |e| *e == Event::RecreateSwapchain), 1);

        let status = renderer.render_frame(&backend, |_| Ok(())).unwrap();
        assert!(matches!(status, FrameStatus::Rendered(stats) if stats.draw_calls == 3));

        let events = backend.events();
        assert_eq!(count(&events, |e| *e == Event::RecreateSwapchain), 1);
        let recreate = events
            .iter()
            .position(|e| *e == Event::RecreateSwapchain)
            .unwrap();
        let begin = events
            .iter()
            .position(|e| matches!(e, Event::BeginCommandBuffer { .. }))
            .unwrap();
        assert!(recreate < begin);
    }

    #[test]
    fn test_present_out_of_date_recreates() {
        let backend = MockBackend::new();
        let mut renderer = renderer(&backend);
        backend.clear_events();
        backend.push_present(PresentOutcome::NeedsRecreate);

        let status = renderer.render_frame(&backend, |_| Ok(())).unwrap();
        assert!(matches!(status, FrameStatus::Rendered(_)));
        let events = backend.events();
        let present = events
            .iter()
            .position(|e| matches!(e, Event::Present(_)))
            .unwrap();
        let recreate = events
            .iter()
            .position(|e| *e == Event::RecreateSwapchain)
            .unwrap();
        assert!(present < recreate);
    }

    #[test]
    fn test_resize_updates_targets() {
        let backend = MockBackend::new();
        let mut renderer = renderer(&backend);
        renderer.resize(&backend, 800, 600).unwrap();

        let extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        assert_eq!(renderer.extent(), extent);
        assert_eq!(renderer.pass(StageKind::Main).viewport().width, 800.0);
        for fb_extent in backend.live_framebuffer_extents() {
            // The shadow map framebuffer keeps its own size.
            assert!(fb_extent == extent || fb_extent.width == 256);
        }
        assert_eq!(renderer.pass(StageKind::Shadow).extent().width, 256);
    }

    #[test]
    fn test_minimize_suspends_rendering() {
        let backend = MockBackend::new();
        let mut renderer = renderer(&backend);
        renderer.resize(&backend, 0, 600).unwrap();
        backend.clear_events();

        assert_eq!(
            renderer.render_frame(&backend, |_| Ok(())).unwrap(),
            FrameStatus::Minimized
        );
        assert!(backend.events().is_empty());

        renderer.resize(&backend, 640, 480).unwrap();
        assert!(!renderer.is_minimized());
        assert!(matches!(
            renderer.render_frame(&backend, |_| Ok(())).unwrap(),
            FrameStatus::Rendered(_)
        ));
        assert_eq!(renderer.extent().width, 640);
    }

    #[test]
    fn test_update_runs_after_slot_wait() {
        let backend = MockBackend::new();
        let mut renderer = renderer(&backend);
        let mut slots = Vec::new();
        for _ in 0..4 {
            let before = backend.events().len();
            renderer
                .render_frame(&backend, |slot| {
                    let events = backend.events();
                    assert!(
                        events[before..]
                            .iter()
                            .any(|e| matches!(e, Event::WaitFence(_)))
                    );
                    assert!(
                        !events[before..]
                            .iter()
                            .any(|e| matches!(e, Event::BeginRenderPass { .. }))
                    );
                    slots.push(slot);
                    Ok(())
                })
                .unwrap();
        }
        assert_eq!(slots, vec![0, 1, 0, 1]);
        assert!(slots.iter().all(|s| *s < MAX_FRAMES_IN_FLIGHT));
    }

    #[test]
    fn test_disabled_shadows_still_clear_map() {
        let backend = MockBackend::new();
        let mut renderer = renderer(&backend);
        renderer.set_shadows_enabled(false);
        backend.clear_events();

        let status = renderer.render_frame(&backend, |_| Ok(())).unwrap();
        assert!(matches!(status, FrameStatus::Rendered(stats) if stats.draw_calls == 2));
        let events = backend.events();
        assert_eq!(
            count(&events, |e| matches!(e, Event::BeginRenderPass { .. })),
            2
        );
    }

    #[test]
    fn test_rebuilding_pipeline_keeps_batches() {
        let backend = MockBackend::new();
        let mut renderer = renderer(&backend);
        let old = renderer.batches(StageKind::Main).unwrap().binding().pipeline;
        renderer
            .build_pipeline(&backend, StageKind::Main, &MockBackend::program(true))
            .unwrap();
        let batches = renderer.batches(StageKind::Main).unwrap();
        assert_ne!(batches.binding().pipeline, old);
        assert_eq!(batches.batch_count(), 1);
        assert_eq!(backend.live_pipelines(), 2);
    }

    #[test]
    fn test_rebuild_waits_for_submitted_frame() {
        let backend = MockBackend::new();
        let mut renderer = renderer(&backend);
        backend.set_fence_delay(Duration::from_millis(300));
        renderer.render_frame(&backend, |_| Ok(())).unwrap();
        let fence = backend.last_submission().unwrap().fence;
        assert!(!backend.is_fence_signaled(fence));

        let old = renderer.batches(StageKind::Main).unwrap().binding().pipeline;
        backend.clear_events();
        renderer
            .build_pipeline(&backend, StageKind::Main, &MockBackend::program(true))
            .unwrap();

        assert!(backend.is_fence_signaled(fence));
        let events = backend.events();
        let idle = events.iter().position(|e| *e == Event::WaitIdle).unwrap();
        let destroy = events
            .iter()
            .position(|e| *e == Event::DestroyPipeline(old))
            .unwrap();
        assert!(idle < destroy);
        assert_eq!(backend.live_pipelines(), 2);
    }

    #[test]
    fn test_update_error_propagates() {
        let backend = MockBackend::new();
        let mut renderer = renderer(&backend);
        let result = renderer.render_frame(&backend, |_| Err(RenderError::NoFrameInProgress));
        assert!(result.is_err());
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let backend = MockBackend::new();
        let mut renderer = renderer(&backend);
        renderer.render_frame(&backend, |_| Ok(())).unwrap();
        renderer.shutdown(&backend);

        assert_eq!(backend.live_pipelines(), 0);
        assert_eq!(backend.live_framebuffers(), 0);
        assert_eq!(backend.live_render_passes(), 0);
        assert_eq!(backend.live_attachments(), 0);
        assert_eq!(backend.live_samplers(), 0);
        assert_eq!(backend.live_fences(), 0);
        assert_eq!(backend.live_semaphores(), 0);
        assert_eq!(backend.live_command_pools(), 0);
        assert!(renderer.batches(StageKind::Main).is_none());
    }
}
