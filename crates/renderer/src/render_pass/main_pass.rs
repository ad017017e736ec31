//! Swapchain-attached main pass.

use ash::vk;
use tracing::{debug, info};
use vkframe_rhi::image::AttachmentImageDesc;
use vkframe_rhi::pipeline::{CompareOp, CullMode, FrontFace, GraphicsPipelineBuilder};
use vkframe_rhi::render_pass::{AttachmentDesc, RenderPassDesc, SubpassDependency};

use super::{CLEAR_DEPTH, full_scissor, full_viewport};
use crate::backend::{AttachmentImage, GpuBackend, TargetBackend};
use crate::command_session::FrameDescriptor;
use crate::program::ProgramInterface;
use crate::{RenderError, RenderResult};

/// Everything that depends on the swapchain. Replaced as a whole.
#[derive(Debug)]
struct MainTargets {
    extent: vk::Extent2D,
    depth: AttachmentImage,
    /// Multisampled color target, resolved into the swapchain image.
    msaa_color: Option<AttachmentImage>,
    /// One per swapchain image.
    framebuffers: Vec<vk::Framebuffer>,
}

/// Color + depth pass presenting to the swapchain.
///
/// With more than one sample, color renders into a transient multisampled
/// image that the subpass resolves into the swapchain image.
#[derive(Debug)]
pub struct MainPass {
    clear_color: [f32; 4],
    color_format: vk::Format,
    depth_format: vk::Format,
    samples: vk::SampleCountFlags,
    render_pass: vk::RenderPass,
    targets: Option<MainTargets>,
    pipeline: Option<vk::Pipeline>,
    active: bool,
}

impl MainPass {
    pub const NAME: &'static str = "main";

    pub fn new(clear_color: [f32; 4]) -> Self {
        Self {
            clear_color,
            color_format: vk::Format::UNDEFINED,
            depth_format: vk::Format::UNDEFINED,
            samples: vk::SampleCountFlags::TYPE_1,
            render_pass: vk::RenderPass::null(),
            targets: None,
            pipeline: None,
            active: false,
        }
    }

    /// Attachment layout of the pass.
    ///
    /// Index 0 is color and 1 is depth. With multisampling a single-sample
    /// resolve target is appended at index 2, and it is the one presented.
    pub fn render_pass_desc(
        color_format: vk::Format,
        depth_format: vk::Format,
        samples: vk::SampleCountFlags,
    ) -> RenderPassDesc {
        let multisampled = samples != vk::SampleCountFlags::TYPE_1;
        let mut attachments = vec![
            AttachmentDesc {
                format: color_format,
                samples,
                load_op: vk::AttachmentLoadOp::CLEAR,
                store_op: vk::AttachmentStoreOp::STORE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                final_layout: if multisampled {
                    vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
                } else {
                    vk::ImageLayout::PRESENT_SRC_KHR
                },
            },
            AttachmentDesc {
                format: depth_format,
                samples,
                load_op: vk::AttachmentLoadOp::CLEAR,
                store_op: vk::AttachmentStoreOp::DONT_CARE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            },
        ];
        if multisampled {
            attachments.push(AttachmentDesc {
                format: color_format,
                samples: vk::SampleCountFlags::TYPE_1,
                load_op: vk::AttachmentLoadOp::DONT_CARE,
                store_op: vk::AttachmentStoreOp::STORE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            });
        }

        let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
        RenderPassDesc {
            attachments,
            color: Some(0),
            depth: Some(1),
            resolve: multisampled.then_some(2),
            dependencies: vec![SubpassDependency {
                src_subpass: vk::SUBPASS_EXTERNAL,
                dst_subpass: 0,
                src_stage: stages,
                dst_stage: stages,
                src_access: vk::AccessFlags::empty(),
                dst_access: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                by_region: false,
            }],
        }
    }

    pub fn init<B: GpuBackend + ?Sized>(&mut self, backend: &B) -> RenderResult<()> {
        self.color_format = backend.surface_format();
        self.depth_format = backend.depth_format();
        self.samples = backend.msaa_samples();

        let desc = Self::render_pass_desc(self.color_format, self.depth_format, self.samples);
        self.render_pass = backend.create_render_pass(&desc)?;
        self.targets = Some(self.create_targets(backend)?);

        info!(
            "Main pass initialized ({:?}, depth {:?}, x{} MSAA)",
            self.color_format,
            self.depth_format,
            self.samples.as_raw()
        );
        Ok(())
    }

    fn create_targets<B: TargetBackend + ?Sized>(&self, backend: &B) -> RenderResult<MainTargets> {
        let extent = backend.surface_extent();
        let multisampled = self.samples != vk::SampleCountFlags::TYPE_1;

        let depth = backend.create_attachment(&AttachmentImageDesc::depth(
            extent,
            self.depth_format,
            self.samples,
        ))?;
        let msaa_color = if multisampled {
            match backend.create_attachment(&AttachmentImageDesc::msaa_color(
                extent,
                self.color_format,
                self.samples,
            )) {
                Ok(image) => Some(image),
                Err(e) => {
                    backend.destroy_attachment(depth);
                    return Err(e.into());
                }
            }
        } else {
            None
        };

        let mut targets = MainTargets {
            extent,
            depth,
            msaa_color,
            framebuffers: Vec::new(),
        };
        for view in backend.swapchain_image_views() {
            let views = match targets.msaa_color {
                Some(color) => vec![color.view, targets.depth.view, view],
                None => vec![view, targets.depth.view],
            };
            match backend.create_framebuffer(self.render_pass, &views, extent) {
                Ok(framebuffer) => targets.framebuffers.push(framebuffer),
                Err(e) => {
                    Self::destroy_targets(backend, targets);
                    return Err(e.into());
                }
            }
        }

        debug!(
            "Main pass targets: {}x{}, {} framebuffer(s)",
            extent.width,
            extent.height,
            targets.framebuffers.len()
        );
        Ok(targets)
    }

    fn destroy_targets<B: TargetBackend + ?Sized>(backend: &B, targets: MainTargets) {
        for framebuffer in targets.framebuffers {
            backend.destroy_framebuffer(framebuffer);
        }
        if let Some(color) = targets.msaa_color {
            backend.destroy_attachment(color);
        }
        backend.destroy_attachment(targets.depth);
    }

    pub fn begin_pass<B: GpuBackend + ?Sized>(
        &mut self,
        backend: &B,
        frame: &FrameDescriptor,
    ) -> RenderResult<()> {
        if self.active {
            return Err(RenderError::PassAlreadyActive(Self::NAME));
        }
        let targets = self
            .targets
            .as_ref()
            .ok_or(RenderError::PassNotInitialized(Self::NAME))?;
        let framebuffer = targets
            .framebuffers
            .get(frame.image_index() as usize)
            .copied()
            .ok_or_else(|| {
                vkframe_rhi::RhiError::InvalidHandle(format!(
                    "no framebuffer for swapchain image {}",
                    frame.image_index()
                ))
            })?;

        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            },
            CLEAR_DEPTH,
        ];
        let buffer = frame.command_buffer();
        backend.cmd_begin_render_pass(
            buffer,
            self.render_pass,
            framebuffer,
            targets.extent,
            &clear_values,
        );
        backend.cmd_set_viewport(buffer, full_viewport(targets.extent));
        backend.cmd_set_scissor(buffer, full_scissor(targets.extent));
        self.active = true;
        Ok(())
    }

    pub fn end_pass<B: GpuBackend + ?Sized>(
        &mut self,
        backend: &B,
        frame: &FrameDescriptor,
    ) -> RenderResult<()> {
        if !self.active {
            return Err(RenderError::PassNotActive(Self::NAME));
        }
        backend.cmd_end_render_pass(frame.command_buffer());
        self.active = false;
        Ok(())
    }

    /// Back-face culled, counter-clockwise, depth `LESS`, at the pass
    /// sample count.
    pub fn build_pipeline<B: GpuBackend + ?Sized>(
        &mut self,
        backend: &B,
        program: &ProgramInterface,
    ) -> RenderResult<vk::Pipeline> {
        let desc = GraphicsPipelineBuilder::new(program.layout, self.render_pass)
            .vertex_module(program.vertex_module)
            .fragment_module(program.fragment_module)
            .vertex_input(&program.vertex_bindings, &program.vertex_attributes)
            .cull_mode(CullMode::Back)
            .front_face(FrontFace::CounterClockwise)
            .depth_compare_op(CompareOp::Less)
            .samples(self.samples)
            .color_attachment_count(1)
            .build()?;
        if self.pipeline.is_some() {
            // Submitted frames may still execute the pipeline being replaced.
            backend.wait_idle()?;
        }
        let pipeline = backend.create_graphics_pipeline(&desc)?;
        if let Some(old) = self.pipeline.replace(pipeline) {
            backend.destroy_pipeline(old);
        }
        info!("Main pass pipeline built");
        Ok(pipeline)
    }

    /// Rebuilds the targets for the current window size.
    ///
    /// Waits for the device to go idle first. The render pass and pipeline
    /// survive, since the formats and sample count do not change.
    pub fn recreate<B: GpuBackend + ?Sized>(&mut self, backend: &B) -> RenderResult<()> {
        if self.render_pass == vk::RenderPass::null() {
            return Err(RenderError::PassNotInitialized(Self::NAME));
        }
        backend.wait_idle()?;
        if let Some(old) = self.targets.take() {
            Self::destroy_targets(backend, old);
        }
        backend.recreate_swapchain()?;
        let targets = self.create_targets(backend)?;
        info!(
            "Main pass recreated at {}x{}",
            targets.extent.width, targets.extent.height
        );
        self.targets = Some(targets);
        Ok(())
    }

    pub fn destroy<B: GpuBackend + ?Sized>(&mut self, backend: &B) {
        if let Some(pipeline) = self.pipeline.take() {
            backend.destroy_pipeline(pipeline);
        }
        if let Some(targets) = self.targets.take() {
            Self::destroy_targets(backend, targets);
        }
        if self.render_pass != vk::RenderPass::null() {
            backend.destroy_render_pass(self.render_pass);
            self.render_pass = vk::RenderPass::null();
        }
        self.active = false;
        debug!("Main pass destroyed");
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.targets
            .as_ref()
            .map(|t| t.extent)
            .unwrap_or_default()
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[inline]
    pub fn samples(&self) -> vk::SampleCountFlags {
        self.samples
    }

    #[inline]
    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    /// Framebuffers of the current targets, one per swapchain image.
    pub fn framebuffers(&self) -> &[vk::Framebuffer] {
        self.targets
            .as_ref()
            .map(|t| t.framebuffers.as_slice())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_session::CommandSession;
    use crate::mock::{Event, MockBackend};
    use crate::render_pass::PassController;

    const COLOR: vk::Format = vk::Format::B8G8R8A8_SRGB;
    const DEPTH: vk::Format = vk::Format::D32_SFLOAT;

    #[test]
    fn test_single_sample_presents_color() {
        let desc = MainPass::render_pass_desc(COLOR, DEPTH, vk::SampleCountFlags::TYPE_1);
        assert_eq!(desc.attachments.len(), 2);
        assert_eq!(desc.resolve, None);
        assert_eq!(
            desc.attachments[0].final_layout,
            vk::ImageLayout::PRESENT_SRC_KHR
        );
        assert_eq!(desc.attachments[1].load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(desc.attachments[1].store_op, vk::AttachmentStoreOp::DONT_CARE);
        desc.validate().unwrap();
    }

    #[test]
    fn test_msaa_appends_resolve() {
        let desc = MainPass::render_pass_desc(COLOR, DEPTH, vk::SampleCountFlags::TYPE_4);
        assert_eq!(desc.attachments.len(), 3);
        assert_eq!(desc.resolve, Some(2));
        assert_eq!(
            desc.attachments[0].final_layout,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        );
        assert_eq!(desc.attachments[0].samples, vk::SampleCountFlags::TYPE_4);
        assert_eq!(desc.attachments[1].samples, vk::SampleCountFlags::TYPE_4);
        assert_eq!(desc.attachments[2].samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(
            desc.attachments[2].final_layout,
            vk::ImageLayout::PRESENT_SRC_KHR
        );
        desc.validate().unwrap();
    }

    #[test]
    fn test_single_external_dependency() {
        let desc = MainPass::render_pass_desc(COLOR, DEPTH, vk::SampleCountFlags::TYPE_1);
        assert_eq!(desc.dependencies.len(), 1);
        let dep = desc.dependencies[0];
        assert_eq!(dep.src_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(dep.dst_subpass, 0);
        assert!(
            dep.dst_stage
                .contains(vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS)
        );
        assert!(
            dep.dst_access
                .contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
        );
    }

    #[test]
    fn test_init_creates_framebuffer_per_image() {
        let backend = MockBackend::new();
        let mut pass = MainPass::new([0.0, 0.0, 0.0, 1.0]);
        pass.init(&backend).unwrap();
        assert_eq!(pass.framebuffers().len(), backend.image_count());
        assert_eq!(pass.extent(), backend.surface_extent());
        assert_eq!(backend.live_attachments(), 1);
    }

    #[test]
    fn test_msaa_framebuffers_have_three_views() {
        let backend = MockBackend::new();
        backend.set_msaa_samples(vk::SampleCountFlags::TYPE_8);
        let mut pass = MainPass::new([0.0; 4]);
        pass.init(&backend).unwrap();
        assert_eq!(backend.live_attachments(), 2);
        assert!(backend.events().iter().any(|e| matches!(
            e,
            Event::CreateFramebuffer { views: 3, .. }
        )));
    }

    #[test]
    fn test_recreate_follows_new_extent() {
        let backend = MockBackend::new();
        let mut pass = PassController::Main(MainPass::new([0.0; 4]));
        pass.init(&backend).unwrap();

        let resized = vk::Extent2D {
            width: 1024,
            height: 300,
        };
        backend.set_window_extent(resized);
        pass.recreate(&backend).unwrap();

        assert_eq!(pass.extent(), resized);
        assert_eq!(pass.viewport().width, 1024.0);
        assert_eq!(pass.viewport().height, 300.0);
        assert_eq!(backend.live_framebuffers(), backend.image_count());
        for extent in backend.live_framebuffer_extents() {
            assert_eq!(extent, resized);
        }
        let events = backend.events();
        let idle = events.iter().position(|e| *e == Event::WaitIdle).unwrap();
        let swap = events
            .iter()
            .position(|e| *e == Event::RecreateSwapchain)
            .unwrap();
        assert!(idle < swap);
        assert_eq!(backend.live_render_passes(), 1);
    }

    #[test]
    fn test_nested_begin_is_rejected() {
        let backend = MockBackend::new();
        let mut session = CommandSession::new(&backend).unwrap();
        let mut pass = MainPass::new([0.0; 4]);
        pass.init(&backend).unwrap();

        let frame = session.begin_frame(&backend).unwrap().unwrap();
        pass.begin_pass(&backend, &frame).unwrap();
        assert!(matches!(
            pass.begin_pass(&backend, &frame),
            Err(RenderError::PassAlreadyActive("main"))
        ));
        pass.end_pass(&backend, &frame).unwrap();
        assert!(matches!(
            pass.end_pass(&backend, &frame),
            Err(RenderError::PassNotActive("main"))
        ));
        session.end_frame(&backend, frame).unwrap();
    }

    #[test]
    fn test_begin_sets_viewport_and_scissor() {
        let backend = MockBackend::new();
        let mut session = CommandSession::new(&backend).unwrap();
        let mut pass = MainPass::new([0.0; 4]);
        pass.init(&backend).unwrap();

        let frame = session.begin_frame(&backend).unwrap().unwrap();
        backend.clear_events();
        pass.begin_pass(&backend, &frame).unwrap();
        let extent = backend.surface_extent();
        assert_eq!(
            backend.events(),
            vec![
                Event::BeginRenderPass {
                    render_pass: pass.render_pass(),
                    framebuffer: pass.framebuffers()[frame.image_index() as usize],
                    extent,
                    clear_values: 2,
                },
                Event::SetViewport {
                    width: extent.width as f32,
                    height: extent.height as f32,
                },
                Event::SetScissor(extent),
            ]
        );
    }

    #[test]
    fn test_pipeline_state() {
        let backend = MockBackend::new();
        backend.set_msaa_samples(vk::SampleCountFlags::TYPE_4);
        let mut pass = MainPass::new([0.0; 4]);
        pass.init(&backend).unwrap();
        pass.build_pipeline(&backend, &MockBackend::program(true))
            .unwrap();

        let desc = backend.last_pipeline().unwrap();
        assert_eq!(desc.cull_mode, CullMode::Back);
        assert_eq!(desc.front_face, FrontFace::CounterClockwise);
        assert_eq!(desc.depth_compare_op, CompareOp::Less);
        assert_eq!(desc.samples, vk::SampleCountFlags::TYPE_4);
        assert_eq!(desc.color_attachment_count, 1);
        assert!(!desc.depth_bias);
    }

    #[test]
    fn test_destroy_releases_everything() {
        let backend = MockBackend::new();
        backend.set_msaa_samples(vk::SampleCountFlags::TYPE_2);
        let mut pass = MainPass::new([0.0; 4]);
        pass.init(&backend).unwrap();
        pass.build_pipeline(&backend, &MockBackend::program(true))
            .unwrap();
        pass.destroy(&backend);
        assert_eq!(backend.live_framebuffers(), 0);
        assert_eq!(backend.live_attachments(), 0);
        assert_eq!(backend.live_render_passes(), 0);
        assert_eq!(backend.live_pipelines(), 0);
    }
}
