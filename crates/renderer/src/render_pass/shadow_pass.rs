//! Depth-only shadow map pass.

use ash::vk;
use tracing::{debug, info};
use vkframe_rhi::image::{AttachmentImageDesc, SamplerDesc};
use vkframe_rhi::pipeline::{CompareOp, CullMode, GraphicsPipelineBuilder};
use vkframe_rhi::render_pass::{AttachmentDesc, RenderPassDesc, SubpassDependency};

use super::{CLEAR_DEPTH, full_scissor, full_viewport};
use crate::backend::{AttachmentImage, GpuBackend, TargetBackend};
use crate::command_session::FrameDescriptor;
use crate::program::ProgramInterface;
use crate::{RenderError, RenderResult};

/// Format of the shadow map.
pub const SHADOW_MAP_FORMAT: vk::Format = vk::Format::D16_UNORM;

/// Depth bias applied while rendering the shadow map, to keep lit surfaces
/// from shadowing themselves.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthBias {
    pub constant: f32,
    pub slope: f32,
}

impl Default for DepthBias {
    fn default() -> Self {
        Self {
            constant: 1.25,
            slope: 1.75,
        }
    }
}

#[derive(Debug)]
struct ShadowTargets {
    map: AttachmentImage,
    sampler: vk::Sampler,
    framebuffer: vk::Framebuffer,
}

/// Renders scene depth from the light into a square shadow map.
///
/// The map has a fixed size, so nothing here depends on the swapchain.
#[derive(Debug)]
pub struct ShadowPass {
    map_size: u32,
    bias: DepthBias,
    render_pass: vk::RenderPass,
    targets: Option<ShadowTargets>,
    pipeline: Option<vk::Pipeline>,
    active: bool,
}

impl ShadowPass {
    pub const NAME: &'static str = "shadow";

    pub fn new(map_size: u32, bias: DepthBias) -> Self {
        Self {
            map_size,
            bias,
            render_pass: vk::RenderPass::null(),
            targets: None,
            pipeline: None,
            active: false,
        }
    }

    /// One depth attachment, left readable by fragment shaders.
    ///
    /// The dependency pair orders this frame's depth writes after the
    /// previous frame's shadow lookups, and the next lookups after them.
    pub fn render_pass_desc() -> RenderPassDesc {
        RenderPassDesc {
            attachments: vec![AttachmentDesc {
                format: SHADOW_MAP_FORMAT,
                samples: vk::SampleCountFlags::TYPE_1,
                load_op: vk::AttachmentLoadOp::CLEAR,
                store_op: vk::AttachmentStoreOp::STORE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                final_layout: vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
            }],
            color: None,
            depth: Some(0),
            resolve: None,
            dependencies: vec![
                SubpassDependency {
                    src_subpass: vk::SUBPASS_EXTERNAL,
                    dst_subpass: 0,
                    src_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
                    dst_stage: vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
                    src_access: vk::AccessFlags::SHADER_READ,
                    dst_access: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                    by_region: true,
                },
                SubpassDependency {
                    src_subpass: 0,
                    dst_subpass: vk::SUBPASS_EXTERNAL,
                    src_stage: vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
                    dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
                    src_access: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                    dst_access: vk::AccessFlags::SHADER_READ,
                    by_region: true,
                },
            ],
        }
    }

    pub fn init<B: GpuBackend + ?Sized>(&mut self, backend: &B) -> RenderResult<()> {
        self.render_pass = backend.create_render_pass(&Self::render_pass_desc())?;
        self.targets = Some(self.create_targets(backend)?);
        info!(
            "Shadow pass initialized ({}x{} {:?})",
            self.map_size, self.map_size, SHADOW_MAP_FORMAT
        );
        Ok(())
    }

    fn create_targets<B: TargetBackend + ?Sized>(
        &self,
        backend: &B,
    ) -> RenderResult<ShadowTargets> {
        let map =
            backend.create_attachment(&AttachmentImageDesc::shadow_map(self.map_size, SHADOW_MAP_FORMAT))?;
        let sampler = match backend.create_sampler(&SamplerDesc::SHADOW_MAP) {
            Ok(sampler) => sampler,
            Err(e) => {
                backend.destroy_attachment(map);
                return Err(e.into());
            }
        };
        let framebuffer =
            match backend.create_framebuffer(self.render_pass, &[map.view], self.extent()) {
                Ok(framebuffer) => framebuffer,
                Err(e) => {
                    backend.destroy_sampler(sampler);
                    backend.destroy_attachment(map);
                    return Err(e.into());
                }
            };
        Ok(ShadowTargets {
            map,
            sampler,
            framebuffer,
        })
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

        let extent = self.extent();
        let buffer = frame.command_buffer();
        backend.cmd_begin_render_pass(
            buffer,
            self.render_pass,
            targets.framebuffer,
            extent,
            &[CLEAR_DEPTH],
        );
        backend.cmd_set_viewport(buffer, full_viewport(extent));
        backend.cmd_set_scissor(buffer, full_scissor(extent));
        backend.cmd_set_depth_bias(buffer, self.bias.constant, 0.0, self.bias.slope);
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

    /// Depth-only pipeline: no culling, depth `LESS_OR_EQUAL`, dynamic
    /// depth bias. Any fragment module in `program` is ignored.
    pub fn build_pipeline<B: GpuBackend + ?Sized>(
        &mut self,
        backend: &B,
        program: &ProgramInterface,
    ) -> RenderResult<vk::Pipeline> {
        let desc = GraphicsPipelineBuilder::new(program.layout, self.render_pass)
            .vertex_module(program.vertex_module)
            .fragment_module(None)
            .vertex_input(&program.vertex_bindings, &program.vertex_attributes)
            .cull_mode(CullMode::None)
            .depth_compare_op(CompareOp::LessOrEqual)
            .color_attachment_count(0)
            .depth_bias()
            .build()?;
        if self.pipeline.is_some() {
            // Submitted frames may still execute the pipeline being replaced.
            backend.wait_idle()?;
        }
        let pipeline = backend.create_graphics_pipeline(&desc)?;
        if let Some(old) = self.pipeline.replace(pipeline) {
            backend.destroy_pipeline(old);
        }
        info!("Shadow pass pipeline built");
        Ok(pipeline)
    }

    /// Nothing to do: the shadow map does not follow the window.
    pub fn recreate<B: GpuBackend + ?Sized>(&mut self, _backend: &B) -> RenderResult<()> {
        Ok(())
    }

    pub fn destroy<B: GpuBackend + ?Sized>(&mut self, backend: &B) {
        if let Some(pipeline) = self.pipeline.take() {
            backend.destroy_pipeline(pipeline);
        }
        if let Some(targets) = self.targets.take() {
            backend.destroy_framebuffer(targets.framebuffer);
            backend.destroy_sampler(targets.sampler);
            backend.destroy_attachment(targets.map);
        }
        if self.render_pass != vk::RenderPass::null() {
            backend.destroy_render_pass(self.render_pass);
            self.render_pass = vk::RenderPass::null();
        }
        self.active = false;
        debug!("Shadow pass destroyed");
    }

    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.map_size,
            height: self.map_size,
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[inline]
    pub fn bias(&self) -> DepthBias {
        self.bias
    }

    /// Sampler and view of the shadow map in the layout the pass leaves it.
    pub fn shadow_map_info(&self) -> Option<vk::DescriptorImageInfo> {
        self.targets.as_ref().map(|targets| {
            vk::DescriptorImageInfo::default()
                .sampler(targets.sampler)
                .image_view(targets.map.view)
                .image_layout(vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL)
        })
    }
}
