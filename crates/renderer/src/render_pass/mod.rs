//! Render pass controllers.
//!
//! A controller owns one stage of the frame: its `vk::RenderPass`, the
//! images and framebuffers it renders into, its clear values and viewport,
//! and the pipeline built for it. Two kinds exist:
//!
//! - [`MainPass`] renders into the swapchain, optionally multisampled and
//!   resolved. Its targets follow the window and are rebuilt on resize.
//! - [`ShadowPass`] renders depth only into a fixed-size shadow map that the
//!   main pass samples.
//!
//! Passes are recorded shadow first. Within a command buffer every
//! `begin_pass` must be followed by exactly one `end_pass`.

mod main_pass;
mod shadow_pass;

pub use main_pass::MainPass;
pub use shadow_pass::{DepthBias, SHADOW_MAP_FORMAT, ShadowPass};

use ash::vk;

use crate::backend::GpuBackend;
use crate::command_session::FrameDescriptor;
use crate::program::ProgramInterface;
use crate::RenderResult;

/// Depth clear value shared by both passes.
pub(crate) const CLEAR_DEPTH: vk::ClearValue = vk::ClearValue {
    depth_stencil: vk::ClearDepthStencilValue {
        depth: 1.0,
        stencil: 0,
    },
};

/// Viewport covering `extent` with the full depth range.
pub fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

pub fn full_scissor(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

/// One render stage of the frame.
pub enum PassController {
    Main(MainPass),
    Shadow(ShadowPass),
}

impl PassController {
    pub fn name(&self) -> &'static str {
        match self {
            PassController::Main(_) => MainPass::NAME,
            PassController::Shadow(_) => ShadowPass::NAME,
        }
    }

    /// Creates the render pass object and its targets.
    pub fn init<B: GpuBackend + ?Sized>(&mut self, backend: &B) -> RenderResult<()> {
        match self {
            PassController::Main(pass) => pass.init(backend),
            PassController::Shadow(pass) => pass.init(backend),
        }
    }

    pub fn begin_pass<B: GpuBackend + ?Sized>(
        &mut self,
        backend: &B,
        frame: &FrameDescriptor,
    ) -> RenderResult<()> {
        match self {
            PassController::Main(pass) => pass.begin_pass(backend, frame),
            PassController::Shadow(pass) => pass.begin_pass(backend, frame),
        }
    }

    pub fn end_pass<B: GpuBackend + ?Sized>(
        &mut self,
        backend: &B,
        frame: &FrameDescriptor,
    ) -> RenderResult<()> {
        match self {
            PassController::Main(pass) => pass.end_pass(backend, frame),
            PassController::Shadow(pass) => pass.end_pass(backend, frame),
        }
    }

    /// Builds (or rebuilds) the pass pipeline for `program`.
    ///
    /// The controller owns the pipeline and destroys it with the pass.
    pub fn build_pipeline<B: GpuBackend + ?Sized>(
        &mut self,
        backend: &B,
        program: &ProgramInterface,
    ) -> RenderResult<vk::Pipeline> {
        match self {
            PassController::Main(pass) => pass.build_pipeline(backend, program),
            PassController::Shadow(pass) => pass.build_pipeline(backend, program),
        }
    }

    /// Rebuilds the swapchain-dependent targets.
    pub fn recreate<B: GpuBackend + ?Sized>(&mut self, backend: &B) -> RenderResult<()> {
        match self {
            PassController::Main(pass) => pass.recreate(backend),
            PassController::Shadow(pass) => pass.recreate(backend),
        }
    }

    pub fn destroy<B: GpuBackend + ?Sized>(&mut self, backend: &B) {
        match self {
            PassController::Main(pass) => pass.destroy(backend),
            PassController::Shadow(pass) => pass.destroy(backend),
        }
    }

    pub fn extent(&self) -> vk::Extent2D {
        match self {
            PassController::Main(pass) => pass.extent(),
            PassController::Shadow(pass) => pass.extent(),
        }
    }

    pub fn viewport(&self) -> vk::Viewport {
        full_viewport(self.extent())
    }

    pub fn is_active(&self) -> bool {
        match self {
            PassController::Main(pass) => pass.is_active(),
            PassController::Shadow(pass) => pass.is_active(),
        }
    }

    /// Descriptor info of the shadow map, for the main pass's sets.
    pub fn shadow_map_info(&self) -> Option<vk::DescriptorImageInfo> {
        match self {
            PassController::Main(_) => None,
            PassController::Shadow(pass) => pass.shadow_map_info(),
        }
    }
}
