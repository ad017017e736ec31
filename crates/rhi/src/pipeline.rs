//! Pipeline layouts and graphics pipelines.
//!
//! Pipeline state is first collected into a [`PipelineDesc`] with
//! [`GraphicsPipelineBuilder`]. The description is plain data over raw
//! handles, so the render passes can assemble and inspect it without a
//! device; [`Pipeline::new`] turns it into a `vk::Pipeline`.
//!
//! ```no_run
//! use vkframe_rhi::pipeline::{CompareOp, CullMode, GraphicsPipelineBuilder, Pipeline};
//! # use std::sync::Arc;
//! # use vkframe_rhi::{device::Device, vk};
//! # fn example(
//! #     device: Arc<Device>,
//! #     layout: vk::PipelineLayout,
//! #     render_pass: vk::RenderPass,
//! #     vert: vk::ShaderModule,
//! # ) -> Result<(), vkframe_rhi::RhiError> {
//! let desc = GraphicsPipelineBuilder::new(layout, render_pass)
//!     .vertex_module(vert)
//!     .cull_mode(CullMode::None)
//!     .depth_compare_op(CompareOp::LessOrEqual)
//!     .color_attachment_count(0)
//!     .depth_bias()
//!     .build()?;
//! let pipeline = Pipeline::new(device, &desc)?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

const ENTRY_POINT: &std::ffi::CStr = c"main";

pub struct PipelineLayout {
    device: Arc<Device>,
    layout: vk::PipelineLayout,
}

impl PipelineLayout {
    pub fn new(
        device: Arc<Device>,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> RhiResult<Self> {
        let info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(set_layouts)
            .push_constant_ranges(push_constant_ranges);
        let layout = unsafe { device.handle().create_pipeline_layout(&info, None)? };
        debug!(
            "Created pipeline layout ({} set layout(s), {} push range(s))",
            set_layouts.len(),
            push_constant_ranges.len()
        );
        Ok(Self { device, layout })
    }

    #[inline]
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_pipeline_layout(self.layout, None);
        }
        debug!("Destroyed pipeline layout");
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
}

impl CullMode {
    pub fn to_vk(self) -> vk::CullModeFlags {
        match self {
            CullMode::None => vk::CullModeFlags::NONE,
            CullMode::Front => vk::CullModeFlags::FRONT,
            CullMode::Back => vk::CullModeFlags::BACK,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FrontFace {
    #[default]
    CounterClockwise,
    Clockwise,
}

impl FrontFace {
    pub fn to_vk(self) -> vk::FrontFace {
        match self {
            FrontFace::CounterClockwise => vk::FrontFace::COUNTER_CLOCKWISE,
            FrontFace::Clockwise => vk::FrontFace::CLOCKWISE,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CompareOp {
    #[default]
    Less,
    LessOrEqual,
    Always,
}

impl CompareOp {
    pub fn to_vk(self) -> vk::CompareOp {
        match self {
            CompareOp::Less => vk::CompareOp::LESS,
            CompareOp::LessOrEqual => vk::CompareOp::LESS_OR_EQUAL,
            CompareOp::Always => vk::CompareOp::ALWAYS,
        }
    }
}

/// Complete fixed-function and shader state of a graphics pipeline.
#[derive(Clone, Debug)]
pub struct PipelineDesc {
    pub layout: vk::PipelineLayout,
    pub render_pass: vk::RenderPass,
    pub vertex_module: vk::ShaderModule,
    /// `None` for depth-only pipelines.
    pub fragment_module: Option<vk::ShaderModule>,
    pub vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    pub vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
    pub depth_compare_op: CompareOp,
    pub samples: vk::SampleCountFlags,
    /// Number of color attachments in the subpass, each with blending off.
    pub color_attachment_count: u32,
    /// Depth bias is enabled and its factors are set dynamically.
    pub depth_bias: bool,
    pub dynamic_states: Vec<vk::DynamicState>,
}

impl PipelineDesc {
    /// Color blend state for each color attachment: no blending, all channels.
    pub fn color_blend_attachments(&self) -> Vec<vk::PipelineColorBlendAttachmentState> {
        (0..self.color_attachment_count)
            .map(|_| {
                vk::PipelineColorBlendAttachmentState::default()
                    .blend_enable(false)
                    .color_write_mask(vk::ColorComponentFlags::RGBA)
            })
            .collect()
    }
}

/// Fluent builder for [`PipelineDesc`].
///
/// Defaults: triangle list, back-face culling with counter-clockwise front
/// faces, depth test and write with `LESS`, one sample, one color
/// attachment, dynamic viewport and scissor.
pub struct GraphicsPipelineBuilder {
    desc: PipelineDesc,
}

impl GraphicsPipelineBuilder {
    pub fn new(layout: vk::PipelineLayout, render_pass: vk::RenderPass) -> Self {
        Self {
            desc: PipelineDesc {
                layout,
                render_pass,
                vertex_module: vk::ShaderModule::null(),
                fragment_module: None,
                vertex_bindings: Vec::new(),
                vertex_attributes: Vec::new(),
                cull_mode: CullMode::Back,
                front_face: FrontFace::CounterClockwise,
                depth_compare_op: CompareOp::Less,
                samples: vk::SampleCountFlags::TYPE_1,
                color_attachment_count: 1,
                depth_bias: false,
                dynamic_states: vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR],
            },
        }
    }

    pub fn vertex_module(mut self, module: vk::ShaderModule) -> Self {
        self.desc.vertex_module = module;
        self
    }

    pub fn fragment_module(mut self, module: Option<vk::ShaderModule>) -> Self {
        self.desc.fragment_module = module;
        self
    }

    pub fn vertex_input(
        mut self,
        bindings: &[vk::VertexInputBindingDescription],
        attributes: &[vk::VertexInputAttributeDescription],
    ) -> Self {
        self.desc.vertex_bindings = bindings.to_vec();
        self.desc.vertex_attributes = attributes.to_vec();
        self
    }

    pub fn cull_mode(mut self, mode: CullMode) -> Self {
        self.desc.cull_mode = mode;
        self
    }

    pub fn front_face(mut self, face: FrontFace) -> Self {
        self.desc.front_face = face;
        self
    }

    pub fn depth_compare_op(mut self, op: CompareOp) -> Self {
        self.desc.depth_compare_op = op;
        self
    }

    pub fn samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.desc.samples = samples;
        self
    }

    pub fn color_attachment_count(mut self, count: u32) -> Self {
        self.desc.color_attachment_count = count;
        self
    }

    /// Enables depth bias with the factors supplied at record time.
    pub fn depth_bias(mut self) -> Self {
        self.desc.depth_bias = true;
        self.dynamic_state(vk::DynamicState::DEPTH_BIAS)
    }

    pub fn dynamic_state(mut self, state: vk::DynamicState) -> Self {
        if !self.desc.dynamic_states.contains(&state) {
            self.desc.dynamic_states.push(state);
        }
        self
    }

    /// # Errors
    ///
    /// Returns [`RhiError::PipelineError`] when the vertex module or render
    /// pass is missing, or color attachments are requested without a
    /// fragment stage.
    pub fn build(self) -> RhiResult<PipelineDesc> {
        let desc = self.desc;
        if desc.vertex_module == vk::ShaderModule::null() {
            return Err(RhiError::PipelineError("vertex shader is required".into()));
        }
        if desc.render_pass == vk::RenderPass::null() {
            return Err(RhiError::PipelineError("render pass is required".into()));
        }
        if desc.color_attachment_count > 0 && desc.fragment_module.is_none() {
            return Err(RhiError::PipelineError(
                "color attachments need a fragment shader".into(),
            ));
        }
        Ok(desc)
    }
}

pub struct Pipeline {
    device: Arc<Device>,
    pipeline: vk::Pipeline,
}

impl Pipeline {
    pub fn new(device: Arc<Device>, desc: &PipelineDesc) -> RhiResult<Self> {
        let mut stages = vec![
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(desc.vertex_module)
                .name(ENTRY_POINT),
        ];
        if let Some(fragment) = desc.fragment_module {
            stages.push(
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(vk::ShaderStageFlags::FRAGMENT)
                    .module(fragment)
                    .name(ENTRY_POINT),
            );
        }

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&desc.vertex_bindings)
            .vertex_attribute_descriptions(&desc.vertex_attributes);
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST);
        let viewport = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);
        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(desc.cull_mode.to_vk())
            .front_face(desc.front_face.to_vk())
            .depth_bias_enable(desc.depth_bias);
        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(desc.samples)
            .min_sample_shading(1.0);
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(true)
            .depth_write_enable(true)
            .depth_compare_op(desc.depth_compare_op.to_vk())
            .max_depth_bounds(1.0);
        let blend_attachments = desc.color_blend_attachments();
        let color_blend =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);
        let dynamic = vk::PipelineDynamicStateCreateInfo::default()
            .dynamic_states(&desc.dynamic_states);

        let info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic)
            .layout(desc.layout)
            .render_pass(desc.render_pass)
            .subpass(0);

        let pipelines = unsafe {
            device
                .handle()
                .create_graphics_pipelines(vk::PipelineCache::null(), &[info], None)
                .map_err(|(_, e)| RhiError::PipelineError(format!("creation failed: {e:?}")))?
        };
        let pipeline = pipelines
            .into_iter()
            .next()
            .ok_or_else(|| RhiError::PipelineError("driver returned no pipeline".into()))?;

        debug!(
            "Created graphics pipeline ({} stage(s), {} color attachment(s), depth bias {})",
            stages.len(),
            desc.color_attachment_count,
            desc.depth_bias
        );
        Ok(Self { device, pipeline })
    }

    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_pipeline(self.pipeline, None) };
        debug!("Destroyed graphics pipeline");
    }
}
