//! Shader programs and the pipeline binding the batches draw with.

use std::path::Path;
use std::sync::Arc;

use ash::vk;
use tracing::info;
use vkframe_rhi::RhiResult;
use vkframe_rhi::descriptor::DescriptorSetLayout;
use vkframe_rhi::device::Device;
use vkframe_rhi::pipeline::PipelineLayout;
use vkframe_rhi::shader::{Shader, ShaderStage};
use vkframe_rhi::vertex::Vertex;

use crate::backend::CommandRecorder;
use crate::batch::PushData;

/// What a render pass needs to know about a program to build a pipeline
/// for it.
#[derive(Debug, Clone)]
pub struct ProgramInterface {
    pub layout: vk::PipelineLayout,
    pub vertex_module: vk::ShaderModule,
    /// `None` for depth-only programs.
    pub fragment_module: Option<vk::ShaderModule>,
    pub vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    pub vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    pub push_stages: vk::ShaderStageFlags,
}

impl ProgramInterface {
    /// Pairs the interface with a pipeline built from it.
    pub fn bind_to(&self, pipeline: vk::Pipeline) -> PipelineBinding {
        PipelineBinding {
            pipeline,
            layout: self.layout,
            push_stages: self.push_stages,
        }
    }
}

/// A built pipeline with the layout its descriptor sets and push constants
/// go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineBinding {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub push_stages: vk::ShaderStageFlags,
}

impl PipelineBinding {
    pub fn bind<R: CommandRecorder + ?Sized>(&self, recorder: &R, buffer: vk::CommandBuffer) {
        recorder.cmd_bind_pipeline(buffer, self.pipeline);
    }

    pub fn bind_descriptor_sets<R: CommandRecorder + ?Sized>(
        &self,
        recorder: &R,
        buffer: vk::CommandBuffer,
        sets: &[vk::DescriptorSet],
    ) {
        recorder.cmd_bind_descriptor_sets(buffer, self.layout, 0, sets);
    }

    pub fn push<R: CommandRecorder + ?Sized>(
        &self,
        recorder: &R,
        buffer: vk::CommandBuffer,
        data: &PushData,
    ) {
        recorder.cmd_push_constants(buffer, self.layout, self.push_stages, bytemuck::bytes_of(data));
    }
}

/// Vertex (and optional fragment) shader, the set layouts they use and the
/// pipeline layout over both.
///
/// Every program takes one [`PushData`] block as push constants and the
/// standard [`Vertex`] as input.
pub struct ShaderProgram {
    // Drop order: the layout references the set layouts.
    layout: PipelineLayout,
    set_layouts: Vec<DescriptorSetLayout>,
    vertex: Shader,
    fragment: Option<Shader>,
    push_stages: vk::ShaderStageFlags,
}

impl ShaderProgram {
    pub fn new(
        device: Arc<Device>,
        vertex: Shader,
        fragment: Option<Shader>,
        set_layouts: Vec<DescriptorSetLayout>,
    ) -> RhiResult<Self> {
        let push_stages = match fragment {
            Some(_) => vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            None => vk::ShaderStageFlags::VERTEX,
        };
        let push_range = vk::PushConstantRange::default()
            .stage_flags(push_stages)
            .offset(0)
            .size(std::mem::size_of::<PushData>() as u32);
        let raw_layouts: Vec<_> = set_layouts.iter().map(|l| l.handle()).collect();
        let layout = PipelineLayout::new(device, &raw_layouts, &[push_range])?;

        Ok(Self {
            layout,
            set_layouts,
            vertex,
            fragment,
            push_stages,
        })
    }

    /// Loads `<dir>/<vertex>` and optionally `<dir>/<fragment>` as SPIR-V.
    pub fn load(
        device: Arc<Device>,
        dir: &Path,
        vertex: &str,
        fragment: Option<&str>,
        set_layouts: Vec<DescriptorSetLayout>,
    ) -> RhiResult<Self> {
        let vertex_shader =
            Shader::from_spirv_file(device.clone(), &dir.join(vertex), ShaderStage::Vertex)?;
        let fragment_shader = fragment
            .map(|name| Shader::from_spirv_file(device.clone(), &dir.join(name), ShaderStage::Fragment))
            .transpose()?;
        let program = Self::new(device, vertex_shader, fragment_shader, set_layouts)?;
        info!(
            "Loaded shader program {}{}",
            vertex,
            fragment.map(|f| format!(" + {f}")).unwrap_or_default()
        );
        Ok(program)
    }

    pub fn interface(&self) -> ProgramInterface {
        ProgramInterface {
            layout: self.layout.handle(),
            vertex_module: self.vertex.handle(),
            fragment_module: self.fragment.as_ref().map(Shader::handle),
            vertex_bindings: vec![Vertex::binding_description()],
            vertex_attributes: Vertex::attribute_descriptions().to_vec(),
            push_stages: self.push_stages,
        }
    }

    #[inline]
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout.handle()
    }

    pub fn set_layout(&self, index: usize) -> Option<&DescriptorSetLayout> {
        self.set_layouts.get(index)
    }
}

#[cfg(test)]
mod tests {
    use ash::vk::Handle;

    use super::*;
    use crate::mock::{Event, MockBackend};

    fn interface() -> ProgramInterface {
        ProgramInterface {
            layout: vk::PipelineLayout::from_raw(0x10),
            vertex_module: vk::ShaderModule::from_raw(0x20),
            fragment_module: None,
            vertex_bindings: vec![Vertex::binding_description()],
            vertex_attributes: Vertex::attribute_descriptions().to_vec(),
            push_stages: vk::ShaderStageFlags::VERTEX,
        }
    }

    #[test]
    fn test_binding_carries_layout_and_stages() {
        let pipeline = vk::Pipeline::from_raw(0x30);
        let binding = interface().bind_to(pipeline);
        assert_eq!(binding.pipeline, pipeline);
        assert_eq!(binding.layout, vk::PipelineLayout::from_raw(0x10));
        assert_eq!(binding.push_stages, vk::ShaderStageFlags::VERTEX);
    }

    #[test]
    fn test_push_sends_whole_block() {
        let backend = MockBackend::new();
        let binding = interface().bind_to(vk::Pipeline::from_raw(0x30));
        binding.push(&backend, vk::CommandBuffer::from_raw(1), &PushData::default());
        assert_eq!(
            backend.events(),
            vec![Event::PushConstants {
                stages: vk::ShaderStageFlags::VERTEX,
                size: std::mem::size_of::<PushData>(),
            }]
        );
    }
}
