//! Single-subpass render passes and framebuffers.
//!
//! A render pass is described by [`RenderPassDesc`]: its attachments, which
//! of them the subpass uses as color, depth and resolve targets, and its
//! external dependencies. The description is plain data; [`RenderPass::new`]
//! creates the Vulkan object from it.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// One attachment of a render pass. Stencil is always don't-care.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentDesc {
    pub format: vk::Format,
    pub samples: vk::SampleCountFlags,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub initial_layout: vk::ImageLayout,
    pub final_layout: vk::ImageLayout,
}

impl AttachmentDesc {
    fn to_vk(self) -> vk::AttachmentDescription {
        vk::AttachmentDescription::default()
            .format(self.format)
            .samples(self.samples)
            .load_op(self.load_op)
            .store_op(self.store_op)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(self.initial_layout)
            .final_layout(self.final_layout)
    }
}

/// A subpass dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubpassDependency {
    pub src_subpass: u32,
    pub dst_subpass: u32,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub by_region: bool,
}

impl SubpassDependency {
    fn to_vk(self) -> vk::SubpassDependency {
        vk::SubpassDependency::default()
            .src_subpass(self.src_subpass)
            .dst_subpass(self.dst_subpass)
            .src_stage_mask(self.src_stage)
            .dst_stage_mask(self.dst_stage)
            .src_access_mask(self.src_access)
            .dst_access_mask(self.dst_access)
            .dependency_flags(if self.by_region {
                vk::DependencyFlags::BY_REGION
            } else {
                vk::DependencyFlags::empty()
            })
    }
}

/// Attachments and wiring of a one-subpass render pass.
///
/// `color`, `depth` and `resolve` are indices into `attachments`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RenderPassDesc {
    pub attachments: Vec<AttachmentDesc>,
    pub color: Option<u32>,
    pub depth: Option<u32>,
    pub resolve: Option<u32>,
    pub dependencies: Vec<SubpassDependency>,
}

impl RenderPassDesc {
    /// Number of color attachments the subpass writes.
    pub fn color_attachment_count(&self) -> u32 {
        u32::from(self.color.is_some())
    }

    /// Checks that every referenced index exists and a resolve target only
    /// appears together with a color target.
    pub fn validate(&self) -> RhiResult<()> {
        let count = self.attachments.len() as u32;
        for (role, index) in [
            ("color", self.color),
            ("depth", self.depth),
            ("resolve", self.resolve),
        ] {
            if let Some(index) = index
                && index >= count
            {
                return Err(RhiError::InvalidHandle(format!(
                    "{role} attachment index {index} out of range ({count} attachments)"
                )));
            }
        }
        if self.resolve.is_some() && self.color.is_none() {
            return Err(RhiError::InvalidHandle(
                "resolve attachment without a color attachment".into(),
            ));
        }
        Ok(())
    }
}

pub struct RenderPass {
    device: Arc<Device>,
    render_pass: vk::RenderPass,
}

impl RenderPass {
    pub fn new(device: Arc<Device>, desc: &RenderPassDesc) -> RhiResult<Self> {
        desc.validate()?;

        let attachments: Vec<vk::AttachmentDescription> =
            desc.attachments.iter().map(|a| a.to_vk()).collect();
        let color_refs: Vec<vk::AttachmentReference> = desc
            .color
            .map(|index| {
                vk::AttachmentReference::default()
                    .attachment(index)
                    .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            })
            .into_iter()
            .collect();
        let resolve_refs: Vec<vk::AttachmentReference> = desc
            .resolve
            .map(|index| {
                vk::AttachmentReference::default()
                    .attachment(index)
                    .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            })
            .into_iter()
            .collect();
        let depth_ref = desc.depth.map(|index| {
            vk::AttachmentReference::default()
                .attachment(index)
                .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
        });

        let mut subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);
        if !resolve_refs.is_empty() {
            subpass = subpass.resolve_attachments(&resolve_refs);
        }
        if let Some(depth_ref) = depth_ref.as_ref() {
            subpass = subpass.depth_stencil_attachment(depth_ref);
        }
        let subpasses = [subpass];

        let dependencies: Vec<vk::SubpassDependency> =
            desc.dependencies.iter().map(|d| d.to_vk()).collect();

        let info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);
        let render_pass = unsafe { device.handle().create_render_pass(&info, None)? };
        debug!(
            "Created render pass with {} attachment(s), {} dependenc{}",
            attachments.len(),
            dependencies.len(),
            if dependencies.len() == 1 { "y" } else { "ies" }
        );
        Ok(Self {
            device,
            render_pass,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::RenderPass {
        self.render_pass
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_render_pass(self.render_pass, None);
        }
        debug!("Destroyed render pass");
    }
}

pub struct Framebuffer {
    device: Arc<Device>,
    framebuffer: vk::Framebuffer,
    extent: vk::Extent2D,
}

impl Framebuffer {
    /// Creates a framebuffer; `views` follow the render pass attachment order.
    pub fn new(
        device: Arc<Device>,
        render_pass: vk::RenderPass,
        views: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> RhiResult<Self> {
        let info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass)
            .attachments(views)
            .width(extent.width)
            .height(extent.height)
            .layers(1);
        let framebuffer = unsafe { device.handle().create_framebuffer(&info, None)? };
        debug!(
            "Created {}x{} framebuffer with {} view(s)",
            extent.width,
            extent.height,
            views.len()
        );
        Ok(Self {
            device,
            framebuffer,
            extent,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::Framebuffer {
        self.framebuffer
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_framebuffer(self.framebuffer, None);
        }
        debug!("Destroyed framebuffer");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn depth_attachment() -> AttachmentDesc {
        AttachmentDesc {
            format: vk::Format::D16_UNORM,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
        }
    }

    #[test]
    fn test_validate_accepts_depth_only() {
        let desc = RenderPassDesc {
            attachments: vec![depth_attachment()],
            depth: Some(0),
            ..Default::default()
        };
        desc.validate().unwrap();
        assert_eq!(desc.color_attachment_count(), 0);
    }

    #[test]
    fn test_validate_rejects_bad_index() {
        let desc = RenderPassDesc {
            attachments: vec![depth_attachment()],
            depth: Some(1),
            ..Default::default()
        };
        assert!(matches!(desc.validate(), Err(RhiError::InvalidHandle(_))));
    }

    #[test]
    fn test_validate_rejects_resolve_without_color() {
        let desc = RenderPassDesc {
            attachments: vec![depth_attachment(), depth_attachment()],
            depth: Some(0),
            resolve: Some(1),
            ..Default::default()
        };
        assert!(desc.validate().is_err());
    }

    #[test]
    fn test_dependency_flags() {
        let dependency = SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
            dst_stage: vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            src_access: vk::AccessFlags::SHADER_READ,
            dst_access: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            by_region: true,
        };
        let raw = dependency.to_vk();
        assert_eq!(raw.dependency_flags, vk::DependencyFlags::BY_REGION);
        assert_eq!(raw.src_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(raw.dst_access_mask, vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE);
    }
}
