//! Sampled color textures.
//!
//! Pixels reach the GPU the same way mesh data does: a staging buffer and
//! a one-shot command buffer. The upload records a layout transition into
//! `TRANSFER_DST_OPTIMAL`, the copy into mip 0, then one blit per further
//! mip level, leaving every level in `SHADER_READ_ONLY_OPTIMAL`.

use ash::vk;
use tracing::{debug, warn};
use vkframe_rhi::buffer::{Buffer, BufferUsage};
use vkframe_rhi::image::{self, AttachmentImageDesc, Image, Sampler, SamplerDesc, TEXTURE_FORMAT};
use vkframe_rhi::physical_device::supports_linear_blit;

use crate::backend::CommandRecorder;
use crate::command_session::CommandSession;
use crate::context::DeviceContext;
use crate::registry::GpuResource;
use crate::{RenderError, RenderResult};

/// One layout change of a color image, with the access and stage masks
/// that order it against the surrounding transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LayoutTransition {
    old: vk::ImageLayout,
    new: vk::ImageLayout,
    src_access: vk::AccessFlags,
    dst_access: vk::AccessFlags,
    src_stage: vk::PipelineStageFlags,
    dst_stage: vk::PipelineStageFlags,
}

/// Fresh image, about to receive the staging copy.
const TO_TRANSFER_DST: LayoutTransition = LayoutTransition {
    old: vk::ImageLayout::UNDEFINED,
    new: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    src_access: vk::AccessFlags::empty(),
    dst_access: vk::AccessFlags::TRANSFER_WRITE,
    src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
    dst_stage: vk::PipelineStageFlags::TRANSFER,
};

/// A written level becomes the source of the next blit.
const TO_BLIT_SOURCE: LayoutTransition = LayoutTransition {
    old: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    new: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
    src_access: vk::AccessFlags::TRANSFER_WRITE,
    dst_access: vk::AccessFlags::TRANSFER_READ,
    src_stage: vk::PipelineStageFlags::TRANSFER,
    dst_stage: vk::PipelineStageFlags::TRANSFER,
};

const BLIT_SOURCE_TO_SHADER: LayoutTransition = LayoutTransition {
    old: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
    new: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    src_access: vk::AccessFlags::TRANSFER_READ,
    dst_access: vk::AccessFlags::SHADER_READ,
    src_stage: vk::PipelineStageFlags::TRANSFER,
    dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
};

/// The last level, only ever written.
const TRANSFER_DST_TO_SHADER: LayoutTransition = LayoutTransition {
    old: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    new: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    src_access: vk::AccessFlags::TRANSFER_WRITE,
    dst_access: vk::AccessFlags::SHADER_READ,
    src_stage: vk::PipelineStageFlags::TRANSFER,
    dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
};

impl LayoutTransition {
    fn record<R: CommandRecorder + ?Sized>(
        &self,
        recorder: &R,
        buffer: vk::CommandBuffer,
        image: vk::Image,
        base_mip: u32,
        levels: u32,
    ) {
        let barrier = vk::ImageMemoryBarrier::default()
            .old_layout(self.old)
            .new_layout(self.new)
            .src_access_mask(self.src_access)
            .dst_access_mask(self.dst_access)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .base_mip_level(base_mip)
                    .level_count(levels)
                    .layer_count(1),
            );
        recorder.cmd_image_barrier(buffer, self.src_stage, self.dst_stage, &barrier);
    }
}

fn blit_offset(width: u32, height: u32) -> vk::Offset3D {
    vk::Offset3D {
        x: i32::try_from(width).unwrap_or(i32::MAX),
        y: i32::try_from(height).unwrap_or(i32::MAX),
        z: 1,
    }
}

fn mip_layer(level: u32) -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .mip_level(level)
        .layer_count(1)
}

/// Records the whole upload of `staging` into `image`.
///
/// Every level of the `mip_levels` chain ends in
/// `SHADER_READ_ONLY_OPTIMAL`. Level `n` is blitted from level `n - 1`,
/// halving each side down to one texel.
pub fn record_upload<R: CommandRecorder + ?Sized>(
    recorder: &R,
    buffer: vk::CommandBuffer,
    staging: vk::Buffer,
    image: vk::Image,
    extent: vk::Extent2D,
    mip_levels: u32,
) {
    TO_TRANSFER_DST.record(recorder, buffer, image, 0, mip_levels);
    recorder.cmd_copy_buffer_to_image(buffer, staging, image, extent);

    let (mut width, mut height) = (extent.width, extent.height);
    for level in 1..mip_levels {
        let (next_width, next_height) = ((width / 2).max(1), (height / 2).max(1));
        TO_BLIT_SOURCE.record(recorder, buffer, image, level - 1, 1);
        let region = vk::ImageBlit {
            src_subresource: mip_layer(level - 1),
            src_offsets: [vk::Offset3D::default(), blit_offset(width, height)],
            dst_subresource: mip_layer(level),
            dst_offsets: [vk::Offset3D::default(), blit_offset(next_width, next_height)],
        };
        recorder.cmd_blit_image(buffer, image, &region);
        BLIT_SOURCE_TO_SHADER.record(recorder, buffer, image, level - 1, 1);
        (width, height) = (next_width, next_height);
    }

    TRANSFER_DST_TO_SHADER.record(recorder, buffer, image, mip_levels.saturating_sub(1), 1);
}

/// Bytes of tightly packed RGBA8 texels covering `extent`.
fn rgba_size(extent: vk::Extent2D) -> usize {
    extent.width as usize * extent.height as usize * 4
}

/// An RGBA8 sRGB image with its view and sampler.
pub struct Texture {
    image: Option<Image>,
    sampler: Option<Sampler>,
    extent: vk::Extent2D,
    mip_levels: u32,
}

impl Texture {
    /// Uploads `pixels`, tightly packed RGBA8 rows, and optionally builds
    /// the full mip chain. Blocks until the upload has finished.
    ///
    /// Falls back to a single level when the device cannot blit the texture
    /// format with linear filtering.
    ///
    /// # Errors
    ///
    /// [`RenderError::TextureSizeMismatch`] when `pixels` does not cover
    /// `extent` exactly.
    pub fn upload(
        ctx: &DeviceContext,
        session: &CommandSession,
        extent: vk::Extent2D,
        pixels: &[u8],
        mipmapped: bool,
    ) -> RenderResult<Self> {
        let expected = rgba_size(extent);
        if pixels.len() != expected {
            return Err(RenderError::TextureSizeMismatch {
                expected,
                actual: pixels.len(),
            });
        }

        let mut mip_levels = if mipmapped { image::mip_levels(extent) } else { 1 };
        if mip_levels > 1
            && !supports_linear_blit(
                ctx.instance().handle(),
                ctx.device().physical_device(),
                TEXTURE_FORMAT,
            )
        {
            warn!("{:?} cannot be blitted linearly, skipping mipmaps", TEXTURE_FORMAT);
            mip_levels = 1;
        }

        let staging = Buffer::new_with_data(ctx.device().clone(), BufferUsage::Staging, pixels)?;
        let image = Image::with_mip_levels(
            ctx.device().clone(),
            AttachmentImageDesc::texture(extent),
            mip_levels,
        )?;
        session.run_immediate(ctx, |buffer| {
            record_upload(ctx, buffer, staging.handle(), image.handle(), extent, mip_levels);
            Ok(())
        })?;
        let sampler = Sampler::new(ctx.device().clone(), &SamplerDesc::texture(mip_levels))?;

        debug!(
            "Uploaded {}x{} texture with {} mip level(s)",
            extent.width, extent.height, mip_levels
        );
        Ok(Self {
            image: Some(image),
            sampler: Some(sampler),
            extent,
            mip_levels,
        })
    }

    /// A 1x1 texture of a single color, bound where a material samples a
    /// texture but has none.
    pub fn filled(ctx: &DeviceContext, session: &CommandSession, rgba: [u8; 4]) -> RenderResult<Self> {
        let extent = vk::Extent2D {
            width: 1,
            height: 1,
        };
        Self::upload(ctx, session, extent, &rgba, false)
    }

    /// `None` once the texture has been released.
    pub fn descriptor_info(&self) -> Option<vk::DescriptorImageInfo> {
        let image = self.image.as_ref()?;
        let sampler = self.sampler.as_ref()?;
        Some(
            vk::DescriptorImageInfo::default()
                .sampler(sampler.handle())
                .image_view(image.view())
                .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
        )
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }
}

impl GpuResource<DeviceContext> for Texture {
    fn release(&mut self, _ctx: &DeviceContext) {
        self.sampler = None;
        self.image = None;
    }
}

#[cfg(test)]
mod tests {
    use ash::vk::Handle;

    use super::*;
    use crate::mock::{Event, MockBackend};

    fn barrier(base_mip: u32, old: vk::ImageLayout, new: vk::ImageLayout) -> Event {
        Event::ImageBarrier {
            base_mip,
            levels: 1,
            old,
            new,
        }
    }

    #[test]
    fn test_single_level_upload() {
        let backend = MockBackend::new();
        let staging = vk::Buffer::from_raw(1);
        let image = vk::Image::from_raw(2);
        let extent = vk::Extent2D {
            width: 1,
            height: 1,
        };
        record_upload(&backend, vk::CommandBuffer::from_raw(9), staging, image, extent, 1);

        assert_eq!(
            backend.events(),
            vec![
                barrier(
                    0,
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL
                ),
                Event::CopyBufferToImage {
                    src: staging,
                    image,
                    extent,
                },
                barrier(
                    0,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
                ),
            ]
        );
    }

    #[test]
    fn test_mip_chain_blits_each_level_from_the_previous() {
        use ash::vk::ImageLayout as L;

        let backend = MockBackend::new();
        let staging = vk::Buffer::from_raw(1);
        let image = vk::Image::from_raw(2);
        let extent = vk::Extent2D {
            width: 4,
            height: 2,
        };
        let levels = vkframe_rhi::image::mip_levels(extent);
        record_upload(&backend, vk::CommandBuffer::from_raw(9), staging, image, extent, levels);

        assert_eq!(
            backend.events(),
            vec![
                Event::ImageBarrier {
                    base_mip: 0,
                    levels: 3,
                    old: L::UNDEFINED,
                    new: L::TRANSFER_DST_OPTIMAL,
                },
                Event::CopyBufferToImage {
                    src: staging,
                    image,
                    extent,
                },
                barrier(0, L::TRANSFER_DST_OPTIMAL, L::TRANSFER_SRC_OPTIMAL),
                Event::BlitImage {
                    src_mip: 0,
                    dst_mip: 1,
                    dst_size: [2, 1],
                },
                barrier(0, L::TRANSFER_SRC_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL),
                barrier(1, L::TRANSFER_DST_OPTIMAL, L::TRANSFER_SRC_OPTIMAL),
                Event::BlitImage {
                    src_mip: 1,
                    dst_mip: 2,
                    dst_size: [1, 1],
                },
                barrier(1, L::TRANSFER_SRC_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL),
                barrier(2, L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL),
            ]
        );
    }

    #[test]
    fn test_upload_runs_in_one_shot_buffer() {
        let backend = MockBackend::new();
        let session = CommandSession::new(&backend).unwrap();
        let extent = vk::Extent2D {
            width: 2,
            height: 2,
        };
        backend.clear_events();
        session
            .run_immediate(&backend, |buffer| {
                record_upload(
                    &backend,
                    buffer,
                    vk::Buffer::from_raw(1),
                    vk::Image::from_raw(2),
                    extent,
                    2,
                );
                Ok(())
            })
            .unwrap();

        let events = backend.events();
        let begin = events
            .iter()
            .position(|e| {
                matches!(
                    e,
                    Event::BeginCommandBuffer { usage, .. }
                        if *usage == vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT
                )
            })
            .unwrap();
        let copy = events
            .iter()
            .position(|e| matches!(e, Event::CopyBufferToImage { .. }))
            .unwrap();
        let last_barrier = events
            .iter()
            .rposition(|e| matches!(e, Event::ImageBarrier { .. }))
            .unwrap();
        let submit = events
            .iter()
            .position(|e| matches!(e, Event::SubmitAndWait(_)))
            .unwrap();
        assert!(begin < copy && copy < last_barrier && last_barrier < submit);
    }

    #[test]
    fn test_transitions_order_transfers_before_shading() {
        assert_eq!(TO_TRANSFER_DST.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(TO_BLIT_SOURCE.dst_access, vk::AccessFlags::TRANSFER_READ);
        for transition in [BLIT_SOURCE_TO_SHADER, TRANSFER_DST_TO_SHADER] {
            assert_eq!(transition.new, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
            assert_eq!(transition.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
            assert_eq!(transition.dst_access, vk::AccessFlags::SHADER_READ);
        }
    }

    #[test]
    fn test_rgba_size() {
        let extent = vk::Extent2D {
            width: 3,
            height: 5,
        };
        assert_eq!(rgba_size(extent), 60);
    }
}
