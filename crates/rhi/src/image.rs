//! Device-local images and samplers.
//!
//! Covers the images the render passes own (main pass depth, the
//! multisampled color target and the shadow map) and sampled textures.
//! Each is a device-local image with a single view over all of its mip
//! levels. Descriptions are plain data so callers can build and compare
//! them without a device.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Format of sampled color textures.
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// Number of mip levels in a full chain down to 1x1.
pub fn mip_levels(extent: vk::Extent2D) -> u32 {
    let largest = extent.width.max(extent.height);
    if largest == 0 {
        return 1;
    }
    u32::BITS - largest.leading_zeros()
}

/// Shape and usage of a 2D image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentImageDesc {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub samples: vk::SampleCountFlags,
    pub usage: vk::ImageUsageFlags,
    pub aspect: vk::ImageAspectFlags,
}

impl AttachmentImageDesc {
    /// Depth attachment for the main pass.
    pub fn depth(extent: vk::Extent2D, format: vk::Format, samples: vk::SampleCountFlags) -> Self {
        Self {
            extent,
            format,
            samples,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            aspect: vk::ImageAspectFlags::DEPTH,
        }
    }

    /// Transient multisampled color target resolved into the swapchain.
    pub fn msaa_color(
        extent: vk::Extent2D,
        format: vk::Format,
        samples: vk::SampleCountFlags,
    ) -> Self {
        Self {
            extent,
            format,
            samples,
            usage: vk::ImageUsageFlags::COLOR_ATTACHMENT
                | vk::ImageUsageFlags::TRANSIENT_ATTACHMENT,
            aspect: vk::ImageAspectFlags::COLOR,
        }
    }

    /// Depth image written by the shadow pass and sampled by the main pass.
    pub fn shadow_map(size: u32, format: vk::Format) -> Self {
        Self {
            extent: vk::Extent2D {
                width: size,
                height: size,
            },
            format,
            samples: vk::SampleCountFlags::TYPE_1,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
                | vk::ImageUsageFlags::SAMPLED,
            aspect: vk::ImageAspectFlags::DEPTH,
        }
    }

    /// Color texture filled by a buffer copy, with mips blitted from level 0.
    pub fn texture(extent: vk::Extent2D) -> Self {
        Self {
            extent,
            format: TEXTURE_FORMAT,
            samples: vk::SampleCountFlags::TYPE_1,
            usage: vk::ImageUsageFlags::TRANSFER_DST
                | vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::SAMPLED,
            aspect: vk::ImageAspectFlags::COLOR,
        }
    }
}

/// Device-local image with one view over all of its mip levels.
pub struct Image {
    device: Arc<Device>,
    image: vk::Image,
    view: vk::ImageView,
    allocation: Option<Allocation>,
    desc: AttachmentImageDesc,
    mip_levels: u32,
}

impl Image {
    pub fn new(device: Arc<Device>, desc: AttachmentImageDesc) -> RhiResult<Self> {
        Self::with_mip_levels(device, desc, 1)
    }

    pub fn with_mip_levels(
        device: Arc<Device>,
        desc: AttachmentImageDesc,
        mip_levels: u32,
    ) -> RhiResult<Self> {
        if desc.extent.width == 0 || desc.extent.height == 0 {
            return Err(RhiError::InvalidHandle(format!(
                "image extent must be non-zero, got {}x{}",
                desc.extent.width, desc.extent.height
            )));
        }
        if mip_levels == 0 || mip_levels > self::mip_levels(desc.extent) {
            return Err(RhiError::InvalidHandle(format!(
                "{} mip levels for a {}x{} image",
                mip_levels, desc.extent.width, desc.extent.height
            )));
        }

        let info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(mip_levels)
            .array_layers(1)
            .samples(desc.samples)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = unsafe { device.handle().create_image(&info, None)? };
        let requirements = unsafe { device.handle().get_image_memory_requirements(image) };

        let allocation = device.with_allocator(|allocator| {
            Ok(allocator.allocate(&AllocationCreateDesc {
                name: "attachment",
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })?)
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.handle().destroy_image(image, None) };
                return Err(e);
            }
        };

        // Drop takes over cleanup from here; a null view is skipped.
        let mut image = Self {
            device,
            image,
            view: vk::ImageView::null(),
            allocation: Some(allocation),
            desc,
            mip_levels,
        };
        if let Some(allocation) = image.allocation.as_ref() {
            unsafe {
                image.device.handle().bind_image_memory(
                    image.image,
                    allocation.memory(),
                    allocation.offset(),
                )?;
            }
        }

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image.image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(desc.format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(desc.aspect)
                    .level_count(mip_levels)
                    .layer_count(1),
            );
        image.view = unsafe { image.device.handle().create_image_view(&view_info, None)? };

        debug!(
            "Created {}x{} {:?} image (x{} samples)",
            desc.extent.width,
            desc.extent.height,
            desc.format,
            desc.samples.as_raw()
        );
        Ok(image)
    }

    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    #[inline]
    pub fn desc(&self) -> &AttachmentImageDesc {
        &self.desc
    }

    #[inline]
    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            if self.view != vk::ImageView::null() {
                self.device.handle().destroy_image_view(self.view, None);
            }
            self.device.handle().destroy_image(self.image, None);
        }
        if let Some(allocation) = self.allocation.take() {
            let freed = self
                .device
                .with_allocator(|allocator| Ok(allocator.free(allocation)?));
            if let Err(e) = freed {
                error!("Failed to free image allocation: {}", e);
            }
        }
        debug!("Destroyed {:?} image", self.desc.format);
    }
}

/// Sampler parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerDesc {
    pub filter: vk::Filter,
    pub address_mode: vk::SamplerAddressMode,
    pub border_color: vk::BorderColor,
    /// Levels the sampler may read; sets the maximum LOD.
    pub mip_levels: u32,
}

impl SamplerDesc {
    /// Linear, clamp-to-edge sampling with an opaque-white border, used to
    /// read the shadow map.
    pub const SHADOW_MAP: Self = Self {
        filter: vk::Filter::LINEAR,
        address_mode: vk::SamplerAddressMode::CLAMP_TO_EDGE,
        border_color: vk::BorderColor::FLOAT_OPAQUE_WHITE,
        mip_levels: 1,
    };

    /// Linear, repeating sampling across `mip_levels` levels.
    pub fn texture(mip_levels: u32) -> Self {
        Self {
            filter: vk::Filter::LINEAR,
            address_mode: vk::SamplerAddressMode::REPEAT,
            border_color: vk::BorderColor::INT_OPAQUE_BLACK,
            mip_levels,
        }
    }
}

pub struct Sampler {
    device: Arc<Device>,
    sampler: vk::Sampler,
}

impl Sampler {
    pub fn new(device: Arc<Device>, desc: &SamplerDesc) -> RhiResult<Self> {
        let info = vk::SamplerCreateInfo::default()
            .mag_filter(desc.filter)
            .min_filter(desc.filter)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(desc.address_mode)
            .address_mode_v(desc.address_mode)
            .address_mode_w(desc.address_mode)
            .mip_lod_bias(0.0)
            .max_anisotropy(1.0)
            .min_lod(0.0)
            .max_lod(desc.mip_levels as f32)
            .border_color(desc.border_color);
        let sampler = unsafe { device.handle().create_sampler(&info, None)? };
        debug!("Created sampler {:?}", sampler);
        Ok(Self { device, sampler })
    }

    #[inline]
    pub fn handle(&self) -> vk::Sampler {
        self.sampler
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_sampler(self.sampler, None) };
        debug!("Destroyed sampler");
    }
}
