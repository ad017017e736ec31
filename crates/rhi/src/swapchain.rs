//! Swapchain creation, recreation, acquire and present.
//!
//! Acquire and present report surface invalidation as values rather than
//! errors: [`AcquireResult::OutOfDate`] and `needs_recreate` flags. Every
//! other Vulkan failure is returned as [`RhiError`].
//!
//! ```no_run
//! use vkframe_rhi::swapchain::{AcquireResult, Swapchain};
//! # use vkframe_rhi::vk;
//! # fn example(swapchain: &mut Swapchain, semaphore: vk::Semaphore, done: vk::Semaphore)
//! #     -> Result<(), vkframe_rhi::RhiError> {
//! match swapchain.acquire_next_image(semaphore)? {
//!     AcquireResult::Image { index, .. } => {
//!         // ... record and submit ...
//!         let _needs_recreate = swapchain.present(index, done)?;
//!     }
//!     AcquireResult::OutOfDate => { /* recreate before the next frame */ }
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;
use crate::surface::Surface;

/// Surface capabilities, formats and present modes for one physical device.
#[derive(Debug, Clone)]
pub struct SwapchainSupportDetails {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        loader: &ash::khr::surface::Instance,
    ) -> RhiResult<Self> {
        let (capabilities, formats, present_modes) = unsafe {
            (
                loader.get_physical_device_surface_capabilities(physical_device, surface)?,
                loader.get_physical_device_surface_formats(physical_device, surface)?,
                loader.get_physical_device_surface_present_modes(physical_device, surface)?,
            )
        };

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Result of [`Swapchain::acquire_next_image`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireResult {
    /// An image was acquired. `suboptimal` images are still presentable.
    Image { index: u32, suboptimal: bool },
    /// The surface no longer matches the swapchain; nothing was acquired.
    OutOfDate,
}

/// Swapchain plus the color image views the main pass renders into.
///
/// The swapchain keeps a handle to the surface it was created against, so the
/// [`Surface`] must outlive it.
pub struct Swapchain {
    device: Arc<Device>,
    loader: ash::khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
    surface: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
}

impl Swapchain {
    /// Creates the swapchain for a `width` x `height` window.
    pub fn new(
        instance: &Instance,
        device: Arc<Device>,
        surface: &Surface,
        width: u32,
        height: u32,
    ) -> RhiResult<Self> {
        let loader = ash::khr::swapchain::Device::new(instance.handle(), device.handle());
        let mut swapchain = Self {
            device,
            loader,
            swapchain: vk::SwapchainKHR::null(),
            surface: surface.handle(),
            surface_loader: surface.loader().clone(),
            images: Vec::new(),
            image_views: Vec::new(),
            format: vk::SurfaceFormatKHR::default(),
            extent: vk::Extent2D::default(),
            present_mode: vk::PresentModeKHR::FIFO,
        };
        swapchain.build(width, height)?;
        Ok(swapchain)
    }

    /// Rebuilds the swapchain for a new window size.
    ///
    /// The old swapchain is passed as `old_swapchain` and destroyed once the
    /// new one exists. The caller must ensure the device is idle.
    pub fn recreate(&mut self, width: u32, height: u32) -> RhiResult<()> {
        info!("Recreating swapchain for {}x{}", width, height);
        self.destroy_image_views();
        self.build(width, height)
    }

    fn build(&mut self, width: u32, height: u32) -> RhiResult<()> {
        let support = SwapchainSupportDetails::query(
            self.device.physical_device(),
            self.surface,
            &self.surface_loader,
        )?;
        if !support.is_adequate() {
            return Err(RhiError::SwapchainError(
                "surface reports no formats or present modes".into(),
            ));
        }

        let format = choose_surface_format(&support.formats)?;
        let present_mode = choose_present_mode(&support.present_modes);
        let extent = choose_extent(&support.capabilities, width, height);
        let image_count = determine_image_count(&support.capabilities);

        let families = [self.device.graphics_family(), self.device.present_family()];
        let (sharing_mode, family_indices) = if families[0] != families[1] {
            (vk::SharingMode::CONCURRENT, &families[..])
        } else {
            (vk::SharingMode::EXCLUSIVE, &[][..])
        };

        let old_swapchain = self.swapchain;
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(family_indices)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { self.loader.create_swapchain(&create_info, None)? };
        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe { self.loader.destroy_swapchain(old_swapchain, None) };
        }
        self.swapchain = swapchain;

        self.images = unsafe { self.loader.get_swapchain_images(swapchain)? };
        self.image_views = create_image_views(&self.device, &self.images, format.format)?;
        self.format = format;
        self.extent = extent;
        self.present_mode = present_mode;

        info!(
            "Swapchain ready: {}x{}, {:?}, {:?}, {} images",
            extent.width,
            extent.height,
            format.format,
            present_mode,
            self.images.len()
        );
        Ok(())
    }

    /// Acquires the next image, signaling `semaphore` when it is ready.
    ///
    /// Waits without timeout.
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> RhiResult<AcquireResult> {
        let result = unsafe {
            self.loader
                .acquire_next_image(self.swapchain, u64::MAX, semaphore, vk::Fence::null())
        };
        match result {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    debug!("Acquired image {} from a suboptimal swapchain", index);
                }
                Ok(AcquireResult::Image { index, suboptimal })
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                debug!("Swapchain out of date on acquire");
                Ok(AcquireResult::OutOfDate)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Presents `image_index` on the present queue after `wait` signals.
    ///
    /// Returns `true` when the swapchain is suboptimal or out of date and
    /// should be recreated.
    pub fn present(&self, image_index: u32, wait: vk::Semaphore) -> RhiResult<bool> {
        let swapchains = [self.swapchain];
        let indices = [image_index];
        let waits = [wait];
        let info = vk::PresentInfoKHR::default()
            .wait_semaphores(&waits)
            .swapchains(&swapchains)
            .image_indices(&indices);

        match unsafe { self.loader.queue_present(self.device.present_queue(), &info) } {
            Ok(false) => Ok(false),
            Ok(true) => {
                debug!("Present reported suboptimal swapchain");
                Ok(true)
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                debug!("Swapchain out of date on present");
                Ok(true)
            }
            Err(e) => Err(e.into()),
        }
    }

    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format.format
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    #[inline]
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    #[inline]
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    fn destroy_image_views(&mut self) {
        for view in self.image_views.drain(..) {
            unsafe { self.device.handle().destroy_image_view(view, None) };
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.destroy_image_views();
        if self.swapchain != vk::SwapchainKHR::null() {
            unsafe { self.loader.destroy_swapchain(self.swapchain, None) };
            info!(
                "Swapchain destroyed ({}x{})",
                self.extent.width, self.extent.height
            );
        }
    }
}

/// Prefers `B8G8R8A8_SRGB`/`SRGB_NONLINEAR`, then `B8G8R8A8_UNORM`, then the
/// first format on offer.
fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> RhiResult<vk::SurfaceFormatKHR> {
    let find = |format: vk::Format| {
        formats.iter().copied().find(|f| {
            f.format == format && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
    };

    if let Some(format) = find(vk::Format::B8G8R8A8_SRGB) {
        return Ok(format);
    }
    if let Some(format) = find(vk::Format::B8G8R8A8_UNORM) {
        warn!("Falling back to B8G8R8A8_UNORM surface format");
        return Ok(format);
    }

    let first = formats
        .first()
        .copied()
        .ok_or_else(|| RhiError::UnsupportedFormat("surface offers no formats".into()))?;
    warn!("Using first available surface format {:?}", first.format);
    Ok(first)
}

/// MAILBOX when available, otherwise FIFO which is always supported.
fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Uses the surface's current extent unless it is the `u32::MAX` wildcard,
/// in which case the window size is clamped to the allowed range.
fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    let min = capabilities.min_image_extent;
    let max = capabilities.max_image_extent;
    vk::Extent2D {
        width: width.clamp(min.width, max.width),
        height: height.clamp(min.height, max.height),
    }
}

/// One more than the minimum, capped by the maximum when there is one.
fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        preferred.min(capabilities.max_image_count)
    } else {
        preferred
    }
}

fn create_image_views(
    device: &Device,
    images: &[vk::Image],
    format: vk::Format,
) -> RhiResult<Vec<vk::ImageView>> {
    let mut views = Vec::with_capacity(images.len());
    for &image in images {
        let info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .level_count(1)
                    .layer_count(1),
            );
        match unsafe { device.handle().create_image_view(&info, None) } {
            Ok(view) => views.push(view),
            Err(e) => {
                for view in views {
                    unsafe { device.handle().destroy_image_view(view, None) };
                }
                return Err(RhiError::SwapchainError(format!(
                    "failed to create swapchain image view: {e:?}"
                )));
            }
        }
    }
    debug!("Created {} swapchain image views", views.len());
    Ok(views)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface_format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    #[test]
    fn test_choose_surface_format_prefers_srgb() {
        let formats = [
            surface_format(vk::Format::R8G8B8A8_UNORM),
            surface_format(vk::Format::B8G8R8A8_UNORM),
            surface_format(vk::Format::B8G8R8A8_SRGB),
        ];
        let selected = choose_surface_format(&formats).unwrap();
        assert_eq!(selected.format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn test_choose_surface_format_falls_back_to_unorm_then_first() {
        let formats = [
            surface_format(vk::Format::R8G8B8A8_UNORM),
            surface_format(vk::Format::B8G8R8A8_UNORM),
        ];
        assert_eq!(
            choose_surface_format(&formats).unwrap().format,
            vk::Format::B8G8R8A8_UNORM
        );

        let formats = [surface_format(vk::Format::R8G8B8A8_UNORM)];
        assert_eq!(
            choose_surface_format(&formats).unwrap().format,
            vk::Format::R8G8B8A8_UNORM
        );
    }

    #[test]
    fn test_choose_surface_format_empty_is_error() {
        assert!(matches!(
            choose_surface_format(&[]),
            Err(RhiError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_choose_present_mode() {
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX]),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO]),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn test_choose_extent_uses_current() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            ..Default::default()
        };
        let extent = choose_extent(&capabilities, 800, 600);
        assert_eq!((extent.width, extent.height), (1920, 1080));
    }

    #[test]
    fn test_choose_extent_clamps_wildcard() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 100,
                height: 100,
            },
            max_image_extent: vk::Extent2D {
                width: 2000,
                height: 2000,
            },
            ..Default::default()
        };

        let extent = choose_extent(&capabilities, 3000, 50);
        assert_eq!((extent.width, extent.height), (2000, 100));

        let extent = choose_extent(&capabilities, 800, 600);
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn test_determine_image_count() {
        let capped = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 2,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&capped), 2);

        let unlimited = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&unlimited), 3);
    }

    #[test]
    fn test_support_details_adequacy() {
        let mut details = SwapchainSupportDetails {
            capabilities: vk::SurfaceCapabilitiesKHR::default(),
            formats: vec![vk::SurfaceFormatKHR::default()],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };
        assert!(details.is_adequate());

        details.present_modes.clear();
        assert!(!details.is_adequate());
    }
}
