//! Physical device selection and capability queries.
//!
//! Besides picking a GPU, this module answers the two capability questions the
//! render passes depend on: the highest usable MSAA sample count and the
//! depth format to use.

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::{RhiError, RhiResult};
use crate::surface::Surface;

/// Depth formats in order of preference.
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Queue family indices needed for rendering and presentation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics_family: Option<u32>,
    pub present_family: Option<u32>,
}

impl QueueFamilyIndices {
    pub fn is_complete(&self) -> bool {
        self.graphics_family.is_some() && self.present_family.is_some()
    }

    /// Both indices, available only when complete.
    pub fn resolved(&self) -> Option<(u32, u32)> {
        Some((self.graphics_family?, self.present_family?))
    }

    /// Distinct family indices, graphics first.
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families = Vec::with_capacity(2);
        for family in [self.graphics_family, self.present_family].into_iter().flatten() {
            if !families.contains(&family) {
                families.push(family);
            }
        }
        families
    }
}

/// A selected physical device and the properties queried while selecting it.
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    pub device: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub features: vk::PhysicalDeviceFeatures,
    pub queue_families: QueueFamilyIndices,
}

impl PhysicalDeviceInfo {
    pub fn device_name(&self) -> &str {
        self.properties
            .device_name_as_c_str()
            .ok()
            .and_then(|name| name.to_str().ok())
            .unwrap_or("Unknown")
    }

    /// Highest sample count usable for both color and depth attachments.
    pub fn max_usable_sample_count(&self) -> vk::SampleCountFlags {
        let limits = &self.properties.limits;
        highest_sample_count(
            limits.framebuffer_color_sample_counts & limits.framebuffer_depth_sample_counts,
        )
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.properties.device_type)
            .field("queue_families", &self.queue_families)
            .finish()
    }
}

/// Picks the highest single bit set in `counts`, or `TYPE_1`.
pub fn highest_sample_count(counts: vk::SampleCountFlags) -> vk::SampleCountFlags {
    [
        vk::SampleCountFlags::TYPE_64,
        vk::SampleCountFlags::TYPE_32,
        vk::SampleCountFlags::TYPE_16,
        vk::SampleCountFlags::TYPE_8,
        vk::SampleCountFlags::TYPE_4,
        vk::SampleCountFlags::TYPE_2,
    ]
    .into_iter()
    .find(|&flag| counts.contains(flag))
    .unwrap_or(vk::SampleCountFlags::TYPE_1)
}

/// Resolves a requested sample count against the device maximum.
///
/// `None` means "as many as possible". A request above the maximum is clamped.
pub fn resolve_sample_count(
    requested: Option<u32>,
    max: vk::SampleCountFlags,
) -> vk::SampleCountFlags {
    match requested {
        None => max,
        Some(samples) => {
            let wanted = vk::SampleCountFlags::from_raw(samples.max(1));
            if wanted.as_raw() > max.as_raw() {
                warn!(
                    "Requested {} MSAA samples, device supports {}; clamping",
                    samples,
                    max.as_raw()
                );
                max
            } else {
                wanted
            }
        }
    }
}

/// Selects the best GPU that can render and present to `surface`.
///
/// # Errors
///
/// Returns [`RhiError::NoSuitableGpu`] when no device qualifies.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: &Surface,
) -> RhiResult<PhysicalDeviceInfo> {
    let devices = unsafe { instance.enumerate_physical_devices()? };
    info!("Found {} GPU(s)", devices.len());

    let best = devices
        .into_iter()
        .filter_map(|device| check_device(instance, device, surface))
        .max_by_key(rate_device)
        .ok_or(RhiError::NoSuitableGpu)?;

    info!(
        "Selected GPU '{}' ({:?}), max MSAA x{}",
        best.device_name(),
        best.properties.device_type,
        best.max_usable_sample_count().as_raw()
    );

    Ok(best)
}

/// Returns the first candidate supporting `features` with `tiling`.
pub fn find_supported_format(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    candidates: &[vk::Format],
    tiling: vk::ImageTiling,
    features: vk::FormatFeatureFlags,
) -> RhiResult<vk::Format> {
    candidates
        .iter()
        .copied()
        .find(|&format| {
            let props = unsafe { instance.get_physical_device_format_properties(device, format) };
            match tiling {
                vk::ImageTiling::LINEAR => props.linear_tiling_features.contains(features),
                vk::ImageTiling::OPTIMAL => props.optimal_tiling_features.contains(features),
                _ => false,
            }
        })
        .ok_or_else(|| RhiError::UnsupportedFormat(format!("{candidates:?}")))
}

/// Whether `format` can be the source and destination of a linear blit,
/// which mip generation needs.
pub fn supports_linear_blit(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    format: vk::Format,
) -> bool {
    let props = unsafe { instance.get_physical_device_format_properties(device, format) };
    props
        .optimal_tiling_features
        .contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR)
}

/// Picks the main pass depth format.
pub fn find_depth_format(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
) -> RhiResult<vk::Format> {
    let format = find_supported_format(
        instance,
        device,
        &DEPTH_FORMAT_CANDIDATES,
        vk::ImageTiling::OPTIMAL,
        vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
    )?;
    debug!("Depth format: {:?}", format);
    Ok(format)
}

fn check_device(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: &Surface,
) -> Option<PhysicalDeviceInfo> {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    let features = unsafe { instance.get_physical_device_features(device) };
    let queue_families = find_queue_families(instance, device, surface);

    let name = properties
        .device_name_as_c_str()
        .unwrap_or(c"Unknown")
        .to_string_lossy()
        .into_owned();

    if !queue_families.is_complete() {
        debug!("GPU '{}' skipped: missing graphics or present queue", name);
        return None;
    }

    if !supports_swapchain(instance, device) {
        debug!("GPU '{}' skipped: VK_KHR_swapchain unavailable", name);
        return None;
    }

    let has_formats = unsafe {
        surface
            .loader()
            .get_physical_device_surface_formats(device, surface.handle())
            .is_ok_and(|formats| !formats.is_empty())
    };
    if !has_formats {
        debug!("GPU '{}' skipped: no surface formats", name);
        return None;
    }

    Some(PhysicalDeviceInfo {
        device,
        properties,
        features,
        queue_families,
    })
}

fn supports_swapchain(instance: &ash::Instance, device: vk::PhysicalDevice) -> bool {
    let Ok(extensions) = (unsafe { instance.enumerate_device_extension_properties(device) }) else {
        return false;
    };
    extensions.iter().any(|ext| {
        ext.extension_name_as_c_str()
            .is_ok_and(|name| name == ash::khr::swapchain::NAME)
    })
}

fn find_queue_families(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: &Surface,
) -> QueueFamilyIndices {
    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
    let mut indices = QueueFamilyIndices::default();

    for (i, family) in families.iter().enumerate() {
        let i = i as u32;
        if family.queue_count == 0 {
            continue;
        }

        let graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
        let present = surface.supports_present(device, i).unwrap_or(false);

        // A family doing both avoids concurrent sharing on the swapchain.
        if graphics && present {
            indices.graphics_family = Some(i);
            indices.present_family = Some(i);
            break;
        }
        if graphics && indices.graphics_family.is_none() {
            indices.graphics_family = Some(i);
        }
        if present && indices.present_family.is_none() {
            indices.present_family = Some(i);
        }
    }

    indices
}

fn rate_device(info: &PhysicalDeviceInfo) -> u32 {
    let type_score = match info.properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 10_000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 1_000,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 100,
        _ => 1,
    };
    type_score + info.properties.limits.max_image_dimension2_d
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_family_indices_default_incomplete() {
        let indices = QueueFamilyIndices::default();
        assert!(!indices.is_complete());
        assert_eq!(indices.resolved(), None);
    }

    #[test]
    fn test_unique_families_shared() {
        let indices = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(0),
        };
        assert_eq!(indices.unique_families(), vec![0]);
        assert_eq!(indices.resolved(), Some((0, 0)));
    }

    #[test]
    fn test_unique_families_split() {
        let indices = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(2),
        };
        assert_eq!(indices.unique_families(), vec![0, 2]);
    }

    #[test]
    fn test_highest_sample_count() {
        let counts = vk::SampleCountFlags::TYPE_1
            | vk::SampleCountFlags::TYPE_2
            | vk::SampleCountFlags::TYPE_4
            | vk::SampleCountFlags::TYPE_8;
        assert_eq!(highest_sample_count(counts), vk::SampleCountFlags::TYPE_8);
        assert_eq!(
            highest_sample_count(vk::SampleCountFlags::TYPE_1),
            vk::SampleCountFlags::TYPE_1
        );
        assert_eq!(
            highest_sample_count(vk::SampleCountFlags::empty()),
            vk::SampleCountFlags::TYPE_1
        );
    }

    #[test]
    fn test_resolve_sample_count() {
        let max = vk::SampleCountFlags::TYPE_8;
        assert_eq!(resolve_sample_count(None, max), max);
        assert_eq!(
            resolve_sample_count(Some(4), max),
            vk::SampleCountFlags::TYPE_4
        );
        assert_eq!(resolve_sample_count(Some(16), max), max);
        assert_eq!(
            resolve_sample_count(Some(1), max),
            vk::SampleCountFlags::TYPE_1
        );
    }
}
