//! Presentation surface ownership.

use ash::vk;
use tracing::debug;

use crate::error::RhiResult;
use crate::instance::Instance;

/// RAII wrapper for a `vk::SurfaceKHR`.
///
/// The surface itself is created by the platform layer; this type only takes
/// ownership of the handle and answers capability queries against it. The
/// owning [`Instance`] must outlive the surface.
pub struct Surface {
    handle: vk::SurfaceKHR,
    loader: ash::khr::surface::Instance,
}

impl Surface {
    /// Takes ownership of a surface created for `instance`.
    pub fn from_raw(instance: &Instance, handle: vk::SurfaceKHR) -> Self {
        let loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());
        debug!("Surface registered ({:?})", handle);
        Self { handle, loader }
    }

    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    #[inline]
    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.loader
    }

    /// Whether queue family `family` of `physical_device` can present here.
    pub fn supports_present(
        &self,
        physical_device: vk::PhysicalDevice,
        family: u32,
    ) -> RhiResult<bool> {
        Ok(unsafe {
            self.loader
                .get_physical_device_surface_support(physical_device, family, self.handle)?
        })
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_surface(self.handle, None);
        }
        debug!("Surface destroyed");
    }
}
