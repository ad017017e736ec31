//! Logical device, queues and the GPU memory allocator.

use std::sync::{Arc, Mutex};

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use tracing::{debug, error, info};

use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;
use crate::physical_device::PhysicalDeviceInfo;

/// Required device extensions.
const DEVICE_EXTENSIONS: &[&std::ffi::CStr] = &[ash::khr::swapchain::NAME];

/// Vulkan logical device wrapper.
///
/// Shared through `Arc` by every RAII object that must destroy itself
/// against the device. The allocator sits behind a `Mutex`.
pub struct Device {
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    allocator: Mutex<Option<Allocator>>,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    graphics_family: u32,
    present_family: u32,
}

impl Device {
    /// Creates the logical device with one queue per unique family and
    /// initializes the allocator.
    ///
    /// # Errors
    ///
    /// Fails if the queue families are incomplete, device creation fails or
    /// the allocator cannot be created.
    pub fn new(instance: &Instance, info: &PhysicalDeviceInfo) -> RhiResult<Arc<Self>> {
        let (graphics_family, present_family) = info.queue_families.resolved().ok_or_else(|| {
            RhiError::InvalidHandle("queue families incomplete for selected GPU".into())
        })?;

        let priorities = [1.0f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = info
            .queue_families
            .unique_families()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
            })
            .collect();

        let features = vk::PhysicalDeviceFeatures::default()
            .sampler_anisotropy(info.features.sampler_anisotropy == vk::TRUE);

        let extension_names: Vec<*const std::ffi::c_char> =
            DEVICE_EXTENSIONS.iter().map(|ext| ext.as_ptr()).collect();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extension_names)
            .enabled_features(&features);

        let device = unsafe {
            instance
                .handle()
                .create_device(info.device, &create_info, None)?
        };
        info!(
            "Logical device created on '{}' ({} queue famil{})",
            info.device_name(),
            queue_infos.len(),
            if queue_infos.len() == 1 { "y" } else { "ies" }
        );

        let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(present_family, 0) };
        debug!(
            "Queues: graphics family {}, present family {}",
            graphics_family, present_family
        );

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.handle().clone(),
            device: device.clone(),
            physical_device: info.device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })?;
        debug!("GPU memory allocator initialized");

        Ok(Arc::new(Self {
            device,
            physical_device: info.device,
            allocator: Mutex::new(Some(allocator)),
            graphics_queue,
            present_queue,
            graphics_family,
            present_family,
        }))
    }

    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    #[inline]
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    #[inline]
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    #[inline]
    pub fn graphics_family(&self) -> u32 {
        self.graphics_family
    }

    #[inline]
    pub fn present_family(&self) -> u32 {
        self.present_family
    }

    /// Runs `f` with exclusive access to the allocator.
    pub fn with_allocator<T>(
        &self,
        f: impl FnOnce(&mut Allocator) -> RhiResult<T>,
    ) -> RhiResult<T> {
        let mut guard = self
            .allocator
            .lock()
            .map_err(|_| RhiError::InvalidHandle("allocator mutex poisoned".into()))?;
        let allocator = guard
            .as_mut()
            .ok_or_else(|| RhiError::InvalidHandle("allocator already released".into()))?;
        f(allocator)
    }

    /// Blocks until every queue on the device is idle.
    pub fn wait_idle(&self) -> RhiResult<()> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }

    /// Blocks until the graphics queue is idle.
    pub fn graphics_queue_wait_idle(&self) -> RhiResult<()> {
        unsafe { self.device.queue_wait_idle(self.graphics_queue)? };
        Ok(())
    }

    /// Submits work to the graphics queue.
    ///
    /// # Safety
    ///
    /// The command buffers must be fully recorded and every semaphore and
    /// fence referenced must be in a state valid for submission.
    pub unsafe fn submit_graphics(
        &self,
        submits: &[vk::SubmitInfo],
        fence: vk::Fence,
    ) -> RhiResult<()> {
        unsafe {
            self.device
                .queue_submit(self.graphics_queue, submits, fence)?;
        }
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if let Err(e) = unsafe { self.device.device_wait_idle() } {
            error!("Failed to wait for device idle during drop: {:?}", e);
        }

        // The allocator must release its memory blocks before the device goes.
        if let Ok(mut allocator) = self.allocator.lock() {
            allocator.take();
        }

        unsafe {
            self.device.destroy_device(None);
        }
        info!("Logical device destroyed");
    }
}

// Safety: ash::Device is Send + Sync, queue and physical device handles are
// plain values, and the allocator is guarded by a Mutex.
unsafe impl Send for Device {}
unsafe impl Sync for Device {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_extensions_defined() {
        assert_eq!(DEVICE_EXTENSIONS, &[ash::khr::swapchain::NAME]);
    }

    #[test]
    fn test_device_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Device>();
    }
}
