//! Fences and semaphores.
//!
//! Synchronization objects are handed around as raw handles because the
//! frame synchronizer keeps them in per-slot arrays and destroys them
//! explicitly at teardown. These are the device-level operations it needs.

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;

/// Number of frames the CPU may record ahead of the GPU.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

impl Device {
    /// Creates a fence, optionally already signaled.
    ///
    /// Per-slot frame fences start signaled so the first wait on each slot
    /// returns immediately.
    pub fn create_fence(&self, signaled: bool) -> RhiResult<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let info = vk::FenceCreateInfo::default().flags(flags);
        let fence = unsafe { self.handle().create_fence(&info, None)? };
        debug!("Created fence {:?} (signaled: {})", fence, signaled);
        Ok(fence)
    }

    /// Waits for `fence` with the given timeout in nanoseconds.
    pub fn wait_for_fence(&self, fence: vk::Fence, timeout: u64) -> RhiResult<()> {
        unsafe { self.handle().wait_for_fences(&[fence], true, timeout)? };
        Ok(())
    }

    pub fn reset_fence(&self, fence: vk::Fence) -> RhiResult<()> {
        unsafe { self.handle().reset_fences(&[fence])? };
        Ok(())
    }

    /// Non-blocking status query.
    pub fn is_fence_signaled(&self, fence: vk::Fence) -> RhiResult<bool> {
        Ok(unsafe { self.handle().get_fence_status(fence)? })
    }

    pub fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.handle().destroy_fence(fence, None) };
        debug!("Destroyed fence {:?}", fence);
    }

    pub fn create_semaphore(&self) -> RhiResult<vk::Semaphore> {
        let info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe { self.handle().create_semaphore(&info, None)? };
        debug!("Created semaphore {:?}", semaphore);
        Ok(semaphore)
    }

    pub fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.handle().destroy_semaphore(semaphore, None) };
        debug!("Destroyed semaphore {:?}", semaphore);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_frames_in_flight_constant() {
        assert_eq!(MAX_FRAMES_IN_FLIGHT, 2);
    }
}
