//! Synchronization of the frames in flight.
//!
//! Each of the [`MAX_FRAMES_IN_FLIGHT`] slots owns a completion fence and
//! two semaphores:
//!
//! ```text
//! 1. wait on the slot fence        (CPU waits for the slot's last use)
//! 2. acquire an image              (signals image_acquired)
//! 3. reset the fence               (only once an image was acquired)
//! 4. submit                        (waits image_acquired, signals
//!                                   render_finished and the fence)
//! 5. present                       (waits render_finished)
//! 6. advance to the next slot
//! ```
//!
//! Waiting on the slot fence is the only blocking point of the steady-state
//! loop. Resetting the fence after a successful acquire keeps an aborted
//! frame from leaving it unsignaled, which would deadlock the next wait.

use ash::vk;
use tracing::{debug, info};

use crate::backend::{AcquireOutcome, FrameSubmission, PresentOutcome, SyncBackend};
use crate::{MAX_FRAMES_IN_FLIGHT, RenderError, RenderResult};

/// Where a slot is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Free to record; its previous work (if any) has retired.
    Idle,
    /// Fence reset, commands being recorded.
    Recording,
    /// Commands submitted, fence pending.
    Submitted,
    /// Image handed to the presentation engine.
    Presented,
}

#[derive(Debug)]
struct FrameSlot {
    fence: vk::Fence,
    image_acquired: vk::Semaphore,
    render_finished: vk::Semaphore,
    state: SlotState,
}

/// Fences, semaphores and the rotating slot index.
#[derive(Debug)]
pub struct FrameSynchronizer {
    slots: Vec<FrameSlot>,
    current: usize,
}

impl FrameSynchronizer {
    /// Creates the per-slot objects. Fences start signaled so the first wait
    /// on each slot returns immediately.
    pub fn new<B: SyncBackend + ?Sized>(backend: &B) -> RenderResult<Self> {
        let mut sync = Self {
            slots: Vec::with_capacity(MAX_FRAMES_IN_FLIGHT),
            current: 0,
        };
        for i in 0..MAX_FRAMES_IN_FLIGHT {
            match Self::create_slot(backend) {
                Ok(slot) => sync.slots.push(slot),
                Err(e) => {
                    sync.destroy(backend);
                    return Err(e);
                }
            }
            debug!("Created sync objects for frame slot {}", i);
        }
        info!(
            "Frame synchronizer ready with {} frames in flight",
            MAX_FRAMES_IN_FLIGHT
        );
        Ok(sync)
    }

    fn create_slot<B: SyncBackend + ?Sized>(backend: &B) -> RenderResult<FrameSlot> {
        let fence = backend.create_fence(true)?;
        let image_acquired = match backend.create_semaphore() {
            Ok(semaphore) => semaphore,
            Err(e) => {
                backend.destroy_fence(fence);
                return Err(e.into());
            }
        };
        let render_finished = match backend.create_semaphore() {
            Ok(semaphore) => semaphore,
            Err(e) => {
                backend.destroy_semaphore(image_acquired);
                backend.destroy_fence(fence);
                return Err(e.into());
            }
        };
        Ok(FrameSlot {
            fence,
            image_acquired,
            render_finished,
            state: SlotState::Idle,
        })
    }

    #[inline]
    pub fn current_slot(&self) -> usize {
        self.current
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn slot_state(&self, slot: usize) -> RenderResult<SlotState> {
        Ok(self.slot(slot)?.state)
    }

    pub fn fence(&self, slot: usize) -> RenderResult<vk::Fence> {
        Ok(self.slot(slot)?.fence)
    }

    fn slot(&self, slot: usize) -> RenderResult<&FrameSlot> {
        self.slots.get(slot).ok_or(RenderError::SlotOutOfRange(slot))
    }

    fn slot_mut(&mut self, slot: usize) -> RenderResult<&mut FrameSlot> {
        self.slots
            .get_mut(slot)
            .ok_or(RenderError::SlotOutOfRange(slot))
    }

    /// Blocks until the slot's previous submission has retired.
    pub fn wait_for_slot<B: SyncBackend + ?Sized>(
        &mut self,
        backend: &B,
        slot: usize,
    ) -> RenderResult<()> {
        let entry = self.slot_mut(slot)?;
        backend.wait_for_fence(entry.fence, u64::MAX)?;
        if entry.state != SlotState::Recording {
            entry.state = SlotState::Idle;
        }
        Ok(())
    }

    /// Acquires the next swapchain image, signaling the slot's
    /// image-acquired semaphore.
    ///
    /// An out-of-date surface is reported as [`AcquireOutcome::OutOfDate`];
    /// the slot stays idle and its fence stays signaled.
    pub fn acquire_image<B: SyncBackend + ?Sized>(
        &mut self,
        backend: &B,
        slot: usize,
    ) -> RenderResult<AcquireOutcome> {
        let semaphore = self.slot(slot)?.image_acquired;
        let outcome = backend.acquire_next_image(semaphore)?;
        if outcome == AcquireOutcome::OutOfDate {
            debug!("Acquire for slot {} found the swapchain out of date", slot);
        }
        Ok(outcome)
    }

    /// Unsignals the slot fence and marks the slot as recording.
    ///
    /// Only call this after [`FrameSynchronizer::acquire_image`] returned an
    /// image; the fence is signaled again by the submission that follows.
    pub fn reset_fence<B: SyncBackend + ?Sized>(
        &mut self,
        backend: &B,
        slot: usize,
    ) -> RenderResult<()> {
        let entry = self.slot_mut(slot)?;
        expect_state(slot, entry.state, SlotState::Idle)?;
        backend.reset_fence(entry.fence)?;
        entry.state = SlotState::Recording;
        Ok(())
    }

    /// Submits the slot's recorded commands.
    pub fn submit<B: SyncBackend + ?Sized>(
        &mut self,
        backend: &B,
        slot: usize,
        command_buffer: vk::CommandBuffer,
    ) -> RenderResult<()> {
        let entry = self.slot_mut(slot)?;
        expect_state(slot, entry.state, SlotState::Recording)?;
        backend.submit_frame(&FrameSubmission {
            command_buffer,
            wait_semaphore: entry.image_acquired,
            wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            signal_semaphore: entry.render_finished,
            fence: entry.fence,
        })?;
        entry.state = SlotState::Submitted;
        Ok(())
    }

    /// Presents `image_index` once the slot's rendering has finished.
    pub fn present<B: SyncBackend + ?Sized>(
        &mut self,
        backend: &B,
        slot: usize,
        image_index: u32,
    ) -> RenderResult<PresentOutcome> {
        let entry = self.slot_mut(slot)?;
        expect_state(slot, entry.state, SlotState::Submitted)?;
        let outcome = backend.present(image_index, entry.render_finished)?;
        entry.state = SlotState::Presented;
        if outcome == PresentOutcome::NeedsRecreate {
            debug!("Present of image {} asks for swapchain recreation", image_index);
        }
        Ok(outcome)
    }

    /// Moves to the next slot and returns its index.
    pub fn advance(&mut self) -> usize {
        self.current = (self.current + 1) % self.slots.len().max(1);
        self.current
    }

    /// Blocks until every slot's last submission has retired.
    pub fn wait_for_all<B: SyncBackend + ?Sized>(&mut self, backend: &B) -> RenderResult<()> {
        for slot in 0..self.slots.len() {
            self.wait_for_slot(backend, slot)?;
        }
        Ok(())
    }

    /// Destroys the per-slot objects. The GPU must be idle.
    pub fn destroy<B: SyncBackend + ?Sized>(&mut self, backend: &B) {
        for slot in self.slots.drain(..) {
            backend.destroy_semaphore(slot.render_finished);
            backend.destroy_semaphore(slot.image_acquired);
            backend.destroy_fence(slot.fence);
        }
        self.current = 0;
        debug!("Frame synchronizer destroyed");
    }
}

fn expect_state(slot: usize, state: SlotState, expected: SlotState) -> RenderResult<()> {
    if state == expected {
        Ok(())
    } else {
        Err(RenderError::UnexpectedSlotState {
            slot,
            state,
            expected,
        })
    }
}
