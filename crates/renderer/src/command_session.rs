//! Command buffers and the begin/end frame protocol.
//!
//! A [`CommandSession`] owns the command pool, one persistent command buffer
//! per frame slot and the [`FrameSynchronizer`]. Recording a frame looks
//! like this:
//!
//! ```no_run
//! # use vkframe_renderer::command_session::CommandSession;
//! # use vkframe_renderer::{DeviceContext, RenderResult};
//! # fn frame(session: &mut CommandSession, ctx: &DeviceContext) -> RenderResult<()> {
//! let Some(frame) = session.begin_frame(ctx)? else {
//!     // Swapchain out of date: recreate, then try again next frame.
//!     return Ok(());
//! };
//! // ... record into frame.command_buffer() ...
//! let end = session.end_frame(ctx, frame)?;
//! if end.needs_recreate {
//!     // recreate the swapchain-dependent state
//! }
//! # Ok(())
//! # }
//! ```

use ash::vk;
use tracing::{debug, info};
use vkframe_rhi::RhiError;

use crate::backend::{AcquireOutcome, CommandBackend, PresentOutcome, SyncBackend};
use crate::frame_sync::FrameSynchronizer;
use crate::{MAX_FRAMES_IN_FLIGHT, RenderError, RenderResult};

/// The frame being recorded.
///
/// Handed out by [`CommandSession::begin_frame`] and consumed by
/// [`CommandSession::end_frame`]; it cannot be copied or kept across frames.
#[derive(Debug)]
pub struct FrameDescriptor {
    slot: usize,
    image_index: u32,
    command_buffer: vk::CommandBuffer,
}

impl FrameDescriptor {
    /// Frame slot in `[0, MAX_FRAMES_IN_FLIGHT)`.
    #[inline]
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Acquired swapchain image.
    #[inline]
    pub fn image_index(&self) -> u32 {
        self.image_index
    }

    #[inline]
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }
}

/// Result of [`CommandSession::end_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameEnd {
    /// The swapchain was out of date or suboptimal at present time.
    pub needs_recreate: bool,
    /// Slot the next frame will use.
    pub next_slot: usize,
}

pub struct CommandSession {
    pool: vk::CommandPool,
    buffers: Vec<vk::CommandBuffer>,
    sync: FrameSynchronizer,
    /// Slot currently between `begin_frame` and `end_frame`.
    open: Option<usize>,
}

impl CommandSession {
    pub fn new<B>(backend: &B) -> RenderResult<Self>
    where
        B: SyncBackend + CommandBackend + ?Sized,
    {
        let pool = backend.create_command_pool()?;
        let buffers = match backend.allocate_command_buffers(pool, MAX_FRAMES_IN_FLIGHT as u32) {
            Ok(buffers) => buffers,
            Err(e) => {
                backend.destroy_command_pool(pool);
                return Err(e.into());
            }
        };
        let sync = match FrameSynchronizer::new(backend) {
            Ok(sync) => sync,
            Err(e) => {
                backend.destroy_command_pool(pool);
                return Err(e);
            }
        };
        info!("Command session created");
        Ok(Self {
            pool,
            buffers,
            sync,
            open: None,
        })
    }

    #[inline]
    pub fn current_slot(&self) -> usize {
        self.sync.current_slot()
    }

    #[inline]
    pub fn synchronizer(&self) -> &FrameSynchronizer {
        &self.sync
    }

    /// Persistent command buffer of `slot`.
    pub fn command_buffer(&self, slot: usize) -> RenderResult<vk::CommandBuffer> {
        self.buffers
            .get(slot)
            .copied()
            .ok_or(RenderError::SlotOutOfRange(slot))
    }

    pub fn is_recording(&self) -> bool {
        self.open.is_some()
    }

    /// Starts a frame in the current slot.
    ///
    /// Waits for the slot's previous work, acquires an image, then resets
    /// the fence and the slot's command buffer and begins recording.
    /// Returns `None` if the swapchain is out of date; nothing was recorded
    /// and the caller must recreate before trying again.
    ///
    /// # Errors
    ///
    /// [`RenderError::FrameInProgress`] if the previous frame was not ended.
    pub fn begin_frame<B>(&mut self, backend: &B) -> RenderResult<Option<FrameDescriptor>>
    where
        B: SyncBackend + CommandBackend + ?Sized,
    {
        if let Some(slot) = self.open {
            return Err(RenderError::FrameInProgress(slot));
        }

        let slot = self.sync.current_slot();
        let command_buffer = self.command_buffer(slot)?;

        self.sync.wait_for_slot(backend, slot)?;
        let image_index = match self.sync.acquire_image(backend, slot)? {
            AcquireOutcome::Image { index, .. } => index,
            AcquireOutcome::OutOfDate => return Ok(None),
        };

        self.sync.reset_fence(backend, slot)?;
        backend.reset_command_buffer(command_buffer)?;
        backend.begin_command_buffer(command_buffer, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
        self.open = Some(slot);

        Ok(Some(FrameDescriptor {
            slot,
            image_index,
            command_buffer,
        }))
    }

    /// Ends recording, submits, presents and advances to the next slot.
    pub fn end_frame<B>(&mut self, backend: &B, frame: FrameDescriptor) -> RenderResult<FrameEnd>
    where
        B: SyncBackend + CommandBackend + ?Sized,
    {
        match self.open {
            Some(slot) if slot == frame.slot => {}
            Some(slot) => return Err(RenderError::FrameInProgress(slot)),
            None => return Err(RenderError::NoFrameInProgress),
        }

        backend.end_command_buffer(frame.command_buffer)?;
        self.open = None;
        self.sync.submit(backend, frame.slot, frame.command_buffer)?;
        let outcome = self.sync.present(backend, frame.slot, frame.image_index)?;
        let next_slot = self.sync.advance();

        Ok(FrameEnd {
            needs_recreate: outcome == PresentOutcome::NeedsRecreate,
            next_slot,
        })
    }

    /// Records and runs a one-shot command buffer, blocking until the
    /// graphics queue is idle.
    ///
    /// Meant for setup work such as buffer uploads, never for per-frame
    /// rendering. The buffer is freed whether or not `record` succeeds.
    pub fn run_immediate<B, F>(&self, backend: &B, record: F) -> RenderResult<()>
    where
        B: CommandBackend + ?Sized,
        F: FnOnce(vk::CommandBuffer) -> RenderResult<()>,
    {
        let buffers = backend.allocate_command_buffers(self.pool, 1)?;
        let result = Self::record_and_submit(backend, &buffers, record);
        backend.free_command_buffers(self.pool, &buffers);
        result
    }

    fn record_and_submit<B, F>(
        backend: &B,
        buffers: &[vk::CommandBuffer],
        record: F,
    ) -> RenderResult<()>
    where
        B: CommandBackend + ?Sized,
        F: FnOnce(vk::CommandBuffer) -> RenderResult<()>,
    {
        let buffer = *buffers.first().ok_or_else(|| {
            RhiError::InvalidHandle("no command buffer allocated for immediate submit".into())
        })?;
        backend.begin_command_buffer(buffer, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
        record(buffer)?;
        backend.end_command_buffer(buffer)?;
        backend.submit_and_wait(buffer)?;
        debug!("Immediate submission complete");
        Ok(())
    }

    /// Waits for every slot's work to retire.
    pub fn wait_for_all<B: SyncBackend + ?Sized>(&mut self, backend: &B) -> RenderResult<()> {
        self.sync.wait_for_all(backend)
    }

    /// Destroys the pool (and with it every buffer) and the sync objects.
    /// The GPU must be idle.
    pub fn destroy<B>(&mut self, backend: &B)
    where
        B: SyncBackend + CommandBackend + ?Sized,
    {
        self.sync.destroy(backend);
        if self.pool != vk::CommandPool::null() {
            backend.destroy_command_pool(self.pool);
            self.pool = vk::CommandPool::null();
        }
        self.buffers.clear();
        self.open = None;
        info!("Command session destroyed");
    }
}
