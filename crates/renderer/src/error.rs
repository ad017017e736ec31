//! Renderer error types.

use thiserror::Error;
use vkframe_rhi::RhiError;

use crate::frame_sync::SlotState;

/// Errors raised by the frame orchestration layer.
///
/// Everything except [`RenderError::Rhi`] is a broken calling contract:
/// the operation was refused and no GPU work was recorded for it.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error(transparent)]
    Rhi(#[from] RhiError),

    #[error("{0} pass is already active")]
    PassAlreadyActive(&'static str),

    #[error("{0} pass is not active")]
    PassNotActive(&'static str),

    #[error("{0} pass has not been initialized")]
    PassNotInitialized(&'static str),

    #[error("Batch label '{0}' is already in use")]
    DuplicateBatchLabel(String),

    #[error("Unknown batch handle {0}")]
    UnknownBatch(u64),

    /// A registry handle that is not live or names another resource type.
    #[error("Resource #{0} is missing")]
    MissingResource(u64),

    #[error("Mesh has no vertices")]
    EmptyMesh,

    /// A vertex or index count does not fit the 32-bit draw parameters.
    #[error("Mesh {what} count {count} exceeds u32::MAX")]
    MeshTooLarge { what: &'static str, count: usize },

    #[error("Texture data is {actual} bytes, expected {expected}")]
    TextureSizeMismatch { expected: usize, actual: usize },

    /// `begin_frame` was called while slot `0` is still recording.
    #[error("Frame in slot {0} is still being recorded")]
    FrameInProgress(usize),

    #[error("No frame is being recorded")]
    NoFrameInProgress,

    #[error("Frame slot {0} out of range")]
    SlotOutOfRange(usize),

    #[error("Frame slot {slot} is {state:?}, expected {expected:?}")]
    UnexpectedSlotState {
        slot: usize,
        state: SlotState,
        expected: SlotState,
    },
}

/// Result type alias for renderer operations.
pub type RenderResult<T> = Result<T, RenderError>;
