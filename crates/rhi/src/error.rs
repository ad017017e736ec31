//! RHI error types.

use thiserror::Error;

/// Errors raised by the Vulkan abstraction layer.
#[derive(Error, Debug)]
pub enum RhiError {
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] ash::vk::Result),

    #[error("Failed to load Vulkan library: {0}")]
    LoadingError(#[from] ash::LoadingError),

    #[error("GPU allocation error: {0}")]
    AllocatorError(#[from] gpu_allocator::AllocationError),

    #[error("No suitable GPU found")]
    NoSuitableGpu,

    #[error("No supported format among candidates: {0}")]
    UnsupportedFormat(String),

    #[error("Shader error: {0}")]
    ShaderError(String),

    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    /// A raw handle was not created by (or was already returned to) its owner.
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    #[error("Pipeline error: {0}")]
    PipelineError(String),

    /// A descriptor write targeted a frame slot the set does not have.
    #[error("Descriptor set index {index} out of range (set count {count})")]
    DescriptorIndexOutOfRange { index: usize, count: usize },

    /// `apply` was called with nothing staged.
    #[error("No descriptor writes staged")]
    NoPendingWrites,

    /// The same binding was staged twice without a flush in between.
    #[error("Binding {0} already staged; flush before writing it again")]
    BindingAlreadyStaged(u32),

    /// `update_*` referenced a staged entry that does not exist or has the wrong kind.
    #[error("Staged write {index} cannot be updated: {reason}")]
    InvalidStagedWrite { index: usize, reason: &'static str },
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = Result<T, RhiError>;
