//! Frame orchestration and GPU resource lifecycle.
//!
//! This crate drives a two-pass (shadow + main) renderer:
//! - [`registry`]: handle-based ownership of GPU-backed objects
//! - [`frame_sync`]: fences and semaphores of the frames in flight
//! - [`command_session`]: per-slot command buffers, the begin/end frame
//!   protocol and one-shot submissions
//! - [`render_pass`]: the swapchain-attached main pass and the offscreen
//!   shadow pass
//! - [`batch`]: draw calls grouped by shared descriptor sets
//! - [`mesh`], [`texture`], [`uniform`]: GPU data uploaded through the
//!   command session and owned by a [`registry::ResourceRegistry`]
//! - [`renderer`]: the per-frame loop tying the above together
//!
//! All Vulkan traffic goes through the traits in [`backend`].
//! [`DeviceContext`] implements them on top of `vkframe_rhi`.

pub mod backend;
pub mod batch;
pub mod command_session;
pub mod context;
mod error;
pub mod frame_sync;
pub mod mesh;
pub mod program;
pub mod registry;
pub mod render_pass;
pub mod renderer;
pub mod texture;
pub mod uniform;

#[cfg(test)]
mod mock;

pub use backend::GpuBackend;
pub use context::DeviceContext;
pub use error::{RenderError, RenderResult};
pub use renderer::FrameRenderer;

pub use vkframe_rhi::MAX_FRAMES_IN_FLIGHT;
