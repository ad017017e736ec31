//! Vulkan abstraction layer (Render Hardware Interface).
//!
//! Thin, mostly RAII wrappers over `ash`:
//! - Instance, surface, physical device selection and logical device
//! - Swapchain with out-of-date aware acquire/present
//! - Fences, semaphores, command pools and command recording
//! - Buffers and attachment images backed by `gpu-allocator`
//! - Descriptor layouts, pools and per-frame descriptor sets
//! - Shader modules, pipeline layouts, graphics pipelines
//! - Render passes and framebuffers

mod error;

pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod image;
pub mod instance;
pub mod physical_device;
pub mod pipeline;
pub mod render_pass;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod vertex;

pub use error::{RhiError, RhiResult};
pub use sync::MAX_FRAMES_IN_FLIGHT;

// Re-export ash types that users might need
pub use ash::vk;
