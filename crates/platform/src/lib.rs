//! Windowing for vkframe.
//!
//! - `winit` window creation and size tracking
//! - Vulkan surface creation through `ash-window`
//! - Edge-triggered keyboard state for the demo controls

mod input;
mod window;

pub use input::{KeyCode, Keyboard};
pub use window::{Window, required_extensions};

pub use winit::event::{ElementState, KeyEvent, WindowEvent};
pub use winit::event_loop::{ActiveEventLoop, EventLoop};
