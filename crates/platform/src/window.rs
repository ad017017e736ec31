//! `winit` window and the Vulkan surface attached to it.

use std::ffi::{CStr, c_char};
use std::sync::Arc;

use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info};
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window as WinitWindow, WindowAttributes};

use vkframe_core::{Error, Result};
use vkframe_core::config::WindowConfig;
use vkframe_rhi::instance::Instance;
use vkframe_rhi::surface::Surface;

/// The application window.
///
/// Tracks the last size reported by the event loop; a zero size means the
/// window is minimized and nothing should be drawn.
pub struct Window {
    window: Arc<WinitWindow>,
    width: u32,
    height: u32,
}

impl Window {
    pub fn new(event_loop: &ActiveEventLoop, config: &WindowConfig) -> Result<Self> {
        let attrs = WindowAttributes::default()
            .with_title(config.title.clone())
            .with_inner_size(PhysicalSize::new(config.width, config.height))
            .with_resizable(true);

        let window = event_loop
            .create_window(attrs)
            .map_err(|e| Error::Window(e.to_string()))?;

        // The compositor may not honor the requested size.
        let size = window.inner_size();
        info!(
            "Window '{}' created: {}x{}",
            config.title, size.width, size.height
        );

        Ok(Self {
            window: Arc::new(window),
            width: size.width,
            height: size.height,
        })
    }

    #[inline]
    pub fn id(&self) -> winit::window::WindowId {
        self.window.id()
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_minimized(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Records a new size from a `Resized` event.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        debug!("Window resized: {}x{}", width, height);
    }

    /// Width over height, or 1.0 while minimized.
    pub fn aspect_ratio(&self) -> f32 {
        if self.is_minimized() {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }

    /// Instance extensions needed to create a surface for this window.
    pub fn required_extensions(&self) -> Result<Vec<*const c_char>> {
        let display = self
            .window
            .display_handle()
            .map_err(|e| Error::Window(format!("Failed to get display handle: {e}")))?;
        required_extensions(display.as_raw())
    }

    /// Creates a surface for this window, owned by the returned [`Surface`].
    ///
    /// `instance` must outlive the surface.
    pub fn create_surface(&self, instance: &Instance) -> Result<Surface> {
        let display = self
            .window
            .display_handle()
            .map_err(|e| Error::Window(format!("Failed to get display handle: {e}")))?;
        let handle = self
            .window
            .window_handle()
            .map_err(|e| Error::Window(format!("Failed to get window handle: {e}")))?;

        // SAFETY: both handles come from a live winit window, and ownership of
        // the new surface moves straight into `Surface`, which destroys it.
        let raw = unsafe {
            ash_window::create_surface(
                instance.entry(),
                instance.handle(),
                display.as_raw(),
                handle.as_raw(),
                None,
            )
        }
        .map_err(|e| Error::Vulkan(format!("Failed to create surface: {e}")))?;

        info!("Vulkan surface created");
        Ok(Surface::from_raw(instance, raw))
    }
}

/// Instance extensions needed to create a surface on `display`.
pub fn required_extensions(
    display: raw_window_handle::RawDisplayHandle,
) -> Result<Vec<*const c_char>> {
    let extensions = ash_window::enumerate_required_extensions(display)
        .map_err(|e| Error::Vulkan(format!("Failed to enumerate surface extensions: {e}")))?;

    debug!(
        "Surface extensions: {:?}",
        extensions
            .iter()
            // SAFETY: ash-window returns pointers to static NUL-terminated names.
            .map(|&ext| unsafe { CStr::from_ptr(ext) })
            .collect::<Vec<_>>()
    );

    Ok(extensions.to_vec())
}
