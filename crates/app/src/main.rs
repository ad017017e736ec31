//! vkframe demo.
//!
//! Opens a window and renders a shadowed scene through the two-pass frame
//! renderer.
//!
//! Keys: `S` toggles the shadow pass, `Escape` quits.

mod scene;

use anyhow::{Context, Result};
use ash::vk;
use tracing::{debug, error, info};
use winit::application::ApplicationHandler;
use winit::event_loop::ControlFlow;
use winit::window::WindowId;

use vkframe_core::RendererConfig;
use vkframe_platform::{ActiveEventLoop, EventLoop, KeyCode, Keyboard, Window, WindowEvent};
use vkframe_renderer::renderer::FrameStatus;
use vkframe_renderer::{DeviceContext, FrameRenderer};
use vkframe_rhi::instance::Instance;

use crate::scene::DemoScene;

const CONFIG_PATH: &str = "vkframe.toml";

/// Everything tied to the window's lifetime.
///
/// Teardown runs in `drop`: the renderer idles the GPU and releases its
/// targets, then the scene's registry releases meshes, uniforms and
/// textures. Field order covers the rest: the scene's programs go before the
/// context that created them, and the window outlives its surface.
struct Demo {
    renderer: FrameRenderer<DeviceContext>,
    scene: DemoScene,
    context: DeviceContext,
    window: Window,
}

impl Demo {
    fn new(event_loop: &ActiveEventLoop, config: &RendererConfig) -> Result<Self> {
        let window = Window::new(event_loop, &config.window)?;
        let instance = Instance::new(config.validation, &window.required_extensions()?)?;
        let surface = window.create_surface(&instance)?;
        let extent = vk::Extent2D {
            width: window.width(),
            height: window.height(),
        };
        let context = DeviceContext::new(instance, surface, config, extent)?;

        let mut renderer = FrameRenderer::new(&context, config)?;
        let scene = match DemoScene::new(&context, &mut renderer, config, window.aspect_ratio()) {
            Ok(scene) => scene,
            Err(e) => {
                renderer.shutdown(&context);
                return Err(e);
            }
        };

        Ok(Self {
            renderer,
            scene,
            context,
            window,
        })
    }

    fn redraw(&mut self) -> Result<()> {
        self.scene.animate(&mut self.renderer);
        let scene = &self.scene;
        let status = self
            .renderer
            .render_frame(&self.context, |slot| scene.write_uniforms(slot))?;
        if let FrameStatus::Skipped = status {
            debug!("Frame skipped for swapchain recreation");
        }
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.window.resize(width, height);
        if !self.window.is_minimized() {
            self.scene.set_aspect(self.window.aspect_ratio());
        }
        self.renderer.resize(&self.context, width, height)?;
        Ok(())
    }

    fn toggle_shadows(&mut self) {
        let enabled = !self.renderer.shadows_enabled();
        self.renderer.set_shadows_enabled(enabled);
        info!("Shadows {}", if enabled { "on" } else { "off" });
    }
}

impl Drop for Demo {
    fn drop(&mut self) {
        self.renderer.shutdown(&self.context);
        self.scene.destroy(&self.context);
    }
}

struct App {
    config: RendererConfig,
    demo: Option<Demo>,
    keyboard: Keyboard,
}

impl App {
    fn new(config: RendererConfig) -> Self {
        Self {
            config,
            demo: None,
            keyboard: Keyboard::new(),
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, what: &str, e: anyhow::Error) {
        error!("{}: {:#}", what, e);
        self.demo = None;
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.demo.is_some() {
            return;
        }
        match Demo::new(event_loop, &self.config) {
            Ok(demo) => {
                info!("Initialization complete, entering main loop");
                self.demo = Some(demo);
            }
            Err(e) => self.fail(event_loop, "Failed to initialize", e),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let Some(demo) = self.demo.as_mut() else {
            return;
        };
        let result = match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                self.demo = None;
                event_loop.exit();
                return;
            }
            WindowEvent::Resized(size) => {
                info!("Window resized to {}x{}", size.width, size.height);
                demo.resize(size.width, size.height)
            }
            WindowEvent::RedrawRequested => demo.redraw(),
            WindowEvent::KeyboardInput { event, .. } => {
                self.keyboard.handle_event(&event);
                Ok(())
            }
            _ => Ok(()),
        };
        if let Err(e) = result {
            self.fail(event_loop, "Render error", e);
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.keyboard.was_pressed(KeyCode::Escape) {
            info!("Escape pressed, shutting down");
            self.demo = None;
            event_loop.exit();
        }
        if let Some(demo) = self.demo.as_mut() {
            if self.keyboard.was_pressed(KeyCode::KeyS) {
                demo.toggle_shadows();
            }
            demo.window.request_redraw();
        }
        self.keyboard.end_frame();
    }
}

fn main() -> Result<()> {
    vkframe_core::init_logging();
    info!("Starting vkframe");

    let config = RendererConfig::load_or_default(CONFIG_PATH)
        .with_context(|| format!("reading {CONFIG_PATH}"))?;

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    Ok(())
}
