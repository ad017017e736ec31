//! Renderer configuration.
//!
//! Configuration is read from an optional TOML file. Every field has a
//! default, so an empty file (or no file at all) yields a usable setup.
//!
//! ```toml
//! validation = false
//! msaa_samples = 4
//! clear_color = [0.1, 0.1, 1.0, 1.0]
//!
//! [window]
//! width = 1600
//! height = 900
//!
//! [shadow]
//! map_size = 4096
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Top-level renderer configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RendererConfig {
    /// Initial window setup.
    pub window: WindowConfig,
    /// Enable the Khronos validation layer when it is installed.
    pub validation: bool,
    /// Requested MSAA sample count for the main pass.
    ///
    /// `None` selects the highest count the device supports; `Some(1)`
    /// disables multisampling.
    pub msaa_samples: Option<u32>,
    /// Clear color of the main pass (RGBA).
    pub clear_color: [f32; 4],
    /// Shadow pass parameters.
    pub shadow: ShadowConfig,
    /// Maximum descriptor sets per frame slot in the global pool.
    pub descriptor_pool_max_sets: u32,
    /// Directory holding compiled SPIR-V shaders.
    pub shader_dir: PathBuf,
}

/// Window parameters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

/// Offscreen shadow pass parameters.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShadowConfig {
    /// Edge length of the square shadow map in texels.
    pub map_size: u32,
    /// Constant depth bias applied while rendering the shadow map.
    pub depth_bias_constant: f32,
    /// Slope-scaled depth bias applied while rendering the shadow map.
    pub depth_bias_slope: f32,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            window: WindowConfig::default(),
            validation: cfg!(debug_assertions),
            msaa_samples: None,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            shadow: ShadowConfig::default(),
            descriptor_pool_max_sets: 50,
            shader_dir: PathBuf::from("shaders"),
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            title: "vkframe".to_string(),
        }
    }
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            map_size: 2048,
            depth_bias_constant: 1.25,
            depth_bias_slope: 1.75,
        }
    }
}

impl RendererConfig {
    /// Parses and validates a configuration from TOML text.
    pub fn parse(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read and [`Error::Config`]
    /// if it does not parse or fails [`RendererConfig::validate`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::parse(&text)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Loads `path` if it exists, otherwise falls back to the defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            debug!("No configuration at {}, using defaults", path.display());
            let config = Self::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Checks values that would otherwise fail deep inside Vulkan.
    pub fn validate(&self) -> Result<()> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(Error::Config(format!(
                "window size must be non-zero, got {}x{}",
                self.window.width, self.window.height
            )));
        }

        if let Some(samples) = self.msaa_samples
            && (samples == 0 || samples > 64 || !samples.is_power_of_two())
        {
            return Err(Error::Config(format!(
                "msaa_samples must be a power of two between 1 and 64, got {samples}"
            )));
        }

        if self.shadow.map_size == 0 {
            return Err(Error::Config("shadow.map_size must be non-zero".into()));
        }

        if self.descriptor_pool_max_sets == 0 {
            return Err(Error::Config(
                "descriptor_pool_max_sets must be non-zero".into(),
            ));
        }

        Ok(())
    }
}
