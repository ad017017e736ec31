//! Core utilities shared by the vkframe crates.
//!
//! This crate provides:
//! - The application-level error type and result alias
//! - Logging initialization
//! - Renderer configuration loaded from TOML

pub mod config;
mod error;
mod logging;

pub use config::RendererConfig;
pub use error::{Error, Result};
pub use logging::init_logging;
