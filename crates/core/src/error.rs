//! Error types for the application layer.

use thiserror::Error;

/// Application-level error type.
///
/// Lower layers carry their own error enums (`RhiError`, `RenderError`);
/// this one covers the failures that only the application sees.
#[derive(Error, Debug)]
pub enum Error {
    /// Vulkan-related errors surfaced outside the RHI
    #[error("Vulkan error: {0}")]
    Vulkan(String),

    /// Window creation or surface errors
    #[error("Window error: {0}")]
    Window(String),

    /// Configuration file could not be parsed or failed validation
    #[error("Config error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using the application's Error type.
pub type Result<T> = std::result::Result<T, Error>;
