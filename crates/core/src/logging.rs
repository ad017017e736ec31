//! Logging initialization.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Default filter used when `RUST_LOG` is not set.
const DEFAULT_FILTER: &str = "info,vkframe=debug,vkframe_rhi=info";

/// Initialize the global tracing subscriber.
///
/// Filtering follows `RUST_LOG` when present, otherwise [`DEFAULT_FILTER`].
/// Calling this twice is harmless; the second installation is ignored.
///
/// # Example
/// ```
/// vkframe_core::init_logging();
/// tracing::info!("frame loop starting");
/// ```
pub fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .try_init();
}
