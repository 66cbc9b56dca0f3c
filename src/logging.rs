//! Logging configuration using tracing
//!
//! Structured logging to stderr, filtered through RUST_LOG.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the tracing subscriber
///
/// `default_level` applies when RUST_LOG is unset. The CLI passes "warn"
/// normally and "info" with `--verbose`, so export/migrate progress lines
/// become visible.
///
/// # Example RUST_LOG values
/// - `RUST_LOG=deskport=debug` - Request-level detail for every connector call
/// - `RUST_LOG=deskport::migrate=info,deskport::http=debug`
///
/// # Errors
/// Returns an error if the subscriber has already been initialized
pub fn init(default_level: &str) -> crate::Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr),
        )
        .try_init()
        .map_err(|e| {
            crate::DeskportError::Other(format!("Failed to initialize tracing: {}", e))
        })?;

    Ok(())
}

/// Initialize logging for tests (no-op if already initialized)
pub fn init_test() {
    let _ = init("debug");
}
