//! Logging and tracing initialization for binary consumers.
//!
//! The library itself only emits through `log` and `tracing`; whoever
//! embeds the engines calls [`init_logging`] once at startup to get
//! both streams onto stderr.

use tracing_subscriber::EnvFilter;

/// Installs the global tracing subscriber (filtered via `RUST_LOG`,
/// defaulting to `info`) and bridges `log` macro output into it.
///
/// Safe to call more than once; only the first call installs anything.
pub fn init_logging() {
    let _ = tracing_log::LogTracer::init();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
