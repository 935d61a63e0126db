//! Logging setup for processes embedding the engine.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Target the engine logs tool output lines under.
pub const TOOL_LOG_TARGET: &str = "diskport::tool";

/// Install a stderr subscriber for the importer process.
///
/// `RUST_LOG` wins over `default_filter`. Installing twice is a no-op, so
/// hosts that already configured tracing keep their subscriber.
pub fn init_tracing(default_filter: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    register_to_tracing(env_filter);
}

fn register_to_tracing(env_filter: EnvFilter) {
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .with_ansi(false),
        )
        .try_init();
}
