//! Logging setup.
//!
//! Everything goes to stderr, which after daemonizing is the log file.
//! Verbosity follows `RUST_LOG`, defaulting to `info`.

use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

const DEFAULT_DIRECTIVE: &str = "info";

pub(crate) fn init() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));

    let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_ansi(false)
        .with_timer(tracing_subscriber::fmt::time::SystemTime);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    // Keep the background logging worker alive for the duration of the process.
    let _ = LOG_GUARD.set(guard);
}
