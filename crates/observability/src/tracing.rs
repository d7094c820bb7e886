//! Tracing/logging initialization.
//!
//! JSON logs with timestamps; per-module filtering via `RUST_LOG`. Worker and
//! bridge loops log with structured fields (`task_id`, `worker`), so a task's
//! whole lifecycle can be grepped out of the stream by id.

use tracing_subscriber::EnvFilter;

/// Initialize tracing/logging for the process.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}
