//! Log setup shared by the chipflow binaries.
//!
//! Segment events are keyed by `cx`/`cy`/`acquired` and tile events by `tx`/`ty`/`date`, so one
//! partition's history can be grepped out of a mixed log. Phase and stage timings are emitted on
//! the `chipflow_metrics` target; `CHIPFLOW_LOG=warn,chipflow_metrics=info` keeps the timings
//! and drops the per-request chatter.

use tracing_subscriber::EnvFilter;

/// Installs a `fmt` subscriber filtered by [`env_filter`]. Call once, before any request work.
pub fn init_tracing() {
    tracing_subscriber::fmt().with_env_filter(env_filter()).init();
}

/// `CHIPFLOW_LOG` wins over `RUST_LOG`; with neither set (or neither parseable) the level is `info`.
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env("CHIPFLOW_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
