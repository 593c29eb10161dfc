#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

pub mod baseline;
pub mod collab;
pub mod config;
pub mod detect;
pub mod pool;
pub mod response;
pub mod sample;
pub mod stage;
pub mod tile;

use chipflow_core::error::PipelineError;

/// Runs a synchronous collaborator call on tokio's blocking pool.
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T, PipelineError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| PipelineError::compute(format!("blocking task failed: {e}")))
}
