use std::collections::BTreeMap;
use std::sync::Arc;

use chipflow_core::error::PipelineError;
use chipflow_observe::metrics::{Counter, Gauge};
use thiserror::Error;
use tokio::task::{JoinError, JoinSet};

#[derive(Debug, Error)]
pub enum PoolError<E> {
    #[error("{0}")]
    Task(E),
    #[error("worker panicked: {0}")]
    Panicked(String),
    #[error("worker cancelled")]
    Cancelled,
}

impl From<PoolError<PipelineError>> for PipelineError {
    fn from(err: PoolError<PipelineError>) -> Self {
        match err {
            PoolError::Task(e) => e,
            other => PipelineError::compute(other),
        }
    }
}

#[derive(Debug, Default)]
pub struct PoolMetrics {
    pub tasks_started_total: Counter,
    pub tasks_failed_total: Counter,
    pub inflight: Gauge,
    pub inflight_high_water: Gauge,
}

/// Bounded fan-out of a blocking function over a sequence.
///
/// A pool is built per request. `run` owns its `JoinSet`, so every worker it starts is either
/// joined or aborted before `run` returns. Dropping the `run` future aborts whatever has not
/// started yet; calls already running finish on their threads and their results are discarded.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    limit: usize,
    metrics: Arc<PoolMetrics>,
}

impl WorkerPool {
    pub fn new(limit: usize) -> Self {
        Self::with_metrics(limit, Arc::new(PoolMetrics::default()))
    }

    pub fn with_metrics(limit: usize, metrics: Arc<PoolMetrics>) -> Self {
        Self {
            limit: limit.max(1),
            metrics,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn metrics(&self) -> Arc<PoolMetrics> {
        self.metrics.clone()
    }

    /// Applies `f` to every item with at most `limit` calls in flight.
    ///
    /// Output order matches input order. The first failure stops scheduling, in-flight calls
    /// are drained, and that failure is returned.
    pub async fn run<I, O, E, F>(&self, items: Vec<I>, f: F) -> Result<Vec<O>, PoolError<E>>
    where
        I: Send + 'static,
        O: Send + 'static,
        E: Send + 'static,
        F: Fn(I) -> Result<O, E> + Send + Sync + 'static,
    {
        let total = items.len();
        let f = Arc::new(f);
        let mut pending = items.into_iter().enumerate();
        let mut joinset = JoinSet::new();
        let mut done: BTreeMap<usize, O> = BTreeMap::new();

        loop {
            while joinset.len() < self.limit {
                let Some((idx, item)) = pending.next() else {
                    break;
                };
                let f = f.clone();
                let slot = InflightSlot::acquire(&self.metrics);
                joinset.spawn_blocking(move || {
                    let _slot = slot;
                    (idx, f(item))
                });
            }

            let Some(res) = joinset.join_next().await else {
                break;
            };

            let failure = match res {
                Ok((idx, Ok(out))) => {
                    done.insert(idx, out);
                    continue;
                }
                Ok((_, Err(e))) => PoolError::Task(e),
                Err(err) => join_failure(err),
            };

            self.metrics.tasks_failed_total.inc();
            let draining = joinset.len();
            joinset.shutdown().await;
            tracing::debug!(
                completed = done.len(),
                drained = draining,
                total = total,
                "worker pool stopped on first failure"
            );
            return Err(failure);
        }

        debug_assert_eq!(done.len(), total);
        Ok(done.into_values().collect())
    }
}

/// One unit of the `inflight` gauge, released when the task finishes or is dropped unstarted.
struct InflightSlot(Arc<PoolMetrics>);

impl InflightSlot {
    fn acquire(metrics: &Arc<PoolMetrics>) -> Self {
        metrics.tasks_started_total.inc();
        let now = metrics.inflight.add(1);
        metrics.inflight_high_water.max(now);
        Self(metrics.clone())
    }
}

impl Drop for InflightSlot {
    fn drop(&mut self) {
        self.0.inflight.sub(1);
    }
}

fn join_failure<E>(err: JoinError) -> PoolError<E> {
    if !err.is_panic() {
        return PoolError::Cancelled;
    }
    let payload = err.into_panic();
    let msg = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    PoolError::Panicked(msg)
}
