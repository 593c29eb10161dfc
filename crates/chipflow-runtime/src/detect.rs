use std::future::Future;
use std::sync::Arc;

use chipflow_core::error::PipelineError;
use chipflow_core::types::{ChangeModelRecord, ChipKey, TimeSeriesRecord};
use chipflow_observe::metrics::{Counter, DurationAgg};
use chipflow_observe::time::Stopwatch;
use chipflow_store::PersistenceGateway;
use serde::{Deserialize, Serialize};

use crate::collab::{Detector, Profile, TimeSeriesSource};
use crate::config::PipelineConfig;
use crate::pool::{PoolMetrics, WorkerPool};
use crate::response::SegmentResponse;
use crate::run_blocking;

/// Body of a segment request. Every field is optional on the wire so that a partial request
/// can still be echoed back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentRequest {
    pub cx: Option<i64>,
    pub cy: Option<i64>,
    pub acquired: Option<String>,
    /// Cap on the number of pixels processed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Retrieve,
    Purge,
    Detect,
    Persist,
}

impl Phase {
    pub fn name(self) -> &'static str {
        match self {
            Phase::Retrieve => "retrieve",
            Phase::Purge => "purge",
            Phase::Detect => "detect",
            Phase::Persist => "persist",
        }
    }
}

#[derive(Debug, Default)]
pub struct DetectionMetrics {
    pub requests_total: Counter,
    pub requests_failed_total: Counter,
    pub pixels_total: Counter,
    pub records_total: Counter,
    pub retrieve: DurationAgg,
    pub purge: DurationAgg,
    pub detect: DurationAgg,
    pub persist: DurationAgg,
    pub pool: Arc<PoolMetrics>,
}

impl DetectionMetrics {
    fn phase(&self, phase: Phase) -> &DurationAgg {
        match phase {
            Phase::Retrieve => &self.retrieve,
            Phase::Purge => &self.purge,
            Phase::Detect => &self.detect,
            Phase::Persist => &self.persist,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectionSummary {
    pub pixels: usize,
    pub records: usize,
}

/// Segment workflow: retrieve, purge, detect, persist.
#[derive(Clone)]
pub struct DetectionPipeline {
    config: Arc<PipelineConfig>,
    source: Arc<dyn TimeSeriesSource>,
    detector: Arc<dyn Detector>,
    store: PersistenceGateway,
    metrics: Arc<DetectionMetrics>,
}

struct Target {
    chip: ChipKey,
    acquired: String,
    limit: usize,
}

impl DetectionPipeline {
    pub fn new(
        config: Arc<PipelineConfig>,
        source: Arc<dyn TimeSeriesSource>,
        detector: Arc<dyn Detector>,
        store: PersistenceGateway,
    ) -> Self {
        Self {
            config,
            source,
            detector,
            store,
            metrics: Arc::new(DetectionMetrics::default()),
        }
    }

    pub fn metrics(&self) -> Arc<DetectionMetrics> {
        self.metrics.clone()
    }

    pub async fn run(&self, request: SegmentRequest) -> SegmentResponse {
        self.metrics.requests_total.inc();
        match self.execute(&request).await {
            Ok(summary) => {
                tracing::info!(
                    cx = request.cx,
                    cy = request.cy,
                    acquired = request.acquired.as_deref(),
                    pixels = summary.pixels,
                    records = summary.records,
                    "segment request complete"
                );
                SegmentResponse::shape(&request, Ok(()))
            }
            Err(err) => {
                self.metrics.requests_failed_total.inc();
                SegmentResponse::shape(&request, Err(&err))
            }
        }
    }

    pub async fn execute(&self, request: &SegmentRequest) -> Result<DetectionSummary, PipelineError> {
        let target = self.validate(request)?;
        let chip = target.chip;

        let source = self.source.clone();
        let acquired = target.acquired.clone();
        let limit = target.limit;
        let series = self
            .phase(&target, Phase::Retrieve, async move {
                let mut series = run_blocking(move || {
                    source
                        .fetch(chip, &acquired, Profile::Ard)
                        .map_err(|e| PipelineError::upstream(format!("{e:#}")))
                })
                .await??;
                if series.is_empty() {
                    return Err(PipelineError::NoInputData);
                }
                // `n = 0` still purges the chip and then writes nothing.
                series.truncate(limit);
                Ok(series)
            })
            .await?;
        let pixels = series.len();
        self.metrics.pixels_total.inc_by(pixels as u64);

        let store = self.store.clone();
        self.phase(&target, Phase::Purge, async move {
            run_blocking(move || store.purge_chip(chip).map_err(PipelineError::persistence)).await?
        })
        .await?;

        let pool = WorkerPool::with_metrics(self.config.cpus_per_worker, self.metrics.pool.clone());
        let detector = self.detector.clone();
        let records = self
            .phase(&target, Phase::Detect, async move {
                let nested = pool
                    .run(series, move |s: TimeSeriesRecord| detect_pixel(detector.as_ref(), &s))
                    .await?;
                Ok(nested.into_iter().flatten().collect::<Vec<_>>())
            })
            .await?;
        let count = records.len();

        let store = self.store.clone();
        self.phase(&target, Phase::Persist, async move {
            run_blocking(move || {
                store
                    .save_detections(&records)
                    .map_err(PipelineError::persistence)
            })
            .await?
        })
        .await?;
        self.metrics.records_total.inc_by(count as u64);

        Ok(DetectionSummary {
            pixels,
            records: count,
        })
    }

    fn validate(&self, request: &SegmentRequest) -> Result<Target, PipelineError> {
        match (request.cx, request.cy, request.acquired.as_deref()) {
            (Some(cx), Some(cy), Some(acquired)) if !acquired.trim().is_empty() => Ok(Target {
                chip: ChipKey::new(cx, cy),
                acquired: acquired.to_string(),
                limit: request.n.unwrap_or(self.config.default_pixel_limit),
            }),
            _ => {
                tracing::warn!(
                    cx = request.cx,
                    cy = request.cy,
                    acquired = request.acquired.as_deref(),
                    error_kind = "invalid_request",
                    "rejecting segment request"
                );
                Err(PipelineError::invalid(
                    "cx, cy, and acquired are required parameters",
                ))
            }
        }
    }

    async fn phase<T, Fut>(&self, target: &Target, phase: Phase, fut: Fut) -> Result<T, PipelineError>
    where
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        let sw = Stopwatch::start();
        let out = fut.await;
        self.metrics.phase(phase).record(sw.elapsed());
        match &out {
            Ok(_) => tracing::info!(
                target: "chipflow_metrics",
                cx = target.chip.cx,
                cy = target.chip.cy,
                acquired = %target.acquired,
                phase = phase.name(),
                elapsed_seconds = sw.elapsed_seconds(),
                "{}_elapsed_seconds",
                phase.name()
            ),
            Err(PipelineError::NoInputData) => tracing::warn!(
                cx = target.chip.cx,
                cy = target.chip.cy,
                acquired = %target.acquired,
                phase = phase.name(),
                elapsed_seconds = sw.elapsed_seconds(),
                "no input data"
            ),
            Err(err) => tracing::error!(
                cx = target.chip.cx,
                cy = target.chip.cy,
                acquired = %target.acquired,
                phase = phase.name(),
                error_kind = err.kind(),
                elapsed_seconds = sw.elapsed_seconds(),
                error = %err,
                "{}_exception",
                phase.name()
            ),
        }
        out
    }
}

fn detect_pixel(
    detector: &dyn Detector,
    series: &TimeSeriesRecord,
) -> Result<Vec<ChangeModelRecord>, PipelineError> {
    let px = series.px;
    let py = series.py;
    let detection = detector
        .detect(series)
        .map_err(|e| PipelineError::compute(format!("detection failed at pixel {px},{py}: {e:#}")))?;
    ChangeModelRecord::expand(series, detection)
        .map_err(|e| PipelineError::compute(format!("pixel {px},{py}: {e}")))
}
