use std::collections::BTreeMap;
use std::sync::Arc;

use chipflow_core::error::PipelineError;
use chipflow_core::features::{feature_vector, AuxRecord, Dataset, FEATURE_WIDTH};
use chipflow_core::types::{ChipKey, PixelKey, TileKey, TimeSeriesRecord};
use chipflow_observe::metrics::{Counter, DurationAgg};
use chipflow_observe::time::Stopwatch;
use chipflow_store::PersistenceGateway;
use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::collab::{ModelArtifact, Profile, TimeSeriesSource, Trainer};
use crate::config::PipelineConfig;
use crate::pool::{PoolMetrics, WorkerPool};
use crate::response::TileResponse;
use crate::run_blocking;
use crate::sample::{self, LabelCounts};
use crate::stage::{run_stages, Stage};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileRequest {
    pub tx: Option<i64>,
    pub ty: Option<i64>,
    pub chips: Option<Vec<[i64; 2]>>,
    pub date: Option<String>,
}

/// Validated tile parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileParams {
    pub tile: TileKey,
    pub chips: Vec<ChipKey>,
    pub date: NaiveDate,
}

impl TileParams {
    pub fn from_request(request: &TileRequest) -> Result<Self, PipelineError> {
        let (Some(tx), Some(ty), Some(chips), Some(date)) = (
            request.tx,
            request.ty,
            request.chips.as_ref(),
            request.date.as_deref(),
        ) else {
            return Err(missing_params());
        };
        if chips.is_empty() || date.trim().is_empty() {
            return Err(missing_params());
        }
        let date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d").map_err(|e| {
            PipelineError::invalid(format!("date '{date}' is not a YYYY-MM-DD date: {e}"))
        })?;
        Ok(Self {
            tile: TileKey::new(tx, ty),
            chips: chips.iter().map(|[cx, cy]| ChipKey::new(*cx, *cy)).collect(),
            date,
        })
    }
}

fn missing_params() -> PipelineError {
    PipelineError::invalid("tx, ty, chips and date are required parameters")
}

/// State threaded through the tile stages.
pub struct TileContext {
    pub request: TileRequest,
    pub params: Option<TileParams>,
    pub data: Dataset,
    pub statistics: LabelCounts,
    pub model: Option<Box<dyn ModelArtifact>>,
    rng: StdRng,
}

impl TileContext {
    fn new(request: TileRequest, seed: Option<u64>) -> Self {
        Self {
            request,
            params: None,
            data: Dataset::new(FEATURE_WIDTH),
            statistics: LabelCounts::default(),
            model: None,
            rng: match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            },
        }
    }

    fn params(&self) -> Result<&TileParams, PipelineError> {
        self.params
            .as_ref()
            .ok_or_else(|| PipelineError::compute("tile parameters were not resolved"))
    }
}

#[derive(Debug, Default)]
pub struct TrainingMetrics {
    pub requests_total: Counter,
    pub requests_failed_total: Counter,
    pub rows_total: Counter,
    pub models_saved_total: Counter,
    pub stages: [DurationAgg; 8],
    pub pool: Arc<PoolMetrics>,
}

impl TrainingMetrics {
    pub fn stage(&self, stage: Stage) -> &DurationAgg {
        &self.stages[stage.index()]
    }
}

/// Tile workflow: gathers features for a set of chips, trains one model and stores it.
#[derive(Clone)]
pub struct TrainingPipeline {
    config: Arc<PipelineConfig>,
    source: Arc<dyn TimeSeriesSource>,
    trainer: Arc<dyn Trainer>,
    store: PersistenceGateway,
    metrics: Arc<TrainingMetrics>,
}

impl TrainingPipeline {
    pub fn new(
        config: Arc<PipelineConfig>,
        source: Arc<dyn TimeSeriesSource>,
        trainer: Arc<dyn Trainer>,
        store: PersistenceGateway,
    ) -> Self {
        Self {
            config,
            source,
            trainer,
            store,
            metrics: Arc::new(TrainingMetrics::default()),
        }
    }

    pub fn metrics(&self) -> Arc<TrainingMetrics> {
        self.metrics.clone()
    }

    pub async fn run(&self, request: TileRequest) -> TileResponse {
        self.metrics.requests_total.inc();
        let ctx = TileContext::new(request.clone(), self.config.training.seed);
        let outcome = run_stages(ctx, &Stage::ALL, move |stage, ctx| self.apply(stage, ctx)).await;
        match outcome {
            Ok(_) => TileResponse::shape(&request, Ok(())),
            Err(failure) => {
                self.metrics.requests_failed_total.inc();
                TileResponse::shape(&request, Err(&failure))
            }
        }
    }

    async fn apply(&self, stage: Stage, ctx: TileContext) -> Result<TileContext, PipelineError> {
        let sw = Stopwatch::start();
        let tx = ctx.request.tx;
        let ty = ctx.request.ty;
        let date = ctx.request.date.clone();
        let out = match stage {
            Stage::Log => self.log(ctx),
            Stage::Parameters => self.parameters(ctx),
            Stage::Data => self.data(ctx).await,
            Stage::Statistics => self.statistics(ctx),
            Stage::Randomize => self.randomize(ctx),
            Stage::Sample => self.sample(ctx),
            Stage::Train => self.train(ctx).await,
            Stage::Save => self.save(ctx).await,
        };
        self.metrics.stage(stage).record(sw.elapsed());
        match &out {
            Ok(_) => tracing::info!(
                target: "chipflow_metrics",
                tx = tx,
                ty = ty,
                date = date.as_deref(),
                stage = stage.name(),
                elapsed_seconds = sw.elapsed_seconds(),
                "stage complete"
            ),
            Err(err) => tracing::error!(
                tx = tx,
                ty = ty,
                date = date.as_deref(),
                stage = stage.name(),
                error_kind = err.kind(),
                elapsed_seconds = sw.elapsed_seconds(),
                error = %err,
                "{} exception",
                stage.name()
            ),
        }
        out
    }

    fn log(&self, ctx: TileContext) -> Result<TileContext, PipelineError> {
        tracing::info!(
            tx = ctx.request.tx,
            ty = ctx.request.ty,
            date = ctx.request.date.as_deref(),
            chips = ctx.request.chips.as_ref().map(Vec::len),
            "tile request"
        );
        Ok(ctx)
    }

    fn parameters(&self, mut ctx: TileContext) -> Result<TileContext, PipelineError> {
        ctx.params = Some(TileParams::from_request(&ctx.request)?);
        Ok(ctx)
    }

    async fn data(&self, mut ctx: TileContext) -> Result<TileContext, PipelineError> {
        let params = ctx.params()?.clone();
        let pool = WorkerPool::with_metrics(self.config.cpus_per_worker, self.metrics.pool.clone());
        let store = self.store.clone();
        let source = self.source.clone();
        let aux_acquired = self.config.aux_acquired.clone();
        let date = params.date;

        let per_chip = pool
            .run(params.chips, move |chip| {
                chip_features(&store, source.as_ref(), &aux_acquired, date, chip)
            })
            .await?;

        let mut data = Dataset::new(FEATURE_WIDTH);
        for chunk in &per_chip {
            data.append(chunk).map_err(PipelineError::compute)?;
        }
        self.metrics.rows_total.inc_by(data.len() as u64);
        tracing::debug!(
            tx = params.tile.tx,
            ty = params.tile.ty,
            rows = data.len(),
            "assembled training data"
        );
        ctx.data = data;
        Ok(ctx)
    }

    fn statistics(&self, mut ctx: TileContext) -> Result<TileContext, PipelineError> {
        ctx.statistics = LabelCounts::from_dataset(&ctx.data).map_err(PipelineError::compute)?;
        tracing::info!(
            tx = ctx.request.tx,
            ty = ctx.request.ty,
            rows = ctx.statistics.total(),
            labels = ctx.statistics.len(),
            counts = ?ctx.statistics,
            "label statistics"
        );
        Ok(ctx)
    }

    fn randomize(&self, mut ctx: TileContext) -> Result<TileContext, PipelineError> {
        ctx.data = sample::shuffle(&ctx.data, &mut ctx.rng);
        Ok(ctx)
    }

    fn sample(&self, mut ctx: TileContext) -> Result<TileContext, PipelineError> {
        let Some(target) = self.config.training.sample_size else {
            return Ok(ctx);
        };
        ctx.data = sample::balanced(&ctx.data, &ctx.statistics, target, &mut ctx.rng)
            .map_err(PipelineError::compute)?;
        Ok(ctx)
    }

    async fn train(&self, mut ctx: TileContext) -> Result<TileContext, PipelineError> {
        let (train_idx, test_idx) =
            split_indices(ctx.data.len(), self.config.training.test_size, &mut ctx.rng)?;
        let train = ctx.data.labeled(&train_idx);
        let test = ctx.data.labeled(&test_idx);
        let trainer = self.trainer.clone();
        let params = self.config.training.params();

        let model = run_blocking(move || trainer.fit(&train, &test, &params))
            .await?
            .map_err(|e| PipelineError::compute(format!("{e:#}")))?;
        ctx.model = Some(model);
        Ok(ctx)
    }

    async fn save(&self, mut ctx: TileContext) -> Result<TileContext, PipelineError> {
        let tile = ctx.params()?.tile;
        let model = ctx
            .model
            .take()
            .ok_or_else(|| PipelineError::compute("no trained model to save"))?;
        let store = self.store.clone();
        run_blocking(move || {
            let bytes = model
                .serialize()
                .map_err(|e| PipelineError::compute(format!("model serialization failed: {e:#}")))?;
            store
                .save_tile_model(tile, bytes)
                .map_err(PipelineError::persistence)
        })
        .await??;
        self.metrics.models_saved_total.inc();
        Ok(ctx)
    }
}

/// Shuffled `(train, test)` row indices; the test share is `round(rows * test_size)` clamped so
/// neither side is empty.
pub fn split_indices(
    rows: usize,
    test_size: f64,
    rng: &mut StdRng,
) -> Result<(Vec<usize>, Vec<usize>), PipelineError> {
    if rows < 2 {
        return Err(PipelineError::compute(format!(
            "training needs at least 2 rows, found {rows}"
        )));
    }
    let test = ((rows as f64 * test_size).round() as usize).clamp(1, rows - 1);
    let mut order: Vec<usize> = (0..rows).collect();
    order.shuffle(rng);
    let train = order.split_off(test);
    Ok((train, order))
}

fn chip_features(
    store: &PersistenceGateway,
    source: &dyn TimeSeriesSource,
    aux_acquired: &str,
    date: NaiveDate,
    chip: ChipKey,
) -> Result<Dataset, PipelineError> {
    let mut out = Dataset::new(FEATURE_WIDTH);
    let segments: Vec<_> = store
        .segments(chip)
        .map_err(PipelineError::persistence)?
        .into_iter()
        .filter(|s| s.spans(date))
        .collect();
    if segments.is_empty() {
        tracing::debug!(cx = chip.cx, cy = chip.cy, %date, "no segments span date");
        return Ok(out);
    }

    let aux = source
        .fetch(chip, aux_acquired, Profile::Aux)
        .map_err(|e| PipelineError::upstream(format!("aux retrieval for chip {chip} failed: {e:#}")))?;
    let by_pixel: BTreeMap<PixelKey, &TimeSeriesRecord> =
        aux.iter().map(|s| (s.pixel(), s)).collect();

    for segment in &segments {
        let pixel = segment.pixel();
        let series = by_pixel.get(&pixel).ok_or_else(|| {
            PipelineError::upstream(format!(
                "no aux record for pixel {},{} in chip {chip}",
                pixel.px, pixel.py
            ))
        })?;
        let aux = AuxRecord::from_series(series).map_err(PipelineError::upstream)?;
        let row = feature_vector(&aux, segment).map_err(PipelineError::compute)?;
        out.push_row(&row).map_err(PipelineError::compute)?;
    }
    Ok(out)
}
