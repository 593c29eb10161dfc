#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, info_span, Instrument};

use chipflow_observe::logging::init_tracing;
use chipflow_runtime::baseline::{PriorTrainer, StableDetector};
use chipflow_runtime::config::{PipelineConfig, TrainingConfig};
use chipflow_runtime::detect::DetectionPipeline;
use chipflow_runtime::tile::TrainingPipeline;
use chipflow_server::source::HttpSeriesSource;
use chipflow_server::{emit_metrics_snapshot, router, AppState};
use chipflow_store::{MemoryStore, PersistenceGateway};

#[derive(Debug, Parser)]
#[command(
    name = "chipflow-server",
    about = "HTTP front end for chip change detection and tile model training"
)]
struct Args {
    /// Address to bind the HTTP server to (host:port).
    #[arg(long, env = "CHIPFLOW_BIND", default_value = "127.0.0.1:8080")]
    bind: String,

    /// Retrieval service for surface reflectance series.
    #[arg(long, env = "CHIPFLOW_ARD_URL", default_value = "http://127.0.0.1:5656")]
    ard_url: String,

    /// Retrieval service for auxiliary covariates and labels.
    #[arg(long, env = "CHIPFLOW_AUX_URL", default_value = "http://127.0.0.1:5656")]
    aux_url: String,

    #[arg(long, env = "CHIPFLOW_RETRIEVAL_TIMEOUT_SECS", default_value_t = 120)]
    retrieval_timeout_secs: u64,

    /// Worker count for per-request fan-out.
    #[arg(long, env = "CHIPFLOW_CPUS_PER_WORKER", default_value_t = 4)]
    cpus_per_worker: usize,

    /// Pixels processed per segment request when the request omits `n`.
    #[arg(long, env = "CHIPFLOW_PIXEL_LIMIT", default_value_t = 10_000)]
    pixel_limit: usize,

    #[arg(long, env = "CHIPFLOW_AUX_ACQUIRED", default_value = "1982/2018")]
    aux_acquired: String,

    /// Fraction of training rows held out for evaluation.
    #[arg(long, env = "CHIPFLOW_TEST_SIZE", default_value_t = 0.2)]
    test_size: f64,

    #[arg(long, env = "CHIPFLOW_NUM_ROUND", default_value_t = 500)]
    num_round: u32,

    #[arg(long, env = "CHIPFLOW_EARLY_STOPPING_ROUNDS", default_value_t = 10)]
    early_stopping_rounds: u32,

    #[arg(long, env = "CHIPFLOW_VERBOSE_EVAL", default_value_t = false)]
    verbose_eval: bool,

    #[arg(long, env = "CHIPFLOW_MAX_DEPTH", default_value_t = 8)]
    max_depth: u32,

    /// Class-balanced sample size; unset keeps every row.
    #[arg(long, env = "CHIPFLOW_SAMPLE_SIZE")]
    sample_size: Option<usize>,

    /// Fixed seed for shuffling and splitting.
    #[arg(long, env = "CHIPFLOW_SEED")]
    seed: Option<u64>,

    /// Optional: periodically emit a metrics snapshot to logs.
    #[arg(long, env = "CHIPFLOW_METRICS_SNAPSHOT_INTERVAL_MS", default_value_t = 0)]
    metrics_snapshot_interval_ms: u64,
}

impl Args {
    fn pipeline_config(&self) -> Result<PipelineConfig> {
        anyhow::ensure!(
            self.test_size > 0.0 && self.test_size < 1.0,
            "test size must be in (0, 1), got {}",
            self.test_size
        );
        let mut training = TrainingConfig {
            test_size: self.test_size,
            num_round: self.num_round,
            early_stopping_rounds: self.early_stopping_rounds,
            verbose_eval: self.verbose_eval,
            sample_size: self.sample_size,
            seed: self.seed,
            ..TrainingConfig::default()
        };
        training
            .parameters
            .insert("max_depth".to_string(), serde_json::Value::from(self.max_depth));
        Ok(PipelineConfig {
            cpus_per_worker: self.cpus_per_worker.max(1),
            default_pixel_limit: self.pixel_limit.max(1),
            aux_acquired: self.aux_acquired.clone(),
            training,
        })
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let config = Arc::new(args.pipeline_config()?);

    // The blocking HTTP clients have to exist before the async runtime does.
    let timeout = Duration::from_secs(args.retrieval_timeout_secs.max(1));
    let ard = Arc::new(HttpSeriesSource::new(&args.ard_url, timeout)?);
    let aux = Arc::new(HttpSeriesSource::new(&args.aux_url, timeout)?);
    let store = PersistenceGateway::new(Arc::new(MemoryStore::new()));

    let state = AppState {
        detection: DetectionPipeline::new(
            config.clone(),
            ard,
            Arc::new(StableDetector),
            store.clone(),
        ),
        training: TrainingPipeline::new(config.clone(), aux, Arc::new(PriorTrainer), store),
    };

    let addr: SocketAddr = args
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", args.bind))?;
    let span = info_span!(
        "chipflow-server",
        addr = %addr,
        ard_url = %args.ard_url,
        aux_url = %args.aux_url
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;
    runtime.block_on(
        async move {
            if args.metrics_snapshot_interval_ms > 0 {
                let snapshot_state = state.clone();
                let interval_ms = args.metrics_snapshot_interval_ms;
                tokio::spawn(async move {
                    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
                    loop {
                        ticker.tick().await;
                        emit_metrics_snapshot(&snapshot_state);
                    }
                });
            }

            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("failed to bind {addr}"))?;
            info!(
                cpus_per_worker = config.cpus_per_worker,
                pixel_limit = config.default_pixel_limit,
                "listening"
            );
            axum::serve(listener, router(state))
                .await
                .context("server shutdown")
        }
        .instrument(span),
    )
}
