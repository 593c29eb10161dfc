#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

mod decode;
pub mod source;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;

use chipflow_core::error::PipelineError;
use chipflow_runtime::detect::{DetectionPipeline, SegmentRequest};
use chipflow_runtime::response::{SegmentResponse, TileResponse};
use chipflow_runtime::stage::{Stage, StageFailure};
use chipflow_runtime::tile::{TileRequest, TrainingPipeline};

#[derive(Clone)]
pub struct AppState {
    pub detection: DetectionPipeline,
    pub training: TrainingPipeline,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/segment", post(segment))
        .route("/tile", post(tile))
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn segment(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> (StatusCode, Json<SegmentResponse>) {
    let (request, error) = match body {
        Ok(Json(body)) => decode::segment_request(&body),
        Err(rejection) => (SegmentRequest::default(), Some(malformed_body(&rejection))),
    };
    let resp = match error {
        None => state.detection.run(request).await,
        Some(error) => {
            reject(&error);
            SegmentResponse::shape(&request, Err(&error))
        }
    };
    (status(resp.status), Json(resp))
}

async fn tile(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> (StatusCode, Json<TileResponse>) {
    let (request, error) = match body {
        Ok(Json(body)) => decode::tile_request(&body),
        Err(rejection) => (TileRequest::default(), Some(malformed_body(&rejection))),
    };
    let resp = match error {
        None => state.training.run(request).await,
        Some(error) => {
            reject(&error);
            let failure = StageFailure {
                stage: Stage::Parameters,
                error,
            };
            TileResponse::shape(&request, Err(&failure))
        }
    };
    (status(resp.status), Json(resp))
}

fn malformed_body(rejection: &JsonRejection) -> PipelineError {
    PipelineError::invalid(format!("malformed request body: {}", rejection.body_text()))
}

fn reject(err: &PipelineError) {
    tracing::warn!(error_kind = err.kind(), error = %err, "rejecting request body");
}

fn status(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

/// Logs every pipeline counter once.
pub fn emit_metrics_snapshot(state: &AppState) {
    let d = state.detection.metrics();
    let t = state.training.metrics();
    let detect = d.detect.snapshot();
    let train = t.stage(Stage::Train).snapshot();
    tracing::info!(
        target: "chipflow_metrics",
        segment_requests_total = d.requests_total.get(),
        segment_requests_failed_total = d.requests_failed_total.get(),
        pixels_total = d.pixels_total.get(),
        records_total = d.records_total.get(),
        detect_avg_ns = detect.avg_ns(),
        detect_max_ns = detect.max_ns,
        detect_pool_inflight_high_water = d.pool.inflight_high_water.get(),
        tile_requests_total = t.requests_total.get(),
        tile_requests_failed_total = t.requests_failed_total.get(),
        training_rows_total = t.rows_total.get(),
        models_saved_total = t.models_saved_total.get(),
        train_avg_ns = train.avg_ns(),
        train_max_ns = train.max_ns,
        "metrics"
    );
}
