//! Uniform response bodies for both workflows.
//!
//! Request fields are echoed back unchanged, including when they were missing or invalid; the
//! error text is added under `msg` (segment) or `exception` (tile).

use chipflow_core::error::PipelineError;
use serde::{Deserialize, Serialize};

use crate::detect::SegmentRequest;
use crate::stage::StageFailure;
use crate::tile::TileRequest;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentResponse {
    #[serde(skip)]
    pub status: u16,
    pub cx: Option<i64>,
    pub cy: Option<i64>,
    pub acquired: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

impl SegmentResponse {
    pub fn shape(request: &SegmentRequest, outcome: Result<(), &PipelineError>) -> Self {
        let (status, msg) = match outcome {
            Ok(()) => (200, None),
            Err(e) => (e.status(), Some(e.to_string())),
        };
        Self {
            status,
            cx: request.cx,
            cy: request.cy,
            acquired: request.acquired.clone(),
            msg,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileResponse {
    #[serde(skip)]
    pub status: u16,
    pub tx: Option<i64>,
    pub ty: Option<i64>,
    pub date: Option<String>,
    pub chips: Option<Vec<[i64; 2]>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,
}

impl TileResponse {
    pub fn shape(request: &TileRequest, outcome: Result<(), &StageFailure>) -> Self {
        let (status, exception) = match outcome {
            Ok(()) => (200, None),
            Err(f) => (f.status(), Some(f.to_string())),
        };
        Self {
            status,
            tx: request.tx,
            ty: request.ty,
            date: request.date.clone(),
            chips: request.chips.clone(),
            exception,
        }
    }
}
