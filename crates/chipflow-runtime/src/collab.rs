//! Contracts for the collaborators the pipelines drive.
//!
//! All calls are synchronous; the pipelines run them on the blocking pool or inside
//! `WorkerPool` tasks.

use chipflow_core::features::LabeledMatrix;
use chipflow_core::types::{ChipKey, Detection, TimeSeriesRecord};

use crate::config::TrainingParams;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Profile {
    /// Surface reflectance observations.
    Ard,
    /// Auxiliary covariates and training labels.
    Aux,
}

impl Profile {
    pub fn name(self) -> &'static str {
        match self {
            Profile::Ard => "ard",
            Profile::Aux => "aux",
        }
    }
}

/// Time-series retrieval. An empty result is valid; callers decide what it means.
pub trait TimeSeriesSource: Send + Sync + 'static {
    fn fetch(
        &self,
        chip: ChipKey,
        acquired: &str,
        profile: Profile,
    ) -> anyhow::Result<Vec<TimeSeriesRecord>>;
}

/// Change detection over one pixel. Must be deterministic for a given input.
pub trait Detector: Send + Sync + 'static {
    fn detect(&self, series: &TimeSeriesRecord) -> anyhow::Result<Detection>;
}

pub trait ModelArtifact: Send + Sync {
    fn serialize(&self) -> anyhow::Result<Vec<u8>>;
}

pub trait Trainer: Send + Sync + 'static {
    fn fit(
        &self,
        train: &LabeledMatrix,
        test: &LabeledMatrix,
        params: &TrainingParams,
    ) -> anyhow::Result<Box<dyn ModelArtifact>>;
}
