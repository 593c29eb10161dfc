use std::fmt;
use std::future::Future;

use chipflow_core::error::PipelineError;
use thiserror::Error;

/// Tile workflow stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Log,
    Parameters,
    Data,
    Statistics,
    Randomize,
    Sample,
    Train,
    Save,
}

impl Stage {
    pub const ALL: [Stage; 8] = [
        Stage::Log,
        Stage::Parameters,
        Stage::Data,
        Stage::Statistics,
        Stage::Randomize,
        Stage::Sample,
        Stage::Train,
        Stage::Save,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Log => "log",
            Stage::Parameters => "parameters",
            Stage::Data => "data",
            Stage::Statistics => "statistics",
            Stage::Randomize => "randomize",
            Stage::Sample => "sample",
            Stage::Train => "train",
            Stage::Save => "save",
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The first stage that failed and why.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{stage} exception: {error}")]
pub struct StageFailure {
    pub stage: Stage,
    pub error: PipelineError,
}

impl StageFailure {
    pub fn status(&self) -> u16 {
        self.error.status()
    }
}

/// Threads `ctx` through `stages` in order.
///
/// Stops at the first error; later stages never see the context.
pub async fn run_stages<C, F, Fut>(
    mut ctx: C,
    stages: &[Stage],
    mut apply: F,
) -> Result<C, StageFailure>
where
    F: FnMut(Stage, C) -> Fut,
    Fut: Future<Output = Result<C, PipelineError>>,
{
    for &stage in stages {
        ctx = apply(stage, ctx)
            .await
            .map_err(|error| StageFailure { stage, error })?;
    }
    Ok(ctx)
}
