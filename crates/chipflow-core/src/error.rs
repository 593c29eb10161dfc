use thiserror::Error;

/// Failure taxonomy shared by the segment and tile workflows.
///
/// Every variant maps onto an HTTP status: client faults are 400, everything else is 500.
/// `Persistence` failures are safe to retry because every write is preceded by a partition purge.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("{0}")]
    InvalidRequest(String),
    #[error("no input data")]
    NoInputData,
    #[error("upstream data error: {0}")]
    UpstreamData(String),
    #[error("compute error: {0}")]
    Compute(String),
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl PipelineError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn upstream(err: impl std::fmt::Display) -> Self {
        Self::UpstreamData(err.to_string())
    }

    pub fn compute(err: impl std::fmt::Display) -> Self {
        Self::Compute(err.to_string())
    }

    pub fn persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn status(&self) -> u16 {
        match self {
            PipelineError::InvalidRequest(_) => 400,
            PipelineError::NoInputData
            | PipelineError::UpstreamData(_)
            | PipelineError::Compute(_)
            | PipelineError::Persistence(_) => 500,
        }
    }

    /// Short label used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::InvalidRequest(_) => "invalid_request",
            PipelineError::NoInputData | PipelineError::UpstreamData(_) => "upstream_data",
            PipelineError::Compute(_) => "compute",
            PipelineError::Persistence(_) => "persistence",
        }
    }
}
