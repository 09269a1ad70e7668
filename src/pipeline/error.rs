use crate::transport::TransportError;
use chrono::NaiveDate;

/// Fatal pipeline errors. Anything that reaches the runner as one of these
/// moves the run to `Failed`.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Publish failed after {sent}/{total} messages (day {day}): {source}")]
    Publish {
        sent: usize,
        total: usize,
        day: NaiveDate,
        #[source]
        source: TransportError,
    },

    #[error("No readings after {cycles} consecutive collection windows")]
    NoData { cycles: u32 },

    #[error("Runner already failed")]
    AlreadyFailed,
}

impl PipelineError {
    /// Messages confirmed sent before a publish failure
    pub fn sent_before_failure(&self) -> Option<usize> {
        match self {
            PipelineError::Publish { sent, .. } => Some(*sent),
            _ => None,
        }
    }
}
