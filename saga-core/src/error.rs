//! Error types for saga-core.

use crate::primitives::{SagaId, TaskId};

/// Unified error type for saga construction and stepping.
#[derive(Debug, thiserror::Error)]
pub enum SagaError {
    /// A batch was built from an empty sequence of job commands.
    #[error("Batch must contain at least one job command")]
    InvalidBatch,
    /// A saga yielded a step that cannot be submitted to a job engine.
    /// The saga is abandoned and nothing from the step is submitted.
    #[error("Saga {saga} yielded a malformed step: {reason}")]
    MalformedStep {
        /// The offending saga.
        saga: SagaId,
        /// Why the step was rejected.
        reason: String,
    },
    /// The job engine refused one of the saga's submissions. The saga is
    /// abandoned and its unsent jobs are withdrawn.
    #[error("Saga {saga} abandoned: engine rejected {task}: {reason}")]
    Rejected {
        saga: SagaId,
        task: TaskId,
        reason: String,
    },
    /// The saga's own resumption (or its factory) returned an error.
    #[error("Saga {saga} failed: {source}")]
    Program {
        /// The failed saga.
        saga: SagaId,
        #[source]
        source: anyhow::Error,
    },
    /// Encoding a payload or decoding a result failed.
    #[error("Codec error: {0}")]
    Codec(#[source] anyhow::Error),
}
