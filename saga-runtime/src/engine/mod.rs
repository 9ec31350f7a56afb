//! Job-execution engine port.
//!
//! The driver never executes jobs itself. It hands `(job name, payload,
//! token)` submissions to a [`JobEngine`] and learns about results through a
//! single completion callback that the engine invokes while pumping.
//!
//! # Implementations
//!
//! - [`InMemoryEngine`]: deterministic, single-threaded reference engine
//!   with synchronous job handlers. Useful for tests.
//! - [`WorkerPoolEngine`]: runs async job handlers on an owned tokio
//!   runtime, bounded by a concurrency limit.
//!
//! # Implementing Custom Engines
//!
//! An adapter for a networked job server (Gearman, a queue with reply
//! topics, ...) implements the three operations:
//!
//! ```rust,ignore
//! impl JobEngine for QueueEngine {
//!     fn submit(&mut self, job_name: &str, payload: Bytes, token: TaskId) -> Result<(), EngineError> {
//!         // publish, remembering `token` as the correlation id
//!     }
//!     fn set_completion_callback(&mut self, callback: CompletionCallback) {
//!         self.callback = Some(callback);
//!     }
//!     fn pump_once(&mut self) -> Result<(), EngineError> {
//!         // block for at least one reply, invoke the callback per reply
//!     }
//! }
//! ```

mod in_memory;
mod worker_pool;

pub use in_memory::{DeliveryOrder, InMemoryEngine};
pub use worker_pool::{WorkerPoolEngine, WorkerPoolEngineBuilder};

use bytes::Bytes;
use saga_core::TaskId;

/// Error type for engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// No handler is known for the submitted job name.
    #[error("Unknown job: {0}")]
    UnknownJob(String),
    /// The completion source went away while work was outstanding.
    #[error("Engine disconnected: {0}")]
    Disconnected(String),
    /// Engine-specific failure.
    #[error("Engine error: {0}")]
    Runtime(String),
}

/// What the completion callback reports back to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    /// The token was outstanding and is now resolved.
    Success,
    /// The token was unknown (late or duplicate delivery). Not an error.
    Ignored,
}

/// Callback invoked by the engine for every completed submission, in
/// arrival order.
pub type CompletionCallback = Box<dyn FnMut(TaskId, Bytes) -> CompletionStatus>;

/// A client for an external job-execution engine.
///
/// All three operations are called from the driving thread. The completion
/// callback is only ever invoked from inside [`pump_once`](Self::pump_once).
pub trait JobEngine {
    /// Fire-and-forget submission. The result arrives later through the
    /// completion callback, tagged with `token`.
    ///
    /// # Errors
    ///
    /// Returns `EngineError` if the engine cannot accept the submission.
    fn submit(
        &mut self,
        job_name: &str,
        payload: Bytes,
        token: TaskId,
    ) -> Result<(), EngineError>;

    /// Register the completion callback. Called once, before any submission.
    fn set_completion_callback(&mut self, callback: CompletionCallback);

    /// Block until at least one outstanding submission completes, invoking
    /// the callback for each completion, and return once nothing is
    /// immediately actionable.
    ///
    /// Returns immediately when nothing is outstanding.
    ///
    /// # Errors
    ///
    /// Returns `EngineError` if completions can no longer be received.
    fn pump_once(&mut self) -> Result<(), EngineError>;
}
