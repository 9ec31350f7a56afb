//! Core building blocks for driving saga programs over an external job engine.
//!
//! - [`saga`]: saga programs as chains of suspension points
//! - [`batch`]: fan-out/fan-in groups of job commands
//! - [`registry`]: bookkeeping for submitted, not yet completed jobs
//! - [`completion`]: single-assignment result slots and the all-of join
//!
//! Everything here is single-threaded by construction; the runtime crate
//! drives it from the thread that pumps the job engine.

pub mod batch;
pub mod codec;
pub mod command;
pub mod completion;
pub mod error;
pub mod handle;
pub mod primitives;
pub mod registry;
pub mod saga;
pub mod typed;

pub use batch::Batch;
pub use command::JobCommand;
pub use completion::{Completion, JoinBarrier};
pub use error::SagaError;
pub use handle::TaskHandle;
pub use primitives::{SagaId, TaskId};
pub use registry::HandleRegistry;
pub use saga::{SagaContinuation, SagaProgram, SagaStatus, Step};
pub use typed::TypedSaga;
