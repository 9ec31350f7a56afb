//! Saga programs as explicit suspended-state objects.
//!
//! A saga is written as a chain of continuations. Each suspension point
//! yields either a single job command or a [`Batch`], together with the
//! closure that receives the result(s) and produces the next suspension:
//!
//! ```rust
//! use bytes::Bytes;
//! use saga_core::batch::Batch;
//! use saga_core::saga::{self, SagaContinuation};
//!
//! fn double_then_fan_out() -> SagaContinuation {
//!     saga::call("double", "3", |doubled: Bytes| {
//!         let batch = Batch::build([("inc", doubled.clone()), ("inc", doubled)])?;
//!         Ok(saga::batch(batch, |results: Vec<Bytes>| {
//!             Ok(saga::done(results.concat()))
//!         }))
//!     })
//! }
//! # let _ = double_then_fan_out();
//! ```
//!
//! The resumption closure's input type follows the step kind, so a single
//! step is always resumed with one value and a batch with an ordered vector.

use crate::batch::Batch;
use crate::command::JobCommand;
use crate::error::SagaError;
use crate::primitives::SagaId;
use anyhow::Result;
use bytes::Bytes;
use std::fmt;
use std::rc::Rc;

/// Resumption closure receiving the result(s) of a suspension point.
pub type Resume<T> = Box<dyn FnOnce(T) -> Result<SagaContinuation>>;

/// The state of a saga program at a suspension point.
pub enum SagaContinuation {
    /// The program finished with a final value.
    Done(Bytes),
    /// The program waits on one job.
    Call {
        command: JobCommand,
        next: Resume<Bytes>,
    },
    /// The program waits on every job of a batch.
    Batch { batch: Batch, join: Resume<Vec<Bytes>> },
}

impl fmt::Debug for SagaContinuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SagaContinuation::Done(value) => f.debug_tuple("Done").field(value).finish(),
            SagaContinuation::Call { command, .. } => {
                f.debug_struct("Call").field("command", command).finish()
            }
            SagaContinuation::Batch { batch, .. } => {
                f.debug_struct("Batch").field("batch", batch).finish()
            }
        }
    }
}

/// Finish a saga with `result`.
pub fn done(result: impl Into<Bytes>) -> SagaContinuation {
    SagaContinuation::Done(result.into())
}

/// Suspend on a single job and continue with its result.
pub fn call<F>(job_name: impl Into<String>, payload: impl Into<Bytes>, next: F) -> SagaContinuation
where
    F: FnOnce(Bytes) -> Result<SagaContinuation> + 'static,
{
    SagaContinuation::Call {
        command: JobCommand::new(job_name, payload),
        next: Box::new(next),
    }
}

/// Suspend on every job of `batch` and continue with the ordered results.
pub fn batch<F>(batch: Batch, join: F) -> SagaContinuation
where
    F: FnOnce(Vec<Bytes>) -> Result<SagaContinuation> + 'static,
{
    SagaContinuation::Batch {
        batch,
        join: Box::new(join),
    }
}

/// A suspension point taken from a program: the jobs to submit and the
/// closure that resumes the program with their results.
pub enum Step {
    Call {
        command: JobCommand,
        next: Resume<Bytes>,
    },
    Batch { batch: Batch, join: Resume<Vec<Bytes>> },
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Call { command, .. } => f.debug_struct("Call").field("command", command).finish(),
            Step::Batch { batch, .. } => f.debug_struct("Batch").field("batch", batch).finish(),
        }
    }
}

/// Externally visible lifecycle of a saga program.
#[derive(Debug, Clone)]
pub enum SagaStatus {
    /// A step has been yielded but not yet submitted.
    Suspended,
    /// The yielded step is submitted and awaiting its result(s).
    Awaiting,
    /// The program finished.
    Completed(Bytes),
    /// The program was abandoned.
    Failed(Rc<SagaError>),
}

impl SagaStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, SagaStatus::Completed(_) | SagaStatus::Failed(_))
    }
}

enum ProgramState {
    Suspended(Step),
    Awaiting,
    Completed(Bytes),
    Failed(Rc<SagaError>),
}

/// One running saga: its identity plus its current suspension state.
pub struct SagaProgram {
    id: SagaId,
    state: ProgramState,
}

impl fmt::Debug for SagaProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SagaProgram")
            .field("id", &self.id)
            .field("status", &self.status())
            .finish()
    }
}

impl ProgramState {
    fn from_continuation(continuation: SagaContinuation) -> Self {
        match continuation {
            SagaContinuation::Done(result) => ProgramState::Completed(result),
            SagaContinuation::Call { command, next } => {
                ProgramState::Suspended(Step::Call { command, next })
            }
            SagaContinuation::Batch { batch, join } => {
                ProgramState::Suspended(Step::Batch { batch, join })
            }
        }
    }
}

impl SagaProgram {
    pub fn new(id: SagaId, continuation: SagaContinuation) -> Self {
        Self {
            id,
            state: ProgramState::from_continuation(continuation),
        }
    }

    /// A program whose factory failed before yielding anything.
    pub fn failed(id: SagaId, error: SagaError) -> Self {
        Self {
            id,
            state: ProgramState::Failed(Rc::new(error)),
        }
    }

    pub fn id(&self) -> SagaId {
        self.id
    }

    pub fn status(&self) -> SagaStatus {
        match &self.state {
            ProgramState::Suspended(_) => SagaStatus::Suspended,
            ProgramState::Awaiting => SagaStatus::Awaiting,
            ProgramState::Completed(result) => SagaStatus::Completed(result.clone()),
            ProgramState::Failed(error) => SagaStatus::Failed(Rc::clone(error)),
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.state,
            ProgramState::Completed(_) | ProgramState::Failed(_)
        )
    }

    /// Take the yielded step, leaving the program awaiting its result.
    ///
    /// Returns `None` unless the program is suspended.
    pub fn take_step(&mut self) -> Option<Step> {
        if !matches!(self.state, ProgramState::Suspended(_)) {
            return None;
        }
        match std::mem::replace(&mut self.state, ProgramState::Awaiting) {
            ProgramState::Suspended(step) => Some(step),
            _ => None,
        }
    }

    /// Apply the outcome of a resumption closure.
    ///
    /// Ignored unless the program is awaiting. Returns the error if the
    /// resumption failed and the program is now abandoned.
    pub fn settle(&mut self, outcome: Result<SagaContinuation>) -> Option<Rc<SagaError>> {
        if !matches!(self.state, ProgramState::Awaiting) {
            return None;
        }
        match outcome {
            Ok(next) => {
                self.state = ProgramState::from_continuation(next);
                None
            }
            Err(source) => Some(self.abandon(SagaError::Program {
                saga: self.id,
                source,
            })),
        }
    }

    /// Abandon the program with `error`.
    pub fn abandon(&mut self, error: SagaError) -> Rc<SagaError> {
        let error = Rc::new(error);
        self.state = ProgramState::Failed(Rc::clone(&error));
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doubling_saga() -> SagaContinuation {
        call("double", "3", |result| Ok(done(result)))
    }

    #[test]
    fn test_done_program_is_finished() {
        let program = SagaProgram::new(SagaId::new(1), done("x"));
        assert!(program.is_finished());
        assert!(matches!(program.status(), SagaStatus::Completed(ref v) if v == "x"));
    }

    #[test]
    fn test_take_step_once() {
        let mut program = SagaProgram::new(SagaId::new(1), doubling_saga());
        assert!(matches!(program.status(), SagaStatus::Suspended));

        let step = program.take_step();
        assert!(matches!(step, Some(Step::Call { ref command, .. }) if command.name() == "double"));
        assert!(matches!(program.status(), SagaStatus::Awaiting));
        assert!(program.take_step().is_none());
    }

    #[test]
    fn test_settle_resumes_with_result() {
        let mut program = SagaProgram::new(SagaId::new(1), doubling_saga());
        let Some(Step::Call { next, .. }) = program.take_step() else {
            panic!("expected a single step");
        };

        assert!(program.settle(next(Bytes::from_static(b"6"))).is_none());
        assert!(matches!(program.status(), SagaStatus::Completed(ref v) if v == "6"));
    }

    #[test]
    fn test_done_resumption_leaves_no_step() {
        let mut program = SagaProgram::new(SagaId::new(2), doubling_saga());
        assert!(program.take_step().is_some());

        program.settle(Ok(done("6")));
        assert!(program.is_finished());
        assert!(program.take_step().is_none());
    }

    #[test]
    fn test_settle_ignored_when_not_awaiting() {
        let mut program = SagaProgram::new(SagaId::new(1), done("final"));
        assert!(program.settle(Ok(done("other"))).is_none());
        assert!(matches!(program.status(), SagaStatus::Completed(ref v) if v == "final"));
    }

    #[test]
    fn test_failed_resumption_abandons() {
        let mut program = SagaProgram::new(
            SagaId::new(4),
            call("double", "3", |_| Err(anyhow::anyhow!("boom"))),
        );
        let Some(Step::Call { next, .. }) = program.take_step() else {
            panic!("expected a single step");
        };

        let error = program.settle(next(Bytes::new())).unwrap();
        assert!(matches!(*error, SagaError::Program { saga, .. } if saga == SagaId::new(4)));
        assert!(program.is_finished());
        assert!(program.take_step().is_none());
    }

    #[test]
    fn test_batch_step() {
        let batch_step = batch(
            Batch::build([("inc", "6"), ("inc", "6")]).unwrap(),
            |results| Ok(done(results.concat())),
        );
        let SagaContinuation::Batch { batch, join } = batch_step else {
            panic!("expected a batch step");
        };
        assert_eq!(batch.len(), 2);

        let next = join(vec![Bytes::from_static(b"7"), Bytes::from_static(b"7")]).unwrap();
        assert!(matches!(next, SagaContinuation::Done(ref v) if v == "77"));
    }
}
