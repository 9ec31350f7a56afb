//! Dispatch loop pumping a job engine until no saga has outstanding work.
//!
//! The engine's blocking `pump_once` is the only suspension point. Every
//! completion it delivers resolves a task handle, which runs the saga's
//! continuation synchronously; any work those continuations submit is
//! flushed to the engine once the pump returns.
//!
//! Progress is tracked in waves: a [`JoinBarrier`] is armed over every
//! pending completion, and once all of them have resolved the wave is
//! counted and the next pump re-arms over whatever is pending by then.

use super::stepper::Stepper;
use crate::engine::{CompletionStatus, EngineError, JobEngine};
use bytes::Bytes;
use saga_core::{JoinBarrier, SagaContinuation, SagaError, SagaId, SagaStatus, TaskId};
use std::cell::Cell;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::rc::Rc;

/// Error type for the dispatch loop.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Job engine failed: {0}")]
    Engine(#[from] EngineError),
    /// Work is pending but the engine stopped delivering completions.
    #[error(
        "Dispatch stalled: {pending} task(s) pending after {idle_pumps} idle pump(s), \
         oldest waiting {oldest_wait_ms}ms"
    )]
    Stalled {
        pending: usize,
        idle_pumps: usize,
        /// The longest-outstanding task.
        oldest: Option<TaskId>,
        oldest_wait_ms: i64,
    },
}

/// Dispatcher configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct DispatcherConfig {
    /// Consecutive pumps without a resolved completion before `run` fails.
    /// `None` (the default) never gives up.
    pub max_idle_pumps: Option<NonZeroUsize>,
}

#[derive(Debug, Default)]
struct Counters {
    waves: Cell<u64>,
    pumps: Cell<u64>,
    submitted: Cell<u64>,
    completed: Cell<u64>,
    ignored: Cell<u64>,
}

fn bump(counter: &Cell<u64>) {
    counter.set(counter.get() + 1);
}

/// Outcome of [`Dispatcher::run`].
///
/// Counters are cumulative over the dispatcher's lifetime.
#[derive(Debug, Clone)]
pub struct DispatchReport {
    /// Completion waves fully resolved.
    pub waves: u64,
    /// Calls to the engine's `pump_once`.
    pub pumps: u64,
    /// Jobs handed to the engine.
    pub submitted: u64,
    /// Completions that resolved a task handle.
    pub completed: u64,
    /// Completions for unknown tokens (late or duplicate deliveries).
    pub ignored: u64,
    /// Status of every saga not yet collected by
    /// [`Dispatcher::take_finished`].
    pub sagas: BTreeMap<SagaId, SagaStatus>,
}

impl DispatchReport {
    /// Whether every saga finished with a result.
    pub fn all_completed(&self) -> bool {
        self.sagas
            .values()
            .all(|status| matches!(status, SagaStatus::Completed(_)))
    }

    /// The final result of a completed saga.
    pub fn result(&self, id: SagaId) -> Option<&Bytes> {
        match self.sagas.get(&id) {
            Some(SagaStatus::Completed(result)) => Some(result),
            _ => None,
        }
    }
}

/// Process-wide driver for saga programs over a [`JobEngine`].
///
/// # Example
///
/// ```rust
/// use bytes::Bytes;
/// use saga_core::saga;
/// use saga_runtime::driver::Dispatcher;
/// use saga_runtime::engine::InMemoryEngine;
///
/// let engine = InMemoryEngine::new().register_raw("shout", |payload: Bytes| {
///     Bytes::from(payload.to_ascii_uppercase())
/// });
/// let mut dispatcher = Dispatcher::new(engine);
/// let id = dispatcher.register_saga(saga::call("shout", "hi", |r| Ok(saga::done(r))))?;
///
/// let report = dispatcher.run()?;
/// assert_eq!(report.result(id), Some(&Bytes::from_static(b"HI")));
/// # Ok::<(), anyhow::Error>(())
/// ```
pub struct Dispatcher<E> {
    engine: E,
    stepper: Stepper,
    config: DispatcherConfig,
    counters: Rc<Counters>,
}

impl<E: JobEngine> Dispatcher<E> {
    /// Create a dispatcher and register its completion callback with `engine`.
    pub fn new(mut engine: E) -> Self {
        let stepper = Stepper::new();
        let counters = Rc::new(Counters::default());

        let callback_stepper = stepper.clone();
        let callback_counters = Rc::clone(&counters);
        engine.set_completion_callback(Box::new(move |token, result| {
            if callback_stepper.registry().resolve(token, result) {
                bump(&callback_counters.completed);
                tracing::debug!(task_id = %token, "Task resolved");
                CompletionStatus::Success
            } else {
                bump(&callback_counters.ignored);
                tracing::warn!(task_id = %token, "Ignoring completion for unknown task");
                CompletionStatus::Ignored
            }
        }));

        Self {
            engine,
            stepper,
            config: DispatcherConfig::default(),
            counters,
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    /// Fail `run` after `max` consecutive pumps that resolve nothing.
    #[must_use]
    pub fn with_max_idle_pumps(mut self, max: NonZeroUsize) -> Self {
        self.config.max_idle_pumps = Some(max);
        self
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn stepper(&self) -> &Stepper {
        &self.stepper
    }

    /// Register a ready-made saga program and advance it to its first step.
    ///
    /// The step's jobs are submitted when [`run`](Self::run) starts.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::MalformedStep`] if the first step is malformed.
    /// The saga is recorded as failed.
    pub fn register_saga(&mut self, continuation: SagaContinuation) -> Result<SagaId, SagaError> {
        let program = self.stepper.spawn(continuation);
        let id = program.borrow().id();
        self.stepper.advance(&program)?;
        Ok(id)
    }

    /// Build a saga program from `factory` and `input`, then register it.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::Program`] if the factory fails, or
    /// [`SagaError::MalformedStep`] if the first step is malformed.
    pub fn register_saga_with<I, F>(&mut self, factory: F, input: I) -> Result<SagaId, SagaError>
    where
        F: FnOnce(I) -> anyhow::Result<SagaContinuation>,
    {
        let program = self.stepper.spawn_with(factory, input)?;
        let id = program.borrow().id();
        self.stepper.advance(&program)?;
        Ok(id)
    }

    /// Hand every queued submission to the engine.
    ///
    /// On a refused submission the remaining ones go back to the outbox and
    /// the owning saga is abandoned, so the registry only ever holds jobs
    /// that are submitted or still queued.
    fn flush(&mut self) -> Result<(), DispatchError> {
        let mut queued = self.stepper.drain_outbox().into_iter();
        while let Some(submission) = queued.next() {
            let payload = submission.command.payload().clone();
            if let Err(error) = self
                .engine
                .submit(submission.command.name(), payload, submission.id)
            {
                self.stepper.requeue(queued);
                self.stepper
                    .reject_submission(&submission, &error.to_string());
                return Err(error.into());
            }
            bump(&self.counters.submitted);
            tracing::debug!(
                task_id = %submission.id,
                job = %submission.command.name(),
                "Task submitted"
            );
        }
        Ok(())
    }

    /// Pump the engine until no task handle is pending.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Engine`] if a submission or a pump fails, or
    /// [`DispatchError::Stalled`] if the idle-pump limit is reached.
    pub fn run(&mut self) -> anyhow::Result<DispatchReport> {
        self.flush()?;

        let mut wave: Option<JoinBarrier> = None;
        let mut idle_pumps = 0usize;

        while !self.stepper.registry().is_empty() {
            let barrier = wave.get_or_insert_with(|| {
                let pending = self.stepper.registry().pending_completions();
                tracing::debug!(pending = pending.len(), "Wave armed");
                JoinBarrier::new(&pending)
            });

            let completed_before = self.counters.completed.get();
            self.engine.pump_once().map_err(DispatchError::from)?;
            bump(&self.counters.pumps);

            if barrier.is_complete() {
                bump(&self.counters.waves);
                tracing::debug!(wave = self.counters.waves.get(), "Wave complete");
                wave = None;
            }
            self.flush()?;

            if self.counters.completed.get() > completed_before {
                idle_pumps = 0;
                continue;
            }
            idle_pumps += 1;
            if let Some(max) = self.config.max_idle_pumps
                && idle_pumps >= max.get()
            {
                let registry = self.stepper.registry();
                let oldest = registry.oldest();
                return Err(DispatchError::Stalled {
                    pending: registry.len(),
                    idle_pumps,
                    oldest: oldest.as_ref().map(|handle| handle.id),
                    oldest_wait_ms: oldest.map_or(0, |handle| handle.age().num_milliseconds()),
                }
                .into());
            }
        }

        let report = self.report();
        tracing::info!(
            waves = report.waves,
            pumps = report.pumps,
            submitted = report.submitted,
            sagas = report.sagas.len(),
            "Dispatch complete"
        );
        Ok(report)
    }

    /// Remove and return the final status of every finished saga.
    ///
    /// Long-lived dispatchers call this after each [`run`](Self::run) to
    /// keep saga bookkeeping bounded.
    pub fn take_finished(&mut self) -> BTreeMap<SagaId, SagaStatus> {
        self.stepper.take_finished()
    }

    /// Snapshot of the counters and saga statuses.
    pub fn report(&self) -> DispatchReport {
        DispatchReport {
            waves: self.counters.waves.get(),
            pumps: self.counters.pumps.get(),
            submitted: self.counters.submitted.get(),
            completed: self.counters.completed.get(),
            ignored: self.counters.ignored.get(),
            sagas: self.stepper.statuses(),
        }
    }
}
