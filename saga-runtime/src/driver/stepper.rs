//! Saga stepper: advances saga programs one suspension point at a time.
//!
//! [`Stepper::advance`] takes the step a program yielded, registers one task
//! handle per job command and wires the handle's completion (or, for a batch,
//! a [`JoinBarrier`] over all of them) to the program's resumption. The
//! resumption runs inside the engine's completion callback and immediately
//! advances the program again.
//!
//! New submissions are never handed to the engine from here. They are queued
//! in an outbox that the dispatcher flushes once the engine returns from
//! pumping, so a continuation never re-enters the engine.

use bytes::Bytes;
use saga_core::{
    Completion, HandleRegistry, JobCommand, JoinBarrier, SagaContinuation, SagaError, SagaId,
    SagaProgram, SagaStatus, Step, TaskId,
};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::rc::{Rc, Weak};

/// A saga program shared between the stepper and its pending continuations.
pub type SharedProgram = Rc<RefCell<SagaProgram>>;

/// A registered job waiting to be handed to the engine.
#[derive(Debug, Clone)]
pub struct Submission {
    pub id: TaskId,
    /// The saga that yielded the job, if any.
    pub saga: Option<SagaId>,
    pub command: JobCommand,
}

struct StepperState {
    registry: HandleRegistry,
    outbox: RefCell<VecDeque<Submission>>,
    active: RefCell<BTreeMap<SagaId, SharedProgram>>,
    finished: RefCell<BTreeMap<SagaId, SagaStatus>>,
    next_saga: Cell<u64>,
}

/// Drives saga programs against a shared [`HandleRegistry`].
///
/// Clones share the same registry, outbox and program set. A program is
/// dropped as soon as it finishes; only its final [`SagaStatus`] is kept,
/// until [`take_finished`](Self::take_finished) collects it.
#[derive(Clone)]
pub struct Stepper {
    shared: Rc<StepperState>,
}

impl Default for Stepper {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Stepper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stepper")
            .field("pending", &self.shared.registry.len())
            .field("queued", &self.shared.outbox.borrow().len())
            .field("active", &self.shared.active.borrow().len())
            .field("finished", &self.shared.finished.borrow().len())
            .finish()
    }
}

impl Stepper {
    pub fn new() -> Self {
        Self {
            shared: Rc::new(StepperState {
                registry: HandleRegistry::new(),
                outbox: RefCell::new(VecDeque::new()),
                active: RefCell::new(BTreeMap::new()),
                finished: RefCell::new(BTreeMap::new()),
                next_saga: Cell::new(1),
            }),
        }
    }

    pub fn registry(&self) -> &HandleRegistry {
        &self.shared.registry
    }

    fn next_saga_id(&self) -> SagaId {
        let id = SagaId::new(self.shared.next_saga.get());
        self.shared.next_saga.set(id.get() + 1);
        id
    }

    /// Track a new saga program. Nothing is submitted until it is advanced.
    pub fn spawn(&self, continuation: SagaContinuation) -> SharedProgram {
        let program = SagaProgram::new(self.next_saga_id(), continuation);
        self.track(program)
    }

    /// Build a saga program by applying `factory` to `input`, then track it.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::Program`] if the factory fails. The saga is not
    /// tracked in that case.
    pub fn spawn_with<I, F>(&self, factory: F, input: I) -> Result<SharedProgram, SagaError>
    where
        F: FnOnce(I) -> anyhow::Result<SagaContinuation>,
    {
        let id = self.next_saga_id();
        let continuation =
            factory(input).map_err(|source| SagaError::Program { saga: id, source })?;
        Ok(self.track(SagaProgram::new(id, continuation)))
    }

    fn track(&self, program: SagaProgram) -> SharedProgram {
        let id = program.id();
        tracing::debug!(saga_id = %id, "Saga registered");
        let program = Rc::new(RefCell::new(program));
        if program.borrow().is_finished() {
            self.shared
                .finished
                .borrow_mut()
                .insert(id, program.borrow().status());
        } else {
            self.shared
                .active
                .borrow_mut()
                .insert(id, Rc::clone(&program));
        }
        program
    }

    fn retire(&self, program: &SharedProgram) {
        let (id, status) = {
            let program = program.borrow();
            (program.id(), program.status())
        };
        self.shared.active.borrow_mut().remove(&id);
        self.shared.finished.borrow_mut().insert(id, status);
    }

    /// Register a job and queue it for submission.
    ///
    /// Returns the completion the job's result will be delivered into.
    pub fn add_task(&self, command: JobCommand) -> Completion {
        self.queue(None, command)
    }

    fn queue(&self, saga: Option<SagaId>, command: JobCommand) -> Completion {
        let (id, completion) = self
            .shared
            .registry
            .register(command.name(), command.payload().clone());
        tracing::debug!(task_id = %id, job = %command.name(), "Task queued");
        self.shared
            .outbox
            .borrow_mut()
            .push_back(Submission { id, saga, command });
        completion
    }

    /// Advance `program` past its current suspension point.
    ///
    /// A program that is not suspended (already awaiting, or finished) is
    /// left untouched and nothing is submitted.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::MalformedStep`] if the yielded step contains a
    /// job command no engine can route. The program is abandoned and none of
    /// the step's commands are submitted.
    pub fn advance(&self, program: &SharedProgram) -> Result<(), SagaError> {
        let (id, step) = {
            let mut program = program.borrow_mut();
            let id = program.id();
            match program.take_step() {
                Some(step) => (id, step),
                None => {
                    tracing::trace!(saga_id = %id, "Saga not suspended");
                    return Ok(());
                }
            }
        };

        match step {
            Step::Call { command, next } => {
                if let Err(reason) = command.validate() {
                    return Err(self.reject(program, reason));
                }
                tracing::debug!(saga_id = %id, job = %command.name(), "Saga suspended on job");

                let completion = self.queue(Some(id), command);
                let state = Rc::downgrade(&self.shared);
                let program = Rc::clone(program);
                completion.on_resolve(move |result: Bytes| {
                    Self::resume(&state, &program, next(result));
                });
            }
            Step::Batch { batch, join } => {
                for command in batch.commands() {
                    if let Err(reason) = command.validate() {
                        return Err(self.reject(program, reason));
                    }
                }
                tracing::debug!(saga_id = %id, jobs = batch.len(), "Saga suspended on batch");

                let completions: Vec<Completion> = batch
                    .into_commands()
                    .into_iter()
                    .map(|command| self.queue(Some(id), command))
                    .collect();
                let state = Rc::downgrade(&self.shared);
                let program = Rc::clone(program);
                JoinBarrier::new(&completions).then(move |results: Vec<Bytes>| {
                    Self::resume(&state, &program, join(results));
                });
            }
        }
        Ok(())
    }

    fn resume(
        state: &Weak<StepperState>,
        program: &SharedProgram,
        outcome: anyhow::Result<SagaContinuation>,
    ) {
        let Some(shared) = state.upgrade() else {
            return;
        };
        let stepper = Stepper { shared };

        let id = program.borrow().id();
        let failure = program.borrow_mut().settle(outcome);
        if let Some(error) = failure {
            tracing::error!(saga_id = %id, error = %error, "Saga abandoned");
            stepper.retire(program);
            return;
        }

        let status = program.borrow().status();
        match status {
            SagaStatus::Completed(result) => {
                tracing::info!(saga_id = %id, result_len = result.len(), "Saga completed");
                stepper.retire(program);
            }
            _ => {
                tracing::debug!(saga_id = %id, "Saga resumed");
                // A malformed step is already logged and recorded on the program.
                let _ = stepper.advance(program);
            }
        }
    }

    fn reject(&self, program: &SharedProgram, reason: String) -> SagaError {
        let id = program.borrow().id();
        tracing::error!(saga_id = %id, reason = %reason, "Saga yielded a malformed step");
        program.borrow_mut().abandon(SagaError::MalformedStep {
            saga: id,
            reason: reason.clone(),
        });
        self.retire(program);
        SagaError::MalformedStep { saga: id, reason }
    }

    /// Take every queued submission, oldest first.
    pub fn drain_outbox(&self) -> Vec<Submission> {
        let queued: Vec<Submission> = self.shared.outbox.borrow_mut().drain(..).collect();
        if !queued.is_empty() {
            tracing::trace!(count = queued.len(), "Outbox drained");
        }
        queued
    }

    /// Put drained but unsent submissions back at the front of the outbox,
    /// keeping their order.
    pub fn requeue<I>(&self, unsent: I)
    where
        I: IntoIterator<Item = Submission>,
        I::IntoIter: DoubleEndedIterator,
    {
        let mut outbox = self.shared.outbox.borrow_mut();
        for submission in unsent.into_iter().rev() {
            outbox.push_front(submission);
        }
    }

    /// Handle a submission the engine refused.
    ///
    /// The handle is withdrawn from the registry. If a saga yielded the job,
    /// it is abandoned with [`SagaError::Rejected`] and its other queued jobs
    /// are withdrawn as well; jobs it already submitted complete normally.
    pub fn reject_submission(&self, submission: &Submission, reason: &str) {
        self.shared.registry.withdraw(submission.id);
        let Some(saga) = submission.saga else {
            tracing::warn!(task_id = %submission.id, reason, "Task rejected by engine");
            return;
        };

        let withdrawn: Vec<TaskId> = {
            let mut outbox = self.shared.outbox.borrow_mut();
            let mut withdrawn = Vec::new();
            outbox.retain(|queued| {
                let keep = queued.saga != Some(saga);
                if !keep {
                    withdrawn.push(queued.id);
                }
                keep
            });
            withdrawn
        };
        for id in &withdrawn {
            self.shared.registry.withdraw(*id);
        }

        let program = self.shared.active.borrow().get(&saga).cloned();
        if let Some(program) = program {
            program.borrow_mut().abandon(SagaError::Rejected {
                saga,
                task: submission.id,
                reason: reason.to_string(),
            });
            self.retire(&program);
        }
        tracing::error!(
            saga_id = %saga,
            task_id = %submission.id,
            withdrawn = withdrawn.len(),
            reason,
            "Saga abandoned after engine rejected a task"
        );
    }

    /// Programs that have not finished yet, by id.
    pub fn programs(&self) -> Vec<SharedProgram> {
        self.shared.active.borrow().values().cloned().collect()
    }

    /// Current status of every saga not yet collected by
    /// [`take_finished`](Self::take_finished).
    pub fn statuses(&self) -> BTreeMap<SagaId, SagaStatus> {
        let mut statuses = self.shared.finished.borrow().clone();
        for (id, program) in self.shared.active.borrow().iter() {
            statuses.insert(*id, program.borrow().status());
        }
        statuses
    }

    /// Remove and return the final status of every finished saga.
    pub fn take_finished(&self) -> BTreeMap<SagaId, SagaStatus> {
        std::mem::take(&mut *self.shared.finished.borrow_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use saga_core::Batch;
    use saga_core::saga;

    fn resolve_all(stepper: &Stepper, result: impl Fn(&JobCommand) -> Bytes) -> usize {
        let queued = stepper.drain_outbox();
        for submission in &queued {
            stepper
                .registry()
                .resolve(submission.id, result(&submission.command));
        }
        queued.len()
    }

    #[test]
    fn test_add_task_registers_and_queues() {
        let stepper = Stepper::new();
        let completion = stepper.add_task(JobCommand::new("double", "3"));

        assert_eq!(stepper.registry().len(), 1);
        let queued = stepper.drain_outbox();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].command.name(), "double");
        assert!(stepper.drain_outbox().is_empty());

        stepper.registry().resolve(queued[0].id, Bytes::from_static(b"6"));
        assert_eq!(completion.value(), Some(Bytes::from_static(b"6")));
    }

    #[test]
    fn test_single_step_resumes_with_result() {
        let stepper = Stepper::new();
        let program = stepper.spawn(saga::call("double", "3", |result| Ok(saga::done(result))));
        stepper.advance(&program).unwrap();

        assert_eq!(resolve_all(&stepper, |_| Bytes::from_static(b"6")), 1);
        assert!(matches!(program.borrow().status(), SagaStatus::Completed(ref v) if v == "6"));
        assert!(stepper.registry().is_empty());
    }

    #[test]
    fn test_batch_waits_for_every_member() {
        let stepper = Stepper::new();
        let batch = Batch::build([("inc", "1"), ("dec", "1")]).unwrap();
        let program = stepper.spawn(saga::batch(batch, |results| {
            Ok(saga::done(results.join(&b","[..])))
        }));
        stepper.advance(&program).unwrap();

        let queued = stepper.drain_outbox();
        assert_eq!(queued.len(), 2);

        // Resolve out of submission order.
        stepper.registry().resolve(queued[1].id, Bytes::from_static(b"0"));
        assert!(matches!(program.borrow().status(), SagaStatus::Awaiting));
        stepper.registry().resolve(queued[0].id, Bytes::from_static(b"2"));

        assert!(matches!(program.borrow().status(), SagaStatus::Completed(ref v) if v == "2,0"));
    }

    #[test]
    fn test_resumption_advances_to_next_step() {
        let stepper = Stepper::new();
        let program = stepper.spawn(saga::call("first", "", |_| {
            Ok(saga::call("second", "", |result| Ok(saga::done(result))))
        }));
        stepper.advance(&program).unwrap();

        resolve_all(&stepper, |_| Bytes::new());
        let queued = stepper.drain_outbox();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].command.name(), "second");
        assert!(matches!(program.borrow().status(), SagaStatus::Awaiting));
    }

    #[test]
    fn test_advance_finished_program_is_noop() {
        let stepper = Stepper::new();
        let program = stepper.spawn(saga::done("early"));

        stepper.advance(&program).unwrap();
        stepper.advance(&program).unwrap();
        assert!(stepper.drain_outbox().is_empty());
        assert!(stepper.registry().is_empty());
    }

    #[test]
    fn test_advance_awaiting_program_is_noop() {
        let stepper = Stepper::new();
        let program = stepper.spawn(saga::call("double", "3", |r| Ok(saga::done(r))));

        stepper.advance(&program).unwrap();
        stepper.advance(&program).unwrap();
        assert_eq!(stepper.drain_outbox().len(), 1);
    }

    #[test]
    fn test_malformed_batch_submits_nothing() {
        let stepper = Stepper::new();
        let batch = Batch::build([("inc", "1"), ("", "1")]).unwrap();
        let program = stepper.spawn(saga::batch(batch, |r| Ok(saga::done(r.concat()))));

        let error = stepper.advance(&program).unwrap_err();
        assert!(matches!(error, SagaError::MalformedStep { .. }));
        assert!(stepper.drain_outbox().is_empty());
        assert!(stepper.registry().is_empty());
        assert!(matches!(program.borrow().status(), SagaStatus::Failed(_)));
    }

    #[test]
    fn test_failed_resumption_abandons_saga() {
        let stepper = Stepper::new();
        let program = stepper.spawn(saga::call("double", "3", |_| {
            Err(anyhow::anyhow!("unexpected result"))
        }));
        stepper.advance(&program).unwrap();

        resolve_all(&stepper, |_| Bytes::new());
        let status = program.borrow().status();
        assert!(matches!(status, SagaStatus::Failed(ref e) if matches!(**e, SagaError::Program { .. })));
    }

    #[test]
    fn test_spawn_with_factory() {
        let stepper = Stepper::new();
        let program = stepper
            .spawn_with(|n: u32| Ok(saga::call("double", n.to_string(), |r| Ok(saga::done(r)))), 3)
            .unwrap();
        stepper.advance(&program).unwrap();
        assert_eq!(stepper.drain_outbox()[0].command.payload(), "3");

        let failed = stepper.spawn_with(|_: u32| Err(anyhow::anyhow!("no input")), 0);
        assert!(matches!(failed, Err(SagaError::Program { .. })));
        assert_eq!(stepper.statuses().len(), 1);
    }

    #[test]
    fn test_saga_ids_are_sequential() {
        let stepper = Stepper::new();
        let a = stepper.spawn(saga::done(""));
        let b = stepper.spawn(saga::call("inc", "1", |r| Ok(saga::done(r))));
        assert_eq!(a.borrow().id(), SagaId::new(1));
        assert_eq!(b.borrow().id(), SagaId::new(2));
        assert_eq!(stepper.programs().len(), 1);
        assert_eq!(stepper.statuses().len(), 2);
    }

    #[test]
    fn test_finished_programs_are_dropped() {
        let stepper = Stepper::new();
        let program = stepper.spawn(saga::call("double", "3", |r| Ok(saga::done(r))));
        stepper.advance(&program).unwrap();
        let weak = Rc::downgrade(&program);
        drop(program);

        resolve_all(&stepper, |_| Bytes::from_static(b"6"));
        assert!(weak.upgrade().is_none());
        assert!(stepper.programs().is_empty());

        let finished = stepper.take_finished();
        assert!(matches!(finished.get(&SagaId::new(1)), Some(SagaStatus::Completed(v)) if v == "6"));
        assert!(stepper.statuses().is_empty());
        assert!(stepper.take_finished().is_empty());
    }

    #[test]
    fn test_rejected_submission_withdraws_saga_jobs() {
        let stepper = Stepper::new();
        let other = stepper.spawn(saga::call("inc", "5", |r| Ok(saga::done(r))));
        let batch = Batch::build([("square", "1"), ("inc", "1")]).unwrap();
        let program = stepper.spawn(saga::batch(batch, |r| Ok(saga::done(r.concat()))));
        stepper.advance(&other).unwrap();
        stepper.advance(&program).unwrap();

        let mut queued = stepper.drain_outbox().into_iter();
        let first = queued.next().unwrap();
        let rejected = queued.next().unwrap();
        assert_eq!(rejected.command.name(), "square");
        stepper.requeue(queued);
        stepper.reject_submission(&rejected, "unknown job");

        assert!(stepper.drain_outbox().is_empty());
        assert_eq!(stepper.registry().len(), 1);
        assert!(stepper.registry().contains(first.id));
        assert!(matches!(
            program.borrow().status(),
            SagaStatus::Failed(ref e) if matches!(**e, SagaError::Rejected { ref reason, .. } if reason == "unknown job")
        ));
        assert!(matches!(other.borrow().status(), SagaStatus::Awaiting));
    }

    #[test]
    fn test_requeue_keeps_order() {
        let stepper = Stepper::new();
        for name in ["a", "b", "c"] {
            stepper.add_task(JobCommand::new(name, ""));
        }
        let queued = stepper.drain_outbox();
        stepper.add_task(JobCommand::new("d", ""));
        stepper.requeue(queued.into_iter().skip(1));

        let names: Vec<String> = stepper
            .drain_outbox()
            .into_iter()
            .map(|s| s.command.name().to_string())
            .collect();
        assert_eq!(names, vec!["b", "c", "d"]);
    }
}
