//! Single-assignment completion slots and the all-of join barrier.
//!
//! Both types are single-threaded (`Rc`/`RefCell`): every resolution and
//! every continuation runs on the thread that drives the job engine.
//!
//! Continuations are always invoked after internal borrows are released, so
//! a continuation may register new completions or resolve other ones.

use bytes::Bytes;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

type Continuation = Box<dyn FnOnce(Bytes)>;

enum SlotState {
    Pending(Vec<Continuation>),
    Resolved(Bytes),
}

/// A cell that is resolved at most once with a job result.
///
/// Clones share the same slot. Continuations registered with
/// [`on_resolve`](Self::on_resolve) run in registration order when the slot
/// resolves, or immediately if it already has.
#[derive(Clone)]
pub struct Completion {
    inner: Rc<RefCell<SlotState>>,
}

impl Default for Completion {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.inner.borrow() {
            SlotState::Pending(continuations) => f
                .debug_struct("Completion")
                .field("pending_continuations", &continuations.len())
                .finish(),
            SlotState::Resolved(value) => f
                .debug_struct("Completion")
                .field("resolved", value)
                .finish(),
        }
    }
}

impl Completion {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(SlotState::Pending(Vec::new()))),
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(&*self.inner.borrow(), SlotState::Resolved(_))
    }

    pub fn value(&self) -> Option<Bytes> {
        match &*self.inner.borrow() {
            SlotState::Resolved(value) => Some(value.clone()),
            SlotState::Pending(_) => None,
        }
    }

    /// Resolve the slot and run its continuations.
    ///
    /// Returns `false` without running anything if the slot was already resolved.
    pub fn resolve(&self, value: Bytes) -> bool {
        let continuations = {
            let mut state = self.inner.borrow_mut();
            let continuations = match &mut *state {
                SlotState::Resolved(_) => return false,
                SlotState::Pending(continuations) => std::mem::take(continuations),
            };
            *state = SlotState::Resolved(value.clone());
            continuations
        };

        for continuation in continuations {
            continuation(value.clone());
        }
        true
    }

    /// Register a continuation for the resolved value.
    pub fn on_resolve<F>(&self, continuation: F)
    where
        F: FnOnce(Bytes) + 'static,
    {
        let ready = {
            let mut state = self.inner.borrow_mut();
            match &mut *state {
                SlotState::Pending(continuations) => {
                    continuations.push(Box::new(continuation));
                    return;
                }
                SlotState::Resolved(value) => value.clone(),
            }
        };
        continuation(ready);
    }
}

struct JoinState {
    remaining: usize,
    results: Vec<Option<Bytes>>,
    on_complete: Option<Box<dyn FnOnce(Vec<Bytes>)>>,
}

impl JoinState {
    fn take_ready(&mut self) -> Option<(Box<dyn FnOnce(Vec<Bytes>)>, Vec<Bytes>)> {
        if self.remaining > 0 {
            return None;
        }
        let on_complete = self.on_complete.take()?;
        let results = std::mem::take(&mut self.results)
            .into_iter()
            .flatten()
            .collect();
        Some((on_complete, results))
    }
}

/// Counter-based all-of join over a fixed set of completions.
///
/// The joint continuation fires once, after the last member resolves. Its
/// input mirrors the order the completions were given in, not the order in
/// which they resolved.
#[derive(Clone)]
pub struct JoinBarrier {
    state: Rc<RefCell<JoinState>>,
}

impl fmt::Debug for JoinBarrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("JoinBarrier")
            .field("remaining", &state.remaining)
            .field("members", &state.results.len())
            .finish()
    }
}

impl JoinBarrier {
    /// Arm a barrier over `completions`.
    pub fn new(completions: &[Completion]) -> Self {
        let barrier = Self {
            state: Rc::new(RefCell::new(JoinState {
                remaining: completions.len(),
                results: vec![None; completions.len()],
                on_complete: None,
            })),
        };

        for (index, completion) in completions.iter().enumerate() {
            let state = Rc::clone(&barrier.state);
            completion.on_resolve(move |value| {
                let ready = {
                    let mut state = state.borrow_mut();
                    if state.results[index].is_none() {
                        state.results[index] = Some(value);
                        state.remaining -= 1;
                    }
                    state.take_ready()
                };
                if let Some((on_complete, results)) = ready {
                    on_complete(results);
                }
            });
        }

        barrier
    }

    /// Set the joint continuation. Runs immediately if every member has
    /// already resolved.
    pub fn then<F>(&self, on_complete: F)
    where
        F: FnOnce(Vec<Bytes>) + 'static,
    {
        let ready = {
            let mut state = self.state.borrow_mut();
            state.on_complete = Some(Box::new(on_complete));
            state.take_ready()
        };
        if let Some((on_complete, results)) = ready {
            on_complete(results);
        }
    }

    pub fn remaining(&self) -> usize {
        self.state.borrow().remaining
    }

    pub fn is_complete(&self) -> bool {
        self.remaining() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_resolve_once() {
        let completion = Completion::new();
        let calls = Rc::new(Cell::new(0));

        let counter = Rc::clone(&calls);
        completion.on_resolve(move |value| {
            assert_eq!(value, Bytes::from_static(b"6"));
            counter.set(counter.get() + 1);
        });

        assert!(completion.resolve(Bytes::from_static(b"6")));
        assert!(!completion.resolve(Bytes::from_static(b"7")));
        assert_eq!(calls.get(), 1);
        assert_eq!(completion.value(), Some(Bytes::from_static(b"6")));
    }

    #[test]
    fn test_on_resolve_after_resolution_runs_immediately() {
        let completion = Completion::new();
        completion.resolve(Bytes::from_static(b"done"));

        let seen = Rc::new(RefCell::new(None));
        let sink = Rc::clone(&seen);
        completion.on_resolve(move |value| *sink.borrow_mut() = Some(value));

        assert_eq!(*seen.borrow(), Some(Bytes::from_static(b"done")));
    }

    #[test]
    fn test_continuation_can_resolve_another_completion() {
        let first = Completion::new();
        let second = Completion::new();

        let chained = second.clone();
        first.on_resolve(move |value| {
            chained.resolve(value);
        });

        first.resolve(Bytes::from_static(b"x"));
        assert!(second.is_resolved());
    }

    #[test]
    fn test_join_preserves_submission_order() {
        let completions: Vec<Completion> = (0..3).map(|_| Completion::new()).collect();
        let barrier = JoinBarrier::new(&completions);

        let joined = Rc::new(RefCell::new(None));
        let sink = Rc::clone(&joined);
        barrier.then(move |values| *sink.borrow_mut() = Some(values));

        completions[2].resolve(Bytes::from_static(b"c"));
        completions[0].resolve(Bytes::from_static(b"a"));
        assert!(joined.borrow().is_none());
        assert_eq!(barrier.remaining(), 1);

        completions[1].resolve(Bytes::from_static(b"b"));
        assert!(barrier.is_complete());
        assert_eq!(
            joined.borrow().clone().unwrap(),
            vec![
                Bytes::from_static(b"a"),
                Bytes::from_static(b"b"),
                Bytes::from_static(b"c"),
            ]
        );
    }

    #[test]
    fn test_join_fires_once() {
        let completions = vec![Completion::new()];
        let barrier = JoinBarrier::new(&completions);
        let calls = Rc::new(Cell::new(0));

        let counter = Rc::clone(&calls);
        barrier.then(move |_| counter.set(counter.get() + 1));

        completions[0].resolve(Bytes::from_static(b"1"));
        completions[0].resolve(Bytes::from_static(b"2"));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_join_over_resolved_members() {
        let done = Completion::new();
        done.resolve(Bytes::from_static(b"ready"));

        let barrier = JoinBarrier::new(std::slice::from_ref(&done));
        assert!(barrier.is_complete());

        let joined = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&joined);
        barrier.then(move |values| *sink.borrow_mut() = values);
        assert_eq!(*joined.borrow(), vec![Bytes::from_static(b"ready")]);
    }

    #[test]
    fn test_empty_join_is_complete() {
        let barrier = JoinBarrier::new(&[]);
        let fired = Rc::new(Cell::new(false));
        let flag = Rc::clone(&fired);
        barrier.then(move |values| {
            assert!(values.is_empty());
            flag.set(true);
        });
        assert!(fired.get());
    }
}
