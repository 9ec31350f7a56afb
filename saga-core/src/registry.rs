//! Task handle registry.
//!
//! The registry tracks every job that has been submitted (or queued for
//! submission) and not yet completed. Each entry pairs a [`TaskHandle`] with
//! the [`Completion`] slot its result will be delivered into.
//!
//! # Resolution
//!
//! An entry is removed the instant it resolves, before any continuation
//! runs. Continuations are therefore free to register new handles, and a
//! second delivery for the same token finds nothing and is ignored.
//!
//! ```rust
//! use bytes::Bytes;
//! use saga_core::registry::HandleRegistry;
//!
//! let registry = HandleRegistry::new();
//! let (id, completion) = registry.register("double", Bytes::from_static(b"3"));
//! assert!(!registry.is_empty());
//!
//! assert!(registry.resolve(id, Bytes::from_static(b"6")));
//! assert!(!registry.resolve(id, Bytes::from_static(b"6")));
//! assert!(registry.is_empty());
//! assert_eq!(completion.value(), Some(Bytes::from_static(b"6")));
//! ```

use crate::completion::Completion;
use crate::handle::TaskHandle;
use crate::primitives::TaskId;
use bytes::Bytes;
use chrono::Utc;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;

struct Entry {
    handle: TaskHandle,
    slot: Completion,
}

/// Registry of outstanding task handles.
///
/// Single-threaded; shared by reference between the stepper (which
/// registers) and the engine's completion callback (which resolves).
pub struct HandleRegistry {
    next_id: Cell<u64>,
    entries: RefCell<HashMap<TaskId, Entry>>,
}

impl Default for HandleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            next_id: Cell::new(1),
            entries: RefCell::new(HashMap::new()),
        }
    }

    /// Register a job and return its fresh token and unresolved slot.
    ///
    /// Tokens are never reused for the lifetime of the registry.
    pub fn register(&self, job_name: &str, payload: Bytes) -> (TaskId, Completion) {
        let id = TaskId::new(self.next_id.get());
        self.next_id.set(id.get() + 1);

        let slot = Completion::new();
        let handle = TaskHandle {
            id,
            job_name: job_name.to_string(),
            payload,
            submitted_at: Utc::now(),
        };
        self.entries.borrow_mut().insert(
            id,
            Entry {
                handle,
                slot: slot.clone(),
            },
        );
        (id, slot)
    }

    /// Resolve the entry for `id` with `result`.
    ///
    /// Returns `false` if `id` is unknown (already resolved, or never
    /// registered). That case is a no-op.
    pub fn resolve(&self, id: TaskId, result: Bytes) -> bool {
        let entry = self.entries.borrow_mut().remove(&id);
        match entry {
            Some(entry) => entry.slot.resolve(result),
            None => false,
        }
    }

    /// Remove the entry for `id` without resolving it.
    ///
    /// Used for jobs the engine never accepted. Continuations waiting on the
    /// slot never run.
    pub fn withdraw(&self, id: TaskId) -> Option<TaskHandle> {
        self.entries.borrow_mut().remove(&id).map(|entry| entry.handle)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.entries.borrow().contains_key(&id)
    }

    /// Look up the handle for an outstanding token.
    pub fn get(&self, id: TaskId) -> Option<TaskHandle> {
        self.entries.borrow().get(&id).map(|entry| entry.handle.clone())
    }

    /// Outstanding handles ordered by token.
    pub fn pending(&self) -> Vec<TaskHandle> {
        let mut handles: Vec<TaskHandle> = self
            .entries
            .borrow()
            .values()
            .map(|entry| entry.handle.clone())
            .collect();
        handles.sort_by_key(|handle| handle.id);
        handles
    }

    /// The longest-outstanding handle.
    pub fn oldest(&self) -> Option<TaskHandle> {
        self.entries
            .borrow()
            .values()
            .min_by_key(|entry| entry.handle.id)
            .map(|entry| entry.handle.clone())
    }

    /// Completion slots of every outstanding handle.
    pub fn pending_completions(&self) -> Vec<Completion> {
        self.entries
            .borrow()
            .values()
            .map(|entry| entry.slot.clone())
            .collect()
    }
}
