//! In-memory implementation of JobEngine.
//!
//! Jobs are plain synchronous closures executed when the engine is pumped.
//! Useful for testing and as a reference implementation.

use super::{CompletionCallback, CompletionStatus, EngineError, JobEngine};
use bytes::Bytes;
use saga_core::TaskId;
use saga_core::codec::{Codec, sealed};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

type JobFn = Box<dyn Fn(Bytes) -> Bytes>;

/// Order in which one pump delivers the completions it produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryOrder {
    /// Completions arrive in submission order.
    #[default]
    Fifo,
    /// Completions arrive in reverse submission order.
    Lifo,
}

struct Queued {
    token: TaskId,
    job_name: String,
    payload: Bytes,
}

/// Deterministic engine that executes every queued submission on each pump.
///
/// # Example
///
/// ```rust
/// use bytes::Bytes;
/// use saga_runtime::engine::{InMemoryEngine, JobEngine};
///
/// let mut engine = InMemoryEngine::new()
///     .register_raw("echo", |payload| payload);
/// assert!(engine.submit("missing", Bytes::new(), saga_core::TaskId::new(1)).is_err());
/// ```
pub struct InMemoryEngine {
    jobs: HashMap<String, JobFn>,
    queue: VecDeque<Queued>,
    injected: Vec<(TaskId, Bytes)>,
    callback: Option<CompletionCallback>,
    delivery_order: DeliveryOrder,
    duplicate_delivery: bool,
    submissions: Vec<(TaskId, String)>,
    deliveries: Vec<(TaskId, CompletionStatus)>,
}

impl Default for InMemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InMemoryEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryEngine")
            .field("jobs", &self.jobs.keys().collect::<Vec<_>>())
            .field("queued", &self.queue.len())
            .field("delivery_order", &self.delivery_order)
            .field("duplicate_delivery", &self.duplicate_delivery)
            .finish()
    }
}

impl InMemoryEngine {
    /// Create an engine with no jobs registered.
    pub fn new() -> Self {
        Self {
            jobs: HashMap::new(),
            queue: VecDeque::new(),
            injected: Vec::new(),
            callback: None,
            delivery_order: DeliveryOrder::default(),
            duplicate_delivery: false,
            submissions: Vec::new(),
            deliveries: Vec::new(),
        }
    }

    /// Register a job operating on raw bytes.
    #[must_use]
    pub fn register_raw<F>(mut self, job_name: &str, job: F) -> Self
    where
        F: Fn(Bytes) -> Bytes + 'static,
    {
        self.jobs.insert(job_name.to_string(), Box::new(job));
        self
    }

    /// Register a typed job; payloads and results go through `codec`.
    ///
    /// A job that fails (including decode/encode failures) completes with
    /// its error message as the result bytes.
    ///
    /// ```rust,ignore
    /// let engine = InMemoryEngine::new()
    ///     .register_fn("double", codec.clone(), |i: u32| Ok(i * 2));
    /// ```
    #[must_use]
    pub fn register_fn<I, O, F, C>(self, job_name: &str, codec: Arc<C>, job: F) -> Self
    where
        F: Fn(I) -> anyhow::Result<O> + 'static,
        C: Codec + sealed::DecodeValue<I> + sealed::EncodeValue<O>,
    {
        let name = job_name.to_string();
        self.register_raw(job_name, move |payload| {
            let outcome = codec
                .decode::<I>(payload)
                .and_then(&job)
                .and_then(|output| codec.encode(&output));
            match outcome {
                Ok(result) => result,
                Err(e) => {
                    tracing::warn!(job = %name, error = %e, "Job failed");
                    Bytes::from(e.to_string())
                }
            }
        })
    }

    /// Set the order in which each pump delivers its completions.
    #[must_use]
    pub fn with_delivery_order(mut self, order: DeliveryOrder) -> Self {
        self.delivery_order = order;
        self
    }

    /// Deliver every completion twice, as a misbehaving engine might.
    #[must_use]
    pub fn with_duplicate_delivery(mut self, duplicate: bool) -> Self {
        self.duplicate_delivery = duplicate;
        self
    }

    /// Queue a completion for `token` that was never submitted here.
    /// It is delivered after the regular completions of the next pump.
    pub fn inject_completion(&mut self, token: TaskId, result: impl Into<Bytes>) {
        self.injected.push((token, result.into()));
    }

    /// Every submission accepted so far, in submission order.
    pub fn submissions(&self) -> &[(TaskId, String)] {
        &self.submissions
    }

    /// Every callback invocation so far with the status it returned.
    pub fn deliveries(&self) -> &[(TaskId, CompletionStatus)] {
        &self.deliveries
    }

    /// Submissions not yet executed.
    pub fn outstanding(&self) -> usize {
        self.queue.len()
    }
}

impl JobEngine for InMemoryEngine {
    fn submit(
        &mut self,
        job_name: &str,
        payload: Bytes,
        token: TaskId,
    ) -> Result<(), EngineError> {
        if !self.jobs.contains_key(job_name) {
            return Err(EngineError::UnknownJob(job_name.to_string()));
        }
        self.submissions.push((token, job_name.to_string()));
        self.queue.push_back(Queued {
            token,
            job_name: job_name.to_string(),
            payload,
        });
        Ok(())
    }

    fn set_completion_callback(&mut self, callback: CompletionCallback) {
        self.callback = Some(callback);
    }

    fn pump_once(&mut self) -> Result<(), EngineError> {
        let Some(callback) = self.callback.as_mut() else {
            return Err(EngineError::Runtime(
                "No completion callback registered".to_string(),
            ));
        };

        let mut queued: Vec<Queued> = self.queue.drain(..).collect();
        if self.delivery_order == DeliveryOrder::Lifo {
            queued.reverse();
        }

        let mut completed = Vec::with_capacity(queued.len() + self.injected.len());
        for item in queued {
            let Some(job) = self.jobs.get(&item.job_name) else {
                continue;
            };
            tracing::debug!(task_id = %item.token, job = %item.job_name, "Executing job");
            completed.push((item.token, job(item.payload)));
        }
        completed.append(&mut self.injected);

        for (token, result) in completed {
            let repeats = if self.duplicate_delivery { 2 } else { 1 };
            for _ in 0..repeats {
                let status = callback(token, result.clone());
                self.deliveries.push((token, status));
            }
        }
        Ok(())
    }
}
