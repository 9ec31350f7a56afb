//! Worker-pool engine running async job handlers on an owned tokio runtime.
//!
//! Submissions are spawned onto the runtime and gated by a semaphore, so at
//! most `max_concurrency` jobs execute at once. Finished jobs push their
//! result onto a channel; [`pump_once`](JobEngine::pump_once) blocks the
//! driving thread on that channel and invokes the completion callback there.
//!
//! **Note**: `pump_once` blocks the calling thread and must not be called
//! from inside an async context.

use super::{CompletionCallback, EngineError, JobEngine};
use bytes::Bytes;
use futures::FutureExt;
use futures::future::BoxFuture;
use saga_core::TaskId;
use saga_core::codec::{Codec, sealed};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tokio::sync::{Semaphore, mpsc};

type AsyncJobFn = Arc<dyn Fn(Bytes) -> BoxFuture<'static, anyhow::Result<Bytes>> + Send + Sync>;

/// Builder for [`WorkerPoolEngine`].
pub struct WorkerPoolEngineBuilder {
    jobs: HashMap<String, AsyncJobFn>,
    max_concurrency: NonZeroUsize,
    worker_threads: NonZeroUsize,
}

impl Default for WorkerPoolEngineBuilder {
    fn default() -> Self {
        Self {
            jobs: HashMap::new(),
            max_concurrency: NonZeroUsize::MIN, // Default: sequential execution
            worker_threads: NonZeroUsize::MIN,
        }
    }
}

impl WorkerPoolEngineBuilder {
    /// Register an async job operating on raw bytes.
    #[must_use]
    pub fn register_fn<F, Fut>(mut self, job_name: &str, job: F) -> Self
    where
        F: Fn(Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Bytes>> + Send + 'static,
    {
        let job: AsyncJobFn = Arc::new(move |payload: Bytes| job(payload).boxed());
        self.jobs.insert(job_name.to_string(), job);
        self
    }

    /// Register a typed async job; payloads and results go through `codec`.
    ///
    /// ```rust,ignore
    /// let builder = WorkerPoolEngine::builder()
    ///     .register_typed("double", codec.clone(), |i: u32| async move { Ok(i * 2) });
    /// ```
    #[must_use]
    pub fn register_typed<I, O, F, Fut, C>(self, job_name: &str, codec: Arc<C>, job: F) -> Self
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        I: Send + 'static,
        O: Send + 'static,
        Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
        C: Codec + sealed::DecodeValue<I> + sealed::EncodeValue<O>,
    {
        let job = Arc::new(job);
        self.register_fn(job_name, move |payload: Bytes| {
            let job = Arc::clone(&job);
            let codec = Arc::clone(&codec);
            async move {
                let input = codec.decode::<I>(payload)?;
                let output = job(input).await?;
                codec.encode(&output)
            }
        })
    }

    /// Set the maximum number of jobs executing at once (default: 1).
    #[must_use]
    pub fn with_max_concurrency(mut self, max: NonZeroUsize) -> Self {
        self.max_concurrency = max;
        self
    }

    /// Set the number of runtime worker threads (default: 1).
    #[must_use]
    pub fn with_worker_threads(mut self, threads: NonZeroUsize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Start the runtime and return the engine.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Runtime`] if the tokio runtime cannot be built.
    pub fn build(self) -> Result<WorkerPoolEngine, EngineError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.worker_threads.get())
            .thread_name("saga-worker")
            .enable_all()
            .build()
            .map_err(|e| EngineError::Runtime(e.to_string()))?;
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();

        Ok(WorkerPoolEngine {
            runtime,
            jobs: self.jobs,
            semaphore: Arc::new(Semaphore::new(self.max_concurrency.get())),
            completions_tx,
            completions_rx,
            in_flight: 0,
            callback: None,
        })
    }
}

/// Engine executing async job handlers on a bounded worker pool.
///
/// # Example
///
/// ```rust,no_run
/// use bytes::Bytes;
/// use saga_runtime::engine::WorkerPoolEngine;
/// use std::num::NonZeroUsize;
///
/// let engine = WorkerPoolEngine::builder()
///     .register_fn("echo", |payload: Bytes| async move { Ok(payload) })
///     .with_max_concurrency(NonZeroUsize::new(8).unwrap())
///     .build()?;
/// # Ok::<(), saga_runtime::engine::EngineError>(())
/// ```
pub struct WorkerPoolEngine {
    runtime: Runtime,
    jobs: HashMap<String, AsyncJobFn>,
    semaphore: Arc<Semaphore>,
    completions_tx: mpsc::UnboundedSender<(TaskId, Bytes)>,
    completions_rx: mpsc::UnboundedReceiver<(TaskId, Bytes)>,
    in_flight: usize,
    callback: Option<CompletionCallback>,
}

impl fmt::Debug for WorkerPoolEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPoolEngine")
            .field("jobs", &self.jobs.keys().collect::<Vec<_>>())
            .field("in_flight", &self.in_flight)
            .field("available_permits", &self.semaphore.available_permits())
            .finish()
    }
}

impl WorkerPoolEngine {
    pub fn builder() -> WorkerPoolEngineBuilder {
        WorkerPoolEngineBuilder::default()
    }

    /// Submissions whose completion has not been delivered yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }
}

impl JobEngine for WorkerPoolEngine {
    fn submit(
        &mut self,
        job_name: &str,
        payload: Bytes,
        token: TaskId,
    ) -> Result<(), EngineError> {
        let job = self
            .jobs
            .get(job_name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownJob(job_name.to_string()))?;
        let semaphore = Arc::clone(&self.semaphore);
        let completions = self.completions_tx.clone();
        let job_name = job_name.to_string();

        self.runtime.spawn(async move {
            let result = match semaphore.acquire_owned().await {
                Ok(permit) => {
                    let outcome = AssertUnwindSafe(job(payload)).catch_unwind().await;
                    drop(permit);
                    match outcome {
                        Ok(Ok(result)) => result,
                        Ok(Err(e)) => {
                            tracing::warn!(
                                task_id = %token,
                                job = %job_name,
                                error = %e,
                                "Job failed"
                            );
                            Bytes::from(e.to_string())
                        }
                        Err(_) => {
                            tracing::warn!(task_id = %token, job = %job_name, "Job panicked");
                            Bytes::from_static(b"job panicked")
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(task_id = %token, error = %e, "Worker pool closed");
                    Bytes::from(e.to_string())
                }
            };

            if completions.send((token, result)).is_err() {
                tracing::trace!(task_id = %token, "Engine dropped before completion");
            }
        });

        self.in_flight += 1;
        tracing::trace!(task_id = %token, in_flight = self.in_flight, "Job spawned");
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
        if self.in_flight == 0 {
            return Ok(());
        }

        let Some(first) = self.completions_rx.blocking_recv() else {
            return Err(EngineError::Disconnected(
                "Completion channel closed".to_string(),
            ));
        };
        let mut ready = vec![first];
        while let Ok(next) = self.completions_rx.try_recv() {
            ready.push(next);
        }

        for (token, result) in ready {
            self.in_flight = self.in_flight.saturating_sub(1);
            let status = callback(token, result);
            tracing::trace!(task_id = %token, ?status, "Completion delivered");
        }
        Ok(())
    }
}
