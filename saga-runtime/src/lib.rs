//! Runtime for saga programs built with `saga-core`.
//!
//! - [`engine`]: the [`JobEngine`] port and two engines implementing it
//! - [`driver`]: the [`Stepper`] and the [`Dispatcher`] loop
//! - [`serialization`]: JSON and rkyv codecs (feature gated)

pub mod driver;
pub mod engine;
pub mod serialization;

// Re-exports
pub use driver::{DispatchError, DispatchReport, Dispatcher, DispatcherConfig, Stepper};
pub use engine::{
    CompletionCallback, CompletionStatus, DeliveryOrder, EngineError, InMemoryEngine, JobEngine,
    WorkerPoolEngine, WorkerPoolEngineBuilder,
};
