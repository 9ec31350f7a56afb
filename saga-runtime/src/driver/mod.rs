//! Saga driving: the stepper that advances individual saga programs and the
//! dispatch loop that pumps a job engine until no work is left.

mod dispatcher;
mod stepper;

pub use dispatcher::{DispatchError, DispatchReport, Dispatcher, DispatcherConfig};
pub use stepper::{SharedProgram, Stepper, Submission};
