//! Fan-out/fan-in groups of job commands.

use crate::command::JobCommand;
use crate::error::SagaError;

/// An ordered, immutable group of job commands submitted together and
/// awaited jointly.
///
/// Results are handed back to the saga in the order the commands appear
/// here, whatever order the engine completes them in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    commands: Box<[JobCommand]>,
}

impl Batch {
    /// Build a batch from `(job name, payload)` pairs or [`JobCommand`]s.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::InvalidBatch`] if `pairs` is empty.
    pub fn build<I, C>(pairs: I) -> Result<Self, SagaError>
    where
        I: IntoIterator<Item = C>,
        C: Into<JobCommand>,
    {
        let commands: Box<[JobCommand]> = pairs.into_iter().map(Into::into).collect();
        if commands.is_empty() {
            return Err(SagaError::InvalidBatch);
        }
        Ok(Self { commands })
    }

    pub fn commands(&self) -> &[JobCommand] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Always false for a successfully built batch.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn into_commands(self) -> Vec<JobCommand> {
        self.commands.into_vec()
    }
}
