use bytes::Bytes;

/// A single `(job name, payload)` submission.
///
/// The payload is opaque to the driver; only the job engine interprets it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobCommand {
    name: String,
    payload: Bytes,
}

impl JobCommand {
    pub fn new(name: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            payload: payload.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_parts(self) -> (String, Bytes) {
        (self.name, self.payload)
    }

    /// Check that the command can be routed by a job engine.
    ///
    /// Returns the reason when the job name is blank or contains control
    /// characters.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("job name is empty".to_string());
        }
        if self.name.chars().any(char::is_control) {
            return Err(format!(
                "job name {:?} contains control characters",
                self.name
            ));
        }
        Ok(())
    }
}

impl<N, P> From<(N, P)> for JobCommand
where
    N: Into<String>,
    P: Into<Bytes>,
{
    fn from((name, payload): (N, P)) -> Self {
        Self::new(name, payload)
    }
}
