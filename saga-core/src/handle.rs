use crate::primitives::TaskId;
use bytes::Bytes;
use chrono::{DateTime, Utc};

/// Bookkeeping record for one submitted job.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    pub id: TaskId,
    pub job_name: String,
    pub payload: Bytes,
    pub submitted_at: DateTime<Utc>,
}

impl TaskHandle {
    /// Time elapsed since the handle was registered.
    pub fn age(&self) -> chrono::Duration {
        Utc::now().signed_duration_since(self.submitted_at)
    }
}
