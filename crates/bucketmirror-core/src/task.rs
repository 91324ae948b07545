//! Per-destination units of work and their outcomes.

use std::fmt;

use crate::error::Result;
use crate::event::Action;

/// Identifies a task within one batch: record index and destination index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId {
    /// Index of the record in the batch.
    pub record: usize,
    /// Index of the destination in the rule.
    pub destination: usize,
}

impl TaskId {
    /// Creates a task id.
    pub fn new(record: usize, destination: usize) -> Self {
        Self {
            record,
            destination,
        }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}/d{}", self.record, self.destination)
    }
}

/// One copy or delete against one destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationTask {
    /// Position in the batch.
    pub id: TaskId,
    /// Copy or delete.
    pub action: Action,
    /// Source bucket.
    pub source_bucket: String,
    /// Default region of the source bucket, from its rule.
    pub source_region: String,
    /// Destination bucket.
    pub destination_bucket: String,
    /// Resolved destination region.
    pub destination_region: String,
    /// Decoded object key.
    pub key: String,
    /// Canned ACL from the rule; `None` means the source ACL is propagated.
    pub acl: Option<String>,
}

/// Result of one task, as it travels back to the fan-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    /// Which task produced it.
    pub id: TaskId,
    /// Success or the failure reason.
    pub result: Result<()>,
}

impl TaskOutcome {
    /// Returns true if the task succeeded.
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}
