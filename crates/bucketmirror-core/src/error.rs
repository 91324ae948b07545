//! Error types for the replication engine.

use thiserror::Error;

/// Errors reported by a storage client (the cloud collaborator).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The bucket does not exist.
    #[error("no such bucket: {bucket}")]
    NoSuchBucket {
        /// Bucket that was not found.
        bucket: String,
    },

    /// The object does not exist.
    #[error("no such key: {bucket}/{key}")]
    NoSuchKey {
        /// Bucket that was queried.
        bucket: String,
        /// Missing object key.
        key: String,
    },

    /// The existence poll ran out of attempts.
    #[error("gave up waiting on {bucket}/{key} after {attempts} attempts")]
    WaitTimeout {
        /// Bucket being polled.
        bucket: String,
        /// Key being polled.
        key: String,
        /// Number of polls made.
        attempts: u32,
    },

    /// The service answered with an error code.
    #[error("service error {code}: {message}")]
    Service {
        /// Service error code (e.g. `AccessDenied`).
        code: String,
        /// Human-readable message.
        message: String,
    },

    /// The request never got an answer.
    #[error("transport error: {msg}")]
    Transport {
        /// Error message describing the failure.
        msg: String,
    },
}

/// Errors that can occur while replicating a notification batch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReplError {
    /// Replication configuration is empty, malformed or inconsistent.
    #[error("configuration error: {msg}")]
    Config {
        /// Error message describing the issue.
        msg: String,
    },

    /// A destination bucket does not exist; the deployment is misconfigured.
    #[error("fatal configuration error: destination bucket {bucket} not found")]
    FatalConfiguration {
        /// The bucket the location lookup could not find.
        bucket: String,
    },

    /// No storage client could be established for a region, or the region of
    /// a destination could not be resolved.
    #[error("unable to establish session for {bucket} in {region}: {msg}")]
    Session {
        /// Destination bucket.
        bucket: String,
        /// Region that was requested (may be the probe region).
        region: String,
        /// Underlying failure.
        msg: String,
    },

    /// The object carries an `infected` tag and must not be replicated.
    #[error("object {key} in bucket {bucket} is quarantined")]
    Quarantine {
        /// Source bucket.
        bucket: String,
        /// Object key.
        key: String,
    },

    /// Tags could not be read; the object is treated as not clean.
    #[error("unable to read tags of {key} in bucket {bucket}: {source}")]
    TagFetch {
        /// Source bucket.
        bucket: String,
        /// Object key.
        key: String,
        /// Store failure.
        source: StoreError,
    },

    /// Copy request failed.
    #[error("unable to copy {key} from bucket {from:?} to bucket {to:?}: {source}")]
    Copy {
        /// Object key.
        key: String,
        /// Source bucket.
        from: String,
        /// Destination bucket.
        to: String,
        /// Store failure.
        source: StoreError,
    },

    /// The copied object never showed up in the destination.
    #[error("error occurred while waiting for item {key:?} to be copied in bucket {to:?}: {source}")]
    WaitExists {
        /// Object key.
        key: String,
        /// Destination bucket.
        to: String,
        /// Store failure.
        source: StoreError,
    },

    /// Delete request failed.
    #[error("unable to delete {key} in bucket {to:?}: {source}")]
    Delete {
        /// Object key.
        key: String,
        /// Destination bucket.
        to: String,
        /// Store failure.
        source: StoreError,
    },

    /// The deleted object is still visible in the destination.
    #[error("error occurred while waiting for item {key:?} to be removed in bucket {to:?}: {source}")]
    WaitNotExists {
        /// Object key.
        key: String,
        /// Destination bucket.
        to: String,
        /// Store failure.
        source: StoreError,
    },

    /// Source ACL could not be read.
    #[error("unable to read ACL of {key} in bucket {bucket:?}: {source}")]
    AclRead {
        /// Source bucket.
        bucket: String,
        /// Object key.
        key: String,
        /// Store failure.
        source: StoreError,
    },

    /// Destination ACL could not be written.
    #[error("unable to write ACL of {key} in bucket {bucket:?}: {source}")]
    AclWrite {
        /// Destination bucket.
        bucket: String,
        /// Object key.
        key: String,
        /// Store failure.
        source: StoreError,
    },

    /// The task observed the batch cancellation token and stopped.
    #[error("task for {key} to bucket {to:?} cancelled")]
    Cancelled {
        /// Object key.
        key: String,
        /// Destination bucket.
        to: String,
    },

    /// Tasks went away without reporting a result.
    #[error("expected {expected} task results, received {received}")]
    TaskLost {
        /// Number of tasks dispatched.
        expected: usize,
        /// Number of results received before the channel closed.
        received: usize,
    },

    /// The notification batch could not be decoded.
    #[error("unable to decode notification batch: {msg}")]
    Decode {
        /// Error message describing the issue.
        msg: String,
    },
}

impl ReplError {
    /// Returns true when a destination bucket does not exist. The binary
    /// exits with a distinct status for this class.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ReplError::FatalConfiguration { .. })
    }
}

/// Result type alias using ReplError as the error type.
pub type Result<T> = std::result::Result<T, ReplError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let fatal = ReplError::FatalConfiguration {
            bucket: "backup".to_string(),
        };
        assert!(fatal.is_fatal());

        let config = ReplError::Config {
            msg: "empty".to_string(),
        };
        assert!(!config.is_fatal());

        let quarantine = ReplError::Quarantine {
            bucket: "photos".to_string(),
            key: "a.png".to_string(),
        };
        assert!(!quarantine.is_fatal());
    }

    #[test]
    fn test_copy_error_message_names_both_buckets() {
        let err = ReplError::Copy {
            key: "img/1.png".to_string(),
            from: "photos".to_string(),
            to: "backup".to_string(),
            source: StoreError::Service {
                code: "AccessDenied".to_string(),
                message: "denied".to_string(),
            },
        };
        let msg = err.to_string();
        assert!(msg.contains("img/1.png"));
        assert!(msg.contains("\"photos\""));
        assert!(msg.contains("\"backup\""));
        assert!(msg.contains("AccessDenied"));
    }

    #[test]
    fn test_store_error_display() {
        let err = StoreError::WaitTimeout {
            bucket: "b".to_string(),
            key: "k".to_string(),
            attempts: 20,
        };
        assert_eq!(err.to_string(), "gave up waiting on b/k after 20 attempts");
    }
}
