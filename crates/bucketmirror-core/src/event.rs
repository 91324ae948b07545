//! Notification decoding and event classification.
//!
//! Input is the S3 event-notification document. A batch is classified by its
//! first record; batches are assumed to be homogeneous.

use serde::{Deserialize, Serialize};

use crate::error::{ReplError, Result};

/// Prefix some producers put in front of event names.
const EVENT_NAME_PREFIX: &str = "s3:";

/// What happened to the source object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Object written (put, post, copy, multipart completion).
    ObjectCreated,
    /// Delete marker created in a versioned bucket.
    ObjectRemoved,
    /// Object tag set replaced or removed.
    TagsChanged,
    /// Anything the replicator does not act on.
    Other,
}

impl EventKind {
    /// Classifies an S3 event name such as `ObjectCreated:Put` or
    /// `s3:ObjectRemoved:DeleteMarkerCreated`.
    pub fn from_event_name(name: &str) -> Self {
        let name = name.strip_prefix(EVENT_NAME_PREFIX).unwrap_or(name);
        match name {
            "ObjectCreated:Put"
            | "ObjectCreated:Copy"
            | "ObjectCreated:Post"
            | "ObjectCreated:CompleteMultipartUpload" => EventKind::ObjectCreated,
            "ObjectRemoved:DeleteMarkerCreated" => EventKind::ObjectRemoved,
            "ObjectTagging:Put" | "ObjectTagging:Delete" => EventKind::TagsChanged,
            _ => EventKind::Other,
        }
    }

    /// Which operation this kind of event maps to, if any.
    pub fn action(&self) -> Option<Action> {
        match self {
            EventKind::ObjectCreated | EventKind::TagsChanged => Some(Action::Copy),
            EventKind::ObjectRemoved => Some(Action::Delete),
            EventKind::Other => None,
        }
    }

    /// Whether records of this kind pass through the quarantine gate.
    pub fn requires_quarantine_check(&self) -> bool {
        matches!(self, EventKind::TagsChanged)
    }
}

/// Operation performed on each destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    /// Copy the source object into the destination.
    Copy,
    /// Remove the object from the destination.
    Delete,
}

impl Action {
    /// Verb used in log lines.
    pub fn verb(&self) -> &'static str {
        match self {
            Action::Copy => "Copying",
            Action::Delete => "Deleting",
        }
    }
}

/// Raw notification batch as delivered by the bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationBatch {
    /// Notification entries.
    #[serde(rename = "Records", default)]
    pub records: Vec<NotificationRecord>,
}

impl NotificationBatch {
    /// Decodes a batch from its JSON document.
    pub fn from_json(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(|e| ReplError::Decode { msg: e.to_string() })
    }
}

/// One notification entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    /// Event name, e.g. `ObjectCreated:Put`.
    #[serde(rename = "eventName", default)]
    pub event_name: String,
    /// Bucket and object the event refers to.
    #[serde(default)]
    pub s3: S3Entity,
}

impl NotificationRecord {
    /// Builds a record by hand; the key is expected in its URL-encoded form.
    pub fn new(event_name: &str, bucket: &str, encoded_key: &str) -> Self {
        Self {
            event_name: event_name.to_string(),
            s3: S3Entity {
                bucket: S3Bucket {
                    name: bucket.to_string(),
                },
                object: S3Object {
                    key: encoded_key.to_string(),
                    version_id: None,
                },
            },
        }
    }
}

/// `s3` section of a notification entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Entity {
    /// Source bucket.
    #[serde(default)]
    pub bucket: S3Bucket,
    /// Source object.
    #[serde(default)]
    pub object: S3Object,
}

/// Bucket reference in a notification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Bucket {
    /// Bucket name.
    #[serde(default)]
    pub name: String,
}

/// Object reference in a notification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Object {
    /// URL-encoded object key.
    #[serde(default)]
    pub key: String,
    /// Version id, when the bucket is versioned.
    #[serde(rename = "versionId", default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
}

/// A decoded notification entry, ready for replication.
///
/// Every record in a batch is handled with the batch's action, whatever its
/// own event name says.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    /// Event name as delivered.
    pub event_name: String,
    /// Source bucket.
    pub bucket: String,
    /// Decoded object key.
    pub key: String,
}

/// A batch after classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedBatch {
    /// Kind of the whole batch, taken from its first record.
    pub kind: EventKind,
    /// Decoded records, in delivery order.
    pub records: Vec<ChangeRecord>,
}

/// Decodes an object key from its notification form.
///
/// Keys arrive form-encoded: `+` stands for a space and `%XX` for a byte.
pub fn decode_key(encoded: &str) -> Result<String> {
    let plus_decoded = encoded.replace('+', " ");
    urlencoding::decode(&plus_decoded)
        .map(|key| key.into_owned())
        .map_err(|e| ReplError::Decode {
            msg: format!("invalid object key {:?}: {}", encoded, e),
        })
}

/// Classifies a batch.
///
/// Returns `Ok(None)` when there is nothing to do: no records, or a first
/// record without an object key.
pub fn classify(batch: &NotificationBatch) -> Result<Option<ClassifiedBatch>> {
    let first = match batch.records.first() {
        Some(first) if !first.s3.object.key.is_empty() => first,
        _ => return Ok(None),
    };

    let kind = EventKind::from_event_name(&first.event_name);
    let records = batch
        .records
        .iter()
        .map(|r| {
            Ok(ChangeRecord {
                event_name: r.event_name.clone(),
                bucket: r.s3.bucket.name.clone(),
                key: decode_key(&r.s3.object.key)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Some(ClassifiedBatch { kind, records }))
}
