//! Storage collaborator interface.
//!
//! The engine never talks to a cloud SDK directly. It goes through
//! [`ObjectStore`] (one client bound to one region) and [`StoreProvider`]
//! (hands out clients per region). The S3 backend and the in-memory backend
//! both implement these traits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::StoreError;

/// Result type for storage calls.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Who a grant applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Grantee {
    /// Canonical user id.
    CanonicalUser {
        /// Canonical id.
        id: String,
        /// Display name, if the service returned one.
        display_name: Option<String>,
    },
    /// Predefined group, identified by URI.
    Group {
        /// Group URI.
        uri: String,
    },
    /// Account identified by e-mail address.
    Email {
        /// E-mail address.
        address: String,
    },
}

/// One access grant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Grant {
    /// Grantee.
    pub grantee: Grantee,
    /// Permission name (`FULL_CONTROL`, `READ`, ...).
    pub permission: String,
}

/// Object owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Owner {
    /// Canonical id.
    pub id: String,
    /// Display name.
    pub display_name: Option<String>,
}

/// Access control policy of an object: owner plus grants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectAcl {
    /// Owner, if known.
    pub owner: Option<Owner>,
    /// Grant list.
    pub grants: Vec<Grant>,
}

impl ObjectAcl {
    /// Policy owned by `owner_id` with a single FULL_CONTROL grant to it.
    pub fn owner_full_control(owner_id: &str) -> Self {
        Self {
            owner: Some(Owner {
                id: owner_id.to_string(),
                display_name: None,
            }),
            grants: vec![Grant {
                grantee: Grantee::CanonicalUser {
                    id: owner_id.to_string(),
                    display_name: None,
                },
                permission: "FULL_CONTROL".to_string(),
            }],
        }
    }
}

/// Object tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    /// Tag key.
    pub key: String,
    /// Tag value.
    pub value: String,
}

impl Tag {
    /// Creates a tag.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Parameters of a server-side copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyRequest {
    /// Destination bucket.
    pub bucket: String,
    /// Destination key (decoded).
    pub key: String,
    /// Query-escaped `source_bucket/key` reference.
    pub copy_source: String,
    /// Canned ACL literal applied to the copy.
    pub acl: Option<String>,
}

impl CopyRequest {
    /// Builds a copy of `key` from `source_bucket` into `bucket`.
    pub fn new(source_bucket: &str, bucket: &str, key: &str, acl: Option<&str>) -> Self {
        Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
            copy_source: escape_copy_source(source_bucket, key),
            acl: acl.map(str::to_string),
        }
    }
}

/// Query-escapes the composite `bucket/key` copy source.
pub fn escape_copy_source(bucket: &str, key: &str) -> String {
    urlencoding::encode(&format!("{}/{}", bucket, key)).into_owned()
}

/// A storage client bound to one region.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Region this client talks to.
    fn region(&self) -> &str;

    /// Server-side copy.
    async fn copy_object(&self, request: &CopyRequest) -> StoreResult<()>;

    /// Blocks until `bucket/key` exists, or the poll budget runs out.
    async fn wait_until_exists(&self, bucket: &str, key: &str) -> StoreResult<()>;

    /// Deletes `bucket/key`.
    async fn delete_object(&self, bucket: &str, key: &str) -> StoreResult<()>;

    /// Blocks until `bucket/key` no longer exists, or the poll budget runs out.
    async fn wait_until_not_exists(&self, bucket: &str, key: &str) -> StoreResult<()>;

    /// Reads the object's access control policy.
    async fn get_object_acl(&self, bucket: &str, key: &str) -> StoreResult<ObjectAcl>;

    /// Replaces the object's access control policy.
    async fn put_object_acl(&self, bucket: &str, key: &str, acl: &ObjectAcl) -> StoreResult<()>;

    /// Reads the object's tag set.
    async fn get_object_tagging(&self, bucket: &str, key: &str) -> StoreResult<Vec<Tag>>;

    /// Looks up the region a bucket lives in.
    ///
    /// Fails with [`StoreError::NoSuchBucket`] when the bucket does not exist.
    async fn bucket_region(&self, bucket: &str) -> StoreResult<String>;
}

/// Hands out storage clients per region.
#[async_trait]
pub trait StoreProvider: Send + Sync {
    /// Returns a client bound to `region`.
    async fn store_for_region(&self, region: &str) -> StoreResult<Arc<dyn ObjectStore>>;
}
