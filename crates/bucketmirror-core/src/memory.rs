//! In-memory storage backend.
//!
//! Models buckets living in regions, objects with ACLs and tags, and records
//! every call made through it. Used by the test suite and by dry runs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

use crate::error::StoreError;
use crate::store::{CopyRequest, ObjectAcl, ObjectStore, StoreProvider, StoreResult, Tag};

/// Canonical id that owns objects created by the in-memory cloud.
pub const MEMORY_ACCOUNT_ID: &str = "memory-account";

/// Storage operation kinds, used for failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StoreOp {
    /// `copy_object`.
    Copy,
    /// `wait_until_exists`.
    WaitExists,
    /// `delete_object`.
    Delete,
    /// `wait_until_not_exists`.
    WaitNotExists,
    /// `get_object_acl`.
    GetAcl,
    /// `put_object_acl`.
    PutAcl,
    /// `get_object_tagging`.
    GetTagging,
    /// `bucket_region`.
    Location,
}

/// A call observed by the in-memory cloud.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    /// Server-side copy through a client in `region`.
    Copy {
        /// Client region.
        region: String,
        /// Copy parameters.
        request: CopyRequest,
    },
    /// Existence poll.
    WaitExists {
        /// Bucket polled.
        bucket: String,
        /// Key polled.
        key: String,
    },
    /// Delete through a client in `region`.
    Delete {
        /// Client region.
        region: String,
        /// Bucket.
        bucket: String,
        /// Key.
        key: String,
    },
    /// Absence poll.
    WaitNotExists {
        /// Bucket polled.
        bucket: String,
        /// Key polled.
        key: String,
    },
    /// ACL read through a client in `region`.
    GetAcl {
        /// Client region.
        region: String,
        /// Bucket.
        bucket: String,
        /// Key.
        key: String,
    },
    /// ACL write.
    PutAcl {
        /// Bucket.
        bucket: String,
        /// Key.
        key: String,
        /// Policy written.
        acl: ObjectAcl,
    },
    /// Tag read.
    GetTagging {
        /// Bucket.
        bucket: String,
        /// Key.
        key: String,
    },
    /// Location lookup through a client in `region`.
    Location {
        /// Client region.
        region: String,
        /// Bucket looked up.
        bucket: String,
    },
}

/// Call counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryCloudStats {
    /// Number of copy calls.
    pub copies: u64,
    /// Number of delete calls.
    pub deletes: u64,
    /// Number of ACL reads.
    pub acl_reads: u64,
    /// Number of ACL writes.
    pub acl_writes: u64,
    /// Number of tag reads.
    pub tag_reads: u64,
    /// Number of bucket location lookups.
    pub location_lookups: u64,
    /// Number of clients handed out.
    pub sessions: u64,
}

/// A stored object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryObject {
    /// Object payload.
    pub body: Vec<u8>,
    /// Access control policy.
    pub acl: ObjectAcl,
    /// Canned ACL the object was last written with, if any.
    pub canned_acl: Option<String>,
    /// Tag set.
    pub tags: Vec<Tag>,
}

impl MemoryObject {
    /// Object with a body, owned by the in-memory account.
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            acl: ObjectAcl::owner_full_control(MEMORY_ACCOUNT_ID),
            canned_acl: None,
            tags: Vec::new(),
        }
    }

    /// Sets the ACL.
    pub fn with_acl(mut self, acl: ObjectAcl) -> Self {
        self.acl = acl;
        self
    }

    /// Adds a tag.
    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.tags.push(Tag::new(key, value));
        self
    }
}

#[derive(Debug, Default)]
struct MemoryBucket {
    region: String,
    objects: HashMap<String, MemoryObject>,
}

#[derive(Debug, Default)]
struct CloudState {
    buckets: HashMap<String, MemoryBucket>,
    refused_regions: HashSet<String>,
    failures: HashMap<(StoreOp, String), StoreError>,
    latency: HashMap<String, Duration>,
}

/// Shared in-memory world that every [`MemoryStore`] operates on.
pub struct MemoryCloud {
    state: Mutex<CloudState>,
    calls: Mutex<Vec<StoreCall>>,
    stats: Mutex<MemoryCloudStats>,
}

impl MemoryCloud {
    /// Creates an empty cloud.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CloudState::default()),
            calls: Mutex::new(Vec::new()),
            stats: Mutex::new(MemoryCloudStats::default()),
        }
    }

    /// Creates a bucket in `region`.
    pub fn create_bucket(&self, bucket: &str, region: &str) {
        let mut state = self.state.lock().unwrap();
        state.buckets.insert(
            bucket.to_string(),
            MemoryBucket {
                region: region.to_string(),
                objects: HashMap::new(),
            },
        );
    }

    /// Stores an object. The bucket must exist.
    pub fn put_object(&self, bucket: &str, key: &str, object: MemoryObject) {
        let mut state = self.state.lock().unwrap();
        if let Some(b) = state.buckets.get_mut(bucket) {
            b.objects.insert(key.to_string(), object);
        }
    }

    /// Returns a copy of a stored object.
    pub fn object(&self, bucket: &str, key: &str) -> Option<MemoryObject> {
        let state = self.state.lock().unwrap();
        state
            .buckets
            .get(bucket)
            .and_then(|b| b.objects.get(key))
            .cloned()
    }

    /// Makes every `op` against `bucket` fail with `error`.
    pub fn fail_op(&self, op: StoreOp, bucket: &str, error: StoreError) {
        let mut state = self.state.lock().unwrap();
        state.failures.insert((op, bucket.to_string()), error);
    }

    /// Delays every call targeting `bucket`.
    pub fn set_latency(&self, bucket: &str, latency: Duration) {
        let mut state = self.state.lock().unwrap();
        state.latency.insert(bucket.to_string(), latency);
    }

    /// Refuses to hand out clients for `region`.
    pub fn refuse_sessions_for(&self, region: &str) {
        let mut state = self.state.lock().unwrap();
        state.refused_regions.insert(region.to_string());
    }

    /// All calls observed so far, in order.
    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Copy calls observed so far.
    pub fn copy_requests(&self) -> Vec<(String, CopyRequest)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                StoreCall::Copy { region, request } => Some((region, request)),
                _ => None,
            })
            .collect()
    }

    /// Call counters.
    pub fn stats(&self) -> MemoryCloudStats {
        self.stats.lock().unwrap().clone()
    }

    fn record(&self, call: StoreCall) {
        {
            let mut stats = self.stats.lock().unwrap();
            match &call {
                StoreCall::Copy { .. } => stats.copies += 1,
                StoreCall::Delete { .. } => stats.deletes += 1,
                StoreCall::GetAcl { .. } => stats.acl_reads += 1,
                StoreCall::PutAcl { .. } => stats.acl_writes += 1,
                StoreCall::GetTagging { .. } => stats.tag_reads += 1,
                StoreCall::Location { .. } => stats.location_lookups += 1,
                StoreCall::WaitExists { .. } | StoreCall::WaitNotExists { .. } => {}
            }
        }
        self.calls.lock().unwrap().push(call);
    }

    fn injected(&self, op: StoreOp, bucket: &str) -> (Option<StoreError>, Option<Duration>) {
        let state = self.state.lock().unwrap();
        (
            state.failures.get(&(op, bucket.to_string())).cloned(),
            state.latency.get(bucket).copied(),
        )
    }

    async fn prelude(&self, op: StoreOp, bucket: &str) -> StoreResult<()> {
        let (failure, latency) = self.injected(op, bucket);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn check_region(state: &CloudState, region: &str, bucket: &str) -> StoreResult<()> {
        match state.buckets.get(bucket) {
            None => Err(StoreError::NoSuchBucket {
                bucket: bucket.to_string(),
            }),
            Some(b) if b.region != region => Err(StoreError::Service {
                code: "PermanentRedirect".to_string(),
                message: format!("bucket {} lives in {}, not {}", bucket, b.region, region),
            }),
            Some(_) => Ok(()),
        }
    }
}

impl Default for MemoryCloud {
    fn default() -> Self {
        Self::new()
    }
}

/// Client view of a [`MemoryCloud`] bound to one region.
pub struct MemoryStore {
    region: String,
    cloud: Arc<MemoryCloud>,
}

impl MemoryStore {
    /// Creates a client for `region`.
    pub fn new(cloud: Arc<MemoryCloud>, region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            cloud,
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn region(&self) -> &str {
        &self.region
    }

    async fn copy_object(&self, request: &CopyRequest) -> StoreResult<()> {
        self.cloud.record(StoreCall::Copy {
            region: self.region.clone(),
            request: request.clone(),
        });
        self.cloud.prelude(StoreOp::Copy, &request.bucket).await?;
        debug!("Memory copy_object: {} -> {}/{}", request.copy_source, request.bucket, request.key);

        let source = urlencoding::decode(&request.copy_source)
            .map_err(|e| StoreError::Service {
                code: "InvalidArgument".to_string(),
                message: e.to_string(),
            })?
            .into_owned();
        let (source_bucket, source_key) =
            source.split_once('/').ok_or_else(|| StoreError::Service {
                code: "InvalidArgument".to_string(),
                message: format!("bad copy source {}", request.copy_source),
            })?;

        let mut state = self.cloud.state.lock().unwrap();
        MemoryCloud::check_region(&state, &self.region, &request.bucket)?;

        let body = state
            .buckets
            .get(source_bucket)
            .ok_or_else(|| StoreError::NoSuchBucket {
                bucket: source_bucket.to_string(),
            })?
            .objects
            .get(source_key)
            .map(|o| o.body.clone())
            .ok_or_else(|| StoreError::NoSuchKey {
                bucket: source_bucket.to_string(),
                key: source_key.to_string(),
            })?;

        let object = MemoryObject {
            body,
            acl: ObjectAcl::owner_full_control(MEMORY_ACCOUNT_ID),
            canned_acl: request.acl.clone(),
            tags: Vec::new(),
        };
        if let Some(dest) = state.buckets.get_mut(&request.bucket) {
            dest.objects.insert(request.key.clone(), object);
        }
        Ok(())
    }

    async fn wait_until_exists(&self, bucket: &str, key: &str) -> StoreResult<()> {
        self.cloud.record(StoreCall::WaitExists {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
        self.cloud.prelude(StoreOp::WaitExists, bucket).await?;
        match self.cloud.object(bucket, key) {
            Some(_) => Ok(()),
            None => Err(StoreError::WaitTimeout {
                bucket: bucket.to_string(),
                key: key.to_string(),
                attempts: 1,
            }),
        }
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StoreResult<()> {
        self.cloud.record(StoreCall::Delete {
            region: self.region.clone(),
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
        self.cloud.prelude(StoreOp::Delete, bucket).await?;

        let mut state = self.cloud.state.lock().unwrap();
        MemoryCloud::check_region(&state, &self.region, bucket)?;
        if let Some(b) = state.buckets.get_mut(bucket) {
            b.objects.remove(key);
        }
        Ok(())
    }

    async fn wait_until_not_exists(&self, bucket: &str, key: &str) -> StoreResult<()> {
        self.cloud.record(StoreCall::WaitNotExists {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
        self.cloud.prelude(StoreOp::WaitNotExists, bucket).await?;
        match self.cloud.object(bucket, key) {
            None => Ok(()),
            Some(_) => Err(StoreError::WaitTimeout {
                bucket: bucket.to_string(),
                key: key.to_string(),
                attempts: 1,
            }),
        }
    }

    async fn get_object_acl(&self, bucket: &str, key: &str) -> StoreResult<ObjectAcl> {
        self.cloud.record(StoreCall::GetAcl {
            region: self.region.clone(),
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
        self.cloud.prelude(StoreOp::GetAcl, bucket).await?;

        let state = self.cloud.state.lock().unwrap();
        MemoryCloud::check_region(&state, &self.region, bucket)?;
        state
            .buckets
            .get(bucket)
            .and_then(|b| b.objects.get(key))
            .map(|o| o.acl.clone())
            .ok_or_else(|| StoreError::NoSuchKey {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    async fn put_object_acl(&self, bucket: &str, key: &str, acl: &ObjectAcl) -> StoreResult<()> {
        self.cloud.record(StoreCall::PutAcl {
            bucket: bucket.to_string(),
            key: key.to_string(),
            acl: acl.clone(),
        });
        self.cloud.prelude(StoreOp::PutAcl, bucket).await?;

        let mut state = self.cloud.state.lock().unwrap();
        MemoryCloud::check_region(&state, &self.region, bucket)?;
        let object = state
            .buckets
            .get_mut(bucket)
            .and_then(|b| b.objects.get_mut(key))
            .ok_or_else(|| StoreError::NoSuchKey {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })?;
        object.acl = acl.clone();
        object.canned_acl = None;
        Ok(())
    }

    async fn get_object_tagging(&self, bucket: &str, key: &str) -> StoreResult<Vec<Tag>> {
        self.cloud.record(StoreCall::GetTagging {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
        self.cloud.prelude(StoreOp::GetTagging, bucket).await?;

        let state = self.cloud.state.lock().unwrap();
        MemoryCloud::check_region(&state, &self.region, bucket)?;
        state
            .buckets
            .get(bucket)
            .and_then(|b| b.objects.get(key))
            .map(|o| o.tags.clone())
            .ok_or_else(|| StoreError::NoSuchKey {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    async fn bucket_region(&self, bucket: &str) -> StoreResult<String> {
        self.cloud.record(StoreCall::Location {
            region: self.region.clone(),
            bucket: bucket.to_string(),
        });
        self.cloud.prelude(StoreOp::Location, bucket).await?;

        let state = self.cloud.state.lock().unwrap();
        state
            .buckets
            .get(bucket)
            .map(|b| b.region.clone())
            .ok_or_else(|| StoreError::NoSuchBucket {
                bucket: bucket.to_string(),
            })
    }
}

/// Hands out [`MemoryStore`] clients over one shared [`MemoryCloud`].
pub struct MemoryStoreProvider {
    cloud: Arc<MemoryCloud>,
}

impl MemoryStoreProvider {
    /// Creates a provider over `cloud`.
    pub fn new(cloud: Arc<MemoryCloud>) -> Self {
        Self { cloud }
    }
}

#[async_trait]
impl StoreProvider for MemoryStoreProvider {
    async fn store_for_region(&self, region: &str) -> StoreResult<Arc<dyn ObjectStore>> {
        let refused = self.cloud.state.lock().unwrap().refused_regions.contains(region);
        if refused {
            return Err(StoreError::Transport {
                msg: format!("no route to region {}", region),
            });
        }
        self.cloud.stats.lock().unwrap().sessions += 1;
        Ok(Arc::new(MemoryStore::new(self.cloud.clone(), region)))
    }
}
