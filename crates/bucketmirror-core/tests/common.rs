//! Common fixtures for replication integration tests.

use std::sync::Arc;

use bucketmirror_core::event::{NotificationBatch, NotificationRecord};
use bucketmirror_core::memory::{MemoryCloud, MemoryObject, MemoryStoreProvider};
use bucketmirror_core::store::{Grant, Grantee, ObjectAcl, Owner};
use bucketmirror_core::{EngineConfig, ReplicationEngine, RuleTable};

/// Canonical id owning the source objects.
pub const SOURCE_OWNER: &str = "source-owner";

/// ACL carried by source objects: owner FULL_CONTROL plus a public read grant.
pub fn source_acl() -> ObjectAcl {
    ObjectAcl {
        owner: Some(Owner {
            id: SOURCE_OWNER.to_string(),
            display_name: Some("photos-team".to_string()),
        }),
        grants: vec![
            Grant {
                grantee: Grantee::CanonicalUser {
                    id: SOURCE_OWNER.to_string(),
                    display_name: Some("photos-team".to_string()),
                },
                permission: "FULL_CONTROL".to_string(),
            },
            Grant {
                grantee: Grantee::Group {
                    uri: "http://acs.amazonaws.com/groups/global/AllUsers".to_string(),
                },
                permission: "READ".to_string(),
            },
        ],
    }
}

/// In-memory world plus an engine wired to it.
pub struct TestWorld {
    pub cloud: Arc<MemoryCloud>,
    pub engine: ReplicationEngine,
}

impl TestWorld {
    /// Builds a world from a JSON rule table. Buckets are created from
    /// `(name, region)` pairs.
    pub fn new(rules_json: &str, buckets: &[(&str, &str)]) -> Self {
        Self::with_config(rules_json, buckets, EngineConfig::default())
    }

    /// Same as [`TestWorld::new`] with explicit engine settings.
    pub fn with_config(rules_json: &str, buckets: &[(&str, &str)], config: EngineConfig) -> Self {
        let cloud = Arc::new(MemoryCloud::new());
        for (name, region) in buckets {
            cloud.create_bucket(name, region);
        }
        let rules = RuleTable::from_json(rules_json.as_bytes()).unwrap();
        let engine = ReplicationEngine::new(
            config,
            Arc::new(rules),
            Arc::new(MemoryStoreProvider::new(cloud.clone())),
        );
        Self { cloud, engine }
    }

    /// Stores a source object carrying [`source_acl`].
    pub fn put_source(&self, bucket: &str, key: &str) {
        self.cloud.put_object(
            bucket,
            key,
            MemoryObject::new(key.as_bytes().to_vec()).with_acl(source_acl()),
        );
    }
}

/// Batch with one record per `(bucket, encoded_key)`, all with `event_name`.
pub fn batch(event_name: &str, records: &[(&str, &str)]) -> NotificationBatch {
    NotificationBatch {
        records: records
            .iter()
            .map(|(bucket, key)| NotificationRecord::new(event_name, bucket, key))
            .collect(),
    }
}
