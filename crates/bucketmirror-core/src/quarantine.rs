//! Quarantine gate: blocks replication of objects tagged as infected.

use tracing::warn;

use crate::error::{ReplError, Result};
use crate::store::{ObjectStore, Tag};

/// Tag value that marks an object as infected.
pub const INFECTED_TAG_VALUE: &str = "infected";

/// Returns true if a tag value marks the object as infected.
///
/// Scanners often write the value with a trailing newline, so trailing `\n`
/// and `\r` are ignored.
pub fn is_infected_value(value: &str) -> bool {
    value.trim_end_matches(['\n', '\r']) == INFECTED_TAG_VALUE
}

/// Returns true if none of the tags marks the object as infected.
pub fn tags_are_clean(tags: &[Tag]) -> bool {
    !tags.iter().any(|t| is_infected_value(&t.value))
}

/// Checks the tag set of `bucket/key` through a client for the source region.
///
/// A failed tag fetch is reported as an error; callers must treat it as
/// "not clean".
pub async fn is_clean(source: &dyn ObjectStore, bucket: &str, key: &str) -> Result<bool> {
    let tags = source
        .get_object_tagging(bucket, key)
        .await
        .map_err(|e| ReplError::TagFetch {
            bucket: bucket.to_string(),
            key: key.to_string(),
            source: e,
        })?;

    let clean = tags_are_clean(&tags);
    if !clean {
        warn!("Object {} in bucket {} is tagged infected", key, bucket);
    }
    Ok(clean)
}

/// Gate used by the executor: passes clean objects, turns everything else
/// into an error.
pub async fn admit(source: &dyn ObjectStore, bucket: &str, key: &str) -> Result<()> {
    match is_clean(source, bucket, key).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(ReplError::Quarantine {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }),
        Err(e) => {
            warn!("Treating {} in bucket {} as not clean: {}", key, bucket, e);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::memory::{MemoryCloud, MemoryObject, MemoryStore, StoreOp};
    use std::sync::Arc;

    #[test]
    fn test_infected_value_matching() {
        assert!(is_infected_value("infected"));
        assert!(is_infected_value("infected\n"));
        assert!(is_infected_value("infected\r\n"));
        assert!(is_infected_value("infected\n\n"));
        assert!(!is_infected_value("Infected"));
        assert!(!is_infected_value(" infected"));
        assert!(!is_infected_value("infected "));
        assert!(!is_infected_value("clean"));
        assert!(!is_infected_value(""));
    }

    #[test]
    fn test_tag_key_is_irrelevant() {
        let tags = vec![Tag::new("anything", "infected")];
        assert!(!tags_are_clean(&tags));
        let tags = vec![Tag::new("infected", "no")];
        assert!(tags_are_clean(&tags));
        assert!(tags_are_clean(&[]));
    }

    fn cloud_with(object: MemoryObject) -> Arc<MemoryCloud> {
        let cloud = Arc::new(MemoryCloud::new());
        cloud.create_bucket("photos", "us-east-1");
        cloud.put_object("photos", "a.png", object);
        cloud
    }

    #[tokio::test]
    async fn test_clean_object_admitted() {
        let cloud = cloud_with(MemoryObject::new(b"x".to_vec()).with_tag("av-status", "clean"));
        let store = MemoryStore::new(cloud, "us-east-1");

        assert!(is_clean(&store, "photos", "a.png").await.unwrap());
        assert!(admit(&store, "photos", "a.png").await.is_ok());
    }

    #[tokio::test]
    async fn test_infected_object_refused() {
        let cloud = cloud_with(MemoryObject::new(b"x".to_vec()).with_tag("av-status", "infected\n"));
        let store = MemoryStore::new(cloud, "us-east-1");

        assert!(!is_clean(&store, "photos", "a.png").await.unwrap());
        let err = admit(&store, "photos", "a.png").await.unwrap_err();
        assert!(matches!(err, ReplError::Quarantine { .. }));
    }

    #[tokio::test]
    async fn test_tag_fetch_failure_fails_closed() {
        let cloud = cloud_with(MemoryObject::new(b"x".to_vec()));
        cloud.fail_op(
            StoreOp::GetTagging,
            "photos",
            StoreError::Transport {
                msg: "connection reset".to_string(),
            },
        );
        let store = MemoryStore::new(cloud, "us-east-1");

        let err = admit(&store, "photos", "a.png").await.unwrap_err();
        assert!(matches!(err, ReplError::TagFetch { .. }));
    }
}
