//! Object replicator: copies one object into one destination.

use std::sync::Arc;
use tracing::debug;

use crate::error::{ReplError, Result};
use crate::store::{CopyRequest, ObjectStore, StoreProvider};
use crate::task::ReplicationTask;

/// Copies `task.key` from the source bucket into the destination.
///
/// 1. server-side copy, carrying the rule's canned ACL if there is one;
/// 2. wait until the copy is visible in the destination;
/// 3. without a canned ACL, copy the source object's owner and grants onto
///    the replica.
///
/// `destination` must be a client for `task.destination_region`.
pub async fn replicate(
    task: &ReplicationTask,
    destination: &dyn ObjectStore,
    provider: &dyn StoreProvider,
) -> Result<()> {
    let request = CopyRequest::new(
        &task.source_bucket,
        &task.destination_bucket,
        &task.key,
        task.acl.as_deref(),
    );

    destination
        .copy_object(&request)
        .await
        .map_err(|e| ReplError::Copy {
            key: task.key.clone(),
            from: task.source_bucket.clone(),
            to: task.destination_bucket.clone(),
            source: e,
        })?;

    destination
        .wait_until_exists(&task.destination_bucket, &task.key)
        .await
        .map_err(|e| ReplError::WaitExists {
            key: task.key.clone(),
            to: task.destination_bucket.clone(),
            source: e,
        })?;

    if task.acl.is_none() {
        propagate_acl(task, destination, provider).await?;
    }

    debug!(
        "Replicated {} from {} to {} ({})",
        task.key, task.source_bucket, task.destination_bucket, task.id
    );
    Ok(())
}

/// Writes the source object's ACL onto the replica.
async fn propagate_acl(
    task: &ReplicationTask,
    destination: &dyn ObjectStore,
    provider: &dyn StoreProvider,
) -> Result<()> {
    let source_store: Option<Arc<dyn ObjectStore>> =
        if task.source_region.is_empty() || task.source_region == destination.region() {
            None
        } else {
            let store = provider
                .store_for_region(&task.source_region)
                .await
                .map_err(|e| ReplError::Session {
                    bucket: task.source_bucket.clone(),
                    region: task.source_region.clone(),
                    msg: e.to_string(),
                })?;
            Some(store)
        };
    let source: &dyn ObjectStore = match &source_store {
        Some(store) => store.as_ref(),
        None => destination,
    };

    let acl = source
        .get_object_acl(&task.source_bucket, &task.key)
        .await
        .map_err(|e| ReplError::AclRead {
            bucket: task.source_bucket.clone(),
            key: task.key.clone(),
            source: e,
        })?;

    destination
        .put_object_acl(&task.destination_bucket, &task.key, &acl)
        .await
        .map_err(|e| ReplError::AclWrite {
            bucket: task.destination_bucket.clone(),
            key: task.key.clone(),
            source: e,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::event::Action;
    use crate::memory::{MemoryCloud, MemoryObject, MemoryStore, MemoryStoreProvider, StoreCall, StoreOp};
    use crate::store::{Grant, Grantee, ObjectAcl, Owner};
    use crate::task::TaskId;

    fn source_acl() -> ObjectAcl {
        ObjectAcl {
            owner: Some(Owner {
                id: "owner-1".to_string(),
                display_name: Some("alice".to_string()),
            }),
            grants: vec![
                Grant {
                    grantee: Grantee::CanonicalUser {
                        id: "owner-1".to_string(),
                        display_name: Some("alice".to_string()),
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

    fn setup() -> Arc<MemoryCloud> {
        let cloud = Arc::new(MemoryCloud::new());
        cloud.create_bucket("photos", "us-east-1");
        cloud.create_bucket("backup", "eu-west-1");
        cloud.put_object(
            "photos",
            "img/1.png",
            MemoryObject::new(b"png".to_vec()).with_acl(source_acl()),
        );
        cloud
    }

    fn task(acl: Option<&str>) -> ReplicationTask {
        ReplicationTask {
            id: TaskId::new(0, 0),
            action: Action::Copy,
            source_bucket: "photos".to_string(),
            source_region: "us-east-1".to_string(),
            destination_bucket: "backup".to_string(),
            destination_region: "eu-west-1".to_string(),
            key: "img/1.png".to_string(),
            acl: acl.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_explicit_acl_skips_propagation() {
        let cloud = setup();
        let dest = MemoryStore::new(cloud.clone(), "eu-west-1");
        let provider = MemoryStoreProvider::new(cloud.clone());

        replicate(&task(Some("private")), &dest, &provider).await.unwrap();

        let replica = cloud.object("backup", "img/1.png").unwrap();
        assert_eq!(replica.canned_acl.as_deref(), Some("private"));
        let stats = cloud.stats();
        assert_eq!(stats.copies, 1);
        assert_eq!(stats.acl_reads, 0);
        assert_eq!(stats.acl_writes, 0);
    }

    #[tokio::test]
    async fn test_source_acl_propagated() {
        let cloud = setup();
        let dest = MemoryStore::new(cloud.clone(), "eu-west-1");
        let provider = MemoryStoreProvider::new(cloud.clone());

        replicate(&task(None), &dest, &provider).await.unwrap();

        let replica = cloud.object("backup", "img/1.png").unwrap();
        assert_eq!(replica.acl, source_acl());
        assert_eq!(replica.canned_acl, None);

        let calls = cloud.calls();
        assert!(calls.contains(&StoreCall::GetAcl {
            region: "us-east-1".to_string(),
            bucket: "photos".to_string(),
            key: "img/1.png".to_string(),
        }));
        let (_, copy) = &cloud.copy_requests()[0];
        assert_eq!(copy.acl, None);
    }

    #[tokio::test]
    async fn test_same_region_reuses_destination_client() {
        let cloud = setup();
        cloud.create_bucket("mirror", "us-east-1");
        let dest = MemoryStore::new(cloud.clone(), "us-east-1");
        let provider = MemoryStoreProvider::new(cloud.clone());

        let mut t = task(None);
        t.destination_bucket = "mirror".to_string();
        t.destination_region = "us-east-1".to_string();
        replicate(&t, &dest, &provider).await.unwrap();

        assert_eq!(cloud.stats().sessions, 0);
        assert_eq!(cloud.object("mirror", "img/1.png").unwrap().acl, source_acl());
    }

    #[tokio::test]
    async fn test_copy_failure_stops_task() {
        let cloud = setup();
        cloud.fail_op(
            StoreOp::Copy,
            "backup",
            StoreError::Service {
                code: "AccessDenied".to_string(),
                message: "denied".to_string(),
            },
        );
        let dest = MemoryStore::new(cloud.clone(), "eu-west-1");
        let provider = MemoryStoreProvider::new(cloud.clone());

        let err = replicate(&task(None), &dest, &provider).await.unwrap_err();

        assert!(matches!(err, ReplError::Copy { .. }));
        assert_eq!(cloud.stats().acl_reads, 0);
    }

    #[tokio::test]
    async fn test_acl_write_failure_reported() {
        let cloud = setup();
        cloud.fail_op(
            StoreOp::PutAcl,
            "backup",
            StoreError::Service {
                code: "AccessDenied".to_string(),
                message: "denied".to_string(),
            },
        );
        let dest = MemoryStore::new(cloud.clone(), "eu-west-1");
        let provider = MemoryStoreProvider::new(cloud.clone());

        let err = replicate(&task(None), &dest, &provider).await.unwrap_err();

        assert!(matches!(err, ReplError::AclWrite { .. }));
        assert!(cloud.object("backup", "img/1.png").is_some());
    }
}
