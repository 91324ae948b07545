//! Object remover: forwards a deletion to one destination.

use crate::error::{ReplError, Result};
use crate::store::ObjectStore;
use crate::task::ReplicationTask;

/// Deletes `task.key` from the destination and waits until it is gone.
pub async fn remove(task: &ReplicationTask, destination: &dyn ObjectStore) -> Result<()> {
    destination
        .delete_object(&task.destination_bucket, &task.key)
        .await
        .map_err(|e| ReplError::Delete {
            key: task.key.clone(),
            to: task.destination_bucket.clone(),
            source: e,
        })?;

    destination
        .wait_until_not_exists(&task.destination_bucket, &task.key)
        .await
        .map_err(|e| ReplError::WaitNotExists {
            key: task.key.clone(),
            to: task.destination_bucket.clone(),
            source: e,
        })
}
