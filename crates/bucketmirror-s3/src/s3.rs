//! AWS S3 backend for the storage traits.
//!
//! One [`S3Store`] per region; [`S3StoreProvider`] builds them lazily from a
//! shared SDK configuration and caches them.

use async_trait::async_trait;
use aws_sdk_s3::client::Waiters;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_smithy_runtime_api::client::waiters::error::WaiterError;
use aws_sdk_s3::types::{
    AccessControlPolicy, Grant as S3Grant, Grantee as S3Grantee, ObjectCannedAcl, Owner as S3Owner,
    Permission, Type as GranteeType,
};
use aws_sdk_s3::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

use bucketmirror_core::region::normalize_location;
use bucketmirror_core::store::{
    CopyRequest, Grant, Grantee, ObjectAcl, ObjectStore, Owner, StoreProvider, StoreResult, Tag,
};
use bucketmirror_core::StoreError;

/// Settings for the S3 backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct S3BackendConfig {
    /// Existence polls budgeted after a copy or delete.
    pub wait_max_attempts: u32,
    /// Nominal delay between polls, in milliseconds. The waiter's total
    /// budget is `wait_max_attempts * wait_delay_ms`.
    pub wait_delay_ms: u64,
    /// Custom endpoint (S3-compatible services, local testing).
    pub endpoint_url: Option<String>,
    /// Use path-style addressing instead of virtual-hosted buckets.
    pub force_path_style: bool,
}

impl Default for S3BackendConfig {
    fn default() -> Self {
        Self {
            wait_max_attempts: 20,
            wait_delay_ms: 5000,
            endpoint_url: None,
            force_path_style: false,
        }
    }
}

/// Converts an SDK failure into a [`StoreError`].
fn store_error<E, R>(err: SdkError<E, R>) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    match err {
        SdkError::ServiceError(ctx) => {
            let e = ctx.err();
            StoreError::Service {
                code: e.code().unwrap_or("Unknown").to_string(),
                message: e.message().unwrap_or_default().to_string(),
            }
        }
        other => StoreError::Transport {
            msg: DisplayErrorContext(&other).to_string(),
        },
    }
}

fn invalid_request(msg: impl std::fmt::Display) -> StoreError {
    StoreError::Service {
        code: "InvalidRequest".to_string(),
        message: msg.to_string(),
    }
}

/// S3 client bound to one region.
pub struct S3Store {
    client: Client,
    region: String,
    config: S3BackendConfig,
}

impl S3Store {
    /// Wraps an SDK client configured for `region`.
    pub fn new(client: Client, region: impl Into<String>, config: S3BackendConfig) -> Self {
        Self {
            client,
            region: region.into(),
            config,
        }
    }

    /// Upper bound for one existence waiter.
    fn max_wait(&self) -> Duration {
        let attempts = u64::from(self.config.wait_max_attempts.max(1));
        Duration::from_millis(attempts * self.config.wait_delay_ms.max(1))
    }

    fn waiter_error<O, E>(&self, bucket: &str, key: &str, err: WaiterError<O, E>) -> StoreError
    where
        O: std::fmt::Debug,
        E: ProvideErrorMetadata + std::error::Error + std::fmt::Debug + Send + Sync + 'static,
    {
        match err {
            WaiterError::ExceededMaxWait(_) | WaiterError::FailureState(_) => {
                warn!(
                    "Gave up waiting on {}/{} after {:?}",
                    bucket,
                    key,
                    self.max_wait()
                );
                StoreError::WaitTimeout {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                    attempts: self.config.wait_max_attempts,
                }
            }
            other => StoreError::Transport {
                msg: DisplayErrorContext(&other).to_string(),
            },
        }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    fn region(&self) -> &str {
        &self.region
    }

    async fn copy_object(&self, request: &CopyRequest) -> StoreResult<()> {
        debug!("copy_object {} -> {}/{}", request.copy_source, request.bucket, request.key);
        let mut call = self
            .client
            .copy_object()
            .bucket(&request.bucket)
            .key(&request.key)
            .copy_source(&request.copy_source);
        if let Some(acl) = &request.acl {
            call = call.acl(ObjectCannedAcl::from(acl.as_str()));
        }
        call.send().await.map_err(store_error)?;
        Ok(())
    }

    async fn wait_until_exists(&self, bucket: &str, key: &str) -> StoreResult<()> {
        self.client
            .wait_until_object_exists()
            .bucket(bucket)
            .key(key)
            .wait(self.max_wait())
            .await
            .map_err(|e| self.waiter_error(bucket, key, e))?;
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StoreResult<()> {
        debug!("delete_object {}/{}", bucket, key);
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn wait_until_not_exists(&self, bucket: &str, key: &str) -> StoreResult<()> {
        self.client
            .wait_until_object_not_exists()
            .bucket(bucket)
            .key(key)
            .wait(self.max_wait())
            .await
            .map_err(|e| self.waiter_error(bucket, key, e))?;
        Ok(())
    }

    async fn get_object_acl(&self, bucket: &str, key: &str) -> StoreResult<ObjectAcl> {
        let out = self
            .client
            .get_object_acl()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(store_error)?;

        Ok(ObjectAcl {
            owner: out.owner().and_then(owner_from_s3),
            grants: out.grants().iter().filter_map(grant_from_s3).collect(),
        })
    }

    async fn put_object_acl(&self, bucket: &str, key: &str, acl: &ObjectAcl) -> StoreResult<()> {
        let policy = access_control_policy(acl)?;
        self.client
            .put_object_acl()
            .bucket(bucket)
            .key(key)
            .access_control_policy(policy)
            .send()
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn get_object_tagging(&self, bucket: &str, key: &str) -> StoreResult<Vec<Tag>> {
        let out = self
            .client
            .get_object_tagging()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(store_error)?;

        Ok(out
            .tag_set()
            .iter()
            .map(|t| Tag::new(t.key(), t.value()))
            .collect())
    }

    async fn bucket_region(&self, bucket: &str) -> StoreResult<String> {
        let out = self
            .client
            .get_bucket_location()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| match store_error(e) {
                StoreError::Service { code, .. } if code == "NoSuchBucket" || code == "NotFound" => {
                    StoreError::NoSuchBucket {
                        bucket: bucket.to_string(),
                    }
                }
                other => other,
            })?;

        Ok(normalize_location(
            out.location_constraint().map(|c| c.as_str()),
        ))
    }
}

fn owner_from_s3(owner: &S3Owner) -> Option<Owner> {
    owner.id().map(|id| Owner {
        id: id.to_string(),
        display_name: owner.display_name().map(str::to_string),
    })
}

fn grant_from_s3(grant: &S3Grant) -> Option<Grant> {
    let grantee = grant.grantee()?;
    let grantee = match grantee.r#type() {
        GranteeType::CanonicalUser => Grantee::CanonicalUser {
            id: grantee.id()?.to_string(),
            display_name: grantee.display_name().map(str::to_string),
        },
        GranteeType::Group => Grantee::Group {
            uri: grantee.uri()?.to_string(),
        },
        GranteeType::AmazonCustomerByEmail => Grantee::Email {
            address: grantee.email_address()?.to_string(),
        },
        other => {
            warn!("Skipping grant with unsupported grantee type {:?}", other);
            return None;
        }
    };

    Some(Grant {
        grantee,
        permission: grant.permission()?.as_str().to_string(),
    })
}

fn access_control_policy(acl: &ObjectAcl) -> StoreResult<AccessControlPolicy> {
    let grants = acl
        .grants
        .iter()
        .map(|g| {
            let builder = match &g.grantee {
                Grantee::CanonicalUser { id, display_name } => S3Grantee::builder()
                    .r#type(GranteeType::CanonicalUser)
                    .id(id)
                    .set_display_name(display_name.clone()),
                Grantee::Group { uri } => S3Grantee::builder().r#type(GranteeType::Group).uri(uri),
                Grantee::Email { address } => S3Grantee::builder()
                    .r#type(GranteeType::AmazonCustomerByEmail)
                    .email_address(address),
            };
            let grantee = builder.build().map_err(invalid_request)?;
            Ok(S3Grant::builder()
                .grantee(grantee)
                .permission(Permission::from(g.permission.as_str()))
                .build())
        })
        .collect::<StoreResult<Vec<_>>>()?;

    let owner = acl.owner.as_ref().map(|o| {
        S3Owner::builder()
            .id(&o.id)
            .set_display_name(o.display_name.clone())
            .build()
    });

    Ok(AccessControlPolicy::builder()
        .set_grants(Some(grants))
        .set_owner(owner)
        .build())
}

/// Builds and caches one [`S3Store`] per region.
pub struct S3StoreProvider {
    sdk_config: aws_config::SdkConfig,
    config: S3BackendConfig,
    stores: Mutex<HashMap<String, Arc<S3Store>>>,
}

impl S3StoreProvider {
    /// Creates a provider over an already loaded SDK configuration.
    pub fn new(sdk_config: aws_config::SdkConfig, config: S3BackendConfig) -> Self {
        Self {
            sdk_config,
            config,
            stores: Mutex::new(HashMap::new()),
        }
    }

    /// Loads credentials and defaults from the environment.
    pub async fn from_env(config: S3BackendConfig) -> Self {
        let sdk_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(sdk_config, config)
    }

    fn build_store(&self, region: &str) -> S3Store {
        let mut builder = aws_sdk_s3::config::Builder::from(&self.sdk_config)
            .region(aws_sdk_s3::config::Region::new(region.to_string()))
            .force_path_style(self.config.force_path_style);
        if let Some(endpoint) = &self.config.endpoint_url {
            builder = builder.endpoint_url(endpoint);
        }
        let client = Client::from_conf(builder.build());
        S3Store::new(client, region, self.config.clone())
    }
}

#[async_trait]
impl StoreProvider for S3StoreProvider {
    async fn store_for_region(&self, region: &str) -> StoreResult<Arc<dyn ObjectStore>> {
        if region.trim().is_empty() {
            return Err(invalid_request("empty region"));
        }

        let mut stores = self.stores.lock().map_err(|_| StoreError::Transport {
            msg: "client cache poisoned".to_string(),
        })?;
        let store: Arc<dyn ObjectStore> = stores
            .entry(region.to_string())
            .or_insert_with(|| {
                debug!("Creating S3 client for region {}", region);
                Arc::new(self.build_store(region))
            })
            .clone();
        Ok(store)
    }
}
