//! Destination region resolution.

use std::sync::Arc;
use tracing::{debug, error};

use crate::error::{ReplError, Result, StoreError};
use crate::rules::DestinationSpec;
use crate::store::StoreProvider;

/// Region used as the entry point for bucket location lookups.
pub const DEFAULT_PROBE_REGION: &str = "us-east-1";

/// Resolved destination: bucket plus the region it lives in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDestination {
    /// Region of the destination bucket.
    pub region: String,
    /// Destination bucket name.
    pub bucket: String,
}

/// Resolves the region of destination buckets.
pub struct RegionResolver {
    provider: Arc<dyn StoreProvider>,
    probe_region: String,
}

impl RegionResolver {
    /// Creates a resolver that probes through `probe_region`.
    pub fn new(provider: Arc<dyn StoreProvider>, probe_region: impl Into<String>) -> Self {
        Self {
            provider,
            probe_region: probe_region.into(),
        }
    }

    /// Region used for lookups.
    pub fn probe_region(&self) -> &str {
        &self.probe_region
    }

    /// Resolves `destination`.
    ///
    /// An explicit `@region` suffix wins without any lookup. Otherwise the
    /// bucket location is looked up once. A missing bucket is reported as
    /// [`ReplError::FatalConfiguration`]; the caller decides whether that ends
    /// the process.
    pub async fn resolve(
        &self,
        destination: &DestinationSpec,
        source_default_region: &str,
    ) -> Result<ResolvedDestination> {
        let bucket = destination.bucket().to_string();

        if let Some(region) = destination.region() {
            return Ok(ResolvedDestination {
                region: region.to_string(),
                bucket,
            });
        }

        let probe = self
            .provider
            .store_for_region(&self.probe_region)
            .await
            .map_err(|e| ReplError::Session {
                bucket: bucket.clone(),
                region: self.probe_region.clone(),
                msg: e.to_string(),
            })?;

        match probe.bucket_region(&bucket).await {
            Ok(region) => {
                debug!(
                    "Resolved region of {} to {} (source default {})",
                    bucket, region, source_default_region
                );
                Ok(ResolvedDestination { region, bucket })
            }
            Err(StoreError::NoSuchBucket { .. }) => {
                error!("Unable to find bucket {}'s region: bucket not found", bucket);
                Err(ReplError::FatalConfiguration { bucket })
            }
            Err(e) => Err(ReplError::Session {
                bucket,
                region: self.probe_region.clone(),
                msg: e.to_string(),
            }),
        }
    }
}

/// Normalizes an S3 location constraint into a region name.
///
/// An empty constraint means `us-east-1`; the legacy `EU` constraint means
/// `eu-west-1`.
pub fn normalize_location(constraint: Option<&str>) -> String {
    match constraint.map(str::trim) {
        None | Some("") => "us-east-1".to_string(),
        Some("EU") => "eu-west-1".to_string(),
        Some(region) => region.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryCloud, MemoryStoreProvider};

    fn resolver(cloud: &Arc<MemoryCloud>) -> RegionResolver {
        RegionResolver::new(
            Arc::new(MemoryStoreProvider::new(cloud.clone())),
            DEFAULT_PROBE_REGION,
        )
    }

    #[tokio::test]
    async fn test_explicit_region_skips_lookup() {
        let cloud = Arc::new(MemoryCloud::new());
        let spec = DestinationSpec::new("backup").with_region("eu-west-1");

        let resolved = resolver(&cloud).resolve(&spec, "us-east-1").await.unwrap();

        assert_eq!(resolved.region, "eu-west-1");
        assert_eq!(resolved.bucket, "backup");
        assert_eq!(cloud.stats().location_lookups, 0);
    }

    #[tokio::test]
    async fn test_lookup_when_no_region() {
        let cloud = Arc::new(MemoryCloud::new());
        cloud.create_bucket("backup", "ap-south-1");
        let spec = DestinationSpec::new("backup");

        let resolved = resolver(&cloud).resolve(&spec, "us-east-1").await.unwrap();

        assert_eq!(resolved.region, "ap-south-1");
        assert_eq!(cloud.stats().location_lookups, 1);
    }

    #[tokio::test]
    async fn test_missing_bucket_is_fatal() {
        let cloud = Arc::new(MemoryCloud::new());
        let spec = DestinationSpec::new("ghost");

        let err = resolver(&cloud).resolve(&spec, "us-east-1").await.unwrap_err();

        assert_eq!(
            err,
            ReplError::FatalConfiguration {
                bucket: "ghost".to_string()
            }
        );
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_lookup_region_session_failure() {
        let cloud = Arc::new(MemoryCloud::new());
        cloud.create_bucket("backup", "eu-west-1");
        cloud.refuse_sessions_for("us-east-1");
        let spec = DestinationSpec::new("backup");

        let err = resolver(&cloud).resolve(&spec, "us-east-1").await.unwrap_err();

        assert!(matches!(err, ReplError::Session { .. }));
    }

    #[test]
    fn test_normalize_location() {
        assert_eq!(normalize_location(None), "us-east-1");
        assert_eq!(normalize_location(Some("")), "us-east-1");
        assert_eq!(normalize_location(Some("EU")), "eu-west-1");
        assert_eq!(normalize_location(Some("eu-central-1")), "eu-central-1");
    }
}
