//! The replication engine: classifies a notification batch, fans tasks out
//! per (record, destination) and folds their results into a batch report.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::error::{ReplError, Result};
use crate::event::{classify, Action, ChangeRecord, ClassifiedBatch, EventKind, NotificationBatch};
use crate::executor::{CancelPolicy, Executor, JoinPolicy};
use crate::quarantine;
use crate::region::{RegionResolver, DEFAULT_PROBE_REGION};
use crate::rules::{DestinationSpec, ReplicationRule, RuleTable};
use crate::store::StoreProvider;
use crate::task::{ReplicationTask, TaskId, TaskOutcome};

/// Configuration for the replication engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Region used as the entry point for bucket location lookups.
    pub probe_region: String,
    /// Maximum number of tasks talking to the cloud at once.
    pub max_concurrent_tasks: usize,
    /// How the fan-in waits for results.
    pub join_policy: JoinPolicy,
    /// Whether running tasks stop after the first failure.
    pub cancel_policy: CancelPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            probe_region: DEFAULT_PROBE_REGION.to_string(),
            max_concurrent_tasks: 64,
            join_policy: JoinPolicy::FailFast,
            cancel_policy: CancelPolicy::Detach,
        }
    }
}

impl EngineConfig {
    /// Checks the settings.
    pub fn validate(&self) -> Result<()> {
        if self.probe_region.is_empty() {
            return Err(ReplError::Config {
                msg: "probe region must not be empty".to_string(),
            });
        }
        if self.max_concurrent_tasks == 0 {
            return Err(ReplError::Config {
                msg: "max_concurrent_tasks must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Summary of one replication pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    /// Identifier used in log lines for this pass.
    pub batch_id: Uuid,
    /// Kind of the batch; `None` when the batch was empty.
    pub kind: Option<EventKind>,
    /// Number of records in the batch.
    pub records: usize,
    /// Number of tasks dispatched.
    pub dispatched: usize,
    /// Results received, in arrival order.
    pub outcomes: Vec<TaskOutcome>,
}

impl BatchReport {
    fn empty(batch_id: Uuid, kind: Option<EventKind>, records: usize) -> Self {
        Self {
            batch_id,
            kind,
            records,
            dispatched: 0,
            outcomes: Vec::new(),
        }
    }

    /// Returns true if nothing was dispatched.
    pub fn is_noop(&self) -> bool {
        self.dispatched == 0
    }
}

/// The central replication engine.
///
/// Holds the rule table read-only for its whole lifetime.
pub struct ReplicationEngine {
    config: EngineConfig,
    rules: Arc<RuleTable>,
    provider: Arc<dyn StoreProvider>,
    resolver: RegionResolver,
}

impl ReplicationEngine {
    /// Creates an engine over a loaded rule table.
    pub fn new(config: EngineConfig, rules: Arc<RuleTable>, provider: Arc<dyn StoreProvider>) -> Self {
        let resolver = RegionResolver::new(provider.clone(), config.probe_region.clone());
        Self {
            config,
            rules,
            provider,
            resolver,
        }
    }

    /// The rule table in use.
    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    /// Engine settings.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Decodes a raw notification document and processes it.
    pub async fn handle_event(&self, raw: &[u8]) -> Result<BatchReport> {
        let batch = NotificationBatch::from_json(raw)?;
        self.process_batch(&batch).await
    }

    /// Processes one notification batch.
    ///
    /// Returns the first failure by arrival order. A quarantined record, a
    /// failed region resolution or a missing regional client stops dispatch
    /// for the rest of the batch; tasks already running are left alone.
    pub async fn process_batch(&self, batch: &NotificationBatch) -> Result<BatchReport> {
        let batch_id = Uuid::new_v4();
        let span = tracing::info_span!("batch", id = %batch_id);

        async move {
            match classify(batch)? {
                Some(classified) => self.process_classified(batch_id, classified).await,
                None => {
                    info!("Empty notification batch, nothing to replicate");
                    Ok(BatchReport::empty(batch_id, None, batch.records.len()))
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn process_classified(&self, batch_id: Uuid, batch: ClassifiedBatch) -> Result<BatchReport> {
        info!("S3 event: {:?} ({} records)", batch.kind, batch.records.len());

        let action = match batch.kind.action() {
            Some(action) => action,
            None => {
                info!("Ignoring event {}", batch.records[0].event_name);
                return Ok(BatchReport::empty(batch_id, Some(batch.kind), batch.records.len()));
            }
        };

        let expected: usize = batch
            .records
            .iter()
            .map(|r| self.rules.destination_count(&r.bucket))
            .sum();
        let mut executor = Executor::new(
            expected,
            self.config.max_concurrent_tasks,
            self.config.join_policy,
            self.config.cancel_policy,
            self.provider.clone(),
        );

        for (index, record) in batch.records.iter().enumerate() {
            if let Err(e) = self.dispatch_record(&mut executor, batch.kind, action, index, record).await {
                warn!("Stopping dispatch for {}/{}: {}", record.bucket, record.key, e);
                executor.abandon();
                return Err(e);
            }
        }

        let fan_in = executor.join().await;
        if let Some(e) = fan_in.first_failure {
            return Err(e);
        }

        info!("Completed {} tasks", fan_in.dispatched);
        Ok(BatchReport {
            batch_id,
            kind: Some(batch.kind),
            records: batch.records.len(),
            dispatched: fan_in.dispatched,
            outcomes: fan_in.outcomes,
        })
    }

    async fn dispatch_record(
        &self,
        executor: &mut Executor,
        kind: EventKind,
        action: Action,
        index: usize,
        record: &ChangeRecord,
    ) -> Result<()> {
        let rule = match self.rules.rule(&record.bucket) {
            Some(rule) if !rule.destinations.is_empty() => rule,
            _ => {
                warn!("No replication rule for bucket {}", record.bucket);
                return Ok(());
            }
        };

        let acl = match action {
            Action::Copy => rule.explicit_acl().map(str::to_string),
            Action::Delete => None,
        };

        // The source region is only needed to read tags or the source ACL.
        let needs_source = kind.requires_quarantine_check() || (action == Action::Copy && acl.is_none());
        let source_region = if needs_source {
            self.source_region(rule, &record.bucket).await?
        } else {
            rule.region.clone()
        };

        if kind.requires_quarantine_check() {
            self.check_quarantine(&source_region, record).await?;
        }

        for (dest_index, destination) in rule.destinations.iter().enumerate() {
            let resolved = self.resolver.resolve(destination, &rule.region).await?;

            info!(
                action = action.verb(),
                source = %record.bucket,
                key = %record.key,
                destination = %resolved.bucket,
                region = %resolved.region,
                "{} {} {} to {} in {}",
                action.verb(),
                record.bucket,
                record.key,
                resolved.bucket,
                resolved.region
            );

            let store = self
                .provider
                .store_for_region(&resolved.region)
                .await
                .map_err(|e| ReplError::Session {
                    bucket: resolved.bucket.clone(),
                    region: resolved.region.clone(),
                    msg: e.to_string(),
                })?;

            executor.dispatch(
                ReplicationTask {
                    id: TaskId::new(index, dest_index),
                    action,
                    source_bucket: record.bucket.clone(),
                    source_region: source_region.clone(),
                    destination_bucket: resolved.bucket,
                    destination_region: resolved.region,
                    key: record.key.clone(),
                    acl: acl.clone(),
                },
                store,
            );
        }

        Ok(())
    }

    /// Region of a source bucket: the rule's region, or a location lookup
    /// when the rule leaves it empty.
    async fn source_region(&self, rule: &ReplicationRule, bucket: &str) -> Result<String> {
        if !rule.region.is_empty() {
            return Ok(rule.region.clone());
        }
        let resolved = self
            .resolver
            .resolve(&DestinationSpec::new(bucket), &self.config.probe_region)
            .await?;
        Ok(resolved.region)
    }

    async fn check_quarantine(&self, region: &str, record: &ChangeRecord) -> Result<()> {
        let source = self
            .provider
            .store_for_region(region)
            .await
            .map_err(|e| ReplError::Session {
                bucket: record.bucket.clone(),
                region: region.to_string(),
                msg: e.to_string(),
            })?;

        quarantine::admit(source.as_ref(), &record.bucket, &record.key).await
    }
}
