//! Replication rule table: per-source-bucket destinations, default region and ACL.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{ReplError, Result};

/// Separator between a destination bucket and its explicit region.
pub const REGION_SEPARATOR: char = '@';

/// A configured replication target, `bucket` or `bucket@region`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DestinationSpec {
    bucket: String,
    region: Option<String>,
}

impl DestinationSpec {
    /// Creates a destination without an explicit region.
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            region: None,
        }
    }

    /// Sets the explicit region.
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Destination bucket name.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Explicit region, if the destination carried one.
    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }
}

impl FromStr for DestinationSpec {
    type Err = ReplError;

    fn from_str(s: &str) -> Result<Self> {
        let (bucket, region) = match s.split_once(REGION_SEPARATOR) {
            Some((bucket, region)) => (bucket, Some(region)),
            None => (s, None),
        };

        let bucket = bucket.trim();
        if bucket.is_empty() {
            return Err(ReplError::Config {
                msg: format!("destination {:?} has no bucket name", s),
            });
        }

        Ok(Self {
            bucket: bucket.to_string(),
            region: region
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string),
        })
    }
}

impl TryFrom<String> for DestinationSpec {
    type Error = ReplError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<DestinationSpec> for String {
    fn from(spec: DestinationSpec) -> Self {
        spec.to_string()
    }
}

impl fmt::Display for DestinationSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.region {
            Some(region) => write!(f, "{}{}{}", self.bucket, REGION_SEPARATOR, region),
            None => f.write_str(&self.bucket),
        }
    }
}

/// Replication rule for one source bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationRule {
    /// Region of the source bucket.
    #[serde(default)]
    pub region: String,
    /// Destinations, in configuration order.
    pub destinations: Vec<DestinationSpec>,
    /// Canned ACL applied to every replica. Empty means unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acl: Option<String>,
}

impl ReplicationRule {
    /// Creates a rule with no destinations and no ACL.
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            destinations: Vec::new(),
            acl: None,
        }
    }

    /// Adds a destination.
    pub fn with_destination(mut self, destination: DestinationSpec) -> Self {
        self.destinations.push(destination);
        self
    }

    /// Sets the canned ACL.
    pub fn with_acl(mut self, acl: impl Into<String>) -> Self {
        self.acl = Some(acl.into());
        self
    }

    /// The configured ACL literal, treating an empty string as unset.
    pub fn explicit_acl(&self) -> Option<&str> {
        self.acl.as_deref().filter(|acl| !acl.is_empty())
    }
}

/// Immutable mapping from source bucket to its replication rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleTable {
    rules: BTreeMap<String, ReplicationRule>,
}

impl RuleTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a rule for a source bucket, replacing any previous one.
    pub fn with_rule(mut self, source_bucket: impl Into<String>, rule: ReplicationRule) -> Self {
        self.rules.insert(source_bucket.into(), rule);
        self
    }

    /// Parses and validates a JSON rule table.
    pub fn from_json(data: &[u8]) -> Result<Self> {
        if data.iter().all(u8::is_ascii_whitespace) {
            return Err(ReplError::Config {
                msg: "unable to get configuration".to_string(),
            });
        }

        let table: RuleTable = serde_json::from_slice(data).map_err(|e| ReplError::Config {
            msg: format!("error unmarshal {}", e),
        })?;
        table.validate()?;
        Ok(table)
    }

    /// Checks table-wide invariants.
    ///
    /// Only direct self-references are rejected; chains such as A -> B -> A
    /// are not detected.
    pub fn validate(&self) -> Result<()> {
        if self.rules.is_empty() {
            return Err(ReplError::Config {
                msg: "configuration has no rules".to_string(),
            });
        }

        for (source, rule) in &self.rules {
            if source.is_empty() {
                return Err(ReplError::Config {
                    msg: "rule with empty source bucket".to_string(),
                });
            }
            if let Some(dest) = rule.destinations.iter().find(|d| d.bucket() == source) {
                return Err(ReplError::Config {
                    msg: format!("rule for {} replicates onto itself ({})", source, dest),
                });
            }
        }

        Ok(())
    }

    /// Looks up the rule for a source bucket.
    pub fn rule(&self, source_bucket: &str) -> Option<&ReplicationRule> {
        self.rules.get(source_bucket)
    }

    /// Number of destinations configured for a source bucket (0 if unknown).
    pub fn destination_count(&self, source_bucket: &str) -> usize {
        self.rule(source_bucket)
            .map(|r| r.destinations.len())
            .unwrap_or(0)
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns true if the table holds no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Iterates over `(source_bucket, rule)` pairs in bucket order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ReplicationRule)> {
        self.rules.iter().map(|(k, v)| (k.as_str(), v))
    }
}
