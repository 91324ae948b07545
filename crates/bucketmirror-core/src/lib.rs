#![warn(missing_docs)]

//! bucketmirror replication engine: event classification, region resolution,
//! concurrent per-destination copy/delete fan-out, ACL propagation and the
//! quarantine gate.

pub mod engine;
pub mod error;
pub mod event;
pub mod executor;
pub mod memory;
pub mod quarantine;
pub mod region;
pub mod remover;
pub mod replicator;
pub mod rules;
pub mod store;
pub mod task;

pub use engine::{BatchReport, EngineConfig, ReplicationEngine};
pub use error::{ReplError, Result, StoreError};
pub use event::{Action, EventKind, NotificationBatch, NotificationRecord};
pub use executor::{CancelPolicy, JoinPolicy};
pub use rules::{DestinationSpec, ReplicationRule, RuleTable};
pub use store::{ObjectAcl, ObjectStore, StoreProvider, Tag};
