//! Fan-out / fan-in of replication tasks.
//!
//! Every dispatched task runs on its own tokio task and reports exactly one
//! [`TaskOutcome`] over a shared completion channel. The fan-in counts
//! results rather than waiting on handles: it stops after as many results as
//! tasks were dispatched, or at the first failure under
//! [`JoinPolicy::FailFast`]. Tasks still running at that point are neither
//! awaited nor (by default) cancelled.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{ReplError, Result};
use crate::event::Action;
use crate::remover::remove;
use crate::replicator::replicate;
use crate::store::{ObjectStore, StoreProvider};
use crate::task::{ReplicationTask, TaskOutcome};

/// How the fan-in waits for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JoinPolicy {
    /// Return as soon as the first failure arrives.
    #[default]
    FailFast,
    /// Receive every result, then report the first failure by arrival.
    WaitAll,
}

/// What happens to running tasks after the first failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CancelPolicy {
    /// The cancellation token is set but tasks ignore it.
    #[default]
    Detach,
    /// Tasks stop at their next cloud call once the token is set.
    Abort,
}

impl std::str::FromStr for JoinPolicy {
    type Err = ReplError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "fail-fast" => Ok(Self::FailFast),
            "wait-all" => Ok(Self::WaitAll),
            other => Err(ReplError::Config {
                msg: format!("unknown join policy {:?} (fail-fast, wait-all)", other),
            }),
        }
    }
}

impl std::str::FromStr for CancelPolicy {
    type Err = ReplError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "detach" => Ok(Self::Detach),
            "abort" => Ok(Self::Abort),
            other => Err(ReplError::Config {
                msg: format!("unknown cancel policy {:?} (detach, abort)", other),
            }),
        }
    }
}

/// What the fan-in collected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanIn {
    /// Number of tasks dispatched.
    pub dispatched: usize,
    /// Results received, in arrival order.
    pub outcomes: Vec<TaskOutcome>,
    /// First failure by arrival order.
    pub first_failure: Option<ReplError>,
}

/// Dispatches replication tasks and joins their results.
pub struct Executor {
    tx: mpsc::Sender<TaskOutcome>,
    rx: mpsc::Receiver<TaskOutcome>,
    dispatched: usize,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
    join_policy: JoinPolicy,
    cancel_policy: CancelPolicy,
    provider: Arc<dyn StoreProvider>,
}

impl Executor {
    /// Creates an executor for a batch expected to dispatch `expected_tasks`.
    ///
    /// The completion channel is sized to `expected_tasks` so that tasks
    /// finishing after the fan-in returned never block on send.
    pub fn new(
        expected_tasks: usize,
        max_concurrent_tasks: usize,
        join_policy: JoinPolicy,
        cancel_policy: CancelPolicy,
        provider: Arc<dyn StoreProvider>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(expected_tasks.max(1));
        Self {
            tx,
            rx,
            dispatched: 0,
            permits: Arc::new(Semaphore::new(max_concurrent_tasks.max(1))),
            cancel: CancellationToken::new(),
            join_policy,
            cancel_policy,
            provider,
        }
    }

    /// Number of tasks dispatched so far.
    pub fn dispatched(&self) -> usize {
        self.dispatched
    }

    /// Token set on the first failure.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Sets the cancellation token without joining, e.g. when dispatch is
    /// abandoned halfway through a batch.
    pub fn abandon(&self) {
        self.cancel.cancel();
    }

    /// Spawns `task` against `store`, a client for the task's destination region.
    pub fn dispatch(&mut self, task: ReplicationTask, store: Arc<dyn ObjectStore>) {
        let tx = self.tx.clone();
        let permits = self.permits.clone();
        let cancel = self.cancel.clone();
        let provider = self.provider.clone();
        let cancel_policy = self.cancel_policy;

        self.dispatched += 1;
        tokio::spawn(async move {
            let result = run_task(
                &task,
                store.as_ref(),
                provider.as_ref(),
                &permits,
                &cancel,
                cancel_policy,
            )
            .await;
            // The receiver is gone once the fan-in returned early.
            let _ = tx.send(TaskOutcome { id: task.id, result }).await;
        });
    }

    /// Waits for the dispatched tasks' results.
    pub async fn join(self) -> FanIn {
        let Executor {
            tx,
            mut rx,
            dispatched,
            cancel,
            join_policy,
            ..
        } = self;
        drop(tx);

        let mut outcomes = Vec::with_capacity(dispatched);
        let mut first_failure: Option<ReplError> = None;

        while outcomes.len() < dispatched {
            let Some(outcome) = rx.recv().await else {
                first_failure.get_or_insert(ReplError::TaskLost {
                    expected: dispatched,
                    received: outcomes.len(),
                });
                break;
            };

            let failed = match &outcome.result {
                Ok(()) => false,
                Err(e) => {
                    warn!("Task {} failed: {}", outcome.id, e);
                    if first_failure.is_none() {
                        first_failure = Some(e.clone());
                        cancel.cancel();
                    }
                    true
                }
            };
            outcomes.push(outcome);

            if failed && join_policy == JoinPolicy::FailFast {
                break;
            }
        }

        FanIn {
            dispatched,
            outcomes,
            first_failure,
        }
    }
}

async fn run_task(
    task: &ReplicationTask,
    store: &dyn ObjectStore,
    provider: &dyn StoreProvider,
    permits: &Semaphore,
    cancel: &CancellationToken,
    cancel_policy: CancelPolicy,
) -> Result<()> {
    let cancelled = || ReplError::Cancelled {
        key: task.key.clone(),
        to: task.destination_bucket.clone(),
    };

    let _permit = match cancel_policy {
        CancelPolicy::Detach => permits.acquire().await.map_err(|_| cancelled())?,
        CancelPolicy::Abort => tokio::select! {
            _ = cancel.cancelled() => return Err(cancelled()),
            permit = permits.acquire() => permit.map_err(|_| cancelled())?,
        },
    };

    let work = async {
        match task.action {
            Action::Copy => replicate(task, store, provider).await,
            Action::Delete => remove(task, store).await,
        }
    };

    match cancel_policy {
        CancelPolicy::Detach => work.await,
        CancelPolicy::Abort => tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(cancelled()),
            result = work => result,
        },
    }
}
