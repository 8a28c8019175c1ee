//! Reconciliation of `StorageOSCluster` resources.
//!
//! One pass, for one cluster:
//! 1. load the cluster; gone means nothing to do
//! 2. deletion requested: mark `Terminating`, tear down, drop the finalizer
//! 3. plan; an invalid spec is reported through the `SpecValid` condition
//! 4. `Initial`/`Pending`: singleton admission against sibling clusters
//! 5. observe, converge, apply
//! 6. re-observe and write the status when it changed
//!
//! Passes are level-triggered and idempotent: every pass starts from the
//! stored state, and a pass that fails half-way is simply run again.
//! Retry policy lives here, not in the lower layers.

mod admission;
mod status;
mod teardown;


use crate::backoff::FibonacciBackoff;
use crate::convergence::{self, Action};
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::observer;
use crate::planner::{self, ValidationError};
use admission::Admission;
use chrono::Utc;
use crds::{ClusterPhase, StorageOSCluster, StorageOSClusterStatus};
use platform_client::{Owner, PlatformClient};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Requeue interval while storage nodes are coming up
pub(crate) const NOT_READY_REQUEUE: Duration = Duration::from_secs(10);

/// Backoff state for a resource
#[derive(Debug, Clone)]
struct BackoffState {
    backoff: FibonacciBackoff,
    error_count: u32,
}

impl BackoffState {
    fn new() -> Self {
        Self {
            backoff: FibonacciBackoff::for_reconcile(),
            error_count: 0,
        }
    }

    fn increment_error(&mut self) {
        self.error_count += 1;
    }

    fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Outcome of one successful pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileReport {
    /// Phase after the pass, `None` when the cluster no longer exists
    pub phase: Option<ClusterPhase>,
    /// Actions applied, excluding no-ops
    pub actions: Vec<Action>,
    /// When to run again regardless of events
    pub requeue_after: Option<Duration>,
}

impl ReconcileReport {
    fn idle(phase: Option<ClusterPhase>) -> Self {
        Self {
            phase,
            actions: Vec::new(),
            requeue_after: None,
        }
    }
}

/// Reconciles StorageOSCluster resources.
pub struct Reconciler {
    pub(crate) platform: Arc<dyn PlatformClient>,
    pub(crate) metrics: Metrics,
    /// Error count tracking per resource (namespace/name -> BackoffState)
    backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler").finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(platform: Arc<dyn PlatformClient>, metrics: Metrics) -> Self {
        Self {
            platform,
            metrics,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Runs one pass for the cluster `namespace/name`.
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<ReconcileReport, ControllerError> {
        let Some(cluster) = self.platform.get_cluster(namespace, name).await? else {
            debug!("Cluster {}/{} not found, nothing to do", namespace, name);
            return Ok(ReconcileReport::idle(None));
        };

        if cluster.deletion_requested() {
            return self.finalize(cluster).await;
        }
        if cluster.phase() == ClusterPhase::Terminating {
            // Terminal; only deletion moves it on
            return Ok(ReconcileReport::idle(Some(ClusterPhase::Terminating)));
        }

        let desired = match planner::plan(&cluster) {
            Ok(desired) => desired,
            Err(e) => return Err(self.reject(&cluster, e).await),
        };

        let cluster = match cluster.phase() {
            ClusterPhase::Initial | ClusterPhase::Pending => match self.admit(cluster).await? {
                Admission::Admitted(cluster) => cluster,
                Admission::Blocked(report) => return Ok(report),
            },
            _ => cluster,
        };

        let owner = Owner::from_cluster(&cluster)
            .ok_or(ControllerError::Validation(ValidationError::MissingIdentity("uid")))?;
        let observed = observer::observe(self.platform.as_ref(), &owner).await?;
        let actions = convergence::converge(&desired, &observed);
        self.apply(&actions).await?;

        let applied: Vec<Action> = actions.into_iter().filter(|a| !a.is_noop()).collect();
        let observed = if applied.is_empty() {
            observed
        } else {
            observer::observe(self.platform.as_ref(), &owner).await?
        };
        let summary = observer::summarize(&observed, cluster.spec.nodes);
        let phase = observer::recommend_phase(&cluster, &summary);
        if phase != cluster.phase() {
            info!("Cluster {}: {} -> {} ({})", cluster.key(), cluster.phase(), phase, summary.ratio());
        }
        let status = status::converged(&cluster, phase, &summary, Utc::now());
        self.write_status(&cluster, &status).await?;

        Ok(ReconcileReport {
            phase: Some(phase),
            actions: applied,
            requeue_after: (!summary.ready).then_some(NOT_READY_REQUEUE),
        })
    }

    /// Records a validation failure on the cluster and returns the error to
    /// hand back to the control loop.
    async fn reject(&self, cluster: &StorageOSCluster, error: ValidationError) -> ControllerError {
        warn!("Cluster {} has an invalid spec: {}", cluster.key(), error);
        let status = status::invalid(cluster, &error, Utc::now());
        if let Err(e) = self.write_status(cluster, &status).await {
            return e;
        }
        ControllerError::Validation(error)
    }

    /// Applies actions in order. The first failure ends the pass.
    pub(crate) async fn apply(&self, actions: &[Action]) -> Result<(), ControllerError> {
        for action in actions {
            match action {
                Action::NoOp(object) => {
                    debug!("{} is up to date", object);
                    continue;
                }
                Action::Create(descriptor) => self.platform.create_object(descriptor).await?,
                Action::Update { desired, payload } => {
                    if desired.kind().recreate_on_update() {
                        self.platform.delete_object(&desired.object).await?;
                        self.platform.create_object(desired).await?;
                    } else {
                        self.platform.replace_object(&desired.object, payload).await?;
                    }
                }
                Action::Delete(object) => self.platform.delete_object(object).await?,
            }
            info!("Applied: {}", action);
            self.metrics.action_applied(action.verb(), action.object().kind.kind());
        }
        Ok(())
    }

    /// Writes `status` unless it matches what is stored. Returns the stored
    /// copy, with its new resourceVersion after a write.
    pub(crate) async fn write_status(
        &self,
        cluster: &StorageOSCluster,
        status: &StorageOSClusterStatus,
    ) -> Result<StorageOSCluster, ControllerError> {
        if !status::differs(cluster, status) {
            return Ok(cluster.clone());
        }
        Ok(self.platform.update_cluster_status(cluster, status).await?)
    }

    /// Delay before retrying a failed pass, `None` to wait for a change.
    ///
    /// Invalid specs wait for an edit. Incomplete teardown is polled at a
    /// short fixed interval. Everything else backs off per resource.
    pub fn retry_after(&self, resource_key: &str, error: &ControllerError) -> Option<Duration> {
        if !error.is_retryable() {
            return None;
        }
        if matches!(error, ControllerError::TeardownIncomplete { .. }) {
            return Some(teardown::TEARDOWN_REQUEUE);
        }
        let (backoff, error_count) = self.get_backoff_for_resource(resource_key);
        debug!("Retrying {} in {:?} (error #{})", resource_key, backoff, error_count);
        Some(backoff)
    }

    /// Get the Fibonacci backoff for a resource and count the error.
    ///
    /// Returns (backoff, error_count)
    fn get_backoff_for_resource(&self, resource_key: &str) -> (Duration, u32) {
        match self.backoff_states.lock() {
            Ok(mut states) => {
                let state = states
                    .entry(resource_key.to_string())
                    .or_insert_with(BackoffState::new);
                state.increment_error();
                (state.backoff.next_backoff(), state.error_count)
            }
            Err(e) => {
                warn!("Failed to lock backoff_states: {}, using default backoff", e);
                (FibonacciBackoff::for_reconcile().next_backoff(), 0)
            }
        }
    }

    /// Reset error count for a resource (on successful reconciliation)
    pub fn reset_error(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            if let Some(state) = states.get_mut(resource_key) {
                state.reset();
            }
        }
    }
}
