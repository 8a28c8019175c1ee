//! Singleton admission: at most one active cluster per namespace.
//!
//! A cluster is admitted when no sibling holds the namespace (phase
//! `Creating`, `Running` or `Terminating`) and no older sibling is itself
//! waiting for admission. Ties on creation time go to the lexically smaller
//! name, so concurrent passes agree on a single winner.

use super::{ReconcileReport, Reconciler, status};
use crate::error::ControllerError;
use crate::planner;
use chrono::Utc;
use crds::{CLUSTER_FINALIZER, ClusterPhase, StorageOSCluster};
use kube::ResourceExt;
use std::time::Duration;
use tracing::info;

/// Poll interval of a `Pending` cluster, on top of sibling events
pub(crate) const PENDING_REQUEUE: Duration = Duration::from_secs(30);

pub(super) enum Admission {
    /// Stored copy carrying the finalizer and phase `Creating`
    Admitted(StorageOSCluster),
    Blocked(ReconcileReport),
}

/// Name of the sibling keeping `cluster` out, if any.
pub(crate) fn blocker(cluster: &StorageOSCluster, siblings: &[StorageOSCluster]) -> Option<String> {
    siblings
        .iter()
        .filter(|s| !is_same(cluster, s))
        .find(|s| holds_namespace(s) || (is_waiting(s) && precedes(s, cluster)))
        .map(ResourceExt::name_any)
}

fn is_same(a: &StorageOSCluster, b: &StorageOSCluster) -> bool {
    match (&a.metadata.uid, &b.metadata.uid) {
        (Some(x), Some(y)) => x == y,
        _ => a.name_any() == b.name_any(),
    }
}

fn holds_namespace(sibling: &StorageOSCluster) -> bool {
    let phase = sibling.phase();
    phase.is_active() || phase == ClusterPhase::Terminating
}

// Deleted or unplannable siblings will never be admitted, so they must not
// hold up the queue.
fn is_waiting(sibling: &StorageOSCluster) -> bool {
    matches!(sibling.phase(), ClusterPhase::Initial | ClusterPhase::Pending)
        && !sibling.deletion_requested()
        && planner::validate(sibling).is_ok()
}

fn precedes(a: &StorageOSCluster, b: &StorageOSCluster) -> bool {
    match (&a.metadata.creation_timestamp, &b.metadata.creation_timestamp) {
        (Some(x), Some(y)) if x != y => x < y,
        _ => a.name_any() < b.name_any(),
    }
}

impl Reconciler {
    /// Admits `cluster` or parks it in `Pending`.
    pub(super) async fn admit(&self, cluster: StorageOSCluster) -> Result<Admission, ControllerError> {
        let namespace = cluster.namespace().unwrap_or_default();
        let siblings = self.platform.list_clusters(&namespace).await?;

        if let Some(blocker) = blocker(&cluster, &siblings) {
            if cluster.phase() != ClusterPhase::Pending {
                info!(
                    "Cluster {} is Pending: cluster {} is active in the namespace",
                    cluster.key(),
                    blocker
                );
            }
            let status = status::pending(&cluster, &blocker, Utc::now());
            self.write_status(&cluster, &status).await?;
            return Ok(Admission::Blocked(ReconcileReport {
                phase: Some(ClusterPhase::Pending),
                actions: Vec::new(),
                requeue_after: Some(PENDING_REQUEUE),
            }));
        }

        let mut cluster = cluster;
        if !cluster.has_finalizer() {
            let mut finalizers = cluster.finalizers().to_vec();
            finalizers.push(CLUSTER_FINALIZER.to_string());
            cluster = self.platform.update_cluster_finalizers(&cluster, finalizers).await?;
        }
        let status = status::with_phase(&cluster, ClusterPhase::Creating);
        let cluster = self.write_status(&cluster, &status).await?;
        info!("Cluster {} admitted, phase Creating", cluster.key());
        Ok(Admission::Admitted(cluster))
    }
}
