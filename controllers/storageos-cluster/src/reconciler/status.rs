//! Status documents written back onto the cluster.

use crate::observer::ReadinessSummary;
use crate::planner::ValidationError;
use chrono::{DateTime, Utc};
use crds::{ClusterCondition, ClusterPhase, StorageOSCluster, StorageOSClusterStatus};

pub(crate) const READY_CONDITION: &str = "Ready";
pub(crate) const SPEC_VALID_CONDITION: &str = "SpecValid";

fn current(cluster: &StorageOSCluster) -> StorageOSClusterStatus {
    cluster.status.clone().unwrap_or_default()
}

/// Current status with only the phase changed.
pub(super) fn with_phase(cluster: &StorageOSCluster, phase: ClusterPhase) -> StorageOSClusterStatus {
    let mut status = current(cluster);
    status.phase = phase;
    status
}

/// Status of an admitted cluster after a convergence pass.
pub(super) fn converged(
    cluster: &StorageOSCluster,
    phase: ClusterPhase,
    summary: &ReadinessSummary,
    now: DateTime<Utc>,
) -> StorageOSClusterStatus {
    let mut status = current(cluster);
    status.phase = phase;
    status.ready = Some(summary.ratio());
    status.ready_nodes = summary.ready_nodes;
    status.desired_nodes = summary.desired_nodes;
    status.members = summary.members.clone();
    status.observed_generation = cluster.metadata.generation;
    status.set_condition(
        ClusterCondition::new(SPEC_VALID_CONDITION, true, "Valid", ""),
        now,
    );
    let condition = if summary.ready {
        ClusterCondition::new(READY_CONDITION, true, "NodesReady", summary.ratio())
    } else {
        ClusterCondition::new(READY_CONDITION, false, "NodesNotReady", summary.ratio())
    };
    status.set_condition(condition, now);
    status
}

/// Status of a cluster whose spec cannot be planned. The phase is kept.
pub(super) fn invalid(
    cluster: &StorageOSCluster,
    error: &ValidationError,
    now: DateTime<Utc>,
) -> StorageOSClusterStatus {
    let mut status = current(cluster);
    status.observed_generation = cluster.metadata.generation;
    status.set_condition(
        ClusterCondition::new(SPEC_VALID_CONDITION, false, "InvalidSpec", error.to_string()),
        now,
    );
    status
}

/// Status of a cluster held back by admission.
pub(super) fn pending(cluster: &StorageOSCluster, blocker: &str, now: DateTime<Utc>) -> StorageOSClusterStatus {
    let mut status = with_phase(cluster, ClusterPhase::Pending);
    status.observed_generation = cluster.metadata.generation;
    status.set_condition(
        ClusterCondition::new(SPEC_VALID_CONDITION, true, "Valid", ""),
        now,
    );
    status.set_condition(
        ClusterCondition::new(
            READY_CONDITION,
            false,
            "Pending",
            format!("waiting for cluster {} to be removed", blocker),
        ),
        now,
    );
    status
}

/// Whether writing `status` would change what is stored.
pub(super) fn differs(cluster: &StorageOSCluster, status: &StorageOSClusterStatus) -> bool {
    match &cluster.status {
        Some(stored) => !stored.same_as(status),
        None => true,
    }
}
