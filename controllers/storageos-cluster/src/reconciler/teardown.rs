//! Finalization of a deleted cluster.
//!
//! Dependents are removed one ordering class at a time, in teardown order.
//! A class must be fully gone before the next one is touched; until then the
//! pass ends with [`ControllerError::TeardownIncomplete`] and the finalizer
//! stays in place.

use super::{ReconcileReport, Reconciler, status};
use crate::convergence;
use crate::error::ControllerError;
use crate::observer;
use crate::planner::ValidationError;
use crds::{CLUSTER_FINALIZER, ClusterPhase, StorageOSCluster};
use kube::ResourceExt;
use platform_client::{OrderingClass, Owner};
use tracing::{debug, info};

/// Short retry of an incomplete teardown, independent of error backoff
pub(crate) const TEARDOWN_REQUEUE: std::time::Duration = std::time::Duration::from_secs(5);

impl Reconciler {
    pub(super) async fn finalize(&self, cluster: StorageOSCluster) -> Result<ReconcileReport, ControllerError> {
        if !cluster.has_finalizer() {
            debug!("Cluster {} is being deleted without our finalizer", cluster.key());
            return Ok(ReconcileReport::idle(Some(ClusterPhase::Terminating)));
        }

        let mut cluster = cluster;
        if cluster.phase() != ClusterPhase::Terminating {
            info!("Cluster {} is Terminating", cluster.key());
            let status = status::with_phase(&cluster, ClusterPhase::Terminating);
            cluster = self.write_status(&cluster, &status).await?;
        }

        let owner = Owner::from_cluster(&cluster)
            .ok_or(ControllerError::Validation(ValidationError::MissingIdentity("uid")))?;

        let mut applied = Vec::new();
        for class in OrderingClass::TEARDOWN_ORDER {
            let observed = observer::observe_class(self.platform.as_ref(), &owner, class).await?;
            if observed.is_empty() {
                continue;
            }
            let actions = convergence::teardown(&observed);
            self.apply(&actions).await?;
            applied.extend(actions.into_iter().filter(|a| !a.is_noop()));

            let remaining = observer::observe_class(self.platform.as_ref(), &owner, class).await?;
            if !remaining.is_empty() {
                debug!(
                    "Cluster {}: waiting on {} {:?} object(s)",
                    cluster.key(),
                    remaining.len(),
                    class
                );
                return Err(ControllerError::TeardownIncomplete {
                    cluster: cluster.key(),
                    remaining: remaining.len(),
                });
            }
        }

        let finalizers: Vec<String> = cluster
            .finalizers()
            .iter()
            .filter(|f| f.as_str() != CLUSTER_FINALIZER)
            .cloned()
            .collect();
        self.platform.update_cluster_finalizers(&cluster, finalizers).await?;
        info!("Cluster {} torn down, finalizer removed", cluster.key());

        Ok(ReconcileReport {
            phase: Some(ClusterPhase::Terminating),
            actions: applied,
            requeue_after: None,
        })
    }
}
