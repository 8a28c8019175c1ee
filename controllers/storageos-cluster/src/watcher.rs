//! Kubernetes resource watchers.
//!
//! A single `kube_runtime::Controller` drives every pass. Passes for a
//! cluster are queued by:
//! - changes to the `StorageOSCluster` itself
//! - changes to namespaced dependents, through their ownerReferences
//! - changes to cluster-scoped dependents, through their cluster labels
//! - changes to a sibling cluster, so a `Pending` cluster is admitted as soon
//!   as the namespace frees up
//!
//! The controller never runs two passes for the same cluster at once.

use crate::config::OperatorConfig;
use crate::error::ControllerError;
use crate::reconciler::{ReconcileReport, Reconciler};
use crate::server::ServerState;
use crds::{ClusterPhase, StorageOSCluster};
use futures::StreamExt;
use kube::api::DynamicObject;
use kube::{Api, Client, ResourceExt};
use kube_runtime::controller::{Action, Config as ControllerConfig};
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{Controller, watcher};
use platform_client::{
    CLUSTER_LABEL, CLUSTER_NAMESPACE_LABEL, KubePlatform, MANAGED_BY, MANAGED_BY_LABEL, ObjectKind,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Runs one pass and turns its report into the next scheduling decision.
async fn reconcile(cluster: Arc<StorageOSCluster>, reconciler: Arc<Reconciler>) -> Result<Action, ControllerError> {
    let key = cluster.key();
    let namespace = cluster.namespace().unwrap_or_default();
    let name = cluster.name_any();
    debug!("Reconciling StorageOSCluster {}", key);

    let _timer = reconciler.metrics.measure();
    let report = reconciler.reconcile(&namespace, &name).await?;
    reconciler.reset_error(&key);
    reconciler.metrics.reconcile_success();
    Ok(next_action(&report))
}

fn next_action(report: &ReconcileReport) -> Action {
    match report.requeue_after {
        Some(after) => Action::requeue(after),
        None => Action::await_change(),
    }
}

fn error_policy(cluster: Arc<StorageOSCluster>, error: &ControllerError, reconciler: Arc<Reconciler>) -> Action {
    let key = cluster.key();
    reconciler.metrics.reconcile_failure(error);
    match error {
        ControllerError::TeardownIncomplete { .. } => debug!("{}", error),
        ControllerError::Validation(_) => warn!("StorageOSCluster {} waits for a spec change: {}", key, error),
        _ => error!("Reconciliation error for StorageOSCluster {}: {}", key, error),
    }
    match reconciler.retry_after(&key, error) {
        Some(after) => Action::requeue(after),
        None => Action::await_change(),
    }
}

/// Cluster named by the labels of a cluster-scoped dependent.
pub(crate) fn cluster_for_labels(labels: &BTreeMap<String, String>) -> Option<ObjectRef<StorageOSCluster>> {
    let name = labels.get(CLUSTER_LABEL)?;
    let namespace = labels.get(CLUSTER_NAMESPACE_LABEL)?;
    Some(ObjectRef::new(name).within(namespace))
}

/// Clusters in the namespace of `changed` still waiting for admission.
pub(crate) fn waiting_siblings(
    changed: &StorageOSCluster,
    clusters: &[Arc<StorageOSCluster>],
) -> Vec<ObjectRef<StorageOSCluster>> {
    let namespace = changed.namespace();
    clusters
        .iter()
        .filter(|c| c.namespace() == namespace && c.name_any() != changed.name_any())
        .filter(|c| matches!(c.phase(), ClusterPhase::Initial | ClusterPhase::Pending))
        .map(|c| ObjectRef::from_obj(c.as_ref()))
        .collect()
}

/// Watches StorageOSCluster resources and their dependents.
pub struct Watcher {
    client: Client,
    reconciler: Arc<Reconciler>,
    config: OperatorConfig,
    server: ServerState,
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Watcher {
    /// Creates a new watcher instance.
    pub fn new(client: Client, reconciler: Arc<Reconciler>, config: OperatorConfig, server: ServerState) -> Self {
        Self {
            client,
            reconciler,
            config,
            server,
        }
    }

    fn cluster_api(&self) -> Api<StorageOSCluster> {
        match &self.config.watch_namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    fn dependent_api(&self, kind: ObjectKind) -> Api<DynamicObject> {
        let resource = KubePlatform::api_resource(kind);
        match &self.config.watch_namespace {
            Some(ns) if kind.is_namespaced() => Api::namespaced_with(self.client.clone(), ns, &resource),
            _ => Api::all_with(self.client.clone(), &resource),
        }
    }

    /// Starts watching and reconciling until a shutdown signal arrives.
    pub async fn watch_clusters(&self) -> Result<(), ControllerError> {
        info!("Starting StorageOSCluster watcher");

        let dependents = watcher::Config::default().labels(&format!("{}={}", MANAGED_BY_LABEL, MANAGED_BY));
        let mut controller = Controller::new(self.cluster_api(), watcher::Config::default());

        let store = controller.store();
        controller = controller.watches(
            self.cluster_api(),
            watcher::Config::default(),
            move |changed: StorageOSCluster| waiting_siblings(&changed, &store.state()),
        );

        for kind in ObjectKind::ALL {
            let api = self.dependent_api(kind);
            let resource = KubePlatform::api_resource(kind);
            controller = if kind.is_namespaced() {
                controller.owns_with(api, resource, dependents.clone())
            } else {
                controller.watches_with(api, resource, dependents.clone(), |object: DynamicObject| {
                    cluster_for_labels(object.labels())
                })
            };
        }

        let controller_config = ControllerConfig::default()
            .debounce(self.config.debounce)
            .concurrency(self.config.concurrency);

        self.server.set_ready(true);
        controller
            .with_config(controller_config)
            .shutdown_on_signal()
            .run(reconcile, error_policy, self.reconciler.clone())
            .for_each(|res| async move {
                match res {
                    Ok((cluster, _)) => debug!("Reconciled {}", cluster),
                    Err(e) => debug!("Controller error: {}", e),
                }
            })
            .await;
        self.server.set_ready(false);

        info!("StorageOSCluster watcher stopped");
        Ok(())
    }
}
