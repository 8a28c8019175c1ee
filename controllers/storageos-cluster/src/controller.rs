//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the reconciler to
//! the Kubernetes API and runs the cluster watcher next to the probe and
//! metrics server.

use crate::config::OperatorConfig;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::reconciler::Reconciler;
use crate::server::{self, ServerState};
use crate::watcher::Watcher;
use crds::StorageOSCluster;
use kube::api::ListParams;
use kube::{Api, Client};
use platform_client::KubePlatform;
use prometheus::Registry;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Main controller for StorageOSCluster resources.
#[derive(Debug)]
pub struct Controller {
    cluster_watcher: JoinHandle<Result<(), ControllerError>>,
    probe_server: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates a new controller instance and starts its background tasks.
    pub async fn new(config: OperatorConfig) -> Result<Self, ControllerError> {
        info!("Initializing StorageOS Cluster Controller");

        let kube_client = Client::try_default().await?;

        // Fail early when the CRD is missing or the operator lacks access to it
        info!("Checking access to StorageOSCluster resources...");
        let cluster_api: Api<StorageOSCluster> = match &config.watch_namespace {
            Some(ns) => Api::namespaced(kube_client.clone(), ns),
            None => Api::all(kube_client.clone()),
        };
        let existing = cluster_api.list(&ListParams::default().limit(1)).await.map_err(|e| {
            error!("Failed to list StorageOSCluster resources: {}", e);
            error!("Please ensure:");
            error!("  1. The StorageOSCluster CRD is installed (see the crdgen binary)");
            error!("  2. The operator service account may list, watch and update it");
            ControllerError::Kube(e)
        })?;
        info!(
            "StorageOSCluster API reachable ({} resource(s) on the first page)",
            existing.items.len()
        );

        let registry = Registry::new();
        let metrics = Metrics::new()?.register(&registry)?;
        let state = ServerState::new(registry);

        let platform = Arc::new(KubePlatform::new(kube_client.clone()));
        let reconciler = Arc::new(Reconciler::new(platform, metrics));
        let watcher = Watcher::new(kube_client, reconciler, config.clone(), state.clone());

        let cluster_watcher = tokio::spawn(async move { watcher.watch_clusters().await });

        let probe_server = {
            let addr = config.metrics_addr;
            tokio::spawn(async move { server::serve(addr, state).await })
        };

        Ok(Self {
            cluster_watcher,
            probe_server,
        })
    }

    /// Runs the controller until shutdown.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("StorageOS Cluster Controller running");

        // The watcher returns on a shutdown signal; the server only on failure
        tokio::select! {
            result = &mut self.cluster_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("StorageOSCluster watcher panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("StorageOSCluster watcher error: {}", e)))?;
            }
            result = &mut self.probe_server => {
                result.map_err(|e| ControllerError::Watch(format!("Probe server panicked: {}", e)))??;
            }
        }

        self.probe_server.abort();
        self.cluster_watcher.abort();
        info!("StorageOS Cluster Controller stopped");
        Ok(())
    }
}
