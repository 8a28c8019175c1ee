//! StorageOS Cluster Controller
//!
//! Converges `StorageOSCluster` resources into running storage clusters:
//! - plans the dependent objects (RBAC, configuration, one workload per
//!   storage node, storage class, CSI driver and admission webhook)
//! - creates, updates and deletes them in dependency order
//! - admits at most one active cluster per namespace
//! - tears everything down behind a finalizer when the cluster is deleted
//!
//! Configuration comes from environment variables, see [`config`].

mod backoff;
mod config;
mod controller;
mod convergence;
mod error;
mod metrics;
mod observer;
mod planner;
mod reconciler;
mod server;
mod watcher;

#[cfg(test)]
mod test_utils;

use crate::config::OperatorConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("A rustls crypto provider was already installed");
    }

    info!("Starting StorageOS Cluster Controller");

    let config = OperatorConfig::from_env()?;
    info!("Configuration:");
    info!(
        "  Namespace: {}",
        config.watch_namespace.as_deref().unwrap_or("all namespaces")
    );
    info!("  Probe/metrics address: {}", config.metrics_addr);
    info!("  Concurrency: {}", config.concurrency);
    info!("  Debounce: {:?}", config.debounce);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
