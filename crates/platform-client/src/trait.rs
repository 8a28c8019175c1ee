//! PlatformClient trait for mocking
//!
//! This trait abstracts the Kubernetes object store so the reconciler can be
//! unit tested. `KubePlatform` implements it against a live API server and
//! `MockPlatform` (feature `test-util`) keeps objects in memory.

use crate::error::PlatformError;
use crate::models::*;
use crds::{StorageOSCluster, StorageOSClusterStatus};
use serde_json::Value;

/// Trait for platform object store operations
///
/// Writes to the cluster resource carry its `resourceVersion`, so a write
/// based on a stale copy fails with [`PlatformError::Conflict`].
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait PlatformClient: Send + Sync {
    // StorageOSCluster operations
    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<StorageOSCluster>, PlatformError>;
    async fn list_clusters(&self, namespace: &str) -> Result<Vec<StorageOSCluster>, PlatformError>;
    async fn update_cluster_status(&self, cluster: &StorageOSCluster, status: &StorageOSClusterStatus) -> Result<StorageOSCluster, PlatformError>;
    async fn update_cluster_finalizers(&self, cluster: &StorageOSCluster, finalizers: Vec<String>) -> Result<StorageOSCluster, PlatformError>;

    // Dependent object operations
    /// Lists objects of `kind` matching a label selector. `namespace` is
    /// ignored for cluster-scoped kinds.
    async fn list_objects(&self, kind: ObjectKind, namespace: &str, selector: &str) -> Result<Vec<ObservedObject>, PlatformError>;
    async fn create_object(&self, descriptor: &Descriptor) -> Result<(), PlatformError>;
    /// Replaces an object. `payload` must carry the observed `resourceVersion`.
    async fn replace_object(&self, object: &ObjectRef, payload: &Value) -> Result<(), PlatformError>;
    /// Deletes an object. Deleting an object that is already gone succeeds.
    async fn delete_object(&self, object: &ObjectRef) -> Result<(), PlatformError>;
}
