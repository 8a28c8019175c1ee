//! Kubernetes-backed platform client
//!
//! Dependent objects are read and written as `DynamicObject`s so a single code
//! path serves every [`ObjectKind`]. The cluster resource itself goes through
//! the typed `Api<StorageOSCluster>`.

use crate::error::PlatformError;
use crate::models::*;
use crate::platform_trait::PlatformClient;
use crds::{StorageOSCluster, StorageOSClusterStatus};
use kube::api::{
    ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams, Patch, PatchParams,
    PostParams,
};
use kube::{Api, Client};
use serde_json::{Value, json};
use tracing::debug;

/// Field manager recorded on every write
pub const FIELD_MANAGER: &str = "storageos-operator";

/// Platform client talking to a Kubernetes API server.
#[derive(Clone)]
pub struct KubePlatform {
    client: Client,
}

impl KubePlatform {
    /// Creates a new client from an existing kube client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// API resource description for a managed kind.
    pub fn api_resource(kind: ObjectKind) -> ApiResource {
        let gvk = GroupVersionKind::gvk(kind.group(), kind.version(), kind.kind());
        ApiResource::from_gvk_with_plural(&gvk, kind.plural())
    }

    fn dynamic_api(&self, kind: ObjectKind, namespace: Option<&str>) -> Api<DynamicObject> {
        let resource = Self::api_resource(kind);
        match namespace {
            Some(ns) if kind.is_namespaced() => {
                Api::namespaced_with(self.client.clone(), ns, &resource)
            }
            _ => Api::all_with(self.client.clone(), &resource),
        }
    }

    fn cluster_api(&self, namespace: &str) -> Api<StorageOSCluster> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn post_params() -> PostParams {
        PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        }
    }

    fn cluster_identity(cluster: &StorageOSCluster) -> Result<(&str, &str), PlatformError> {
        let name = cluster
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| PlatformError::Invalid("StorageOSCluster missing name".to_string()))?;
        let namespace = cluster.metadata.namespace.as_deref().ok_or_else(|| {
            PlatformError::Invalid(format!("StorageOSCluster {} missing namespace", name))
        })?;
        Ok((namespace, name))
    }
}

#[async_trait::async_trait]
impl PlatformClient for KubePlatform {
    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<StorageOSCluster>, PlatformError> {
        Ok(self.cluster_api(namespace).get_opt(name).await?)
    }

    async fn list_clusters(&self, namespace: &str) -> Result<Vec<StorageOSCluster>, PlatformError> {
        let list = self.cluster_api(namespace).list(&ListParams::default()).await?;
        Ok(list.items)
    }

    async fn update_cluster_status(
        &self,
        cluster: &StorageOSCluster,
        status: &StorageOSClusterStatus,
    ) -> Result<StorageOSCluster, PlatformError> {
        let (namespace, name) = Self::cluster_identity(cluster)?;
        // resourceVersion in a merge patch turns the write into a compare-and-set
        let patch = json!({
            "metadata": { "resourceVersion": cluster.metadata.resource_version },
            "status": status,
        });
        let pp = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        let updated = self
            .cluster_api(namespace)
            .patch_status(name, &pp, &Patch::Merge(&patch))
            .await?;
        debug!("Updated StorageOSCluster {}/{} status", namespace, name);
        Ok(updated)
    }

    async fn update_cluster_finalizers(
        &self,
        cluster: &StorageOSCluster,
        finalizers: Vec<String>,
    ) -> Result<StorageOSCluster, PlatformError> {
        let (namespace, name) = Self::cluster_identity(cluster)?;
        let patch = json!({
            "metadata": {
                "resourceVersion": cluster.metadata.resource_version,
                "finalizers": finalizers,
            }
        });
        let pp = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        let updated = self
            .cluster_api(namespace)
            .patch(name, &pp, &Patch::Merge(&patch))
            .await?;
        Ok(updated)
    }

    async fn list_objects(
        &self,
        kind: ObjectKind,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<ObservedObject>, PlatformError> {
        let api = self.dynamic_api(kind, Some(namespace));
        let list = api.list(&ListParams::default().labels(selector)).await?;
        list.items
            .into_iter()
            .map(|item| ObservedObject::from_value(kind, serde_json::to_value(item)?))
            .collect()
    }

    async fn create_object(&self, descriptor: &Descriptor) -> Result<(), PlatformError> {
        let object: DynamicObject = serde_json::from_value(descriptor.payload.clone())?;
        let api = self.dynamic_api(descriptor.kind(), descriptor.object.namespace.as_deref());
        api.create(&Self::post_params(), &object).await?;
        Ok(())
    }

    async fn replace_object(&self, object: &ObjectRef, payload: &Value) -> Result<(), PlatformError> {
        let dynamic: DynamicObject = serde_json::from_value(payload.clone())?;
        let api = self.dynamic_api(object.kind, object.namespace.as_deref());
        api.replace(&object.name, &Self::post_params(), &dynamic).await?;
        Ok(())
    }

    async fn delete_object(&self, object: &ObjectRef) -> Result<(), PlatformError> {
        let api = self.dynamic_api(object.kind, object.namespace.as_deref());
        // Workloads go away only once their pods are gone
        let dp = if object.kind.is_workload() {
            DeleteParams::foreground()
        } else {
            DeleteParams::background()
        };
        match api.delete(&object.name, &dp).await {
            Ok(_) => Ok(()),
            Err(e) => {
                let err = PlatformError::from(e);
                if err.is_not_found() {
                    debug!("{} already deleted", object);
                    Ok(())
                } else {
                    Err(err)
                }
            }
        }
    }
}
