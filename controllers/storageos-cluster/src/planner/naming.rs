//! Deterministic names and labels of a cluster's dependent objects.

use crds::StorageOSCluster;
use kube::{Resource, ResourceExt};
use platform_client::{
    CLUSTER_LABEL, CLUSTER_NAMESPACE_LABEL, MANAGED_BY, MANAGED_BY_LABEL, OWNER_UID_ANNOTATION,
    ObjectKind, Owner,
};
use serde_json::{Map, Value, json};

pub const NAME_LABEL: &str = "app.kubernetes.io/name";
pub const INSTANCE_LABEL: &str = "app.kubernetes.io/instance";
pub const COMPONENT_LABEL: &str = "app.kubernetes.io/component";
/// Distinguishes the pods of one node workload from its siblings
pub const NODE_LABEL: &str = "storageos.com/node";

/// Port of the storage daemon API
pub const API_PORT: u16 = 5701;
/// Port of the admission webhook served by the storage daemon
pub const WEBHOOK_PORT: u16 = 5720;

/// Names of every dependent object of one cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterNames {
    pub cluster: String,
    pub namespace: String,
    /// ServiceAccount, Role and RoleBinding
    pub node_account: String,
    /// ClusterRole and ClusterRoleBinding
    pub cluster_role: String,
    pub config_map: String,
    pub headless_service: String,
    pub webhook_service: String,
    pub storage_class: String,
    pub csi_driver: String,
    pub webhook_config: String,
}

impl ClusterNames {
    pub fn new(namespace: &str, cluster: &str, storage_class: Option<&str>) -> Self {
        Self {
            cluster: cluster.to_string(),
            namespace: namespace.to_string(),
            node_account: format!("{}-node", cluster),
            cluster_role: format!("storageos:{}:{}:node", namespace, cluster),
            config_map: format!("{}-config", cluster),
            headless_service: cluster.to_string(),
            webhook_service: format!("{}-webhook", cluster),
            storage_class: storage_class
                .map(str::to_string)
                .unwrap_or_else(|| format!("{}-{}", namespace, cluster)),
            csi_driver: format!("{}.{}.csi.storageos.com", cluster, namespace),
            webhook_config: format!("storageos-{}-{}", namespace, cluster),
        }
    }

    /// Names for a stored cluster; `None` without a namespace.
    pub fn for_cluster(cluster: &StorageOSCluster) -> Option<Self> {
        let namespace = cluster.namespace()?;
        Some(Self::new(
            &namespace,
            &cluster.name_any(),
            cluster.spec.storage_class_name.as_deref(),
        ))
    }

    /// Workload running storage node `index`
    pub fn node_workload(&self, index: u32) -> String {
        format!("{}-node-{}", self.cluster, index)
    }

    /// Stable DNS name of the single pod of node workload `index`
    pub fn node_address(&self, index: u32) -> String {
        format!(
            "{}-0.{}.{}.svc",
            self.node_workload(index),
            self.headless_service,
            self.namespace
        )
    }

    /// Host directory holding the CSI socket of this cluster's driver
    pub fn plugin_dir(&self) -> String {
        format!("/var/lib/kubelet/plugins/{}", self.csi_driver)
    }
}

/// Labels carried by every dependent object.
pub fn common_labels(names: &ClusterNames) -> Map<String, Value> {
    let mut labels = Map::new();
    labels.insert(NAME_LABEL.to_string(), json!("storageos"));
    labels.insert(INSTANCE_LABEL.to_string(), json!(names.cluster));
    labels.insert(MANAGED_BY_LABEL.to_string(), json!(MANAGED_BY));
    labels.insert(CLUSTER_LABEL.to_string(), json!(names.cluster));
    labels.insert(CLUSTER_NAMESPACE_LABEL.to_string(), json!(names.namespace));
    labels
}

/// Labels selecting every storage node pod of the cluster
pub fn node_pod_selector(names: &ClusterNames) -> Value {
    json!({
        CLUSTER_LABEL: names.cluster,
        CLUSTER_NAMESPACE_LABEL: names.namespace,
        COMPONENT_LABEL: "node",
    })
}

pub fn owner_reference(owner: &Owner) -> Value {
    json!({
        "apiVersion": StorageOSCluster::api_version(&()),
        "kind": StorageOSCluster::kind(&()),
        "name": owner.name,
        "uid": owner.uid,
        "controller": true,
        "blockOwnerDeletion": true,
    })
}

/// Object metadata with the owner link appropriate for the kind's scope.
pub fn object_meta(owner: &Owner, names: &ClusterNames, kind: ObjectKind, name: &str) -> Value {
    let mut meta = json!({
        "name": name,
        "labels": common_labels(names),
    });
    if kind.is_namespaced() {
        meta["namespace"] = json!(names.namespace);
        meta["ownerReferences"] = json!([owner_reference(owner)]);
    } else {
        meta["annotations"] = json!({ OWNER_UID_ANNOTATION: owner.uid });
    }
    meta
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_derive_from_identity() {
        let names = ClusterNames::new("storageos", "cluster-1", None);
        assert_eq!(names.node_account, "cluster-1-node");
        assert_eq!(names.cluster_role, "storageos:storageos:cluster-1:node");
        assert_eq!(names.config_map, "cluster-1-config");
        assert_eq!(names.headless_service, "cluster-1");
        assert_eq!(names.webhook_service, "cluster-1-webhook");
        assert_eq!(names.storage_class, "storageos-cluster-1");
        assert_eq!(names.csi_driver, "cluster-1.storageos.csi.storageos.com");
        assert_eq!(names.webhook_config, "storageos-storageos-cluster-1");
        assert_eq!(names.node_workload(2), "cluster-1-node-2");
        assert_eq!(names.node_address(0), "cluster-1-node-0-0.cluster-1.storageos.svc");
    }

    #[test]
    fn test_storage_class_override() {
        let names = ClusterNames::new("storageos", "cluster-1", Some("fast"));
        assert_eq!(names.storage_class, "fast");
    }

    #[test]
    fn test_cluster_scoped_meta_uses_annotation() {
        let names = ClusterNames::new("storageos", "c", None);
        let owner = Owner {
            namespace: "storageos".to_string(),
            name: "c".to_string(),
            uid: "uid-1".to_string(),
        };
        let meta = object_meta(&owner, &names, ObjectKind::StorageClass, "storageos-c");
        assert!(meta.get("ownerReferences").is_none());
        assert!(meta.get("namespace").is_none());
        assert_eq!(meta["annotations"][OWNER_UID_ANNOTATION], "uid-1");

        let meta = object_meta(&owner, &names, ObjectKind::ConfigMap, "c-config");
        assert_eq!(meta["namespace"], "storageos");
        assert_eq!(meta["ownerReferences"][0]["uid"], "uid-1");
        assert_eq!(meta["ownerReferences"][0]["kind"], "StorageOSCluster");
        assert_eq!(meta["labels"][CLUSTER_LABEL], "c");
    }
}
