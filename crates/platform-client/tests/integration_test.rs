//! Integration tests for the Kubernetes platform client
//!
//! These tests require a reachable cluster with the StorageOSCluster CRD
//! installed. Set STORAGEOS_TEST_NAMESPACE to pick the namespace (default
//! `storageos-test`).

use platform_client::{Descriptor, KubePlatform, ObjectKind, ObjectRef, PlatformClient};
use serde_json::json;

fn namespace() -> String {
    std::env::var("STORAGEOS_TEST_NAMESPACE").unwrap_or_else(|_| "storageos-test".to_string())
}

async fn platform() -> KubePlatform {
    let _ = rustls::crypto::ring::default_provider().install_default();
    let client = kube::Client::try_default()
        .await
        .expect("Failed to create Kubernetes client");
    KubePlatform::new(client)
}

#[tokio::test]
#[ignore] // Requires a running cluster
async fn test_list_clusters() {
    let platform = platform().await;
    let clusters = platform
        .list_clusters(&namespace())
        .await
        .expect("Failed to list StorageOSClusters");
    println!("Found {} clusters", clusters.len());
}

#[tokio::test]
#[ignore]
async fn test_configmap_create_list_delete() {
    let platform = platform().await;
    let ns = namespace();
    let object = ObjectRef::new(ObjectKind::ConfigMap, Some(&ns), "platform-client-it");
    let descriptor = Descriptor::new(
        object.clone(),
        json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": "platform-client-it",
                "namespace": ns,
                "labels": {"storageos.com/cluster": "platform-client-it"}
            },
            "data": {"key": "value"}
        }),
    );

    platform.create_object(&descriptor).await.expect("Failed to create ConfigMap");
    let listed = platform
        .list_objects(ObjectKind::ConfigMap, &ns, "storageos.com/cluster=platform-client-it")
        .await
        .expect("Failed to list ConfigMaps");
    assert_eq!(listed.len(), 1);
    assert!(listed[0].resource_version.is_some());

    platform.delete_object(&object).await.expect("Failed to delete ConfigMap");
    // Deleting again is not an error
    platform.delete_object(&object).await.expect("Second delete failed");
}
