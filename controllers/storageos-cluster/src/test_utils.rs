//! Test utilities for unit testing the reconciler
//!
//! This module provides helpers for creating test clusters and a reconciler
//! wired to an in-memory platform.

#[cfg(test)]
use crate::metrics::Metrics;
#[cfg(test)]
use crate::reconciler::Reconciler;
#[cfg(test)]
use crds::{StorageOSCluster, StorageOSClusterSpec};
#[cfg(test)]
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
#[cfg(test)]
use platform_client::{MockPlatform, ObjectKind, ObjectRef, Operation};
#[cfg(test)]
use std::sync::Arc;

/// Namespace used by the reconciler tests
#[cfg(test)]
pub const TEST_NAMESPACE: &str = "storageos";

/// Helper to create a test cluster with `nodes` storage nodes
#[cfg(test)]
pub fn create_test_cluster(name: &str, nodes: u32) -> StorageOSCluster {
    StorageOSCluster {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(TEST_NAMESPACE.to_string()),
            ..Default::default()
        },
        spec: StorageOSClusterSpec::with_nodes(nodes),
        status: None,
    }
}

/// Helper to create a reconciler backed by `mock`
#[cfg(test)]
pub fn create_test_reconciler(mock: &MockPlatform) -> Reconciler {
    let metrics = Metrics::new().expect("metrics");
    Reconciler::new(Arc::new(mock.clone()), metrics)
}

/// Objects of `kind` recorded as created
#[cfg(test)]
pub fn created(operations: &[Operation], kind: ObjectKind) -> Vec<ObjectRef> {
    operations
        .iter()
        .filter_map(|op| match op {
            Operation::CreateObject(object) if object.kind == kind => Some(object.clone()),
            _ => None,
        })
        .collect()
}

/// Objects of `kind` recorded as deleted
#[cfg(test)]
pub fn deleted(operations: &[Operation], kind: ObjectKind) -> Vec<ObjectRef> {
    operations
        .iter()
        .filter_map(|op| match op {
            Operation::DeleteObject(object) if object.kind == kind => Some(object.clone()),
            _ => None,
        })
        .collect()
}

/// Whether any dependent object was written
#[cfg(test)]
pub fn wrote_objects(operations: &[Operation]) -> bool {
    operations.iter().any(|op| {
        matches!(
            op,
            Operation::CreateObject(_) | Operation::ReplaceObject(_) | Operation::DeleteObject(_)
        )
    })
}
