//! Mock PlatformClient for unit testing
//!
//! This module provides an in-memory implementation of [`PlatformClient`] that
//! behaves like a small API server: it assigns UIDs and resource versions,
//! rejects stale writes with a conflict, honours finalizers on cluster
//! deletion and can be told to fail the next matching call.

use crate::error::PlatformError;
use crate::models::*;
use crate::platform_trait::PlatformClient;
use chrono::{DateTime, Utc};
use crds::{StorageOSCluster, StorageOSClusterSpec, StorageOSClusterStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

/// Creation timestamps handed out by the mock start here and advance one
/// second per object, so creation order is deterministic.
const EPOCH_SECS: i64 = 1_704_067_200;

/// A successful mutating call recorded by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    CreateObject(ObjectRef),
    ReplaceObject(ObjectRef),
    DeleteObject(ObjectRef),
    UpdateClusterStatus { namespace: String, name: String },
    UpdateClusterFinalizers { namespace: String, name: String },
}

/// Call that an injected failure applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailPoint {
    GetCluster,
    ListClusters,
    UpdateClusterStatus,
    UpdateClusterFinalizers,
    List(ObjectKind),
    Create(ObjectKind),
    Replace(ObjectKind),
    Delete(ObjectKind),
}

/// Mock platform for testing
#[derive(Clone, Default)]
pub struct MockPlatform {
    clusters: Arc<Mutex<BTreeMap<(String, String), StorageOSCluster>>>,
    objects: Arc<Mutex<BTreeMap<ObjectRef, Value>>>,
    // Kinds whose deletion leaves the object terminating until released
    held_kinds: Arc<Mutex<BTreeSet<ObjectKind>>>,
    failures: Arc<Mutex<Vec<(FailPoint, String)>>>,
    operations: Arc<Mutex<Vec<Operation>>>,
    // Counter for resource versions, UIDs and creation timestamps
    counter: Arc<Mutex<i64>>,
}

/// Platform timestamp `secs` seconds after the Unix epoch.
pub fn timestamp_from_secs(secs: i64) -> Time {
    let at = DateTime::<Utc>::from_timestamp(secs, 0).unwrap_or_default();
    serde_json::from_value(json!(at.to_rfc3339())).expect("RFC 3339 timestamp")
}

impl MockPlatform {
    /// Create a new, empty mock platform
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&self) -> i64 {
        let mut counter = self.counter.lock().unwrap();
        *counter += 1;
        *counter
    }

    fn check_failure(&self, point: FailPoint) -> Result<(), PlatformError> {
        let mut failures = self.failures.lock().unwrap();
        if let Some(pos) = failures.iter().position(|(p, _)| *p == point) {
            let (_, message) = failures.remove(pos);
            return Err(PlatformError::Api(message));
        }
        Ok(())
    }

    fn record(&self, op: Operation) {
        self.operations.lock().unwrap().push(op);
    }

    /// Make the next call matching `point` fail with an API error.
    pub fn fail_next(&self, point: FailPoint, message: impl Into<String>) {
        self.failures.lock().unwrap().push((point, message.into()));
    }

    /// Add a cluster to the mock store (for test setup).
    ///
    /// Missing UID, resource version, generation and creation timestamp are
    /// filled in. Returns the stored copy.
    pub fn add_cluster(&self, mut cluster: StorageOSCluster) -> StorageOSCluster {
        let n = self.next();
        let meta = &mut cluster.metadata;
        if meta.namespace.is_none() {
            meta.namespace = Some("default".to_string());
        }
        if meta.uid.is_none() {
            meta.uid = Some(format!("uid-{}", n));
        }
        if meta.creation_timestamp.is_none() {
            meta.creation_timestamp = Some(timestamp_from_secs(EPOCH_SECS + n));
        }
        meta.generation.get_or_insert(1);
        meta.resource_version = Some(n.to_string());

        let key = (
            meta.namespace.clone().unwrap_or_default(),
            meta.name.clone().unwrap_or_default(),
        );
        self.clusters.lock().unwrap().insert(key, cluster.clone());
        cluster
    }

    /// Current stored copy of a cluster
    pub fn cluster(&self, namespace: &str, name: &str) -> Option<StorageOSCluster> {
        self.clusters
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Simulate a user editing the cluster spec.
    pub fn edit_cluster_spec(&self, namespace: &str, name: &str, edit: impl FnOnce(&mut StorageOSClusterSpec)) {
        let n = self.next();
        let mut clusters = self.clusters.lock().unwrap();
        if let Some(cluster) = clusters.get_mut(&(namespace.to_string(), name.to_string())) {
            edit(&mut cluster.spec);
            cluster.metadata.generation = Some(cluster.metadata.generation.unwrap_or(0) + 1);
            cluster.metadata.resource_version = Some(n.to_string());
        }
    }

    /// Simulate a user deleting the cluster. Without finalizers the cluster
    /// is removed at once, otherwise it is marked for deletion.
    pub fn request_cluster_deletion(&self, namespace: &str, name: &str) {
        let n = self.next();
        let key = (namespace.to_string(), name.to_string());
        let mut clusters = self.clusters.lock().unwrap();
        let has_finalizers = match clusters.get(&key) {
            Some(c) => c.metadata.finalizers.as_ref().is_some_and(|f| !f.is_empty()),
            None => return,
        };
        if !has_finalizers {
            clusters.remove(&key);
            return;
        }
        if let Some(cluster) = clusters.get_mut(&key) {
            if cluster.metadata.deletion_timestamp.is_none() {
                cluster.metadata.deletion_timestamp = Some(timestamp_from_secs(Utc::now().timestamp()));
            }
            cluster.metadata.resource_version = Some(n.to_string());
        }
    }

    /// Seed an arbitrary object, e.g. a leftover or foreign one.
    pub fn add_object(&self, kind: ObjectKind, mut payload: Value) -> ObjectRef {
        let n = self.next();
        let name = payload
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let namespace = payload
            .pointer("/metadata/namespace")
            .and_then(Value::as_str)
            .map(str::to_string);
        let object = ObjectRef::new(kind, namespace.as_deref(), name);
        stamp_new(&mut payload, n);
        self.objects.lock().unwrap().insert(object.clone(), payload);
        object
    }

    /// Stored payload of one object
    pub fn object(&self, object: &ObjectRef) -> Option<Value> {
        self.objects.lock().unwrap().get(object).cloned()
    }

    /// Every stored object, in key order
    pub fn objects(&self) -> Vec<ObservedObject> {
        self.objects
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(r, v)| ObservedObject::from_value(r.kind, v.clone()).ok())
            .collect()
    }

    pub fn objects_of(&self, kind: ObjectKind) -> Vec<ObservedObject> {
        self.objects().into_iter().filter(|o| o.kind() == kind).collect()
    }

    /// Mutating calls made so far, in order
    pub fn operations(&self) -> Vec<Operation> {
        self.operations.lock().unwrap().clone()
    }

    pub fn clear_operations(&self) {
        self.operations.lock().unwrap().clear();
    }

    /// Report a workload as fully ready (or not) for its current generation.
    pub fn set_workload_ready(&self, object: &ObjectRef, ready: bool) {
        let mut objects = self.objects.lock().unwrap();
        if let Some(payload) = objects.get_mut(object) {
            let replicas = payload
                .pointer("/spec/replicas")
                .and_then(Value::as_u64)
                .unwrap_or(1);
            let generation = payload
                .pointer("/metadata/generation")
                .and_then(Value::as_i64)
                .unwrap_or(1);
            payload["status"] = json!({
                "replicas": replicas,
                "readyReplicas": if ready { replicas } else { 0 },
                "observedGeneration": generation,
            });
        }
    }

    /// Mark every workload in a namespace ready (or not).
    pub fn set_all_workloads_ready(&self, namespace: &str, ready: bool) {
        let refs: Vec<ObjectRef> = self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|r| r.kind.is_workload() && r.namespace.as_deref() == Some(namespace))
            .cloned()
            .collect();
        for r in refs {
            self.set_workload_ready(&r, ready);
        }
    }

    /// Deleting objects of `kind` leaves them terminating until
    /// [`MockPlatform::release_terminating`] is called.
    pub fn hold_deletion(&self, kind: ObjectKind) {
        self.held_kinds.lock().unwrap().insert(kind);
    }

    /// Finish deleting every terminating object.
    pub fn release_terminating(&self) {
        self.held_kinds.lock().unwrap().clear();
        self.objects
            .lock()
            .unwrap()
            .retain(|_, v| v.pointer("/metadata/deletionTimestamp").is_none());
    }

    fn check_version(stored: Option<&String>, given: Option<&String>, what: &str) -> Result<(), PlatformError> {
        match given {
            Some(given) if Some(given) != stored => Err(PlatformError::Conflict(format!(
                "{} was modified: resourceVersion {} is stale",
                what, given
            ))),
            _ => Ok(()),
        }
    }
}

fn stamp_new(payload: &mut Value, n: i64) {
    if !payload["metadata"].is_object() {
        payload["metadata"] = json!({});
    }
    let meta = &mut payload["metadata"];
    if meta.get("uid").is_none() {
        meta["uid"] = json!(format!("obj-uid-{}", n));
    }
    meta["resourceVersion"] = json!(n.to_string());
    meta["generation"] = json!(1);
    if let Some(ts) = DateTime::<Utc>::from_timestamp(EPOCH_SECS + n, 0) {
        meta["creationTimestamp"] = json!(ts.to_rfc3339());
    }
}

/// RFC 7386: `null` removes a key, objects merge key by key, anything else
/// replaces the target.
fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(fields) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = json!({});
    }
    if let Value::Object(current) = target {
        for (key, value) in fields {
            if value.is_null() {
                current.remove(key);
            } else {
                merge_patch(current.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

fn matches_selector(payload: &Value, selector: &str) -> bool {
    let labels = payload.pointer("/metadata/labels");
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((key, value)) => {
                labels.and_then(|l| l.get(key)).and_then(Value::as_str) == Some(value)
            }
            None => labels.and_then(|l| l.get(term)).is_some(),
        })
}

#[async_trait::async_trait]
impl PlatformClient for MockPlatform {
    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<StorageOSCluster>, PlatformError> {
        self.check_failure(FailPoint::GetCluster)?;
        Ok(self.cluster(namespace, name))
    }

    async fn list_clusters(&self, namespace: &str) -> Result<Vec<StorageOSCluster>, PlatformError> {
        self.check_failure(FailPoint::ListClusters)?;
        Ok(self
            .clusters
            .lock()
            .unwrap()
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, c)| c.clone())
            .collect())
    }

    async fn update_cluster_status(
        &self,
        cluster: &StorageOSCluster,
        status: &StorageOSClusterStatus,
    ) -> Result<StorageOSCluster, PlatformError> {
        self.check_failure(FailPoint::UpdateClusterStatus)?;
        let key = (
            cluster.metadata.namespace.clone().unwrap_or_default(),
            cluster.metadata.name.clone().unwrap_or_default(),
        );
        let n = self.next();
        let mut clusters = self.clusters.lock().unwrap();
        let stored = clusters
            .get_mut(&key)
            .ok_or_else(|| PlatformError::NotFound(format!("StorageOSCluster {}/{}", key.0, key.1)))?;
        Self::check_version(
            stored.metadata.resource_version.as_ref(),
            cluster.metadata.resource_version.as_ref(),
            "StorageOSCluster",
        )?;
        // Same body KubePlatform sends, applied with JSON merge-patch rules
        let mut merged = match stored.status.as_ref() {
            Some(current) => serde_json::to_value(current)?,
            None => json!({}),
        };
        merge_patch(&mut merged, &serde_json::to_value(status)?);
        stored.status = Some(serde_json::from_value(merged)?);
        stored.metadata.resource_version = Some(n.to_string());
        let updated = stored.clone();
        drop(clusters);
        self.record(Operation::UpdateClusterStatus { namespace: key.0, name: key.1 });
        Ok(updated)
    }

    async fn update_cluster_finalizers(
        &self,
        cluster: &StorageOSCluster,
        finalizers: Vec<String>,
    ) -> Result<StorageOSCluster, PlatformError> {
        self.check_failure(FailPoint::UpdateClusterFinalizers)?;
        let key = (
            cluster.metadata.namespace.clone().unwrap_or_default(),
            cluster.metadata.name.clone().unwrap_or_default(),
        );
        let n = self.next();
        let mut clusters = self.clusters.lock().unwrap();
        let stored = clusters
            .get_mut(&key)
            .ok_or_else(|| PlatformError::NotFound(format!("StorageOSCluster {}/{}", key.0, key.1)))?;
        Self::check_version(
            stored.metadata.resource_version.as_ref(),
            cluster.metadata.resource_version.as_ref(),
            "StorageOSCluster",
        )?;
        stored.metadata.finalizers = Some(finalizers);
        stored.metadata.resource_version = Some(n.to_string());
        let updated = stored.clone();
        // Last finalizer gone on a deleted cluster: the store drops it
        if updated.metadata.deletion_timestamp.is_some()
            && updated.metadata.finalizers.as_ref().is_none_or(|f| f.is_empty())
        {
            clusters.remove(&key);
        }
        drop(clusters);
        self.record(Operation::UpdateClusterFinalizers { namespace: key.0, name: key.1 });
        Ok(updated)
    }

    async fn list_objects(
        &self,
        kind: ObjectKind,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<ObservedObject>, PlatformError> {
        self.check_failure(FailPoint::List(kind))?;
        let objects = self.objects.lock().unwrap();
        objects
            .iter()
            .filter(|(r, _)| r.kind == kind)
            .filter(|(r, _)| !kind.is_namespaced() || r.namespace.as_deref() == Some(namespace))
            .filter(|(_, v)| matches_selector(v, selector))
            .map(|(_, v)| ObservedObject::from_value(kind, v.clone()))
            .collect()
    }

    async fn create_object(&self, descriptor: &Descriptor) -> Result<(), PlatformError> {
        self.check_failure(FailPoint::Create(descriptor.kind()))?;
        let n = self.next();
        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(&descriptor.object) {
            return Err(PlatformError::Conflict(format!("{} already exists", descriptor.object)));
        }
        let mut payload = descriptor.payload.clone();
        stamp_new(&mut payload, n);
        objects.insert(descriptor.object.clone(), payload);
        drop(objects);
        self.record(Operation::CreateObject(descriptor.object.clone()));
        Ok(())
    }

    async fn replace_object(&self, object: &ObjectRef, payload: &Value) -> Result<(), PlatformError> {
        self.check_failure(FailPoint::Replace(object.kind))?;
        let n = self.next();
        let mut objects = self.objects.lock().unwrap();
        let stored = objects
            .get_mut(object)
            .ok_or_else(|| PlatformError::NotFound(object.to_string()))?;
        let stored_version = stored
            .pointer("/metadata/resourceVersion")
            .and_then(Value::as_str)
            .map(str::to_string);
        let given_version = payload
            .pointer("/metadata/resourceVersion")
            .and_then(Value::as_str)
            .map(str::to_string);
        Self::check_version(stored_version.as_ref(), given_version.as_ref(), &object.to_string())?;

        let mut next = payload.clone();
        let generation = stored
            .pointer("/metadata/generation")
            .and_then(Value::as_i64)
            .unwrap_or(1);
        let spec_changed = stored.get("spec") != next.get("spec");
        for field in ["uid", "creationTimestamp", "deletionTimestamp"] {
            if let Some(v) = stored["metadata"].get(field) {
                next["metadata"][field] = v.clone();
            }
        }
        next["metadata"]["resourceVersion"] = json!(n.to_string());
        next["metadata"]["generation"] = json!(if spec_changed { generation + 1 } else { generation });
        // Replacing the object never touches its status
        match stored.get("status") {
            Some(status) => next["status"] = status.clone(),
            None => {
                if let Some(map) = next.as_object_mut() {
                    map.remove("status");
                }
            }
        }
        *stored = next;
        drop(objects);
        self.record(Operation::ReplaceObject(object.clone()));
        Ok(())
    }

    async fn delete_object(&self, object: &ObjectRef) -> Result<(), PlatformError> {
        self.check_failure(FailPoint::Delete(object.kind))?;
        let held = self.held_kinds.lock().unwrap().contains(&object.kind);
        let mut objects = self.objects.lock().unwrap();
        if held {
            if let Some(stored) = objects.get_mut(object) {
                if stored.pointer("/metadata/deletionTimestamp").is_none() {
                    stored["metadata"]["deletionTimestamp"] = json!(Utc::now().to_rfc3339());
                }
            }
        } else {
            objects.remove(object);
        }
        drop(objects);
        self.record(Operation::DeleteObject(object.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;

    fn cluster(name: &str) -> StorageOSCluster {
        StorageOSCluster {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("storageos".to_string()),
                ..Default::default()
            },
            spec: StorageOSClusterSpec::with_nodes(1),
            status: None,
        }
    }

    #[tokio::test]
    async fn test_stale_status_write_conflicts() {
        let mock = MockPlatform::new();
        let stored = mock.add_cluster(cluster("c"));

        let status = StorageOSClusterStatus::default();
        let updated = mock.update_cluster_status(&stored, &status).await.unwrap();
        assert_ne!(updated.metadata.resource_version, stored.metadata.resource_version);

        let err = mock.update_cluster_status(&stored, &status).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_merge_patch_rules() {
        let mut target = json!({"a": 1, "b": {"c": 2, "d": 3}, "list": ["x", "y"]});
        merge_patch(&mut target, &json!({"a": null, "b": {"c": 4}, "list": []}));
        assert_eq!(target, json!({"b": {"c": 4, "d": 3}, "list": []}));
    }

    #[tokio::test]
    async fn test_status_write_clears_emptied_fields() {
        let mock = MockPlatform::new();
        let stored = mock.add_cluster(cluster("c"));
        let full = StorageOSClusterStatus {
            ready: Some("1/1".to_string()),
            ready_nodes: 1,
            members: vec!["c-node-0".to_string()],
            observed_generation: Some(1),
            ..Default::default()
        };
        let stored = mock.update_cluster_status(&stored, &full).await.unwrap();

        let emptied = StorageOSClusterStatus {
            ready: None,
            ready_nodes: 0,
            members: Vec::new(),
            ..full.clone()
        };
        let updated = mock.update_cluster_status(&stored, &emptied).await.unwrap();
        let status = updated.status.unwrap();
        assert!(status.members.is_empty());
        assert_eq!(status.ready, None);
        assert_eq!(status.ready_nodes, 0);
        assert_eq!(status.observed_generation, Some(1));
    }

    #[tokio::test]
    async fn test_deletion_waits_for_finalizers() {
        let mock = MockPlatform::new();
        let stored = mock.add_cluster(cluster("c"));
        let stored = mock
            .update_cluster_finalizers(&stored, vec!["f".to_string()])
            .await
            .unwrap();

        mock.request_cluster_deletion("storageos", "c");
        let deleting = mock.cluster("storageos", "c").unwrap();
        assert!(deleting.metadata.deletion_timestamp.is_some());
        assert!(mock.update_cluster_finalizers(&stored, vec![]).await.is_err());

        mock.update_cluster_finalizers(&deleting, vec![]).await.unwrap();
        assert!(mock.cluster("storageos", "c").is_none());
    }

    #[tokio::test]
    async fn test_object_lifecycle_and_selector() {
        let mock = MockPlatform::new();
        let object = ObjectRef::new(ObjectKind::ConfigMap, Some("storageos"), "c-config");
        let descriptor = Descriptor::new(
            object.clone(),
            json!({
                "apiVersion": "v1",
                "kind": "ConfigMap",
                "metadata": {"name": "c-config", "namespace": "storageos", "labels": {CLUSTER_LABEL: "c"}},
                "data": {"a": "1"}
            }),
        );
        mock.create_object(&descriptor).await.unwrap();
        assert!(mock.create_object(&descriptor).await.unwrap_err().is_conflict());

        let listed = mock
            .list_objects(ObjectKind::ConfigMap, "storageos", "storageos.com/cluster=c")
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        let other = mock
            .list_objects(ObjectKind::ConfigMap, "storageos", "storageos.com/cluster=d")
            .await
            .unwrap();
        assert!(other.is_empty());

        mock.delete_object(&object).await.unwrap();
        mock.delete_object(&object).await.unwrap();
        assert!(mock.object(&object).is_none());
    }

    #[tokio::test]
    async fn test_injected_failure_fires_once() {
        let mock = MockPlatform::new();
        mock.fail_next(FailPoint::ListClusters, "boom");
        assert!(mock.list_clusters("storageos").await.is_err());
        assert!(mock.list_clusters("storageos").await.is_ok());
    }
}
