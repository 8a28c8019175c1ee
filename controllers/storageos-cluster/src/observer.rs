//! Cluster-state observer.
//!
//! Reads the dependents of a cluster from the platform and derives its
//! readiness and recommended phase. Read-only: errors are returned to the
//! caller untouched.

use crds::{ClusterPhase, StorageOSCluster};
use platform_client::{
    ObjectKind, ObservedObject, OrderingClass, Owner, PlatformClient, PlatformError,
};
use tracing::debug;

/// Lists every object owned by `owner`, across all managed kinds.
///
/// Objects that carry the owner labels but link to another UID (a previous
/// cluster of the same name, or a foreign object) are left out.
pub async fn observe(
    platform: &dyn PlatformClient,
    owner: &Owner,
) -> Result<Vec<ObservedObject>, PlatformError> {
    observe_kinds(platform, owner, ObjectKind::ALL.iter().copied()).await
}

/// Lists the objects owned by `owner` within one ordering class.
pub async fn observe_class(
    platform: &dyn PlatformClient,
    owner: &Owner,
    class: OrderingClass,
) -> Result<Vec<ObservedObject>, PlatformError> {
    let kinds = ObjectKind::ALL.iter().copied().filter(|k| k.class() == class);
    observe_kinds(platform, owner, kinds).await
}

async fn observe_kinds(
    platform: &dyn PlatformClient,
    owner: &Owner,
    kinds: impl Iterator<Item = ObjectKind>,
) -> Result<Vec<ObservedObject>, PlatformError> {
    let selector = owner.selector();
    let mut owned = Vec::new();
    for kind in kinds {
        let listed = platform.list_objects(kind, &owner.namespace, &selector).await?;
        for object in listed {
            if object.is_owned_by(&owner.uid) {
                owned.push(object);
            } else {
                debug!("Skipping {}: not owned by {}", object.object, owner.uid);
            }
        }
    }
    Ok(owned)
}

/// Aggregate readiness of a cluster's storage nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadinessSummary {
    pub desired_nodes: u32,
    pub ready_nodes: u32,
    /// Ready workload names, sorted
    pub members: Vec<String>,
    /// Every workload is ready and their number matches `desired_nodes`
    pub ready: bool,
}

impl ReadinessSummary {
    /// `ready/desired`, as shown in the status
    pub fn ratio(&self) -> String {
        format!("{}/{}", self.ready_nodes, self.desired_nodes)
    }
}

/// Summarises workload readiness. Terminating workloads are on their way
/// out and count neither way.
pub fn summarize(observed: &[ObservedObject], desired_nodes: u32) -> ReadinessSummary {
    let mut workloads = 0u32;
    let mut members: Vec<String> = Vec::new();
    for object in observed.iter().filter(|o| o.kind().is_workload() && !o.terminating) {
        workloads += 1;
        if object.readiness().is_some_and(|r| r.is_ready()) {
            members.push(object.object.name.clone());
        }
    }
    members.sort();
    let ready_nodes = u32::try_from(members.len()).unwrap_or(u32::MAX);

    ReadinessSummary {
        desired_nodes,
        ready_nodes,
        ready: desired_nodes > 0 && workloads == ready_nodes && ready_nodes == desired_nodes,
        members,
    }
}

/// Phase the cluster should be in given its readiness.
///
/// Deletion always wins. A running cluster stays `Running` when a node
/// drops out; readiness is reported through the status counts and the
/// `Ready` condition instead.
pub fn recommend_phase(cluster: &StorageOSCluster, summary: &ReadinessSummary) -> ClusterPhase {
    if cluster.deletion_requested() {
        return ClusterPhase::Terminating;
    }
    match cluster.phase() {
        ClusterPhase::Running | ClusterPhase::Terminating => cluster.phase(),
        _ if summary.ready => ClusterPhase::Running,
        _ => ClusterPhase::Creating,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::{StorageOSClusterSpec, StorageOSClusterStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use platform_client::{MockPlatform, OWNER_UID_ANNOTATION, timestamp_from_secs};
    use serde_json::json;

    fn workload(name: &str, ready: bool) -> ObservedObject {
        ObservedObject::from_value(
            ObjectKind::StatefulSet,
            json!({
                "metadata": { "name": name, "namespace": "storageos", "generation": 1 },
                "spec": { "replicas": 1 },
                "status": { "readyReplicas": if ready { 1 } else { 0 }, "observedGeneration": 1 },
            }),
        )
        .unwrap()
    }

    fn cluster(phase: ClusterPhase) -> StorageOSCluster {
        StorageOSCluster {
            metadata: ObjectMeta {
                name: Some("c".to_string()),
                namespace: Some("storageos".to_string()),
                uid: Some("uid-1".to_string()),
                ..Default::default()
            },
            spec: StorageOSClusterSpec::with_nodes(2),
            status: Some(StorageOSClusterStatus {
                phase,
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_summary_requires_every_node() {
        let observed = vec![workload("c-node-1", true), workload("c-node-0", true)];
        let summary = summarize(&observed, 2);
        assert!(summary.ready);
        assert_eq!(summary.members, vec!["c-node-0", "c-node-1"]);
        assert_eq!(summary.ratio(), "2/2");

        let observed = vec![workload("c-node-0", true), workload("c-node-1", false)];
        let summary = summarize(&observed, 2);
        assert!(!summary.ready);
        assert_eq!(summary.ratio(), "1/2");

        // Surplus workload not yet deleted
        let observed = vec![
            workload("c-node-0", true),
            workload("c-node-1", true),
            workload("c-node-2", true),
        ];
        assert!(!summarize(&observed, 2).ready);
    }

    #[test]
    fn test_terminating_workloads_are_ignored() {
        let mut leaving = workload("c-node-2", false);
        leaving.terminating = true;
        let observed = vec![workload("c-node-0", true), workload("c-node-1", true), leaving];
        let summary = summarize(&observed, 2);
        assert!(summary.ready);
        assert_eq!(summary.ready_nodes, 2);
    }

    #[test]
    fn test_recommended_phase() {
        let ready = ReadinessSummary {
            desired_nodes: 2,
            ready_nodes: 2,
            members: vec![],
            ready: true,
        };
        let not_ready = ReadinessSummary::default();

        assert_eq!(recommend_phase(&cluster(ClusterPhase::Creating), &not_ready), ClusterPhase::Creating);
        assert_eq!(recommend_phase(&cluster(ClusterPhase::Creating), &ready), ClusterPhase::Running);
        assert_eq!(recommend_phase(&cluster(ClusterPhase::Running), &not_ready), ClusterPhase::Running);

        let mut deleting = cluster(ClusterPhase::Running);
        deleting.metadata.deletion_timestamp = Some(timestamp_from_secs(1_704_067_200));
        assert_eq!(recommend_phase(&deleting, &ready), ClusterPhase::Terminating);
    }

    #[tokio::test]
    async fn test_observe_filters_by_owner_uid() {
        let mock = MockPlatform::new();
        let labels = json!({
            "storageos.com/cluster": "c",
            "storageos.com/cluster-namespace": "storageos",
        });
        mock.add_object(
            ObjectKind::ConfigMap,
            json!({ "metadata": {
                "name": "c-config", "namespace": "storageos", "labels": labels,
                "ownerReferences": [{ "uid": "uid-1" }],
            }}),
        );
        // Same labels, previous incarnation of the cluster
        mock.add_object(
            ObjectKind::StorageClass,
            json!({ "metadata": {
                "name": "storageos-c", "labels": labels,
                "annotations": { OWNER_UID_ANNOTATION: "uid-0" },
            }}),
        );
        mock.add_object(
            ObjectKind::CsiDriver,
            json!({ "metadata": {
                "name": "c.storageos.csi.storageos.com", "labels": labels,
                "annotations": { OWNER_UID_ANNOTATION: "uid-1" },
            }}),
        );

        let owner = Owner {
            namespace: "storageos".to_string(),
            name: "c".to_string(),
            uid: "uid-1".to_string(),
        };
        let owned = observe(&mock, &owner).await.unwrap();
        let names: Vec<&str> = owned.iter().map(|o| o.object.name.as_str()).collect();
        assert_eq!(names, vec!["c-config", "c.storageos.csi.storageos.com"]);

        let integration = observe_class(&mock, &owner, OrderingClass::Integration).await.unwrap();
        assert_eq!(integration.len(), 1);
        assert_eq!(integration[0].kind(), ObjectKind::CsiDriver);
    }
}
