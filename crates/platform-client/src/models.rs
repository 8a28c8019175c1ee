//! Object model shared by the planner, observer and convergence engine
//!
//! Dependent objects are handled as JSON payloads tagged with an [`ObjectKind`].
//! The kind determines the API coordinates, the scope (namespaced or cluster-wide)
//! and the ordering class used when applying changes.

use std::fmt;

use crds::StorageOSCluster;
use kube::ResourceExt;
use serde_json::Value;

use crate::error::PlatformError;

/// Label marking objects created by the operator
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
/// Value of [`MANAGED_BY_LABEL`]
pub const MANAGED_BY: &str = "storageos-operator";
/// Label carrying the owning cluster's name
pub const CLUSTER_LABEL: &str = "storageos.com/cluster";
/// Label carrying the owning cluster's namespace
pub const CLUSTER_NAMESPACE_LABEL: &str = "storageos.com/cluster-namespace";
/// Owner UID on cluster-scoped objects, which cannot carry a namespaced ownerReference
pub const OWNER_UID_ANNOTATION: &str = "storageos.com/owner-uid";

/// Ordering class of a dependent object.
///
/// Classes are applied in [`OrderingClass::CREATE_ORDER`] and torn down in
/// [`OrderingClass::TEARDOWN_ORDER`]. Objects within a class are independent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OrderingClass {
    /// Service accounts, roles and bindings
    AccessControl,
    /// Config maps and services
    Configuration,
    /// Per-node storage workloads
    Workload,
    /// Storage classes, CSI driver records and admission webhooks
    Integration,
}

impl OrderingClass {
    /// Order in which classes are applied
    pub const CREATE_ORDER: [OrderingClass; 4] = [
        OrderingClass::AccessControl,
        OrderingClass::Configuration,
        OrderingClass::Workload,
        OrderingClass::Integration,
    ];

    /// Order in which classes are removed
    pub const TEARDOWN_ORDER: [OrderingClass; 4] = [
        OrderingClass::Workload,
        OrderingClass::Integration,
        OrderingClass::Configuration,
        OrderingClass::AccessControl,
    ];

    /// Position in [`OrderingClass::CREATE_ORDER`]
    pub fn create_rank(self) -> usize {
        Self::CREATE_ORDER
            .iter()
            .position(|c| *c == self)
            .unwrap_or(Self::CREATE_ORDER.len())
    }

    /// Position in [`OrderingClass::TEARDOWN_ORDER`]
    pub fn teardown_rank(self) -> usize {
        Self::TEARDOWN_ORDER
            .iter()
            .position(|c| *c == self)
            .unwrap_or(Self::TEARDOWN_ORDER.len())
    }
}

/// Kinds of dependent objects the operator manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectKind {
    /// Identity the storage node pods run as
    ServiceAccount,
    /// Namespaced permissions of the node identity
    Role,
    /// Grants the Role to the node identity
    RoleBinding,
    /// Cluster-wide permissions of the node identity
    ClusterRole,
    /// Grants the ClusterRole to the node identity
    ClusterRoleBinding,
    /// Node configuration
    ConfigMap,
    /// Headless node service and webhook service
    Service,
    /// One per storage node
    StatefulSet,
    /// Storage class provisioned by the cluster
    StorageClass,
    /// CSI driver registration
    CsiDriver,
    /// Admission webhook registration
    ValidatingWebhookConfiguration,
}

impl ObjectKind {
    /// Every managed kind, in creation order.
    pub const ALL: [ObjectKind; 11] = [
        ObjectKind::ServiceAccount,
        ObjectKind::Role,
        ObjectKind::RoleBinding,
        ObjectKind::ClusterRole,
        ObjectKind::ClusterRoleBinding,
        ObjectKind::ConfigMap,
        ObjectKind::Service,
        ObjectKind::StatefulSet,
        ObjectKind::StorageClass,
        ObjectKind::CsiDriver,
        ObjectKind::ValidatingWebhookConfiguration,
    ];

    /// `kind` as written in manifests
    pub fn kind(self) -> &'static str {
        match self {
            ObjectKind::ServiceAccount => "ServiceAccount",
            ObjectKind::Role => "Role",
            ObjectKind::RoleBinding => "RoleBinding",
            ObjectKind::ClusterRole => "ClusterRole",
            ObjectKind::ClusterRoleBinding => "ClusterRoleBinding",
            ObjectKind::ConfigMap => "ConfigMap",
            ObjectKind::Service => "Service",
            ObjectKind::StatefulSet => "StatefulSet",
            ObjectKind::StorageClass => "StorageClass",
            ObjectKind::CsiDriver => "CSIDriver",
            ObjectKind::ValidatingWebhookConfiguration => "ValidatingWebhookConfiguration",
        }
    }

    /// API group, empty for the core group
    pub fn group(self) -> &'static str {
        match self {
            ObjectKind::ServiceAccount | ObjectKind::ConfigMap | ObjectKind::Service => "",
            ObjectKind::Role
            | ObjectKind::RoleBinding
            | ObjectKind::ClusterRole
            | ObjectKind::ClusterRoleBinding => "rbac.authorization.k8s.io",
            ObjectKind::StatefulSet => "apps",
            ObjectKind::StorageClass | ObjectKind::CsiDriver => "storage.k8s.io",
            ObjectKind::ValidatingWebhookConfiguration => "admissionregistration.k8s.io",
        }
    }

    /// API version within the group
    pub fn version(self) -> &'static str {
        "v1"
    }

    /// `apiVersion` as written in manifests
    pub fn api_version(self) -> String {
        if self.group().is_empty() {
            self.version().to_string()
        } else {
            format!("{}/{}", self.group(), self.version())
        }
    }

    /// Resource name used in API paths
    pub fn plural(self) -> &'static str {
        match self {
            ObjectKind::ServiceAccount => "serviceaccounts",
            ObjectKind::Role => "roles",
            ObjectKind::RoleBinding => "rolebindings",
            ObjectKind::ClusterRole => "clusterroles",
            ObjectKind::ClusterRoleBinding => "clusterrolebindings",
            ObjectKind::ConfigMap => "configmaps",
            ObjectKind::Service => "services",
            ObjectKind::StatefulSet => "statefulsets",
            ObjectKind::StorageClass => "storageclasses",
            ObjectKind::CsiDriver => "csidrivers",
            ObjectKind::ValidatingWebhookConfiguration => "validatingwebhookconfigurations",
        }
    }

    /// Whether objects of this kind live in the cluster's namespace
    pub fn is_namespaced(self) -> bool {
        !matches!(
            self,
            ObjectKind::ClusterRole
                | ObjectKind::ClusterRoleBinding
                | ObjectKind::StorageClass
                | ObjectKind::CsiDriver
                | ObjectKind::ValidatingWebhookConfiguration
        )
    }

    /// Ordering class that decides when the kind is applied and removed
    pub fn class(self) -> OrderingClass {
        match self {
            ObjectKind::ServiceAccount
            | ObjectKind::Role
            | ObjectKind::RoleBinding
            | ObjectKind::ClusterRole
            | ObjectKind::ClusterRoleBinding => OrderingClass::AccessControl,
            ObjectKind::ConfigMap | ObjectKind::Service => OrderingClass::Configuration,
            ObjectKind::StatefulSet => OrderingClass::Workload,
            ObjectKind::StorageClass
            | ObjectKind::CsiDriver
            | ObjectKind::ValidatingWebhookConfiguration => OrderingClass::Integration,
        }
    }

    /// Kinds whose spec the API server refuses to update in place; changes
    /// are applied by deleting and recreating the object.
    pub fn recreate_on_update(self) -> bool {
        matches!(self, ObjectKind::StorageClass | ObjectKind::CsiDriver)
    }

    /// Kinds that report replica readiness.
    pub fn is_workload(self) -> bool {
        self.class() == OrderingClass::Workload
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

/// Identity of a platform object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef {
    /// Object kind
    pub kind: ObjectKind,
    /// `None` for cluster-scoped kinds
    pub namespace: Option<String>,
    /// Object name
    pub name: String,
}

impl ObjectRef {
    /// Builds a reference, dropping the namespace for cluster-scoped kinds.
    pub fn new(kind: ObjectKind, namespace: Option<&str>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: if kind.is_namespaced() {
                namespace.map(str::to_string)
            } else {
                None
            },
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

/// Desired state of one dependent object, as produced by the planner.
#[derive(Debug, Clone, PartialEq)]
pub struct Descriptor {
    /// Identity of the object
    pub object: ObjectRef,
    /// Full manifest including `apiVersion`, `kind` and `metadata`
    pub payload: Value,
}

impl Descriptor {
    /// Pairs an identity with its manifest.
    pub fn new(object: ObjectRef, payload: Value) -> Self {
        Self { object, payload }
    }

    pub fn kind(&self) -> ObjectKind {
        self.object.kind
    }

    pub fn class(&self) -> OrderingClass {
        self.object.kind.class()
    }
}

/// Replica readiness reported by a workload object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Readiness {
    /// Replicas the spec asks for
    pub desired: u32,
    /// Replicas reporting ready for the current revision
    pub ready: u32,
}

impl Readiness {
    /// All desired replicas are ready, and at least one is desired.
    pub fn is_ready(&self) -> bool {
        self.desired > 0 && self.ready >= self.desired
    }
}

/// A dependent object as currently stored by the platform.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedObject {
    /// Identity of the object
    pub object: ObjectRef,
    /// UID assigned by the platform
    pub uid: Option<String>,
    /// Version used as the compare-and-set token on writes
    pub resource_version: Option<String>,
    /// Deletion was requested and the object is waiting on its own finalizers
    pub terminating: bool,
    /// Object as returned by the platform
    pub payload: Value,
}

impl ObservedObject {
    /// Parses an object returned by the platform.
    pub fn from_value(kind: ObjectKind, payload: Value) -> Result<Self, PlatformError> {
        let metadata = payload.get("metadata").ok_or_else(|| {
            PlatformError::Invalid(format!("{} without metadata", kind))
        })?;
        let name = metadata
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| PlatformError::Invalid(format!("{} without metadata.name", kind)))?;
        let namespace = metadata.get("namespace").and_then(Value::as_str);
        let uid = metadata.get("uid").and_then(Value::as_str).map(str::to_string);
        let resource_version = metadata
            .get("resourceVersion")
            .and_then(Value::as_str)
            .map(str::to_string);
        let terminating = metadata
            .get("deletionTimestamp")
            .is_some_and(|v| !v.is_null());

        Ok(Self {
            object: ObjectRef::new(kind, namespace, name),
            uid,
            resource_version,
            terminating,
            payload,
        })
    }

    pub fn kind(&self) -> ObjectKind {
        self.object.kind
    }

    /// Whether the object links back to the given cluster UID, either through
    /// an ownerReference or through the owner annotation.
    pub fn is_owned_by(&self, owner_uid: &str) -> bool {
        let metadata = match self.payload.get("metadata") {
            Some(m) => m,
            None => return false,
        };
        let by_reference = metadata
            .get("ownerReferences")
            .and_then(Value::as_array)
            .is_some_and(|refs| {
                refs.iter()
                    .any(|r| r.get("uid").and_then(Value::as_str) == Some(owner_uid))
            });
        let by_annotation = metadata
            .get("annotations")
            .and_then(|a| a.get(OWNER_UID_ANNOTATION))
            .and_then(Value::as_str)
            == Some(owner_uid);
        by_reference || by_annotation
    }

    /// Replica readiness for workload kinds, `None` for everything else.
    pub fn readiness(&self) -> Option<Readiness> {
        let status = self.payload.get("status");
        let int_at = |v: Option<&Value>, key: &str| -> Option<u32> {
            v.and_then(|v| v.get(key))
                .and_then(Value::as_u64)
                .and_then(|n| u32::try_from(n).ok())
        };
        match self.kind() {
            ObjectKind::StatefulSet => {
                let desired = int_at(self.payload.get("spec"), "replicas").unwrap_or(1);
                let mut ready = int_at(status, "readyReplicas").unwrap_or(0);
                // Readiness of an older revision says nothing about the current spec
                let generation = self
                    .payload
                    .get("metadata")
                    .and_then(|m| m.get("generation"))
                    .and_then(Value::as_i64);
                let observed = status
                    .and_then(|s| s.get("observedGeneration"))
                    .and_then(Value::as_i64);
                if let (Some(generation), Some(observed)) = (generation, observed) {
                    if observed < generation {
                        ready = 0;
                    }
                }
                Some(Readiness { desired, ready })
            }
            _ => None,
        }
    }
}

/// Owner identity stamped on, and used to discover, dependent objects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner {
    /// Namespace of the owning cluster
    pub namespace: String,
    /// Name of the owning cluster
    pub name: String,
    /// UID of the owning cluster
    pub uid: String,
}

impl Owner {
    /// Owner of a cluster's dependents. `None` until the platform assigned
    /// the cluster a namespace and UID.
    pub fn from_cluster(cluster: &StorageOSCluster) -> Option<Self> {
        Some(Self {
            namespace: cluster.namespace()?,
            name: cluster.metadata.name.clone()?,
            uid: cluster.metadata.uid.clone()?,
        })
    }

    /// Label selector matching every object of this owner.
    pub fn selector(&self) -> String {
        format!(
            "{}={},{}={}",
            CLUSTER_LABEL, self.name, CLUSTER_NAMESPACE_LABEL, self.namespace
        )
    }
}
