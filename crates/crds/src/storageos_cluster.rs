//! StorageOSCluster CRD
//!
//! Declares a StorageOS cluster: how many storage nodes to run, which images
//! to run them with and where to place them. The operator reports progress
//! through `status.phase`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Finalizer attached to every admitted cluster until its dependents are gone.
pub const CLUSTER_FINALIZER: &str = "finalizer.storageoscluster.storageos.com";

/// Default StorageOS release deployed when `spec.version` is not set.
pub const DEFAULT_VERSION: &str = "2.9.0";

/// Default host directory backing node data.
pub const DEFAULT_HOST_DATA_DIR: &str = "/var/lib/storageos";

/// Default filesystem type of volumes provisioned through the storage class.
pub const DEFAULT_FS_TYPE: &str = "ext4";

/// Upper bound on `spec.nodes`.
pub const MAX_NODES: u32 = 64;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "storageos.com",
    version = "v1",
    kind = "StorageOSCluster",
    plural = "storageosclusters",
    shortname = "stos",
    namespaced,
    status = "StorageOSClusterStatus",
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct StorageOSClusterSpec {
    /// Number of storage nodes. Each node runs as its own workload.
    pub nodes: u32,

    /// StorageOS release, used to derive default image tags
    #[serde(default = "default_version")]
    pub version: String,

    /// Image overrides
    #[serde(default)]
    pub images: ContainerImages,

    /// Name of a Secret in the cluster namespace holding API credentials.
    /// Injected into node pods as environment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref_name: Option<String>,

    /// Node placement constraints
    #[serde(default)]
    pub placement: Placement,

    /// Resource requests and limits for the node container
    #[serde(default)]
    pub resources: NodeResources,

    /// StorageClass name (defaults to `<namespace>-<name>`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,

    /// Filesystem type for provisioned volumes
    #[serde(default = "default_fs_type")]
    pub storage_class_fs_type: String,

    /// Admission webhook settings
    #[serde(default)]
    pub webhook: WebhookSpec,

    /// Host directory for node data
    #[serde(default = "default_host_data_dir")]
    pub host_data_dir: String,

    /// Enable debug logging in the storage daemon
    #[serde(default)]
    pub debug: bool,

    /// Disable telemetry reporting
    #[serde(default)]
    pub disable_telemetry: bool,
}

impl StorageOSClusterSpec {
    /// Spec for `nodes` storage nodes with every other field at its default.
    pub fn with_nodes(nodes: u32) -> Self {
        Self {
            nodes,
            version: default_version(),
            images: ContainerImages::default(),
            secret_ref_name: None,
            placement: Placement::default(),
            resources: NodeResources::default(),
            storage_class_name: None,
            storage_class_fs_type: default_fs_type(),
            webhook: WebhookSpec::default(),
            host_data_dir: default_host_data_dir(),
            debug: false,
            disable_telemetry: false,
        }
    }
}

fn default_version() -> String {
    DEFAULT_VERSION.to_string()
}

fn default_fs_type() -> String {
    DEFAULT_FS_TYPE.to_string()
}

fn default_host_data_dir() -> String {
    DEFAULT_HOST_DATA_DIR.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerImages {
    /// StorageOS node image (defaults to `storageos/node:<version>`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,

    /// CSI node driver registrar sidecar image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csi_node_driver_registrar: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Placement {
    /// Node labels a host must carry to run a storage node
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,

    /// Tolerations applied to node pods
    #[serde(default)]
    pub tolerations: Vec<Toleration>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Toleration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// `Exists` or `Equal`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// `NoSchedule`, `PreferNoSchedule` or `NoExecute`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodeResources {
    /// Resource requests (e.g. `cpu: 500m`)
    #[serde(default)]
    pub requests: BTreeMap<String, String>,

    /// Resource limits (e.g. `memory: 2Gi`)
    #[serde(default)]
    pub limits: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WebhookSpec {
    /// Register the volume admission webhook
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// PEM bundle used by the API server to verify the webhook
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_bundle: Option<String>,
}

impl Default for WebhookSpec {
    fn default() -> Self {
        Self {
            enabled: true,
            ca_bundle: None,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Phase of the storage cluster at a given point in time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default, Hash)]
pub enum ClusterPhase {
    /// Not yet seen by the operator
    #[default]
    #[serde(rename = "")]
    Initial,

    /// Creation has not started because another cluster is active in the
    /// same namespace
    Pending,

    /// Dependent resources are being provisioned
    Creating,

    /// All storage nodes are ready
    Running,

    /// Deletion was requested; waiting for teardown to complete
    Terminating,
}

impl ClusterPhase {
    /// Whether this phase holds the namespace's single cluster slot.
    pub fn is_active(self) -> bool {
        matches!(self, ClusterPhase::Creating | ClusterPhase::Running)
    }

    /// Value written to `status.phase`.
    pub fn as_str(self) -> &'static str {
        match self {
            ClusterPhase::Initial => "",
            ClusterPhase::Pending => "Pending",
            ClusterPhase::Creating => "Creating",
            ClusterPhase::Running => "Running",
            ClusterPhase::Terminating => "Terminating",
        }
    }
}

impl std::fmt::Display for ClusterPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterPhase::Initial => f.write_str("Initial"),
            other => f.write_str(other.as_str()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorageOSClusterStatus {
    /// Current phase
    #[serde(default)]
    pub phase: ClusterPhase,

    /// Ready nodes over desired nodes, e.g. `2/3`
    #[serde(default)]
    pub ready: Option<String>,

    /// Number of storage nodes reporting ready
    #[serde(default)]
    pub ready_nodes: u32,

    /// Number of storage nodes declared in the spec
    #[serde(default)]
    pub desired_nodes: u32,

    /// Names of ready node workloads
    // Empty lists and unset options serialize explicitly so a merge patch
    // clears what the previous write left behind.
    #[serde(default)]
    pub members: Vec<String>,

    /// Generation of the spec the status was computed from
    #[serde(default)]
    pub observed_generation: Option<i64>,

    /// Latest observations
    #[serde(default)]
    pub conditions: Vec<ClusterCondition>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCondition {
    /// Condition type, e.g. `Ready` or `SpecValid`
    #[serde(rename = "type")]
    pub type_: String,

    /// `True`, `False` or `Unknown`
    pub status: String,

    /// Machine-readable reason
    pub reason: String,

    /// Human-readable detail
    #[serde(default)]
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl ClusterCondition {
    pub fn new(type_: &str, status: bool, reason: &str, message: impl Into<String>) -> Self {
        Self {
            type_: type_.to_string(),
            status: if status { "True" } else { "False" }.to_string(),
            reason: reason.to_string(),
            message: message.into(),
            last_transition_time: None,
        }
    }

    /// Equal ignoring the transition timestamp.
    pub fn same_as(&self, other: &ClusterCondition) -> bool {
        self.type_ == other.type_
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

impl StorageOSClusterStatus {
    /// Looks up a condition by type.
    pub fn condition(&self, type_: &str) -> Option<&ClusterCondition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// Inserts or replaces a condition. The transition time is carried over
    /// when nothing but the timestamp would change.
    pub fn set_condition(&mut self, mut condition: ClusterCondition, now: DateTime<Utc>) {
        match self.conditions.iter_mut().find(|c| c.type_ == condition.type_) {
            Some(existing) if existing.same_as(&condition) => {}
            Some(existing) => {
                condition.last_transition_time = Some(now);
                *existing = condition;
            }
            None => {
                condition.last_transition_time = Some(now);
                self.conditions.push(condition);
            }
        }
    }

    /// Removes a condition by type.
    pub fn clear_condition(&mut self, type_: &str) {
        self.conditions.retain(|c| c.type_ != type_);
    }

    /// Equality that ignores condition timestamps.
    pub fn same_as(&self, other: &StorageOSClusterStatus) -> bool {
        self.phase == other.phase
            && self.ready == other.ready
            && self.ready_nodes == other.ready_nodes
            && self.desired_nodes == other.desired_nodes
            && self.members == other.members
            && self.observed_generation == other.observed_generation
            && self.conditions.len() == other.conditions.len()
            && self
                .conditions
                .iter()
                .zip(other.conditions.iter())
                .all(|(a, b)| a.same_as(b))
    }
}

/// List collection of clusters within a scope.
pub type StorageOSClusterList = kube::core::ObjectList<StorageOSCluster>;

impl StorageOSCluster {
    /// Phase from the status, `Initial` when no status was written yet.
    pub fn phase(&self) -> ClusterPhase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }

    /// Whether the platform has been asked to delete this cluster.
    pub fn deletion_requested(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Whether the operator's finalizer is present.
    pub fn has_finalizer(&self) -> bool {
        self.finalizers().iter().any(|f| f == CLUSTER_FINALIZER)
    }

    /// `namespace/name` key used in logs and backoff bookkeeping.
    pub fn key(&self) -> String {
        format!(
            "{}/{}",
            self.namespace().unwrap_or_default(),
            self.name_any()
        )
    }
}
