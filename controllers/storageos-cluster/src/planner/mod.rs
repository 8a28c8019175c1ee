//! Desired-state planner.
//!
//! Turns a `StorageOSCluster` into the complete set of dependent object
//! descriptors, grouped by section:
//! - `rbac`: service account, roles and bindings of the node daemons
//! - `config`: node configuration and services
//! - `workload`: one stateful workload per storage node
//! - `integration`: storage class, CSI driver record and admission webhook
//!
//! Planning is pure: the same cluster always yields the same descriptors, in
//! the same order.

mod config;
mod integration;
pub mod naming;
mod rbac;
pub mod validation;
mod workload;


pub use naming::ClusterNames;
pub use validation::ValidationError;

use crds::StorageOSCluster;
use platform_client::{Descriptor, ObjectKind, ObjectRef, Owner};
use serde_json::{Value, json};

/// Everything the section planners need to know about the cluster.
pub(crate) struct PlanContext<'a> {
    pub cluster: &'a StorageOSCluster,
    pub owner: Owner,
    pub names: ClusterNames,
}

impl<'a> PlanContext<'a> {
    pub fn new(cluster: &'a StorageOSCluster) -> Result<Self, ValidationError> {
        if cluster.metadata.name.as_deref().unwrap_or_default().is_empty() {
            return Err(ValidationError::MissingIdentity("name"));
        }
        if cluster.metadata.namespace.as_deref().unwrap_or_default().is_empty() {
            return Err(ValidationError::MissingIdentity("namespace"));
        }
        let owner = Owner::from_cluster(cluster).ok_or(ValidationError::MissingIdentity("uid"))?;
        let names = ClusterNames::for_cluster(cluster).ok_or(ValidationError::MissingIdentity("namespace"))?;
        validation::validate(cluster, &names)?;
        Ok(Self { cluster, owner, names })
    }

    /// Builds a descriptor from the kind-specific top-level fields in `body`.
    pub fn descriptor(&self, kind: ObjectKind, name: &str, body: Value) -> Descriptor {
        let mut payload = json!({
            "apiVersion": kind.api_version(),
            "kind": kind.kind(),
            "metadata": naming::object_meta(&self.owner, &self.names, kind, name),
        });
        if let (Some(target), Value::Object(fields)) = (payload.as_object_mut(), body) {
            target.extend(fields);
        }
        Descriptor::new(
            ObjectRef::new(kind, Some(&self.names.namespace), name),
            payload,
        )
    }
}

/// Plans every dependent object of the cluster, in creation order.
pub fn plan(cluster: &StorageOSCluster) -> Result<Vec<Descriptor>, ValidationError> {
    let ctx = PlanContext::new(cluster)?;

    let mut descriptors = rbac::plan(&ctx);
    descriptors.extend(config::plan(&ctx));
    descriptors.extend(workload::plan(&ctx));
    descriptors.extend(integration::plan(&ctx));
    Ok(descriptors)
}

/// Validates the cluster without building anything.
pub fn validate(cluster: &StorageOSCluster) -> Result<(), ValidationError> {
    PlanContext::new(cluster).map(|_| ())
}
