//! Structural validation of a cluster before anything is planned.
//!
//! Invalid specs are rejected outright rather than defaulted into something
//! that might schedule storage daemons in unintended places.

use super::naming::ClusterNames;
use crds::{MAX_NODES, StorageOSCluster};
use thiserror::Error;

const DNS_LABEL_MAX: usize = 63;
const DNS_SUBDOMAIN_MAX: usize = 253;
/// StatefulSet names leave room for the controller revision hash label
const WORKLOAD_NAME_MAX: usize = 52;

/// Why a cluster cannot be planned
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("cluster {0} is not set")]
    MissingIdentity(&'static str),

    #[error("spec.nodes must be between 1 and {max}, got {nodes}", max = MAX_NODES)]
    NodeCount { nodes: u32 },

    #[error("invalid {what} {value:?}: {reason}")]
    InvalidName {
        what: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0} must not be empty")]
    EmptyField(String),

    #[error("invalid {field}: {reason}")]
    InvalidField { field: String, reason: String },
}

/// Validates the cluster and the names derived from it.
pub fn validate(cluster: &StorageOSCluster, names: &ClusterNames) -> Result<(), ValidationError> {
    let spec = &cluster.spec;

    if spec.nodes == 0 || spec.nodes > MAX_NODES {
        return Err(ValidationError::NodeCount { nodes: spec.nodes });
    }
    if spec.version.trim().is_empty() {
        return Err(ValidationError::EmptyField("spec.version".to_string()));
    }
    for (field, image) in [
        ("spec.images.node", &spec.images.node),
        ("spec.images.csiNodeDriverRegistrar", &spec.images.csi_node_driver_registrar),
    ] {
        if image.as_deref().is_some_and(|i| i.trim().is_empty()) {
            return Err(ValidationError::EmptyField(field.to_string()));
        }
    }
    if spec.secret_ref_name.as_deref().is_some_and(|s| s.trim().is_empty()) {
        return Err(ValidationError::EmptyField("spec.secretRefName".to_string()));
    }
    if !spec.host_data_dir.starts_with('/') {
        return Err(ValidationError::InvalidField {
            field: "spec.hostDataDir".to_string(),
            reason: "must be an absolute path".to_string(),
        });
    }
    if spec.storage_class_fs_type.trim().is_empty() {
        return Err(ValidationError::EmptyField("spec.storageClassFsType".to_string()));
    }
    if spec.webhook.ca_bundle.as_deref().is_some_and(|b| b.trim().is_empty()) {
        return Err(ValidationError::EmptyField("spec.webhook.caBundle".to_string()));
    }

    for (key, value) in &spec.placement.node_selector {
        if key.trim().is_empty() {
            return Err(ValidationError::EmptyField("spec.placement.nodeSelector key".to_string()));
        }
        label_value("spec.placement.nodeSelector value", value)?;
    }
    for (i, toleration) in spec.placement.tolerations.iter().enumerate() {
        let field = format!("spec.placement.tolerations[{}]", i);
        match toleration.operator.as_deref() {
            None | Some("Equal") => {}
            Some("Exists") => {
                if toleration.value.as_deref().is_some_and(|v| !v.is_empty()) {
                    return Err(ValidationError::InvalidField {
                        field,
                        reason: "value must be empty when operator is Exists".to_string(),
                    });
                }
            }
            Some(other) => {
                return Err(ValidationError::InvalidField {
                    field,
                    reason: format!("unknown operator {:?}", other),
                });
            }
        }
        if let Some(effect) = toleration.effect.as_deref() {
            if !matches!(effect, "NoSchedule" | "PreferNoSchedule" | "NoExecute") {
                return Err(ValidationError::InvalidField {
                    field,
                    reason: format!("unknown effect {:?}", effect),
                });
            }
        }
    }
    for (section, quantities) in [
        ("spec.resources.requests", &spec.resources.requests),
        ("spec.resources.limits", &spec.resources.limits),
    ] {
        for (name, quantity) in quantities {
            if name.trim().is_empty() || quantity.trim().is_empty() {
                return Err(ValidationError::EmptyField(format!("{} entry", section)));
            }
        }
    }

    // Identity ends up in label values
    label_value("cluster name", &names.cluster)?;
    label_value("cluster namespace", &names.namespace)?;

    dns_label("service name", &names.headless_service, DNS_LABEL_MAX, true)?;
    dns_label("service name", &names.webhook_service, DNS_LABEL_MAX, true)?;
    dns_label("workload name", &names.node_workload(spec.nodes - 1), WORKLOAD_NAME_MAX, false)?;
    dns_subdomain("service account name", &names.node_account)?;
    dns_subdomain("config map name", &names.config_map)?;
    dns_subdomain("storage class name", &names.storage_class)?;
    dns_subdomain("CSI driver name", &names.csi_driver)?;
    dns_subdomain("webhook configuration name", &names.webhook_config)?;
    path_segment("cluster role name", &names.cluster_role)?;
    if names.csi_driver.len() > DNS_LABEL_MAX {
        return Err(invalid(
            "CSI driver name",
            &names.csi_driver,
            format!("must be no more than {} characters", DNS_LABEL_MAX),
        ));
    }

    Ok(())
}

fn invalid(what: &'static str, value: &str, reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidName {
        what,
        value: value.to_string(),
        reason: reason.into(),
    }
}

/// RFC 1123 label, or RFC 1035 label when `letter_first` is set.
fn dns_label(what: &'static str, value: &str, max: usize, letter_first: bool) -> Result<(), ValidationError> {
    if value.is_empty() || value.len() > max {
        return Err(invalid(what, value, format!("must be 1 to {} characters", max)));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(invalid(what, value, "must consist of lower case alphanumerics or '-'"));
    }
    let first = value.chars().next().unwrap_or('-');
    let last = value.chars().last().unwrap_or('-');
    if letter_first && !first.is_ascii_lowercase() {
        return Err(invalid(what, value, "must start with a letter"));
    }
    if first == '-' || last == '-' {
        return Err(invalid(what, value, "must start and end with an alphanumeric character"));
    }
    Ok(())
}

fn dns_subdomain(what: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.is_empty() || value.len() > DNS_SUBDOMAIN_MAX {
        return Err(invalid(
            what,
            value,
            format!("must be 1 to {} characters", DNS_SUBDOMAIN_MAX),
        ));
    }
    for part in value.split('.') {
        dns_label(what, part, DNS_LABEL_MAX, false)?;
    }
    Ok(())
}

/// Names of RBAC objects only need to be usable as a URL path segment.
fn path_segment(what: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.is_empty() || value == "." || value == ".." {
        return Err(invalid(what, value, "is not a valid path segment"));
    }
    if value.contains('/') || value.contains('%') {
        return Err(invalid(what, value, "may not contain '/' or '%'"));
    }
    Ok(())
}

fn label_value(what: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.len() > DNS_LABEL_MAX {
        return Err(invalid(
            what,
            value,
            format!("must be no more than {} characters", DNS_LABEL_MAX),
        ));
    }
    if value.is_empty() {
        return Ok(());
    }
    let alnum = |c: char| c.is_ascii_alphanumeric();
    if !value.chars().all(|c| alnum(c) || matches!(c, '-' | '_' | '.'))
        || !value.chars().next().is_some_and(alnum)
        || !value.chars().last().is_some_and(alnum)
    {
        return Err(invalid(what, value, "is not a valid label value"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dns_label() {
        assert!(dns_label("n", "cluster-1", 63, true).is_ok());
        assert!(dns_label("n", "1cluster", 63, true).is_err());
        assert!(dns_label("n", "1cluster", 63, false).is_ok());
        assert!(dns_label("n", "Cluster", 63, false).is_err());
        assert!(dns_label("n", "cluster-", 63, false).is_err());
        assert!(dns_label("n", &"a".repeat(64), 63, false).is_err());
    }

    #[test]
    fn test_dns_subdomain() {
        assert!(dns_subdomain("n", "c.storageos.csi.storageos.com").is_ok());
        assert!(dns_subdomain("n", "c..storageos").is_err());
        assert!(dns_subdomain("n", "c_storageos").is_err());
    }

    #[test]
    fn test_path_segment_allows_colons() {
        assert!(path_segment("n", "storageos:ns:c:node").is_ok());
        assert!(path_segment("n", "a/b").is_err());
        assert!(path_segment("n", "..").is_err());
    }

    #[test]
    fn test_label_value() {
        assert!(label_value("v", "true").is_ok());
        assert!(label_value("v", "").is_ok());
        assert!(label_value("v", "-x").is_err());
        assert!(label_value("v", "a b").is_err());
    }
}
