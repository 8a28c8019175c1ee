//! Cluster-scoped storage integration: storage class, CSI driver record and
//! the PVC admission webhook.

use super::PlanContext;
use k8s_openapi::ByteString;
use platform_client::{Descriptor, ObjectKind};
use serde_json::json;

pub(super) fn plan(ctx: &PlanContext<'_>) -> Vec<Descriptor> {
    let names = &ctx.names;
    let spec = &ctx.cluster.spec;

    let mut descriptors = vec![
        ctx.descriptor(
            ObjectKind::StorageClass,
            &names.storage_class,
            json!({
                "provisioner": names.csi_driver,
                "parameters": {
                    "csi.storage.k8s.io/fstype": spec.storage_class_fs_type,
                },
                "reclaimPolicy": "Delete",
                "volumeBindingMode": "Immediate",
                "allowVolumeExpansion": true,
            }),
        ),
        ctx.descriptor(
            ObjectKind::CsiDriver,
            &names.csi_driver,
            json!({
                "spec": {
                    "attachRequired": true,
                    "podInfoOnMount": true,
                    "volumeLifecycleModes": ["Persistent"],
                }
            }),
        ),
    ];

    if spec.webhook.enabled {
        let mut client_config = json!({
            "service": {
                "name": names.webhook_service,
                "namespace": names.namespace,
                "path": "/validate-pvc",
                "port": 443,
            }
        });
        if let Some(pem) = &spec.webhook.ca_bundle {
            // Serialises as base64, the wire form of caBundle
            client_config["caBundle"] = json!(ByteString(pem.as_bytes().to_vec()));
        }

        descriptors.push(ctx.descriptor(
            ObjectKind::ValidatingWebhookConfiguration,
            &names.webhook_config,
            json!({
                "webhooks": [{
                    "name": format!("pvc.{}", names.csi_driver),
                    "admissionReviewVersions": ["v1"],
                    "sideEffects": "None",
                    "failurePolicy": "Ignore",
                    "timeoutSeconds": 5,
                    "clientConfig": client_config,
                    "rules": [{
                        "apiGroups": [""],
                        "apiVersions": ["v1"],
                        "operations": ["CREATE"],
                        "resources": ["persistentvolumeclaims"],
                        "scope": "Namespaced",
                    }],
                }]
            }),
        ));
    }

    descriptors
}
