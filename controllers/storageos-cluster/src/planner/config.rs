//! Node configuration and services.

use super::PlanContext;
use super::naming::{API_PORT, WEBHOOK_PORT, node_pod_selector};
use platform_client::{Descriptor, ObjectKind};
use serde_json::json;

/// Where the node container serves CSI, inside its plugin directory mount
pub(super) const CSI_ENDPOINT: &str = "unix:///csi/csi.sock";

pub(super) fn plan(ctx: &PlanContext<'_>) -> Vec<Descriptor> {
    let names = &ctx.names;
    let spec = &ctx.cluster.spec;

    let peers = (0..spec.nodes)
        .map(|i| format!("{}:{}", names.node_address(i), API_PORT))
        .collect::<Vec<_>>()
        .join(",");
    let log_level = if spec.debug { "debug" } else { "info" };

    let mut descriptors = vec![
        ctx.descriptor(
            ObjectKind::ConfigMap,
            &names.config_map,
            json!({
                "data": {
                    "CLUSTER_NAME": names.cluster,
                    "CLUSTER_NAMESPACE": names.namespace,
                    "CSI_DRIVER_NAME": names.csi_driver,
                    "CSI_ENDPOINT": CSI_ENDPOINT,
                    "LOG_LEVEL": log_level,
                    "DISABLE_TELEMETRY": spec.disable_telemetry.to_string(),
                    "PEERS": peers,
                }
            }),
        ),
        // Headless: gives every node pod a stable DNS name, ready or not
        ctx.descriptor(
            ObjectKind::Service,
            &names.headless_service,
            json!({
                "spec": {
                    "clusterIP": "None",
                    "publishNotReadyAddresses": true,
                    "selector": node_pod_selector(names),
                    "ports": [{
                        "name": "api",
                        "port": API_PORT,
                        "targetPort": API_PORT,
                    }],
                }
            }),
        ),
    ];

    if spec.webhook.enabled {
        descriptors.push(ctx.descriptor(
            ObjectKind::Service,
            &names.webhook_service,
            json!({
                "spec": {
                    "selector": node_pod_selector(names),
                    "ports": [{
                        "name": "webhook",
                        "port": 443,
                        "targetPort": WEBHOOK_PORT,
                    }],
                }
            }),
        ));
    }

    descriptors
}
