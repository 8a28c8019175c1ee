//! Per-node storage workloads.
//!
//! Every storage node runs as its own single-replica StatefulSet, so nodes
//! can be added and removed one at a time and keep a stable network identity.
//! Anti-affinity keeps two nodes of the same cluster off one host.

use super::PlanContext;
use super::naming::{API_PORT, COMPONENT_LABEL, NODE_LABEL, WEBHOOK_PORT, common_labels, node_pod_selector};
use platform_client::{CLUSTER_LABEL, CLUSTER_NAMESPACE_LABEL, Descriptor, ObjectKind};
use serde_json::{Value, json};

const DEFAULT_NODE_IMAGE: &str = "storageos/node";
const DEFAULT_REGISTRAR_IMAGE: &str = "registry.k8s.io/sig-storage/csi-node-driver-registrar:v2.10.0";
const KUBELET_DIR: &str = "/var/lib/kubelet";
const REGISTRATION_DIR: &str = "/var/lib/kubelet/plugins_registry";

pub(super) fn plan(ctx: &PlanContext<'_>) -> Vec<Descriptor> {
    (0..ctx.cluster.spec.nodes)
        .map(|index| node_workload(ctx, index))
        .collect()
}

fn node_workload(ctx: &PlanContext<'_>, index: u32) -> Descriptor {
    let names = &ctx.names;
    let name = names.node_workload(index);

    let selector = json!({
        CLUSTER_LABEL: names.cluster,
        CLUSTER_NAMESPACE_LABEL: names.namespace,
        NODE_LABEL: name,
    });
    let mut pod_labels = common_labels(names);
    pod_labels.insert(COMPONENT_LABEL.to_string(), json!("node"));
    pod_labels.insert(NODE_LABEL.to_string(), json!(name));

    ctx.descriptor(
        ObjectKind::StatefulSet,
        &name,
        json!({
            "spec": {
                "replicas": 1,
                "serviceName": names.headless_service,
                "podManagementPolicy": "Parallel",
                "selector": { "matchLabels": selector },
                "template": {
                    "metadata": { "labels": pod_labels },
                    "spec": pod_spec(ctx),
                },
            }
        }),
    )
}

fn pod_spec(ctx: &PlanContext<'_>) -> Value {
    let names = &ctx.names;
    let spec = &ctx.cluster.spec;

    let mut pod = json!({
        "serviceAccountName": names.node_account,
        "affinity": {
            "podAntiAffinity": {
                "requiredDuringSchedulingIgnoredDuringExecution": [{
                    "labelSelector": { "matchLabels": node_pod_selector(names) },
                    "topologyKey": "kubernetes.io/hostname",
                }]
            }
        },
        "containers": [node_container(ctx), registrar_container(ctx)],
        "volumes": [
            host_path_volume("data", &spec.host_data_dir, "DirectoryOrCreate"),
            host_path_volume("kubelet-dir", KUBELET_DIR, "Directory"),
            host_path_volume("plugin-dir", &names.plugin_dir(), "DirectoryOrCreate"),
            host_path_volume("registration-dir", REGISTRATION_DIR, "Directory"),
            host_path_volume("device-dir", "/dev", "Directory"),
        ],
    });

    if !spec.placement.node_selector.is_empty() {
        pod["nodeSelector"] = json!(spec.placement.node_selector);
    }
    if !spec.placement.tolerations.is_empty() {
        pod["tolerations"] = json!(spec.placement.tolerations);
    }
    pod
}

fn node_container(ctx: &PlanContext<'_>) -> Value {
    let names = &ctx.names;
    let spec = &ctx.cluster.spec;
    let image = spec
        .images
        .node
        .clone()
        .unwrap_or_else(|| format!("{}:{}", DEFAULT_NODE_IMAGE, spec.version));

    let mut env_from = vec![json!({ "configMapRef": { "name": names.config_map } })];
    if let Some(secret) = &spec.secret_ref_name {
        env_from.push(json!({ "secretRef": { "name": secret } }));
    }

    let mut container = json!({
        "name": "storageos",
        "image": image,
        "env": [
            {
                "name": "NODE_NAME",
                "valueFrom": { "fieldRef": { "fieldPath": "spec.nodeName" } },
            },
            {
                "name": "POD_NAMESPACE",
                "valueFrom": { "fieldRef": { "fieldPath": "metadata.namespace" } },
            },
        ],
        "envFrom": env_from,
        "ports": [
            { "name": "api", "containerPort": API_PORT },
            { "name": "webhook", "containerPort": WEBHOOK_PORT },
        ],
        "readinessProbe": {
            "httpGet": { "path": "/v1/health", "port": "api" },
            "initialDelaySeconds": 10,
            "periodSeconds": 5,
        },
        "securityContext": {
            "privileged": true,
            "capabilities": { "add": ["SYS_ADMIN"] },
        },
        "volumeMounts": [
            { "name": "data", "mountPath": "/var/lib/storageos", "mountPropagation": "Bidirectional" },
            { "name": "kubelet-dir", "mountPath": KUBELET_DIR, "mountPropagation": "Bidirectional" },
            { "name": "plugin-dir", "mountPath": "/csi" },
            { "name": "device-dir", "mountPath": "/dev" },
        ],
    });

    let mut resources = serde_json::Map::new();
    if !spec.resources.requests.is_empty() {
        resources.insert("requests".to_string(), json!(spec.resources.requests));
    }
    if !spec.resources.limits.is_empty() {
        resources.insert("limits".to_string(), json!(spec.resources.limits));
    }
    if !resources.is_empty() {
        container["resources"] = Value::Object(resources);
    }
    container
}

fn registrar_container(ctx: &PlanContext<'_>) -> Value {
    let image = ctx
        .cluster
        .spec
        .images
        .csi_node_driver_registrar
        .clone()
        .unwrap_or_else(|| DEFAULT_REGISTRAR_IMAGE.to_string());

    json!({
        "name": "csi-driver-registrar",
        "image": image,
        "args": [
            "--csi-address=/csi/csi.sock",
            format!("--kubelet-registration-path={}/csi.sock", ctx.names.plugin_dir()),
        ],
        "volumeMounts": [
            { "name": "plugin-dir", "mountPath": "/csi" },
            { "name": "registration-dir", "mountPath": "/registration" },
        ],
    })
}

fn host_path_volume(name: &str, path: &str, type_: &str) -> Value {
    json!({
        "name": name,
        "hostPath": { "path": path, "type": type_ },
    })
}
