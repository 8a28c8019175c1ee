//! Access control objects of the storage node daemons.

use super::PlanContext;
use platform_client::{Descriptor, ObjectKind};
use serde_json::json;

const RBAC_GROUP: &str = "rbac.authorization.k8s.io";

pub(super) fn plan(ctx: &PlanContext<'_>) -> Vec<Descriptor> {
    let names = &ctx.names;
    let subjects = json!([{
        "kind": "ServiceAccount",
        "name": names.node_account,
        "namespace": names.namespace,
    }]);

    vec![
        ctx.descriptor(ObjectKind::ServiceAccount, &names.node_account, json!({})),
        ctx.descriptor(
            ObjectKind::Role,
            &names.node_account,
            json!({
                "rules": [
                    {
                        "apiGroups": [""],
                        "resources": ["configmaps", "secrets"],
                        "verbs": ["get", "list", "watch"],
                    },
                    {
                        "apiGroups": [""],
                        "resources": ["events"],
                        "verbs": ["create", "patch"],
                    },
                    {
                        "apiGroups": ["coordination.k8s.io"],
                        "resources": ["leases"],
                        "verbs": ["get", "create", "update"],
                    },
                ]
            }),
        ),
        ctx.descriptor(
            ObjectKind::RoleBinding,
            &names.node_account,
            json!({
                "roleRef": {
                    "apiGroup": RBAC_GROUP,
                    "kind": "Role",
                    "name": names.node_account,
                },
                "subjects": subjects,
            }),
        ),
        ctx.descriptor(
            ObjectKind::ClusterRole,
            &names.cluster_role,
            json!({
                "rules": [
                    {
                        "apiGroups": [""],
                        "resources": ["nodes", "pods"],
                        "verbs": ["get", "list", "watch"],
                    },
                    {
                        "apiGroups": [""],
                        "resources": ["persistentvolumes"],
                        "verbs": ["get", "list", "watch", "create", "delete", "patch"],
                    },
                    {
                        "apiGroups": [""],
                        "resources": ["persistentvolumeclaims"],
                        "verbs": ["get", "list", "watch", "update"],
                    },
                    {
                        "apiGroups": ["storage.k8s.io"],
                        "resources": ["storageclasses", "csinodes"],
                        "verbs": ["get", "list", "watch"],
                    },
                    {
                        "apiGroups": ["storage.k8s.io"],
                        "resources": ["volumeattachments"],
                        "verbs": ["get", "list", "watch", "patch"],
                    },
                ]
            }),
        ),
        ctx.descriptor(
            ObjectKind::ClusterRoleBinding,
            &names.cluster_role,
            json!({
                "roleRef": {
                    "apiGroup": RBAC_GROUP,
                    "kind": "ClusterRole",
                    "name": names.cluster_role,
                },
                "subjects": subjects,
            }),
        ),
    ]
}
