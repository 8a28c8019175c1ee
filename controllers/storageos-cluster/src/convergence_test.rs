//! Unit tests for the convergence engine

#[cfg(test)]
mod tests {
    use crate::convergence::*;
    use platform_client::{Descriptor, ObjectKind, ObjectRef, ObservedObject, OrderingClass};
    use serde_json::{Value, json};

    fn descriptor(kind: ObjectKind, name: &str, body: Value) -> Descriptor {
        let mut payload = json!({
            "apiVersion": kind.api_version(),
            "kind": kind.kind(),
            "metadata": { "name": name, "namespace": "storageos" },
        });
        if let Value::Object(fields) = body {
            payload.as_object_mut().unwrap().extend(fields);
        }
        Descriptor::new(ObjectRef::new(kind, Some("storageos"), name), payload)
    }

    /// What the platform would hand back for `d`: the same fields plus its
    /// own bookkeeping.
    fn stored(d: &Descriptor) -> ObservedObject {
        let mut payload = d.payload.clone();
        payload["metadata"]["uid"] = json!("obj-uid");
        payload["metadata"]["resourceVersion"] = json!("7");
        payload["metadata"]["creationTimestamp"] = json!("2024-01-01T00:00:00Z");
        payload["status"] = json!({ "observedGeneration": 1 });
        ObservedObject::from_value(d.kind(), payload).unwrap()
    }

    fn plan_like() -> Vec<Descriptor> {
        vec![
            descriptor(ObjectKind::ServiceAccount, "c-node", json!({})),
            descriptor(ObjectKind::ConfigMap, "c-config", json!({ "data": { "A": "1" } })),
            descriptor(ObjectKind::StatefulSet, "c-node-0", json!({ "spec": { "replicas": 1 } })),
            descriptor(ObjectKind::StorageClass, "storageos-c", json!({ "provisioner": "p" })),
        ]
    }

    #[test]
    fn test_missing_objects_are_created_in_class_order() {
        // Deliberately out of order
        let mut desired = plan_like();
        desired.reverse();

        let actions = converge(&desired, &[]);
        assert_eq!(actions.len(), 4);
        assert!(actions.iter().all(|a| matches!(a, Action::Create(_))));
        let classes: Vec<OrderingClass> = actions.iter().map(Action::class).collect();
        assert_eq!(
            classes,
            vec![
                OrderingClass::AccessControl,
                OrderingClass::Configuration,
                OrderingClass::Workload,
                OrderingClass::Integration,
            ]
        );
    }

    #[test]
    fn test_converged_state_is_all_noop() {
        let desired = plan_like();
        let observed: Vec<ObservedObject> = desired.iter().map(stored).collect();
        let actions = converge(&desired, &observed);
        assert_eq!(actions.len(), desired.len());
        assert!(actions.iter().all(Action::is_noop));
    }

    #[test]
    fn test_drift_yields_update_with_observed_version() {
        let desired = plan_like();
        let mut observed: Vec<ObservedObject> = desired.iter().map(stored).collect();
        observed[1].payload["data"]["A"] = json!("2");

        let actions = converge(&desired, &observed);
        let updates: Vec<&Action> = actions
            .iter()
            .filter(|a| matches!(a, Action::Update { .. }))
            .collect();
        assert_eq!(updates.len(), 1);
        match updates[0] {
            Action::Update { desired, payload } => {
                assert_eq!(desired.object.name, "c-config");
                assert_eq!(payload["data"]["A"], "1");
                assert_eq!(payload["metadata"]["resourceVersion"], "7");
                assert_eq!(payload["metadata"]["uid"], "obj-uid");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_stale_objects_deleted_in_teardown_order() {
        let desired = vec![descriptor(ObjectKind::ServiceAccount, "c-node", json!({}))];
        let observed: Vec<ObservedObject> = plan_like().iter().map(stored).collect();

        let actions = converge(&desired, &observed);
        let deletes: Vec<ObjectKind> = actions
            .iter()
            .filter_map(|a| match a {
                Action::Delete(object) => Some(object.kind),
                _ => None,
            })
            .collect();
        assert_eq!(
            deletes,
            vec![ObjectKind::StatefulSet, ObjectKind::StorageClass, ObjectKind::ConfigMap]
        );
        assert!(actions[0].is_noop());
    }

    #[test]
    fn test_terminating_objects_are_left_alone() {
        let desired = plan_like();
        let mut observed: Vec<ObservedObject> = desired.iter().map(stored).collect();
        observed[2].terminating = true;
        observed[2].payload["spec"]["replicas"] = json!(0);

        let actions = converge(&desired, &observed);
        assert!(actions.iter().all(Action::is_noop));

        let teardown_actions = teardown(&observed);
        assert_eq!(teardown_actions.len(), 4);
        assert!(teardown_actions[0].is_noop());
        assert_eq!(teardown_actions[0].object().name, "c-node-0");
        assert_eq!(teardown_actions.iter().filter(|a| !a.is_noop()).count(), 3);
    }

    #[test]
    fn test_duplicate_descriptors_yield_one_action() {
        let mut desired = plan_like();
        desired.push(desired[0].clone());
        let actions = converge(&desired, &[]);
        assert_eq!(actions.len(), 4);
    }

    #[test]
    fn test_matches_ignores_platform_defaults() {
        let desired = json!({
            "spec": {
                "ports": [{ "name": "api", "port": 5701 }],
                "selector": {},
                "tolerations": [],
            }
        });
        let observed = json!({
            "spec": {
                "ports": [{ "name": "api", "port": 5701, "protocol": "TCP" }],
                "clusterIP": "10.0.0.1",
            },
            "status": {},
        });
        assert!(matches(&desired, &observed));

        let fewer = json!({ "spec": { "ports": [] } });
        assert!(!matches(&fewer, &observed));

        let changed = json!({ "spec": { "ports": [{ "name": "api", "port": 5702 }] } });
        assert!(!matches(&changed, &observed));
    }

    #[test]
    fn test_canonical_resource_quantities_converge() {
        let workload = |cpu: &str, memory: &str| {
            descriptor(
                ObjectKind::StatefulSet,
                "c-node-0",
                json!({ "spec": { "template": { "spec": { "containers": [{
                    "name": "storageos",
                    "resources": {
                        "requests": { "cpu": cpu, "memory": memory },
                        "limits": { "cpu": cpu },
                    },
                }] } } } }),
            )
        };

        // The platform hands back "1000m" as "1" and "1024Mi" as "1Gi"
        let desired = workload("1000m", "1024Mi");
        let observed = stored(&workload("1", "1Gi"));
        let actions = converge(std::slice::from_ref(&desired), &[observed]);
        assert!(matches!(actions.as_slice(), [Action::NoOp(_)]), "{:?}", actions);

        let observed = stored(&workload("2", "1Gi"));
        let actions = converge(&[desired], &[observed]);
        assert!(matches!(actions.as_slice(), [Action::Update { .. }]), "{:?}", actions);
    }

    #[test]
    fn test_quantity_values() {
        assert_eq!(quantity("500m"), quantity("0.5"));
        assert_eq!(quantity("1k"), Some(1000.0));
        assert_eq!(quantity("1e3"), Some(1000.0));
        assert_eq!(quantity("1E3"), Some(1000.0));
        assert_eq!(quantity("2Ki"), Some(2048.0));
        assert_eq!(quantity("1E"), Some(1e18));
        assert_ne!(quantity("2"), quantity("1"));
        assert_eq!(quantity("lots"), None);
        assert_eq!(quantity("m"), None);
    }

    #[test]
    fn test_merge_replaces_arrays_and_keeps_unset_fields() {
        let desired = json!({ "spec": { "ports": [{ "port": 2 }], "type": "ClusterIP" } });
        let observed = json!({
            "metadata": { "resourceVersion": "3" },
            "spec": { "ports": [{ "port": 1 }, { "port": 9 }], "clusterIP": "10.0.0.1" },
        });
        let merged = merge(&desired, &observed);
        assert_eq!(merged["spec"]["ports"], json!([{ "port": 2 }]));
        assert_eq!(merged["spec"]["clusterIP"], "10.0.0.1");
        assert_eq!(merged["spec"]["type"], "ClusterIP");
        assert_eq!(merged["metadata"]["resourceVersion"], "3");
    }

    #[test]
    fn test_action_display() {
        let action = Action::Delete(ObjectRef::new(ObjectKind::ClusterRole, None, "r"));
        assert_eq!(action.to_string(), "delete ClusterRole r");
        assert_eq!(action.verb(), "delete");
    }
}
