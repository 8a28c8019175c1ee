//! Convergence engine.
//!
//! Compares planned descriptors with the observed dependents of a cluster and
//! emits the ordered list of actions that brings the platform in line:
//! creates and updates in creation class order, then deletes of stale objects
//! in teardown class order.
//!
//! Comparison is restricted to the fields the planner sets. Anything the
//! platform adds (defaults, status, bookkeeping metadata) is ignored, so a
//! converged cluster produces only [`Action::NoOp`].

use platform_client::{Descriptor, ObjectRef, ObservedObject, OrderingClass};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// One step of a convergence pass.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Object is missing
    Create(Descriptor),
    /// Object drifted from its descriptor. `payload` is the descriptor merged
    /// over the observed object and carries the observed resourceVersion.
    Update { desired: Descriptor, payload: Value },
    /// Owned object that is no longer planned
    Delete(ObjectRef),
    /// Object matches, or is already being deleted
    NoOp(ObjectRef),
}

impl Action {
    pub fn object(&self) -> &ObjectRef {
        match self {
            Action::Create(d) => &d.object,
            Action::Update { desired, .. } => &desired.object,
            Action::Delete(object) | Action::NoOp(object) => object,
        }
    }

    pub fn class(&self) -> OrderingClass {
        self.object().kind.class()
    }

    pub fn verb(&self) -> &'static str {
        match self {
            Action::Create(_) => "create",
            Action::Update { .. } => "update",
            Action::Delete(_) => "delete",
            Action::NoOp(_) => "noop",
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, Action::NoOp(_))
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.verb(), self.object())
    }
}

/// Computes the actions converging `observed` to `desired`.
///
/// `observed` must only hold objects owned by the cluster being converged.
/// Every desired descriptor and every observed object yields at most one
/// action.
pub fn converge(desired: &[Descriptor], observed: &[ObservedObject]) -> Vec<Action> {
    let by_ref: HashMap<&ObjectRef, &ObservedObject> =
        observed.iter().map(|o| (&o.object, o)).collect();

    let mut seen: HashSet<&ObjectRef> = HashSet::new();
    let mut apply: Vec<Action> = Vec::new();
    for descriptor in desired {
        if !seen.insert(&descriptor.object) {
            continue;
        }
        let action = match by_ref.get(&descriptor.object) {
            None => Action::Create(descriptor.clone()),
            Some(current) if current.terminating => Action::NoOp(descriptor.object.clone()),
            Some(current) if matches(&descriptor.payload, &current.payload) => {
                Action::NoOp(descriptor.object.clone())
            }
            Some(current) => Action::Update {
                desired: descriptor.clone(),
                payload: merge(&descriptor.payload, &current.payload),
            },
        };
        apply.push(action);
    }
    // Stable: planner order is kept within a class
    apply.sort_by_key(|a| a.class().create_rank());

    let mut stale: Vec<Action> = observed
        .iter()
        .filter(|o| !seen.contains(&o.object))
        .map(|o| {
            if o.terminating {
                Action::NoOp(o.object.clone())
            } else {
                Action::Delete(o.object.clone())
            }
        })
        .collect();
    stale.sort_by_key(|a| a.class().teardown_rank());

    apply.extend(stale);
    apply
}

/// Actions removing every owned object, in teardown class order.
pub fn teardown(observed: &[ObservedObject]) -> Vec<Action> {
    converge(&[], observed)
}

/// Whether every field set in `desired` has the same value in `observed`.
///
/// Objects are compared key by key, arrays element-wise with equal length.
/// An empty or null desired value matches a missing observed one, since the
/// platform drops empty collections. Resource `requests` and `limits` are
/// compared by quantity, since the platform stores them in canonical form.
pub fn matches(desired: &Value, observed: &Value) -> bool {
    match (desired, observed) {
        (Value::Object(want), Value::Object(have)) => want.iter().all(|(key, value)| {
            match have.get(key) {
                Some(current) if key == "requests" || key == "limits" => {
                    quantities_match(value, current)
                }
                Some(current) => matches(value, current),
                None => is_empty(value),
            }
        }),
        (Value::Array(want), Value::Array(have)) => {
            want.len() == have.len() && want.iter().zip(have).all(|(w, h)| matches(w, h))
        }
        (Value::Number(want), Value::Number(have)) => want.as_f64() == have.as_f64(),
        (want, Value::Null) => is_empty(want),
        (want, have) => want == have,
    }
}

fn quantities_match(desired: &Value, observed: &Value) -> bool {
    let (Value::Object(want), Value::Object(have)) = (desired, observed) else {
        return matches(desired, observed);
    };
    want.iter().all(|(resource, value)| {
        let current = have.get(resource);
        match (value.as_str().and_then(quantity), current.and_then(Value::as_str).and_then(quantity)) {
            (Some(a), Some(b)) => (a - b).abs() <= f64::EPSILON * a.abs().max(b.abs()),
            _ => match current {
                Some(current) => matches(value, current),
                None => is_empty(value),
            },
        }
    })
}

/// Numeric value of a resource quantity such as `500m`, `1.5Gi` or `1e3`.
pub(crate) fn quantity(text: &str) -> Option<f64> {
    const BINARY: [(&str, f64); 6] = [
        ("Ki", 1024.0),
        ("Mi", 1_048_576.0),
        ("Gi", 1_073_741_824.0),
        ("Ti", 1_099_511_627_776.0),
        ("Pi", 1_125_899_906_842_624.0),
        ("Ei", 1_152_921_504_606_846_976.0),
    ];
    const DECIMAL: [(&str, f64); 6] = [
        ("k", 1e3),
        ("M", 1e6),
        ("G", 1e9),
        ("T", 1e12),
        ("P", 1e15),
        ("E", 1e18),
    ];
    const FRACTIONAL: [(&str, f64); 3] = [("n", 1e9), ("u", 1e6), ("m", 1e3)];

    let text = text.trim();
    let number = |digits: &str| digits.parse::<f64>().ok().filter(|n| n.is_finite());
    // Exponent form has no suffix, and "1E3" must not read as exa
    if text.ends_with(|c: char| c.is_ascii_digit() || c == '.') {
        return number(text);
    }
    if let Some((suffix, factor)) = BINARY.iter().find(|(s, _)| text.ends_with(s)) {
        return number(&text[..text.len() - suffix.len()]).map(|n| n * factor);
    }
    if let Some((suffix, divisor)) = FRACTIONAL.iter().find(|(s, _)| text.ends_with(s)) {
        return number(&text[..text.len() - suffix.len()]).map(|n| n / divisor);
    }
    DECIMAL
        .iter()
        .find(|(s, _)| text.ends_with(s))
        .and_then(|(suffix, factor)| number(&text[..text.len() - suffix.len()]).map(|n| n * factor))
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
        _ => false,
    }
}

/// Overlays `desired` on `observed`.
///
/// Nested objects are merged, everything else (arrays included) is taken
/// from `desired`. Fields only the platform sets, such as the
/// resourceVersion, survive from `observed`.
pub fn merge(desired: &Value, observed: &Value) -> Value {
    match (desired, observed) {
        (Value::Object(want), Value::Object(have)) => {
            let mut merged: Map<String, Value> = have.clone();
            for (key, value) in want {
                let next = match have.get(key) {
                    Some(current) => merge(value, current),
                    None => value.clone(),
                };
                merged.insert(key.clone(), next);
            }
            Value::Object(merged)
        }
        (want, _) => want.clone(),
    }
}

#[cfg(test)]
#[path = "convergence_test.rs"]
mod convergence_test;
