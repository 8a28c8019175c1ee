//! Operator configuration, read once at startup from the environment.

use crate::error::ControllerError;
use std::net::SocketAddr;
use std::time::Duration;

const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_CONCURRENCY: u16 = 4;
const DEFAULT_DEBOUNCE_SECS: u64 = 1;

/// Runtime settings of the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Namespace to watch, `None` for all namespaces (`WATCH_NAMESPACE`)
    pub watch_namespace: Option<String>,
    /// Listen address of the probe and metrics server (`METRICS_ADDR`)
    pub metrics_addr: SocketAddr,
    /// Clusters reconciled in parallel (`RECONCILE_CONCURRENCY`)
    pub concurrency: u16,
    /// Quiet period after the last event before a pass starts (`RECONCILE_DEBOUNCE_SECS`)
    pub debounce: Duration,
}

impl OperatorConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let watch_namespace = lookup("WATCH_NAMESPACE")
            .map(|ns| ns.trim().to_string())
            .filter(|ns| !ns.is_empty());

        let metrics_addr = lookup("METRICS_ADDR")
            .unwrap_or_else(|| DEFAULT_METRICS_ADDR.to_string())
            .parse::<SocketAddr>()
            .map_err(|e| ControllerError::InvalidConfig(format!("METRICS_ADDR: {}", e)))?;

        let concurrency = match lookup("RECONCILE_CONCURRENCY") {
            Some(v) => v.trim().parse::<u16>().map_err(|e| {
                ControllerError::InvalidConfig(format!("RECONCILE_CONCURRENCY: {}", e))
            })?,
            None => DEFAULT_CONCURRENCY,
        };
        if concurrency == 0 {
            return Err(ControllerError::InvalidConfig(
                "RECONCILE_CONCURRENCY must be at least 1".to_string(),
            ));
        }

        let debounce_secs = match lookup("RECONCILE_DEBOUNCE_SECS") {
            Some(v) => v.trim().parse::<u64>().map_err(|e| {
                ControllerError::InvalidConfig(format!("RECONCILE_DEBOUNCE_SECS: {}", e))
            })?,
            None => DEFAULT_DEBOUNCE_SECS,
        };

        Ok(Self {
            watch_namespace,
            metrics_addr,
            concurrency,
            debounce: Duration::from_secs(debounce_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = OperatorConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.watch_namespace, None);
        assert_eq!(config.metrics_addr, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.debounce, Duration::from_secs(1));
    }

    #[test]
    fn test_overrides() {
        let config = OperatorConfig::from_lookup(lookup(&[
            ("WATCH_NAMESPACE", "storageos"),
            ("METRICS_ADDR", "127.0.0.1:9090"),
            ("RECONCILE_CONCURRENCY", "8"),
            ("RECONCILE_DEBOUNCE_SECS", "0"),
        ]))
        .unwrap();
        assert_eq!(config.watch_namespace.as_deref(), Some("storageos"));
        assert_eq!(config.metrics_addr.port(), 9090);
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.debounce, Duration::ZERO);
    }

    #[test]
    fn test_blank_namespace_means_all() {
        let config = OperatorConfig::from_lookup(lookup(&[("WATCH_NAMESPACE", "  ")])).unwrap();
        assert_eq!(config.watch_namespace, None);
    }

    #[test]
    fn test_invalid_values_fail() {
        for vars in [
            [("METRICS_ADDR", "not-an-address")],
            [("RECONCILE_CONCURRENCY", "zero")],
            [("RECONCILE_CONCURRENCY", "0")],
            [("RECONCILE_DEBOUNCE_SECS", "-1")],
        ] {
            let err = OperatorConfig::from_lookup(lookup(&vars)).unwrap_err();
            assert!(matches!(err, ControllerError::InvalidConfig(_)), "{:?}", vars);
        }
    }
}
