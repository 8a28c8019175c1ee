//! StorageOS CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the StorageOS cluster operator.

pub mod storageos_cluster;

pub use storageos_cluster::*;
