//! Platform object store client
//!
//! Access to the Kubernetes objects the StorageOS cluster operator reads and
//! writes: the `StorageOSCluster` resources themselves and every dependent
//! object (RBAC, configuration, workloads, storage integration) they own.
//!
//! # Example
//!
//! ```no_run
//! use platform_client::{KubePlatform, ObjectKind, PlatformClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = kube::Client::try_default().await?;
//! let platform = KubePlatform::new(client);
//!
//! let clusters = platform.list_clusters("storageos").await?;
//! let workloads = platform
//!     .list_objects(ObjectKind::StatefulSet, "storageos", "storageos.com/cluster=example")
//!     .await?;
//! println!("{} clusters, {} workloads", clusters.len(), workloads.len());
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod platform_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::KubePlatform;
pub use error::PlatformError;
pub use models::*;
pub use platform_trait::PlatformClient;
#[cfg(feature = "test-util")]
pub use mock::{FailPoint, MockPlatform, Operation, timestamp_from_secs};
