//! Prints the StorageOSCluster CRD manifest.
//!
//! Usage: `cargo run --bin crdgen | kubectl apply -f -`

use crds::StorageOSCluster;
use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    let manifest = serde_yaml::to_string(&StorageOSCluster::crd())?;
    print!("{manifest}");
    Ok(())
}
