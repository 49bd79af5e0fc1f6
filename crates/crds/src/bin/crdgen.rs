//! Prints the HostEnrollment CRD manifest as YAML.
//!
//! Usage: `cargo run --bin crdgen > deploy/crds/hostenrollment.yaml`

use crds::HostEnrollment;
use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    print!("{}", serde_yaml::to_string(&HostEnrollment::crd())?);
    Ok(())
}
