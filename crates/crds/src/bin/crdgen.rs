//! Prints the ConfigReloader CustomResourceDefinition as YAML.
//!
//! Usage: `cargo run -p crds --bin crdgen > config/crd/configreloader.yaml`

use crds::ConfigReloader;
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crd = ConfigReloader::crd();
    print!("{}", serde_yaml::to_string(&crd)?);
    Ok(())
}
