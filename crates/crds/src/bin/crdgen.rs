//! Prints every agent injector CRD as a multi-document YAML stream.
//!
//! ```sh
//! cargo run -p crds --bin crdgen > deploy/crds.yaml
//! ```

use crds::{AgentConfiguration, AgentConnection, AgentInjector, ClusterAgentInjector};
use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    let crds = [
        AgentInjector::crd(),
        ClusterAgentInjector::crd(),
        AgentConnection::crd(),
        AgentConfiguration::crd(),
    ];

    for crd in crds {
        println!("---");
        print!("{}", serde_yaml::to_string(&crd)?);
    }

    Ok(())
}
