//! AgentConfiguration CRD
//!
//! Agent configuration file content handed to the injected agent.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[kube(
    group = "agents.injector.io",
    version = "v1beta1",
    kind = "AgentConfiguration",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfigurationSpec {
    /// Agent YAML configuration passed through verbatim
    #[serde(default)]
    pub yaml: String,

    /// Do not derive a server name from the pod
    #[serde(default)]
    pub suppress_default_server_name: bool,

    /// Do not derive an application name from the workload
    #[serde(default)]
    pub suppress_default_application_name: bool,
}
