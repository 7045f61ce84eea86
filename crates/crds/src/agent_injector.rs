//! AgentInjector CRD
//!
//! Declares which workloads receive an agent, which runtime agent is used, and
//! which connection/configuration the agent is started with.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::references::LocalResourceReference;

/// Label placed on injectors generated from a `ClusterAgentInjector` template
pub const CLUSTER_INJECTOR_LABEL: &str = "agents.injector.io/cluster-injector";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[kube(
    group = "agents.injector.io",
    version = "v1beta1",
    kind = "AgentInjector",
    namespaced,
    shortname = "ai"
)]
#[serde(rename_all = "camelCase")]
pub struct AgentInjectorSpec {
    /// Disabled injectors never match any workload
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Runtime agent to inject
    pub agent_type: AgentType,

    /// Workload selection (namespace allow-list and label glob patterns)
    #[serde(default)]
    pub selector: WorkloadSelector,

    /// Pod label expressions evaluated at admission time
    #[serde(default)]
    pub pod_selector: PodSelector,

    /// AgentConnection in the same namespace
    pub connection: LocalResourceReference,

    /// Optional AgentConfiguration in the same namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<LocalResourceReference>,
}

pub(crate) fn default_enabled() -> bool {
    true
}

/// Runtime agent flavour.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
#[serde(rename_all = "PascalCase")]
pub enum AgentType {
    /// JVM agent
    #[serde(alias = "java")]
    Java,

    /// .NET Core profiler
    #[serde(alias = "dotnet", alias = "dotnet-core")]
    DotNet,

    /// Node.js agent
    #[serde(alias = "nodejs", alias = "node")]
    NodeJs,

    /// Python agent
    #[serde(alias = "python")]
    Python,
}

impl AgentType {
    /// Lowercase name used in volume paths and log messages
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Java => "java",
            Self::DotNet => "dotnet",
            Self::NodeJs => "nodejs",
            Self::Python => "python",
        }
    }
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Selects workloads carrying a pod template.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSelector {
    /// Namespace allow-list; empty means the injector's own namespace
    #[serde(default)]
    pub namespaces: Vec<String>,

    /// Label glob patterns (key pattern -> value pattern); any match selects the workload
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Ordered list of label match expressions, AND-ed together.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PodSelector {
    /// Expressions; empty matches every pod
    #[serde(default)]
    pub expressions: Vec<LabelExpression>,
}

/// A single label match expression.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LabelExpression {
    /// Label key
    pub key: String,

    /// Operator applied to the label value
    pub operator: LabelOperator,

    /// Values for `In` / `NotIn`; ignored by `Exists` / `DoesNotExist`
    #[serde(default)]
    pub values: Vec<String>,
}

/// Label expression operator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum LabelOperator {
    /// Label value is one of the given values
    In,
    /// Label value is not one of the given values (absent counts as not in)
    NotIn,
    /// Label key is present
    Exists,
    /// Label key is absent
    DoesNotExist,
}
