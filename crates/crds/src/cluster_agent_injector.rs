//! ClusterAgentInjector CRD
//!
//! Cluster-scoped template that materializes an `AgentInjector` into every
//! namespace matched by its namespace selector.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::agent_injector::{default_enabled, AgentType, PodSelector};
use crate::references::LocalResourceReference;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[kube(
    group = "agents.injector.io",
    version = "v1beta1",
    kind = "ClusterAgentInjector",
    shortname = "cai"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterAgentInjectorSpec {
    /// Namespaces receiving a generated injector
    #[serde(default)]
    pub namespace_selector: NamespaceSelector,

    /// Injector fields copied into each generated AgentInjector
    pub template: AgentInjectorTemplate,
}

/// Selects namespaces by name glob or by label globs.
///
/// A namespace matches when any name pattern matches its name, or when every
/// label pattern is satisfied by its labels.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceSelector {
    /// Namespace name glob patterns
    #[serde(default)]
    pub name_patterns: Vec<String>,

    /// Namespace label glob patterns (key pattern -> value pattern), all must match
    #[serde(default)]
    pub label_patterns: BTreeMap<String, String>,
}

/// AgentInjector fields minus the namespace allow-list.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AgentInjectorTemplate {
    /// Disabled templates generate disabled injectors
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Runtime agent to inject
    pub agent_type: AgentType,

    /// Workload label glob patterns
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// Pod label expressions
    #[serde(default)]
    pub pod_selector: PodSelector,

    /// AgentConnection name, resolved in each target namespace
    pub connection: LocalResourceReference,

    /// Optional AgentConfiguration name, resolved in each target namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<LocalResourceReference>,
}
