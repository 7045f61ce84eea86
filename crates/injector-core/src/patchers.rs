//! Per-runtime patchers.
//!
//! Each agent type knows which environment variables start its agent and how
//! to fold them into a container. The table is keyed by [`AgentType`].

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Container, EnvVar, VolumeMount};

use crds::AgentType;

use crate::dispatch::ResolvedInjection;

/// Volume holding the agent binaries
pub const AGENT_VOLUME_NAME: &str = "agents-injector-agent";
/// Where the agent volume is mounted in every container
pub const AGENT_MOUNT_PATH: &str = "/opt/agents-injector";

/// What a patcher needs to know about one injection.
#[derive(Debug, Clone)]
pub struct InjectionContext<'a> {
    /// Injector chosen for the workload
    pub resolved: &'a ResolvedInjection,
    /// Workload owning the pod
    pub workload_name: String,
    /// Namespace of that workload
    pub workload_namespace: String,
    /// Injection timestamp
    pub injected_on: DateTime<Utc>,
}

impl InjectionContext<'_> {
    /// Agent type of the chosen injector
    pub fn agent_type(&self) -> AgentType {
        self.resolved.ready.injector.spec.agent_type
    }
}

/// Runtime-specific agent wiring.
pub trait AgentPatcher: Send + Sync + std::fmt::Debug {
    /// Runtime handled by this patcher
    fn agent_type(&self) -> AgentType;

    /// Environment variables loading the agent, in order.
    fn generate_env_vars(&self, context: &InjectionContext<'_>) -> Vec<EnvVar>;

    /// Adds the agent to `container`.
    fn patch_container(&self, container: &mut Container, context: &InjectionContext<'_>) {
        for var in self.generate_env_vars(context) {
            upsert_env(container, var);
        }
        mount_agent_volume(container);
    }
}

/// Sets `var` on `container`, replacing a variable of the same name.
pub fn upsert_env(container: &mut Container, var: EnvVar) {
    let env = container.env.get_or_insert_with(Vec::new);
    match env.iter_mut().find(|existing| existing.name == var.name) {
        Some(existing) => *existing = var,
        None => env.push(var),
    }
}

/// Mounts the agent volume read-only, once.
pub fn mount_agent_volume(container: &mut Container) {
    let mounts = container.volume_mounts.get_or_insert_with(Vec::new);
    if mounts.iter().any(|mount| mount.name == AGENT_VOLUME_NAME) {
        return;
    }
    mounts.push(VolumeMount {
        name: AGENT_VOLUME_NAME.to_string(),
        mount_path: AGENT_MOUNT_PATH.to_string(),
        read_only: Some(true),
        ..Default::default()
    });
}

fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

/// Appends `addition` to the current plain value of `name` in `container`.
fn extended_value(container: &Container, name: &str, addition: &str, separator: &str) -> String {
    let current = container
        .env
        .iter()
        .flatten()
        .find(|var| var.name == name)
        .and_then(|var| var.value.as_deref())
        .filter(|value| !value.is_empty());
    match current {
        Some(current) if current.contains(addition) => current.to_string(),
        Some(current) => format!("{}{}{}", current, separator, addition),
        None => addition.to_string(),
    }
}

/// JVM agent through `JAVA_TOOL_OPTIONS`.
#[derive(Debug, Default)]
pub struct JavaPatcher;

impl JavaPatcher {
    fn option() -> String {
        format!("-javaagent:{}/java/agent.jar", AGENT_MOUNT_PATH)
    }
}

impl AgentPatcher for JavaPatcher {
    fn agent_type(&self) -> AgentType {
        AgentType::Java
    }

    fn generate_env_vars(&self, _context: &InjectionContext<'_>) -> Vec<EnvVar> {
        vec![env("JAVA_TOOL_OPTIONS", Self::option())]
    }

    fn patch_container(&self, container: &mut Container, _context: &InjectionContext<'_>) {
        let options = extended_value(container, "JAVA_TOOL_OPTIONS", &Self::option(), " ");
        upsert_env(container, env("JAVA_TOOL_OPTIONS", options));
        mount_agent_volume(container);
    }
}

/// CoreCLR profiler.
#[derive(Debug, Default)]
pub struct DotNetPatcher;

impl AgentPatcher for DotNetPatcher {
    fn agent_type(&self) -> AgentType {
        AgentType::DotNet
    }

    fn generate_env_vars(&self, _context: &InjectionContext<'_>) -> Vec<EnvVar> {
        vec![
            env("CORECLR_ENABLE_PROFILING", "1"),
            env("CORECLR_PROFILER", "{57e1aa68-2229-41aa-9931-a6e93bbc64d8}"),
            env(
                "CORECLR_PROFILER_PATH",
                format!("{}/dotnet/libagentprofiler.so", AGENT_MOUNT_PATH),
            ),
            env("AGENT_DOTNET_HOME", format!("{}/dotnet", AGENT_MOUNT_PATH)),
        ]
    }
}

/// Node.js agent preloaded through `NODE_OPTIONS`.
#[derive(Debug, Default)]
pub struct NodeJsPatcher;

impl NodeJsPatcher {
    fn option() -> String {
        format!("--require {}/nodejs/agent.js", AGENT_MOUNT_PATH)
    }
}

impl AgentPatcher for NodeJsPatcher {
    fn agent_type(&self) -> AgentType {
        AgentType::NodeJs
    }

    fn generate_env_vars(&self, _context: &InjectionContext<'_>) -> Vec<EnvVar> {
        vec![env("NODE_OPTIONS", Self::option())]
    }

    fn patch_container(&self, container: &mut Container, _context: &InjectionContext<'_>) {
        let options = extended_value(container, "NODE_OPTIONS", &Self::option(), " ");
        upsert_env(container, env("NODE_OPTIONS", options));
        mount_agent_volume(container);
    }
}

/// Python agent bootstrapped through `PYTHONPATH`.
#[derive(Debug, Default)]
pub struct PythonPatcher;

impl AgentPatcher for PythonPatcher {
    fn agent_type(&self) -> AgentType {
        AgentType::Python
    }

    fn generate_env_vars(&self, _context: &InjectionContext<'_>) -> Vec<EnvVar> {
        vec![
            env("PYTHONPATH", format!("{}/python", AGENT_MOUNT_PATH)),
            env("AGENT_PYTHON_BOOTSTRAP", "1"),
        ]
    }

    fn patch_container(&self, container: &mut Container, context: &InjectionContext<'_>) {
        let path = format!("{}/python", AGENT_MOUNT_PATH);
        for var in self.generate_env_vars(context) {
            let var = if var.name == "PYTHONPATH" {
                env("PYTHONPATH", extended_value(container, "PYTHONPATH", &path, ":"))
            } else {
                var
            };
            upsert_env(container, var);
        }
        mount_agent_volume(container);
    }
}

/// Patchers keyed by agent type.
#[derive(Debug, Clone, Default)]
pub struct PatcherTable {
    patchers: BTreeMap<AgentType, Arc<dyn AgentPatcher>>,
}

impl PatcherTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with the built-in patcher of every agent type
    pub fn with_defaults() -> Self {
        Self::new()
            .register(Arc::new(JavaPatcher))
            .register(Arc::new(DotNetPatcher))
            .register(Arc::new(NodeJsPatcher))
            .register(Arc::new(PythonPatcher))
    }

    /// Registers `patcher` for its agent type, replacing any previous one.
    pub fn register(mut self, patcher: Arc<dyn AgentPatcher>) -> Self {
        self.patchers.insert(patcher.agent_type(), patcher);
        self
    }

    /// Patcher for `agent_type`
    pub fn get(&self, agent_type: AgentType) -> Option<&Arc<dyn AgentPatcher>> {
        self.patchers.get(&agent_type)
    }

    /// Registered agent types
    pub fn agent_types(&self) -> impl Iterator<Item = AgentType> + '_ {
        self.patchers.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_every_agent_type() {
        let table = PatcherTable::with_defaults();
        let types: Vec<AgentType> = table.agent_types().collect();
        assert_eq!(
            types,
            vec![AgentType::Java, AgentType::DotNet, AgentType::NodeJs, AgentType::Python]
        );
    }

    #[test]
    fn test_extended_value_appends_once() {
        let mut container = Container {
            name: "app".to_string(),
            ..Default::default()
        };
        upsert_env(&mut container, env("JAVA_TOOL_OPTIONS", "-Xmx512m"));

        let option = JavaPatcher::option();
        let extended = extended_value(&container, "JAVA_TOOL_OPTIONS", &option, " ");
        assert_eq!(extended, format!("-Xmx512m {}", option));

        upsert_env(&mut container, env("JAVA_TOOL_OPTIONS", extended.clone()));
        assert_eq!(extended_value(&container, "JAVA_TOOL_OPTIONS", &option, " "), extended);
        assert_eq!(container.env.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn test_volume_is_mounted_once() {
        let mut container = Container::default();
        mount_agent_volume(&mut container);
        mount_agent_volume(&mut container);
        assert_eq!(container.volume_mounts.as_ref().unwrap().len(), 1);
    }
}
