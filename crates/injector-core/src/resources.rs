//! Resource value types held by the state container.
//!
//! Each type mirrors only the fields of the Kubernetes object the controller
//! cares about. Watchers normalize live objects into these values, and the
//! structural equality engine decides whether a new value is a real change.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{Namespace, Pod, PodTemplateSpec, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crds::{
    AgentConfiguration, AgentConfigurationSpec, AgentConnection, AgentConnectionSpec,
    AgentInjector, AgentInjectorSpec, AgentInjectorTemplate, ClusterAgentInjector,
    ClusterAgentInjectorSpec, LabelExpression, LocalResourceReference, NamespaceSelector,
    PodSelector, SecretKeyReference, WorkloadSelector,
};

use crate::annotations::INJECTION_CONDITION_TYPE;
use crate::equality::{EqualityEngine, Structural};
use crate::error::CoreError;
use crate::structural;

/// Every kind the state container tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ResourceKind {
    /// `AgentInjector`
    AgentInjector,
    /// `ClusterAgentInjector`
    ClusterAgentInjector,
    /// `AgentConnection`
    AgentConnection,
    /// `AgentConfiguration`
    AgentConfiguration,
    /// `v1/Secret`
    Secret,
    /// `v1/Namespace`
    Namespace,
    /// `apps/v1/Deployment`
    Deployment,
    /// `apps/v1/DaemonSet`
    DaemonSet,
    /// `apps/v1/StatefulSet`
    StatefulSet,
    /// `apps.openshift.io/v1/DeploymentConfig`
    DeploymentConfig,
    /// `v1/Pod`
    Pod,
}

impl ResourceKind {
    /// Kinds carrying a pod template
    pub const WORKLOADS: [ResourceKind; 4] = [
        ResourceKind::Deployment,
        ResourceKind::DaemonSet,
        ResourceKind::StatefulSet,
        ResourceKind::DeploymentConfig,
    ];

    /// Kubernetes kind name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AgentInjector => "AgentInjector",
            Self::ClusterAgentInjector => "ClusterAgentInjector",
            Self::AgentConnection => "AgentConnection",
            Self::AgentConfiguration => "AgentConfiguration",
            Self::Secret => "Secret",
            Self::Namespace => "Namespace",
            Self::Deployment => "Deployment",
            Self::DaemonSet => "DaemonSet",
            Self::StatefulSet => "StatefulSet",
            Self::DeploymentConfig => "DeploymentConfig",
            Self::Pod => "Pod",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable key of a tracked resource.
///
/// Namespace and name are compared case-insensitively; cluster-scoped
/// resources use an empty namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ResourceIdentity {
    kind: ResourceKind,
    namespace: String,
    name: String,
}

impl ResourceIdentity {
    /// Identity of a namespaced resource
    pub fn namespaced(kind: ResourceKind, namespace: &str, name: &str) -> Self {
        Self {
            kind,
            namespace: namespace.to_lowercase(),
            name: name.to_lowercase(),
        }
    }

    /// Identity of a cluster-scoped resource
    pub fn cluster(kind: ResourceKind, name: &str) -> Self {
        Self::namespaced(kind, "", name)
    }

    /// Resource kind
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Lowercased namespace (empty for cluster-scoped resources)
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Lowercased name
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{} {}", self.kind, self.name)
        } else {
            write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
        }
    }
}

// CRD spec types are compared structurally as part of the resources embedding them.
structural!(LocalResourceReference { name });
structural!(SecretKeyReference { secret_name, secret_key });
structural!(WorkloadSelector { namespaces, labels });
structural!(LabelExpression { key, operator, values });
structural!(PodSelector { expressions });
structural!(AgentInjectorSpec {
    enabled,
    agent_type,
    selector,
    pod_selector,
    connection,
    configuration,
});
structural!(NamespaceSelector { name_patterns, label_patterns });
structural!(AgentInjectorTemplate {
    enabled,
    agent_type,
    labels,
    pod_selector,
    connection,
    configuration,
});
structural!(ClusterAgentInjectorSpec { namespace_selector, template });
structural!(AgentConnectionSpec { url, token, user_name, service_key });
structural!(AgentConfigurationSpec {
    yaml,
    suppress_default_server_name,
    suppress_default_application_name,
});

/// Observed `AgentInjector`.
#[derive(Debug, Clone, Serialize)]
pub struct AgentInjectorResource {
    /// Namespace
    pub namespace: String,
    /// Name
    pub name: String,
    /// Object labels (marks injectors generated from cluster templates)
    pub labels: BTreeMap<String, String>,
    /// Spec as declared
    pub spec: AgentInjectorSpec,
}
structural!(AgentInjectorResource { namespace, name, labels, spec });

impl AgentInjectorResource {
    /// Namespace allow-list, defaulting to the injector's own namespace
    pub fn allowed_namespaces(&self) -> Vec<&str> {
        if self.spec.selector.namespaces.is_empty() {
            vec![self.namespace.as_str()]
        } else {
            self.spec.selector.namespaces.iter().map(String::as_str).collect()
        }
    }
}

/// Observed `ClusterAgentInjector`.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterAgentInjectorResource {
    /// Name
    pub name: String,
    /// Spec as declared
    pub spec: ClusterAgentInjectorSpec,
}
structural!(ClusterAgentInjectorResource { name, spec });

/// Observed `AgentConnection`.
#[derive(Debug, Clone, Serialize)]
pub struct AgentConnectionResource {
    /// Namespace
    pub namespace: String,
    /// Name
    pub name: String,
    /// Spec as declared
    pub spec: AgentConnectionSpec,
}
structural!(AgentConnectionResource { namespace, name, spec });

/// Observed `AgentConfiguration`.
#[derive(Debug, Clone, Serialize)]
pub struct AgentConfigurationResource {
    /// Namespace
    pub namespace: String,
    /// Name
    pub name: String,
    /// Spec as declared
    pub spec: AgentConfigurationSpec,
}
structural!(AgentConfigurationResource { namespace, name, spec });

/// Observed Secret.
///
/// Values are never held; each key maps to the SHA-256 of its content.
#[derive(Debug, Clone, Serialize)]
pub struct SecretResource {
    /// Namespace
    pub namespace: String,
    /// Name
    pub name: String,
    /// Data key -> hex SHA-256 of the value
    pub key_hashes: BTreeMap<String, String>,
}
structural!(SecretResource { namespace, name, key_hashes });

/// Observed Namespace.
#[derive(Debug, Clone, Serialize)]
pub struct NamespaceResource {
    /// Name
    pub name: String,
    /// Labels
    pub labels: BTreeMap<String, String>,
}
structural!(NamespaceResource { name, labels });

/// Metadata of a workload's pod template.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PodTemplateResource {
    /// Template labels
    pub labels: BTreeMap<String, String>,
    /// Template annotations, `None` when the template has no annotation map
    pub annotations: Option<BTreeMap<String, String>>,
}
structural!(PodTemplateResource { labels, annotations });

/// Observed Deployment.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentResource {
    /// Namespace
    pub namespace: String,
    /// Name
    pub name: String,
    /// Workload labels
    pub labels: BTreeMap<String, String>,
    /// Pod selector `matchLabels`
    pub selector: BTreeMap<String, String>,
    /// Desired replica count
    pub replicas: Option<i32>,
    /// Pod template metadata
    pub template: PodTemplateResource,
}
structural!(DeploymentResource { namespace, name, labels, selector, replicas, template });

/// Observed DaemonSet.
#[derive(Debug, Clone, Serialize)]
pub struct DaemonSetResource {
    /// Namespace
    pub namespace: String,
    /// Name
    pub name: String,
    /// Workload labels
    pub labels: BTreeMap<String, String>,
    /// Pod selector `matchLabels`
    pub selector: BTreeMap<String, String>,
    /// Pod template metadata
    pub template: PodTemplateResource,
}
structural!(DaemonSetResource { namespace, name, labels, selector, template });

/// Observed StatefulSet.
#[derive(Debug, Clone, Serialize)]
pub struct StatefulSetResource {
    /// Namespace
    pub namespace: String,
    /// Name
    pub name: String,
    /// Workload labels
    pub labels: BTreeMap<String, String>,
    /// Pod selector `matchLabels`
    pub selector: BTreeMap<String, String>,
    /// Desired replica count
    pub replicas: Option<i32>,
    /// Pod template metadata
    pub template: PodTemplateResource,
}
structural!(StatefulSetResource { namespace, name, labels, selector, replicas, template });

/// Observed OpenShift DeploymentConfig.
///
/// Its selector is a plain label map rather than a `LabelSelector`.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentConfigResource {
    /// Namespace
    pub namespace: String,
    /// Name
    pub name: String,
    /// Workload labels
    pub labels: BTreeMap<String, String>,
    /// Pod selector labels
    pub selector: BTreeMap<String, String>,
    /// Desired replica count
    pub replicas: Option<i32>,
    /// Pod template metadata
    pub template: PodTemplateResource,
}
structural!(DeploymentConfigResource { namespace, name, labels, selector, replicas, template });

/// Injection convergence condition recorded on a pod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InjectionConditionResource {
    /// `True` or `False`
    pub status: String,
    /// Machine readable reason
    pub reason: String,
    /// Human readable message
    pub message: String,
}
structural!(InjectionConditionResource { status, reason, message });

/// Observed Pod.
#[derive(Debug, Clone, Serialize)]
pub struct PodResource {
    /// Namespace
    pub namespace: String,
    /// Name
    pub name: String,
    /// Pod labels
    pub labels: BTreeMap<String, String>,
    /// Pod annotations
    pub annotations: BTreeMap<String, String>,
    /// Injection condition, if one was ever recorded
    pub injection_condition: Option<InjectionConditionResource>,
}
structural!(PodResource { namespace, name, labels, annotations, injection_condition });

/// Any tracked resource value.
#[derive(Debug, Clone, Serialize)]
pub enum Resource {
    /// `AgentInjector`
    AgentInjector(AgentInjectorResource),
    /// `ClusterAgentInjector`
    ClusterAgentInjector(ClusterAgentInjectorResource),
    /// `AgentConnection`
    AgentConnection(AgentConnectionResource),
    /// `AgentConfiguration`
    AgentConfiguration(AgentConfigurationResource),
    /// Secret
    Secret(SecretResource),
    /// Namespace
    Namespace(NamespaceResource),
    /// Deployment
    Deployment(DeploymentResource),
    /// DaemonSet
    DaemonSet(DaemonSetResource),
    /// StatefulSet
    StatefulSet(StatefulSetResource),
    /// DeploymentConfig
    DeploymentConfig(DeploymentConfigResource),
    /// Pod
    Pod(PodResource),
}

impl Resource {
    /// Kind of the carried value
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::AgentInjector(_) => ResourceKind::AgentInjector,
            Self::ClusterAgentInjector(_) => ResourceKind::ClusterAgentInjector,
            Self::AgentConnection(_) => ResourceKind::AgentConnection,
            Self::AgentConfiguration(_) => ResourceKind::AgentConfiguration,
            Self::Secret(_) => ResourceKind::Secret,
            Self::Namespace(_) => ResourceKind::Namespace,
            Self::Deployment(_) => ResourceKind::Deployment,
            Self::DaemonSet(_) => ResourceKind::DaemonSet,
            Self::StatefulSet(_) => ResourceKind::StatefulSet,
            Self::DeploymentConfig(_) => ResourceKind::DeploymentConfig,
            Self::Pod(_) => ResourceKind::Pod,
        }
    }

    /// Identity derived from the carried value
    pub fn identity(&self) -> ResourceIdentity {
        let kind = self.kind();
        let (namespace, name) = match self {
            Self::ClusterAgentInjector(r) => return ResourceIdentity::cluster(kind, &r.name),
            Self::Namespace(r) => return ResourceIdentity::cluster(kind, &r.name),
            Self::AgentInjector(r) => (&r.namespace, &r.name),
            Self::AgentConnection(r) => (&r.namespace, &r.name),
            Self::AgentConfiguration(r) => (&r.namespace, &r.name),
            Self::Secret(r) => (&r.namespace, &r.name),
            Self::Deployment(r) => (&r.namespace, &r.name),
            Self::DaemonSet(r) => (&r.namespace, &r.name),
            Self::StatefulSet(r) => (&r.namespace, &r.name),
            Self::DeploymentConfig(r) => (&r.namespace, &r.name),
            Self::Pod(r) => (&r.namespace, &r.name),
        };
        ResourceIdentity::namespaced(kind, namespace, name)
    }

    /// Structural comparison through the engine's cached plans.
    ///
    /// Values of different kinds are never equal.
    pub fn equal_in(&self, other: &Self, engine: &EqualityEngine) -> Result<bool, CoreError> {
        match (self, other) {
            (Self::AgentInjector(a), Self::AgentInjector(b)) => engine.equal(Some(a), Some(b)),
            (Self::ClusterAgentInjector(a), Self::ClusterAgentInjector(b)) => {
                engine.equal(Some(a), Some(b))
            }
            (Self::AgentConnection(a), Self::AgentConnection(b)) => engine.equal(Some(a), Some(b)),
            (Self::AgentConfiguration(a), Self::AgentConfiguration(b)) => {
                engine.equal(Some(a), Some(b))
            }
            (Self::Secret(a), Self::Secret(b)) => engine.equal(Some(a), Some(b)),
            (Self::Namespace(a), Self::Namespace(b)) => engine.equal(Some(a), Some(b)),
            (Self::Deployment(a), Self::Deployment(b)) => engine.equal(Some(a), Some(b)),
            (Self::DaemonSet(a), Self::DaemonSet(b)) => engine.equal(Some(a), Some(b)),
            (Self::StatefulSet(a), Self::StatefulSet(b)) => engine.equal(Some(a), Some(b)),
            (Self::DeploymentConfig(a), Self::DeploymentConfig(b)) => {
                engine.equal(Some(a), Some(b))
            }
            (Self::Pod(a), Self::Pod(b)) => engine.equal(Some(a), Some(b)),
            _ => Ok(false),
        }
    }

    /// Workload view, if this resource carries a pod template
    pub fn as_workload(&self) -> Option<Workload<'_>> {
        match self {
            Self::Deployment(r) => Some(Workload::Deployment(r)),
            Self::DaemonSet(r) => Some(Workload::DaemonSet(r)),
            Self::StatefulSet(r) => Some(Workload::StatefulSet(r)),
            Self::DeploymentConfig(r) => Some(Workload::DeploymentConfig(r)),
            _ => None,
        }
    }
}

impl Structural for Resource {
    fn structural_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::AgentInjector(a), Self::AgentInjector(b)) => a.structural_eq(b),
            (Self::ClusterAgentInjector(a), Self::ClusterAgentInjector(b)) => a.structural_eq(b),
            (Self::AgentConnection(a), Self::AgentConnection(b)) => a.structural_eq(b),
            (Self::AgentConfiguration(a), Self::AgentConfiguration(b)) => a.structural_eq(b),
            (Self::Secret(a), Self::Secret(b)) => a.structural_eq(b),
            (Self::Namespace(a), Self::Namespace(b)) => a.structural_eq(b),
            (Self::Deployment(a), Self::Deployment(b)) => a.structural_eq(b),
            (Self::DaemonSet(a), Self::DaemonSet(b)) => a.structural_eq(b),
            (Self::StatefulSet(a), Self::StatefulSet(b)) => a.structural_eq(b),
            (Self::DeploymentConfig(a), Self::DeploymentConfig(b)) => a.structural_eq(b),
            (Self::Pod(a), Self::Pod(b)) => a.structural_eq(b),
            _ => false,
        }
    }
}

/// Borrowed view over any resource carrying a pod template.
#[derive(Debug, Clone, Copy)]
pub enum Workload<'a> {
    /// Deployment
    Deployment(&'a DeploymentResource),
    /// DaemonSet
    DaemonSet(&'a DaemonSetResource),
    /// StatefulSet
    StatefulSet(&'a StatefulSetResource),
    /// DeploymentConfig
    DeploymentConfig(&'a DeploymentConfigResource),
}

impl<'a> Workload<'a> {
    /// Workload kind
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Deployment(_) => ResourceKind::Deployment,
            Self::DaemonSet(_) => ResourceKind::DaemonSet,
            Self::StatefulSet(_) => ResourceKind::StatefulSet,
            Self::DeploymentConfig(_) => ResourceKind::DeploymentConfig,
        }
    }

    /// Namespace
    pub fn namespace(&self) -> &'a str {
        match self {
            Self::Deployment(r) => &r.namespace,
            Self::DaemonSet(r) => &r.namespace,
            Self::StatefulSet(r) => &r.namespace,
            Self::DeploymentConfig(r) => &r.namespace,
        }
    }

    /// Name
    pub fn name(&self) -> &'a str {
        match self {
            Self::Deployment(r) => &r.name,
            Self::DaemonSet(r) => &r.name,
            Self::StatefulSet(r) => &r.name,
            Self::DeploymentConfig(r) => &r.name,
        }
    }

    /// Workload labels
    pub fn labels(&self) -> &'a BTreeMap<String, String> {
        match self {
            Self::Deployment(r) => &r.labels,
            Self::DaemonSet(r) => &r.labels,
            Self::StatefulSet(r) => &r.labels,
            Self::DeploymentConfig(r) => &r.labels,
        }
    }

    /// Pod template metadata
    pub fn pod_template(&self) -> &'a PodTemplateResource {
        match self {
            Self::Deployment(r) => &r.template,
            Self::DaemonSet(r) => &r.template,
            Self::StatefulSet(r) => &r.template,
            Self::DeploymentConfig(r) => &r.template,
        }
    }

    /// Labels a pod must carry to belong to this workload
    pub fn selector(&self) -> &'a BTreeMap<String, String> {
        match self {
            Self::Deployment(r) => &r.selector,
            Self::DaemonSet(r) => &r.selector,
            Self::StatefulSet(r) => &r.selector,
            Self::DeploymentConfig(r) => &r.selector,
        }
    }

    /// State container key
    pub fn identity(&self) -> ResourceIdentity {
        ResourceIdentity::namespaced(self.kind(), self.namespace(), self.name())
    }

    /// True when `pod` is in this workload's namespace and satisfies its selector.
    ///
    /// An empty selector selects nothing.
    pub fn selects_pod(&self, pod: &PodResource) -> bool {
        self.selects_labels(&pod.namespace, &pod.labels)
    }

    /// Same as [`Workload::selects_pod`] for a pod not yet in the state.
    pub fn selects_labels(&self, namespace: &str, labels: &BTreeMap<String, String>) -> bool {
        let selector = self.selector();
        !selector.is_empty()
            && namespace.eq_ignore_ascii_case(self.namespace())
            && selector
                .iter()
                .all(|(key, value)| labels.get(key) == Some(value))
    }
}

fn labels_of(meta: &ObjectMeta) -> BTreeMap<String, String> {
    meta.labels.clone().unwrap_or_default()
}

fn match_labels(selector: &LabelSelector) -> BTreeMap<String, String> {
    selector.match_labels.clone().unwrap_or_default()
}

/// Normalizes a pod template.
pub fn pod_template_of(template: &PodTemplateSpec) -> PodTemplateResource {
    let metadata = template.metadata.as_ref();
    PodTemplateResource {
        labels: metadata.and_then(|m| m.labels.clone()).unwrap_or_default(),
        annotations: metadata.and_then(|m| m.annotations.clone()),
    }
}

/// Hex SHA-256 of `bytes`
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

impl From<&AgentInjector> for AgentInjectorResource {
    fn from(obj: &AgentInjector) -> Self {
        Self {
            namespace: obj.metadata.namespace.clone().unwrap_or_default(),
            name: obj.metadata.name.clone().unwrap_or_default(),
            labels: labels_of(&obj.metadata),
            spec: obj.spec.clone(),
        }
    }
}

impl From<&ClusterAgentInjector> for ClusterAgentInjectorResource {
    fn from(obj: &ClusterAgentInjector) -> Self {
        Self {
            name: obj.metadata.name.clone().unwrap_or_default(),
            spec: obj.spec.clone(),
        }
    }
}

impl From<&AgentConnection> for AgentConnectionResource {
    fn from(obj: &AgentConnection) -> Self {
        Self {
            namespace: obj.metadata.namespace.clone().unwrap_or_default(),
            name: obj.metadata.name.clone().unwrap_or_default(),
            spec: obj.spec.clone(),
        }
    }
}

impl From<&AgentConfiguration> for AgentConfigurationResource {
    fn from(obj: &AgentConfiguration) -> Self {
        Self {
            namespace: obj.metadata.namespace.clone().unwrap_or_default(),
            name: obj.metadata.name.clone().unwrap_or_default(),
            spec: obj.spec.clone(),
        }
    }
}

impl From<&Secret> for SecretResource {
    fn from(obj: &Secret) -> Self {
        let mut key_hashes: BTreeMap<String, String> = obj
            .data
            .iter()
            .flatten()
            .map(|(key, value)| (key.clone(), sha256_hex(&value.0)))
            .collect();
        // stringData is write-only on the API server but shows up in locally built objects
        for (key, value) in obj.string_data.iter().flatten() {
            key_hashes.insert(key.clone(), sha256_hex(value.as_bytes()));
        }
        Self {
            namespace: obj.metadata.namespace.clone().unwrap_or_default(),
            name: obj.metadata.name.clone().unwrap_or_default(),
            key_hashes,
        }
    }
}

impl From<&Namespace> for NamespaceResource {
    fn from(obj: &Namespace) -> Self {
        Self {
            name: obj.metadata.name.clone().unwrap_or_default(),
            labels: labels_of(&obj.metadata),
        }
    }
}

impl From<&Deployment> for DeploymentResource {
    fn from(obj: &Deployment) -> Self {
        let spec = obj.spec.as_ref();
        Self {
            namespace: obj.metadata.namespace.clone().unwrap_or_default(),
            name: obj.metadata.name.clone().unwrap_or_default(),
            labels: labels_of(&obj.metadata),
            selector: spec.map(|s| match_labels(&s.selector)).unwrap_or_default(),
            replicas: spec.and_then(|s| s.replicas),
            template: spec.map(|s| pod_template_of(&s.template)).unwrap_or_default(),
        }
    }
}

impl From<&DaemonSet> for DaemonSetResource {
    fn from(obj: &DaemonSet) -> Self {
        let spec = obj.spec.as_ref();
        Self {
            namespace: obj.metadata.namespace.clone().unwrap_or_default(),
            name: obj.metadata.name.clone().unwrap_or_default(),
            labels: labels_of(&obj.metadata),
            selector: spec.map(|s| match_labels(&s.selector)).unwrap_or_default(),
            template: spec.map(|s| pod_template_of(&s.template)).unwrap_or_default(),
        }
    }
}

impl From<&StatefulSet> for StatefulSetResource {
    fn from(obj: &StatefulSet) -> Self {
        let spec = obj.spec.as_ref();
        Self {
            namespace: obj.metadata.namespace.clone().unwrap_or_default(),
            name: obj.metadata.name.clone().unwrap_or_default(),
            labels: labels_of(&obj.metadata),
            selector: spec.map(|s| match_labels(&s.selector)).unwrap_or_default(),
            replicas: spec.and_then(|s| s.replicas),
            template: spec.map(|s| pod_template_of(&s.template)).unwrap_or_default(),
        }
    }
}

impl From<&Pod> for PodResource {
    fn from(obj: &Pod) -> Self {
        let injection_condition = obj
            .status
            .as_ref()
            .and_then(|status| status.conditions.as_ref())
            .and_then(|conditions| {
                conditions
                    .iter()
                    .find(|condition| condition.type_ == INJECTION_CONDITION_TYPE)
            })
            .map(|condition| InjectionConditionResource {
                status: condition.status.clone(),
                reason: condition.reason.clone().unwrap_or_default(),
                message: condition.message.clone().unwrap_or_default(),
            });

        Self {
            namespace: obj.metadata.namespace.clone().unwrap_or_default(),
            name: obj.metadata.name.clone().unwrap_or_default(),
            labels: labels_of(&obj.metadata),
            annotations: obj.metadata.annotations.clone().unwrap_or_default(),
            injection_condition,
        }
    }
}
