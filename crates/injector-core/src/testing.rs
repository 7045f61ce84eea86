//! Fixtures shared by the unit tests.

use std::collections::BTreeMap;

use crds::{
    AgentConnectionSpec, AgentInjectorSpec, AgentType, LocalResourceReference, PodSelector,
    SecretKeyReference, WorkloadSelector,
};

use crate::resources::{
    sha256_hex, AgentConnectionResource, AgentInjectorResource, DeploymentResource,
    NamespaceResource, PodResource, PodTemplateResource, Resource, SecretResource,
};
use crate::state::StateContainer;

pub(crate) fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

pub(crate) fn upsert(state: &StateContainer, resource: Resource) {
    state.upsert(resource.identity(), resource).unwrap();
}

pub(crate) fn injector(namespace: &str, name: &str) -> AgentInjectorResource {
    AgentInjectorResource {
        namespace: namespace.to_string(),
        name: name.to_string(),
        labels: BTreeMap::new(),
        spec: AgentInjectorSpec {
            enabled: true,
            agent_type: AgentType::Java,
            selector: WorkloadSelector::default(),
            pod_selector: PodSelector::default(),
            connection: LocalResourceReference::new("agent-connection"),
            configuration: None,
        },
    }
}

pub(crate) fn connection(namespace: &str) -> AgentConnectionResource {
    AgentConnectionResource {
        namespace: namespace.to_string(),
        name: "agent-connection".to_string(),
        spec: AgentConnectionSpec {
            url: "https://collector.example.com".to_string(),
            token: SecretKeyReference::new("agent-token", "token"),
            user_name: None,
            service_key: None,
        },
    }
}

pub(crate) fn secret(namespace: &str, name: &str, token: &str) -> SecretResource {
    SecretResource {
        namespace: namespace.to_string(),
        name: name.to_string(),
        key_hashes: labels(&[("token", sha256_hex(token.as_bytes()).as_str())]),
    }
}

/// Stores an injector together with a resolvable connection and token secret.
pub(crate) fn seed_injector(state: &StateContainer, namespace: &str, name: &str, token: &str) {
    upsert(state, Resource::AgentConnection(connection(namespace)));
    upsert(state, Resource::Secret(secret(namespace, "agent-token", token)));
    upsert(state, Resource::AgentInjector(injector(namespace, name)));
}

pub(crate) fn namespace(name: &str, pairs: &[(&str, &str)]) -> NamespaceResource {
    NamespaceResource {
        name: name.to_string(),
        labels: labels(pairs),
    }
}

pub(crate) fn deployment(
    namespace: &str,
    name: &str,
    pairs: &[(&str, &str)],
) -> DeploymentResource {
    let selector = labels(&[("app", name)]);
    let mut template_labels = labels(pairs);
    template_labels.extend(selector.clone());
    DeploymentResource {
        namespace: namespace.to_string(),
        name: name.to_string(),
        labels: labels(pairs),
        selector,
        replicas: Some(1),
        template: PodTemplateResource {
            labels: template_labels,
            annotations: None,
        },
    }
}

pub(crate) fn pod(namespace: &str, name: &str, app: &str) -> PodResource {
    PodResource {
        namespace: namespace.to_string(),
        name: name.to_string(),
        labels: labels(&[("app", app)]),
        annotations: BTreeMap::new(),
        injection_condition: None,
    }
}
