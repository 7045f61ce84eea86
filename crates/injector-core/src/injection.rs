//! Admission-side pod injection.
//!
//! Turns a resolved injection into a mutated pod: identifying annotations, the
//! shared agent volume, connection env vars and the runtime patcher's wiring.

use chrono::Utc;
use k8s_openapi::api::core::v1::{
    EmptyDirVolumeSource, EnvVar, EnvVarSource, Pod, SecretKeySelector, Volume,
};
use tracing::{debug, info};

use crds::SecretKeyReference;

use crate::annotations::{
    INJECTED_ON, INJECTOR_HASH, INJECTOR_NAME, INJECTOR_NAMESPACE, IS_INJECTED, WORKLOAD_NAME,
    WORKLOAD_NAMESPACE,
};
use crate::dispatch::{DispatchTable, ResolveInjection};
use crate::error::CoreError;
use crate::patchers::{upsert_env, InjectionContext, PatcherTable, AGENT_VOLUME_NAME};
use crate::resources::ResourceIdentity;

fn plain(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

fn from_secret(name: &str, reference: &SecretKeyReference) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: reference.secret_name.clone(),
                key: reference.secret_key.clone(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Env vars every runtime receives: endpoint, credentials and configuration.
pub fn connection_env_vars(context: &InjectionContext<'_>) -> Vec<EnvVar> {
    let ready = &context.resolved.ready;
    let connection = &ready.connection.spec;

    let mut vars = vec![
        plain("AGENT_CONNECTION_URL", connection.url.clone()),
        from_secret("AGENT_TOKEN", &connection.token),
    ];
    if let Some(user_name) = &connection.user_name {
        vars.push(from_secret("AGENT_USER_NAME", user_name));
    }
    if let Some(service_key) = &connection.service_key {
        vars.push(from_secret("AGENT_SERVICE_KEY", service_key));
    }

    let configuration = ready.configuration.as_ref().map(|c| &c.spec);
    if let Some(configuration) = configuration
        && !configuration.yaml.is_empty()
    {
        vars.push(plain("AGENT_CONFIGURATION", configuration.yaml.clone()));
    }
    if !configuration.is_some_and(|c| c.suppress_default_server_name) {
        vars.push(plain("AGENT_SERVER_NAME", context.workload_namespace.clone()));
    }
    if !configuration.is_some_and(|c| c.suppress_default_application_name) {
        vars.push(plain("AGENT_APPLICATION_NAME", context.workload_name.clone()));
    }

    vars.push(plain("AGENT_TYPE", context.agent_type().as_str()));
    vars
}

/// Injects the agent described by `context` into `pod`.
///
/// A pod already injected with the same hash is left untouched.
pub fn inject_pod(
    pod: &mut Pod,
    context: &InjectionContext<'_>,
    table: &PatcherTable,
) -> Result<(), CoreError> {
    let agent_type = context.agent_type();
    let patcher = table
        .get(agent_type)
        .ok_or(CoreError::UnknownAgentType(agent_type))?;

    let annotations = pod.metadata.annotations.get_or_insert_with(Default::default);
    if annotations
        .get(IS_INJECTED)
        .is_some_and(|v| v.eq_ignore_ascii_case("true"))
        && annotations.get(INJECTOR_HASH) == Some(&context.resolved.hash)
    {
        debug!("Pod already injected with hash {}", context.resolved.hash);
        return Ok(());
    }

    let ready = &context.resolved.ready;
    for (key, value) in [
        (IS_INJECTED, "True".to_string()),
        (INJECTED_ON, context.injected_on.to_rfc3339()),
        (INJECTOR_HASH, context.resolved.hash.clone()),
        (INJECTOR_NAME, ready.injector.name.clone()),
        (INJECTOR_NAMESPACE, ready.injector.namespace.clone()),
        (WORKLOAD_NAME, context.workload_name.clone()),
        (WORKLOAD_NAMESPACE, context.workload_namespace.clone()),
    ] {
        annotations.insert(key.to_string(), value);
    }

    let spec = pod.spec.get_or_insert_with(Default::default);
    let volumes = spec.volumes.get_or_insert_with(Vec::new);
    if !volumes.iter().any(|volume| volume.name == AGENT_VOLUME_NAME) {
        volumes.push(Volume {
            name: AGENT_VOLUME_NAME.to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        });
    }

    let common = connection_env_vars(context);
    for container in &mut spec.containers {
        for var in &common {
            upsert_env(container, var.clone());
        }
        patcher.patch_container(container, context);
    }

    info!(
        "Injected {} agent from AgentInjector {}/{} for {}/{}",
        agent_type,
        ready.injector.namespace,
        ready.injector.name,
        context.workload_namespace,
        context.workload_name
    );
    Ok(())
}

/// Resolves the injector for `workload` and injects `pod` with it.
///
/// Returns whether an injector applied.
pub async fn mutate_pod(
    dispatch: &DispatchTable,
    patchers: &PatcherTable,
    workload: &ResourceIdentity,
    pod: &mut Pod,
) -> Result<bool, CoreError> {
    let request = ResolveInjection {
        workload: workload.clone(),
    };
    let Some(resolved) = dispatch.resolve_injection(&request).await? else {
        debug!("No injector applies to {}", workload);
        return Ok(false);
    };

    let context = InjectionContext {
        resolved: &resolved,
        workload_name: workload.name().to_string(),
        workload_namespace: workload.namespace().to_string(),
        injected_on: Utc::now(),
    };
    inject_pod(pod, &context, patchers)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::ResolvedInjection;
    use crate::readiness::evaluate_all;
    use crate::reconciler::InjectionResolver;
    use crate::resources::{Resource, ResourceKind};
    use crate::state::StateContainer;
    use crate::testing;
    use k8s_openapi::api::core::v1::{Container, PodSpec};
    use std::sync::Arc;
    use std::time::Duration;

    fn resolved() -> ResolvedInjection {
        let state = StateContainer::new(Duration::ZERO, None);
        testing::seed_injector(&state, "default", "java-injector", "s3cr3t");
        ResolvedInjection {
            ready: evaluate_all(&state.snapshot()).ready.remove(0),
            hash: "abc".to_string(),
        }
    }

    fn pod() -> Pod {
        Pod {
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "app".to_string(),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn env_names(pod: &Pod) -> Vec<String> {
        pod.spec.as_ref().unwrap().containers[0]
            .env
            .iter()
            .flatten()
            .map(|var| var.name.clone())
            .collect()
    }

    #[test]
    fn test_inject_pod_adds_annotations_volume_and_env() {
        let resolved = resolved();
        let context = InjectionContext {
            resolved: &resolved,
            workload_name: "web".to_string(),
            workload_namespace: "default".to_string(),
            injected_on: Utc::now(),
        };
        let mut pod = pod();
        inject_pod(&mut pod, &context, &PatcherTable::with_defaults()).unwrap();

        let annotations = pod.metadata.annotations.as_ref().unwrap();
        assert_eq!(annotations[IS_INJECTED], "True");
        assert_eq!(annotations[INJECTOR_HASH], "abc");
        assert_eq!(annotations[WORKLOAD_NAME], "web");
        assert_eq!(annotations.len(), 7);

        let spec = pod.spec.as_ref().unwrap();
        assert_eq!(spec.volumes.as_ref().unwrap().len(), 1);
        let names = env_names(&pod);
        assert!(names.contains(&"AGENT_TOKEN".to_string()));
        assert!(names.contains(&"JAVA_TOOL_OPTIONS".to_string()));

        // second admission of the same pod changes nothing
        let before = names.len();
        inject_pod(&mut pod, &context, &PatcherTable::with_defaults()).unwrap();
        assert_eq!(env_names(&pod).len(), before);
    }

    #[test]
    fn test_unknown_agent_type_is_error() {
        let resolved = resolved();
        let context = InjectionContext {
            resolved: &resolved,
            workload_name: "web".to_string(),
            workload_namespace: "default".to_string(),
            injected_on: Utc::now(),
        };
        let mut pod = pod();
        assert!(matches!(
            inject_pod(&mut pod, &context, &PatcherTable::new()),
            Err(CoreError::UnknownAgentType(crds::AgentType::Java))
        ));
        assert!(pod.metadata.annotations.is_none());
    }

    #[tokio::test]
    async fn test_mutate_pod_resolves_through_dispatch() {
        let state = Arc::new(StateContainer::new(Duration::ZERO, None));
        testing::seed_injector(&state, "default", "java-injector", "s3cr3t");
        testing::upsert(&state, Resource::Deployment(testing::deployment("default", "web", &[])));
        let dispatch = DispatchTable::builder()
            .handle_resolve_injection(Arc::new(InjectionResolver::new(Arc::clone(&state))))
            .build()
            .unwrap();

        let workload = ResourceIdentity::namespaced(ResourceKind::Deployment, "default", "web");
        let mut pod = pod();
        assert!(mutate_pod(&dispatch, &PatcherTable::with_defaults(), &workload, &mut pod)
            .await
            .unwrap());
        let annotations = pod.metadata.annotations.as_ref().unwrap();
        assert_eq!(annotations[INJECTOR_NAME], "java-injector");
        assert_eq!(annotations[INJECTOR_HASH].len(), 64);
    }
}
