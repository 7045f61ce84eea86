//! Mutating admission webhook for pods.
//!
//! Finds the workload owning an admitted pod, resolves its injector through
//! the dispatch table and answers with the JSON patch that injects the agent.
//! A pod is never rejected: any failure admits it unchanged.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_server::tls_rustls::RustlsConfig;
use injector_core::{mutate_pod, CoreError, DispatchTable, PatcherTable, StateContainer};
use k8s_openapi::api::core::v1::Pod;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use tracing::{debug, error, info, warn};

use crate::config::WebhookConfig;
use crate::error::ControllerError;

/// Shared state for webhook handlers
#[derive(Debug, Clone)]
pub struct WebhookState {
    dispatch: Arc<DispatchTable>,
    patchers: Arc<PatcherTable>,
    state: Arc<StateContainer>,
}

impl WebhookState {
    /// Creates the handler state.
    pub fn new(
        dispatch: Arc<DispatchTable>,
        patchers: Arc<PatcherTable>,
        state: Arc<StateContainer>,
    ) -> Self {
        Self {
            dispatch,
            patchers,
            state,
        }
    }

    /// Answers one pod admission.
    pub async fn review(&self, request: &AdmissionRequest<Pod>) -> AdmissionResponse {
        let Some(pod) = &request.object else {
            debug!("Admission {} carries no pod, allowing unchanged", request.uid);
            return AdmissionResponse::from(request);
        };

        let patch = match self.injection_patch(request, pod).await {
            Ok(Some(patch)) => patch,
            Ok(None) => return AdmissionResponse::from(request),
            Err(e) => {
                warn!("Admitting pod without agent after injection failure: {}", e);
                return AdmissionResponse::from(request);
            }
        };

        info!(
            "Injecting agent into pod {} in {} ({} operations)",
            pod_name(request, pod),
            request.namespace.as_deref().unwrap_or_default(),
            patch.0.len()
        );
        match AdmissionResponse::from(request).with_patch(patch) {
            Ok(response) => response,
            Err(e) => {
                error!("Failed to serialize patch for {}: {}", request.uid, e);
                AdmissionResponse::from(request)
            }
        }
    }

    async fn injection_patch(
        &self,
        request: &AdmissionRequest<Pod>,
        pod: &Pod,
    ) -> Result<Option<json_patch::Patch>, CoreError> {
        let namespace = request
            .namespace
            .as_deref()
            .or(pod.metadata.namespace.as_deref())
            .unwrap_or("default");
        let labels = pod.metadata.labels.clone().unwrap_or_default();

        let Some(workload) = self.state.snapshot().workload_for_pod(namespace, &labels) else {
            debug!("No workload owns pod {} in {}", pod_name(request, pod), namespace);
            return Ok(None);
        };

        let mut mutated = pod.clone();
        if !mutate_pod(&self.dispatch, &self.patchers, &workload, &mut mutated).await? {
            return Ok(None);
        }

        let before = serde_json::to_value(pod)?;
        let patch = json_patch::diff(&before, &serde_json::to_value(&mutated)?);
        Ok((!patch.0.is_empty()).then_some(patch))
    }
}

fn pod_name<'a>(request: &'a AdmissionRequest<Pod>, pod: &'a Pod) -> &'a str {
    pod.metadata
        .name
        .as_deref()
        .or(pod.metadata.generate_name.as_deref())
        .unwrap_or(&request.name)
}

/// Handle mutating admission review for Pods
pub async fn mutate_handler(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<Pod>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let request: AdmissionRequest<Pod> = match body.try_into() {
        Ok(request) => request,
        Err(e) => {
            error!("Failed to parse admission request: {}", e);
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    Json(state.review(&request).await.into_review())
}

/// Create the webhook router
///
/// - POST /mutate/pods - inject agents into admitted pods
/// - GET /healthz - liveness
pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/mutate/pods", post(mutate_handler))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}

/// Serves the webhook over HTTPS until the server fails.
pub async fn serve(
    config: WebhookConfig,
    state: Arc<WebhookState>,
) -> Result<(), ControllerError> {
    let tls = RustlsConfig::from_pem_file(&config.cert_path, &config.key_path)
        .await
        .map_err(|e| {
            ControllerError::Webhook(format!(
                "Failed to load serving certificate {}: {}",
                config.cert_path.display(),
                e
            ))
        })?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Starting admission webhook on {}", addr);
    axum_server::bind_rustls(addr, tls)
        .serve(webhook_router(state).into_make_service())
        .await
        .map_err(|e| ControllerError::Webhook(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::{
        AgentConnectionSpec, AgentInjectorSpec, AgentType, LocalResourceReference, PodSelector,
        SecretKeyReference, WorkloadSelector,
    };
    use injector_core::annotations::{INJECTOR_NAME, IS_INJECTED};
    use injector_core::resources::{
        sha256_hex, AgentConnectionResource, AgentInjectorResource, DeploymentResource,
        PodTemplateResource, SecretResource,
    };
    use injector_core::{InjectionResolver, Resource};
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn upsert(state: &StateContainer, resource: Resource) {
        state.upsert(resource.identity(), resource).unwrap();
    }

    fn seeded_state() -> Arc<StateContainer> {
        let state = Arc::new(StateContainer::new(Duration::ZERO, None));
        upsert(
            &state,
            Resource::AgentInjector(AgentInjectorResource {
                namespace: "default".to_string(),
                name: "java-injector".to_string(),
                labels: BTreeMap::new(),
                spec: AgentInjectorSpec {
                    enabled: true,
                    agent_type: AgentType::Java,
                    selector: WorkloadSelector::default(),
                    pod_selector: PodSelector::default(),
                    connection: LocalResourceReference::new("agent-connection"),
                    configuration: None,
                },
            }),
        );
        upsert(
            &state,
            Resource::AgentConnection(AgentConnectionResource {
                namespace: "default".to_string(),
                name: "agent-connection".to_string(),
                spec: AgentConnectionSpec {
                    url: "https://collector.example.com".to_string(),
                    token: SecretKeyReference::new("agent-token", "token"),
                    user_name: None,
                    service_key: None,
                },
            }),
        );
        upsert(
            &state,
            Resource::Secret(SecretResource {
                namespace: "default".to_string(),
                name: "agent-token".to_string(),
                key_hashes: labels(&[("token", sha256_hex(b"s3cr3t").as_str())]),
            }),
        );
        upsert(
            &state,
            Resource::Deployment(DeploymentResource {
                namespace: "default".to_string(),
                name: "web".to_string(),
                labels: BTreeMap::new(),
                selector: labels(&[("app", "web")]),
                replicas: Some(1),
                template: PodTemplateResource {
                    labels: labels(&[("app", "web")]),
                    annotations: None,
                },
            }),
        );
        state
    }

    fn webhook(state: &Arc<StateContainer>, patchers: PatcherTable) -> WebhookState {
        let dispatch = DispatchTable::builder()
            .handle_resolve_injection(Arc::new(InjectionResolver::new(Arc::clone(state))))
            .build()
            .unwrap();
        WebhookState::new(Arc::new(dispatch), Arc::new(patchers), Arc::clone(state))
    }

    fn pod_json(app: &str) -> serde_json::Value {
        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": { "generateName": "web-7d4b9-", "labels": { "app": app } },
            "spec": { "containers": [{ "name": "app", "image": "registry.local/web:1" }] }
        })
    }

    fn admission(pod: serde_json::Value) -> AdmissionRequest<Pod> {
        let review: AdmissionReview<Pod> = serde_json::from_value(json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "0df28fbd-5f5f-11e8-bc74-36e6bb280816",
                "kind": { "group": "", "version": "v1", "kind": "Pod" },
                "resource": { "group": "", "version": "v1", "resource": "pods" },
                "namespace": "default",
                "operation": "CREATE",
                "userInfo": {
                    "username": "system:serviceaccount:kube-system:replicaset-controller"
                },
                "object": pod,
                "dryRun": false
            }
        }))
        .unwrap();
        review.try_into().unwrap()
    }

    #[tokio::test]
    async fn test_selected_pod_receives_agent_patch() {
        let state = seeded_state();
        let webhook = webhook(&state, PatcherTable::with_defaults());
        let original = pod_json("web");

        let response = webhook.review(&admission(original.clone())).await;
        assert!(response.allowed);

        let patch: json_patch::Patch =
            serde_json::from_slice(response.patch.as_deref().unwrap()).unwrap();
        let mut patched = original;
        json_patch::patch(&mut patched, &patch.0).unwrap();
        let pod: Pod = serde_json::from_value(patched).unwrap();

        let annotations = pod.metadata.annotations.unwrap();
        assert_eq!(annotations[IS_INJECTED], "True");
        assert_eq!(annotations[INJECTOR_NAME], "java-injector");
        let env = pod.spec.unwrap().containers[0].env.clone().unwrap_or_default();
        assert!(env.iter().any(|var| var.name == "JAVA_TOOL_OPTIONS"));
    }

    #[tokio::test]
    async fn test_unowned_pod_is_admitted_unchanged() {
        let state = seeded_state();
        let webhook = webhook(&state, PatcherTable::with_defaults());

        let response = webhook.review(&admission(pod_json("batch"))).await;
        assert!(response.allowed);
        assert!(response.patch.is_none());
    }

    #[tokio::test]
    async fn test_injection_failure_never_blocks_pod() {
        let state = seeded_state();
        // no patcher for the Java agent
        let webhook = webhook(&state, PatcherTable::new());

        let response = webhook.review(&admission(pod_json("web"))).await;
        assert!(response.allowed);
        assert!(response.patch.is_none());
    }
}
