//! Kubernetes-backed ClusterWriter.
//!
//! Each call is one API request: merge patches for workload templates,
//! strategic merge patches for pod conditions, server-side apply for
//! generated injectors.

use async_trait::async_trait;
use chrono::Utc;
use crds::AgentInjector;
use injector_core::resources::{AgentInjectorResource, InjectionConditionResource};
use injector_core::{ClusterWriter, CoreError, ResourceIdentity, ResourceKind};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{ApiResource, DeleteParams, DynamicObject, GroupVersionKind, Patch, PatchParams};
use kube::{Api, Client};
use serde_json::{json, Value};
use tracing::debug;

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "agent-injector";

/// `apps.openshift.io/v1` DeploymentConfig
pub fn deployment_config_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk("apps.openshift.io", "v1", "DeploymentConfig"))
}

fn write_error(identity: &ResourceIdentity, e: kube::Error) -> CoreError {
    CoreError::Write(format!("{}: {}", identity, e))
}

/// ClusterWriter talking to the Kubernetes API.
#[derive(Clone)]
pub struct KubeClusterWriter {
    client: Client,
}

impl KubeClusterWriter {
    /// Creates a writer using `client`.
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl std::fmt::Debug for KubeClusterWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClusterWriter")
            .field("default_namespace", &self.client.default_namespace())
            .finish()
    }
}

#[async_trait]
impl ClusterWriter for KubeClusterWriter {
    async fn patch_workload(
        &self,
        workload: &ResourceIdentity,
        patch: &Value,
    ) -> Result<(), CoreError> {
        let (ns, name) = (workload.namespace(), workload.name());
        let pp = PatchParams::default();
        let patch = Patch::Merge(patch);

        let result = match workload.kind() {
            ResourceKind::Deployment => Api::<Deployment>::namespaced(self.client.clone(), ns)
                .patch(name, &pp, &patch)
                .await
                .map(|_| ()),
            ResourceKind::DaemonSet => Api::<DaemonSet>::namespaced(self.client.clone(), ns)
                .patch(name, &pp, &patch)
                .await
                .map(|_| ()),
            ResourceKind::StatefulSet => Api::<StatefulSet>::namespaced(self.client.clone(), ns)
                .patch(name, &pp, &patch)
                .await
                .map(|_| ()),
            ResourceKind::DeploymentConfig => {
                let resource = deployment_config_resource();
                Api::<DynamicObject>::namespaced_with(self.client.clone(), ns, &resource)
                    .patch(name, &pp, &patch)
                    .await
                    .map(|_| ())
            }
            other => {
                return Err(CoreError::Write(format!("{} is not a workload kind", other)));
            }
        };

        result.map_err(|e| write_error(workload, e))?;
        debug!("Merge patch applied to {}", workload);
        Ok(())
    }

    async fn patch_pod_condition(
        &self,
        pod: &ResourceIdentity,
        condition: &InjectionConditionResource,
    ) -> Result<(), CoreError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), pod.namespace());
        let status_patch = json!({
            "status": {
                "conditions": [{
                    "type": injector_core::annotations::INJECTION_CONDITION_TYPE,
                    "status": condition.status,
                    "reason": condition.reason,
                    "message": condition.message,
                    "lastTransitionTime": Utc::now().to_rfc3339(),
                }]
            }
        });

        api.patch_status(pod.name(), &PatchParams::default(), &Patch::Strategic(&status_patch))
            .await
            .map_err(|e| write_error(pod, e))?;
        Ok(())
    }

    async fn apply_injector(&self, injector: &AgentInjectorResource) -> Result<(), CoreError> {
        let api: Api<AgentInjector> = Api::namespaced(self.client.clone(), &injector.namespace);
        let mut object = AgentInjector::new(&injector.name, injector.spec.clone());
        object.metadata.namespace = Some(injector.namespace.clone());
        object.metadata.labels = Some(injector.labels.clone());

        let identity = ResourceIdentity::namespaced(
            ResourceKind::AgentInjector,
            &injector.namespace,
            &injector.name,
        );
        api.patch(
            &injector.name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&object),
        )
        .await
        .map_err(|e| write_error(&identity, e))?;
        Ok(())
    }

    async fn delete_injector(&self, injector: &ResourceIdentity) -> Result<(), CoreError> {
        let api: Api<AgentInjector> = Api::namespaced(self.client.clone(), injector.namespace());
        api.delete(injector.name(), &DeleteParams::default())
            .await
            .map_err(|e| write_error(injector, e))?;
        Ok(())
    }
}
