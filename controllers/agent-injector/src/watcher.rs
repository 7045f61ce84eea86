//! Kubernetes resource watchers.
//!
//! Every watched kind is normalized into its core resource value and written
//! into the state container. The container decides whether anything changed;
//! watchers never trigger reconciliation directly.

use std::collections::{BTreeMap, HashSet};
use std::fmt::Debug;
use std::sync::Arc;

use futures::TryStreamExt;
use injector_core::resources::{DeploymentConfigResource, PodTemplateResource};
use injector_core::{Resource, ResourceIdentity, ResourceKind, StateContainer};
use kube::api::DynamicObject;
use kube::Api;
use kube_runtime::watcher;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error, info};

use crate::error::ControllerError;

/// Watches one kind and mirrors it into the state container.
pub struct Watcher<K> {
    api: Api<K>,
    kind: ResourceKind,
    state: Arc<StateContainer>,
    normalize: fn(&K) -> Resource,
}

impl<K> Debug for Watcher<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("kind", &self.kind)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<K> Watcher<K>
where
    K: kube::Resource + Clone + DeserializeOwned + Debug + Send + 'static,
{
    /// Creates a watcher storing `kind` values built by `normalize`.
    pub fn new(
        api: Api<K>,
        kind: ResourceKind,
        state: Arc<StateContainer>,
        normalize: fn(&K) -> Resource,
    ) -> Self {
        Self {
            api,
            kind,
            state,
            normalize,
        }
    }

    /// Runs until the watch stream fails.
    pub async fn run(self) -> Result<(), ControllerError> {
        info!("Starting {} watcher", self.kind);

        let mut stream = Box::pin(watcher(self.api.clone(), watcher::Config::default()));
        let mut relisted: Option<HashSet<ResourceIdentity>> = None;

        while let Some(event) = stream
            .try_next()
            .await
            .map_err(|e| {
                ControllerError::Watch(format!("{} watcher stream error: {}", self.kind, e))
            })?
        {
            match event {
                watcher::Event::Apply(obj) => {
                    self.store((self.normalize)(&obj));
                }
                watcher::Event::Delete(obj) => {
                    let identity = (self.normalize)(&obj).identity();
                    if self.state.remove(&identity) {
                        info!("{} deleted", identity);
                    }
                }
                watcher::Event::Init => {
                    debug!("{} watcher relisting", self.kind);
                    relisted = Some(HashSet::new());
                }
                watcher::Event::InitApply(obj) => {
                    let resource = (self.normalize)(&obj);
                    if let Some(seen) = relisted.as_mut() {
                        seen.insert(resource.identity());
                    }
                    self.store(resource);
                }
                watcher::Event::InitDone => {
                    if let Some(seen) = relisted.take() {
                        self.drop_unseen(&seen);
                    }
                    info!("{} watcher initialization complete", self.kind);
                }
            }
        }

        Ok(())
    }

    fn store(&self, resource: Resource) {
        let identity = resource.identity();
        match self.state.upsert(identity.clone(), resource) {
            Ok(true) => debug!("{} changed", identity),
            Ok(false) => {}
            Err(e) => error!("Failed to store {}: {}", identity, e),
        }
    }

    /// Removes objects that disappeared while the watch was down.
    fn drop_unseen(&self, seen: &HashSet<ResourceIdentity>) {
        for identity in self.state.identities_of(self.kind) {
            if !seen.contains(&identity) && self.state.remove(&identity) {
                info!("{} vanished during relist", identity);
            }
        }
    }
}

fn string_map(value: Option<&Value>) -> BTreeMap<String, String> {
    value
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

/// Normalizes an OpenShift DeploymentConfig read as a dynamic object.
pub fn deployment_config(obj: &DynamicObject) -> Resource {
    let spec = obj.data.get("spec");
    let template_metadata = spec.and_then(|s| s.pointer("/template/metadata"));

    Resource::DeploymentConfig(DeploymentConfigResource {
        namespace: obj.metadata.namespace.clone().unwrap_or_default(),
        name: obj.metadata.name.clone().unwrap_or_default(),
        labels: obj.metadata.labels.clone().unwrap_or_default(),
        selector: string_map(spec.and_then(|s| s.get("selector"))),
        replicas: spec
            .and_then(|s| s.get("replicas"))
            .and_then(Value::as_i64)
            .and_then(|r| i32::try_from(r).ok()),
        template: PodTemplateResource {
            labels: string_map(template_metadata.and_then(|m| m.get("labels"))),
            annotations: template_metadata
                .and_then(|m| m.get("annotations"))
                .filter(|a| a.is_object())
                .map(|a| string_map(Some(a))),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::deployment_config_resource;
    use serde_json::json;

    #[test]
    fn test_deployment_config_normalization() {
        let resource = deployment_config_resource();
        let obj = DynamicObject::new("web", &resource)
            .within("default")
            .data(json!({
                "spec": {
                    "replicas": 2,
                    "selector": { "app": "web" },
                    "template": {
                        "metadata": {
                            "labels": { "app": "web" },
                            "annotations": { "team": "payments" }
                        }
                    }
                }
            }));

        match deployment_config(&obj) {
            Resource::DeploymentConfig(dc) => {
                assert_eq!(dc.namespace, "default");
                assert_eq!(dc.replicas, Some(2));
                assert_eq!(dc.selector.get("app").map(String::as_str), Some("web"));
                let annotations = dc.template.annotations.unwrap_or_default();
                assert_eq!(annotations.get("team").map(String::as_str), Some("payments"));
            }
            other => panic!("unexpected resource {:?}", other),
        }
    }

    #[test]
    fn test_deployment_config_without_annotations() {
        let resource = deployment_config_resource();
        let obj = DynamicObject::new("web", &resource).within("default");
        match deployment_config(&obj) {
            Resource::DeploymentConfig(dc) => {
                assert!(dc.selector.is_empty());
                assert!(dc.template.annotations.is_none());
            }
            other => panic!("unexpected resource {:?}", other),
        }
    }
}
