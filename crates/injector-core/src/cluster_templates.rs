//! Cluster template materialization.
//!
//! Every `ClusterAgentInjector` yields one generated `AgentInjector` per
//! matching namespace. Generated injectors carry the
//! [`CLUSTER_INJECTOR_LABEL`] and are applied, replaced and deleted here only;
//! they then take part in ordinary matching.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crds::{AgentInjectorSpec, WorkloadSelector, CLUSTER_INJECTOR_LABEL};

use crate::dispatch::NotificationHandler;
use crate::equality::EqualityEngine;
use crate::error::CoreError;
use crate::leader::WriteGate;
use crate::matching::namespace_matches;
use crate::merge::DeferredReaction;
use crate::resources::{
    AgentInjectorResource, ClusterAgentInjectorResource, NamespaceResource, ResourceIdentity,
    ResourceKind,
};
use crate::state::{StateContainer, StateSnapshot};
use crate::writer::ClusterWriter;

/// Injector generated from `template` for `namespace`.
pub fn generated_injector(
    template: &ClusterAgentInjectorResource,
    namespace: &NamespaceResource,
) -> AgentInjectorResource {
    let spec = &template.spec.template;
    let mut labels = BTreeMap::new();
    labels.insert(CLUSTER_INJECTOR_LABEL.to_string(), template.name.clone());

    AgentInjectorResource {
        namespace: namespace.name.clone(),
        name: template.name.clone(),
        labels,
        spec: AgentInjectorSpec {
            enabled: spec.enabled,
            agent_type: spec.agent_type,
            selector: WorkloadSelector {
                namespaces: vec![namespace.name.clone()],
                labels: spec.labels.clone(),
            },
            pod_selector: spec.pod_selector.clone(),
            connection: spec.connection.clone(),
            configuration: spec.configuration.clone(),
        },
    }
}

/// Every injector the templates in `snapshot` call for, keyed by identity.
pub fn desired_injectors(
    snapshot: &StateSnapshot,
) -> BTreeMap<ResourceIdentity, AgentInjectorResource> {
    let mut desired = BTreeMap::new();
    for template in snapshot.cluster_injectors() {
        for namespace in snapshot
            .namespaces()
            .filter(|namespace| namespace_matches(&template.spec.namespace_selector, namespace))
        {
            let injector = generated_injector(template, namespace);
            desired.insert(injector_identity(&injector), injector);
        }
    }
    desired
}

fn injector_identity(injector: &AgentInjectorResource) -> ResourceIdentity {
    ResourceIdentity::namespaced(ResourceKind::AgentInjector, &injector.namespace, &injector.name)
}

/// True when `current` agrees with `desired` on every field this controller owns.
///
/// Only the spec and the cluster-injector label are owned; labels added by
/// other field managers survive server-side apply and are ignored here.
pub fn owned_fields_equal(
    engine: &EqualityEngine,
    current: &AgentInjectorResource,
    desired: &AgentInjectorResource,
) -> Result<bool, CoreError> {
    if current.labels.get(CLUSTER_INJECTOR_LABEL) != desired.labels.get(CLUSTER_INJECTOR_LABEL) {
        return Ok(false);
    }
    engine.equal(Some(&current.spec), Some(&desired.spec))
}

/// Counters of one materialization pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaterializeSummary {
    /// Injectors created or replaced
    pub applied: usize,
    /// Stale injectors deleted
    pub deleted: usize,
    /// Writes withheld by the write gate
    pub deferred: usize,
    /// Writes that failed
    pub failed: usize,
}

/// Keeps generated injectors in line with the cluster templates.
#[derive(Debug)]
pub struct ClusterTemplateReconciler {
    state: Arc<StateContainer>,
    writer: Arc<dyn ClusterWriter>,
    gate: WriteGate,
}

impl ClusterTemplateReconciler {
    /// Creates a reconciler writing through `writer` when `gate` allows.
    pub fn new(
        state: Arc<StateContainer>,
        writer: Arc<dyn ClusterWriter>,
        gate: WriteGate,
    ) -> Self {
        Self { state, writer, gate }
    }

    /// Applies missing or drifted generated injectors and deletes stale ones.
    pub async fn reconcile(&self) -> Result<MaterializeSummary, CoreError> {
        let snapshot = self.state.snapshot();
        let desired = desired_injectors(&snapshot);
        let allows_writes = self.gate.allows_writes();
        let mut summary = MaterializeSummary::default();

        for (identity, injector) in &desired {
            let current = match snapshot.get(identity) {
                Some(crate::Resource::AgentInjector(current)) => Some(current),
                _ => None,
            };
            if let Some(current) = current {
                if !current.labels.contains_key(CLUSTER_INJECTOR_LABEL) {
                    warn!(
                        "AgentInjector {}/{} exists and was not generated, skipping template {}",
                        current.namespace, current.name, injector.name
                    );
                    continue;
                }
                if owned_fields_equal(self.state.engine(), current, injector)? {
                    continue;
                }
            }

            if !allows_writes {
                debug!("Apply of {} withheld until writes are allowed", identity);
                summary.deferred += 1;
                continue;
            }
            self.state.mark_dirty(identity);
            match self.writer.apply_injector(injector).await {
                Ok(()) => {
                    info!(
                        "Applied generated AgentInjector {}/{}",
                        injector.namespace, injector.name
                    );
                    summary.applied += 1;
                }
                Err(e) => {
                    error!("Failed to apply {}: {}", identity, e);
                    summary.failed += 1;
                }
            }
        }

        let stale: Vec<ResourceIdentity> = snapshot
            .injectors()
            .filter(|injector| injector.labels.contains_key(CLUSTER_INJECTOR_LABEL))
            .map(injector_identity)
            .filter(|identity| !desired.contains_key(identity))
            .collect();

        for identity in stale {
            if !allows_writes {
                debug!("Delete of {} withheld until writes are allowed", identity);
                summary.deferred += 1;
                continue;
            }
            self.state.mark_dirty(&identity);
            match self.writer.delete_injector(&identity).await {
                Ok(()) => {
                    info!("Deleted stale generated {}", identity);
                    summary.deleted += 1;
                }
                Err(e) => {
                    error!("Failed to delete {}: {}", identity, e);
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }
}

#[async_trait]
impl NotificationHandler<DeferredReaction> for ClusterTemplateReconciler {
    fn name(&self) -> &'static str {
        "cluster-template-reconciler"
    }

    async fn handle(&self, _notification: &DeferredReaction) -> Result<(), CoreError> {
        let summary = self.reconcile().await?;
        if summary != MaterializeSummary::default() {
            debug!("Cluster templates: {:?}", summary);
        }
        Ok(())
    }
}
