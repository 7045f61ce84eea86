//! Reconciled state container.
//!
//! Keyed store of every resource the controller reacts to. Writes go through
//! [`StateContainer::upsert`] and [`StateContainer::remove`], which emit a
//! [`StateModified`] notification only when the structural equality engine
//! reports an actual difference.
//!
//! Per-identity updates are atomic (read, compare and write happen under the
//! map shard lock for that key); different identities never contend on a
//! global lock.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::equality::EqualityEngine;
use crate::error::CoreError;
use crate::resources::{
    AgentConfigurationResource, AgentConnectionResource, AgentInjectorResource,
    ClusterAgentInjectorResource, NamespaceResource, PodResource, Resource, ResourceIdentity,
    ResourceKind, SecretResource, Workload,
};

/// Stored value plus the dirty marker.
///
/// Dirty means this controller wrote the resource last and expects the watch
/// echo of that write.
#[derive(Debug, Clone, Default)]
pub struct ResourceHolder {
    /// Last observed value, absent when only the dirty marker is known
    pub resource: Option<Arc<Resource>>,
    /// Set right before an outbound write
    pub is_dirty: bool,
}

/// A tracked resource changed.
#[derive(Debug, Clone)]
pub struct StateModified {
    /// Key of the changed resource
    pub identity: ResourceIdentity,
    /// Value before the change
    pub previous: Option<Arc<Resource>>,
    /// Value after the change, `None` on removal
    pub current: Option<Arc<Resource>>,
}

/// Keyed store of reconciled resources.
pub struct StateContainer {
    entries: DashMap<ResourceIdentity, ResourceHolder>,
    engine: EqualityEngine,
    started: Instant,
    settle_duration: Duration,
    notifier: Option<UnboundedSender<StateModified>>,
}

impl std::fmt::Debug for StateContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateContainer")
            .field("entries", &self.entries.len())
            .field("settle_duration", &self.settle_duration)
            .finish()
    }
}

impl StateContainer {
    /// Creates a container that settles `settle_duration` after now.
    ///
    /// Change notifications are sent to `notifier` when one is given.
    pub fn new(
        settle_duration: Duration,
        notifier: Option<UnboundedSender<StateModified>>,
    ) -> Self {
        Self {
            entries: DashMap::new(),
            engine: EqualityEngine::new(),
            started: Instant::now(),
            settle_duration,
            notifier,
        }
    }

    /// Stores `candidate` under `identity` unless it is structurally equal to the stored value.
    ///
    /// Returns whether the stored value changed.
    pub fn upsert(
        &self,
        identity: ResourceIdentity,
        candidate: Resource,
    ) -> Result<bool, CoreError> {
        let candidate = Arc::new(candidate);
        let previous = {
            let mut holder = self.entries.entry(identity.clone()).or_default();
            if let Some(current) = holder.resource.as_ref()
                && current.equal_in(&candidate, &self.engine)?
            {
                if holder.is_dirty {
                    debug!("Suppressed unchanged echo for {}", identity);
                    holder.is_dirty = false;
                }
                return Ok(false);
            }

            if holder.is_dirty {
                debug!("Observed {} after own write", identity);
                holder.is_dirty = false;
            }
            holder.resource.replace(Arc::clone(&candidate))
        };

        self.notify(StateModified {
            identity,
            previous,
            current: Some(candidate),
        });
        Ok(true)
    }

    /// Removes the resource stored under `identity`.
    ///
    /// Returns whether a value was removed.
    pub fn remove(&self, identity: &ResourceIdentity) -> bool {
        let Some((identity, holder)) = self.entries.remove(identity) else {
            return false;
        };
        let Some(previous) = holder.resource else {
            return false;
        };

        self.notify(StateModified {
            identity,
            previous: Some(previous),
            current: None,
        });
        true
    }

    /// Current value stored under `identity`
    pub fn get(&self, identity: &ResourceIdentity) -> Option<Arc<Resource>> {
        self.entries
            .get(identity)
            .and_then(|holder| holder.resource.clone())
    }

    /// Every stored value of `kind`
    pub fn get_by_kind(&self, kind: ResourceKind) -> Vec<Arc<Resource>> {
        self.entries
            .iter()
            .filter(|entry| entry.key().kind() == kind)
            .filter_map(|entry| entry.value().resource.clone())
            .collect()
    }

    /// Every stored value of `kind` in `namespace`
    pub fn get_by_kind_and_namespace(
        &self,
        kind: ResourceKind,
        namespace: &str,
    ) -> Vec<Arc<Resource>> {
        let namespace = namespace.to_lowercase();
        self.entries
            .iter()
            .filter(|entry| entry.key().kind() == kind && entry.key().namespace() == namespace)
            .filter_map(|entry| entry.value().resource.clone())
            .collect()
    }

    /// Identities of every stored value of `kind`
    pub fn identities_of(&self, kind: ResourceKind) -> Vec<ResourceIdentity> {
        self.entries
            .iter()
            .filter(|entry| entry.key().kind() == kind && entry.value().resource.is_some())
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Marks `identity` as about to be written by this controller.
    pub fn mark_dirty(&self, identity: &ResourceIdentity) {
        self.entries.entry(identity.clone()).or_default().is_dirty = true;
    }

    /// Whether `identity` is marked dirty
    pub fn is_dirty(&self, identity: &ResourceIdentity) -> bool {
        self.entries
            .get(identity)
            .is_some_and(|holder| holder.is_dirty)
    }

    /// Equality engine used for change detection
    pub fn engine(&self) -> &EqualityEngine {
        &self.engine
    }

    /// True once the settling window after startup has elapsed
    pub fn has_settled(&self) -> bool {
        self.started.elapsed() >= self.settle_duration
    }

    /// Number of stored values
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.value().resource.is_some())
            .count()
    }

    /// True when nothing is stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ordered copy of every stored value, used for one reconciliation pass
    pub fn snapshot(&self) -> StateSnapshot {
        let resources = self
            .entries
            .iter()
            .filter_map(|entry| {
                entry
                    .value()
                    .resource
                    .clone()
                    .map(|resource| (entry.key().clone(), resource))
            })
            .collect();
        StateSnapshot { resources }
    }

    fn notify(&self, modified: StateModified) {
        if let Some(notifier) = &self.notifier
            && notifier.send(modified).is_err()
        {
            warn!("State change notification dropped: receiver closed");
        }
    }
}

/// Point-in-time, identity-ordered view of the container.
#[derive(Debug, Clone, Default)]
pub struct StateSnapshot {
    resources: BTreeMap<ResourceIdentity, Arc<Resource>>,
}

impl StateSnapshot {
    /// Value stored under `identity`
    pub fn get(&self, identity: &ResourceIdentity) -> Option<&Resource> {
        self.resources.get(identity).map(AsRef::as_ref)
    }

    fn of_kind(&self, kind: ResourceKind) -> impl Iterator<Item = &Resource> + '_ {
        self.resources
            .iter()
            .filter(move |(identity, _)| identity.kind() == kind)
            .map(|(_, resource)| resource.as_ref())
    }

    /// Every `AgentInjector`
    pub fn injectors(&self) -> impl Iterator<Item = &AgentInjectorResource> + '_ {
        self.of_kind(ResourceKind::AgentInjector).filter_map(|r| match r {
            Resource::AgentInjector(injector) => Some(injector),
            _ => None,
        })
    }

    /// Every `ClusterAgentInjector`
    pub fn cluster_injectors(&self) -> impl Iterator<Item = &ClusterAgentInjectorResource> + '_ {
        self.of_kind(ResourceKind::ClusterAgentInjector).filter_map(|r| match r {
            Resource::ClusterAgentInjector(template) => Some(template),
            _ => None,
        })
    }

    /// Every Namespace
    pub fn namespaces(&self) -> impl Iterator<Item = &NamespaceResource> + '_ {
        self.of_kind(ResourceKind::Namespace).filter_map(|r| match r {
            Resource::Namespace(namespace) => Some(namespace),
            _ => None,
        })
    }

    /// Every workload, ordered by kind then namespace then name
    pub fn workloads(&self) -> impl Iterator<Item = Workload<'_>> + '_ {
        self.resources.values().filter_map(|r| r.as_workload())
    }

    /// Workload owning a pod with `labels` in `namespace`.
    ///
    /// When several workloads select the pod the first in identity order wins,
    /// the same owner the convergence monitor picks.
    pub fn workload_for_pod(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Option<ResourceIdentity> {
        self.workloads()
            .find(|workload| workload.selects_labels(namespace, labels))
            .map(|workload| workload.identity())
    }

    /// Every Pod in `namespace`
    pub fn pods_in<'a>(
        &'a self,
        namespace: &'a str,
    ) -> impl Iterator<Item = &'a PodResource> + 'a {
        self.of_kind(ResourceKind::Pod).filter_map(move |r| match r {
            Resource::Pod(pod) if pod.namespace.eq_ignore_ascii_case(namespace) => Some(pod),
            _ => None,
        })
    }

    /// `AgentConnection` `name` in `namespace`
    pub fn connection(&self, namespace: &str, name: &str) -> Option<&AgentConnectionResource> {
        let identity = ResourceIdentity::namespaced(ResourceKind::AgentConnection, namespace, name);
        match self.get(&identity)? {
            Resource::AgentConnection(connection) => Some(connection),
            _ => None,
        }
    }

    /// `AgentConfiguration` `name` in `namespace`
    pub fn configuration(
        &self,
        namespace: &str,
        name: &str,
    ) -> Option<&AgentConfigurationResource> {
        let identity =
            ResourceIdentity::namespaced(ResourceKind::AgentConfiguration, namespace, name);
        match self.get(&identity)? {
            Resource::AgentConfiguration(configuration) => Some(configuration),
            _ => None,
        }
    }

    /// Secret `name` in `namespace`
    pub fn secret(&self, namespace: &str, name: &str) -> Option<&SecretResource> {
        let identity = ResourceIdentity::namespaced(ResourceKind::Secret, namespace, name);
        match self.get(&identity)? {
            Resource::Secret(secret) => Some(secret),
            _ => None,
        }
    }
}
