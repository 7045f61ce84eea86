//! Injection reconciler.
//!
//! On every deferred reaction: evaluate injector readiness, choose the
//! injector for every workload, compare the desired state against the pod
//! template annotations and patch only what differs, then hand the outcomes
//! to the convergence monitor.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info};

use crate::annotations::template_annotation_patch;
use crate::convergence::{ConvergenceMonitor, WorkloadOutcome};
use crate::dispatch::{NotificationHandler, RequestHandler, ResolveInjection, ResolvedInjection};
use crate::error::CoreError;
use crate::hashing::{dependency_hash, desired_state};
use crate::leader::WriteGate;
use crate::matching::{select_injector, unused_injectors};
use crate::merge::DeferredReaction;
use crate::readiness::{evaluate_all, ReadyInjector};
use crate::resources::Workload;
use crate::state::StateContainer;
use crate::writer::ClusterWriter;

/// Counters of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Workloads examined
    pub workloads: usize,
    /// Workload templates patched
    pub patched: usize,
    /// Patches withheld by the write gate
    pub deferred: usize,
    /// Patches that failed
    pub failed: usize,
    /// Ready injectors matching no workload
    pub unused: usize,
    /// Pod conditions patched
    pub conditions: usize,
}

/// What one workload needed this pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkloadStep {
    Unchanged,
    Deferred,
    Patched,
}

/// Drives workload pod templates towards their desired injection state.
#[derive(Debug)]
pub struct InjectionReconciler {
    state: Arc<StateContainer>,
    writer: Arc<dyn ClusterWriter>,
    gate: WriteGate,
    convergence: ConvergenceMonitor,
}

impl InjectionReconciler {
    /// Creates a reconciler writing through `writer` when `gate` allows.
    pub fn new(
        state: Arc<StateContainer>,
        writer: Arc<dyn ClusterWriter>,
        gate: WriteGate,
    ) -> Self {
        let convergence =
            ConvergenceMonitor::new(Arc::clone(&state), Arc::clone(&writer), gate.clone());
        Self {
            state,
            writer,
            gate,
            convergence,
        }
    }

    /// Runs one full pass over the current state.
    ///
    /// A workload that fails is logged and counted; the pass goes on with the
    /// remaining workloads and the pod conditions.
    pub async fn reconcile(&self) -> Result<ReconcileSummary, CoreError> {
        let snapshot = self.state.snapshot();
        let readiness = evaluate_all(&snapshot);
        let allows_writes = self.gate.allows_writes();

        let mut summary = ReconcileSummary::default();
        let mut used = HashSet::new();
        let mut outcomes = Vec::new();

        for workload in snapshot.workloads() {
            summary.workloads += 1;
            let chosen = select_injector(&workload, &readiness.ready);
            if let Some(ready) = chosen {
                used.insert(ready.identity());
            }
            outcomes.push(WorkloadOutcome {
                workload,
                injector: chosen,
            });

            match self.converge_workload(&workload, chosen, allows_writes).await {
                Ok(WorkloadStep::Unchanged) => {}
                Ok(WorkloadStep::Deferred) => summary.deferred += 1,
                Ok(WorkloadStep::Patched) => summary.patched += 1,
                Err(e) => {
                    error!("Failed to reconcile {}: {}", workload.identity(), e);
                    summary.failed += 1;
                }
            }
        }

        for unused in unused_injectors(&readiness.ready, &used) {
            info!(
                "AgentInjector {}/{} matches no workload",
                unused.namespace(),
                unused.name()
            );
            summary.unused += 1;
        }

        summary.conditions = self.convergence.reconcile(&snapshot, &outcomes).await;
        Ok(summary)
    }

    async fn converge_workload(
        &self,
        workload: &Workload<'_>,
        chosen: Option<&ReadyInjector>,
        allows_writes: bool,
    ) -> Result<WorkloadStep, CoreError> {
        let desired = desired_state(chosen)?;
        let current = workload.pod_template().annotations.as_ref();
        let Some(patch) = template_annotation_patch(current, &desired) else {
            return Ok(WorkloadStep::Unchanged);
        };

        let identity = workload.identity();
        if !allows_writes {
            debug!("Patch of {} withheld until writes are allowed", identity);
            return Ok(WorkloadStep::Deferred);
        }

        // the watch echo may arrive before the call returns
        self.state.mark_dirty(&identity);
        self.writer.patch_workload(&identity, &patch).await?;
        match chosen {
            Some(ready) => info!(
                "Patched {} for AgentInjector {}/{}",
                identity,
                ready.namespace(),
                ready.name()
            ),
            None => info!("Removed injection annotations from {}", identity),
        }
        Ok(WorkloadStep::Patched)
    }
}

#[async_trait]
impl NotificationHandler<DeferredReaction> for InjectionReconciler {
    fn name(&self) -> &'static str {
        "injection-reconciler"
    }

    async fn handle(&self, notification: &DeferredReaction) -> Result<(), CoreError> {
        let summary = self.reconcile().await?;
        debug!(
            "Reaction after {} merged changes: {:?}",
            notification.merged_count, summary
        );
        Ok(())
    }
}

/// Answers `ResolveInjection` from the current state.
#[derive(Debug)]
pub struct InjectionResolver {
    state: Arc<StateContainer>,
}

impl InjectionResolver {
    /// Creates a resolver over `state`.
    pub fn new(state: Arc<StateContainer>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl RequestHandler<ResolveInjection> for InjectionResolver {
    type Response = Option<ResolvedInjection>;

    fn name(&self) -> &'static str {
        "injection-resolver"
    }

    async fn handle(&self, request: &ResolveInjection) -> Result<Self::Response, CoreError> {
        let snapshot = self.state.snapshot();
        let workload = snapshot
            .get(&request.workload)
            .and_then(|resource| resource.as_workload())
            .ok_or_else(|| CoreError::NotFound(request.workload.to_string()))?;

        let readiness = evaluate_all(&snapshot);
        let Some(ready) = select_injector(&workload, &readiness.ready) else {
            return Ok(None);
        };

        Ok(Some(ResolvedInjection {
            hash: dependency_hash(ready)?,
            ready: ready.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::{DesiredState, INJECTOR_NAME};
    use crate::leader::LeaderSignal;
    use crate::mock::MockClusterWriter;
    use crate::resources::{Resource, ResourceIdentity, ResourceKind};
    use crate::testing;
    use std::time::Duration;

    fn setup(leader: bool) -> (Arc<StateContainer>, MockClusterWriter, InjectionReconciler) {
        let state = Arc::new(StateContainer::new(Duration::ZERO, None));
        let writer = MockClusterWriter::echoing(Arc::clone(&state));
        let reconciler = InjectionReconciler::new(
            Arc::clone(&state),
            Arc::new(writer.clone()),
            WriteGate::new(LeaderSignal::fixed(leader), Arc::clone(&state)),
        );
        (state, writer, reconciler)
    }

    fn web_identity() -> ResourceIdentity {
        ResourceIdentity::namespaced(ResourceKind::Deployment, "default", "web")
    }

    fn template_state(state: &StateContainer) -> DesiredState {
        match state.get(&web_identity()).as_deref() {
            Some(Resource::Deployment(d)) => {
                DesiredState::from_annotations(d.template.annotations.as_ref())
            }
            other => panic!("unexpected resource {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_second_pass_is_idempotent() {
        let (state, writer, reconciler) = setup(true);
        testing::seed_injector(&state, "default", "java-injector", "s3cr3t");
        testing::upsert(&state, Resource::Deployment(testing::deployment("default", "web", &[])));

        let first = reconciler.reconcile().await.unwrap();
        assert_eq!(first.patched, 1);
        assert!(template_state(&state).is_injected());

        writer.clear();
        let second = reconciler.reconcile().await.unwrap();
        assert_eq!(second.patched, 0);
        assert_eq!(writer.workload_patch_count(), 0);
    }

    #[tokio::test]
    async fn test_secret_rotation_triggers_exactly_one_patch() {
        let (state, writer, reconciler) = setup(true);
        testing::seed_injector(&state, "default", "java-injector", "s3cr3t");
        testing::upsert(&state, Resource::Deployment(testing::deployment("default", "web", &[])));
        reconciler.reconcile().await.unwrap();
        let before = template_state(&state);

        writer.clear();
        let rotated = testing::secret("default", "agent-token", "rotated");
        testing::upsert(&state, Resource::Secret(rotated));
        reconciler.reconcile().await.unwrap();
        reconciler.reconcile().await.unwrap();

        assert_eq!(writer.workload_patch_count(), 1);
        assert_ne!(template_state(&state), before);
    }

    #[tokio::test]
    async fn test_tie_break_writes_lowest_name() {
        let (state, _writer, reconciler) = setup(true);
        testing::seed_injector(&state, "default", "b-injector", "s3cr3t");
        testing::seed_injector(&state, "default", "a-injector", "s3cr3t");
        testing::upsert(&state, Resource::Deployment(testing::deployment("default", "web", &[])));

        let summary = reconciler.reconcile().await.unwrap();
        assert_eq!(summary.unused, 1);
        match state.get(&web_identity()).as_deref() {
            Some(Resource::Deployment(d)) => {
                let annotations = d.template.annotations.as_ref().unwrap();
                assert_eq!(annotations[INJECTOR_NAME], "a-injector");
            }
            other => panic!("unexpected resource {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_removed_injector_restores_baseline() {
        let (state, _writer, reconciler) = setup(true);
        testing::seed_injector(&state, "default", "java-injector", "s3cr3t");
        testing::upsert(&state, Resource::Deployment(testing::deployment("default", "web", &[])));
        reconciler.reconcile().await.unwrap();

        state.remove(&ResourceIdentity::namespaced(
            ResourceKind::AgentInjector,
            "default",
            "java-injector",
        ));
        reconciler.reconcile().await.unwrap();

        match state.get(&web_identity()).as_deref() {
            Some(Resource::Deployment(d)) => assert!(d.template.annotations.is_none()),
            other => panic!("unexpected resource {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_non_leader_writes_nothing() {
        let (state, writer, reconciler) = setup(false);
        testing::seed_injector(&state, "default", "java-injector", "s3cr3t");
        testing::upsert(&state, Resource::Deployment(testing::deployment("default", "web", &[])));

        let summary = reconciler.reconcile().await.unwrap();
        assert_eq!(summary.deferred, 1);
        assert!(writer.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_write_is_retried_next_pass() {
        let (state, writer, reconciler) = setup(true);
        testing::seed_injector(&state, "default", "java-injector", "s3cr3t");
        testing::upsert(&state, Resource::Deployment(testing::deployment("default", "web", &[])));

        writer.set_failing(true);
        assert_eq!(reconciler.reconcile().await.unwrap().failed, 1);

        writer.set_failing(false);
        assert_eq!(reconciler.reconcile().await.unwrap().patched, 1);
    }

    #[tokio::test]
    async fn test_resolver_returns_chosen_injector() {
        let (state, _writer, _reconciler) = setup(true);
        testing::seed_injector(&state, "default", "java-injector", "s3cr3t");
        testing::upsert(&state, Resource::Deployment(testing::deployment("default", "web", &[])));

        let resolver = InjectionResolver::new(Arc::clone(&state));
        let resolved = resolver
            .handle(&ResolveInjection { workload: web_identity() })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.ready.name(), "java-injector");
        assert_eq!(resolved.hash.len(), 64);

        let missing = ResolveInjection {
            workload: ResourceIdentity::namespaced(ResourceKind::Deployment, "default", "missing"),
        };
        assert!(matches!(resolver.handle(&missing).await, Err(CoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_failing_workload_does_not_stop_the_pass() {
        let (state, writer, reconciler) = setup(true);
        testing::seed_injector(&state, "default", "java-injector", "s3cr3t");
        testing::upsert(&state, Resource::Deployment(testing::deployment("default", "api", &[])));
        testing::upsert(&state, Resource::Deployment(testing::deployment("default", "web", &[])));
        testing::upsert(&state, Resource::Pod(testing::pod("default", "web-1", "web")));

        // "api" sorts first, so everything after it must still run
        writer.fail_for(ResourceIdentity::namespaced(ResourceKind::Deployment, "default", "api"));
        let summary = reconciler.reconcile().await.unwrap();

        assert_eq!(summary.workloads, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.patched, 1);
        assert_eq!(summary.conditions, 1);
        assert!(template_state(&state).is_injected());
    }

    #[tokio::test]
    async fn test_targets_are_dirty_before_every_write() {
        let state = Arc::new(StateContainer::new(Duration::ZERO, None));
        let writer = MockClusterWriter::observing(Arc::clone(&state));
        let reconciler = InjectionReconciler::new(
            Arc::clone(&state),
            Arc::new(writer.clone()),
            WriteGate::new(LeaderSignal::fixed(true), Arc::clone(&state)),
        );
        testing::seed_injector(&state, "default", "java-injector", "s3cr3t");
        testing::upsert(&state, Resource::Deployment(testing::deployment("default", "web", &[])));
        testing::upsert(&state, Resource::Pod(testing::pod("default", "web-1", "web")));
        assert!(!state.is_dirty(&web_identity()));

        let summary = reconciler.reconcile().await.unwrap();
        assert_eq!((summary.patched, summary.conditions), (1, 1));

        let observed = writer.dirty_on_call();
        assert_eq!(observed.len(), 2);
        assert_eq!(observed[0], (web_identity(), true));
        assert!(observed.iter().all(|(_, dirty)| *dirty));
    }
}
