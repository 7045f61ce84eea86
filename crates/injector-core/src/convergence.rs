//! Convergence monitor.
//!
//! Records on every pod whether it carries the agent it should carry, as a
//! status condition derived from {injection desired} x {pod injected}.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::annotations::IS_INJECTED;
use crate::leader::WriteGate;
use crate::matching::pod_selector_matches;
use crate::readiness::ReadyInjector;
use crate::resources::{
    InjectionConditionResource, PodResource, ResourceIdentity, ResourceKind, Workload,
};
use crate::state::{StateContainer, StateSnapshot};
use crate::writer::ClusterWriter;

/// Convergence of a single pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectionState {
    /// Desired and injected
    InjectionComplete,
    /// Desired, not yet injected
    InjectionPending,
    /// Injected although not desired
    SuperfluousInjection,
    /// Neither desired nor injected
    InjectionRemoved,
}

impl InjectionState {
    /// Derives the state from the two observations.
    pub fn from_observation(desired: bool, injected: bool) -> Self {
        match (desired, injected) {
            (true, true) => Self::InjectionComplete,
            (true, false) => Self::InjectionPending,
            (false, true) => Self::SuperfluousInjection,
            (false, false) => Self::InjectionRemoved,
        }
    }

    /// Condition reason
    pub fn reason(self) -> &'static str {
        match self {
            Self::InjectionComplete => "InjectionComplete",
            Self::InjectionPending => "InjectionPending",
            Self::SuperfluousInjection => "SuperfluousInjection",
            Self::InjectionRemoved => "InjectionRemoved",
        }
    }

    /// Condition status
    pub fn status(self) -> &'static str {
        match self {
            Self::InjectionComplete => "True",
            _ => "False",
        }
    }
}

/// Workload paired with the injector chosen for it this pass.
#[derive(Debug, Clone, Copy)]
pub struct WorkloadOutcome<'a> {
    /// Workload
    pub workload: Workload<'a>,
    /// Chosen injector, if any
    pub injector: Option<&'a ReadyInjector>,
}

/// Condition a pod should carry.
pub fn desired_condition(
    outcome: &WorkloadOutcome<'_>,
    pod: &PodResource,
) -> (InjectionState, InjectionConditionResource) {
    let desired = outcome.injector.is_some_and(|ready| {
        pod_selector_matches(&ready.injector.spec.pod_selector, &pod.labels)
    });
    let injected = pod
        .annotations
        .get(IS_INJECTED)
        .is_some_and(|value| value.eq_ignore_ascii_case("true"));
    let state = InjectionState::from_observation(desired, injected);

    let message = match (state, outcome.injector) {
        (InjectionState::InjectionComplete, Some(ready)) => format!(
            "Agent injected by AgentInjector {}/{}",
            ready.namespace(),
            ready.name()
        ),
        (InjectionState::InjectionPending, Some(ready)) => format!(
            "Pod must be restarted to receive the agent from AgentInjector {}/{}",
            ready.namespace(),
            ready.name()
        ),
        (InjectionState::SuperfluousInjection, _) => {
            "Pod carries an agent although no AgentInjector applies".to_string()
        }
        _ => "No AgentInjector applies to this pod".to_string(),
    };

    let condition = InjectionConditionResource {
        status: state.status().to_string(),
        reason: state.reason().to_string(),
        message,
    };
    (state, condition)
}

/// Patches pod conditions that drifted from the derived state.
#[derive(Debug)]
pub struct ConvergenceMonitor {
    state: Arc<StateContainer>,
    writer: Arc<dyn ClusterWriter>,
    gate: WriteGate,
}

impl ConvergenceMonitor {
    /// Creates a monitor writing through `writer` when `gate` allows.
    pub fn new(
        state: Arc<StateContainer>,
        writer: Arc<dyn ClusterWriter>,
        gate: WriteGate,
    ) -> Self {
        Self { state, writer, gate }
    }

    /// Reconciles the condition of every pod owned by `outcomes`.
    ///
    /// A pod selected by several workloads belongs to the first of them in
    /// `outcomes`; the others are ignored for it. Returns the number of
    /// conditions patched.
    pub async fn reconcile(
        &self,
        snapshot: &StateSnapshot,
        outcomes: &[WorkloadOutcome<'_>],
    ) -> usize {
        let mut patched = 0;
        let mut owners: HashMap<ResourceIdentity, ResourceIdentity> = HashMap::new();

        for outcome in outcomes {
            let owner = outcome.workload.identity();
            for pod in snapshot
                .pods_in(outcome.workload.namespace())
                .filter(|pod| outcome.workload.selects_pod(pod))
            {
                let identity =
                    ResourceIdentity::namespaced(ResourceKind::Pod, &pod.namespace, &pod.name);
                if let Some(first) = owners.get(&identity) {
                    warn!(
                        "Pod {} is selected by {} and {}, keeping {}",
                        identity, first, owner, first
                    );
                    continue;
                }
                owners.insert(identity.clone(), owner.clone());

                let (state, condition) = desired_condition(outcome, pod);

                match &pod.injection_condition {
                    None if state == InjectionState::InjectionRemoved => continue,
                    Some(recorded) if *recorded == condition => continue,
                    _ => {}
                }

                if !self.gate.allows_writes() {
                    debug!(
                        "Condition {} for {} pending write permission",
                        state.reason(),
                        identity
                    );
                    continue;
                }

                self.state.mark_dirty(&identity);
                match self.writer.patch_pod_condition(&identity, &condition).await {
                    Ok(()) => {
                        info!("Pod {}/{} is {}", pod.namespace, pod.name, state.reason());
                        patched += 1;
                    }
                    Err(e) => error!("Failed to patch condition of {}: {}", identity, e),
                }
            }
        }

        patched
    }
}
