//! Agent Injector Core
//!
//! Decides, for every workload in a cluster, whether an agent should be
//! injected and keeps that decision synchronized with cluster state.
//!
//! # Flow
//!
//! Watchers write normalized resources into the [`StateContainer`], which
//! emits a [`StateModified`] only when the [`EqualityEngine`] reports a real
//! difference. The [`MergeEngine`] coalesces bursts into [`DeferredReaction`]s.
//! On each reaction the [`InjectionReconciler`] chooses an injector per
//! workload, patches pod template annotations that differ from the desired
//! hash, and hands the outcomes to the [`ConvergenceMonitor`].
//!
//! # Features
//!
//! - **Structural equality**: cached per-type field plans via [`structural!`]
//! - **Debounce**: one reaction per merge window
//! - **Deterministic matching**: lowest injector name wins ties
//! - **Idempotent patches**: unchanged state never writes
//! - **Write gate**: writes only as leader after the settling window

pub mod annotations;
pub mod cluster_templates;
pub mod convergence;
pub mod dispatch;
pub mod equality;
pub mod error;
pub mod hashing;
pub mod injection;
pub mod leader;
pub mod matching;
pub mod merge;
pub mod patchers;
pub mod pipeline;
pub mod readiness;
pub mod reconciler;
pub mod resources;
pub mod state;
pub mod telemetry;
pub mod writer;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
#[cfg(test)]
mod testing;

pub use annotations::DesiredState;
pub use cluster_templates::ClusterTemplateReconciler;
pub use convergence::{ConvergenceMonitor, InjectionState};
pub use dispatch::{
    DispatchTable, DispatchTableBuilder, NotificationHandler, RequestHandler, ResolveInjection,
    ResolvedInjection,
};
pub use equality::{Composite, EqualityEngine, Structural};
pub use error::CoreError;
pub use injection::{inject_pod, mutate_pod};
pub use leader::{leader_channel, LeaderSignal, WriteGate};
pub use merge::{DeferredReaction, MergeEngine};
pub use patchers::{AgentPatcher, InjectionContext, PatcherTable};
pub use readiness::{ReadinessFailure, ReadyInjector};
pub use reconciler::{InjectionReconciler, InjectionResolver};
pub use resources::{Resource, ResourceIdentity, ResourceKind, Workload};
pub use state::{StateContainer, StateModified, StateSnapshot};
pub use telemetry::{telemetry_channel, ErrorReport, TelemetryReceiver, TelemetrySender};
pub use writer::ClusterWriter;
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockClusterWriter;
