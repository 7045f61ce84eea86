//! Outbound write seam to the cluster.
//!
//! Every mutating call the core issues goes through [`ClusterWriter`]. Each
//! method is a single request; nothing is left half-applied when a call fails.

use std::fmt::Debug;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::CoreError;
use crate::resources::{AgentInjectorResource, InjectionConditionResource, ResourceIdentity};

/// Mutating operations against the cluster.
#[async_trait]
pub trait ClusterWriter: Send + Sync + Debug {
    /// Applies a JSON merge patch to a workload.
    async fn patch_workload(
        &self,
        workload: &ResourceIdentity,
        patch: &Value,
    ) -> Result<(), CoreError>;

    /// Records the injection condition in a pod's status.
    async fn patch_pod_condition(
        &self,
        pod: &ResourceIdentity,
        condition: &InjectionConditionResource,
    ) -> Result<(), CoreError>;

    /// Creates or replaces a generated `AgentInjector`.
    async fn apply_injector(&self, injector: &AgentInjectorResource) -> Result<(), CoreError>;

    /// Deletes a generated `AgentInjector`.
    async fn delete_injector(&self, injector: &ResourceIdentity) -> Result<(), CoreError>;
}
