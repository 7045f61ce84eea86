//! In-memory ClusterWriter for tests
//!
//! Records every outbound call. When bound to a state container it notes
//! whether the target was marked dirty at call time, and an echoing mock also
//! writes each change back into the container the way a watch stream would.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::CoreError;
use crate::resources::{
    AgentInjectorResource, InjectionConditionResource, PodTemplateResource, Resource,
    ResourceIdentity,
};
use crate::state::StateContainer;
use crate::writer::ClusterWriter;

/// A recorded outbound call.
#[derive(Debug, Clone)]
pub enum WriterCall {
    /// `patch_workload`
    PatchWorkload(ResourceIdentity, Value),
    /// `patch_pod_condition`
    PatchPodCondition(ResourceIdentity, InjectionConditionResource),
    /// `apply_injector`
    ApplyInjector(AgentInjectorResource),
    /// `delete_injector`
    DeleteInjector(ResourceIdentity),
}

/// Mock ClusterWriter for testing
#[derive(Debug, Clone, Default)]
pub struct MockClusterWriter {
    calls: Arc<Mutex<Vec<WriterCall>>>,
    dirty_on_call: Arc<Mutex<Vec<(ResourceIdentity, bool)>>>,
    fail: Arc<Mutex<bool>>,
    fail_for: Arc<Mutex<HashSet<ResourceIdentity>>>,
    state: Option<Arc<StateContainer>>,
    echo: bool,
}

impl MockClusterWriter {
    /// Create a mock that only records calls
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock that echoes writes into `state`
    pub fn echoing(state: Arc<StateContainer>) -> Self {
        Self {
            state: Some(state),
            echo: true,
            ..Self::default()
        }
    }

    /// Create a mock that watches the dirty flags of `state` without echoing
    pub fn observing(state: Arc<StateContainer>) -> Self {
        Self {
            state: Some(state),
            ..Self::default()
        }
    }

    /// Make every following call fail (or succeed again)
    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock().unwrap_or_else(PoisonError::into_inner) = fail;
    }

    /// Make every following call targeting `identity` fail
    pub fn fail_for(&self, identity: ResourceIdentity) {
        self.fail_for
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(identity);
    }

    /// Target of every call with its dirty flag at call time
    pub fn dirty_on_call(&self) -> Vec<(ResourceIdentity, bool)> {
        self.dirty_on_call
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Every call recorded so far
    pub fn calls(&self) -> Vec<WriterCall> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of workload patches recorded so far
    pub fn workload_patch_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, WriterCall::PatchWorkload(..)))
            .count()
    }

    /// Forget recorded calls
    pub fn clear(&self) {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    fn echo_state(&self) -> Option<&Arc<StateContainer>> {
        self.state.as_ref().filter(|_| self.echo)
    }

    fn record(&self, target: &ResourceIdentity, call: WriterCall) -> Result<(), CoreError> {
        if let Some(state) = &self.state {
            self.dirty_on_call
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((target.clone(), state.is_dirty(target)));
        }
        if *self.fail.lock().unwrap_or_else(PoisonError::into_inner)
            || self
                .fail_for
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .contains(target)
        {
            return Err(CoreError::Write(format!("mock writer rejected {}", target)));
        }
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
        Ok(())
    }
}

fn apply_annotation_patch(template: &mut PodTemplateResource, patch: &Value) {
    match patch.pointer("/spec/template/metadata/annotations") {
        Some(Value::Null) => template.annotations = None,
        Some(Value::Object(changes)) => {
            let annotations = template.annotations.get_or_insert_with(Default::default);
            for (key, value) in changes {
                match value.as_str() {
                    Some(value) => {
                        annotations.insert(key.clone(), value.to_string());
                    }
                    None => {
                        annotations.remove(key);
                    }
                }
            }
        }
        _ => {}
    }
}

#[async_trait]
impl ClusterWriter for MockClusterWriter {
    async fn patch_workload(
        &self,
        workload: &ResourceIdentity,
        patch: &Value,
    ) -> Result<(), CoreError> {
        self.record(workload, WriterCall::PatchWorkload(workload.clone(), patch.clone()))?;

        if let Some(state) = self.echo_state()
            && let Some(current) = state.get(workload)
        {
            let mut next = (*current).clone();
            match &mut next {
                Resource::Deployment(r) => apply_annotation_patch(&mut r.template, patch),
                Resource::DaemonSet(r) => apply_annotation_patch(&mut r.template, patch),
                Resource::StatefulSet(r) => apply_annotation_patch(&mut r.template, patch),
                Resource::DeploymentConfig(r) => apply_annotation_patch(&mut r.template, patch),
                _ => return Err(CoreError::NotFound(format!("{} is not a workload", workload))),
            }
            state.upsert(workload.clone(), next)?;
        }
        Ok(())
    }

    async fn patch_pod_condition(
        &self,
        pod: &ResourceIdentity,
        condition: &InjectionConditionResource,
    ) -> Result<(), CoreError> {
        self.record(pod, WriterCall::PatchPodCondition(pod.clone(), condition.clone()))?;

        if let Some(state) = self.echo_state()
            && let Some(current) = state.get(pod)
            && let Resource::Pod(current) = current.as_ref()
        {
            let mut next = current.clone();
            next.injection_condition = Some(condition.clone());
            state.upsert(pod.clone(), Resource::Pod(next))?;
        }
        Ok(())
    }

    async fn apply_injector(&self, injector: &AgentInjectorResource) -> Result<(), CoreError> {
        let resource = Resource::AgentInjector(injector.clone());
        let identity = resource.identity();
        self.record(&identity, WriterCall::ApplyInjector(injector.clone()))?;

        if let Some(state) = self.echo_state() {
            state.upsert(identity, resource)?;
        }
        Ok(())
    }

    async fn delete_injector(&self, injector: &ResourceIdentity) -> Result<(), CoreError> {
        self.record(injector, WriterCall::DeleteInjector(injector.clone()))?;

        if let Some(state) = self.echo_state() {
            state.remove(injector);
        }
        Ok(())
    }
}
