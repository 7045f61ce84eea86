//! Dependency graph hashing.
//!
//! The desired-state hash covers the injector spec, its connection spec, its
//! configuration spec and the content hashes of every referenced secret key.
//! Hashing goes through `serde_json::Value`, whose objects are key-sorted, so
//! maps hash independently of insertion order while sequences keep theirs.

use std::collections::BTreeMap;

use serde::Serialize;

use crds::{AgentConfigurationSpec, AgentConnectionSpec, AgentInjectorSpec};

use crate::annotations::DesiredState;
use crate::error::CoreError;
use crate::readiness::ReadyInjector;
use crate::resources::sha256_hex;

#[derive(Serialize)]
struct DependencySnapshot<'a> {
    injector: &'a AgentInjectorSpec,
    connection: &'a AgentConnectionSpec,
    configuration: Option<&'a AgentConfigurationSpec>,
    secrets: &'a BTreeMap<String, String>,
}

/// Hex SHA-256 over the canonical form of `ready`'s dependency graph
pub fn dependency_hash(ready: &ReadyInjector) -> Result<String, CoreError> {
    let snapshot = DependencySnapshot {
        injector: &ready.injector.spec,
        connection: &ready.connection.spec,
        configuration: ready.configuration.as_ref().map(|c| &c.spec),
        secrets: &ready.secret_hashes,
    };
    let canonical = serde_json::to_value(&snapshot)?;
    Ok(sha256_hex(&serde_json::to_vec(&canonical)?))
}

/// Desired pod-template state for a workload matched by `ready`, if any
pub fn desired_state(ready: Option<&ReadyInjector>) -> Result<DesiredState, CoreError> {
    match ready {
        None => Ok(DesiredState::Empty),
        Some(ready) => Ok(DesiredState::Injected {
            hash: dependency_hash(ready)?,
            injector_name: ready.injector.name.clone(),
            injector_namespace: ready.injector.namespace.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::readiness::evaluate_all;
    use crate::state::StateContainer;
    use crate::testing;
    use std::time::Duration;

    fn ready_with_token(token: &str) -> ReadyInjector {
        let state = StateContainer::new(Duration::ZERO, None);
        testing::seed_injector(&state, "default", "java-injector", token);
        evaluate_all(&state.snapshot()).ready.remove(0)
    }

    #[test]
    fn test_hash_is_stable() {
        let ready = ready_with_token("s3cr3t");
        assert_eq!(dependency_hash(&ready).unwrap(), dependency_hash(&ready).unwrap());
        assert_eq!(
            dependency_hash(&ready).unwrap(),
            dependency_hash(&ready_with_token("s3cr3t")).unwrap()
        );
    }

    #[test]
    fn test_secret_change_changes_hash() {
        assert_ne!(
            dependency_hash(&ready_with_token("s3cr3t")).unwrap(),
            dependency_hash(&ready_with_token("rotated")).unwrap()
        );
    }

    #[test]
    fn test_map_order_does_not_change_hash() {
        let mut a = ready_with_token("s3cr3t");
        a.injector.spec.selector.labels = testing::labels(&[("app", "web"), ("tier", "front")]);
        let mut b = a.clone();
        b.injector.spec.selector.labels = testing::labels(&[("tier", "front"), ("app", "web")]);
        assert_eq!(dependency_hash(&a).unwrap(), dependency_hash(&b).unwrap());
    }

    #[test]
    fn test_sequence_order_changes_hash() {
        let mut a = ready_with_token("s3cr3t");
        a.injector.spec.selector.namespaces = vec!["a".to_string(), "b".to_string()];
        let mut b = a.clone();
        b.injector.spec.selector.namespaces = vec!["b".to_string(), "a".to_string()];
        assert_ne!(dependency_hash(&a).unwrap(), dependency_hash(&b).unwrap());
    }

    #[test]
    fn test_no_match_is_empty_state() {
        assert_eq!(desired_state(None).unwrap(), DesiredState::Empty);
        let ready = ready_with_token("s3cr3t");
        assert!(desired_state(Some(&ready)).unwrap().is_injected());
    }
}
