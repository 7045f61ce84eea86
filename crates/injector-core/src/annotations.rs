//! Annotation keys and the idempotent pod-template annotation patch.
//!
//! Three identifying annotations on a workload's pod template record which
//! injector (and which revision of its dependency graph) the workload was last
//! patched for. The admission mutator reads them when pods are created.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

/// Prefix reserved for annotations written by this controller
pub const ANNOTATION_PREFIX: &str = "agents.injector.io/";

/// Set on pods that received an agent
pub const IS_INJECTED: &str = "agents.injector.io/is-injected";
/// RFC 3339 timestamp of the injection
pub const INJECTED_ON: &str = "agents.injector.io/injected-on";
/// Hash of the injector's dependency graph
pub const INJECTOR_HASH: &str = "agents.injector.io/injector-hash";
/// Name of the matched injector
pub const INJECTOR_NAME: &str = "agents.injector.io/injector-name";
/// Namespace of the matched injector
pub const INJECTOR_NAMESPACE: &str = "agents.injector.io/injector-namespace";
/// Name of the workload owning the pod
pub const WORKLOAD_NAME: &str = "agents.injector.io/workload-name";
/// Namespace of the workload owning the pod
pub const WORKLOAD_NAMESPACE: &str = "agents.injector.io/workload-namespace";

/// Pod condition type describing injection convergence
pub const INJECTION_CONDITION_TYPE: &str = "AgentInjected";

/// What a workload's pod template should say about injection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DesiredState {
    /// No injector applies
    Empty,
    /// The named injector applies with the given dependency hash
    Injected {
        /// Dependency graph hash
        hash: String,
        /// Injector name
        injector_name: String,
        /// Injector namespace
        injector_namespace: String,
    },
}

impl DesiredState {
    /// Reads the identifying annotations back from a pod template.
    ///
    /// All three must be present for the template to count as injected.
    pub fn from_annotations(annotations: Option<&BTreeMap<String, String>>) -> Self {
        let Some(annotations) = annotations else {
            return Self::Empty;
        };
        match (
            annotations.get(INJECTOR_HASH),
            annotations.get(INJECTOR_NAME),
            annotations.get(INJECTOR_NAMESPACE),
        ) {
            (Some(hash), Some(name), Some(namespace)) => Self::Injected {
                hash: hash.clone(),
                injector_name: name.clone(),
                injector_namespace: namespace.clone(),
            },
            _ => Self::Empty,
        }
    }

    /// True when an injector applies
    pub fn is_injected(&self) -> bool {
        matches!(self, Self::Injected { .. })
    }
}

/// Computes the annotation set a pod template should carry.
///
/// Every reserved annotation is stripped first, then the identifying
/// annotations are added when an injector applies. `None` means the template
/// should have no annotation map at all.
pub fn desired_annotations(
    current: Option<&BTreeMap<String, String>>,
    desired: &DesiredState,
) -> Option<BTreeMap<String, String>> {
    let mut annotations: BTreeMap<String, String> = current
        .into_iter()
        .flatten()
        .filter(|(key, _)| !key.starts_with(ANNOTATION_PREFIX))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    if let DesiredState::Injected {
        hash,
        injector_name,
        injector_namespace,
    } = desired
    {
        annotations.insert(INJECTOR_HASH.to_string(), hash.clone());
        annotations.insert(INJECTOR_NAME.to_string(), injector_name.clone());
        annotations.insert(INJECTOR_NAMESPACE.to_string(), injector_namespace.clone());
    }

    (!annotations.is_empty()).then_some(annotations)
}

/// Builds the JSON merge patch moving a pod template to `desired`.
///
/// Returns `None` when the template already reflects `desired`. The patch is a
/// single request: removed keys are set to `null`, and an empty result removes
/// the annotation map itself.
pub fn template_annotation_patch(
    current: Option<&BTreeMap<String, String>>,
    desired: &DesiredState,
) -> Option<Value> {
    if DesiredState::from_annotations(current) == *desired {
        return None;
    }

    let annotations = match desired_annotations(current, desired) {
        None => Value::Null,
        Some(next) => {
            let mut patch = Map::new();
            for key in current.into_iter().flatten().map(|(key, _)| key) {
                if !next.contains_key(key) {
                    patch.insert(key.clone(), Value::Null);
                }
            }
            for (key, value) in next {
                patch.insert(key, Value::String(value));
            }
            Value::Object(patch)
        }
    };

    Some(json!({
        "spec": {
            "template": {
                "metadata": {
                    "annotations": annotations
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn injected(hash: &str) -> DesiredState {
        DesiredState::Injected {
            hash: hash.to_string(),
            injector_name: "java".to_string(),
            injector_namespace: "default".to_string(),
        }
    }

    #[test]
    fn test_identical_state_needs_no_patch() {
        let current = desired_annotations(None, &injected("abc"));
        assert!(template_annotation_patch(current.as_ref(), &injected("abc")).is_none());
        assert!(template_annotation_patch(None, &DesiredState::Empty).is_none());
    }

    #[test]
    fn test_hash_change_produces_patch() {
        let current = desired_annotations(None, &injected("abc"));
        let patch = template_annotation_patch(current.as_ref(), &injected("def")).unwrap();
        assert_eq!(
            patch["spec"]["template"]["metadata"]["annotations"][INJECTOR_HASH],
            "def"
        );
    }

    #[test]
    fn test_removal_drops_empty_annotation_map() {
        let current = desired_annotations(None, &injected("abc"));
        let patch = template_annotation_patch(current.as_ref(), &DesiredState::Empty).unwrap();
        assert!(patch["spec"]["template"]["metadata"]["annotations"].is_null());
    }

    #[test]
    fn test_removal_keeps_foreign_annotations() {
        let mut current = desired_annotations(None, &injected("abc")).unwrap();
        current.insert("prometheus.io/scrape".to_string(), "true".to_string());
        current.insert(IS_INJECTED.to_string(), "True".to_string());

        let patch = template_annotation_patch(Some(&current), &DesiredState::Empty).unwrap();
        let annotations = &patch["spec"]["template"]["metadata"]["annotations"];
        assert_eq!(annotations["prometheus.io/scrape"], "true");
        assert!(annotations[INJECTOR_HASH].is_null());
        assert!(annotations[IS_INJECTED].is_null());
        assert!(annotations.as_object().unwrap().contains_key(INJECTOR_NAME));
    }

    #[test]
    fn test_partial_annotations_read_as_empty() {
        let mut current = BTreeMap::new();
        current.insert(INJECTOR_HASH.to_string(), "abc".to_string());
        assert_eq!(DesiredState::from_annotations(Some(&current)), DesiredState::Empty);
    }
}
