//! Matching engine.
//!
//! Selector evaluation for injectors against workloads, cluster templates
//! against namespaces, and pod selectors against pod labels, plus the
//! deterministic tie-break between competing injectors.
//!
//! Label patterns are case-insensitive globs (`*` any run, `?` one char).
//! Workload label patterns use ANY semantics; namespace label patterns of
//! cluster templates use ALL semantics.

use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

use dashmap::DashMap;
use regex::Regex;
use tracing::warn;

use crds::{LabelOperator, NamespaceSelector, PodSelector};

use crate::readiness::ReadyInjector;
use crate::resources::{AgentInjectorResource, NamespaceResource, ResourceIdentity, Workload};

/// Compiles a glob into an anchored, case-insensitive regex.
pub fn glob_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut source = String::with_capacity(pattern.len() + 8);
    source.push_str("(?i)^");
    for ch in pattern.chars() {
        match ch {
            '*' => source.push_str(".*"),
            '?' => source.push('.'),
            other => source.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    source.push('$');
    Regex::new(&source)
}

/// Compiled globs by pattern; `None` marks a pattern that failed to compile.
static GLOB_CACHE: LazyLock<DashMap<String, Option<Regex>>> = LazyLock::new(DashMap::new);

fn cached_glob(pattern: &str) -> Option<Regex> {
    if let Some(cached) = GLOB_CACHE.get(pattern) {
        return cached.value().clone();
    }

    let compiled = match glob_regex(pattern) {
        Ok(regex) => Some(regex),
        Err(e) => {
            warn!("Ignoring invalid glob pattern {:?}: {}", pattern, e);
            None
        }
    };
    GLOB_CACHE
        .entry(pattern.to_string())
        .or_insert(compiled)
        .value()
        .clone()
}

/// True when `value` matches glob `pattern`. Uncompilable patterns match nothing.
///
/// Each pattern is compiled once per process.
pub fn glob_matches(pattern: &str, value: &str) -> bool {
    cached_glob(pattern).is_some_and(|regex| regex.is_match(value))
}

fn label_pattern_matches(
    key_pattern: &str,
    value_pattern: &str,
    labels: &BTreeMap<String, String>,
) -> bool {
    labels
        .iter()
        .any(|(key, value)| glob_matches(key_pattern, key) && glob_matches(value_pattern, value))
}

/// True when `injector` selects `workload`.
///
/// The workload's namespace must be in the injector's allow-list, and either
/// the injector has no label patterns or at least one pattern matches at
/// least one workload label.
pub fn workload_matches(injector: &AgentInjectorResource, workload: &Workload<'_>) -> bool {
    let namespace = workload.namespace();
    let allowed = injector
        .allowed_namespaces()
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(namespace));
    if !allowed {
        return false;
    }

    let patterns = &injector.spec.selector.labels;
    patterns.is_empty()
        || patterns
            .iter()
            .any(|(key, value)| label_pattern_matches(key, value, workload.labels()))
}

/// True when a cluster template's `selector` selects `namespace`.
///
/// Either any name pattern matches the namespace name, or label patterns are
/// given and every one of them is satisfied by the namespace labels.
pub fn namespace_matches(selector: &NamespaceSelector, namespace: &NamespaceResource) -> bool {
    let by_name = selector
        .name_patterns
        .iter()
        .any(|pattern| glob_matches(pattern, &namespace.name));
    if by_name {
        return true;
    }

    !selector.label_patterns.is_empty()
        && selector
            .label_patterns
            .iter()
            .all(|(key, value)| label_pattern_matches(key, value, &namespace.labels))
}

/// Evaluates `selector` against pod `labels`.
///
/// Expressions are AND-ed and an empty list matches every pod.
pub fn pod_selector_matches(selector: &PodSelector, labels: &BTreeMap<String, String>) -> bool {
    selector.expressions.iter().all(|expression| {
        let observed = labels.get(&expression.key);
        let in_values = || {
            observed.is_some_and(|value| {
                expression
                    .values
                    .iter()
                    .any(|candidate| candidate.eq_ignore_ascii_case(value))
            })
        };
        match expression.operator {
            LabelOperator::In => in_values(),
            LabelOperator::NotIn => !in_values(),
            LabelOperator::Exists => observed.is_some(),
            LabelOperator::DoesNotExist => observed.is_none(),
        }
    })
}

/// Picks the injector for `workload` among `candidates`.
///
/// Several matches resolve to the lowest name (then namespace) with a warning.
pub fn select_injector<'a>(
    workload: &Workload<'_>,
    candidates: &'a [ReadyInjector],
) -> Option<&'a ReadyInjector> {
    let mut matched: Vec<&ReadyInjector> = candidates
        .iter()
        .filter(|ready| workload_matches(&ready.injector, workload))
        .collect();

    if matched.len() > 1 {
        matched.sort_by(|a, b| {
            a.name()
                .cmp(b.name())
                .then_with(|| a.namespace().cmp(b.namespace()))
        });
        let names: Vec<&str> = matched.iter().map(|ready| ready.name()).collect();
        warn!(
            "{} {}/{} is matched by several injectors {:?}, using {}",
            workload.kind(),
            workload.namespace(),
            workload.name(),
            names,
            matched[0].name()
        );
    }

    matched.into_iter().next()
}

/// Ready injectors that were not selected for any workload.
pub fn unused_injectors<'a>(
    ready: &'a [ReadyInjector],
    used: &HashSet<ResourceIdentity>,
) -> Vec<&'a ReadyInjector> {
    ready
        .iter()
        .filter(|candidate| !used.contains(&candidate.identity()))
        .collect()
}
