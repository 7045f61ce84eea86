//! Injector readiness.
//!
//! An injector is eligible for matching only when its connection, optional
//! configuration and every referenced secret key resolve. Failures are
//! structured and scoped to the injector; they never abort a pass.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::resources::{
    AgentConfigurationResource, AgentConnectionResource, AgentInjectorResource, ResourceIdentity,
    ResourceKind,
};
use crate::state::StateSnapshot;

/// Why an injector cannot be used this pass.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReadinessFailure {
    /// Referenced `AgentConnection` is missing
    #[error("AgentConnection {namespace}/{name} not found")]
    ConnectionNotFound {
        /// Namespace searched
        namespace: String,
        /// Connection name
        name: String,
    },

    /// Referenced `AgentConfiguration` is missing
    #[error("AgentConfiguration {namespace}/{name} not found")]
    ConfigurationNotFound {
        /// Namespace searched
        namespace: String,
        /// Configuration name
        name: String,
    },

    /// Secret referenced by the connection is missing
    #[error("Secret {namespace}/{name} not found")]
    SecretNotFound {
        /// Namespace searched
        namespace: String,
        /// Secret name
        name: String,
    },

    /// Secret exists but lacks the referenced key
    #[error("Secret {namespace}/{name} has no key {key}")]
    SecretKeyMissing {
        /// Namespace searched
        namespace: String,
        /// Secret name
        name: String,
        /// Missing key
        key: String,
    },
}

/// Injector whose dependency graph fully resolved.
#[derive(Debug, Clone, Serialize)]
pub struct ReadyInjector {
    /// The injector
    pub injector: AgentInjectorResource,
    /// Its connection
    pub connection: AgentConnectionResource,
    /// Its configuration, when referenced
    pub configuration: Option<AgentConfigurationResource>,
    /// `secret/key` -> SHA-256 of every referenced secret value
    pub secret_hashes: BTreeMap<String, String>,
}

impl ReadyInjector {
    /// Injector name
    pub fn name(&self) -> &str {
        &self.injector.name
    }

    /// Injector namespace
    pub fn namespace(&self) -> &str {
        &self.injector.namespace
    }

    /// State container key of the injector
    pub fn identity(&self) -> ResourceIdentity {
        ResourceIdentity::namespaced(
            ResourceKind::AgentInjector,
            &self.injector.namespace,
            &self.injector.name,
        )
    }
}

/// Outcome of evaluating every injector in a snapshot.
#[derive(Debug, Default)]
pub struct ReadinessReport {
    /// Eligible injectors, identity ordered
    pub ready: Vec<ReadyInjector>,
    /// Ineligible injectors with every reason found
    pub not_ready: Vec<(ResourceIdentity, Vec<ReadinessFailure>)>,
    /// Injectors skipped because they are disabled
    pub disabled: Vec<ResourceIdentity>,
}

/// Resolves the dependency graph of `injector`.
///
/// Every failure is collected rather than stopping at the first one.
pub fn evaluate(
    injector: &AgentInjectorResource,
    snapshot: &StateSnapshot,
) -> Result<ReadyInjector, Vec<ReadinessFailure>> {
    let namespace = injector.namespace.as_str();
    let mut failures = Vec::new();

    let connection_name = injector.spec.connection.name.as_str();
    let connection = snapshot.connection(namespace, connection_name);
    if connection.is_none() {
        failures.push(ReadinessFailure::ConnectionNotFound {
            namespace: namespace.to_string(),
            name: connection_name.to_string(),
        });
    }

    let configuration = match &injector.spec.configuration {
        Some(reference) => {
            let found = snapshot.configuration(namespace, &reference.name);
            if found.is_none() {
                failures.push(ReadinessFailure::ConfigurationNotFound {
                    namespace: namespace.to_string(),
                    name: reference.name.clone(),
                });
            }
            found.cloned()
        }
        None => None,
    };

    let mut secret_hashes = BTreeMap::new();
    if let Some(connection) = connection {
        for reference in connection.spec.secret_references() {
            let Some(secret) = snapshot.secret(namespace, &reference.secret_name) else {
                failures.push(ReadinessFailure::SecretNotFound {
                    namespace: namespace.to_string(),
                    name: reference.secret_name.clone(),
                });
                continue;
            };
            match secret.key_hashes.get(&reference.secret_key) {
                Some(hash) => {
                    secret_hashes.insert(
                        format!("{}/{}", reference.secret_name, reference.secret_key),
                        hash.clone(),
                    );
                }
                None => failures.push(ReadinessFailure::SecretKeyMissing {
                    namespace: namespace.to_string(),
                    name: reference.secret_name.clone(),
                    key: reference.secret_key.clone(),
                }),
            }
        }
    }

    match connection {
        Some(connection) if failures.is_empty() => Ok(ReadyInjector {
            injector: injector.clone(),
            connection: connection.clone(),
            configuration,
            secret_hashes,
        }),
        _ => Err(failures),
    }
}

/// Evaluates every injector in `snapshot`, logging the ones left out.
pub fn evaluate_all(snapshot: &StateSnapshot) -> ReadinessReport {
    let mut report = ReadinessReport::default();

    for injector in snapshot.injectors() {
        let identity = ResourceIdentity::namespaced(
            ResourceKind::AgentInjector,
            &injector.namespace,
            &injector.name,
        );
        if !injector.spec.enabled {
            debug!("AgentInjector {}/{} is disabled", injector.namespace, injector.name);
            report.disabled.push(identity);
            continue;
        }

        match evaluate(injector, snapshot) {
            Ok(ready) => report.ready.push(ready),
            Err(failures) => {
                let reasons: Vec<String> = failures.iter().map(ToString::to_string).collect();
                warn!(
                    "AgentInjector {}/{} is not ready: {}",
                    injector.namespace,
                    injector.name,
                    reasons.join("; ")
                );
                report.not_ready.push((identity, failures));
            }
        }
    }

    report
}
