//! Object references shared by the agent CRDs
//!
//! Injectors reference their connection and configuration by name within
//! their own namespace. Connections reference credentials stored in
//! Kubernetes Secrets by secret name and data key.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to another agent resource in the same namespace as the referencing resource.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct LocalResourceReference {
    /// Name of the referenced resource
    pub name: String,
}

impl LocalResourceReference {
    /// Create a reference to the named resource
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Reference to a single key inside a Kubernetes Secret.
///
/// The Secret must live in the same namespace as the referencing resource.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeyReference {
    /// Name of the Secret
    pub secret_name: String,

    /// Key within the Secret's data
    pub secret_key: String,
}

impl SecretKeyReference {
    /// Create a reference to `key` in the Secret named `name`
    pub fn new(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            secret_name: name.into(),
            secret_key: key.into(),
        }
    }
}
