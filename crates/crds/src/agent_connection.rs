//! AgentConnection CRD
//!
//! Where an injected agent reports to, and which Secret keys hold its credentials.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::references::SecretKeyReference;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[kube(
    group = "agents.injector.io",
    version = "v1beta1",
    kind = "AgentConnection",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct AgentConnectionSpec {
    /// Agent backend URL
    pub url: String,

    /// API token
    pub token: SecretKeyReference,

    /// Optional user name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<SecretKeyReference>,

    /// Optional service key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_key: Option<SecretKeyReference>,
}

impl AgentConnectionSpec {
    /// Every Secret key this connection depends on, in declaration order
    pub fn secret_references(&self) -> Vec<&SecretKeyReference> {
        std::iter::once(&self.token)
            .chain(self.user_name.as_ref())
            .chain(self.service_key.as_ref())
            .collect()
    }
}
