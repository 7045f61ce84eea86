//! Controller-specific error types.
//!
//! Errors raised while bootstrapping the controller and running its watchers.
//! Reconciliation failures inside the core are logged there and never reach
//! this type.

use injector_core::CoreError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the Agent Injector Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Injector core error
    #[error("Injector core error: {0}")]
    Core(#[from] CoreError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Admission webhook could not be served
    #[error("Admission webhook failed: {0}")]
    Webhook(String),
}
