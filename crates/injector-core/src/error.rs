//! Core error types.
//!
//! Errors raised by the state store, dispatch table, patch protocol and
//! injection helpers. Kubernetes transport errors are carried as strings by
//! [`CoreError::Write`] so the core stays independent of the client stack.

use thiserror::Error;

use crds::AgentType;

/// Errors that can occur in the injector core.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A type's equality plan is malformed (data-model bug, not transient)
    #[error("Invalid equality plan for type {type_name}: {reason}")]
    InvalidEqualityPlan {
        /// Fully qualified name of the offending type
        type_name: &'static str,
        /// What is wrong with the plan
        reason: String,
    },

    /// A notification or request has the wrong number of handlers
    #[error("Dispatch table error: {0}")]
    Dispatch(String),

    /// No patcher is registered for the agent type
    #[error("No patcher registered for agent type {0}")]
    UnknownAgentType(AgentType),

    /// Outbound write to the cluster failed
    #[error("Cluster write failed: {0}")]
    Write(String),

    /// Request could not be answered from the current state
    #[error("Not found: {0}")]
    NotFound(String),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Handler panicked while processing a notification
    #[error("Handler {0} panicked")]
    HandlerPanicked(&'static str),
}
