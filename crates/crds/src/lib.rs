//! Agent Injector CRD Definitions
//!
//! Kubernetes Custom Resource Definitions consumed by the agent injector controller.

pub mod agent_configuration;
pub mod agent_connection;
pub mod agent_injector;
pub mod cluster_agent_injector;
pub mod references;

pub use agent_configuration::*;
pub use agent_connection::*;
pub use agent_injector::*;
pub use cluster_agent_injector::*;
pub use references::*;
