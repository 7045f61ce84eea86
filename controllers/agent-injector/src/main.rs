//! Agent Injector Controller
//!
//! Keeps workload pod templates annotated with the AgentInjector that
//! selects them, materializes ClusterAgentInjector templates per namespace
//! and reports injection conditions on pods.

mod config;
mod controller;
mod error;
mod watcher;
mod webhook;
mod writer;

use controller::Controller;
use crate::config::OperatorConfig;
use crate::error::ControllerError;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        debug!("rustls crypto provider already installed");
    }

    info!("Starting Agent Injector Controller");

    let config = OperatorConfig::from_env()?;
    config.log();

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
