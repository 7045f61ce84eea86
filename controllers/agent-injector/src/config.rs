//! Operator configuration read from the environment.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::info;

use crate::error::ControllerError;

const DEFAULT_CERT_DIR: &str = "/tmp/k8s-webhook-server/serving-certs";

/// Serving settings of the admission webhook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookConfig {
    /// HTTPS port
    pub port: u16,
    /// PEM certificate chain
    pub cert_path: PathBuf,
    /// PEM private key
    pub key_path: PathBuf,
}

/// Runtime settings of the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Namespace to watch, `None` for all namespaces
    pub watch_namespace: Option<String>,
    /// Namespace the controller runs in
    pub operator_namespace: String,
    /// Grace period after startup before any write
    pub settle_duration: Duration,
    /// Debounce window of the merge engine
    pub merge_window: Duration,
    /// Interval of merge engine ticks
    pub tick_interval: Duration,
    /// Also watch OpenShift DeploymentConfigs
    pub enable_openshift: bool,
    /// Capacity of the telemetry buffer
    pub telemetry_buffer_capacity: usize,
    /// Leader-election state
    pub leader: bool,
    /// Admission webhook, `None` when disabled
    pub webhook: Option<WebhookConfig>,
}

impl OperatorConfig {
    /// Reads the configuration from process environment variables.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads the configuration through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let tick_interval = Duration::from_secs(parse_or(&lookup, "TICK_INTERVAL_SECS", 1)?);
        if tick_interval.is_zero() {
            return Err(ControllerError::InvalidConfig(
                "TICK_INTERVAL_SECS must be greater than zero".to_string(),
            ));
        }

        let telemetry_buffer_capacity = parse_or(&lookup, "TELEMETRY_BUFFER_CAPACITY", 128)?;
        if telemetry_buffer_capacity == 0 {
            return Err(ControllerError::InvalidConfig(
                "TELEMETRY_BUFFER_CAPACITY must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            watch_namespace: lookup("WATCH_NAMESPACE").filter(|ns| !ns.is_empty()),
            operator_namespace: lookup("OPERATOR_NAMESPACE")
                .filter(|ns| !ns.is_empty())
                .unwrap_or_else(|| "default".to_string()),
            settle_duration: Duration::from_secs(parse_or(&lookup, "SETTLE_DURATION_SECS", 10)?),
            merge_window: Duration::from_secs(parse_or(&lookup, "EVENT_MERGE_WINDOW_SECS", 2)?),
            tick_interval,
            enable_openshift: parse_or(&lookup, "ENABLE_OPENSHIFT", false)?,
            telemetry_buffer_capacity,
            leader: parse_or(&lookup, "LEADER", true)?,
            webhook: webhook_config(&lookup)?,
        })
    }

    /// Logs the effective configuration.
    pub fn log(&self) {
        info!("Configuration:");
        info!(
            "  Namespace: {}",
            self.watch_namespace.as_deref().unwrap_or("all namespaces")
        );
        info!("  Operator namespace: {}", self.operator_namespace);
        info!("  Settle duration: {:?}", self.settle_duration);
        info!("  Merge window: {:?}", self.merge_window);
        info!("  Tick interval: {:?}", self.tick_interval);
        info!("  OpenShift: {}", self.enable_openshift);
        info!("  Telemetry buffer: {}", self.telemetry_buffer_capacity);
        info!("  Leader: {}", self.leader);
        match &self.webhook {
            Some(webhook) => info!("  Webhook: port {}", webhook.port),
            None => info!("  Webhook: disabled"),
        }
    }
}

fn webhook_config<F>(lookup: &F) -> Result<Option<WebhookConfig>, ControllerError>
where
    F: Fn(&str) -> Option<String>,
{
    if !parse_or(lookup, "WEBHOOK_ENABLED", false)? {
        return Ok(None);
    }
    let path = |key: &str, file: &str| {
        lookup(key)
            .filter(|value| !value.is_empty())
            .map_or_else(|| PathBuf::from(DEFAULT_CERT_DIR).join(file), PathBuf::from)
    };
    Ok(Some(WebhookConfig {
        port: parse_or(lookup, "WEBHOOK_PORT", 8443)?,
        cert_path: path("WEBHOOK_CERT_PATH", "tls.crt"),
        key_path: path("WEBHOOK_KEY_PATH", "tls.key"),
    }))
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ControllerError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().to_lowercase().parse().map_err(|e| {
            ControllerError::InvalidConfig(format!("{} has invalid value {:?}: {}", key, raw, e))
        }),
    }
}
