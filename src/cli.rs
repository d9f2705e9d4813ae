use crate::filter::{FilterMode, StreamFilterConfig};
use clap::{ArgAction, Parser};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug, Serialize)]
#[command(name = "reflow-ingress-logs")]
#[command(about = "Follow ingress controller pods and print access logs for one namespace")]
pub struct Cli {
    /// Namespace whose requests are picked out of the ingress logs
    #[arg(short = 'n', long, env = "NAMESPACE")]
    pub namespace: String,

    /// Namespace the ingress controller pods run in
    #[arg(long, env = "INGRESS_NAMESPACE", default_value = "ingress-nginx")]
    pub ingress_namespace: String,

    /// Label selector for the ingress controller pods
    #[arg(
        short = 'l',
        long = "selector",
        env = "LABEL_SELECTOR",
        default_value = "app.kubernetes.io/name=ingress-nginx"
    )]
    pub label_selector: String,

    /// Controller uses the stock log format (false: custom `[namespace: ...]` format)
    #[arg(
        long,
        env = "DEFAULT_LOG_FORMAT",
        default_value = "true",
        value_parser = lenient_flag::<true>,
        action = ArgAction::Set
    )]
    pub default_log_format: bool,

    /// Path to a kubeconfig, used when not running in a cluster
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short = 'v', long, env = "DEBUG", value_parser = lenient_flag::<false>, action = ArgAction::SetTrue)]
    pub debug: bool,

    /// Stop a pod's log stream as soon as the pod is deleted
    #[arg(long, env = "STOP_ON_DELETE", value_parser = lenient_flag::<false>, action = ArgAction::SetTrue)]
    pub stop_on_delete: bool,

    /// Seconds to wait before reopening a failed log stream
    #[arg(long = "retry-delay", env = "RETRY_DELAY_SECONDS", default_value_t = 5)]
    pub retry_delay_secs: u64,

    /// Seconds to wait before re-establishing a closed pod watch
    #[arg(long = "rewatch-delay", env = "REWATCH_DELAY_SECONDS", default_value_t = 2)]
    pub rewatch_delay_secs: u64,

    /// Seconds to wait for log streams to stop on shutdown
    #[arg(long = "shutdown-grace", env = "SHUTDOWN_GRACE_SECONDS", default_value_t = 10)]
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is required but not set")]
    Missing(&'static str),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

impl Cli {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.namespace.trim().is_empty() {
            return Err(ConfigError::Missing("NAMESPACE"));
        }
        if self.ingress_namespace.trim().is_empty() {
            return Err(ConfigError::Missing("INGRESS_NAMESPACE"));
        }
        if self.label_selector.trim().is_empty() {
            return Err(ConfigError::Missing("LABEL_SELECTOR"));
        }
        if self.retry_delay_secs == 0 {
            return Err(ConfigError::Zero("RETRY_DELAY_SECONDS"));
        }
        Ok(())
    }

    pub fn filter_config(&self) -> StreamFilterConfig {
        let mode = if self.default_log_format {
            FilterMode::DefaultFormat
        } else {
            FilterMode::CustomFormat
        };
        StreamFilterConfig {
            target_namespace: self.namespace.clone(),
            mode,
        }
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            retry_delay: Duration::from_secs(self.retry_delay_secs),
            rewatch_delay: Duration::from_secs(self.rewatch_delay_secs),
            shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
            stop_on_delete: self.stop_on_delete,
        }
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

/// Timing and lifecycle knobs for the watcher and streamers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    pub retry_delay: Duration,
    pub rewatch_delay: Duration,
    pub shutdown_grace: Duration,
    pub stop_on_delete: bool,
}

/// Boolean flags that can be set from the environment.
const ENV_FLAGS: [&str; 3] = ["DEBUG", "DEFAULT_LOG_FORMAT", "STOP_ON_DELETE"];

/// Parses the truthy/falsy spellings accepted in environment variables.
pub fn parse_flag(value: &str) -> Result<bool, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "t" | "true" | "yes" | "on" | "enabled" => Ok(true),
        "0" | "f" | "false" | "no" | "off" | "disabled" => Ok(false),
        other => Err(format!("invalid boolean value '{}'", other)),
    }
}

/// Like `parse_flag`, but an unrecognised value falls back to `DEFAULT`.
/// Tracing isn't up while arguments are parsed; `invalid_env_flags` reports
/// the fallbacks afterwards.
pub fn lenient_flag<const DEFAULT: bool>(value: &str) -> Result<bool, String> {
    Ok(parse_flag(value).unwrap_or(DEFAULT))
}

/// Environment flags whose values were not understood, with those values.
pub fn invalid_env_flags() -> Vec<(&'static str, String)> {
    ENV_FLAGS
        .iter()
        .filter_map(|&key| {
            let value = std::env::var(key).ok()?;
            parse_flag(&value).is_err().then_some((key, value))
        })
        .collect()
}
