//! Configuration resolution for the relay.
//!
//! Resolution order (lowest to highest priority):
//! 1. Built-in defaults
//! 2. Environment variables
//! 3. CLI arguments (applied by the binaries on top of the result)

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Port the gateway listens on when nothing else is configured.
pub const DEFAULT_PORT: u16 = 3998;

/// Model preference order used when no override is configured.
pub const DEFAULT_PREFERRED_MODELS: &[&str] =
    &["gpt-5", "gpt-5-mini", "gpt-4.1-mini", "gpt-4.1", "copilot-base"];

pub const ENV_PORT: &str = "CHATRELAY_PORT";
pub const ENV_MODEL: &str = "CHATRELAY_MODEL";
pub const ENV_PREFERRED_MODELS: &str = "CHATRELAY_PREFERRED_MODELS";
pub const ENV_GATEWAY_BIN: &str = "CHATRELAY_GATEWAY_BIN";
pub const ENV_DEBUG: &str = "CHATRELAY_DEBUG";

/// Complete relay configuration consumed by the host orchestrator.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Port the gateway binds to. `0` lets the OS pick one.
    pub port: u16,
    /// Which model the request handler should be bound to.
    pub model: ModelSelection,
    /// Path to the gateway executable.
    pub gateway_bin: PathBuf,
    /// How long to wait for the gateway's `serverReady` announcement.
    pub startup_timeout: Duration,
    /// How long `stop()` waits for the gateway to exit before killing it.
    pub shutdown_timeout: Duration,
    /// Verbose gateway logging.
    pub debug: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            model: ModelSelection::default(),
            gateway_bin: PathBuf::from("chatrelay-gateway"),
            startup_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(5),
            debug: false,
        }
    }
}

/// Model selection inputs.
///
/// `exact` wins when it resolves; otherwise `preferred` is tried in order,
/// falling back to [`DEFAULT_PREFERRED_MODELS`] when it is empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelSelection {
    pub exact: Option<String>,
    pub preferred: Vec<String>,
}

impl ModelSelection {
    /// Candidates to try after the exact model, in order.
    pub fn candidates(&self) -> Vec<String> {
        if self.preferred.is_empty() {
            DEFAULT_PREFERRED_MODELS
                .iter()
                .map(|m| (*m).to_string())
                .collect()
        } else {
            self.preferred.clone()
        }
    }
}

impl RelayConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        apply_overrides(&mut config, |key| std::env::var(key).ok())?;
        Ok(config)
    }
}

/// Split a comma separated model list, dropping blank entries.
pub fn parse_model_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Apply overrides from `lookup` (normally the process environment).
pub fn apply_overrides<F>(config: &mut RelayConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = lookup(ENV_PORT) {
        config.port = val
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("{ENV_PORT}={val:?}: {e}")))?;
    }
    if let Some(val) = lookup(ENV_MODEL) {
        let trimmed = val.trim();
        if !trimmed.is_empty() {
            config.model.exact = Some(trimmed.to_string());
        }
    }
    if let Some(val) = lookup(ENV_PREFERRED_MODELS) {
        config.model.preferred = parse_model_list(&val);
    }
    if let Some(val) = lookup(ENV_GATEWAY_BIN) {
        config.gateway_bin = PathBuf::from(val);
    }
    if let Some(val) = lookup(ENV_DEBUG) {
        config.debug = parse_flag(&val)
            .ok_or_else(|| Error::Config(format!("{ENV_DEBUG}={val:?}: expected a boolean")))?;
    }
    Ok(())
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}
