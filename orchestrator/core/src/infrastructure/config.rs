// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Client Configuration
//!
//! Connection and tuning settings shared by every command.
//!
//! # Discovery
//!
//! 1. Explicit `--config` path (must exist)
//! 2. `FLOTILLA_CONFIG_PATH` environment variable
//! 3. `./flotilla.yaml` (working directory)
//! 4. `~/.flotilla/config.yaml` (user home)
//!
//! Environment variables are applied on top of whatever was loaded.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::domain::canary::DEFAULT_CANARY_PREFIX;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8283";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Fan-out width for apply and bulk operations
    pub concurrency: usize,
    pub request_timeout_secs: u64,
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,
    /// Overall deadline for bulk message operations
    pub dispatch_timeout_secs: u64,
    pub canary_prefix: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            concurrency: 8,
            request_timeout_secs: 60,
            retry_attempts: 3,
            retry_backoff_ms: 250,
            dispatch_timeout_secs: 300,
            canary_prefix: DEFAULT_CANARY_PREFIX.to_string(),
        }
    }
}

impl ClientConfig {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("Failed to parse client config")
    }

    /// Discover a configuration file using the precedence order above,
    /// skipping the explicit path.
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("FLOTILLA_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./flotilla.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".flotilla").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        None
    }

    /// Load with discovery, falling back to defaults, then apply the
    /// environment.
    pub fn load_or_default(cli_path: Option<PathBuf>) -> Result<Self> {
        let mut config = if let Some(path) = cli_path {
            info!("Loading configuration from explicit path: {:?}", path);
            Self::from_yaml_file(&path)?
        } else if let Some(path) = Self::discover_config() {
            info!("Loading configuration from discovered path: {:?}", path);
            Self::from_yaml_file(&path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply `FLOTILLA_*` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("FLOTILLA_BASE_URL") {
            self.base_url = url;
        }
        if let Some(key) = lookup("FLOTILLA_API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(prefix) = lookup("FLOTILLA_CANARY_PREFIX") {
            self.canary_prefix = prefix;
        }
        parse_override(&lookup, "FLOTILLA_CONCURRENCY", &mut self.concurrency);
        parse_override(&lookup, "FLOTILLA_REQUEST_TIMEOUT_SECS", &mut self.request_timeout_secs);
        parse_override(&lookup, "FLOTILLA_RETRY_ATTEMPTS", &mut self.retry_attempts);
        parse_override(&lookup, "FLOTILLA_DISPATCH_TIMEOUT_SECS", &mut self.dispatch_timeout_secs);
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_secs)
    }
}

fn parse_override<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => {
            info!("Environment override: {}={}", key, raw);
            *target = value;
        }
        Err(_) => warn!("Invalid value for {}: '{}'. Ignoring.", key, raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.request_timeout(), Duration::from_secs(60));
        assert_eq!(config.canary_prefix, "CANARY-");
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = ClientConfig::from_yaml_str("base_url: https://agents.example.com\nconcurrency: 4\n").unwrap();
        assert_eq!(config.base_url, "https://agents.example.com");
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.retry_attempts, 3);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("FLOTILLA_API_KEY", "secret"),
            ("FLOTILLA_CONCURRENCY", "16"),
            ("FLOTILLA_REQUEST_TIMEOUT_SECS", "not-a-number"),
        ]);
        let mut config = ClientConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.api_key.as_deref(), Some("secret"));
        assert_eq!(config.concurrency, 16);
        assert_eq!(config.request_timeout_secs, 60);
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flotilla.yaml");
        std::fs::write(&path, "canary_prefix: SHADOW-\n").unwrap();

        let config = ClientConfig::from_yaml_file(&path).unwrap();
        assert_eq!(config.canary_prefix, "SHADOW-");
        assert!(ClientConfig::from_yaml_file(dir.path().join("missing.yaml")).is_err());
    }
}
