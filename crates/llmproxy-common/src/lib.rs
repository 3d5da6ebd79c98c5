//! Typed configuration model: the YAML provider/route/settings file plus the
//! CLI/env overlay that produces the [`GlobalConfig`] snapshot the rest of the
//! proxy reads from.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const AUTH_VALUE_OAUTH: &str = "oauth";
pub const AUTH_VALUE_PASSTHROUGH: &str = "passthrough";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    Anthropic,
    Openai,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    ApiKey,
    AuthToken,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ProviderType,
    pub base_url: String,
    pub auth_type: AuthType,
    pub auth_value: String,
    #[serde(default)]
    pub account_email: Option<String>,
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelRouteEntry {
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub account_email: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    #[default]
    Priority,
    RoundRobin,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SettingsConfig {
    pub selection_strategy: SelectionStrategy,
    pub unhealthy_threshold: u32,
    pub failure_cooldown_secs: u64,
    pub count_tokens_cooldown_secs: u64,
    pub count_tokens_timeout_override_secs: Option<u64>,
    pub log_level: String,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            selection_strategy: SelectionStrategy::default(),
            unhealthy_threshold: 3,
            failure_cooldown_secs: 30,
            count_tokens_cooldown_secs: 10,
            count_tokens_timeout_override_secs: None,
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct FileConfig {
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub model_routes: HashMap<String, Vec<ModelRouteEntry>>,
    #[serde(default)]
    pub settings: SettingsConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("duplicate provider (name, account_email) pair: {name:?} / {account_email:?}")]
    DuplicateProvider {
        name: String,
        account_email: Option<String>,
    },
    #[error("settings.unhealthy_threshold must be > 0")]
    ZeroUnhealthyThreshold,
    #[error("model_routes.{model} references unknown provider {provider:?}")]
    UnknownRouteProvider { model: String, provider: String },
}

impl FileConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let parsed: FileConfig = serde_yaml::from_str(text)?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    /// Enforces the provider-uniqueness invariant and that routes only name
    /// providers that exist. Called on initial load and on every reload
    /// attempt; a failing reload must not replace the live snapshot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.settings.unhealthy_threshold == 0 {
            return Err(ConfigError::ZeroUnhealthyThreshold);
        }

        let mut seen: Vec<(String, Option<String>)> = Vec::new();
        for provider in self.providers.iter().filter(|p| p.enabled) {
            let key = (
                provider.name.to_ascii_lowercase(),
                provider
                    .account_email
                    .as_ref()
                    .map(|e| e.to_ascii_lowercase()),
            );
            if seen.contains(&key) {
                return Err(ConfigError::DuplicateProvider {
                    name: provider.name.clone(),
                    account_email: provider.account_email.clone(),
                });
            }
            seen.push(key);
        }

        let known_names: std::collections::HashSet<&str> =
            self.providers.iter().map(|p| p.name.as_str()).collect();
        for (model, entries) in &self.model_routes {
            for entry in entries {
                if !known_names.contains(entry.provider.as_str()) {
                    return Err(ConfigError::UnknownRouteProvider {
                        model: model.clone(),
                        provider: entry.provider.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}

/// CLI/env overrides layered on top of the file-derived settings. Only the
/// fields an operator is expected to flip per-deployment live here; anything
/// else comes from the YAML file.
#[derive(Debug, Clone, Default)]
pub struct GlobalConfigPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub proxy: Option<String>,
}

impl GlobalConfigPatch {
    /// CLI/env values win: any `Some` field in `other` replaces ours.
    pub fn overlay(&mut self, other: GlobalConfigPatch) {
        if other.host.is_some() {
            self.host = other.host;
        }
        if other.port.is_some() {
            self.port = other.port;
        }
        if other.proxy.is_some() {
            self.proxy = other.proxy;
        }
    }
}

/// The fully-resolved, validated runtime configuration. Held behind an
/// `ArcSwap` by the app so a reload only takes effect once it validates.
#[derive(Debug, Clone)]
pub struct GlobalConfig {
    pub host: String,
    pub port: u16,
    pub selection_strategy: SelectionStrategy,
    pub unhealthy_threshold: u32,
    pub failure_cooldown: Duration,
    pub count_tokens_cooldown: Duration,
    pub count_tokens_timeout_override: Option<Duration>,
    pub log_level: String,
    pub dedup_buffer_soft_cap: usize,
    pub subscriber_queue_cap: usize,
    pub proxy: Option<String>,
}

impl GlobalConfig {
    pub fn from_file_and_patch(file: &FileConfig, patch: GlobalConfigPatch) -> Self {
        Self {
            host: patch.host.unwrap_or_else(|| "127.0.0.1".to_string()),
            port: patch.port.unwrap_or(8089),
            selection_strategy: file.settings.selection_strategy,
            unhealthy_threshold: file.settings.unhealthy_threshold,
            failure_cooldown: Duration::from_secs(file.settings.failure_cooldown_secs),
            count_tokens_cooldown: Duration::from_secs(file.settings.count_tokens_cooldown_secs),
            count_tokens_timeout_override: file
                .settings
                .count_tokens_timeout_override_secs
                .map(Duration::from_secs),
            log_level: file.settings.log_level.clone(),
            dedup_buffer_soft_cap: 512,
            subscriber_queue_cap: 256,
            proxy: patch.proxy,
        }
    }
}
