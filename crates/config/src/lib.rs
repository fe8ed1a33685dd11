//! `~/.blv/config.toml`, then environment overrides, then validation.
//!
//! Every section has defaults, so an empty or missing file is a working
//! configuration as long as `ANTHROPIC_API_KEY` is set.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Everything read from `config.toml`.
///
/// Maps directly to `~/.blv/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Backend connection settings
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Model ids per capability tier
    #[serde(default)]
    pub models: ModelsConfig,

    /// Temperature for unrouted turns
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Max output tokens for unrouted turns
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Extended reasoning mode for general chat turns
    #[serde(default)]
    pub thinking: ThinkingMode,

    /// Intent routing
    #[serde(default)]
    pub routing: RoutingSettings,

    /// Caps applied while assembling the system prompt
    #[serde(default)]
    pub context: ContextLimits,

    /// Conversation history and token ceiling
    #[serde(default)]
    pub conversation: ConversationConfig,

    /// Persistence
    #[serde(default)]
    pub storage: StorageConfig,

    /// Parse `[FINDING: ...]` markers out of assistant text
    #[serde(default)]
    pub legacy_markers: bool,

    /// Language the assistant is instructed to reply in
    #[serde(default = "default_reply_language")]
    pub reply_language: String,
}

fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    8192
}
fn default_reply_language() -> String {
    "English".into()
}
fn default_true() -> bool {
    true
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_api_version")]
    pub api_version: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://api.anthropic.com".into()
}
fn default_api_version() -> String {
    "2023-06-01".into()
}
fn default_timeout_secs() -> u64 {
    120
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("api_version", &self.api_version)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            api_version: default_api_version(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Model ids by capability tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Cheap, fast tier (classification, factual recall)
    #[serde(default = "default_fast_model")]
    pub fast: String,

    /// General-purpose tier
    #[serde(default = "default_standard_model")]
    pub standard: String,

    /// Most capable tier (flow analysis)
    #[serde(default = "default_deep_model")]
    pub deep: String,
}

fn default_fast_model() -> String {
    "claude-haiku-4-5-20251001".into()
}
fn default_standard_model() -> String {
    "claude-sonnet-4-5-20250929".into()
}
fn default_deep_model() -> String {
    "claude-opus-4-5-20251101".into()
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            fast: default_fast_model(),
            standard: default_standard_model(),
            deep: default_deep_model(),
        }
    }
}

/// Extended reasoning budget presets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingMode {
    #[default]
    None,
    Quick,
    Normal,
    Deep,
    Ultra,
}

impl ThinkingMode {
    /// Budget in tokens; 0 disables reasoning.
    pub fn budget(&self) -> u32 {
        match self {
            ThinkingMode::None => 0,
            ThinkingMode::Quick => 4_000,
            ThinkingMode::Normal => 16_000,
            ThinkingMode::Deep => 32_000,
            ThinkingMode::Ultra => 60_000,
        }
    }
}

impl std::str::FromStr for ThinkingMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" | "off" | "" => Ok(ThinkingMode::None),
            "quick" => Ok(ThinkingMode::Quick),
            "normal" => Ok(ThinkingMode::Normal),
            "deep" => Ok(ThinkingMode::Deep),
            "ultra" => Ok(ThinkingMode::Ultra),
            other => Err(ConfigError::ValidationError(format!(
                "unknown thinking mode '{other}' (expected none|quick|normal|deep|ultra)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingSettings {
    /// Classify every turn and apply the per-intent routing table
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Output budget for the classification call
    #[serde(default = "default_classifier_max_tokens")]
    pub classifier_max_tokens: u32,
}

fn default_classifier_max_tokens() -> u32 {
    10
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            classifier_max_tokens: default_classifier_max_tokens(),
        }
    }
}

/// How many items each prompt section may carry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextLimits {
    #[serde(default = "default_minimal_events")]
    pub minimal_events: usize,

    #[serde(default = "default_listed_events")]
    pub listed_events: usize,

    #[serde(default = "default_memory_events")]
    pub memory_events: usize,

    #[serde(default = "default_requests")]
    pub requests: usize,

    /// Sensitive-looking parameter names surfaced per request
    #[serde(default = "default_sensitive_params")]
    pub sensitive_params: usize,
}

fn default_minimal_events() -> usize {
    20
}
fn default_listed_events() -> usize {
    50
}
fn default_memory_events() -> usize {
    15
}
fn default_requests() -> usize {
    15
}
fn default_sensitive_params() -> usize {
    5
}

impl Default for ContextLimits {
    fn default() -> Self {
        Self {
            minimal_events: default_minimal_events(),
            listed_events: default_listed_events(),
            memory_events: default_memory_events(),
            requests: default_requests(),
            sensitive_params: default_sensitive_params(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Messages replayed to the backend per turn
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// A conversation holding this many tokens refuses new turns
    #[serde(default = "default_token_ceiling")]
    pub token_ceiling: u64,
}

fn default_history_limit() -> usize {
    20
}
fn default_token_ceiling() -> u64 {
    200_000
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            token_ceiling: default_token_ceiling(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database file; defaults to `~/.blv/blv.db`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
}

impl AppConfig {
    /// Load configuration from the default path (~/.blv/config.toml),
    /// then apply environment overrides.
    ///
    /// - `ANTHROPIC_API_KEY`
    /// - `CLAUDE_MODEL` (standard tier)
    /// - `THINKING_MODE`
    /// - `MAX_TOKENS`, `TEMPERATURE`
    /// - `BLV_DB`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse one file. No environment overrides are applied.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("ANTHROPIC_API_KEY").filter(|k| !k.is_empty()) {
            self.provider.api_key = Some(key);
        }

        if let Some(model) = lookup("CLAUDE_MODEL").filter(|m| !m.is_empty()) {
            self.models.standard = model;
        }

        if let Some(mode) = lookup("THINKING_MODE") {
            self.thinking = mode.parse()?;
        }

        if let Some(raw) = lookup("MAX_TOKENS") {
            self.default_max_tokens = raw.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!("MAX_TOKENS is not a number: {raw}"))
            })?;
        }

        if let Some(raw) = lookup("TEMPERATURE") {
            self.default_temperature = raw.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!("TEMPERATURE is not a number: {raw}"))
            })?;
        }

        if let Some(path) = lookup("BLV_DB").filter(|p| !p.is_empty()) {
            self.storage.database_path = Some(PathBuf::from(path));
        }

        Ok(())
    }

    /// `~/.blv`
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".blv")
    }

    /// Resolved SQLite database path.
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::config_dir().join("blv.db"))
    }

        fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 1.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 1.0".into(),
            ));
        }

        if self.default_max_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "default_max_tokens must be > 0".into(),
            ));
        }

        if self.conversation.history_limit == 0 {
            return Err(ConfigError::ValidationError(
                "conversation.history_limit must be > 0".into(),
            ));
        }

        if self.routing.classifier_max_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "routing.classifier_max_tokens must be > 0".into(),
            ));
        }

        Ok(())
    }

        pub fn has_api_key(&self) -> bool {
        self.provider.api_key.is_some()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            models: ModelsConfig::default(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            thinking: ThinkingMode::default(),
            routing: RoutingSettings::default(),
            context: ContextLimits::default(),
            conversation: ConversationConfig::default(),
            storage: StorageConfig::default(),
            legacy_markers: false,
            reply_language: default_reply_language(),
        }
    }
}

fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for blv_core::Error {
    fn from(err: ConfigError) -> Self {
        blv_core::Error::Config {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.routing.enabled);
        assert!(!config.legacy_markers);
        assert_eq!(config.conversation.token_ceiling, 200_000);
        assert_eq!(config.models.fast, "claude-haiku-4-5-20251001");
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.models.standard, config.models.standard);
        assert_eq!(parsed.context.requests, config.context.requests);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let parsed: AppConfig = toml::from_str(
            r#"
            legacy_markers = true
            thinking = "deep"

            [context]
            memory_events = 5
            "#,
        )
        .unwrap();
        assert!(parsed.legacy_markers);
        assert_eq!(parsed.thinking.budget(), 32_000);
        assert_eq!(parsed.context.memory_events, 5);
        assert_eq!(parsed.context.listed_events, 50);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let config = AppConfig {
            default_temperature: 5.0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.default_max_tokens, 8192);
    }

    #[test]
    fn load_from_file_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "reply_language = \"French\"\n[routing]\nenabled = false\n").unwrap();
        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.reply_language, "French");
        assert!(!config.routing.enabled);
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = AppConfig::default();
        config
            .apply_env(env(&[
                ("ANTHROPIC_API_KEY", "sk-ant-test"),
                ("CLAUDE_MODEL", "claude-custom"),
                ("THINKING_MODE", "quick"),
                ("MAX_TOKENS", "4096"),
                ("TEMPERATURE", "0.3"),
                ("BLV_DB", "/tmp/x.db"),
            ]))
            .unwrap();
        assert!(config.has_api_key());
        assert_eq!(config.models.standard, "claude-custom");
        assert_eq!(config.thinking, ThinkingMode::Quick);
        assert_eq!(config.default_max_tokens, 4096);
        assert!((config.default_temperature - 0.3).abs() < f32::EPSILON);
        assert_eq!(config.database_path(), PathBuf::from("/tmp/x.db"));
    }

    #[test]
    fn bad_env_values_rejected() {
        let mut config = AppConfig::default();
        assert!(config.apply_env(env(&[("THINKING_MODE", "maximum")])).is_err());
        assert!(config.apply_env(env(&[("MAX_TOKENS", "lots")])).is_err());
    }

    #[test]
    fn thinking_budgets() {
        let budgets: Vec<u32> = ["none", "quick", "normal", "deep", "ultra"]
            .iter()
            .map(|m| m.parse::<ThinkingMode>().unwrap().budget())
            .collect();
        assert_eq!(budgets, vec![0, 4_000, 16_000, 32_000, 60_000]);
    }

    #[test]
    fn api_key_redacted_in_debug() {
        let mut config = AppConfig::default();
        config.provider.api_key = Some("sk-ant-secret".into());
        let debug = format!("{config:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("sk-ant-secret"));
    }
}
