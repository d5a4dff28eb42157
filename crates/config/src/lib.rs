//! Configuration loading, validation, and management for tokenrelay.
//!
//! Loads configuration from `~/.tokenrelay/config.toml`, then applies the
//! key/value env file (`.env` in the working directory) and process
//! environment variables on top. Validates all settings at startup.

pub mod envfile;

pub use envfile::EnvFile;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokenrelay_core::Locale;

/// Env key holding the persisted shared session credential.
pub const CACHE_KEY: &str = "CACHE_KEY";
/// Env key holding the global padding filler.
pub const PILE: &str = "PILE";
/// Env key holding the padding size target.
pub const PILE_SIZE: &str = "PILE_SIZE";

/// The root configuration structure.
///
/// Maps directly to `~/.tokenrelay/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Message language: "zh" or "en"
    #[serde(default = "default_locale")]
    pub locale: String,

    /// HTTP listener configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Upstream provider connection
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Shared session credential handling
    #[serde(default)]
    pub session: SessionConfig,

    /// Prompt padding
    #[serde(default)]
    pub padding: PaddingConfig,

    /// Stream transformation tuning
    #[serde(default)]
    pub engine: EngineConfig,

    /// Retry policy
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_locale() -> String {
    "zh".into()
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

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("locale", &self.locale)
            .field("gateway", &self.gateway)
            .field("upstream", &self.upstream)
            .field("session", &self.session)
            .field("padding", &self.padding)
            .field("engine", &self.engine)
            .field("retry", &self.retry)
            .finish()
    }
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("cache_key", &redact(&self.cache_key))
            .field("env_file", &self.env_file)
            .field("persist", &self.persist)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 {
    8080
}
fn default_host() -> String {
    "0.0.0.0".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Provider API base URL (third-party forwarders allowed)
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Mailbox suffix used when registering new sessions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,

    /// Outbound proxy, e.g. "http://127.0.0.1:7890"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,

    /// Whole-request timeout for a single submission
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://claude.ai/api".into()
}
fn default_timeout_secs() -> u64 {
    180
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            suffix: None,
            proxy: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Last known-good shared credential
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_key: Option<String>,

    /// Where the shared credential is persisted
    #[serde(default = "default_env_file")]
    pub env_file: PathBuf,

    /// Write newly acquired credentials to `env_file`
    #[serde(default = "default_true")]
    pub persist: bool,
}

fn default_env_file() -> PathBuf {
    PathBuf::from(".env")
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cache_key: None,
            env_file: default_env_file(),
            persist: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaddingConfig {
    /// Fixed filler phrase; a random built-in phrase is used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filler: Option<String>,

    /// Minimum outbound prompt length (bytes) that padding brings prompts up to
    #[serde(default = "default_min_size")]
    pub min_size: usize,
}

fn default_min_size() -> usize {
    50_000
}

impl Default for PaddingConfig {
    fn default() -> Self {
        Self {
            filler: None,
            min_size: default_min_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Unlabelled output longer than this is treated as the real reply
    #[serde(default = "default_begin_threshold")]
    pub begin_threshold: usize,
}

fn default_begin_threshold() -> usize {
    200
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            begin_threshold: default_begin_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Extra attempts after the first one
    #[serde(default = "default_retry_budget")]
    pub budget: u32,
}

fn default_retry_budget() -> u32 {
    2
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            budget: default_retry_budget(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.tokenrelay/config.toml).
    ///
    /// Overrides, lowest to highest priority:
    /// - the env file named by `session.env_file` (`CACHE_KEY`, `PILE`, `PILE_SIZE`)
    /// - process environment: the same keys plus `TOKENRELAY_PROXY`,
    ///   `TOKENRELAY_BASE_URL`, `TOKENRELAY_SUFFIX`, `TOKENRELAY_LOCALE`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        let env_file = EnvFile::new(&config.session.env_file);
        let mut vars = env_file.read().map_err(|e| ConfigError::ReadError {
            path: env_file.path().to_path_buf(),
            reason: e.to_string(),
        })?;
        for key in [
            CACHE_KEY,
            PILE,
            PILE_SIZE,
            "TOKENRELAY_PROXY",
            "TOKENRELAY_BASE_URL",
            "TOKENRELAY_SUFFIX",
            "TOKENRELAY_LOCALE",
        ] {
            if let Ok(value) = std::env::var(key) {
                vars.insert(key.to_string(), value);
            }
        }

        config.apply_overrides(&vars)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
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

    /// Apply env-style overrides. Empty values are ignored.
    pub fn apply_overrides(&mut self, vars: &HashMap<String, String>) -> Result<(), ConfigError> {
        let get = |key: &str| vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());

        if let Some(key) = get(CACHE_KEY) {
            self.session.cache_key = Some(key.to_string());
        }
        if let Some(pile) = get(PILE) {
            self.padding.filler = Some(pile.to_string());
        }
        if let Some(size) = get(PILE_SIZE) {
            self.padding.min_size = size.parse().map_err(|_| {
                ConfigError::ValidationError(format!("{PILE_SIZE} must be a non-negative integer, got '{size}'"))
            })?;
        }
        if let Some(proxy) = get("TOKENRELAY_PROXY") {
            self.upstream.proxy = Some(proxy.to_string());
        }
        if let Some(base_url) = get("TOKENRELAY_BASE_URL") {
            self.upstream.base_url = base_url.to_string();
        }
        if let Some(suffix) = get("TOKENRELAY_SUFFIX") {
            self.upstream.suffix = Some(suffix.to_string());
        }
        if let Some(locale) = get("TOKENRELAY_LOCALE") {
            self.locale = locale.to_string();
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".tokenrelay")
    }

    /// The parsed message locale.
    pub fn locale(&self) -> Locale {
        self.locale.parse().unwrap_or_default()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.locale
            .parse::<Locale>()
            .map_err(ConfigError::ValidationError)?;

        if self.engine.begin_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "engine.begin_threshold must be > 0".into(),
            ));
        }

        if self.upstream.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "upstream.timeout_secs must be > 0".into(),
            ));
        }

        if matches!(self.padding.filler.as_deref(), Some("")) {
            return Err(ConfigError::ValidationError(
                "padding.filler must not be empty when set".into(),
            ));
        }

        Ok(())
    }

    /// Render the configuration as TOML (for the `config` command).
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            locale: default_locale(),
            gateway: GatewayConfig::default(),
            upstream: UpstreamConfig::default(),
            session: SessionConfig::default(),
            padding: PaddingConfig::default(),
            engine: EngineConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

/// Get the user's home directory.
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.gateway.port, 8080);
        assert_eq!(config.padding.min_size, 50_000);
        assert_eq!(config.engine.begin_threshold, 200);
        assert_eq!(config.retry.budget, 2);
        assert_eq!(config.locale(), Locale::Zh);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let parsed: AppConfig = toml::from_str(&config.to_toml()).unwrap();
        assert_eq!(parsed.gateway.port, config.gateway.port);
        assert_eq!(parsed.upstream.base_url, config.upstream.base_url);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
locale = "en"

[padding]
filler = "like tree, like fruit."

[retry]
budget = 5
"#,
        )
        .unwrap();
        assert_eq!(config.locale(), Locale::En);
        assert_eq!(config.padding.filler.as_deref(), Some("like tree, like fruit."));
        assert_eq!(config.padding.min_size, 50_000);
        assert_eq!(config.retry.budget, 5);
        assert_eq!(config.gateway.port, 8080);
    }

    #[test]
    fn overrides_apply_env_keys() {
        let mut config = AppConfig::default();
        let vars: HashMap<String, String> = [
            (CACHE_KEY, "sk-cached"),
            (PILE, "East, west, home is best."),
            (PILE_SIZE, "1200"),
            ("TOKENRELAY_PROXY", "http://127.0.0.1:7890"),
            ("TOKENRELAY_LOCALE", "en"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        config.apply_overrides(&vars).unwrap();
        assert_eq!(config.session.cache_key.as_deref(), Some("sk-cached"));
        assert_eq!(config.padding.filler.as_deref(), Some("East, west, home is best."));
        assert_eq!(config.padding.min_size, 1200);
        assert_eq!(config.upstream.proxy.as_deref(), Some("http://127.0.0.1:7890"));
        assert_eq!(config.locale(), Locale::En);
    }

    #[test]
    fn empty_override_is_ignored() {
        let mut config = AppConfig::default();
        let vars: HashMap<String, String> = [(CACHE_KEY.to_string(), "  ".to_string())].into();
        config.apply_overrides(&vars).unwrap();
        assert!(config.session.cache_key.is_none());
    }

    #[test]
    fn invalid_pile_size_rejected() {
        let mut config = AppConfig::default();
        let vars: HashMap<String, String> = [(PILE_SIZE.to_string(), "lots".to_string())].into();
        assert!(matches!(
            config.apply_overrides(&vars),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn invalid_values_rejected() {
        let config = AppConfig {
            locale: "fr".into(),
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.engine.begin_threshold = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.padding.filler = Some(String::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.gateway.port, 8080);
    }

    #[test]
    fn config_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[gateway]\nport = 9000\n").unwrap();
        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.gateway.port, 9000);

        std::fs::write(&path, "[gateway\nport = ").unwrap();
        assert!(matches!(
            AppConfig::load_from(&path),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn debug_redacts_cache_key() {
        let mut config = AppConfig::default();
        config.session.cache_key = Some("sk-secret".into());
        let dbg = format!("{config:?}");
        assert!(!dbg.contains("sk-secret"));
        assert!(dbg.contains("[REDACTED]"));
    }
}
