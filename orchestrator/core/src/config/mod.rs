//! TOML Configuration File Support
//!
//! Centralized settings loading for the orchestrator, from a TOML file at
//! `~/.config/chat-orchestrator/orchestrator.toml`.
//!
//! # Configuration Priority
//!
//! Values are resolved with the following priority (highest first):
//! 1. Host overrides ([`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # XDG Base Directory Compliance
//!
//! - `$XDG_CONFIG_HOME/chat-orchestrator/orchestrator.toml` (typically
//!   `~/.config/chat-orchestrator/orchestrator.toml`)
//!
//! # Example Configuration
//!
//! ```toml
//! [orchestrator]
//! system_prompt = "You are a helpful assistant."
//! user_name = "You"
//! assistant_name = "Assistant"
//! stream_timeout_secs = 600
//!
//! [intake]
//! max_attachments = 10
//! max_attachment_bytes = 10485760
//!
//! [provider]
//! host = "localhost"
//! port = 11434
//! model = "llama3.2"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::intake::IntakeLimits;

/// Default author label for user messages
pub const DEFAULT_USER_NAME: &str = "You";

/// Default author label for assistant messages
pub const DEFAULT_ASSISTANT_NAME: &str = "Assistant";

/// Default whole-turn streaming deadline
pub const DEFAULT_STREAM_TIMEOUT: Duration = Duration::from_secs(600);

// =============================================================================
// Error Types
// =============================================================================

/// Errors loading settings or wiring an orchestrator
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value in a file or environment variable
    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    /// The file receiver already has an upload handler installed
    #[error("File receiver already has an upload handler")]
    UploadHandlerAlreadySet,

    /// The intake is already wired to a file receiver
    #[error("File intake is already attached to a receiver")]
    ReceiverAlreadyAttached,

    /// No tokio runtime was supplied or running when building
    #[error("No tokio runtime available to run streaming turns")]
    NoRuntime,

    /// A builder value is out of range
    #[error("Invalid orchestrator setting: {0}")]
    Invalid(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from a host override
    Override,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Override => write!(f, "override"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// `[orchestrator]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSectionToml {
    /// System prompt sent with every turn (blank = none)
    pub system_prompt: Option<String>,

    /// Author label for user messages
    pub user_name: Option<String>,

    /// Author label for assistant messages
    pub assistant_name: Option<String>,

    /// Whole-turn streaming deadline in seconds
    pub stream_timeout_secs: Option<u64>,
}

/// `[intake]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeToml {
    /// Maximum number of pending attachments (0 = unlimited)
    pub max_attachments: Option<usize>,

    /// Maximum size of a single attachment in bytes (0 = unlimited)
    pub max_attachment_bytes: Option<usize>,
}

/// `[provider]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderToml {
    /// Ollama host
    pub host: Option<String>,

    /// Ollama port
    pub port: Option<u16>,

    /// Model name
    pub model: Option<String>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorToml {
    /// Orchestrator section
    pub orchestrator: OrchestratorSectionToml,

    /// Intake limits section
    pub intake: IntakeToml,

    /// Provider section
    pub provider: ProviderToml,
}

// =============================================================================
// Resolved Settings
// =============================================================================

/// Where to reach the streaming provider
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderSettings {
    /// Host name or address
    pub host: String,
    /// TCP port
    pub port: u16,
    /// Model name
    pub model: String,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 11434,
            model: "llama3.2".to_string(),
        }
    }
}

impl ProviderSettings {
    /// Base URL for HTTP requests
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Resolved orchestrator settings
///
/// Use [`load_config`] to load with proper priority handling, then hand the
/// result to [`OrchestratorBuilder::settings`](crate::OrchestratorBuilder::settings).
#[derive(Clone, Debug)]
pub struct OrchestratorSettings {
    /// Configured system prompt (resolved per turn)
    pub system_prompt: Option<String>,

    /// Author label for user messages
    pub user_name: String,

    /// Author label for assistant messages
    pub assistant_name: String,

    /// Whole-turn streaming deadline
    pub stream_timeout: Duration,

    /// Pending attachment limits
    pub intake: IntakeLimits,

    /// Provider location and model
    pub provider: ProviderSettings,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    source: ConfigSource,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            system_prompt: None,
            user_name: DEFAULT_USER_NAME.to_string(),
            assistant_name: DEFAULT_ASSISTANT_NAME.to_string(),
            stream_timeout: DEFAULT_STREAM_TIMEOUT,
            intake: IntakeLimits::unlimited(),
            provider: ProviderSettings::default(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl OrchestratorSettings {
    /// Create settings with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the highest-priority source that contributed a value
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Check resolved values
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] for a zero stream timeout or a
    /// blank author label.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stream_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "stream_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.user_name.trim().is_empty() {
            return Err(ConfigError::ValidationError("user_name must not be blank".to_string()));
        }
        if self.assistant_name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "assistant_name must not be blank".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/chat-orchestrator/orchestrator.toml` or
/// `~/.config/chat-orchestrator/orchestrator.toml` if `XDG_CONFIG_HOME` is not
/// set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("chat-orchestrator").join("orchestrator.toml"))
}

/// Load settings from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if the
/// resolved values are invalid. A missing file is not an error.
pub fn load_config() -> Result<OrchestratorSettings, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load settings from a specific path
///
/// With `None`, only defaults and environment variables are used.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or if the resolved
/// values are invalid.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<OrchestratorSettings, ConfigError> {
    let mut settings = OrchestratorSettings::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content = std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                path: config_path.clone(),
                source: e,
            })?;

            let toml_config: OrchestratorToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut settings, &toml_config);
            settings.config_file_path = Some(config_path.clone());
            settings.source = ConfigSource::File;

            tracing::info!(path = %config_path.display(), "Loaded configuration from file");
        } else {
            tracing::debug!(path = %config_path.display(), "Config file not found, using defaults");
        }
    }

    apply_env_config(&mut settings)?;
    settings.validate()?;

    Ok(settings)
}

fn apply_toml_config(settings: &mut OrchestratorSettings, toml: &OrchestratorToml) {
    if toml.orchestrator.system_prompt.is_some() {
        settings.system_prompt = toml.orchestrator.system_prompt.clone();
    }
    if let Some(ref name) = toml.orchestrator.user_name {
        settings.user_name = name.clone();
    }
    if let Some(ref name) = toml.orchestrator.assistant_name {
        settings.assistant_name = name.clone();
    }
    if let Some(secs) = toml.orchestrator.stream_timeout_secs {
        settings.stream_timeout = Duration::from_secs(secs);
    }

    if let Some(max) = toml.intake.max_attachments {
        settings.intake.max_attachments = max;
    }
    if let Some(bytes) = toml.intake.max_attachment_bytes {
        settings.intake.max_attachment_bytes = bytes;
    }

    if let Some(ref host) = toml.provider.host {
        settings.provider.host = host.clone();
    }
    if let Some(port) = toml.provider.port {
        settings.provider.port = port;
    }
    if let Some(ref model) = toml.provider.model {
        settings.provider.model = model.clone();
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::ValidationError(format!("{key} has an invalid value: {raw:?}"))),
        Err(_) => Ok(None),
    }
}

fn apply_env_config(settings: &mut OrchestratorSettings) -> Result<(), ConfigError> {
    if let Ok(prompt) = std::env::var("ORCHESTRATOR_SYSTEM_PROMPT") {
        settings.system_prompt = Some(prompt);
        settings.source = ConfigSource::Env;
    }
    if let Ok(name) = std::env::var("ORCHESTRATOR_USER_NAME") {
        settings.user_name = name;
        settings.source = ConfigSource::Env;
    }
    if let Ok(name) = std::env::var("ORCHESTRATOR_ASSISTANT_NAME") {
        settings.assistant_name = name;
        settings.source = ConfigSource::Env;
    }
    if let Some(secs) = parse_env::<u64>("ORCHESTRATOR_STREAM_TIMEOUT_SECS")? {
        settings.stream_timeout = Duration::from_secs(secs);
        settings.source = ConfigSource::Env;
    }

    if let Some(max) = parse_env::<usize>("ORCHESTRATOR_MAX_ATTACHMENTS")? {
        settings.intake.max_attachments = max;
        settings.source = ConfigSource::Env;
    }
    if let Some(bytes) = parse_env::<usize>("ORCHESTRATOR_MAX_ATTACHMENT_BYTES")? {
        settings.intake.max_attachment_bytes = bytes;
        settings.source = ConfigSource::Env;
    }

    if let Ok(host) = std::env::var("OLLAMA_HOST") {
        settings.provider.host = host;
        settings.source = ConfigSource::Env;
    }
    if let Some(port) = parse_env::<u16>("OLLAMA_PORT")? {
        settings.provider.port = port;
        settings.source = ConfigSource::Env;
    }
    if let Ok(model) = std::env::var("ORCHESTRATOR_MODEL") {
        settings.provider.model = model;
        settings.source = ConfigSource::Env;
    }

    Ok(())
}

// =============================================================================
// Host Override Support
// =============================================================================

/// Builder for applying host overrides to loaded settings
///
/// Use this after [`load_config`] to apply values a host decides itself
/// (command-line flags, UI preferences).
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// System prompt override
    pub system_prompt: Option<String>,
    /// Stream timeout override (seconds)
    pub stream_timeout_secs: Option<u64>,
    /// Maximum pending attachments override
    pub max_attachments: Option<usize>,
    /// Model override
    pub model: Option<String>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set system prompt override
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Set stream timeout override
    #[must_use]
    pub fn with_stream_timeout_secs(mut self, secs: u64) -> Self {
        self.stream_timeout_secs = Some(secs);
        self
    }

    /// Set maximum pending attachments override
    #[must_use]
    pub fn with_max_attachments(mut self, max: usize) -> Self {
        self.max_attachments = Some(max);
        self
    }

    /// Set model override
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Apply overrides to settings
    pub fn apply(&self, settings: &mut OrchestratorSettings) {
        if self.system_prompt.is_some()
            || self.stream_timeout_secs.is_some()
            || self.max_attachments.is_some()
            || self.model.is_some()
        {
            settings.source = ConfigSource::Override;
        }

        if let Some(ref prompt) = self.system_prompt {
            settings.system_prompt = Some(prompt.clone());
        }
        if let Some(secs) = self.stream_timeout_secs {
            settings.stream_timeout = Duration::from_secs(secs);
        }
        if let Some(max) = self.max_attachments {
            settings.intake.max_attachments = max;
        }
        if let Some(ref model) = self.model {
            settings.provider.model = model.clone();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::{Mutex, MutexGuard};
    use std::io::Write;
    use tempfile::NamedTempFile;

    const ENV_VARS: &[&str] = &[
        "ORCHESTRATOR_SYSTEM_PROMPT",
        "ORCHESTRATOR_USER_NAME",
        "ORCHESTRATOR_ASSISTANT_NAME",
        "ORCHESTRATOR_STREAM_TIMEOUT_SECS",
        "ORCHESTRATOR_MAX_ATTACHMENTS",
        "ORCHESTRATOR_MAX_ATTACHMENT_BYTES",
        "OLLAMA_HOST",
        "OLLAMA_PORT",
        "ORCHESTRATOR_MODEL",
    ];

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    /// Serialize env-touching tests and start from a clean environment
    fn clean_env() -> MutexGuard<'static, ()> {
        let guard = ENV_LOCK.lock();
        for var in ENV_VARS {
            std::env::remove_var(var);
        }
        guard
    }

    fn write_toml(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    // =========================================================================
    // Default Configuration Tests
    // =========================================================================

    #[test]
    fn test_default_settings() {
        let settings = OrchestratorSettings::default();
        assert_eq!(settings.system_prompt, None);
        assert_eq!(settings.user_name, "You");
        assert_eq!(settings.assistant_name, "Assistant");
        assert_eq!(settings.stream_timeout, Duration::from_secs(600));
        assert_eq!(settings.intake, IntakeLimits::unlimited());
        assert_eq!(settings.provider.base_url(), "http://localhost:11434");
        assert_eq!(settings.source(), ConfigSource::Default);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_default_config_path() {
        if let Some(p) = default_config_path() {
            assert!(p.to_string_lossy().contains("chat-orchestrator"));
            assert!(p.to_string_lossy().ends_with("orchestrator.toml"));
        }
    }

    // =========================================================================
    // TOML Parsing Tests
    // =========================================================================

    #[test]
    fn test_parse_valid_toml() {
        let _env = clean_env();
        let file = write_toml(
            r#"
[orchestrator]
system_prompt = "Be brief."
user_name = "Me"
assistant_name = "Bot"
stream_timeout_secs = 30

[intake]
max_attachments = 4
max_attachment_bytes = 1024

[provider]
host = "ollama.local"
port = 8080
model = "mistral"
"#,
        );

        let settings = load_config_from_path(Some(file.path().to_path_buf())).unwrap();

        assert_eq!(settings.system_prompt.as_deref(), Some("Be brief."));
        assert_eq!(settings.user_name, "Me");
        assert_eq!(settings.assistant_name, "Bot");
        assert_eq!(settings.stream_timeout, Duration::from_secs(30));
        assert_eq!(settings.intake.max_attachments, 4);
        assert_eq!(settings.intake.max_attachment_bytes, 1024);
        assert_eq!(settings.provider.base_url(), "http://ollama.local:8080");
        assert_eq!(settings.provider.model, "mistral");
        assert_eq!(settings.source(), ConfigSource::File);
        assert_eq!(settings.config_file_path.as_deref(), Some(file.path()));
    }

    #[test]
    fn test_parse_partial_toml() {
        let _env = clean_env();
        let file = write_toml(
            r#"
[provider]
model = "partial-model"
"#,
        );

        let settings = load_config_from_path(Some(file.path().to_path_buf())).unwrap();

        assert_eq!(settings.provider.model, "partial-model");
        assert_eq!(settings.provider.port, 11434);
        assert_eq!(settings.user_name, "You");
        assert_eq!(settings.stream_timeout, DEFAULT_STREAM_TIMEOUT);
    }

    #[test]
    fn test_parse_empty_toml() {
        let _env = clean_env();
        let file = write_toml("");

        let settings = load_config_from_path(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(settings.user_name, "You");
        assert_eq!(settings.source(), ConfigSource::File);
    }

    #[test]
    fn test_zero_timeout_in_file_rejected() {
        let _env = clean_env();
        let file = write_toml(
            r#"
[orchestrator]
stream_timeout_secs = 0
"#,
        );

        let result = load_config_from_path(Some(file.path().to_path_buf()));
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    // =========================================================================
    // Missing / Malformed File Tests
    // =========================================================================

    #[test]
    fn test_missing_file_graceful() {
        let _env = clean_env();
        let path = PathBuf::from("/nonexistent/path/orchestrator.toml");

        let settings = load_config_from_path(Some(path)).unwrap();
        assert_eq!(settings.source(), ConfigSource::Default);
        assert!(settings.config_file_path.is_none());
    }

    #[test]
    fn test_no_path_uses_defaults() {
        let _env = clean_env();
        let settings = load_config_from_path(None).unwrap();
        assert_eq!(settings.source(), ConfigSource::Default);
    }

    #[test]
    fn test_malformed_toml_error() {
        let _env = clean_env();
        let file = write_toml(
            r#"
[orchestrator
stream_timeout_secs = "not a number"
"#,
        );

        let result = load_config_from_path(Some(file.path().to_path_buf()));
        assert!(matches!(result.unwrap_err(), ConfigError::ParseError(_)));
    }

    // =========================================================================
    // Priority Ordering Tests
    // =========================================================================

    #[test]
    fn test_env_overrides_file() {
        let _env = clean_env();
        let file = write_toml(
            r#"
[orchestrator]
system_prompt = "from file"

[provider]
model = "file-model"
"#,
        );

        std::env::set_var("ORCHESTRATOR_MODEL", "env-model");
        std::env::set_var("ORCHESTRATOR_STREAM_TIMEOUT_SECS", "45");
        let settings = load_config_from_path(Some(file.path().to_path_buf())).unwrap();
        std::env::remove_var("ORCHESTRATOR_MODEL");
        std::env::remove_var("ORCHESTRATOR_STREAM_TIMEOUT_SECS");

        assert_eq!(settings.provider.model, "env-model");
        assert_eq!(settings.stream_timeout, Duration::from_secs(45));
        assert_eq!(settings.system_prompt.as_deref(), Some("from file"));
        assert_eq!(settings.source(), ConfigSource::Env);
    }

    #[test]
    fn test_invalid_env_value_rejected() {
        let _env = clean_env();
        std::env::set_var("OLLAMA_PORT", "not-a-port");
        let result = load_config_from_path(None);
        std::env::remove_var("OLLAMA_PORT");

        match result {
            Err(ConfigError::ValidationError(msg)) => assert!(msg.contains("OLLAMA_PORT")),
            other => panic!("expected ValidationError, got {other:?}"),
        }
    }

    #[test]
    fn test_overrides_beat_env() {
        let mut settings = OrchestratorSettings::default();
        settings.provider.model = "env-model".to_string();
        settings.set_source(ConfigSource::Env);

        ConfigOverrides::new().with_model("host-model").apply(&mut settings);

        assert_eq!(settings.provider.model, "host-model");
        assert_eq!(settings.source(), ConfigSource::Override);
    }

    // =========================================================================
    // ConfigOverrides Tests
    // =========================================================================

    #[test]
    fn test_config_overrides_apply() {
        let mut settings = OrchestratorSettings::default();
        ConfigOverrides::new()
            .with_system_prompt("Be terse.")
            .with_stream_timeout_secs(5)
            .with_max_attachments(2)
            .apply(&mut settings);

        assert_eq!(settings.system_prompt.as_deref(), Some("Be terse."));
        assert_eq!(settings.stream_timeout, Duration::from_secs(5));
        assert_eq!(settings.intake.max_attachments, 2);
    }

    #[test]
    fn test_config_overrides_empty_no_change() {
        let mut settings = OrchestratorSettings::default();
        ConfigOverrides::new().apply(&mut settings);
        assert_eq!(settings.source(), ConfigSource::Default);
    }

    #[test]
    fn test_validate_blank_names() {
        let mut settings = OrchestratorSettings::default();
        settings.assistant_name = "  ".to_string();
        assert!(matches!(settings.validate(), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_config_source_display() {
        assert_eq!(ConfigSource::Override.to_string(), "override");
        assert_eq!(ConfigSource::Env.to_string(), "environment");
        assert_eq!(ConfigSource::File.to_string(), "config file");
        assert_eq!(ConfigSource::Default.to_string(), "default");
    }
}
