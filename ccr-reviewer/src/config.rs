//! Configuration for ccr-reviewer
//!
//! Extends the shared bootstrap TOML with the `[llm]`, `[fetch]` and
//! `[standards]` sections. CLI overrides are applied by `main.rs`.

use ccr_common::config::TomlConfig;
use ccr_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Environment variable holding the Anthropic API key
pub const API_KEY_ENV_VAR: &str = "ANTHROPIC_API_KEY";

/// Full ccr-reviewer configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewerConfig {
    /// Shared bootstrap settings (port, database, logging, ...)
    #[serde(flatten)]
    pub base: TomlConfig,

    #[serde(default)]
    pub llm: LlmSettings,

    #[serde(default)]
    pub fetch: FetchSettings,

    #[serde(default)]
    pub standards: StandardsSettings,
}

/// `[llm]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    #[serde(default = "default_api_base")]
    pub api_base: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default)]
    pub temperature: f32,

    /// Per-request timeout; exceeding it is reported as unavailability
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,

    /// Extra asks when the model output fails schema validation
    #[serde(default = "default_malformed_retries")]
    pub malformed_retries: u32,

    /// Total attempts per unit of work when the model is unreachable
    #[serde(default = "default_unavailable_attempts")]
    pub unavailable_attempts: u32,

    /// Fallback when `ANTHROPIC_API_KEY` is not set
    #[serde(default)]
    pub api_key: Option<String>,
}

/// `[fetch]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchSettings {
    #[serde(default = "default_git_binary")]
    pub git_binary: PathBuf,

    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,

    /// Clone with `--depth 1`
    #[serde(default = "default_true")]
    pub shallow: bool,

    /// Files larger than this are left out of the flattened codebase
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

/// `[standards]` section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StandardsSettings {
    /// When non-empty, only ingest files whose stem matches one of these
    #[serde(default)]
    pub only_files: Vec<String>,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: 0.0,
            timeout_secs: default_llm_timeout_secs(),
            malformed_retries: default_malformed_retries(),
            unavailable_attempts: default_unavailable_attempts(),
            api_key: None,
        }
    }
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            git_binary: default_git_binary(),
            timeout_secs: default_fetch_timeout_secs(),
            shallow: true,
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

fn default_api_base() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_model() -> String {
    "claude-3-5-sonnet-20241022".to_string()
}

fn default_max_tokens() -> u32 {
    8192
}

fn default_llm_timeout_secs() -> u64 {
    300
}

fn default_malformed_retries() -> u32 {
    1
}

fn default_unavailable_attempts() -> u32 {
    2
}

fn default_git_binary() -> PathBuf {
    PathBuf::from("git")
}

fn default_fetch_timeout_secs() -> u64 {
    120
}

fn default_max_file_bytes() -> u64 {
    crate::services::content_flattener::DEFAULT_MAX_FILE_BYTES
}

fn default_true() -> bool {
    true
}

impl LlmSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Resolve the API key: environment first, then TOML
    pub fn resolve_api_key(&self) -> Result<String> {
        let from_env = std::env::var(API_KEY_ENV_VAR)
            .ok()
            .filter(|key| !key.trim().is_empty());
        let from_toml = self.api_key.clone().filter(|key| !key.trim().is_empty());

        match (from_env, from_toml) {
            (Some(env_key), Some(_)) => {
                warn!(
                    "API key found in both {} and config file; using environment",
                    API_KEY_ENV_VAR
                );
                Ok(env_key)
            }
            (Some(env_key), None) => Ok(env_key),
            (None, Some(toml_key)) => Ok(toml_key),
            (None, None) => Err(Error::Config(format!(
                "No LLM API key: set {} or llm.api_key in the config file",
                API_KEY_ENV_VAR
            ))),
        }
    }
}

impl FetchSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config: ReviewerConfig = toml::from_str("").unwrap();
        assert_eq!(config.base.port, TomlConfig::default().port);
        assert_eq!(config.llm.max_tokens, 8192);
        assert_eq!(config.llm.malformed_retries, 1);
        assert_eq!(config.llm.unavailable_attempts, 2);
        assert!(config.fetch.shallow);
        assert_eq!(config.fetch.max_file_bytes, 1024 * 1024);
        assert!(config.standards.only_files.is_empty());
    }

    #[test]
    fn test_sections_parse_alongside_base() {
        let config: ReviewerConfig = toml::from_str(
            r#"
port = 7000

[logging]
level = "debug"

[llm]
model = "claude-test"
timeout_secs = 5

[fetch]
shallow = false
max_file_bytes = 4096

[standards]
only_files = ["python", "security"]
"#,
        )
        .unwrap();

        assert_eq!(config.base.port, 7000);
        assert_eq!(config.base.logging.level, "debug");
        assert_eq!(config.llm.model, "claude-test");
        assert_eq!(config.llm.timeout(), Duration::from_secs(5));
        assert!(!config.fetch.shallow);
        assert_eq!(config.fetch.max_file_bytes, 4096);
        assert_eq!(config.standards.only_files, vec!["python", "security"]);
    }

    #[test]
    #[serial_test::serial]
    fn test_api_key_prefers_environment() {
        let settings = LlmSettings {
            api_key: Some("from-file".to_string()),
            ..LlmSettings::default()
        };

        std::env::set_var(API_KEY_ENV_VAR, "from-env");
        assert_eq!(settings.resolve_api_key().unwrap(), "from-env");

        std::env::set_var(API_KEY_ENV_VAR, "  ");
        assert_eq!(settings.resolve_api_key().unwrap(), "from-file");

        std::env::remove_var(API_KEY_ENV_VAR);
        assert_eq!(settings.resolve_api_key().unwrap(), "from-file");
    }

    #[test]
    #[serial_test::serial]
    fn test_missing_api_key_is_config_error() {
        std::env::remove_var(API_KEY_ENV_VAR);
        let err = LlmSettings::default().resolve_api_key().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
