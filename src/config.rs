//! TOML configuration.
//!
//! ```toml
//! [db]
//! path = "./data/library.sqlite"
//!
//! [model]
//! url = "https://api.groq.com/openai/v1/chat/completions"
//! model = "llama3-70b-8192"
//! api_key_env = "GROQ_API_KEY"
//!
//! [bridge]
//! reference_date = "2025-07-19"
//!
//! [server]
//! bind = "127.0.0.1:5000"
//! ```
//!
//! Only `[db]` and `[server]` are mandatory; every other table has defaults.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::model::retry::RetryPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub books: BooksConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_model_url")]
    pub url: String,
    #[serde(default = "default_model_name")]
    pub model: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            url: default_model_url(),
            model: default_model_name(),
            api_key_env: default_api_key_env(),
            max_tokens: default_max_tokens(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ModelConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.base_delay_ms))
    }
}

fn default_model_url() -> String {
    "https://api.groq.com/openai/v1/chat/completions".to_string()
}
fn default_model_name() -> String {
    "llama3-70b-8192".to_string()
}
fn default_api_key_env() -> String {
    "GROQ_API_KEY".to_string()
}
fn default_max_tokens() -> u32 {
    500
}
fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct BridgeConfig {
    /// Date the model treats as "today" for relative date filters.
    #[serde(default = "default_reference_date")]
    pub reference_date: String,
    /// Deadline for one admin question, covering both the model call and
    /// the store query. No deadline when unset.
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            reference_date: default_reference_date(),
            request_timeout_secs: None,
        }
    }
}

fn default_reference_date() -> String {
    "2025-07-19".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct BooksConfig {
    #[serde(default = "default_search_url")]
    pub search_url: String,
}

impl Default for BooksConfig {
    fn default() -> Self {
        Self {
            search_url: default_search_url(),
        }
    }
}

fn default_search_url() -> String {
    "https://openlibrary.org/search.json".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

/// Check cross-field rules that serde cannot express.
pub fn validate(config: &Config) -> Result<()> {
    if config.model.max_attempts == 0 {
        anyhow::bail!("model.max_attempts must be >= 1");
    }
    if config.model.max_tokens == 0 {
        anyhow::bail!("model.max_tokens must be > 0");
    }
    if config.model.api_key_env.trim().is_empty() {
        anyhow::bail!("model.api_key_env must not be empty");
    }
    NaiveDate::parse_from_str(&config.bridge.reference_date, "%Y-%m-%d").with_context(|| {
        format!(
            "bridge.reference_date must be YYYY-MM-DD, got '{}'",
            config.bridge.reference_date
        )
    })?;
    if config.bridge.request_timeout_secs == Some(0) {
        anyhow::bail!("bridge.request_timeout_secs must be > 0 when set");
    }
    if config.server.bind.trim().is_empty() {
        anyhow::bail!("server.bind must not be empty");
    }
    Ok(())
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;

    Ok(config)
}
