use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::error::{DigestError, Result};

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub summarize: SummarizeConfig,

    #[serde(default)]
    pub pricing: PricingConfig,
}

/// Store location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database file
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

/// External summarization service (OpenAI-compatible chat completions)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL, e.g. `http://localhost:11434` for Ollama
    #[serde(default = "default_llm_url")]
    pub url: String,

    /// Model identifier sent with each request and recorded on summaries
    #[serde(default = "default_model")]
    pub model: String,

    /// Name of the environment variable holding a bearer token, if any
    pub api_key_env: Option<String>,

    /// Per-call timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_temperature")]
    pub temperature: f64,

    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

/// Shared call budget and retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum external calls dispatched within one window
    #[serde(default = "default_max_calls")]
    pub max_calls: usize,

    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Total attempts per request, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

/// Candidate selection and prompt sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizeConfig {
    /// Threads below this many emails are never summarized
    #[serde(default = "default_min_emails")]
    pub min_emails: u32,

    /// Character budget for the rendered conversation
    #[serde(default = "default_prompt_budget")]
    pub prompt_budget_chars: usize,

    /// Cap applied to each message body before budgeting
    #[serde(default = "default_per_message_chars")]
    pub per_message_chars: usize,

    /// Threads listed in a daily/weekly digest prompt
    #[serde(default = "default_digest_max_threads")]
    pub digest_max_threads: usize,
}

/// USD per million tokens, used for cost estimates only
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    #[serde(default = "default_input_price")]
    pub input_per_million: f64,

    #[serde(default = "default_output_price")]
    pub output_per_million: f64,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("listdigest.db")
}

fn default_llm_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    "mistral:latest".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_temperature() -> f64 {
    0.3
}

fn default_max_output_tokens() -> u32 {
    2048
}

fn default_max_calls() -> usize {
    15
}

fn default_window_secs() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    4
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_min_emails() -> u32 {
    2
}

fn default_prompt_budget() -> usize {
    60_000
}

fn default_per_message_chars() -> usize {
    1_000
}

fn default_digest_max_threads() -> usize {
    20
}

fn default_input_price() -> f64 {
    0.075
}

fn default_output_price() -> f64 {
    0.30
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            url: default_llm_url(),
            model: default_model(),
            api_key_env: None,
            timeout_secs: default_timeout_secs(),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Bearer token read from the configured environment variable.
    pub fn api_key(&self) -> Option<String> {
        self.api_key_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
            .filter(|k| !k.is_empty())
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_calls: default_max_calls(),
            window_secs: default_window_secs(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for SummarizeConfig {
    fn default() -> Self {
        Self {
            min_emails: default_min_emails(),
            prompt_budget_chars: default_prompt_budget(),
            per_message_chars: default_per_message_chars(),
            digest_max_threads: default_digest_max_threads(),
        }
    }
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            input_per_million: default_input_price(),
            output_per_million: default_output_price(),
        }
    }
}

/// Get default config paths
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("listdigest").join("config.toml"));
    }

    if let Some(home_dir) = dirs::home_dir() {
        paths.push(home_dir.join(".listdigest.toml"));
    }

    paths
}

impl AppConfig {
    /// Load and validate configuration from a specific path
    pub fn load(path: &Path) -> Result<Self> {
        info!("Loading configuration from: {:?}", path);

        let content = fs::read_to_string(path)
            .map_err(|e| DigestError::Config(format!("Failed to read config: {}", e)))?;

        let config: AppConfig = toml::from_str(&content)
            .map_err(|e| DigestError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load from the first default path that exists, or fall back to defaults
    pub fn discover() -> Result<Self> {
        for path in default_config_paths() {
            if path.exists() {
                info!("Found config at: {:?}", path);
                return Self::load(&path);
            }
        }

        info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<()> {
        let parsed = url::Url::parse(&self.llm.url)
            .map_err(|e| DigestError::Config(format!("Invalid llm.url {:?}: {}", self.llm.url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(DigestError::Config(format!(
                "llm.url must be http(s), got {}",
                parsed.scheme()
            )));
        }
        if self.llm.model.trim().is_empty() {
            return Err(DigestError::Config("llm.model must not be empty".into()));
        }
        if self.rate_limit.max_calls == 0 || self.rate_limit.window_secs == 0 {
            return Err(DigestError::Config(
                "rate_limit.max_calls and rate_limit.window_secs must be positive".into(),
            ));
        }
        if self.rate_limit.max_attempts == 0 {
            return Err(DigestError::Config("rate_limit.max_attempts must be at least 1".into()));
        }
        if self.summarize.prompt_budget_chars < self.summarize.per_message_chars {
            return Err(DigestError::Config(
                "summarize.prompt_budget_chars must be at least summarize.per_message_chars".into(),
            ));
        }
        Ok(())
    }
}
