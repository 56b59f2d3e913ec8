use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::analysis::chunker::DEFAULT_MAX_TOKEN_CHUNK;
use crate::error::{AppError, Result};
use crate::services::DEFAULT_CVE_API_URL;

const CONFIG_ENV_VAR: &str = "THREAT_DIGEST_CONFIG";

pub const DEFAULT_CATEGORIES: [&str; 9] = [
    "Science & Environment",
    "Business, Finance & Trade",
    "Artificial Intelligence & Machine Learning",
    "Software Development & Open Source",
    "Cybersecurity & Data Privacy",
    "Politics & Government",
    "Consumer Technology & Gadgets",
    "Automotive, Space & Transportation",
    "Enterprise Technology & Cloud Computing",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    OpenAi,
    Anthropic,
}

impl Provider {
    pub fn env_var(&self) -> &'static str {
        match self {
            Provider::OpenAi => "OPENAI_API_KEY",
            Provider::Anthropic => "ANTHROPIC_API_KEY",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
        }
    }

    fn default_model(&self) -> &'static str {
        match self {
            Provider::OpenAi => "o3-mini",
            Provider::Anthropic => "claude-3-5-haiku-20241022",
        }
    }

    fn default_api_url(&self) -> &'static str {
        match self {
            Provider::OpenAi => "https://api.openai.com/v1/chat/completions",
            Provider::Anthropic => "https://api.anthropic.com/v1/messages",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSource {
    /// Source tag stored on every article, also the duplicate-check scope.
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default)]
    pub provider: Provider,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub api_url: Option<String>,

    #[serde(default = "default_max_token_chunk")]
    pub max_token_chunk: usize,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,

    #[serde(default = "default_categories")]
    pub categories: Vec<String>,
    #[serde(default = "default_catch_all")]
    pub catch_all: String,
    #[serde(default = "default_subgroup_concurrency")]
    pub subgroup_concurrency: usize,

    #[serde(default = "default_run_interval")]
    pub run_interval_minutes: u64,

    #[serde(default)]
    pub feeds: Vec<FeedSource>,

    #[serde(default = "default_cve_api_url")]
    pub cve_api_url: String,
}

fn default_db_path() -> String {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("threat-digest");
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("news.db").to_string_lossy().to_string()
}

fn default_max_token_chunk() -> usize {
    DEFAULT_MAX_TOKEN_CHUNK
}

fn default_request_timeout() -> u64 {
    240
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    2
}

fn default_categories() -> Vec<String> {
    DEFAULT_CATEGORIES.iter().map(|c| c.to_string()).collect()
}

fn default_catch_all() -> String {
    "Other".to_string()
}

fn default_subgroup_concurrency() -> usize {
    3
}

fn default_run_interval() -> u64 {
    15
}

fn default_cve_api_url() -> String {
    DEFAULT_CVE_API_URL.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            provider: Provider::default(),
            api_key: None,
            model: None,
            api_url: None,
            max_token_chunk: default_max_token_chunk(),
            request_timeout_secs: default_request_timeout(),
            max_attempts: default_max_attempts(),
            retry_delay_secs: default_retry_delay(),
            categories: default_categories(),
            catch_all: default_catch_all(),
            subgroup_concurrency: default_subgroup_concurrency(),
            run_interval_minutes: default_run_interval(),
            feeds: Vec::new(),
            cve_api_url: default_cve_api_url(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Self::from_toml_str(&content)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            return PathBuf::from(path);
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("threat-digest")
            .join("config.toml")
    }

    fn validate(&self) -> Result<()> {
        if self.max_token_chunk == 0 {
            return Err(AppError::Config("max_token_chunk must be positive".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(AppError::Config("max_attempts must be at least 1".to_string()));
        }
        if self.catch_all.trim().is_empty() {
            return Err(AppError::Config("catch_all must not be empty".to_string()));
        }
        Ok(())
    }

    /// Config value first, then the provider's environment variable.
    pub fn resolve_api_key(&self) -> Result<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| {
                std::env::var(self.provider.env_var())
                    .ok()
                    .filter(|k| !k.trim().is_empty())
            })
            .ok_or(AppError::MissingApiKey {
                provider: self.provider.name(),
                env_var: self.provider.env_var(),
            })
    }

    pub fn model(&self) -> String {
        self.model
            .clone()
            .unwrap_or_else(|| self.provider.default_model().to_string())
    }

    pub fn api_url(&self) -> String {
        self.api_url
            .clone()
            .unwrap_or_else(|| self.provider.default_api_url().to_string())
    }
}
