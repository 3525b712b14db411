use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding the default model
pub const MODEL_ENV: &str = "TOKPROBE_MODEL";

/// Environment variable overriding the oracle region
pub const REGION_ENV: &str = "TOKPROBE_REGION";

/// Simple configuration for tokprobe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    #[serde(default = "default_call_budget")]
    pub call_budget: usize,

    #[serde(default)]
    pub oracle: OracleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    /// Base URL of the count-tokens service; may contain `{region}`
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Name of the environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default)]
    pub region: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: default_model(),
            cache_capacity: default_cache_capacity(),
            call_budget: default_call_budget(),
            oracle: OracleConfig::default(),
        }
    }
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key_env: default_api_key_env(),
            region: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_cache_capacity() -> usize {
    1_000
}

fn default_call_budget() -> usize {
    20
}

fn default_endpoint() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_api_key_env() -> String {
    "TOKPROBE_API_KEY".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Config {
    /// Load config from the default location, falling back to defaults
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path();

        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            Config::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load config from an explicit file
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Apply `TOKPROBE_MODEL` and `TOKPROBE_REGION` overrides
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(model) = var(MODEL_ENV).filter(|m| !m.is_empty()) {
            self.model = model;
        }
        if let Some(region) = var(REGION_ENV).filter(|r| !r.is_empty()) {
            self.oracle.region = Some(region);
        }
    }

    /// Get config file path
    pub fn config_path() -> PathBuf {
        if let Some(dirs) = directories::ProjectDirs::from("com", "tokprobe", "tokprobe") {
            dirs.config_dir().join("config.toml")
        } else {
            PathBuf::from("~/.tokprobe/config.toml")
        }
    }
}
