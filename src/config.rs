//! Engine configuration
//!
//! Settings can be read from a TOML file and overridden through the
//! environment (a `.env` file next to the config is loaded first).
//!
//! ## Environment Variables
//!
//! - `FLATDB_TOKEN_CACHE` - capacity of the tokenizer cache
//! - `FLATDB_LIKE_CACHE` - capacity of the LIKE regex cache
//! - `FLATDB_AVG_SCALE` - decimals kept by AVG truncation

use serde::{Deserialize, Serialize};
use std::path::Path;

pub const ENV_TOKEN_CACHE: &str = "FLATDB_TOKEN_CACHE";
pub const ENV_LIKE_CACHE: &str = "FLATDB_LIKE_CACHE";
pub const ENV_AVG_SCALE: &str = "FLATDB_AVG_SCALE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of tokenized statements kept in memory
    #[serde(default = "default_token_cache_capacity")]
    pub token_cache_capacity: usize,
    /// Number of compiled LIKE patterns kept in memory
    #[serde(default = "default_like_cache_capacity")]
    pub like_cache_capacity: usize,
    /// Decimal places AVG truncates to
    #[serde(default = "default_avg_scale")]
    pub avg_scale: u32,
    /// Upper bound on a translated LIKE pattern
    #[serde(default = "default_max_regex_pattern_len")]
    pub max_regex_pattern_len: usize,
}

fn default_token_cache_capacity() -> usize {
    256
}

fn default_like_cache_capacity() -> usize {
    128
}

fn default_avg_scale() -> u32 {
    4
}

fn default_max_regex_pattern_len() -> usize {
    1024
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            token_cache_capacity: default_token_cache_capacity(),
            like_cache_capacity: default_like_cache_capacity(),
            avg_scale: default_avg_scale(),
            max_regex_pattern_len: default_max_regex_pattern_len(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file, then apply environment overrides.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if let Some(dir) = path.parent() {
            let env_path = dir.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
            }
        }

        if !path.exists() {
            anyhow::bail!("Configuration file not found: {}", path.display());
        }

        let content = std::fs::read_to_string(path)?;
        let mut config: EngineConfig = toml::from_str(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus whatever the environment overrides.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse::<usize>(ENV_TOKEN_CACHE) {
            self.token_cache_capacity = v;
        }
        if let Some(v) = env_parse::<usize>(ENV_LIKE_CACHE) {
            self.like_cache_capacity = v;
        }
        if let Some(v) = env_parse::<u32>(ENV_AVG_SCALE) {
            self.avg_scale = v;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.token_cache_capacity == 0 {
            anyhow::bail!("token_cache_capacity must be greater than zero");
        }
        if self.like_cache_capacity == 0 {
            anyhow::bail!("like_cache_capacity must be greater than zero");
        }
        if self.avg_scale > 12 {
            anyhow::bail!("avg_scale must be at most 12, got {}", self.avg_scale);
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!("Ignoring invalid value for {}: {}", name, raw);
                None
            }
        },
        Err(_) => None,
    }
}
