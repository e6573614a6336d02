use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::agent_modules::prober::{RetryPolicy, DEFAULT_ATTEMPT_TIMEOUT_MS, DEFAULT_RETRIES};
use crate::agent_modules::scheduler::{
    SchedulerSettings, DEFAULT_CYCLE_INTERVAL_SECONDS, DEFAULT_FAILURE_BACKOFF_SECONDS,
};

/// Environment variables are read with this prefix, e.g. `PINGWARDEN_DATABASE_URL`.
pub const ENV_PREFIX: &str = "PINGWARDEN_";
pub const DEFAULT_CONFIG_PATH: &str = "pingwarden.toml";
const MAX_PROBE_RETRIES: u32 = 10;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file at {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse TOML from config file at {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Failed to load config from environment: {0}")]
    Env(#[from] envy::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    pub database_url: String,
    pub cycle_interval_seconds: u64,
    pub failure_backoff_seconds: u64,
    pub max_restarts: Option<u32>,
    pub probe_timeout_ms: u64,
    pub probe_retries: u32,
    pub log_dir: String,
    pub auto_create_schema: bool,
    pub max_db_connections: u32,
}

// Partial config for layering
#[derive(Deserialize, Default, Debug)]
pub struct PartialAgentConfig {
    database_url: Option<String>,
    cycle_interval_seconds: Option<u64>,
    failure_backoff_seconds: Option<u64>,
    max_restarts: Option<u32>,
    probe_timeout_ms: Option<u64>,
    probe_retries: Option<u32>,
    log_dir: Option<String>,
    auto_create_schema: Option<bool>,
    max_db_connections: Option<u32>,
}

fn default_database_url() -> String {
    "sqlite://pingwarden.db?mode=rwc".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

impl PartialAgentConfig {
    /// A missing file is not an error; it just contributes nothing.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(envy::prefixed(ENV_PREFIX).from_env::<Self>()?)
    }
}

impl AgentConfig {
    /// File first, then environment (including `.env`) on top.
    pub fn load(config_path: &Path) -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        // 1. Load from file (optional)
        let file_config = PartialAgentConfig::from_file(config_path)?;
        // 2. Load from environment variables
        let env_config = PartialAgentConfig::from_env()?;
        // 3. Merge: environment overrides file
        Self::merge(env_config, file_config)
    }

    pub fn merge(env: PartialAgentConfig, file: PartialAgentConfig) -> Result<Self, ConfigError> {
        let config = AgentConfig {
            database_url: env.database_url.or(file.database_url)
                .unwrap_or_else(default_database_url),
            cycle_interval_seconds: env.cycle_interval_seconds.or(file.cycle_interval_seconds)
                .unwrap_or(DEFAULT_CYCLE_INTERVAL_SECONDS),
            failure_backoff_seconds: env.failure_backoff_seconds.or(file.failure_backoff_seconds)
                .unwrap_or(DEFAULT_FAILURE_BACKOFF_SECONDS),
            max_restarts: env.max_restarts.or(file.max_restarts),
            probe_timeout_ms: env.probe_timeout_ms.or(file.probe_timeout_ms)
                .unwrap_or(DEFAULT_ATTEMPT_TIMEOUT_MS),
            probe_retries: env.probe_retries.or(file.probe_retries)
                .unwrap_or(DEFAULT_RETRIES),
            log_dir: env.log_dir.or(file.log_dir)
                .unwrap_or_else(default_log_dir),
            auto_create_schema: env.auto_create_schema.or(file.auto_create_schema)
                .unwrap_or(true),
            max_db_connections: env.max_db_connections.or(file.max_db_connections)
                .unwrap_or(10),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.trim().is_empty() {
            return Err(ConfigError::Invalid("database_url must not be empty".into()));
        }
        if self.cycle_interval_seconds == 0 {
            return Err(ConfigError::Invalid("cycle_interval_seconds must be positive".into()));
        }
        if self.failure_backoff_seconds == 0 {
            return Err(ConfigError::Invalid("failure_backoff_seconds must be positive".into()));
        }
        if self.probe_timeout_ms == 0 {
            return Err(ConfigError::Invalid("probe_timeout_ms must be positive".into()));
        }
        if self.probe_retries > MAX_PROBE_RETRIES {
            return Err(ConfigError::Invalid(format!(
                "probe_retries must be at most {MAX_PROBE_RETRIES}, got {}",
                self.probe_retries
            )));
        }
        if self.max_db_connections == 0 {
            return Err(ConfigError::Invalid("max_db_connections must be positive".into()));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempt_timeout: Duration::from_millis(self.probe_timeout_ms),
            retries: self.probe_retries,
        }
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            cycle_interval: Duration::from_secs(self.cycle_interval_seconds),
            failure_backoff: Duration::from_secs(self.failure_backoff_seconds),
            max_restarts: self.max_restarts,
        }
    }
}
