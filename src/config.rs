//! Configuration for crowd-index

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CrowdError, Result};

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("crowd-index")
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the report database
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Attempts a vote or moderation unit of work gets before
    /// surfacing a conflict
    #[serde(default = "default_max_txn_attempts")]
    pub max_txn_attempts: u32,

    /// Page size used when a query leaves `count` unset
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,

    /// Largest `count` a query may ask for
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,
}

fn default_max_txn_attempts() -> u32 {
    8
}

fn default_page_size() -> usize {
    1000
}

fn default_max_page_size() -> usize {
    10_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            max_txn_attempts: default_max_txn_attempts(),
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| CrowdError::Config(format!("Invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| CrowdError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_txn_attempts == 0 {
            return Err(CrowdError::Config("max_txn_attempts must be at least 1".to_string()));
        }
        if self.default_page_size > self.max_page_size {
            return Err(CrowdError::Config(format!(
                "default_page_size ({}) exceeds max_page_size ({})",
                self.default_page_size, self.max_page_size
            )));
        }
        Ok(())
    }

    /// Get report database path
    pub fn database_path(&self) -> PathBuf {
        self.storage_dir.join("reports.db")
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }
}
