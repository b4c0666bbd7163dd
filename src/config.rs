//! Configuration management for Haven.
//!
//! Loads and saves application configuration to a JSON file in the config
//! directory. Covers the worker endpoints, the account email, and the sync
//! and vault tuning knobs (undo grace period, refresh retry budget, KDF
//! work factor).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::collection::CollectionConfig;
use crate::error::{HavenError, HavenResult};
use crate::vault::{DEFAULT_KDF_ITERATIONS, MIN_KDF_ITERATIONS};

fn default_tasks_url() -> String {
    "https://tasks.haven.workers.dev".to_string()
}

fn default_vault_url() -> String {
    "https://vault.haven.workers.dev".to_string()
}

fn default_undo_grace_seconds() -> u64 {
    10
}

fn default_refresh_retries() -> u32 {
    3
}

fn default_refresh_retry_delay_ms() -> u64 {
    1_000
}

fn default_kdf_iterations() -> u32 {
    DEFAULT_KDF_ITERATIONS
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigData {
    /// Base URL of the task worker
    #[serde(default = "default_tasks_url")]
    pub tasks_url: String,
    /// Base URL of the vault worker
    #[serde(default = "default_vault_url")]
    pub vault_url: String,
    /// Account email sent as X-User-Email on every request
    #[serde(default)]
    pub user_email: String,
    /// Undo window for deletions, in seconds
    #[serde(default = "default_undo_grace_seconds")]
    pub undo_grace_seconds: u64,
    /// Extra attempts after a failed refresh fetch
    #[serde(default = "default_refresh_retries")]
    pub refresh_retries: u32,
    /// Delay between refresh attempts, in milliseconds
    #[serde(default = "default_refresh_retry_delay_ms")]
    pub refresh_retry_delay_ms: u64,
    /// PBKDF2 work factor for the vault key derivation
    #[serde(default = "default_kdf_iterations")]
    pub kdf_iterations: u32,
}

impl Default for ConfigData {
    fn default() -> Self {
        Self {
            tasks_url: default_tasks_url(),
            vault_url: default_vault_url(),
            user_email: String::new(),
            undo_grace_seconds: default_undo_grace_seconds(),
            refresh_retries: default_refresh_retries(),
            refresh_retry_delay_ms: default_refresh_retry_delay_ms(),
            kdf_iterations: default_kdf_iterations(),
        }
    }
}

/// Configuration manager
pub struct Config {
    config_dir: PathBuf,
    config_file: PathBuf,
    data: ConfigData,
}

impl Config {
    /// Create a new configuration manager.
    ///
    /// Loads `config.json` from the given directory (or the platform config
    /// directory under `haven/`), writing defaults on first run. An
    /// unparsable file falls back to defaults rather than failing startup.
    pub fn new(config_dir: Option<PathBuf>) -> HavenResult<Self> {
        let config_dir = match config_dir {
            Some(dir) => dir,
            None => dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("haven"),
        };

        fs::create_dir_all(&config_dir)?;
        let config_file = config_dir.join("config.json");

        let data = if config_file.exists() {
            match fs::read_to_string(&config_file) {
                Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
                Err(_) => ConfigData::default(),
            }
        } else {
            ConfigData::default()
        };

        let config = Self {
            config_dir,
            config_file,
            data,
        };

        if !config.config_file.exists() {
            config.save()?;
        }

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> HavenResult<()> {
        let content = serde_json::to_string_pretty(&self.data)?;
        fs::write(&self.config_file, content)?;
        Ok(())
    }

    /// Get the configuration directory path
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn tasks_url(&self) -> &str {
        &self.data.tasks_url
    }

    pub fn set_tasks_url(&mut self, url: &str) -> HavenResult<()> {
        self.data.tasks_url = url.trim_end_matches('/').to_string();
        self.save()
    }

    pub fn vault_url(&self) -> &str {
        &self.data.vault_url
    }

    pub fn set_vault_url(&mut self, url: &str) -> HavenResult<()> {
        self.data.vault_url = url.trim_end_matches('/').to_string();
        self.save()
    }

    pub fn user_email(&self) -> &str {
        &self.data.user_email
    }

    pub fn set_user_email(&mut self, email: &str) -> HavenResult<()> {
        if email.is_empty() || !email.contains('@') {
            return Err(HavenError::validation("user_email", "must be an email address"));
        }
        self.data.user_email = email.to_string();
        self.save()
    }

    pub fn undo_grace(&self) -> Duration {
        Duration::from_secs(self.data.undo_grace_seconds)
    }

    pub fn set_undo_grace_seconds(&mut self, seconds: u64) -> HavenResult<()> {
        if seconds == 0 {
            return Err(HavenError::validation("undo_grace_seconds", "must be nonzero"));
        }
        self.data.undo_grace_seconds = seconds;
        self.save()
    }

    pub fn refresh_retries(&self) -> u32 {
        self.data.refresh_retries
    }

    pub fn refresh_retry_delay(&self) -> Duration {
        Duration::from_millis(self.data.refresh_retry_delay_ms)
    }

    /// PBKDF2 work factor; clamped to the minimum the vault accepts
    pub fn kdf_iterations(&self) -> u32 {
        self.data.kdf_iterations.max(MIN_KDF_ITERATIONS)
    }

    pub fn set_kdf_iterations(&mut self, iterations: u32) -> HavenResult<()> {
        if iterations < MIN_KDF_ITERATIONS {
            return Err(HavenError::validation(
                "kdf_iterations",
                format!("must be at least {}", MIN_KDF_ITERATIONS),
            ));
        }
        self.data.kdf_iterations = iterations;
        self.save()
    }

    /// Collection tuning derived from the stored settings
    pub fn collection_config(&self) -> CollectionConfig {
        CollectionConfig {
            undo_grace: self.undo_grace(),
            refresh_retries: self.refresh_retries(),
            refresh_retry_delay: self.refresh_retry_delay(),
        }
    }
}
