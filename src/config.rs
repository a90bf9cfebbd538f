//! Per-database and user-level configuration
//!
//! Stored as JSON in `<db>.config` next to the database file. Identity
//! fields missing there fall back to `<config_dir>/vaultdb/config.json`.

use crate::store::DEFAULT_COMPRESSION_LEVEL;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Branch checked out when none is given
    #[serde(default = "default_branch")]
    pub default_branch: String,

    #[serde(default)]
    pub author: Option<String>,

    #[serde(default)]
    pub committer: Option<String>,

    /// zstd level for the file store
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_compression_level() -> i32 {
    DEFAULT_COMPRESSION_LEVEL
}

impl Default for VaultConfig {
    fn default() -> Self {
        VaultConfig {
            default_branch: default_branch(),
            author: None,
            committer: None,
            compression_level: default_compression_level(),
        }
    }
}

impl VaultConfig {
    /// Load the config for a database, falling back to the user-level file
    /// for identity and to defaults for everything else
    pub fn load(db_path: &Path) -> Result<Self> {
        let mut config = Self::read(&Self::config_path(db_path))?.unwrap_or_default();

        if config.author.is_none() || config.committer.is_none() {
            if let Some(user_path) = Self::user_config_path() {
                if let Some(user) = Self::read(&user_path)? {
                    config.author = config.author.or(user.author);
                    config.committer = config.committer.or(user.committer);
                }
            }
        }

        Ok(config)
    }

    /// Save the config next to the database
    pub fn save(&self, db_path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(Self::config_path(db_path), content)?;
        Ok(())
    }

    /// Author name, or `fallback` when none is configured
    pub fn author_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.author.as_deref().unwrap_or(fallback)
    }

    /// Committer name, defaulting to the author
    pub fn committer_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.committer
            .as_deref()
            .unwrap_or_else(|| self.author_or(fallback))
    }

    /// The config file path for a database
    pub fn config_path(db_path: &Path) -> PathBuf {
        let mut config_path = db_path.to_path_buf();
        let file_name = db_path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "vault.db".to_string());
        config_path.set_file_name(format!("{}.config", file_name));
        config_path
    }

    /// `<config_dir>/vaultdb/config.json`, if the platform has a config dir
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("vaultdb").join("config.json"))
    }

    fn read(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Ok(Some(config))
    }
}
