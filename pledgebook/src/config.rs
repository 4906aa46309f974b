use crate::error::{PledgeError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Runtime configuration, usually read from `pledgebook.yaml`.
/// Every field has a default so a missing file is not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// SQLite database file.
    pub database: PathBuf,
    /// Records per gateway call during bulk import.
    pub import_chunk_size: usize,
    /// YAML file of wire records used as the default roster.
    pub seed_file: Option<PathBuf>,
    /// Config key holding the shared access code.
    pub access_code_key: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database: PathBuf::from("pledgebook.db"),
            import_chunk_size: 100,
            seed_file: None,
            access_code_key: "access_code".to_string(),
        }
    }
}

impl Config {
    /// Load from a YAML file if it exists, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Self::from_yaml_str(&content)?
        } else {
            log::debug!("No config at {}, using defaults", path.display());
            Config::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Config::default());
        }
        let config: Config = serde_yaml::from_str(content)?;
        Ok(config)
    }

    /// Apply `PLEDGEBOOK_*` overrides from the given lookup (normally the environment).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(db) = lookup("PLEDGEBOOK_DB") {
            self.database = PathBuf::from(db);
        }
        if let Some(size) = lookup("PLEDGEBOOK_IMPORT_CHUNK_SIZE") {
            self.import_chunk_size = size.trim().parse().map_err(|_| {
                PledgeError::Config(format!("PLEDGEBOOK_IMPORT_CHUNK_SIZE is not a number: {size}"))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.import_chunk_size == 0 {
            return Err(PledgeError::Config("import_chunk_size must be at least 1".into()));
        }
        if self.access_code_key.trim().is_empty() {
            return Err(PledgeError::Config("access_code_key must not be empty".into()));
        }
        Ok(())
    }
}
