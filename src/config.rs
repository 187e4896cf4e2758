// ⚙️ Application configuration
//
// Optional JSON file named by STABLE_LEDGER_CONFIG, then environment
// overrides. Anything not set falls back to the defaults below.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const CONFIG_ENV: &str = "STABLE_LEDGER_CONFIG";
pub const DB_ENV: &str = "STABLE_LEDGER_DB";
pub const DATA_ENV: &str = "STABLE_LEDGER_DATA";
pub const ADDR_ENV: &str = "STABLE_LEDGER_ADDR";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    /// SQLite file holding operations and events
    pub database_path: PathBuf,

    /// JSON stable document
    pub data_path: PathBuf,

    pub server_addr: String,

    /// Cap for recurrence expansion in reports and the API
    pub max_occurrences: usize,

    pub currency: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            database_path: PathBuf::from("stable.db"),
            data_path: PathBuf::from("stable.json"),
            server_addr: "0.0.0.0:3000".to_string(),
            max_occurrences: 52,
            currency: "EUR".to_string(),
        }
    }
}

impl AppConfig {
    /// Read a config file; keys it omits keep their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: AppConfig =
            serde_json::from_str(&content).context("Failed to parse config JSON")?;

        Ok(config)
    }

    /// Config for the running process
    pub fn load() -> Result<Self> {
        let file = env::var(CONFIG_ENV).ok().map(PathBuf::from);
        Self::from_sources(file.as_deref(), |key| env::var(key).ok())
    }

    /// `lookup` stands in for the environment so overrides can be tested
    pub fn from_sources<F>(file: Option<&Path>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match file {
            Some(path) if path.exists() => Self::from_file(path)?,
            Some(path) => {
                debug!(path = ?path, "config file missing, using defaults");
                AppConfig::default()
            }
            None => AppConfig::default(),
        };

        if let Some(db) = lookup(DB_ENV) {
            config.database_path = PathBuf::from(db);
        }
        if let Some(data) = lookup(DATA_ENV) {
            config.data_path = PathBuf::from(data);
        }
        if let Some(addr) = lookup(ADDR_ENV) {
            config.server_addr = addr;
        }

        debug!(?config, "configuration loaded");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_sources(None, no_env).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.max_occurrences, 52);
        assert_eq!(config.currency, "EUR");
    }

    #[test]
    fn test_env_overrides() {
        let config = AppConfig::from_sources(None, |key| match key {
            DB_ENV => Some("/tmp/ledger.db".to_string()),
            ADDR_ENV => Some("127.0.0.1:8080".to_string()),
            _ => None,
        })
        .unwrap();

        assert_eq!(config.database_path, PathBuf::from("/tmp/ledger.db"));
        assert_eq!(config.data_path, PathBuf::from("stable.json"));
        assert_eq!(config.server_addr, "127.0.0.1:8080");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let path = env::temp_dir().join(format!("stable-config-{}.json", uuid::Uuid::new_v4()));
        fs::write(&path, r#"{ "maxOccurrences": 10, "dataPath": "/srv/stable.json" }"#).unwrap();

        let config = AppConfig::from_sources(Some(&path), |key| {
            (key == DATA_ENV).then(|| "/override.json".to_string())
        })
        .unwrap();
        assert_eq!(config.max_occurrences, 10);
        assert_eq!(config.currency, "EUR");
        assert_eq!(config.data_path, PathBuf::from("/override.json"));

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_missing_or_broken_file() {
        let missing = env::temp_dir().join("does-not-exist-stable-config.json");
        assert_eq!(AppConfig::from_sources(Some(&missing), no_env).unwrap(), AppConfig::default());

        let path = env::temp_dir().join(format!("stable-config-{}.json", uuid::Uuid::new_v4()));
        fs::write(&path, "{ not json").unwrap();
        assert!(AppConfig::from_sources(Some(&path), no_env).is_err());
        fs::remove_file(&path).unwrap();
    }
}
