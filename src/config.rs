use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct LedgerConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub parser: ParserConfig,
    pub query: QueryConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub log_path: String,
    /// Empty disables the context store.
    pub context_db: String,
    pub fsync: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ParserConfig {
    pub fuzzy: bool,
    /// Suggestions below this confidence need an explicit yes.
    pub confirm_threshold: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct QueryConfig {
    pub recent_sessions: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".into(),
            log_level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let dir = default_ledger_dir();
        Self {
            log_path: dir.join("master.log").to_string_lossy().into_owned(),
            context_db: dir.join("context.db").to_string_lossy().into_owned(),
            fsync: true,
        }
    }
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            fuzzy: true,
            confirm_threshold: 1.0,
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self { recent_sessions: 5 }
    }
}

/// Returns `~/.activity-ledger/`, or `./.activity-ledger/` without a home directory.
pub fn default_ledger_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".activity-ledger")
}

/// Returns the default config file path: `~/.activity-ledger/config.toml`
pub fn default_config_path() -> PathBuf {
    default_ledger_dir().join("config.toml")
}

impl LedgerConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            LedgerConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// LEDGER_LOG, LEDGER_CONTEXT_DB, LEDGER_BIND, LEDGER_LOG_LEVEL.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("LEDGER_LOG") {
            self.storage.log_path = val;
        }
        if let Ok(val) = std::env::var("LEDGER_CONTEXT_DB") {
            self.storage.context_db = val;
        }
        if let Ok(val) = std::env::var("LEDGER_BIND") {
            self.server.bind = val;
        }
        if let Ok(val) = std::env::var("LEDGER_LOG_LEVEL") {
            self.server.log_level = val;
        }
    }

    pub fn resolved_log_path(&self) -> PathBuf {
        expand_tilde(&self.storage.log_path)
    }

    pub fn resolved_context_db(&self) -> Option<PathBuf> {
        let db = self.storage.context_db.trim();
        (!db.is_empty()).then(|| expand_tilde(db))
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
