use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use imgup_store_sqlite::SqliteConfig;
use imgup_store_sqlite::config::DEFAULT_DATABASE_PATH;

/// Errors raised while loading the CLI configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Top-level configuration for the CLI, loaded from a TOML file.
///
/// ```toml
/// [database]
/// path = "/srv/imgup/imgup.db"
/// pool_size = 4
///
/// [store]
/// lock_timeout_secs = 10
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct CliConfig {
    /// Database location and pool settings.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Record store tunables.
    #[serde(default)]
    pub store: StoreSection,
}

/// `[database]` section.
#[derive(Debug, Default, Deserialize)]
pub struct DatabaseConfig {
    /// Database file. Overridden by `--database` and `IMGUPD_DATABASE_PATH`.
    pub path: Option<PathBuf>,
    /// Connection pool size.
    pub pool_size: Option<u32>,
    /// Table name prefix.
    pub table_prefix: Option<String>,
}

/// `[store]` section.
#[derive(Debug, Deserialize)]
pub struct StoreSection {
    /// Seconds a writer waits for the write lock.
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,
}

fn default_lock_timeout_secs() -> u64 {
    imgup_store::DEFAULT_LOCK_TIMEOUT.as_secs()
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            lock_timeout_secs: default_lock_timeout_secs(),
        }
    }
}

impl CliConfig {
    /// Read and parse `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        Self::parse(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Resolve the database path: the command-line value (which already
    /// includes the environment fallback), then the config file, then the
    /// built-in default.
    pub fn database_path(&self, flag: Option<&Path>) -> PathBuf {
        flag.map(Path::to_path_buf)
            .or_else(|| self.database.path.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE_PATH))
    }

    /// Build the backend configuration for the database at `path`.
    pub fn sqlite_config(&self, path: PathBuf) -> SqliteConfig {
        let mut config = SqliteConfig::new(path)
            .with_lock_timeout(Duration::from_secs(self.store.lock_timeout_secs));
        if let Some(size) = self.database.pool_size {
            config = config.with_pool_size(size);
        }
        if let Some(prefix) = &self.database.table_prefix {
            config = config.with_table_prefix(prefix.clone());
        }
        config
    }
}
