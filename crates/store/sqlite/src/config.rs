use std::path::PathBuf;
use std::time::Duration;

use imgup_store::DEFAULT_LOCK_TIMEOUT;

/// Default on-disk location of the database.
pub const DEFAULT_DATABASE_PATH: &str = "/var/imgup/imgup.db";

/// Configuration for the SQLite record backend.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Database file. Created on first open.
    pub path: PathBuf,

    /// Maximum number of connections in the `sqlx` pool.
    pub pool_size: u32,

    /// How long a writer waits for the database write lock.
    pub lock_timeout: Duration,

    /// Prefix applied to the table and index names.
    pub table_prefix: String,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_DATABASE_PATH),
            pool_size: 5,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            table_prefix: String::new(),
        }
    }
}

impl SqliteConfig {
    /// Create a configuration for the database at `path` with defaults.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Set the pool size. Values below 2 are raised to 2 so readers are
    /// never starved by an open write transaction.
    #[must_use]
    pub fn with_pool_size(mut self, size: u32) -> Self {
        self.pool_size = size.max(2);
        self
    }

    /// Set the write lock timeout.
    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Set the table prefix.
    #[must_use]
    pub fn with_table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.table_prefix = prefix.into();
        self
    }

    /// Name of the record table (`prefix` + `image`).
    pub(crate) fn table(&self) -> String {
        format!("{}image", self.table_prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = SqliteConfig::default();
        assert_eq!(cfg.path, PathBuf::from("/var/imgup/imgup.db"));
        assert_eq!(cfg.pool_size, 5);
        assert_eq!(cfg.lock_timeout, Duration::from_secs(30));
        assert_eq!(cfg.table(), "image");
    }

    #[test]
    fn builder_setters() {
        let cfg = SqliteConfig::new("/tmp/x.db")
            .with_pool_size(0)
            .with_lock_timeout(Duration::from_secs(2))
            .with_table_prefix("test_");
        assert_eq!(cfg.path, PathBuf::from("/tmp/x.db"));
        assert_eq!(cfg.pool_size, 2);
        assert_eq!(cfg.lock_timeout, Duration::from_secs(2));
        assert_eq!(cfg.table(), "test_image");
    }
}
