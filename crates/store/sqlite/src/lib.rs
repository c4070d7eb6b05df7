pub mod config;
pub mod migrations;
pub mod store;
mod txn;

use std::path::PathBuf;
use std::sync::Arc;

use imgup_store::{RecordStore, StoreError};

pub use config::SqliteConfig;
pub use store::SqliteBackend;
pub use txn::SqliteWriteTxn;

/// Open (creating if needed) the database at `path` and wrap it in a
/// [`RecordStore`] with default settings.
///
/// # Errors
///
/// Returns [`StoreError::Connection`] if the file cannot be opened, or
/// [`StoreError::Backend`] if schema initialization fails.
pub async fn open(path: impl Into<PathBuf>) -> Result<RecordStore, StoreError> {
    open_with(SqliteConfig::new(path)).await
}

/// Like [`open`] with a full configuration. The store's write lock timeout
/// is taken from `config.lock_timeout`.
///
/// # Errors
///
/// Same as [`open`].
pub async fn open_with(config: SqliteConfig) -> Result<RecordStore, StoreError> {
    let lock_timeout = config.lock_timeout;
    let backend = SqliteBackend::open(config).await?;
    Ok(RecordStore::builder(Arc::new(backend))
        .lock_timeout(lock_timeout)
        .build())
}
