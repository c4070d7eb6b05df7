use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::DateTime;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tokio::sync::Mutex;
use tracing::{debug, info};

use imgup_core::Record;
use imgup_store::{Backend, SearchFilter, StoreError, WriteTxn};

use crate::config::SqliteConfig;
use crate::migrations;
use crate::txn::SqliteWriteTxn;

/// Columns selected for every record read, in [`RecordRow`] order.
pub(crate) const COLUMNS: &str = "id, title, author, data, filename, created_at, visible, duration";

/// Row shape of the record table.
#[derive(sqlx::FromRow)]
pub(crate) struct RecordRow {
    id: String,
    title: String,
    author: String,
    data: Vec<u8>,
    filename: String,
    created_at: i64,
    visible: bool,
    duration: i64,
}

impl TryFrom<RecordRow> for Record {
    type Error = StoreError;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        let created_at = DateTime::from_timestamp_millis(row.created_at).ok_or_else(|| {
            StoreError::Backend(format!("record {} has invalid created_at", row.id))
        })?;
        let duration = u64::try_from(row.duration).map_err(|_| {
            StoreError::Backend(format!("record {} has negative duration", row.id))
        })?;

        Ok(Self {
            id: row.id,
            title: row.title,
            author: row.author,
            data: Bytes::from(row.data),
            filename: row.filename,
            created_at,
            visible: row.visible,
            duration,
        })
    }
}

/// Map a `sqlx` error onto the store's error kinds.
pub(crate) fn map_sqlx(err: sqlx::Error, lock_timeout: Duration) -> StoreError {
    match err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::ConstraintViolation(db.message().to_owned())
        }
        sqlx::Error::Database(db) if is_busy(db.code().as_deref(), db.message()) => {
            StoreError::LockTimeout(lock_timeout)
        }
        e @ (sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::Configuration(_)) => StoreError::Connection(e.to_string()),
        e => StoreError::Backend(e.to_string()),
    }
}

/// `SQLITE_BUSY`, `SQLITE_LOCKED` and their extended codes.
fn is_busy(code: Option<&str>, message: &str) -> bool {
    matches!(code, Some("5" | "6" | "261" | "262" | "517"))
        || message.contains("database is locked")
}

fn millis(dt: DateTime<chrono::Utc>) -> i64 {
    dt.timestamp_millis()
}

pub(crate) fn record_params(record: &Record) -> Result<(i64, i64), StoreError> {
    let duration = i64::try_from(record.duration).map_err(|_| {
        StoreError::ConstraintViolation(format!("duration {} is out of range", record.duration))
    })?;
    Ok((millis(record.created_at), duration))
}

/// SQLite-backed implementation of [`Backend`].
///
/// Uses a `sqlx::SqlitePool` in WAL mode, so readers proceed while a writer
/// holds the database lock. Writers are first serialized in-process and then
/// take the database lock with `BEGIN IMMEDIATE`, which also excludes
/// writers in other processes sharing the file.
pub struct SqliteBackend {
    pool: SqlitePool,
    config: Arc<SqliteConfig>,
    writer: Arc<Mutex<()>>,
}

impl SqliteBackend {
    /// Open the database described by `config`, creating the file and the
    /// schema if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connection`] if pool creation fails, or
    /// [`StoreError::Backend`] if migrations fail.
    pub async fn open(config: SqliteConfig) -> Result<Self, StoreError> {
        if let Some(parent) = config.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Connection(format!("{}: {e}", parent.display())))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(config.lock_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.pool_size)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        info!(path = %config.path.display(), "opened sqlite record store");
        Self::from_pool(pool, config).await
    }

    /// Create a backend from an existing pool. Runs migrations on creation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if migrations fail.
    pub async fn from_pool(pool: SqlitePool, config: SqliteConfig) -> Result<Self, StoreError> {
        migrations::run_migrations(&pool, &config)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(Self {
            pool,
            config: Arc::new(config),
            writer: Arc::new(Mutex::new(())),
        })
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn map_err(&self, err: sqlx::Error) -> StoreError {
        map_sqlx(err, self.config.lock_timeout)
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    async fn begin_write(&self, timeout: Duration) -> Result<Box<dyn WriteTxn>, StoreError> {
        let txn = SqliteWriteTxn::begin(
            &self.pool,
            Arc::clone(&self.writer),
            self.config.table(),
            timeout,
            self.config.lock_timeout,
        )
        .await?;
        Ok(Box::new(txn))
    }

    async fn get(&self, id: &str) -> Result<Option<Record>, StoreError> {
        let table = self.config.table();
        let sql = format!("SELECT {COLUMNS} FROM {table} WHERE id = ?1");

        let row = sqlx::query_as::<_, RecordRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| self.map_err(e))?;

        row.map(Record::try_from).transpose()
    }

    async fn recents(&self, limit: u32) -> Result<Vec<Record>, StoreError> {
        let table = self.config.table();
        let sql = format!(
            "SELECT {COLUMNS} FROM {table} WHERE visible = 1 \
             ORDER BY created_at DESC, id ASC LIMIT ?1"
        );

        let rows = sqlx::query_as::<_, RecordRow>(&sql)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| self.map_err(e))?;

        rows.into_iter().map(Record::try_from).collect()
    }

    async fn search(&self, filter: &SearchFilter, limit: u32) -> Result<Vec<Record>, StoreError> {
        let table = self.config.table();
        // SQLite's LIKE folds ASCII case, matching `Pattern::matches`.
        let sql = format!(
            "SELECT {COLUMNS} FROM {table} WHERE visible = 1 \
             AND title LIKE ?1 ESCAPE '\\' AND author LIKE ?2 ESCAPE '\\' \
             ORDER BY created_at DESC, id ASC LIMIT ?3"
        );

        let rows = sqlx::query_as::<_, RecordRow>(&sql)
            .bind(filter.title_like())
            .bind(filter.author_like())
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| self.map_err(e))?;

        debug!(count = rows.len(), "sqlite search");
        rows.into_iter().map(Record::try_from).collect()
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
