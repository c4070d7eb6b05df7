use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::{Sqlite, SqlitePool};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::{debug, warn};

use imgup_core::Record;
use imgup_store::{StoreError, WriteTxn};

use crate::store::{map_sqlx, record_params};

/// An open `BEGIN IMMEDIATE` transaction on a pooled connection.
///
/// Holds the backend's in-process writer mutex for its whole life. If it is
/// dropped without [`commit`](WriteTxn::commit) or
/// [`rollback`](WriteTxn::rollback), a `ROLLBACK` is issued in the
/// background and the mutex is released once it completes.
pub struct SqliteWriteTxn {
    conn: Option<PoolConnection<Sqlite>>,
    guard: Option<OwnedMutexGuard<()>>,
    table: String,
    timeout: Duration,
}

impl SqliteWriteTxn {
    pub(crate) async fn begin(
        pool: &SqlitePool,
        writer: Arc<Mutex<()>>,
        table: String,
        timeout: Duration,
        default_busy: Duration,
    ) -> Result<Self, StoreError> {
        let started = Instant::now();
        let guard = tokio::time::timeout(timeout, writer.lock_owned())
            .await
            .map_err(|_| StoreError::LockTimeout(timeout))?;

        // Readers may hold every pooled connection; waiting for one counts
        // against the same budget as the lock.
        let remaining = timeout.saturating_sub(started.elapsed());
        let mut conn = tokio::time::timeout(remaining, pool.acquire())
            .await
            .map_err(|_| StoreError::LockTimeout(timeout))?
            .map_err(|e| map_sqlx(e, timeout))?;

        // Whatever is left goes to SQLite's busy handler, which waits out
        // writers in other processes. The pool-wide value is restored before
        // anything else runs on the connection.
        let remaining = timeout.saturating_sub(started.elapsed());
        set_busy_timeout(&mut conn, remaining, timeout).await?;
        let began = sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await;
        let restored = set_busy_timeout(&mut conn, default_busy, timeout).await;

        if let Err(e) = restored {
            if began.is_ok() {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
            }
            drop(conn.detach());
            return Err(e);
        }
        began.map_err(|e| map_sqlx(e, timeout))?;

        debug!(table = %table, "sqlite write transaction started");
        Ok(Self {
            conn: Some(conn),
            guard: Some(guard),
            table,
            timeout,
        })
    }

    fn conn(&mut self) -> Result<&mut PoolConnection<Sqlite>, StoreError> {
        self.conn
            .as_mut()
            .ok_or_else(|| StoreError::Backend("write transaction already finished".into()))
    }

    async fn finish(&mut self, statement: &str) -> Result<(), StoreError> {
        let timeout = self.timeout;
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };

        let result = sqlx::query(statement).execute(&mut *conn).await;
        if let Err(e) = result {
            // The connection may still be inside the transaction; never hand
            // it back to the pool.
            drop(conn.detach());
            return Err(map_sqlx(e, timeout));
        }
        Ok(())
    }
}

async fn set_busy_timeout(
    conn: &mut PoolConnection<Sqlite>,
    busy: Duration,
    lock_timeout: Duration,
) -> Result<(), StoreError> {
    let busy_ms = u64::try_from(busy.as_millis()).unwrap_or(u64::MAX);
    sqlx::query(&format!("PRAGMA busy_timeout = {busy_ms}"))
        .execute(&mut **conn)
        .await
        .map_err(|e| map_sqlx(e, lock_timeout))?;
    Ok(())
}

#[async_trait]
impl WriteTxn for SqliteWriteTxn {
    async fn exists(&mut self, id: &str) -> Result<bool, StoreError> {
        let timeout = self.timeout;
        let sql = format!("SELECT 1 FROM {} WHERE id = ?1", self.table);
        let conn = self.conn()?;

        let row: Option<(i64,)> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&mut **conn)
            .await
            .map_err(|e| map_sqlx(e, timeout))?;

        Ok(row.is_some())
    }

    async fn insert(&mut self, record: &Record) -> Result<(), StoreError> {
        let timeout = self.timeout;
        let (created_at, duration) = record_params(record)?;
        let sql = format!(
            "INSERT INTO {} (id, title, author, data, filename, created_at, visible, duration) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            self.table
        );
        let conn = self.conn()?;

        sqlx::query(&sql)
            .bind(&record.id)
            .bind(&record.title)
            .bind(&record.author)
            .bind(record.data.as_ref())
            .bind(&record.filename)
            .bind(created_at)
            .bind(record.visible)
            .bind(duration)
            .execute(&mut **conn)
            .await
            .map_err(|e| map_sqlx(e, timeout))?;

        Ok(())
    }

    async fn delete_expired(&mut self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let timeout = self.timeout;
        let sql = format!(
            "DELETE FROM {} WHERE ?1 - created_at >= duration * 1000",
            self.table
        );
        let conn = self.conn()?;

        let result = sqlx::query(&sql)
            .bind(now.timestamp_millis())
            .execute(&mut **conn)
            .await
            .map_err(|e| map_sqlx(e, timeout))?;

        Ok(result.rows_affected())
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        self.finish("COMMIT").await
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), StoreError> {
        self.finish("ROLLBACK").await
    }
}

impl Drop for SqliteWriteTxn {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        let guard = self.guard.take();

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            // Closing the connection makes SQLite discard the transaction.
            drop(conn.detach());
            return;
        };

        handle.spawn(async move {
            if let Err(e) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                warn!(error = %e, "rollback of abandoned write transaction failed");
                drop(conn.detach());
            }
            drop(guard);
        });
    }
}
