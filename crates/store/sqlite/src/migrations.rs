use sqlx::SqlitePool;

use crate::config::SqliteConfig;

/// Create the record table and its indexes if they do not already exist.
pub async fn run_migrations(pool: &SqlitePool, config: &SqliteConfig) -> Result<(), sqlx::Error> {
    let prefix = &config.table_prefix;
    let table = config.table();

    let create_table = format!(
        "
        CREATE TABLE IF NOT EXISTS {table} (
            id         TEXT PRIMARY KEY,
            title      TEXT NOT NULL,
            author     TEXT NOT NULL,
            data       BLOB NOT NULL,
            filename   TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL,
            visible    INTEGER NOT NULL DEFAULT 0,
            duration   INTEGER NOT NULL
        )
        "
    );

    sqlx::query(&create_table).execute(pool).await?;

    let indexes = [
        format!(
            "CREATE INDEX IF NOT EXISTS {prefix}image_recent_idx ON {table} (visible, created_at DESC)"
        ),
        format!("CREATE INDEX IF NOT EXISTS {prefix}image_created_idx ON {table} (created_at)"),
    ];

    for idx in &indexes {
        sqlx::query(idx).execute(pool).await?;
    }

    Ok(())
}
