//! Connection pool and schema bootstrap.

use std::str::FromStr;
use std::time::Duration;

use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use tracing::{info, warn};

use ratesync_common::{RateSyncError, Result};

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// SQLite connection URL.
    pub url: String,
    /// Maximum pooled connections.
    pub max_connections: u32,
    /// How long a connection waits on a locked database.
    pub busy_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://ratesync.db".to_string(),
            max_connections: 5,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS series (
        id BLOB PRIMARY KEY,
        currency_code TEXT NOT NULL UNIQUE,
        provider_series_id TEXT NOT NULL,
        enabled INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS rate_points (
        id BLOB PRIMARY KEY,
        series_id BLOB NOT NULL REFERENCES series (id) ON DELETE RESTRICT,
        base_currency TEXT NOT NULL,
        target_currency TEXT NOT NULL,
        rate_date TEXT NOT NULL,
        rate TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE (base_currency, target_currency, rate_date)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS series_events (
        id BLOB PRIMARY KEY,
        series_id BLOB NOT NULL REFERENCES series (id) ON DELETE CASCADE,
        kind TEXT NOT NULL,
        created_at TEXT NOT NULL,
        processed_at TEXT,
        attempts INTEGER NOT NULL DEFAULT 0,
        last_error TEXT
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_series_events_pending
        ON series_events (processed_at, created_at)
    "#,
];

/// Handle to the RateSync database.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connect and bootstrap the schema.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(config.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.initialize_schema().await?;

        info!(url = %config.url, "Database ready");
        Ok(db)
    }

    /// Private in-memory database on a single pinned connection.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        // Every connection to :memory: is a separate database, so the pool
        // must never drop or replace its only connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.initialize_schema().await?;
        Ok(db)
    }

    /// Create tables and indexes if missing.
    pub async fn initialize_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Begin a deferred transaction.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    /// Begin a transaction that holds the write lock from its first statement.
    ///
    /// A second writer waits on the busy timeout here instead of failing
    /// later when it tries to upgrade a read lock.
    pub async fn begin_write(&self) -> Result<WriteTransaction> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
        Ok(WriteTransaction { conn: Some(conn) })
    }

    /// Acquire a pooled connection for reads outside a transaction.
    pub async fn acquire(&self) -> Result<PoolConnection<Sqlite>> {
        Ok(self.pool.acquire().await?)
    }

    /// The underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close all connections.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// A `BEGIN IMMEDIATE` transaction on a pooled connection.
///
/// Finish it with [`commit`](Self::commit) or [`rollback`](Self::rollback).
/// If it is dropped unfinished, the rollback runs in the background before the
/// connection goes back to the pool.
pub struct WriteTransaction {
    conn: Option<PoolConnection<Sqlite>>,
}

impl WriteTransaction {
    /// The connection the transaction runs on.
    pub fn conn(&mut self) -> Result<&mut SqliteConnection> {
        self.conn
            .as_deref_mut()
            .ok_or_else(|| RateSyncError::Database("Write transaction already finished".to_string()))
    }

    pub async fn commit(mut self) -> Result<()> {
        sqlx::query("COMMIT").execute(self.conn()?).await?;
        self.conn = None;
        Ok(())
    }

    pub async fn rollback(mut self) -> Result<()> {
        sqlx::query("ROLLBACK").execute(self.conn()?).await?;
        self.conn = None;
        Ok(())
    }
}

impl Drop for WriteTransaction {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };

        warn!("Write transaction dropped without commit, rolling back");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                        warn!(error = %e, "Background rollback failed");
                    }
                });
            }
            // Closing the connection rolls the transaction back.
            Err(_) => drop(conn.detach()),
        }
    }
}
