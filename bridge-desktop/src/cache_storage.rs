//! Response Cache Storage using SQLite

use async_trait::async_trait;
use bridge_traits::{
    cache::{CacheStorage, CachedResponse},
    error::{BridgeError, Result},
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow},
    Row,
};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS caches (
    name TEXT PRIMARY KEY,
    created_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS entries (
    cache_name TEXT NOT NULL REFERENCES caches(name) ON DELETE CASCADE,
    request_key TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    stored_at INTEGER NOT NULL,
    PRIMARY KEY (cache_name, request_key)
);
"#;

/// SQLITE_FULL primary result code
const SQLITE_FULL: &str = "13";

/// SQLite-backed named response caches
///
/// One database holds every cache generation:
/// - `caches` lists the names in creation order
/// - `entries` holds the captured responses, keyed by cache and request key
///
/// Batch writes run in a single transaction, so a failed `put_batch` leaves
/// the cache exactly as it was.
pub struct SqliteCacheStorage {
    options: SqliteConnectOptions,
    pool: OnceCell<SqlitePool>,
}

impl SqliteCacheStorage {
    /// Open (or create) the cache database at `db_path`
    pub async fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(BridgeError::Io)?;
        }

        let options = Self::connect_options(&db_path);
        let pool = Self::connect(SqlitePoolOptions::new(), options.clone()).await?;

        debug!(path = ?db_path, "Initialized cache storage");
        Ok(Self {
            options,
            pool: OnceCell::from(pool),
        })
    }

    /// Set up the storage without touching the database.
    ///
    /// Nothing here needs an async runtime: the pool is created and the
    /// schema applied on first use.
    pub fn open_lazy(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(BridgeError::Io)?;
        }

        debug!(path = ?db_path, "Prepared lazy cache storage");
        Ok(Self {
            options: Self::connect_options(&db_path),
            pool: OnceCell::new(),
        })
    }

    /// Create an in-memory cache storage (for testing)
    ///
    /// Every SQLite in-memory connection is its own database, so the pool is
    /// pinned to one connection that is never recycled.
    pub async fn in_memory() -> Result<Self> {
        let options: SqliteConnectOptions = "sqlite::memory:"
            .parse()
            .map_err(|e| BridgeError::DatabaseError(format!("Invalid connection string: {}", e)))?;
        let pool_options = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None);
        let pool = Self::connect(pool_options, options.clone()).await?;

        Ok(Self {
            options,
            pool: OnceCell::from(pool),
        })
    }

    /// Default database location under the platform cache directory
    pub fn default_path() -> Option<PathBuf> {
        dirs::cache_dir().map(|dir| dir.join("nossa-musica").join("offline-cache.db"))
    }

    /// Whether a pool has been created yet
    pub fn is_connected(&self) -> bool {
        self.pool.initialized()
    }

    fn connect_options(db_path: &std::path::Path) -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .foreign_keys(true)
    }

    async fn connect(
        pool_options: SqlitePoolOptions,
        options: SqliteConnectOptions,
    ) -> Result<SqlitePool> {
        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| BridgeError::DatabaseError(format!("Failed to connect to DB: {}", e)))?;

        sqlx::raw_sql(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| BridgeError::DatabaseError(format!("Failed to create tables: {}", e)))?;

        Ok(pool)
    }

    async fn pool(&self) -> Result<&SqlitePool> {
        self.pool
            .get_or_try_init(|| Self::connect(SqlitePoolOptions::new(), self.options.clone()))
            .await
    }

    fn now_millis() -> i64 {
        Utc::now().timestamp_millis()
    }

    /// Map a failed write, singling out a full disk
    fn write_error(context: &str, e: sqlx::Error) -> BridgeError {
        if let sqlx::Error::Database(db_err) = &e {
            if db_err.code().as_deref() == Some(SQLITE_FULL) {
                warn!(context, "Cache database is full");
                return BridgeError::QuotaExceeded(db_err.message().to_string());
            }
        }
        BridgeError::DatabaseError(format!("{}: {}", context, e))
    }

    fn read_error(context: &str, e: sqlx::Error) -> BridgeError {
        BridgeError::DatabaseError(format!("{}: {}", context, e))
    }

    fn row_to_response(row: &SqliteRow) -> Result<CachedResponse> {
        let status: i64 = row.get("status");
        let headers: String = row.get("headers");
        let body: Vec<u8> = row.get("body");
        let stored_at: i64 = row.get("stored_at");

        let status = u16::try_from(status)
            .map_err(|_| BridgeError::DatabaseError(format!("Invalid stored status {}", status)))?;
        let headers: HashMap<String, String> = serde_json::from_str(&headers)
            .map_err(|e| BridgeError::DatabaseError(format!("Corrupt stored headers: {}", e)))?;
        let stored_at = DateTime::<Utc>::from_timestamp_millis(stored_at).ok_or_else(|| {
            BridgeError::DatabaseError(format!("Invalid stored timestamp {}", stored_at))
        })?;

        Ok(CachedResponse {
            status,
            headers,
            body: Bytes::from(body),
            stored_at,
        })
    }

    async fn require_cache(
        tx: &mut sqlx::Transaction<'static, sqlx::Sqlite>,
        cache_name: &str,
    ) -> Result<()> {
        let exists = sqlx::query("SELECT 1 FROM caches WHERE name = ?")
            .bind(cache_name)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| Self::read_error("Failed to look up cache", e))?;

        if exists.is_none() {
            return Err(BridgeError::OperationFailed(format!(
                "Cache '{}' has not been opened",
                cache_name
            )));
        }
        Ok(())
    }

    async fn insert_entry(
        tx: &mut sqlx::Transaction<'static, sqlx::Sqlite>,
        cache_name: &str,
        key: &str,
        response: &CachedResponse,
    ) -> Result<()> {
        let headers = serde_json::to_string(&response.headers)
            .map_err(|e| BridgeError::OperationFailed(format!("Failed to encode headers: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO entries (cache_name, request_key, status, headers, body, stored_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(cache_name, request_key) DO UPDATE SET
                status = excluded.status,
                headers = excluded.headers,
                body = excluded.body,
                stored_at = excluded.stored_at
            "#,
        )
        .bind(cache_name)
        .bind(key)
        .bind(i64::from(response.status))
        .bind(headers)
        .bind(response.body.as_ref())
        .bind(response.stored_at.timestamp_millis())
        .execute(&mut **tx)
        .await
        .map_err(|e| Self::write_error("Failed to store entry", e))?;

        Ok(())
    }

    async fn begin(&self) -> Result<sqlx::Transaction<'static, sqlx::Sqlite>> {
        self.pool()
            .await?
            .begin()
            .await
            .map_err(|e| Self::read_error("Failed to begin transaction", e))
    }
}

#[async_trait]
impl CacheStorage for SqliteCacheStorage {
    async fn open(&self, cache_name: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO caches (name, created_at) VALUES (?, ?)")
            .bind(cache_name)
            .bind(Self::now_millis())
            .execute(self.pool().await?)
            .await
            .map_err(|e| Self::write_error("Failed to open cache", e))?;

        debug!(cache = cache_name, "Opened cache");
        Ok(())
    }

    async fn has(&self, cache_name: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM caches WHERE name = ?")
            .bind(cache_name)
            .fetch_optional(self.pool().await?)
            .await
            .map_err(|e| Self::read_error("Failed to check cache", e))?;

        Ok(row.is_some())
    }

    async fn delete(&self, cache_name: &str) -> Result<bool> {
        let mut tx = self.begin().await?;

        sqlx::query("DELETE FROM entries WHERE cache_name = ?")
            .bind(cache_name)
            .execute(&mut *tx)
            .await
            .map_err(|e| Self::read_error("Failed to delete entries", e))?;

        let removed = sqlx::query("DELETE FROM caches WHERE name = ?")
            .bind(cache_name)
            .execute(&mut *tx)
            .await
            .map_err(|e| Self::read_error("Failed to delete cache", e))?
            .rows_affected();

        tx.commit()
            .await
            .map_err(|e| Self::read_error("Failed to commit", e))?;

        debug!(cache = cache_name, existed = removed > 0, "Deleted cache");
        Ok(removed > 0)
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT name FROM caches ORDER BY created_at, rowid")
            .fetch_all(self.pool().await?)
            .await
            .map_err(|e| Self::read_error("Failed to list caches", e))?;

        Ok(rows.into_iter().map(|row| row.get(0)).collect())
    }

    async fn match_entry(&self, cache_name: &str, key: &str) -> Result<Option<CachedResponse>> {
        let row = sqlx::query(
            "SELECT status, headers, body, stored_at FROM entries \
             WHERE cache_name = ? AND request_key = ?",
        )
        .bind(cache_name)
        .bind(key)
        .fetch_optional(self.pool().await?)
        .await
        .map_err(|e| Self::read_error("Failed to look up entry", e))?;

        row.as_ref().map(Self::row_to_response).transpose()
    }

    async fn put(&self, cache_name: &str, key: &str, response: CachedResponse) -> Result<()> {
        let mut tx = self.begin().await?;
        Self::require_cache(&mut tx, cache_name).await?;
        Self::insert_entry(&mut tx, cache_name, key, &response).await?;
        tx.commit()
            .await
            .map_err(|e| Self::write_error("Failed to commit", e))?;

        debug!(cache = cache_name, status = response.status, "Stored entry");
        Ok(())
    }

    async fn put_batch(
        &self,
        cache_name: &str,
        entries: Vec<(String, CachedResponse)>,
    ) -> Result<()> {
        let mut tx = self.begin().await?;
        Self::require_cache(&mut tx, cache_name).await?;

        // Dropping the transaction on an early return rolls it back
        for (key, response) in &entries {
            Self::insert_entry(&mut tx, cache_name, key, response).await?;
        }

        tx.commit()
            .await
            .map_err(|e| Self::write_error("Failed to commit", e))?;

        debug!(cache = cache_name, count = entries.len(), "Stored batch");
        Ok(())
    }

    async fn entry_keys(&self, cache_name: &str) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT request_key FROM entries WHERE cache_name = ? ORDER BY rowid")
            .bind(cache_name)
            .fetch_all(self.pool().await?)
            .await
            .map_err(|e| Self::read_error("Failed to list entries", e))?;

        Ok(rows.into_iter().map(|row| row.get(0)).collect())
    }
}
