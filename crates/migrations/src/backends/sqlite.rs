//! SQLite Backend Implementation
//!
//! SQLite has no multi-statement result shape the engine can read counts from,
//! so modification commands are always executed one per round trip.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqliteConnection, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};
use tracing::debug;

use super::core::*;
use crate::backends::DatabaseBackendType;
use crate::error::{MigrationError, MigrationResult};
use crate::update::BatchPolicy;

/// SQLite database backend implementation
#[derive(Debug, Default)]
pub struct SqliteBackend;

impl SqliteBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DatabaseBackend for SqliteBackend {
    async fn create_pool(&self, database_url: &str, config: &DatabasePoolConfig) -> MigrationResult<Arc<dyn DatabasePool>> {
        self.validate_database_url(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| MigrationError::Connection(format!("Invalid SQLite URL: {}", e)))?
            .create_if_missing(true);

        // An in-memory database lives and dies with its single connection.
        let in_memory = database_url.contains(":memory:");
        let max_connections = if in_memory { 1 } else { config.max_connections };

        let mut options = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .min_connections(config.min_connections.min(max_connections))
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .test_before_acquire(config.test_before_acquire);

        if in_memory {
            options = options.idle_timeout(None).max_lifetime(None);
        } else {
            if let Some(idle_timeout) = config.idle_timeout_seconds {
                options = options.idle_timeout(Duration::from_secs(idle_timeout));
            }
            if let Some(max_lifetime) = config.max_lifetime_seconds {
                options = options.max_lifetime(Duration::from_secs(max_lifetime));
            }
        }

        let pool = options
            .connect_with(connect_options)
            .await
            .map_err(|e| MigrationError::Connection(format!("Failed to create SQLite pool: {}", e)))?;

        Ok(Arc::new(SqlitePool { pool }))
    }

    fn sql_dialect(&self) -> SqlDialect {
        SqlDialect::SQLite
    }

    fn backend_type(&self) -> DatabaseBackendType {
        DatabaseBackendType::SQLite
    }

    fn validate_database_url(&self, url: &str) -> MigrationResult<()> {
        if url.starts_with("sqlite:") || url.starts_with("file:") {
            Ok(())
        } else {
            Err(MigrationError::Connection("Invalid SQLite URL scheme".to_string()))
        }
    }

    fn batch_policy(&self, _max_batch_size: Option<usize>) -> BatchPolicy {
        BatchPolicy::Single
    }
}

/// SQLite connection pool implementation
pub struct SqlitePool {
    pool: Pool<Sqlite>,
}

#[async_trait]
impl DatabasePool for SqlitePool {
    async fn acquire(&self) -> MigrationResult<Box<dyn DatabaseConnection>> {
        let conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| MigrationError::Connection(format!("Failed to acquire connection: {}", e)))?;

        Ok(Box::new(SqliteConnectionHandle { conn }))
    }

    async fn begin_transaction(&self) -> MigrationResult<Box<dyn DatabaseTransaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| MigrationError::StoreExecution(format!("Failed to start transaction: {}", e)))?;

        Ok(Box::new(SqliteTransaction { tx: Some(tx) }))
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

pub struct SqliteConnectionHandle {
    conn: sqlx::pool::PoolConnection<Sqlite>,
}

#[async_trait]
impl DatabaseExecutor for SqliteConnectionHandle {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrationResult<u64> {
        execute_on(&mut self.conn, sql, params).await
    }

    async fn fetch_column(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrationResult<Vec<String>> {
        fetch_column_on(&mut self.conn, sql, params).await
    }

    async fn execute_batch(&mut self, batch: &RenderedBatch) -> MigrationResult<Vec<u64>> {
        execute_batch_on(&mut self.conn, batch).await
    }
}

impl DatabaseConnection for SqliteConnectionHandle {}

pub struct SqliteTransaction {
    tx: Option<sqlx::Transaction<'static, Sqlite>>,
}

impl SqliteTransaction {
    fn open(&mut self) -> MigrationResult<&mut SqliteConnection> {
        let tx = self
            .tx
            .as_mut()
            .ok_or_else(|| MigrationError::InvalidOperation("Transaction already completed".to_string()))?;
        Ok(&mut **tx)
    }
}

#[async_trait]
impl DatabaseExecutor for SqliteTransaction {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrationResult<u64> {
        execute_on(self.open()?, sql, params).await
    }

    async fn fetch_column(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrationResult<Vec<String>> {
        fetch_column_on(self.open()?, sql, params).await
    }

    async fn execute_batch(&mut self, batch: &RenderedBatch) -> MigrationResult<Vec<u64>> {
        execute_batch_on(self.open()?, batch).await
    }
}

#[async_trait]
impl DatabaseTransaction for SqliteTransaction {
    async fn commit(mut self: Box<Self>) -> MigrationResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| MigrationError::InvalidOperation("Transaction already completed".to_string()))?;

        tx.commit()
            .await
            .map_err(|e| MigrationError::StoreExecution(format!("Transaction commit failed: {}", e)))
    }

    async fn rollback(mut self: Box<Self>) -> MigrationResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| MigrationError::InvalidOperation("Transaction already completed".to_string()))?;

        tx.rollback()
            .await
            .map_err(|e| MigrationError::StoreExecution(format!("Transaction rollback failed: {}", e)))
    }
}

async fn execute_on(conn: &mut SqliteConnection, sql: &str, params: &[DatabaseValue]) -> MigrationResult<u64> {
    debug!(target: "elif_migrations::sql", "{}", sql);
    let mut query = sqlx::query(sql);
    for param in params {
        query = bind_database_value(query, param);
    }

    let result = query
        .execute(conn)
        .await
        .map_err(|e| MigrationError::StoreExecution(format!("Query execution failed: {}", e)))?;

    Ok(result.rows_affected())
}

async fn fetch_column_on(conn: &mut SqliteConnection, sql: &str, params: &[DatabaseValue]) -> MigrationResult<Vec<String>> {
    debug!(target: "elif_migrations::sql", "{}", sql);
    let mut query = sqlx::query(sql);
    for param in params {
        query = bind_database_value(query, param);
    }

    let rows = query
        .fetch_all(conn)
        .await
        .map_err(|e| MigrationError::StoreExecution(format!("Query fetch failed: {}", e)))?;

    rows.iter()
        .map(|row| {
            row.try_get::<String, _>(0)
                .map_err(|e| MigrationError::StoreExecution(format!("Failed to decode column: {}", e)))
        })
        .collect()
}

async fn execute_batch_on(conn: &mut SqliteConnection, batch: &RenderedBatch) -> MigrationResult<Vec<u64>> {
    match batch.counts {
        CountSource::RowsAffected => Ok(vec![execute_on(conn, &batch.sql, &batch.params).await?]),
        CountSource::CountsRow { columns } => Err(MigrationError::StoreExecution(format!(
            "SQLite cannot report affected rows for a batch of {} commands",
            columns
        ))),
    }
}

fn bind_database_value<'a>(
    query: sqlx::query::Query<'a, Sqlite, SqliteArguments<'a>>,
    value: &DatabaseValue,
) -> sqlx::query::Query<'a, Sqlite, SqliteArguments<'a>> {
    match value {
        DatabaseValue::Null => query.bind(Option::<String>::None),
        DatabaseValue::Bool(b) => query.bind(*b),
        DatabaseValue::Int32(i) => query.bind(*i),
        DatabaseValue::Int64(i) => query.bind(*i),
        DatabaseValue::Float64(f) => query.bind(*f),
        DatabaseValue::String(s) => query.bind(s.clone()),
        DatabaseValue::Bytes(b) => query.bind(b.clone()),
        DatabaseValue::Uuid(u) => query.bind(u.to_string()),
        DatabaseValue::DateTime(dt) => query.bind(dt.to_rfc3339()),
        DatabaseValue::Json(j) => query.bind(j.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_never_batches() {
        let backend = SqliteBackend::new();
        assert_eq!(backend.batch_policy(None), BatchPolicy::Single);
        assert_eq!(backend.batch_policy(Some(100)), BatchPolicy::Single);
    }

    #[test]
    fn test_validate_database_url() {
        let backend = SqliteBackend::new();
        assert!(backend.validate_database_url("sqlite::memory:").is_ok());
        assert!(backend.validate_database_url("sqlite://app.db").is_ok());
        assert!(backend.validate_database_url("postgres://localhost/app").is_err());
    }

    #[tokio::test]
    async fn test_in_memory_round_trip() {
        let backend = SqliteBackend::new();
        let pool = backend
            .create_pool("sqlite::memory:", &DatabasePoolConfig::default())
            .await
            .unwrap();

        let mut conn = pool.acquire().await.unwrap();
        conn.execute("CREATE TABLE t (name TEXT NOT NULL)", &[]).await.unwrap();
        let inserted = conn
            .execute("INSERT INTO t (name) VALUES (?1)", &[DatabaseValue::from("a")])
            .await
            .unwrap();
        assert_eq!(inserted, 1);

        let names = conn.fetch_column("SELECT name FROM t", &[]).await.unwrap();
        assert_eq!(names, vec!["a".to_string()]);
    }
}
