//! PostgreSQL Backend Implementation
//!
//! PostgreSQL-specific implementation of the provider traits using sqlx as the
//! underlying database driver.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgConnection, PgPoolOptions};
use sqlx::{Pool, Postgres, Row};
use tracing::debug;

use super::core::*;
use crate::backends::DatabaseBackendType;
use crate::error::{MigrationError, MigrationResult};
use crate::update::BatchPolicy;

/// Commands per batch when the configuration does not say otherwise
const DEFAULT_MAX_BATCH_SIZE: usize = 42;

/// PostgreSQL database backend implementation
#[derive(Debug, Default)]
pub struct PostgresBackend;

impl PostgresBackend {
    /// Create a new PostgreSQL backend instance
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DatabaseBackend for PostgresBackend {
    async fn create_pool(&self, database_url: &str, config: &DatabasePoolConfig) -> MigrationResult<Arc<dyn DatabasePool>> {
        self.validate_database_url(database_url)?;

        let mut options = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .test_before_acquire(config.test_before_acquire);

        if let Some(idle_timeout) = config.idle_timeout_seconds {
            options = options.idle_timeout(Duration::from_secs(idle_timeout));
        }

        if let Some(max_lifetime) = config.max_lifetime_seconds {
            options = options.max_lifetime(Duration::from_secs(max_lifetime));
        }

        let pool = options
            .connect(database_url)
            .await
            .map_err(|e| MigrationError::Connection(format!("Failed to create PostgreSQL pool: {}", e)))?;

        Ok(Arc::new(PostgresPool::new(pool)))
    }

    fn sql_dialect(&self) -> SqlDialect {
        SqlDialect::PostgreSQL
    }

    fn backend_type(&self) -> DatabaseBackendType {
        DatabaseBackendType::PostgreSQL
    }

    fn validate_database_url(&self, url: &str) -> MigrationResult<()> {
        if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
            return Err(MigrationError::Connection("Invalid PostgreSQL URL scheme".to_string()));
        }
        let parsed = url::Url::parse(url)
            .map_err(|e| MigrationError::Connection(format!("Invalid database URL: {}", e)))?;
        if parsed.path().trim_start_matches('/').is_empty() {
            return Err(MigrationError::Connection("Missing database name in URL".to_string()));
        }
        Ok(())
    }

    fn batch_policy(&self, max_batch_size: Option<usize>) -> BatchPolicy {
        match max_batch_size {
            Some(1) => BatchPolicy::Single,
            size => BatchPolicy::Bounded {
                max_commands: size.unwrap_or(DEFAULT_MAX_BATCH_SIZE),
                max_parameters: SqlDialect::PostgreSQL.max_parameters(),
            },
        }
    }
}

/// PostgreSQL connection pool implementation
pub struct PostgresPool {
    pool: Pool<Postgres>,
}

impl PostgresPool {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DatabasePool for PostgresPool {
    async fn acquire(&self) -> MigrationResult<Box<dyn DatabaseConnection>> {
        let conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| MigrationError::Connection(format!("Failed to acquire connection: {}", e)))?;

        Ok(Box::new(PostgresConnection { conn }))
    }

    async fn begin_transaction(&self) -> MigrationResult<Box<dyn DatabaseTransaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| MigrationError::StoreExecution(format!("Failed to start transaction: {}", e)))?;

        Ok(Box::new(PostgresTransaction { tx: Some(tx) }))
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// PostgreSQL connection implementation
pub struct PostgresConnection {
    conn: sqlx::pool::PoolConnection<Postgres>,
}

#[async_trait]
impl DatabaseExecutor for PostgresConnection {
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

impl DatabaseConnection for PostgresConnection {}

/// PostgreSQL transaction implementation
pub struct PostgresTransaction {
    tx: Option<sqlx::Transaction<'static, Postgres>>,
}

impl PostgresTransaction {
    fn open(&mut self) -> MigrationResult<&mut PgConnection> {
        let tx = self
            .tx
            .as_mut()
            .ok_or_else(|| MigrationError::InvalidOperation("Transaction already completed".to_string()))?;
        Ok(&mut **tx)
    }
}

#[async_trait]
impl DatabaseExecutor for PostgresTransaction {
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
impl DatabaseTransaction for PostgresTransaction {
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

async fn execute_on(conn: &mut PgConnection, sql: &str, params: &[DatabaseValue]) -> MigrationResult<u64> {
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

async fn fetch_column_on(conn: &mut PgConnection, sql: &str, params: &[DatabaseValue]) -> MigrationResult<Vec<String>> {
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

async fn execute_batch_on(conn: &mut PgConnection, batch: &RenderedBatch) -> MigrationResult<Vec<u64>> {
    match batch.counts {
        CountSource::RowsAffected => Ok(vec![execute_on(conn, &batch.sql, &batch.params).await?]),
        CountSource::CountsRow { columns } => {
            debug!(target: "elif_migrations::sql", "{}", batch.sql);
            let mut query = sqlx::query(&batch.sql);
            for param in &batch.params {
                query = bind_database_value(query, param);
            }

            let row = query
                .fetch_one(conn)
                .await
                .map_err(|e| MigrationError::StoreExecution(format!("Batch execution failed: {}", e)))?;

            (0..columns)
                .map(|index| {
                    row.try_get::<i64, _>(index)
                        .map(|count| count.max(0) as u64)
                        .map_err(|e| MigrationError::StoreExecution(format!("Failed to read affected rows: {}", e)))
                })
                .collect()
        }
    }
}

/// Bind a DatabaseValue to a sqlx query
fn bind_database_value<'a>(
    query: sqlx::query::Query<'a, Postgres, PgArguments>,
    value: &DatabaseValue,
) -> sqlx::query::Query<'a, Postgres, PgArguments> {
    match value {
        DatabaseValue::Null => query.bind(Option::<String>::None),
        DatabaseValue::Bool(b) => query.bind(*b),
        DatabaseValue::Int32(i) => query.bind(*i),
        DatabaseValue::Int64(i) => query.bind(*i),
        DatabaseValue::Float64(f) => query.bind(*f),
        DatabaseValue::String(s) => query.bind(s.clone()),
        DatabaseValue::Bytes(b) => query.bind(b.clone()),
        DatabaseValue::Uuid(u) => query.bind(*u),
        DatabaseValue::DateTime(dt) => query.bind(*dt),
        DatabaseValue::Json(j) => query.bind(j.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_database_url() {
        let backend = PostgresBackend::new();
        assert!(backend.validate_database_url("postgres://user:pw@localhost:5432/app").is_ok());
        assert!(backend.validate_database_url("mysql://localhost/app").is_err());
        assert!(backend.validate_database_url("postgres://localhost").is_err());
    }

    #[test]
    fn test_batch_policy_is_bounded_by_protocol_limit() {
        let backend = PostgresBackend::new();
        assert_eq!(
            backend.batch_policy(None),
            BatchPolicy::Bounded {
                max_commands: DEFAULT_MAX_BATCH_SIZE,
                max_parameters: 65_535
            }
        );
        assert_eq!(backend.batch_policy(Some(1)), BatchPolicy::Single);
    }
}
