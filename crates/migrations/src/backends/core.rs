//! Core Database Backend Traits
//!
//! These traits are the connection/transaction provider contract the engine runs
//! against. They are object-safe so a context can pick its provider at runtime.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::backends::DatabaseBackendType;
use crate::error::{MigrationError, MigrationResult};
use crate::update::BatchPolicy;

/// Anything statements can be executed against: a pooled connection or an open
/// transaction.
#[async_trait]
pub trait DatabaseExecutor: Send {
    /// Execute a statement and return the affected rows count
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrationResult<u64>;

    /// Execute a query and return the first column of every row, decoded as text
    async fn fetch_column(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrationResult<Vec<String>>;

    /// Execute a rendered command batch in one round trip and return one
    /// affected-row count per command
    async fn execute_batch(&mut self, batch: &RenderedBatch) -> MigrationResult<Vec<u64>>;
}

/// A connection checked out of a pool; returned to the pool on drop
pub trait DatabaseConnection: DatabaseExecutor {}

/// Abstract database transaction trait
///
/// Dropping a transaction without committing rolls it back.
#[async_trait]
pub trait DatabaseTransaction: DatabaseExecutor {
    /// Commit the transaction
    async fn commit(self: Box<Self>) -> MigrationResult<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> MigrationResult<()>;
}

/// Abstract database connection pool trait
#[async_trait]
pub trait DatabasePool: Send + Sync {
    /// Acquire a connection from the pool
    async fn acquire(&self) -> MigrationResult<Box<dyn DatabaseConnection>>;

    /// Begin a transaction from the pool
    async fn begin_transaction(&self) -> MigrationResult<Box<dyn DatabaseTransaction>>;

    /// Close the pool
    async fn close(&self);
}

/// Database backend trait that provides provider-specific implementations
#[async_trait]
pub trait DatabaseBackend: Send + Sync {
    /// Create a connection pool from a database URL
    async fn create_pool(&self, database_url: &str, config: &DatabasePoolConfig) -> MigrationResult<Arc<dyn DatabasePool>>;

    /// Get the SQL dialect used by this backend
    fn sql_dialect(&self) -> SqlDialect;

    /// Get the backend type
    fn backend_type(&self) -> DatabaseBackendType;

    /// Validate a database URL for this backend
    fn validate_database_url(&self, url: &str) -> MigrationResult<()>;

    /// Admission policy for modification command batches on this provider.
    /// `max_batch_size` caps the number of commands where batching is supported.
    fn batch_policy(&self, max_batch_size: Option<usize>) -> BatchPolicy;
}

/// How a store reports per-command affected-row counts for a rendered batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountSource {
    /// A single statement; its affected-row count is the only count
    RowsAffected,
    /// One result row carrying one integer column per command
    CountsRow { columns: usize },
}

/// Command text and positional parameters for one batch round trip
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedBatch {
    pub sql: String,
    pub params: Vec<DatabaseValue>,
    pub counts: CountSource,
}

impl RenderedBatch {
    /// Number of affected-row counts the store is expected to report
    pub fn expected_counts(&self) -> usize {
        match self.counts {
            CountSource::RowsAffected => 1,
            CountSource::CountsRow { columns } => columns,
        }
    }
}

/// Database value enumeration for type-safe parameter binding
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseValue {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    Uuid(uuid::Uuid),
    DateTime(chrono::DateTime<chrono::Utc>),
    Json(JsonValue),
}

impl DatabaseValue {
    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, DatabaseValue::Null)
    }

    /// Text form used by stores that only speak strings (and by test doubles)
    pub fn as_text(&self) -> Option<String> {
        match self {
            DatabaseValue::Null => None,
            DatabaseValue::Bool(b) => Some(b.to_string()),
            DatabaseValue::Int32(i) => Some(i.to_string()),
            DatabaseValue::Int64(i) => Some(i.to_string()),
            DatabaseValue::Float64(f) => Some(f.to_string()),
            DatabaseValue::String(s) => Some(s.clone()),
            DatabaseValue::Bytes(b) => Some(b.iter().map(|x| format!("{:02x}", x)).collect()),
            DatabaseValue::Uuid(u) => Some(u.to_string()),
            DatabaseValue::DateTime(dt) => Some(dt.to_rfc3339()),
            DatabaseValue::Json(j) => Some(j.to_string()),
        }
    }
}

impl From<bool> for DatabaseValue {
    fn from(value: bool) -> Self {
        DatabaseValue::Bool(value)
    }
}

impl From<i32> for DatabaseValue {
    fn from(value: i32) -> Self {
        DatabaseValue::Int32(value)
    }
}

impl From<i64> for DatabaseValue {
    fn from(value: i64) -> Self {
        DatabaseValue::Int64(value)
    }
}

impl From<f64> for DatabaseValue {
    fn from(value: f64) -> Self {
        DatabaseValue::Float64(value)
    }
}

impl From<String> for DatabaseValue {
    fn from(value: String) -> Self {
        DatabaseValue::String(value)
    }
}

impl From<&str> for DatabaseValue {
    fn from(value: &str) -> Self {
        DatabaseValue::String(value.to_string())
    }
}

impl From<Vec<u8>> for DatabaseValue {
    fn from(value: Vec<u8>) -> Self {
        DatabaseValue::Bytes(value)
    }
}

impl From<uuid::Uuid> for DatabaseValue {
    fn from(value: uuid::Uuid) -> Self {
        DatabaseValue::Uuid(value)
    }
}

impl From<chrono::DateTime<chrono::Utc>> for DatabaseValue {
    fn from(value: chrono::DateTime<chrono::Utc>) -> Self {
        DatabaseValue::DateTime(value)
    }
}

impl From<JsonValue> for DatabaseValue {
    fn from(value: JsonValue) -> Self {
        DatabaseValue::Json(value)
    }
}

impl<T> From<Option<T>> for DatabaseValue
where
    T: Into<DatabaseValue>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => DatabaseValue::Null,
        }
    }
}

/// SQL dialect enumeration for generating database-specific SQL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    PostgreSQL,
    SQLite,
}

impl SqlDialect {
    /// Get the parameter placeholder for a zero-based parameter index
    pub fn parameter_placeholder(&self, index: usize) -> String {
        match self {
            SqlDialect::PostgreSQL => format!("${}", index + 1),
            SqlDialect::SQLite => format!("?{}", index + 1),
        }
    }

    /// Get the quote character for identifiers in this dialect
    pub fn identifier_quote(&self) -> char {
        '"'
    }

    /// Quote an identifier, doubling any embedded quote characters
    pub fn quote_identifier(&self, identifier: &str) -> String {
        let quote = self.identifier_quote();
        let escaped = identifier.replace(quote, &format!("{}{}", quote, quote));
        format!("{}{}{}", quote, escaped, quote)
    }

    /// Render a string literal, doubling embedded single quotes
    pub fn quote_literal(&self, value: &str) -> String {
        format!("'{}'", value.replace('\'', "''"))
    }

    /// Whether statements can be wrapped in a conditional block, which
    /// idempotent scripts rely on
    pub fn supports_conditional_blocks(&self) -> bool {
        matches!(self, SqlDialect::PostgreSQL)
    }

    /// Maximum number of bind parameters in a single command
    pub fn max_parameters(&self) -> usize {
        match self {
            SqlDialect::PostgreSQL => 65_535,
            SqlDialect::SQLite => 32_766,
        }
    }
}

/// Database pool configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabasePoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_seconds: u64,
    pub idle_timeout_seconds: Option<u64>,
    pub max_lifetime_seconds: Option<u64>,
    pub test_before_acquire: bool,
}

impl Default for DatabasePoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            min_connections: 0,
            acquire_timeout_seconds: 30,
            idle_timeout_seconds: Some(600), // 10 minutes
            max_lifetime_seconds: Some(1800), // 30 minutes
            test_before_acquire: true,
        }
    }
}

/// Database backend registry for managing multiple backend implementations
pub struct DatabaseBackendRegistry {
    backends: HashMap<DatabaseBackendType, Arc<dyn DatabaseBackend>>,
}

impl DatabaseBackendRegistry {
    /// Create an empty backend registry
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
        }
    }

    /// Registry with the PostgreSQL and SQLite backends
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(super::PostgresBackend::new()));
        registry.register(Arc::new(super::SqliteBackend::new()));
        registry
    }

    /// Register a database backend under its own backend type
    pub fn register(&mut self, backend: Arc<dyn DatabaseBackend>) {
        self.backends.insert(backend.backend_type(), backend);
    }

    /// Get a database backend by type
    pub fn get(&self, backend_type: DatabaseBackendType) -> MigrationResult<Arc<dyn DatabaseBackend>> {
        self.backends
            .get(&backend_type)
            .cloned()
            .ok_or_else(|| MigrationError::Connection(format!("No backend registered for {}", backend_type)))
    }

    /// Detect database backend type from URL
    pub fn detect_backend_from_url(url: &str) -> MigrationResult<DatabaseBackendType> {
        if url.starts_with("postgresql://") || url.starts_with("postgres://") {
            Ok(DatabaseBackendType::PostgreSQL)
        } else if url.starts_with("sqlite:") || url.starts_with("file:") {
            Ok(DatabaseBackendType::SQLite)
        } else {
            Err(MigrationError::Connection(format!(
                "Unable to detect database backend from URL: {}",
                url
            )))
        }
    }
}

impl Default for DatabaseBackendRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders_are_positional() {
        assert_eq!(SqlDialect::PostgreSQL.parameter_placeholder(0), "$1");
        assert_eq!(SqlDialect::SQLite.parameter_placeholder(4), "?5");
    }

    #[test]
    fn test_identifier_and_literal_quoting() {
        let dialect = SqlDialect::PostgreSQL;
        assert_eq!(dialect.quote_identifier("users"), "\"users\"");
        assert_eq!(dialect.quote_identifier("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(dialect.quote_literal("O'Brien"), "'O''Brien'");
    }

    #[test]
    fn test_detect_backend_from_url() {
        assert_eq!(
            DatabaseBackendRegistry::detect_backend_from_url("postgres://localhost/app").unwrap(),
            DatabaseBackendType::PostgreSQL
        );
        assert_eq!(
            DatabaseBackendRegistry::detect_backend_from_url("sqlite::memory:").unwrap(),
            DatabaseBackendType::SQLite
        );
        assert!(DatabaseBackendRegistry::detect_backend_from_url("mysql://localhost/app").is_err());
    }

    #[test]
    fn test_default_registry_has_no_in_memory_backend() {
        let registry = DatabaseBackendRegistry::with_defaults();
        assert!(registry.get(DatabaseBackendType::PostgreSQL).is_ok());
        assert!(registry.get(DatabaseBackendType::SQLite).is_ok());
        assert!(registry.get(DatabaseBackendType::InMemory).is_err());
    }

    #[test]
    fn test_option_values_convert_to_null() {
        let value: DatabaseValue = Option::<i32>::None.into();
        assert!(value.is_null());
        let value: DatabaseValue = Some(7i64).into();
        assert_eq!(value, DatabaseValue::Int64(7));
    }
}
