//! Database Backend Abstractions
//!
//! Connection and transaction provider traits plus the sqlx-backed PostgreSQL
//! and SQLite implementations the engine talks to.

pub mod core;
pub mod postgres;
pub mod sqlite;

use serde::{Deserialize, Serialize};

// Re-export core traits and types
pub use self::core::*;
pub use postgres::PostgresBackend;
pub use sqlite::SqliteBackend;

/// Database provider type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackendType {
    #[serde(alias = "postgres")]
    PostgreSQL,
    SQLite,
    /// Non-relational in-process store; migrations cannot target it
    #[serde(alias = "in_memory", alias = "memory")]
    InMemory,
}

impl DatabaseBackendType {
    /// Whether the provider is a relational database the engine can migrate
    pub fn is_relational(&self) -> bool {
        match self {
            DatabaseBackendType::PostgreSQL | DatabaseBackendType::SQLite => true,
            DatabaseBackendType::InMemory => false,
        }
    }
}

impl std::fmt::Display for DatabaseBackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseBackendType::PostgreSQL => write!(f, "postgresql"),
            DatabaseBackendType::SQLite => write!(f, "sqlite"),
            DatabaseBackendType::InMemory => write!(f, "inmemory"),
        }
    }
}

impl std::str::FromStr for DatabaseBackendType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgresql" | "postgres" => Ok(DatabaseBackendType::PostgreSQL),
            "sqlite" => Ok(DatabaseBackendType::SQLite),
            "inmemory" | "in_memory" | "memory" => Ok(DatabaseBackendType::InMemory),
            _ => Err(format!("Unsupported database backend: {}", s)),
        }
    }
}
