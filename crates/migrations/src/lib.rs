//! # elif-migrations: Schema Migrations for elif.rs
//!
//! Versioned schema migrations (scaffold, list, script, apply, remove) and
//! batched execution of row-level modifications with affected-row
//! verification, over PostgreSQL and SQLite.

pub mod backends;
pub mod catalog;
pub mod config;
pub mod context;
pub mod error;
pub mod history;
pub mod migration;
pub mod migrator;
pub mod model;
pub mod operations;
pub mod scaffolder;
pub mod schema;
pub mod script;
pub mod services;
pub mod sql;
pub mod update;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export core traits and types
pub use backends::{
    DatabaseBackend, DatabaseBackendRegistry, DatabaseBackendType, DatabaseConnection, DatabaseExecutor, DatabasePool,
    DatabasePoolConfig, DatabaseTransaction, DatabaseValue, SqlDialect,
};
pub use catalog::{MigrationCatalog, MigrationTarget};
pub use config::{ContextConfig, MigrationsConfig};
pub use context::{ContextRegistry, MigrationContext};
pub use error::{ConcurrencyConflict, FailedCommand, MigrationError, MigrationResult};
pub use history::{HistoryRepository, MigrationHistoryRow};
pub use migration::{Migration, MigrationFiles, MigrationInfo};
pub use migrator::{MigrationReport, Migrator};
pub use model::{ModelDiffer, ModelSnapshot, TableModel};
pub use operations::MigrationsOperations;
pub use scaffolder::{MigrationsScaffolder, ScaffoldedMigration};
pub use schema::{ColumnDef, ColumnType, SchemaOperation};
pub use script::ScriptGenerator;
pub use services::MigrationServices;
pub use update::{BatchExecutor, BatchPolicy, CommandKind, ModificationCommand, ModificationCommandBatch};
