//! Error types for the migrations engine
//!
//! One taxonomy covers argument validation, catalog resolution, provider
//! capability, store failures and per-command concurrency conflicts.

use std::fmt;

use thiserror::Error;

use crate::update::{ColumnValue, CommandKind};

/// Result type alias for migration and update operations
pub type MigrationResult<T> = Result<T, MigrationError>;

/// Error types for migration and batch operations
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Bad or missing arguments, caught before any store operation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unresolvable migration id or context
    #[error("{kind} '{name}' was not found")]
    NotFound { kind: &'static str, name: String },

    /// A migration argument matched more than one candidate
    #[error("Migration '{query}' is ambiguous; candidates: {}", .candidates.join(", "))]
    AmbiguousMigration { query: String, candidates: Vec<String> },

    /// No context hint was given (or it matched several) while several contexts exist
    #[error("More than one context was found; specify one of: {}", .candidates.join(", "))]
    AmbiguousContext { candidates: Vec<String> },

    /// The resolved provider is not relational
    #[error("The provider '{0}' is not a relational database provider")]
    NonRelationalProvider(String),

    /// Id or name collision with an existing migration
    #[error("Duplicate migration: {0}")]
    DuplicateMigration(String),

    /// The migration to remove is recorded in the history table
    #[error("The migration '{0}' has already been applied to the database; revert it and try again")]
    CannotRemoveAppliedMigration(String),

    /// Affected-row counts did not match what the commands declared
    #[error(transparent)]
    ConcurrencyConflict(#[from] ConcurrencyConflict),

    /// The connection or transaction raised a failure mid-operation
    #[error("Store execution error: {0}")]
    StoreExecution(String),

    /// Connection could not be established
    #[error("Connection error: {0}")]
    Connection(String),

    /// Configuration file or value problem
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Misuse of an object's lifecycle (e.g. executing a batch twice)
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// The operation was cancelled before starting the next step
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MigrationError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        MigrationError::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Whether this error is a concurrency conflict reported by a command batch
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, MigrationError::ConcurrencyConflict(_))
    }
}

impl From<sqlx::Error> for MigrationError {
    fn from(err: sqlx::Error) -> Self {
        MigrationError::StoreExecution(err.to_string())
    }
}

impl From<serde_yaml::Error> for MigrationError {
    fn from(err: serde_yaml::Error) -> Self {
        MigrationError::Configuration(err.to_string())
    }
}

/// Outcome of a single command whose affected-row count did not match
#[derive(Debug, Clone, PartialEq)]
pub struct FailedCommand {
    /// Position of the command in the flushed command list
    pub index: usize,
    pub table: String,
    pub kind: CommandKind,
    /// Key values identifying the row
    pub keys: Vec<ColumnValue>,
    /// Original token values the row was expected to carry
    pub concurrency_tokens: Vec<ColumnValue>,
    pub expected_rows: u64,
    pub affected_rows: u64,
}

impl fmt::Display for FailedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {} on '{}'", self.index, self.kind, self.table)?;
        if !self.keys.is_empty() {
            write!(f, " [{}]", describe_values(&self.keys))?;
        }
        write!(
            f,
            " (expected {} row(s), affected {})",
            self.expected_rows, self.affected_rows
        )
    }
}

fn describe_values(values: &[ColumnValue]) -> String {
    values
        .iter()
        .map(|c| format!("{}={}", c.column, c.value.as_text().unwrap_or_else(|| "NULL".to_string())))
        .collect::<Vec<_>>()
        .join(", ")
}

/// The entities behind these commands were modified or deleted by another writer
/// since they were read.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Concurrency conflict in {} command(s): {}", .failed.len(), describe(.failed))]
pub struct ConcurrencyConflict {
    pub failed: Vec<FailedCommand>,
}

impl ConcurrencyConflict {
    pub fn new(failed: Vec<FailedCommand>) -> Self {
        Self { failed }
    }

    /// Flush positions of the failed commands
    pub fn failed_indexes(&self) -> Vec<usize> {
        self.failed.iter().map(|f| f.index).collect()
    }
}

fn describe(failed: &[FailedCommand]) -> String {
    failed
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message() {
        let err = MigrationError::not_found("Migration", "2_AddCol");
        assert_eq!(err.to_string(), "Migration '2_AddCol' was not found");
    }

    #[test]
    fn test_ambiguous_lists_candidates() {
        let err = MigrationError::AmbiguousMigration {
            query: "Col".to_string(),
            candidates: vec!["2_AddCol".to_string(), "4_DropCol".to_string()],
        };
        assert!(err.to_string().contains("2_AddCol, 4_DropCol"));
    }

    #[test]
    fn test_conflict_describes_each_command() {
        let conflict = ConcurrencyConflict::new(vec![FailedCommand {
            index: 2,
            table: "orders".to_string(),
            kind: CommandKind::Update,
            keys: vec![ColumnValue::new("id", 7)],
            concurrency_tokens: vec![ColumnValue::new("version", 3i64)],
            expected_rows: 1,
            affected_rows: 0,
        }]);
        assert_eq!(conflict.failed_indexes(), vec![2]);

        let err: MigrationError = conflict.into();
        assert!(err.is_concurrency_conflict());
        assert!(err.to_string().contains("#2 UPDATE on 'orders' [id=7]"));
    }
}
