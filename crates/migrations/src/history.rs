//! Persisted record of applied migrations.

use std::collections::BTreeSet;

use tracing::debug;

use crate::backends::{DatabaseExecutor, DatabaseValue, SqlDialect};
use crate::error::MigrationResult;

pub const DEFAULT_HISTORY_TABLE: &str = "__elif_migrations_history";

/// One applied migration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationHistoryRow {
    pub migration_id: String,
    pub product_version: String,
}

impl MigrationHistoryRow {
    pub fn new(migration_id: impl Into<String>, product_version: impl Into<String>) -> Self {
        Self {
            migration_id: migration_id.into(),
            product_version: product_version.into(),
        }
    }
}

/// Reads and writes the history table; never touches the schema it describes
#[derive(Debug, Clone)]
pub struct HistoryRepository {
    table: String,
    dialect: SqlDialect,
}

impl HistoryRepository {
    pub fn new(table: impl Into<String>, dialect: SqlDialect) -> Self {
        Self {
            table: table.into(),
            dialect,
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub async fn ensure_created<E>(&self, executor: &mut E) -> MigrationResult<()>
    where
        E: DatabaseExecutor + ?Sized,
    {
        debug!("Ensuring history table {}", self.table);
        executor.execute(&self.create_if_not_exists_script(), &[]).await?;
        Ok(())
    }

    pub async fn applied_ids<E>(&self, executor: &mut E) -> MigrationResult<BTreeSet<String>>
    where
        E: DatabaseExecutor + ?Sized,
    {
        let (sql, params) = self.build_select_applied();
        let ids = executor.fetch_column(&sql, &params).await?;
        Ok(ids.into_iter().collect())
    }

    pub async fn record<E>(&self, executor: &mut E, row: &MigrationHistoryRow) -> MigrationResult<()>
    where
        E: DatabaseExecutor + ?Sized,
    {
        let (sql, params) = self.build_insert(row);
        executor.execute(&sql, &params).await?;
        Ok(())
    }

    pub async fn unrecord<E>(&self, executor: &mut E, migration_id: &str) -> MigrationResult<()>
    where
        E: DatabaseExecutor + ?Sized,
    {
        let (sql, params) = self.build_delete(migration_id);
        executor.execute(&sql, &params).await?;
        Ok(())
    }

    pub fn build_select_applied(&self) -> (String, Vec<DatabaseValue>) {
        (
            format!(
                "SELECT migration_id FROM {} ORDER BY migration_id",
                self.quoted_table()
            ),
            Vec::new(),
        )
    }

    pub fn build_insert(&self, row: &MigrationHistoryRow) -> (String, Vec<DatabaseValue>) {
        (
            format!(
                "INSERT INTO {} (migration_id, product_version) VALUES ({}, {})",
                self.quoted_table(),
                self.dialect.parameter_placeholder(0),
                self.dialect.parameter_placeholder(1)
            ),
            vec![
                DatabaseValue::String(row.migration_id.clone()),
                DatabaseValue::String(row.product_version.clone()),
            ],
        )
    }

    pub fn build_delete(&self, migration_id: &str) -> (String, Vec<DatabaseValue>) {
        (
            format!(
                "DELETE FROM {} WHERE migration_id = {}",
                self.quoted_table(),
                self.dialect.parameter_placeholder(0)
            ),
            vec![DatabaseValue::String(migration_id.to_string())],
        )
    }

    // Script forms: literals inlined, no parameters.

    pub fn create_if_not_exists_script(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    migration_id VARCHAR(150) NOT NULL PRIMARY KEY,\n    product_version VARCHAR(32) NOT NULL\n)",
            self.quoted_table()
        )
    }

    pub fn insert_script(&self, row: &MigrationHistoryRow) -> String {
        format!(
            "INSERT INTO {} (migration_id, product_version) VALUES ({}, {})",
            self.quoted_table(),
            self.dialect.quote_literal(&row.migration_id),
            self.dialect.quote_literal(&row.product_version)
        )
    }

    pub fn delete_script(&self, migration_id: &str) -> String {
        format!(
            "DELETE FROM {} WHERE migration_id = {}",
            self.quoted_table(),
            self.dialect.quote_literal(migration_id)
        )
    }

    /// Opens a block that only runs when the migration is not yet recorded
    pub fn begin_if_not_exists(&self, migration_id: &str) -> String {
        format!(
            "DO $$\nBEGIN\n    IF NOT EXISTS(SELECT 1 FROM {} WHERE migration_id = {}) THEN",
            self.quoted_table(),
            self.dialect.quote_literal(migration_id)
        )
    }

    /// Opens a block that only runs when the migration is recorded
    pub fn begin_if_exists(&self, migration_id: &str) -> String {
        format!(
            "DO $$\nBEGIN\n    IF EXISTS(SELECT 1 FROM {} WHERE migration_id = {}) THEN",
            self.quoted_table(),
            self.dialect.quote_literal(migration_id)
        )
    }

    pub fn end_if(&self) -> String {
        "    END IF;\nEND $$".to_string()
    }

    fn quoted_table(&self) -> String {
        self.dialect.quote_identifier(&self.table)
    }
}

impl Default for HistoryRepository {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_TABLE, SqlDialect::PostgreSQL)
    }
}
