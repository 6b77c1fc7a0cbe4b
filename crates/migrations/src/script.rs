//! SQL script generation for a range of migrations.

use std::sync::Arc;

use crate::catalog::{MigrationCatalog, MigrationTarget};
use crate::error::{MigrationError, MigrationResult};
use crate::history::{HistoryRepository, MigrationHistoryRow};
use crate::migration::Migration;
use crate::sql::MigrationsSqlGenerator;

/// Renders the SQL that moves a database from one migration to another
pub struct ScriptGenerator {
    catalog: Arc<MigrationCatalog>,
    history: HistoryRepository,
    sql: MigrationsSqlGenerator,
    product_version: String,
}

impl ScriptGenerator {
    pub fn new(
        catalog: Arc<MigrationCatalog>,
        history: HistoryRepository,
        sql: MigrationsSqlGenerator,
        product_version: impl Into<String>,
    ) -> Self {
        Self {
            catalog,
            history,
            sql,
            product_version: product_version.into(),
        }
    }

    /// `from` defaults to the initial database, `to` to the latest migration
    pub fn generate(&self, from: Option<&str>, to: Option<&str>, idempotent: bool) -> MigrationResult<String> {
        if idempotent && !self.sql.dialect().supports_conditional_blocks() {
            return Err(MigrationError::Validation(format!(
                "Idempotent scripts are not supported for {:?}",
                self.sql.dialect()
            )));
        }

        let from = match from {
            Some(from) => self.catalog.find_id(from)?,
            None => MigrationTarget::Initial,
        };
        let to = match to {
            Some(to) => self.catalog.find_id(to)?,
            None => match self.catalog.last() {
                Some(last) => MigrationTarget::Id(last.id.clone()),
                None => MigrationTarget::Initial,
            },
        };

        let from_len = self.catalog.prefix_len(&from);
        let to_len = self.catalog.prefix_len(&to);
        let migrations = self.catalog.migrations();

        let mut script = String::new();
        if from_len == to_len {
            return Ok(script);
        }

        if from == MigrationTarget::Initial {
            push_statement(&mut script, &self.history.create_if_not_exists_script());
            script.push('\n');
        }

        if to_len > from_len {
            for migration in &migrations[from_len..to_len] {
                self.append_up(&mut script, migration, idempotent)?;
            }
        } else {
            for migration in migrations[to_len..from_len].iter().rev() {
                self.append_down(&mut script, migration, idempotent)?;
            }
        }

        Ok(script)
    }

    fn append_up(&self, script: &mut String, migration: &Migration, idempotent: bool) -> MigrationResult<()> {
        let row = MigrationHistoryRow::new(&migration.id, &self.product_version);
        let mut statements = self.sql.generate(&migration.up)?;
        statements.push(self.history.insert_script(&row));

        for statement in statements {
            if idempotent {
                self.push_guarded(script, &self.history.begin_if_not_exists(&migration.id), &statement);
            } else {
                push_statement(script, &statement);
            }
        }
        script.push('\n');
        Ok(())
    }

    fn append_down(&self, script: &mut String, migration: &Migration, idempotent: bool) -> MigrationResult<()> {
        let mut statements = self.sql.generate(&migration.down)?;
        statements.push(self.history.delete_script(&migration.id));

        for statement in statements {
            if idempotent {
                self.push_guarded(script, &self.history.begin_if_exists(&migration.id), &statement);
            } else {
                push_statement(script, &statement);
            }
        }
        script.push('\n');
        Ok(())
    }

    fn push_guarded(&self, script: &mut String, guard: &str, statement: &str) {
        script.push_str(guard);
        script.push('\n');
        for line in statement.lines() {
            script.push_str("    ");
            script.push_str(line);
            script.push('\n');
        }
        // The closing line needs the terminator inside the block too.
        if script.ends_with('\n') {
            script.pop();
        }
        script.push_str(";\n");
        push_statement(script, &self.history.end_if());
    }
}

fn push_statement(script: &mut String, statement: &str) {
    script.push_str(statement);
    script.push_str(";\n");
}
