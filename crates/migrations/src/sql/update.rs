//! Rendering of modification commands into parameterized statements.

use crate::backends::{CountSource, DatabaseValue, RenderedBatch, SqlDialect};
use crate::error::{MigrationError, MigrationResult};
use crate::update::{ColumnValue, CommandKind, ModificationCommand};

/// Renders insert/update/delete commands for one dialect
#[derive(Debug, Clone, Copy)]
pub struct UpdateSqlGenerator {
    dialect: SqlDialect,
}

impl UpdateSqlGenerator {
    pub fn new(dialect: SqlDialect) -> Self {
        Self { dialect }
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    /// Render a single command as a standalone statement
    pub fn render_command(&self, command: &ModificationCommand) -> (String, Vec<DatabaseValue>) {
        let mut params = Vec::new();
        let sql = self.render_into(command, &mut params);
        (sql, params)
    }

    /// Render commands for one round trip.
    ///
    /// A single command is the plain statement and reports rows affected.
    /// Several commands become one statement of data-modifying CTEs whose
    /// result row carries one count per command.
    pub fn render_batch(&self, commands: &[ModificationCommand]) -> MigrationResult<RenderedBatch> {
        match commands {
            [] => Err(MigrationError::InvalidOperation(
                "Cannot render an empty command batch".to_string(),
            )),
            [command] => {
                let (sql, params) = self.render_command(command);
                Ok(RenderedBatch {
                    sql,
                    params,
                    counts: CountSource::RowsAffected,
                })
            }
            _ if !matches!(self.dialect, SqlDialect::PostgreSQL) => Err(MigrationError::InvalidOperation(format!(
                "{:?} cannot execute {} commands in one batch",
                self.dialect,
                commands.len()
            ))),
            _ => {
                let mut params = Vec::new();
                let ctes: Vec<String> = commands
                    .iter()
                    .enumerate()
                    .map(|(i, command)| {
                        let statement = self.render_into(command, &mut params);
                        format!("c{} AS ({} RETURNING 1)", i, statement)
                    })
                    .collect();
                let counts: Vec<String> = (0..commands.len())
                    .map(|i| format!("(SELECT COUNT(*) FROM c{})", i))
                    .collect();

                Ok(RenderedBatch {
                    sql: format!("WITH {} SELECT {}", ctes.join(", "), counts.join(", ")),
                    params,
                    counts: CountSource::CountsRow {
                        columns: commands.len(),
                    },
                })
            }
        }
    }

    fn render_into(&self, command: &ModificationCommand, params: &mut Vec<DatabaseValue>) -> String {
        let table = self.table_name(command);
        match command.kind() {
            CommandKind::Insert => {
                if command.values().is_empty() {
                    return format!("INSERT INTO {} DEFAULT VALUES", table);
                }
                let columns: Vec<String> = command
                    .values()
                    .iter()
                    .map(|c| self.dialect.quote_identifier(&c.column))
                    .collect();
                let placeholders: Vec<String> = command
                    .values()
                    .iter()
                    .map(|c| self.bind(params, &c.value))
                    .collect();
                format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    table,
                    columns.join(", "),
                    placeholders.join(", ")
                )
            }
            CommandKind::Update => {
                let assignments: Vec<String> = command
                    .values()
                    .iter()
                    .map(|c| format!("{} = {}", self.dialect.quote_identifier(&c.column), self.bind(params, &c.value)))
                    .collect();
                let predicate = self.where_clause(command, params);
                format!("UPDATE {} SET {}{}", table, assignments.join(", "), predicate)
            }
            CommandKind::Delete => {
                let predicate = self.where_clause(command, params);
                format!("DELETE FROM {}{}", table, predicate)
            }
        }
    }

    fn where_clause(&self, command: &ModificationCommand, params: &mut Vec<DatabaseValue>) -> String {
        let conditions: Vec<String> = command
            .keys()
            .iter()
            .chain(command.concurrency_tokens().iter())
            .map(|c| self.condition(c, params))
            .collect();

        if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        }
    }

    fn condition(&self, column: &ColumnValue, params: &mut Vec<DatabaseValue>) -> String {
        let name = self.dialect.quote_identifier(&column.column);
        if column.value.is_null() {
            format!("{} IS NULL", name)
        } else {
            format!("{} = {}", name, self.bind(params, &column.value))
        }
    }

    fn bind(&self, params: &mut Vec<DatabaseValue>, value: &DatabaseValue) -> String {
        let placeholder = self.dialect.parameter_placeholder(params.len());
        params.push(value.clone());
        placeholder
    }

    fn table_name(&self, command: &ModificationCommand) -> String {
        match command.schema_name() {
            Some(schema) => format!(
                "{}.{}",
                self.dialect.quote_identifier(schema),
                self.dialect.quote_identifier(command.table())
            ),
            None => self.dialect.quote_identifier(command.table()),
        }
    }
}
