//! DDL rendering for schema operations.

use crate::backends::SqlDialect;
use crate::error::{MigrationError, MigrationResult};
use crate::schema::{ColumnDef, ColumnType, SchemaOperation};

/// Renders schema operations to dialect-specific statements
#[derive(Debug, Clone, Copy)]
pub struct MigrationsSqlGenerator {
    dialect: SqlDialect,
}

impl MigrationsSqlGenerator {
    pub fn new(dialect: SqlDialect) -> Self {
        Self { dialect }
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    /// One statement per operation, in order, without trailing semicolons.
    /// Fails when an operation cannot be expressed in the dialect.
    pub fn generate(&self, operations: &[SchemaOperation]) -> MigrationResult<Vec<String>> {
        let mut statements = Vec::new();
        for operation in operations {
            statements.extend(self.generate_operation(operation)?);
        }
        Ok(statements)
    }

    fn generate_operation(&self, operation: &SchemaOperation) -> MigrationResult<Vec<String>> {
        let q = |name: &str| self.dialect.quote_identifier(name);

        Ok(match operation {
            SchemaOperation::CreateTable {
                name,
                columns,
                primary_key,
            } => {
                let mut parts: Vec<String> = columns.iter().map(|c| self.column_definition(c)).collect();
                if !primary_key.is_empty() {
                    let keys: Vec<String> = primary_key.iter().map(|k| q(k)).collect();
                    parts.push(format!("PRIMARY KEY ({})", keys.join(", ")));
                }
                vec![format!("CREATE TABLE {} (\n    {}\n)", q(name), parts.join(",\n    "))]
            }
            SchemaOperation::DropTable { name } => vec![format!("DROP TABLE {}", q(name))],
            SchemaOperation::RenameTable { name, new_name } => {
                vec![format!("ALTER TABLE {} RENAME TO {}", q(name), q(new_name))]
            }
            SchemaOperation::AddColumn { table, column } => {
                vec![format!("ALTER TABLE {} ADD COLUMN {}", q(table), self.column_definition(column))]
            }
            SchemaOperation::DropColumn { table, name } => {
                vec![format!("ALTER TABLE {} DROP COLUMN {}", q(table), q(name))]
            }
            SchemaOperation::AlterColumn { table, column } => self.alter_column(table, column)?,
            SchemaOperation::RenameColumn { table, name, new_name } => vec![format!(
                "ALTER TABLE {} RENAME COLUMN {} TO {}",
                q(table),
                q(name),
                q(new_name)
            )],
            SchemaOperation::CreateIndex {
                name,
                table,
                columns,
                unique,
            } => {
                let columns: Vec<String> = columns.iter().map(|c| q(c)).collect();
                vec![format!(
                    "CREATE {}INDEX {} ON {} ({})",
                    if *unique { "UNIQUE " } else { "" },
                    q(name),
                    q(table),
                    columns.join(", ")
                )]
            }
            SchemaOperation::DropIndex { name, .. } => vec![format!("DROP INDEX {}", q(name))],
            SchemaOperation::Sql { sql } => vec![sql.trim().trim_end_matches(';').to_string()],
        })
    }

    fn alter_column(&self, table: &str, column: &ColumnDef) -> MigrationResult<Vec<String>> {
        if self.dialect == SqlDialect::SQLite {
            // Dropping and re-adding the column would discard its values.
            return Err(MigrationError::Validation(format!(
                "SQLite cannot alter column '{}' of table '{}'; rebuild the table with a raw SQL operation",
                column.name, table
            )));
        }

        let table = self.dialect.quote_identifier(table);
        let name = self.dialect.quote_identifier(&column.name);

        let mut statements = vec![format!(
            "ALTER TABLE {} ALTER COLUMN {} TYPE {}",
            table,
            name,
            self.column_type(&column.column_type)
        )];
        statements.push(format!(
            "ALTER TABLE {} ALTER COLUMN {} {} NOT NULL",
            table,
            name,
            if column.nullable { "DROP" } else { "SET" }
        ));
        statements.push(match &column.default {
            Some(default) => format!("ALTER TABLE {} ALTER COLUMN {} SET DEFAULT {}", table, name, default),
            None => format!("ALTER TABLE {} ALTER COLUMN {} DROP DEFAULT", table, name),
        });
        Ok(statements)
    }

    fn column_definition(&self, column: &ColumnDef) -> String {
        let mut definition = format!(
            "{} {}",
            self.dialect.quote_identifier(&column.name),
            self.column_type(&column.column_type)
        );
        if !column.nullable {
            definition.push_str(" NOT NULL");
        }
        if let Some(default) = &column.default {
            definition.push_str(&format!(" DEFAULT {}", default));
        }
        definition
    }

    fn column_type(&self, column_type: &ColumnType) -> String {
        match (self.dialect, column_type) {
            (_, ColumnType::Integer) => "INTEGER".to_string(),
            (_, ColumnType::BigInt) => "BIGINT".to_string(),
            (_, ColumnType::Text) => "TEXT".to_string(),
            (_, ColumnType::Varchar(len)) => format!("VARCHAR({})", len),
            (_, ColumnType::Boolean) => "BOOLEAN".to_string(),
            (SqlDialect::PostgreSQL, ColumnType::Uuid) => "UUID".to_string(),
            (SqlDialect::SQLite, ColumnType::Uuid) => "TEXT".to_string(),
            (SqlDialect::PostgreSQL, ColumnType::Timestamp) => "TIMESTAMPTZ".to_string(),
            (SqlDialect::SQLite, ColumnType::Timestamp) => "TEXT".to_string(),
            (SqlDialect::PostgreSQL, ColumnType::Double) => "DOUBLE PRECISION".to_string(),
            (SqlDialect::SQLite, ColumnType::Double) => "REAL".to_string(),
            (SqlDialect::PostgreSQL, ColumnType::Json) => "JSONB".to_string(),
            (SqlDialect::SQLite, ColumnType::Json) => "TEXT".to_string(),
            (SqlDialect::PostgreSQL, ColumnType::Bytes) => "BYTEA".to_string(),
            (SqlDialect::SQLite, ColumnType::Bytes) => "BLOB".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_table_with_primary_key() {
        let generator = MigrationsSqlGenerator::new(SqlDialect::PostgreSQL);
        let op = SchemaOperation::CreateTable {
            name: "users".to_string(),
            columns: vec![
                ColumnDef::new("id", ColumnType::Uuid).not_null(),
                ColumnDef::new("created_at", ColumnType::Timestamp)
                    .not_null()
                    .default_value("NOW()"),
            ],
            primary_key: vec!["id".to_string()],
        };

        let sql = generator.generate(&[op]).unwrap();
        assert_eq!(
            sql,
            vec!["CREATE TABLE \"users\" (\n    \"id\" UUID NOT NULL,\n    \"created_at\" TIMESTAMPTZ NOT NULL DEFAULT NOW(),\n    PRIMARY KEY (\"id\")\n)"]
        );
    }

    #[test]
    fn test_types_follow_dialect() {
        let column = ColumnDef::new("payload", ColumnType::Json);
        let pg = MigrationsSqlGenerator::new(SqlDialect::PostgreSQL).generate(&[SchemaOperation::add_column("events", column.clone())]).unwrap();
        let lite = MigrationsSqlGenerator::new(SqlDialect::SQLite).generate(&[SchemaOperation::add_column("events", column)]).unwrap();
        assert_eq!(pg, vec!["ALTER TABLE \"events\" ADD COLUMN \"payload\" JSONB"]);
        assert_eq!(lite, vec!["ALTER TABLE \"events\" ADD COLUMN \"payload\" TEXT"]);
    }

    #[test]
    fn test_unique_index_and_raw_sql() {
        let generator = MigrationsSqlGenerator::new(SqlDialect::SQLite);
        let ops = vec![
            SchemaOperation::CreateIndex {
                name: "idx_users_email".to_string(),
                table: "users".to_string(),
                columns: vec!["email".to_string()],
                unique: true,
            },
            SchemaOperation::sql("UPDATE users SET email = lower(email);"),
        ];
        assert_eq!(
            generator.generate(&ops).unwrap(),
            vec![
                "CREATE UNIQUE INDEX \"idx_users_email\" ON \"users\" (\"email\")".to_string(),
                "UPDATE users SET email = lower(email)".to_string(),
            ]
        );
    }

    #[test]
    fn test_alter_column_expands_to_several_statements_on_postgres() {
        let generator = MigrationsSqlGenerator::new(SqlDialect::PostgreSQL);
        let op = SchemaOperation::AlterColumn {
            table: "users".to_string(),
            column: ColumnDef::new("name", ColumnType::Varchar(100)).not_null(),
        };
        let sql = generator.generate(&[op]).unwrap();
        assert_eq!(sql.len(), 3);
        assert!(sql[1].ends_with("SET NOT NULL"));
        assert!(sql[2].ends_with("DROP DEFAULT"));
    }

    #[test]
    fn test_alter_column_is_refused_on_sqlite() {
        let generator = MigrationsSqlGenerator::new(SqlDialect::SQLite);
        let ops = vec![
            SchemaOperation::add_column("users", ColumnDef::new("email", ColumnType::Text)),
            SchemaOperation::AlterColumn {
                table: "users".to_string(),
                column: ColumnDef::new("name", ColumnType::Varchar(100)),
            },
        ];
        let err = generator.generate(&ops).unwrap_err();
        assert!(matches!(err, MigrationError::Validation(_)));
        assert!(err.to_string().contains("'name'"));
    }
}
