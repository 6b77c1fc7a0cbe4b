//! Structured schema operations
//!
//! Migrations carry schema changes as data rather than SQL text so one
//! descriptor can be rendered for any supported dialect.

use serde::{Deserialize, Serialize};

/// Portable column type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    BigInt,
    Text,
    Varchar(u32),
    Boolean,
    Uuid,
    Timestamp,
    Double,
    Json,
    Bytes,
}

/// Column definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    /// Default value as a SQL expression
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

fn default_nullable() -> bool {
    true
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            default: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn default_value(mut self, expression: impl Into<String>) -> Self {
        self.default = Some(expression.into());
        self
    }
}

/// A single schema change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum SchemaOperation {
    CreateTable {
        name: String,
        columns: Vec<ColumnDef>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        primary_key: Vec<String>,
    },
    DropTable {
        name: String,
    },
    RenameTable {
        name: String,
        new_name: String,
    },
    AddColumn {
        table: String,
        column: ColumnDef,
    },
    DropColumn {
        table: String,
        name: String,
    },
    AlterColumn {
        table: String,
        column: ColumnDef,
    },
    RenameColumn {
        table: String,
        name: String,
        new_name: String,
    },
    CreateIndex {
        name: String,
        table: String,
        columns: Vec<String>,
        #[serde(default)]
        unique: bool,
    },
    DropIndex {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        table: Option<String>,
    },
    /// Raw SQL, rendered verbatim
    Sql {
        sql: String,
    },
}

impl SchemaOperation {
    pub fn create_table(name: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        SchemaOperation::CreateTable {
            name: name.into(),
            columns,
            primary_key: Vec::new(),
        }
    }

    pub fn drop_table(name: impl Into<String>) -> Self {
        SchemaOperation::DropTable { name: name.into() }
    }

    pub fn add_column(table: impl Into<String>, column: ColumnDef) -> Self {
        SchemaOperation::AddColumn {
            table: table.into(),
            column,
        }
    }

    pub fn drop_column(table: impl Into<String>, name: impl Into<String>) -> Self {
        SchemaOperation::DropColumn {
            table: table.into(),
            name: name.into(),
        }
    }

    pub fn create_index(name: impl Into<String>, table: impl Into<String>, columns: &[&str]) -> Self {
        SchemaOperation::CreateIndex {
            name: name.into(),
            table: table.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique: false,
        }
    }

    pub fn drop_index(name: impl Into<String>) -> Self {
        SchemaOperation::DropIndex {
            name: name.into(),
            table: None,
        }
    }

    pub fn sql(sql: impl Into<String>) -> Self {
        SchemaOperation::Sql { sql: sql.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operations_are_tagged_in_json() {
        let op = SchemaOperation::add_column("users", ColumnDef::new("email", ColumnType::Varchar(255)).not_null());
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["operation"], "add_column");
        assert_eq!(json["column"]["column_type"]["varchar"], 255);

        let parsed: SchemaOperation = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, op);
    }

    #[test]
    fn test_columns_default_to_nullable() {
        let column: ColumnDef = serde_json::from_str(r#"{"name":"bio","column_type":"text"}"#).unwrap();
        assert!(column.nullable);
        assert!(column.default.is_none());
    }
}
