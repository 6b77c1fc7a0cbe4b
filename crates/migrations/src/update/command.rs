//! Row-level write intents produced by change tracking.

use std::fmt;

use crate::backends::DatabaseValue;

/// The kind of write a command performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandKind::Insert => write!(f, "INSERT"),
            CommandKind::Update => write!(f, "UPDATE"),
            CommandKind::Delete => write!(f, "DELETE"),
        }
    }
}

/// A single column/value pair
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnValue {
    pub column: String,
    pub value: DatabaseValue,
}

impl ColumnValue {
    pub fn new(column: impl Into<String>, value: impl Into<DatabaseValue>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }
}

/// One row-level write: the target table, the key identifying the row, the
/// values written and the concurrency tokens the row must still carry.
#[derive(Debug, Clone, PartialEq)]
pub struct ModificationCommand {
    table: String,
    schema: Option<String>,
    kind: CommandKind,
    keys: Vec<ColumnValue>,
    values: Vec<ColumnValue>,
    concurrency_tokens: Vec<ColumnValue>,
    expected_rows: u64,
}

impl ModificationCommand {
    fn new(kind: CommandKind, table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            schema: None,
            kind,
            keys: Vec::new(),
            values: Vec::new(),
            concurrency_tokens: Vec::new(),
            expected_rows: 1,
        }
    }

    /// Insert a new row
    pub fn insert(table: impl Into<String>) -> Self {
        Self::new(CommandKind::Insert, table)
    }

    /// Update the row identified by its key
    pub fn update(table: impl Into<String>) -> Self {
        Self::new(CommandKind::Update, table)
    }

    /// Delete the row identified by its key
    pub fn delete(table: impl Into<String>) -> Self {
        Self::new(CommandKind::Delete, table)
    }

    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Column written by an insert. For inserts the key columns are values too.
    pub fn value(mut self, column: impl Into<String>, value: impl Into<DatabaseValue>) -> Self {
        self.values.push(ColumnValue::new(column, value));
        self
    }

    /// Column assigned by an update
    pub fn set(self, column: impl Into<String>, value: impl Into<DatabaseValue>) -> Self {
        self.value(column, value)
    }

    /// Key column matched by updates and deletes
    pub fn key(mut self, column: impl Into<String>, value: impl Into<DatabaseValue>) -> Self {
        self.keys.push(ColumnValue::new(column, value));
        self
    }

    /// Original value of a concurrency token; the row only matches if it is unchanged
    pub fn concurrency_token(mut self, column: impl Into<String>, original: impl Into<DatabaseValue>) -> Self {
        self.concurrency_tokens.push(ColumnValue::new(column, original));
        self
    }

    /// Override the affected-row count this command must produce
    pub fn expect_rows(mut self, rows: u64) -> Self {
        self.expected_rows = rows;
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn schema_name(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn keys(&self) -> &[ColumnValue] {
        &self.keys
    }

    pub fn values(&self) -> &[ColumnValue] {
        &self.values
    }

    pub fn concurrency_tokens(&self) -> &[ColumnValue] {
        &self.concurrency_tokens
    }

    pub fn expected_rows(&self) -> u64 {
        self.expected_rows
    }

    /// Whether both commands may write the same row, so one would observe the other.
    /// Two inserts never do; a keyless update or delete matches every row of its table.
    pub fn may_touch_same_row(&self, other: &ModificationCommand) -> bool {
        if self.table != other.table || self.schema != other.schema {
            return false;
        }

        let (keyed, other) = match (self.kind, other.kind) {
            (CommandKind::Insert, CommandKind::Insert) => return false,
            (CommandKind::Insert, _) => (other, self),
            _ => (self, other),
        };

        let row = other.row_values();
        keyed.keys.iter().all(|key| match row.iter().find(|c| c.column == key.column) {
            Some(column) => column.value == key.value,
            None => true,
        })
    }

    fn row_values(&self) -> &[ColumnValue] {
        match self.kind {
            CommandKind::Insert => &self.values,
            CommandKind::Update | CommandKind::Delete => &self.keys,
        }
    }

    /// Number of bind parameters this command renders to
    pub fn parameter_count(&self) -> usize {
        let predicates = self
            .keys
            .iter()
            .chain(self.concurrency_tokens.iter())
            .filter(|c| !c.value.is_null())
            .count();

        match self.kind {
            CommandKind::Insert => self.values.len(),
            CommandKind::Update => self.values.len() + predicates,
            CommandKind::Delete => predicates,
        }
    }
}
