//! Model snapshots and the diffing seam.

use serde::{Deserialize, Serialize};

use crate::schema::{ColumnDef, SchemaOperation};

/// Index as recorded in a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexModel {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

/// Table as recorded in a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableModel {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub primary_key: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<IndexModel>,
}

/// Serializable description of the data model at one point in time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSnapshot {
    #[serde(default)]
    pub tables: Vec<TableModel>,
}

impl ModelSnapshot {
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn table(&self, name: &str) -> Option<&TableModel> {
        self.tables.iter().find(|t| t.name == name)
    }
}

/// Computes the schema operations that turn one model into another.
///
/// Supplied by the host; this crate only consumes it.
pub trait ModelDiffer: Send + Sync {
    fn diff(&self, source: &ModelSnapshot, target: &ModelSnapshot) -> Vec<SchemaOperation>;
}

impl<F> ModelDiffer for F
where
    F: Fn(&ModelSnapshot, &ModelSnapshot) -> Vec<SchemaOperation> + Send + Sync,
{
    fn diff(&self, source: &ModelSnapshot, target: &ModelSnapshot) -> Vec<SchemaOperation> {
        self(source, target)
    }
}
