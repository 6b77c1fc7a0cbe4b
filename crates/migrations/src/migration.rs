//! Migration descriptors and id helpers.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{MigrationError, MigrationResult};
use crate::model::ModelSnapshot;
use crate::schema::SchemaOperation;

/// Id that names the database before any migration
pub const INITIAL_DATABASE: &str = "0";

/// File holding the model snapshot next to the migration descriptors
pub const SNAPSHOT_FILE_NAME: &str = "model_snapshot.json";

const ID_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

static NAME_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid name pattern"));
static ID_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]+_[A-Za-z_][A-Za-z0-9_]*$").expect("valid id pattern"));

/// A versioned schema change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Migration {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub up: Vec<SchemaOperation>,
    #[serde(default)]
    pub down: Vec<SchemaOperation>,
    /// Model as of this migration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_model: Option<ModelSnapshot>,
}

impl Migration {
    /// Build a migration from an id; the name is taken from the id
    pub fn new(id: impl Into<String>) -> MigrationResult<Self> {
        let id = id.into();
        validate_id(&id)?;
        Ok(Self {
            name: get_name(&id).to_string(),
            id,
            namespace: None,
            up: Vec::new(),
            down: Vec::new(),
            target_model: None,
        })
    }

    pub fn up(mut self, operations: Vec<SchemaOperation>) -> Self {
        self.up = operations;
        self
    }

    pub fn down(mut self, operations: Vec<SchemaOperation>) -> Self {
        self.down = operations;
        self
    }

    pub fn with_target_model(mut self, model: ModelSnapshot) -> Self {
        self.target_model = Some(model);
        self
    }

    pub fn info(&self) -> MigrationInfo {
        MigrationInfo {
            id: self.id.clone(),
            name: self.name.clone(),
        }
    }

    /// Descriptor file name
    pub fn file_name(&self) -> String {
        format!("{}.json", self.id)
    }
}

/// Read-only listing projection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationInfo {
    pub id: String,
    pub name: String,
}

/// Paths written or removed by add/remove
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationFiles {
    pub migration_id: String,
    pub migration_file: Option<PathBuf>,
    pub snapshot_file: Option<PathBuf>,
}

/// `YYYYMMDDHHMMSS_Name`
pub fn generate_id(name: &str, now: DateTime<Utc>) -> String {
    format!("{}_{}", now.format(ID_TIMESTAMP_FORMAT), name)
}

/// Name part of an id; ids without a numeric prefix are returned whole
pub fn get_name(id: &str) -> &str {
    match id.split_once('_') {
        Some((prefix, name)) if !prefix.is_empty() && prefix.chars().all(|c| c.is_ascii_digit()) => name,
        _ => id,
    }
}

pub fn is_valid_id(id: &str) -> bool {
    ID_PATTERN.is_match(id)
}

pub fn validate_id(id: &str) -> MigrationResult<()> {
    if is_valid_id(id) {
        Ok(())
    } else {
        Err(MigrationError::Validation(format!(
            "'{}' is not a valid migration id; expected <timestamp>_<Name>",
            id
        )))
    }
}

pub fn validate_name(name: &str) -> MigrationResult<()> {
    if name.is_empty() {
        return Err(MigrationError::Validation("A migration name is required".to_string()));
    }
    if !NAME_PATTERN.is_match(name) {
        return Err(MigrationError::Validation(format!(
            "'{}' is not a valid migration name; use letters, digits and underscores",
            name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_generate_id_is_timestamp_prefixed() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(generate_id("AddUsers", now), "20240309140507_AddUsers");
    }

    #[test]
    fn test_get_name() {
        assert_eq!(get_name("20240309140507_AddUsers"), "AddUsers");
        assert_eq!(get_name("2_Add_Col"), "Add_Col");
        assert_eq!(get_name("AddUsers"), "AddUsers");
    }

    #[test]
    fn test_name_validation() {
        assert!(validate_name("AddUsers").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("add users").is_err());
        assert!(validate_name("1st").is_err());
    }

    #[test]
    fn test_new_rejects_malformed_id() {
        assert!(Migration::new("1_Init").is_ok());
        assert!(matches!(Migration::new("Init"), Err(MigrationError::Validation(_))));
    }
}
