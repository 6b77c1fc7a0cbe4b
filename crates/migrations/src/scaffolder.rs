//! Migration scaffolding
//!
//! Diffs the live model against the most recent snapshot to produce a new
//! migration, and removes the latest migration when it has not been applied.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::catalog::MigrationCatalog;
use crate::error::{MigrationError, MigrationResult};
use crate::migration::{generate_id, validate_name, Migration, MigrationFiles, SNAPSHOT_FILE_NAME};
use crate::model::{ModelDiffer, ModelSnapshot};

/// A migration produced by the scaffolder but not yet written
#[derive(Debug, Clone, PartialEq)]
pub struct ScaffoldedMigration {
    pub migration: Migration,
    pub snapshot: ModelSnapshot,
}

impl ScaffoldedMigration {
    /// No schema change between the snapshot and the current model
    pub fn is_empty(&self) -> bool {
        self.migration.up.is_empty() && self.migration.down.is_empty()
    }
}

pub struct MigrationsScaffolder {
    catalog: Arc<MigrationCatalog>,
    differ: Option<Arc<dyn ModelDiffer>>,
    model: ModelSnapshot,
}

impl MigrationsScaffolder {
    pub fn new(catalog: Arc<MigrationCatalog>, model: ModelSnapshot) -> Self {
        Self {
            catalog,
            differ: None,
            model,
        }
    }

    /// Required for scaffolding; removal works without one
    pub fn with_differ(mut self, differ: Arc<dyn ModelDiffer>) -> Self {
        self.differ = Some(differ);
        self
    }

    pub fn scaffold_migration(&self, name: &str, namespace: Option<&str>) -> MigrationResult<ScaffoldedMigration> {
        self.scaffold_at(name, namespace, Utc::now())
    }

    /// Scaffold with an explicit id timestamp
    pub fn scaffold_at(&self, name: &str, namespace: Option<&str>, now: DateTime<Utc>) -> MigrationResult<ScaffoldedMigration> {
        validate_name(name)?;
        let differ = self.differ.as_ref().ok_or_else(|| {
            MigrationError::Configuration("No model differ is registered; cannot scaffold migrations".to_string())
        })?;

        if self.catalog.migrations().iter().any(|m| m.name == name) {
            return Err(MigrationError::DuplicateMigration(format!(
                "The name '{}' is used by an existing migration",
                name
            )));
        }

        let id = generate_id(name, now);
        if self.catalog.position(&id).is_some() {
            return Err(MigrationError::DuplicateMigration(id));
        }

        let empty = ModelSnapshot::default();
        let previous = self.catalog.latest_snapshot().unwrap_or(&empty);
        let up = differ.diff(previous, &self.model);
        let down = differ.diff(&self.model, previous);
        debug!("Scaffolded '{}' with {} up and {} down operation(s)", id, up.len(), down.len());

        let mut migration = Migration::new(id)?
            .up(up)
            .down(down)
            .with_target_model(self.model.clone());
        migration.namespace = namespace.map(str::to_string);

        Ok(ScaffoldedMigration {
            migration,
            snapshot: self.model.clone(),
        })
    }

    /// Write the descriptor and the model snapshot
    pub fn save(&self, dir: &Path, scaffolded: &ScaffoldedMigration) -> MigrationResult<MigrationFiles> {
        fs::create_dir_all(dir)?;

        let migration_file = dir.join(scaffolded.migration.file_name());
        fs::write(&migration_file, serde_json::to_string_pretty(&scaffolded.migration)?)?;

        let snapshot_file = dir.join(SNAPSHOT_FILE_NAME);
        fs::write(&snapshot_file, serde_json::to_string_pretty(&scaffolded.snapshot)?)?;

        info!("Wrote migration {}", migration_file.display());
        Ok(MigrationFiles {
            migration_id: scaffolded.migration.id.clone(),
            migration_file: Some(migration_file),
            snapshot_file: Some(snapshot_file),
        })
    }

    /// Remove the latest migration unless the history records it.
    /// Only paths that were deleted or rewritten are reported.
    pub fn remove_migration(&self, dir: &Path, applied_ids: &BTreeSet<String>) -> MigrationResult<MigrationFiles> {
        let migrations = self.catalog.migrations();
        let last = migrations
            .last()
            .ok_or_else(|| MigrationError::not_found("Migration", "(latest)"))?;

        if applied_ids.contains(&last.id) {
            return Err(MigrationError::CannotRemoveAppliedMigration(last.id.clone()));
        }

        let migration_path = dir.join(last.file_name());
        let migration_file = if migration_path.exists() {
            fs::remove_file(&migration_path)?;
            Some(migration_path)
        } else {
            None
        };

        let snapshot_file: PathBuf = dir.join(SNAPSHOT_FILE_NAME);
        let previous_model = migrations[..migrations.len() - 1]
            .iter()
            .rev()
            .find_map(|m| m.target_model.as_ref());

        let snapshot_file = match previous_model {
            Some(model) => {
                fs::write(&snapshot_file, serde_json::to_string_pretty(model)?)?;
                Some(snapshot_file)
            }
            None if snapshot_file.exists() => {
                fs::remove_file(&snapshot_file)?;
                Some(snapshot_file)
            }
            None => None,
        };

        info!("Removed migration '{}'", last.id);
        Ok(MigrationFiles {
            migration_id: last.id.clone(),
            migration_file,
            snapshot_file,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TableModel;
    use crate::schema::SchemaOperation;
    use chrono::TimeZone;
    use tempfile::TempDir;

    /// Emits one create per table missing from the source and one drop per table missing from the target
    fn table_differ() -> Arc<dyn ModelDiffer> {
        Arc::new(|source: &ModelSnapshot, target: &ModelSnapshot| {
            let mut ops = Vec::new();
            for table in &target.tables {
                if source.table(&table.name).is_none() {
                    ops.push(SchemaOperation::create_table(&table.name, table.columns.clone()));
                }
            }
            for table in &source.tables {
                if target.table(&table.name).is_none() {
                    ops.push(SchemaOperation::drop_table(&table.name));
                }
            }
            ops
        })
    }

    fn model(tables: &[&str]) -> ModelSnapshot {
        ModelSnapshot {
            tables: tables
                .iter()
                .map(|name| TableModel {
                    name: name.to_string(),
                    columns: Vec::new(),
                    primary_key: Vec::new(),
                    indexes: Vec::new(),
                })
                .collect(),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()
    }

    #[test]
    fn test_scaffold_diffs_against_latest_snapshot() {
        let catalog = MigrationCatalog::from_migrations(vec![Migration::new("1_Init")
            .unwrap()
            .with_target_model(model(&["users"]))])
        .unwrap();
        let scaffolder = MigrationsScaffolder::new(Arc::new(catalog), model(&["users", "orders"])).with_differ(table_differ());

        let scaffolded = scaffolder.scaffold_at("AddOrders", Some("App.Data"), now()).unwrap();
        assert_eq!(scaffolded.migration.id, "20240102030405_AddOrders");
        assert_eq!(scaffolded.migration.up, vec![SchemaOperation::create_table("orders", Vec::new())]);
        assert_eq!(scaffolded.migration.down, vec![SchemaOperation::drop_table("orders")]);
        assert_eq!(scaffolded.migration.namespace.as_deref(), Some("App.Data"));
        assert!(!scaffolded.is_empty());
    }

    #[test]
    fn test_unchanged_model_is_empty() {
        let scaffolder = MigrationsScaffolder::new(Arc::default(), ModelSnapshot::default()).with_differ(table_differ());
        assert!(scaffolder.scaffold_at("Nothing", None, now()).unwrap().is_empty());
    }

    #[test]
    fn test_name_rules() {
        let catalog = MigrationCatalog::from_migrations(vec![Migration::new("1_Init").unwrap()]).unwrap();
        let scaffolder = MigrationsScaffolder::new(Arc::new(catalog), ModelSnapshot::default()).with_differ(table_differ());

        assert!(matches!(scaffolder.scaffold_at("", None, now()), Err(MigrationError::Validation(_))));
        assert!(matches!(scaffolder.scaffold_at("Init", None, now()), Err(MigrationError::DuplicateMigration(_))));
    }

    #[test]
    fn test_save_then_remove_restores_previous_snapshot() {
        let dir = TempDir::new().unwrap();

        let first = MigrationsScaffolder::new(Arc::default(), model(&["users"])).with_differ(table_differ());
        let scaffolded = first.scaffold_at("Init", None, now()).unwrap();
        first.save(dir.path(), &scaffolded).unwrap();

        let catalog = Arc::new(MigrationCatalog::load_from_dir(dir.path()).unwrap());
        let second = MigrationsScaffolder::new(catalog, model(&["users", "orders"])).with_differ(table_differ());
        let later = Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap();
        let files = second.save(dir.path(), &second.scaffold_at("AddOrders", None, later).unwrap()).unwrap();
        assert!(files.migration_file.unwrap().exists());

        let catalog = Arc::new(MigrationCatalog::load_from_dir(dir.path()).unwrap());
        let remover = MigrationsScaffolder::new(catalog, ModelSnapshot::default());
        let removed = remover.remove_migration(dir.path(), &BTreeSet::new()).unwrap();
        assert_eq!(removed.migration_id, "20240103000000_AddOrders");
        assert!(removed.migration_file.is_some());
        assert_eq!(removed.snapshot_file, Some(dir.path().join(SNAPSHOT_FILE_NAME)));

        let snapshot: ModelSnapshot =
            serde_json::from_str(&fs::read_to_string(dir.path().join(SNAPSHOT_FILE_NAME)).unwrap()).unwrap();
        assert_eq!(snapshot, model(&["users"]));
    }

    #[test]
    fn test_remove_applied_migration_changes_nothing() {
        let dir = TempDir::new().unwrap();
        let scaffolder = MigrationsScaffolder::new(Arc::default(), model(&["users"])).with_differ(table_differ());
        let files = scaffolder.save(dir.path(), &scaffolder.scaffold_at("Init", None, now()).unwrap()).unwrap();

        let catalog = Arc::new(MigrationCatalog::load_from_dir(dir.path()).unwrap());
        let remover = MigrationsScaffolder::new(catalog, ModelSnapshot::default());
        let applied: BTreeSet<String> = [files.migration_id.clone()].into_iter().collect();

        let err = remover.remove_migration(dir.path(), &applied).unwrap_err();
        assert!(matches!(err, MigrationError::CannotRemoveAppliedMigration(_)));
        assert!(files.migration_file.unwrap().exists());
        assert!(files.snapshot_file.unwrap().exists());
    }

    #[test]
    fn test_scaffold_requires_differ() {
        let scaffolder = MigrationsScaffolder::new(Arc::default(), ModelSnapshot::default());
        assert!(matches!(
            scaffolder.scaffold_at("Init", None, now()),
            Err(MigrationError::Configuration(_))
        ));
    }

    #[test]
    fn test_remove_reports_only_touched_files() {
        let dir = TempDir::new().unwrap();
        let catalog = MigrationCatalog::from_migrations(vec![Migration::new("1_Init").unwrap()]).unwrap();
        let scaffolder = MigrationsScaffolder::new(Arc::new(catalog), model(&[]));

        let files = scaffolder.remove_migration(dir.path(), &BTreeSet::new()).unwrap();
        assert_eq!(files.migration_id, "1_Init");
        assert_eq!(files.migration_file, None);
        assert_eq!(files.snapshot_file, None);
    }

    #[test]
    fn test_remove_without_migrations_is_not_found() {
        let dir = TempDir::new().unwrap();
        let scaffolder = MigrationsScaffolder::new(Arc::default(), ModelSnapshot::default());
        assert!(matches!(
            scaffolder.remove_migration(dir.path(), &BTreeSet::new()),
            Err(MigrationError::NotFound { .. })
        ));
    }
}
