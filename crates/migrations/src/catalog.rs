//! Ordered catalog of known migrations.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::error::{MigrationError, MigrationResult};
use crate::migration::{validate_id, Migration, MigrationInfo, INITIAL_DATABASE, SNAPSHOT_FILE_NAME};
use crate::model::ModelSnapshot;

/// Resolution of a user-supplied migration argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationTarget {
    /// The database before any migration
    Initial,
    Id(String),
}

impl MigrationTarget {
    pub fn id(&self) -> &str {
        match self {
            MigrationTarget::Initial => INITIAL_DATABASE,
            MigrationTarget::Id(id) => id,
        }
    }
}

/// Immutable, id-ordered set of migrations
#[derive(Debug, Clone, Default)]
pub struct MigrationCatalog {
    migrations: Vec<Arc<Migration>>,
}

impl MigrationCatalog {
    /// Build a catalog from code-registered migrations
    pub fn from_migrations(migrations: Vec<Migration>) -> MigrationResult<Self> {
        let mut migrations = migrations;
        migrations.sort_by(|a, b| a.id.cmp(&b.id));

        let mut seen_ids = HashSet::new();
        let mut names: HashMap<&str, &str> = HashMap::new();
        for migration in &migrations {
            validate_id(&migration.id)?;
            if !seen_ids.insert(migration.id.as_str()) {
                return Err(MigrationError::DuplicateMigration(migration.id.clone()));
            }
            if let Some(existing) = names.insert(migration.name.as_str(), migration.id.as_str()) {
                return Err(MigrationError::AmbiguousMigration {
                    query: migration.name.clone(),
                    candidates: vec![existing.to_string(), migration.id.clone()],
                });
            }
        }

        Ok(Self {
            migrations: migrations.into_iter().map(Arc::new).collect(),
        })
    }

    /// Load every `<id>.json` descriptor from a migrations directory.
    /// A missing directory is an empty catalog.
    pub fn load_from_dir(dir: &Path) -> MigrationResult<Self> {
        if !dir.exists() {
            debug!("Migrations directory {} does not exist", dir.display());
            return Ok(Self::default());
        }

        let mut migrations = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let is_descriptor = path.extension().and_then(|e| e.to_str()) == Some("json")
                && path.file_name().and_then(|n| n.to_str()) != Some(SNAPSHOT_FILE_NAME);
            if !is_descriptor {
                continue;
            }

            let content = fs::read_to_string(&path)?;
            let migration: Migration = serde_json::from_str(&content)?;
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
            if stem != migration.id {
                return Err(MigrationError::Validation(format!(
                    "Descriptor {} declares id '{}'",
                    path.display(),
                    migration.id
                )));
            }
            migrations.push(migration);
        }

        debug!("Loaded {} migration(s) from {}", migrations.len(), dir.display());
        Self::from_migrations(migrations)
    }

    pub fn migrations(&self) -> &[Arc<Migration>] {
        &self.migrations
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    pub fn list_migrations(&self) -> Vec<MigrationInfo> {
        self.migrations.iter().map(|m| m.info()).collect()
    }

    /// Migration with exactly this id
    pub fn resolve(&self, id: &str) -> MigrationResult<&Arc<Migration>> {
        self.migrations
            .iter()
            .find(|m| m.id == id)
            .ok_or_else(|| MigrationError::not_found("Migration", id))
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.migrations.iter().position(|m| m.id == id)
    }

    pub fn last(&self) -> Option<&Arc<Migration>> {
        self.migrations.last()
    }

    pub fn ids(&self) -> Vec<String> {
        self.migrations.iter().map(|m| m.id.clone()).collect()
    }

    /// Resolve a name or id: exact id, then exact name, then id suffix
    pub fn find_id(&self, name_or_id: &str) -> MigrationResult<MigrationTarget> {
        if name_or_id.is_empty() {
            return Err(MigrationError::Validation("A migration name or id is required".to_string()));
        }
        if name_or_id == INITIAL_DATABASE {
            return Ok(MigrationTarget::Initial);
        }

        if let Some(m) = self.migrations.iter().find(|m| m.id == name_or_id) {
            return Ok(MigrationTarget::Id(m.id.clone()));
        }

        if let Some(m) = self.migrations.iter().find(|m| m.name == name_or_id) {
            return Ok(MigrationTarget::Id(m.id.clone()));
        }

        let candidates: Vec<String> = self
            .migrations
            .iter()
            .filter(|m| m.id.ends_with(name_or_id))
            .map(|m| m.id.clone())
            .collect();

        match candidates.len() {
            0 => Err(MigrationError::not_found("Migration", name_or_id)),
            1 => Ok(MigrationTarget::Id(candidates[0].clone())),
            _ => Err(MigrationError::AmbiguousMigration {
                query: name_or_id.to_string(),
                candidates,
            }),
        }
    }

    /// Number of migrations at or before the target
    pub fn prefix_len(&self, target: &MigrationTarget) -> usize {
        match target {
            MigrationTarget::Initial => 0,
            MigrationTarget::Id(id) => self.position(id).map(|p| p + 1).unwrap_or(0),
        }
    }

    /// Snapshot embedded in the most recent migration that carries one
    pub fn latest_snapshot(&self) -> Option<&ModelSnapshot> {
        self.migrations.iter().rev().find_map(|m| m.target_model.as_ref())
    }
}
