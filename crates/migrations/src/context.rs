//! Data contexts and their resolution from a user hint.

use std::fs;
use std::path::{Path, PathBuf};

use crate::backends::DatabaseBackendType;
use crate::config::MigrationsConfig;
use crate::error::{MigrationError, MigrationResult};
use crate::model::ModelSnapshot;

/// A resolved data context
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationContext {
    pub name: String,
    pub provider: DatabaseBackendType,
    pub database_url: String,
    /// Absolute, or relative to the working directory
    pub migrations_dir: PathBuf,
    /// The live model the scaffolder diffs against
    pub model: ModelSnapshot,
}

impl MigrationContext {
    pub fn new(name: impl Into<String>, provider: DatabaseBackendType, database_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            provider,
            database_url: database_url.into(),
            migrations_dir: PathBuf::from("migrations"),
            model: ModelSnapshot::default(),
        }
    }

    pub fn with_migrations_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.migrations_dir = dir.into();
        self
    }

    pub fn with_model(mut self, model: ModelSnapshot) -> Self {
        self.model = model;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ContextRegistry {
    contexts: Vec<MigrationContext>,
}

impl ContextRegistry {
    pub fn new(contexts: Vec<MigrationContext>) -> Self {
        Self { contexts }
    }

    /// Build contexts from configuration, resolving paths against the project directory
    pub fn from_config(config: &MigrationsConfig, project_dir: &Path) -> MigrationResult<Self> {
        let contexts = config
            .contexts
            .iter()
            .map(|context| -> MigrationResult<MigrationContext> {
                let model = match &context.model_path {
                    Some(path) => {
                        let path = project_dir.join(path);
                        let content = fs::read_to_string(&path).map_err(|e| {
                            MigrationError::Configuration(format!("Cannot read model {}: {}", path.display(), e))
                        })?;
                        serde_json::from_str(&content)?
                    }
                    None => ModelSnapshot::default(),
                };

                Ok(MigrationContext {
                    name: context.name.clone(),
                    provider: context.resolved_provider()?,
                    database_url: context.database_url.clone(),
                    migrations_dir: project_dir.join(&context.migrations_dir),
                    model,
                })
            })
            .collect::<MigrationResult<Vec<_>>>()?;

        Ok(Self { contexts })
    }

    pub fn contexts(&self) -> &[MigrationContext] {
        &self.contexts
    }

    pub fn names(&self) -> Vec<String> {
        self.contexts.iter().map(|c| c.name.clone()).collect()
    }

    /// Exact name, then case-insensitive name; no hint selects the only context
    pub fn resolve(&self, hint: Option<&str>) -> MigrationResult<&MigrationContext> {
        let Some(hint) = hint else {
            return match self.contexts.as_slice() {
                [] => Err(MigrationError::not_found("Context", "(default)")),
                [only] => Ok(only),
                _ => Err(MigrationError::AmbiguousContext { candidates: self.names() }),
            };
        };

        if let Some(context) = self.contexts.iter().find(|c| c.name == hint) {
            return Ok(context);
        }

        let matches: Vec<&MigrationContext> = self
            .contexts
            .iter()
            .filter(|c| c.name.eq_ignore_ascii_case(hint))
            .collect();

        match matches.as_slice() {
            [] => Err(MigrationError::not_found("Context", hint)),
            [context] => Ok(*context),
            _ => Err(MigrationError::AmbiguousContext {
                candidates: matches.iter().map(|c| c.name.clone()).collect(),
            }),
        }
    }
}
