//! Migrations configuration
//!
//! Loaded from `elif-migrations.yaml` in the project directory. `${VAR}`
//! references are expanded from the environment before parsing and
//! `ELIF_DATABASE_URL` overrides the URL of a single configured context.

use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::backends::{DatabaseBackendRegistry, DatabaseBackendType, DatabasePoolConfig};
use crate::error::{MigrationError, MigrationResult};
use crate::history::DEFAULT_HISTORY_TABLE;

pub const DEFAULT_CONFIG_FILE: &str = "elif-migrations.yaml";
pub const DATABASE_URL_ENV: &str = "ELIF_DATABASE_URL";

static ENV_REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env reference pattern"));

/// One data context: a database plus the migrations that target it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextConfig {
    pub name: String,
    /// Detected from the URL when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<DatabaseBackendType>,
    #[serde(default)]
    pub database_url: String,
    #[serde(default = "default_migrations_dir")]
    pub migrations_dir: PathBuf,
    /// JSON model snapshot describing the current model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_path: Option<PathBuf>,
}

fn default_migrations_dir() -> PathBuf {
    PathBuf::from("migrations")
}

impl ContextConfig {
    pub fn resolved_provider(&self) -> MigrationResult<DatabaseBackendType> {
        match self.provider {
            Some(provider) => Ok(provider),
            None => DatabaseBackendRegistry::detect_backend_from_url(&self.database_url)
                .map_err(|e| MigrationError::Configuration(format!("Context '{}': {}", self.name, e))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationsConfig {
    pub contexts: Vec<ContextConfig>,
    pub history_table: String,
    /// Recorded with every applied migration
    pub product_version: String,
    pub allow_empty_migrations: bool,
    pub max_batch_size: Option<usize>,
    pub pool: DatabasePoolConfig,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            contexts: Vec::new(),
            history_table: DEFAULT_HISTORY_TABLE.to_string(),
            product_version: env!("CARGO_PKG_VERSION").to_string(),
            allow_empty_migrations: false,
            max_batch_size: None,
            pool: DatabasePoolConfig::default(),
        }
    }
}

impl MigrationsConfig {
    /// Parse YAML text, expanding `${VAR}` references first
    pub fn from_yaml(content: &str) -> MigrationResult<Self> {
        let expanded = expand_env(content)?;
        let mut config: MigrationsConfig = serde_yaml::from_str(&expanded)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> MigrationResult<Self> {
        debug!("Loading migrations configuration from {}", path.display());
        let content = fs::read_to_string(path)
            .map_err(|e| MigrationError::Configuration(format!("Cannot read {}: {}", path.display(), e)))?;
        Self::from_yaml(&content)
    }

    /// An explicit path must exist; otherwise the default file is optional
    pub fn discover(project_dir: &Path, explicit: Option<&Path>) -> MigrationResult<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        let default_path = project_dir.join(DEFAULT_CONFIG_FILE);
        if default_path.exists() {
            Self::load(&default_path)
        } else {
            debug!("No {} in {}; using defaults", DEFAULT_CONFIG_FILE, project_dir.display());
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    fn apply_env_overrides(&mut self) {
        let Ok(url) = env::var(DATABASE_URL_ENV) else {
            return;
        };

        match self.contexts.as_mut_slice() {
            [context] => context.database_url = url,
            [] => warn!("{} is set but no context is configured", DATABASE_URL_ENV),
            _ => warn!("{} ignored because several contexts are configured", DATABASE_URL_ENV),
        }
    }

    pub fn validate(&self) -> MigrationResult<()> {
        if self.history_table.trim().is_empty() {
            return Err(MigrationError::Configuration("history_table cannot be empty".to_string()));
        }

        if self.max_batch_size == Some(0) {
            return Err(MigrationError::Configuration("max_batch_size must be at least 1".to_string()));
        }

        let mut names = HashSet::new();
        for context in &self.contexts {
            if context.name.trim().is_empty() {
                return Err(MigrationError::Configuration("Context names cannot be empty".to_string()));
            }
            if !names.insert(context.name.as_str()) {
                return Err(MigrationError::Configuration(format!(
                    "Context '{}' is configured more than once",
                    context.name
                )));
            }
            let provider = context.resolved_provider()?;
            if provider.is_relational() && context.database_url.trim().is_empty() {
                return Err(MigrationError::Configuration(format!(
                    "Context '{}' has no database_url",
                    context.name
                )));
            }
        }

        Ok(())
    }
}

fn expand_env(content: &str) -> MigrationResult<String> {
    let mut missing = Vec::new();
    let expanded = ENV_REFERENCE.replace_all(content, |caps: &regex::Captures| match env::var(&caps[1]) {
        Ok(value) => value,
        Err(_) => {
            missing.push(caps[1].to_string());
            String::new()
        }
    });

    if missing.is_empty() {
        Ok(expanded.into_owned())
    } else {
        Err(MigrationError::Configuration(format!(
            "Missing environment variable(s): {}",
            missing.join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const YAML: &str = r#"
contexts:
  - name: Main
    database_url: postgres://localhost/app
    migrations_dir: db/migrations
history_table: __history
max_batch_size: 10
"#;

    #[test]
    #[serial]
    fn test_parse_with_defaults() {
        env::remove_var(DATABASE_URL_ENV);
        let config = MigrationsConfig::from_yaml(YAML).unwrap();

        assert_eq!(config.contexts.len(), 1);
        assert_eq!(config.contexts[0].resolved_provider().unwrap(), DatabaseBackendType::PostgreSQL);
        assert_eq!(config.contexts[0].migrations_dir, PathBuf::from("db/migrations"));
        assert_eq!(config.history_table, "__history");
        assert_eq!(config.max_batch_size, Some(10));
        assert!(!config.allow_empty_migrations);
        assert_eq!(config.pool, DatabasePoolConfig::default());
    }

    #[test]
    #[serial]
    fn test_env_references_are_expanded() {
        env::remove_var(DATABASE_URL_ENV);
        env::set_var("ELIF_TEST_DB_HOST", "db.internal");
        let yaml = "contexts:\n  - name: Main\n    database_url: postgres://${ELIF_TEST_DB_HOST}/app\n";
        let config = MigrationsConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.contexts[0].database_url, "postgres://db.internal/app");
        env::remove_var("ELIF_TEST_DB_HOST");

        let err = MigrationsConfig::from_yaml("history_table: ${ELIF_TEST_UNSET_VAR}").unwrap_err();
        assert!(err.to_string().contains("ELIF_TEST_UNSET_VAR"));
    }

    #[test]
    #[serial]
    fn test_database_url_override() {
        env::set_var(DATABASE_URL_ENV, "sqlite::memory:");
        let config = MigrationsConfig::from_yaml(
            "contexts:\n  - name: Main\n    provider: sqlite\n    database_url: sqlite://app.db\n",
        )
        .unwrap();
        env::remove_var(DATABASE_URL_ENV);

        assert_eq!(config.contexts[0].database_url, "sqlite::memory:");
    }

    #[test]
    #[serial]
    fn test_validation_errors() {
        env::remove_var(DATABASE_URL_ENV);
        let duplicate = "contexts:\n  - name: A\n    database_url: sqlite::memory:\n  - name: A\n    database_url: sqlite::memory:\n";
        assert!(matches!(MigrationsConfig::from_yaml(duplicate), Err(MigrationError::Configuration(_))));

        assert!(MigrationsConfig::from_yaml("max_batch_size: 0").is_err());
        assert!(MigrationsConfig::from_yaml("contexts:\n  - name: A\n    provider: postgres\n").is_err());

        // Non-relational contexts need no URL
        assert!(MigrationsConfig::from_yaml("contexts:\n  - name: Cache\n    provider: memory\n").is_ok());
    }
}
