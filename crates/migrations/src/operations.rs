//! Migrations Operations - the entry points hosts and the CLI call
//!
//! Every operation resolves a context, builds its services and runs with the
//! caller's `tracing::Dispatch` when one was supplied.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::instrument::WithSubscriber;
use tracing::{info, info_span, warn, Dispatch, Instrument};

use crate::backends::DatabaseBackendRegistry;
use crate::config::MigrationsConfig;
use crate::context::{ContextRegistry, MigrationContext};
use crate::error::{MigrationError, MigrationResult};
use crate::migration::{validate_name, MigrationFiles, MigrationInfo};
use crate::migrator::MigrationReport;
use crate::model::ModelDiffer;
use crate::services::MigrationServices;

pub struct MigrationsOperations {
    config: MigrationsConfig,
    contexts: ContextRegistry,
    backends: DatabaseBackendRegistry,
    differ: Option<Arc<dyn ModelDiffer>>,
    project_dir: PathBuf,
    root_namespace: Option<String>,
    dispatch: Option<Dispatch>,
    cancel: CancellationToken,
}

impl MigrationsOperations {
    pub fn new(config: MigrationsConfig, contexts: ContextRegistry) -> Self {
        Self {
            config,
            contexts,
            backends: DatabaseBackendRegistry::with_defaults(),
            differ: None,
            project_dir: PathBuf::from("."),
            root_namespace: None,
            dispatch: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Load configuration and contexts for a project directory
    pub fn from_project(project_dir: impl Into<PathBuf>, config_path: Option<&Path>) -> MigrationResult<Self> {
        let project_dir = project_dir.into();
        let config = MigrationsConfig::discover(&project_dir, config_path)?;
        let contexts = ContextRegistry::from_config(&config, &project_dir)?;
        Ok(Self::new(config, contexts).with_project_dir(project_dir))
    }

    pub fn with_backends(mut self, backends: DatabaseBackendRegistry) -> Self {
        self.backends = backends;
        self
    }

    pub fn with_differ(mut self, differ: Arc<dyn ModelDiffer>) -> Self {
        self.differ = Some(differ);
        self
    }

    pub fn with_project_dir(mut self, project_dir: impl Into<PathBuf>) -> Self {
        self.project_dir = project_dir.into();
        self
    }

    pub fn with_root_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.root_namespace = Some(namespace.into());
        self
    }

    /// Route this instance's logging to `dispatch` instead of the global default
    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &MigrationsConfig {
        &self.config
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    pub fn contexts(&self) -> &ContextRegistry {
        &self.contexts
    }

    /// Scaffold a migration from the model diff and write it to the context's migrations directory
    pub async fn add_migration(&self, name: &str, context: Option<&str>) -> MigrationResult<MigrationFiles> {
        self.run("add_migration", async {
            validate_name(name)?;
            let (context, services) = self.services(context)?;

            let namespace = self.migrations_namespace();
            let scaffolded = services
                .scaffolder(self.differ.clone())
                .scaffold_migration(name, namespace.as_deref())?;

            if scaffolded.is_empty() {
                if !self.config.allow_empty_migrations {
                    return Err(MigrationError::Validation(format!(
                        "No model changes were found for '{}'; set allow_empty_migrations to keep empty migrations",
                        name
                    )));
                }
                warn!("Migration '{}' contains no operations", scaffolded.migration.id);
            }

            let files = services.scaffolder(None).save(&context.migrations_dir, &scaffolded)?;
            info!("Done. To undo this action, use remove_migration.");
            Ok(files)
        })
        .await
    }

    pub async fn list_migrations(&self, context: Option<&str>) -> MigrationResult<Vec<MigrationInfo>> {
        self.run("list_migrations", async {
            let (_, services) = self.services(context)?;
            let migrations = services.catalog().list_migrations();
            if migrations.is_empty() {
                info!("No migrations were found.");
            }
            Ok(migrations)
        })
        .await
    }

    pub async fn script_migration(
        &self,
        from: Option<&str>,
        to: Option<&str>,
        idempotent: bool,
        context: Option<&str>,
    ) -> MigrationResult<String> {
        self.run("script_migration", async {
            let (_, services) = self.services(context)?;
            services.script_generator().generate(from, to, idempotent)
        })
        .await
    }

    pub async fn update_database(&self, target: Option<&str>, context: Option<&str>) -> MigrationResult<MigrationReport> {
        self.run("update_database", async {
            let (_, services) = self.services(context)?;
            // Unknown targets fail before any connection is opened.
            if let Some(target) = target {
                services.catalog().find_id(target)?;
            }

            let migrator = services.migrator(self.cancel.clone()).await?;
            let result = migrator.migrate(target).await;
            services.close().await;

            let report = result?;
            info!(
                applied = report.applied.len(),
                reverted = report.reverted.len(),
                elapsed_ms = report.execution_time_ms as u64,
                "Done."
            );
            Ok(report)
        })
        .await
    }

    /// Remove the latest migration if it has not been applied
    pub async fn remove_migration(&self, context: Option<&str>) -> MigrationResult<MigrationFiles> {
        self.run("remove_migration", async {
            let (context, services) = self.services(context)?;
            if services.catalog().is_empty() {
                return Err(MigrationError::not_found("Migration", "(latest)"));
            }

            let applied = services.applied_ids().await;
            services.close().await;

            let files = services
                .scaffolder(None)
                .remove_migration(&context.migrations_dir, &applied?)?;
            info!("Done.");
            Ok(files)
        })
        .await
    }

    fn services(&self, hint: Option<&str>) -> MigrationResult<(&MigrationContext, MigrationServices)> {
        let context = self.contexts.resolve(hint)?;
        let services = MigrationServices::build(context, &self.backends, &self.config)?;
        Ok((context, services))
    }

    fn migrations_namespace(&self) -> Option<String> {
        self.root_namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .map(|ns| format!("{}.Migrations", ns))
    }

    async fn run<F, T>(&self, operation: &'static str, fut: F) -> MigrationResult<T>
    where
        F: Future<Output = MigrationResult<T>>,
    {
        match &self.dispatch {
            Some(dispatch) => {
                let span = tracing::dispatcher::with_default(dispatch, || info_span!("elif_migrations", operation));
                fut.instrument(span).with_subscriber(dispatch.clone()).await
            }
            None => fut.instrument(info_span!("elif_migrations", operation)).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::DatabaseBackendType;
    use crate::model::ModelSnapshot;
    use crate::schema::SchemaOperation;
    use crate::testing::FakeDatabase;
    use tempfile::TempDir;

    fn operations(db: &FakeDatabase, dir: &TempDir) -> MigrationsOperations {
        let mut backends = DatabaseBackendRegistry::new();
        backends.register(db.backend());
        let context = MigrationContext::new("Main", DatabaseBackendType::PostgreSQL, "postgres://localhost/app")
            .with_migrations_dir(dir.path().join("migrations"));

        MigrationsOperations::new(MigrationsConfig::default(), ContextRegistry::new(vec![context])).with_backends(backends)
    }

    fn sql_differ() -> Arc<dyn ModelDiffer> {
        Arc::new(|_: &ModelSnapshot, _: &ModelSnapshot| vec![SchemaOperation::sql("SELECT 1")])
    }

    #[tokio::test]
    async fn test_add_without_differ_is_configuration_error() {
        let db = FakeDatabase::postgres();
        let dir = TempDir::new().unwrap();
        let err = operations(&db, &dir).add_migration("Init", None).await.unwrap_err();
        assert!(matches!(err, MigrationError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_empty_migration_needs_opt_in() {
        let db = FakeDatabase::postgres();
        let dir = TempDir::new().unwrap();
        let noop: Arc<dyn ModelDiffer> = Arc::new(|_: &ModelSnapshot, _: &ModelSnapshot| Vec::new());

        let ops = operations(&db, &dir).with_differ(Arc::clone(&noop));
        assert!(matches!(ops.add_migration("Init", None).await, Err(MigrationError::Validation(_))));

        let mut config = MigrationsConfig::default();
        config.allow_empty_migrations = true;
        let mut ops = operations(&db, &dir).with_differ(noop);
        ops.config = config;
        let files = ops.add_migration("Init", None).await.unwrap();
        assert!(files.migration_file.unwrap().exists());
    }

    #[tokio::test]
    async fn test_add_list_update_remove_cycle() {
        let db = FakeDatabase::postgres();
        let dir = TempDir::new().unwrap();
        let ops = operations(&db, &dir).with_differ(sql_differ()).with_root_namespace("Shop");

        let files = ops.add_migration("Init", Some("main")).await.unwrap();
        let listed = ops.list_migrations(None).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, files.migration_id);

        let report = ops.update_database(None, None).await.unwrap();
        assert_eq!(report.applied, vec![files.migration_id.clone()]);

        let err = ops.remove_migration(None).await.unwrap_err();
        assert!(matches!(err, MigrationError::CannotRemoveAppliedMigration(_)));

        ops.update_database(Some("0"), None).await.unwrap();
        ops.remove_migration(None).await.unwrap();
        assert!(ops.list_migrations(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_non_relational_context_fails_before_connecting() {
        let db = FakeDatabase::postgres();
        let context = MigrationContext::new("Cache", DatabaseBackendType::InMemory, "");
        let ops = MigrationsOperations::new(MigrationsConfig::default(), ContextRegistry::new(vec![context]));

        let err = ops.update_database(None, None).await.unwrap_err();
        assert!(matches!(err, MigrationError::NonRelationalProvider(_)));
        assert_eq!(db.pools_created(), 0);
    }

    #[tokio::test]
    async fn test_runs_with_supplied_dispatch() {
        let db = FakeDatabase::postgres();
        let dir = TempDir::new().unwrap();
        let dispatch = Dispatch::new(tracing::subscriber::NoSubscriber::default());
        let ops = operations(&db, &dir).with_dispatch(dispatch);
        assert!(ops.list_migrations(None).await.unwrap().is_empty());
    }
}
