//! Per-invocation collaborator set for one resolved context.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::backends::{DatabaseBackend, DatabaseBackendRegistry, DatabasePool};
use crate::catalog::MigrationCatalog;
use crate::config::MigrationsConfig;
use crate::context::MigrationContext;
use crate::error::{MigrationError, MigrationResult};
use crate::history::HistoryRepository;
use crate::migrator::Migrator;
use crate::model::ModelDiffer;
use crate::scaffolder::MigrationsScaffolder;
use crate::script::ScriptGenerator;
use crate::sql::{MigrationsSqlGenerator, UpdateSqlGenerator};
use crate::update::ModificationCommandBatchFactory;

/// Services wired for the context's provider. The pool is opened on first use.
pub struct MigrationServices {
    context: MigrationContext,
    backend: Arc<dyn DatabaseBackend>,
    catalog: Arc<MigrationCatalog>,
    history: HistoryRepository,
    migrations_sql: MigrationsSqlGenerator,
    update_sql: UpdateSqlGenerator,
    config: MigrationsConfig,
    pool: OnceCell<Arc<dyn DatabasePool>>,
}

impl MigrationServices {
    /// Refuses non-relational providers before touching the catalog or the database
    pub fn build(
        context: &MigrationContext,
        backends: &DatabaseBackendRegistry,
        config: &MigrationsConfig,
    ) -> MigrationResult<Self> {
        if !context.provider.is_relational() {
            return Err(MigrationError::NonRelationalProvider(context.provider.to_string()));
        }

        let backend = backends.get(context.provider)?;
        let dialect = backend.sql_dialect();
        let catalog = Arc::new(MigrationCatalog::load_from_dir(&context.migrations_dir)?);
        debug!(
            "Built services for context '{}' ({}, {} migration(s))",
            context.name,
            context.provider,
            catalog.len()
        );

        Ok(Self {
            context: context.clone(),
            backend,
            catalog,
            history: HistoryRepository::new(config.history_table.clone(), dialect),
            migrations_sql: MigrationsSqlGenerator::new(dialect),
            update_sql: UpdateSqlGenerator::new(dialect),
            config: config.clone(),
            pool: OnceCell::new(),
        })
    }

    pub fn context(&self) -> &MigrationContext {
        &self.context
    }

    pub fn catalog(&self) -> &Arc<MigrationCatalog> {
        &self.catalog
    }

    pub fn history(&self) -> &HistoryRepository {
        &self.history
    }

    pub async fn pool(&self) -> MigrationResult<Arc<dyn DatabasePool>> {
        let pool = self
            .pool
            .get_or_try_init(|| async {
                debug!("Connecting to database for context '{}'", self.context.name);
                self.backend
                    .create_pool(&self.context.database_url, &self.config.pool)
                    .await
            })
            .await?;
        Ok(Arc::clone(pool))
    }

    pub fn script_generator(&self) -> ScriptGenerator {
        ScriptGenerator::new(
            Arc::clone(&self.catalog),
            self.history.clone(),
            self.migrations_sql,
            self.config.product_version.clone(),
        )
    }

    pub async fn migrator(&self, cancel: CancellationToken) -> MigrationResult<Migrator> {
        Ok(Migrator::new(
            Arc::clone(&self.catalog),
            self.history.clone(),
            self.migrations_sql,
            self.pool().await?,
            self.config.product_version.clone(),
        )
        .with_cancellation(cancel))
    }

    pub fn scaffolder(&self, differ: Option<Arc<dyn ModelDiffer>>) -> MigrationsScaffolder {
        let scaffolder = MigrationsScaffolder::new(Arc::clone(&self.catalog), self.context.model.clone());
        match differ {
            Some(differ) => scaffolder.with_differ(differ),
            None => scaffolder,
        }
    }

    pub fn batch_factory(&self) -> ModificationCommandBatchFactory {
        ModificationCommandBatchFactory::new(self.backend.batch_policy(self.config.max_batch_size), self.update_sql)
    }

    /// Applied ids, creating the history table when it does not exist yet
    pub async fn applied_ids(&self) -> MigrationResult<BTreeSet<String>> {
        let pool = self.pool().await?;
        let mut conn = pool.acquire().await?;
        self.history.ensure_created(&mut *conn).await?;
        self.history.applied_ids(&mut *conn).await
    }

    pub async fn close(&self) {
        if let Some(pool) = self.pool.get() {
            pool.close().await;
        }
    }
}
