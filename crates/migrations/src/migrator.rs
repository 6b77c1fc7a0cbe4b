//! Migration Applier - brings a database to a target migration
//!
//! Each migration runs in its own transaction together with its history row,
//! so a failure leaves the database at the last completed migration.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backends::{DatabaseExecutor, DatabasePool};
use crate::catalog::{MigrationCatalog, MigrationTarget};
use crate::error::{MigrationError, MigrationResult};
use crate::history::{HistoryRepository, MigrationHistoryRow};
use crate::migration::Migration;
use crate::schema::SchemaOperation;
use crate::sql::MigrationsSqlGenerator;

/// Outcome of a `migrate` call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// Ids applied, in order
    pub applied: Vec<String>,
    /// Ids reverted, in order
    pub reverted: Vec<String>,
    pub execution_time_ms: u128,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty() && self.reverted.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
}

/// One migration step of a plan
#[derive(Debug, Clone)]
struct Step {
    migration: Arc<Migration>,
    direction: Direction,
}

impl Step {
    fn operations(&self) -> &[SchemaOperation] {
        match self.direction {
            Direction::Up => &self.migration.up,
            Direction::Down => &self.migration.down,
        }
    }
}

pub struct Migrator {
    catalog: Arc<MigrationCatalog>,
    history: HistoryRepository,
    sql: MigrationsSqlGenerator,
    pool: Arc<dyn DatabasePool>,
    product_version: String,
    cancel: CancellationToken,
}

impl Migrator {
    pub fn new(
        catalog: Arc<MigrationCatalog>,
        history: HistoryRepository,
        sql: MigrationsSqlGenerator,
        pool: Arc<dyn DatabasePool>,
        product_version: impl Into<String>,
    ) -> Self {
        Self {
            catalog,
            history,
            sql,
            pool,
            product_version: product_version.into(),
            cancel: CancellationToken::new(),
        }
    }

    /// Stop between migration steps once the token is cancelled
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Apply or revert migrations until the database is at `target`
    /// (the latest migration when `None`)
    pub async fn migrate(&self, target: Option<&str>) -> MigrationResult<MigrationReport> {
        let start_time = Instant::now();

        let target = match target {
            Some(target) => Some(self.catalog.find_id(target)?),
            None => None,
        };

        let applied = self.read_history().await?;
        let steps = self.plan(target.as_ref(), &applied);
        if steps.is_empty() {
            info!("No migrations were applied. The database is already up to date.");
        }

        // Every step is rendered before the first one runs.
        let rendered = steps
            .iter()
            .map(|step| self.sql.generate(step.operations()))
            .collect::<MigrationResult<Vec<_>>>()?;

        let mut report = MigrationReport::default();
        for (step, statements) in steps.into_iter().zip(rendered) {
            if self.cancel.is_cancelled() {
                return Err(MigrationError::Cancelled(format!(
                    "stopped before migration '{}'",
                    step.migration.id
                )));
            }

            self.run_step(&step, &statements).await?;
            match step.direction {
                Direction::Up => report.applied.push(step.migration.id.clone()),
                Direction::Down => report.reverted.push(step.migration.id.clone()),
            }
        }

        report.execution_time_ms = start_time.elapsed().as_millis();
        Ok(report)
    }

    async fn read_history(&self) -> MigrationResult<BTreeSet<String>> {
        // Released before the first step starts its transaction.
        let mut conn = self.pool.acquire().await?;
        self.history.ensure_created(&mut *conn).await?;
        let applied = self.history.applied_ids(&mut *conn).await?;

        for id in applied.iter().filter(|id| self.catalog.position(id).is_none()) {
            warn!("Migration '{}' is recorded in the history table but not found in the catalog", id);
        }
        Ok(applied)
    }

    fn plan(&self, target: Option<&MigrationTarget>, applied: &BTreeSet<String>) -> Vec<Step> {
        let migrations = self.catalog.migrations();
        let target_len = match target {
            Some(target) => self.catalog.prefix_len(target),
            None => migrations.len(),
        };

        let reverts = migrations[target_len..]
            .iter()
            .rev()
            .filter(|m| applied.contains(&m.id))
            .map(|m| Step {
                migration: Arc::clone(m),
                direction: Direction::Down,
            });

        let applies = migrations[..target_len]
            .iter()
            .filter(|m| !applied.contains(&m.id))
            .map(|m| Step {
                migration: Arc::clone(m),
                direction: Direction::Up,
            });

        reverts.chain(applies).collect()
    }

    async fn run_step(&self, step: &Step, statements: &[String]) -> MigrationResult<()> {
        let migration = &step.migration;
        match step.direction {
            Direction::Up => info!("Applying migration '{}'", migration.id),
            Direction::Down => info!("Reverting migration '{}'", migration.id),
        }

        let mut tx = self.pool.begin_transaction().await?;
        match self.execute_step(&mut *tx, step, statements).await {
            Ok(()) => tx.commit().await.map_err(|e| step_error(migration, e)),
            Err(e) => {
                warn!("Rolling back migration '{}': {}", migration.id, e);
                if let Err(rollback_err) = tx.rollback().await {
                    warn!("Rollback of '{}' failed: {}", migration.id, rollback_err);
                }
                Err(step_error(migration, e))
            }
        }
    }

    async fn execute_step<E>(&self, executor: &mut E, step: &Step, statements: &[String]) -> MigrationResult<()>
    where
        E: DatabaseExecutor + ?Sized,
    {
        let migration = &step.migration;
        for statement in statements {
            debug!("{}", statement);
            executor.execute(statement, &[]).await?;
        }

        match step.direction {
            Direction::Up => {
                let row = MigrationHistoryRow::new(&migration.id, &self.product_version);
                self.history.record(executor, &row).await
            }
            Direction::Down => self.history.unrecord(executor, &migration.id).await,
        }
    }
}

fn step_error(migration: &Migration, err: MigrationError) -> MigrationError {
    MigrationError::StoreExecution(format!("Migration '{}' failed: {}", migration.id, err))
}
