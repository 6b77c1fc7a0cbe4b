//! Flush path for pending modifications.

use std::sync::Arc;

use tracing::{debug, warn};

use super::batch::ModificationCommandBatchFactory;
use super::command::ModificationCommand;
use crate::backends::DatabasePool;
use crate::error::MigrationResult;

/// Executes all pending commands in one transaction
pub struct BatchExecutor {
    factory: ModificationCommandBatchFactory,
}

impl BatchExecutor {
    pub fn new(factory: ModificationCommandBatchFactory) -> Self {
        Self { factory }
    }

    /// Run every command and commit, or roll back everything on the first error.
    /// Returns the total number of affected rows.
    pub async fn execute(&self, pool: &Arc<dyn DatabasePool>, commands: Vec<ModificationCommand>) -> MigrationResult<u64> {
        if commands.is_empty() {
            return Ok(0);
        }

        let mut batches = self.factory.create_batches(commands);
        debug!(batches = batches.len(), policy = ?self.factory.policy(), "Flushing modification commands");

        let mut tx = pool.begin_transaction().await?;
        let mut affected = 0u64;

        for batch in batches.iter_mut() {
            match batch.execute(&mut *tx).await {
                Ok(outcomes) => {
                    affected += outcomes.iter().map(|o| o.affected_rows).sum::<u64>();
                }
                Err(e) => {
                    warn!("Rolling back modification batch: {}", e);
                    if let Err(rollback_err) = tx.rollback().await {
                        warn!("Rollback failed: {}", rollback_err);
                    }
                    return Err(e);
                }
            }
        }

        tx.commit().await?;
        Ok(affected)
    }
}
