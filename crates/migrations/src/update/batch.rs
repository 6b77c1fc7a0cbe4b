//! Modification command batches
//!
//! A batch accumulates commands under an admission policy, renders them into
//! one round trip and reconciles the reported affected-row counts with what
//! each command expected.

use tracing::debug;

use super::command::ModificationCommand;
use super::policy::BatchPolicy;
use crate::backends::{DatabaseExecutor, RenderedBatch};
use crate::error::{ConcurrencyConflict, FailedCommand, MigrationError, MigrationResult};
use crate::sql::UpdateSqlGenerator;

/// Lifecycle of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Building,
    Executed,
    Consumed,
    Failed,
}

/// Per-command result of a successful execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub index: usize,
    pub affected_rows: u64,
}

/// An ordered group of commands executed in a single round trip
#[derive(Debug)]
pub struct ModificationCommandBatch {
    policy: BatchPolicy,
    generator: UpdateSqlGenerator,
    commands: Vec<ModificationCommand>,
    parameter_count: usize,
    offset: usize,
    state: BatchState,
}

impl ModificationCommandBatch {
    pub fn new(policy: BatchPolicy, generator: UpdateSqlGenerator) -> Self {
        Self {
            policy,
            generator,
            commands: Vec::new(),
            parameter_count: 0,
            offset: 0,
            state: BatchState::Building,
        }
    }

    /// Position of this batch's first command within the flushed command list
    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Admit a command; a rejected command is handed back to seed the next batch.
    ///
    /// Commands in one batch run against the same snapshot, so a command that
    /// may write a row an earlier command in the batch writes is rejected too.
    pub fn try_add(&mut self, command: ModificationCommand) -> Result<(), ModificationCommand> {
        if self.state != BatchState::Building || !self.policy.admits(self.commands.len()) {
            return Err(command);
        }
        if self.commands.iter().any(|queued| queued.may_touch_same_row(&command)) {
            return Err(command);
        }

        let parameters = command.parameter_count();
        self.commands.push(command);

        if let Some(limit) = self.policy.max_parameters() {
            // The first command is always kept; a single oversized command fails at execution.
            if self.commands.len() > 1 && self.parameter_count + parameters > limit {
                return match self.commands.pop() {
                    Some(rejected) => Err(rejected),
                    None => Ok(()),
                };
            }
        }

        self.parameter_count += parameters;
        Ok(())
    }

    pub fn commands(&self) -> &[ModificationCommand] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    /// Render the batch without executing it
    pub fn render(&self) -> MigrationResult<RenderedBatch> {
        self.generator.render_batch(&self.commands)
    }

    /// Execute the batch once and verify every command affected the expected rows
    pub async fn execute<E>(&mut self, executor: &mut E) -> MigrationResult<Vec<CommandOutcome>>
    where
        E: DatabaseExecutor + ?Sized,
    {
        if self.state != BatchState::Building {
            return Err(MigrationError::InvalidOperation(format!(
                "Batch has already been executed (state: {:?})",
                self.state
            )));
        }

        let rendered = match self.render() {
            Ok(rendered) => rendered,
            Err(e) => {
                self.state = BatchState::Failed;
                return Err(e);
            }
        };
        debug!(commands = self.commands.len(), parameters = rendered.params.len(), "Executing command batch");

        let counts = match executor.execute_batch(&rendered).await {
            Ok(counts) => counts,
            Err(e) => {
                self.state = BatchState::Failed;
                return Err(e);
            }
        };
        self.state = BatchState::Executed;

        match self.reconcile(&counts) {
            Ok(outcomes) => {
                self.state = BatchState::Consumed;
                Ok(outcomes)
            }
            Err(e) => {
                self.state = BatchState::Failed;
                Err(e)
            }
        }
    }

    fn reconcile(&self, counts: &[u64]) -> MigrationResult<Vec<CommandOutcome>> {
        if counts.len() != self.commands.len() {
            return Err(MigrationError::StoreExecution(format!(
                "Store reported {} affected-row count(s) for a batch of {} command(s)",
                counts.len(),
                self.commands.len()
            )));
        }

        let failed: Vec<FailedCommand> = self
            .commands
            .iter()
            .zip(counts)
            .enumerate()
            .filter(|(_, (command, affected))| command.expected_rows() != **affected)
            .map(|(index, (command, &affected))| FailedCommand {
                index: self.offset + index,
                table: command.table().to_string(),
                kind: command.kind(),
                keys: command.keys().to_vec(),
                concurrency_tokens: command.concurrency_tokens().to_vec(),
                expected_rows: command.expected_rows(),
                affected_rows: affected,
            })
            .collect();

        if !failed.is_empty() {
            return Err(ConcurrencyConflict::new(failed).into());
        }

        Ok(counts
            .iter()
            .enumerate()
            .map(|(index, &affected_rows)| CommandOutcome {
                index: self.offset + index,
                affected_rows,
            })
            .collect())
    }
}

/// Creates empty batches for one provider
#[derive(Debug, Clone, Copy)]
pub struct ModificationCommandBatchFactory {
    policy: BatchPolicy,
    generator: UpdateSqlGenerator,
}

impl ModificationCommandBatchFactory {
    pub fn new(policy: BatchPolicy, generator: UpdateSqlGenerator) -> Self {
        Self { policy, generator }
    }

    pub fn create(&self) -> ModificationCommandBatch {
        ModificationCommandBatch::new(self.policy, self.generator)
    }

    pub fn policy(&self) -> BatchPolicy {
        self.policy
    }

    /// Group commands into batches, preserving their order
    pub fn create_batches(&self, commands: Vec<ModificationCommand>) -> Vec<ModificationCommandBatch> {
        let mut batches = Vec::new();
        let mut current = self.create();
        let mut position = 0;

        for command in commands {
            if let Err(rejected) = current.try_add(command) {
                let next = self.create().with_offset(position);
                batches.push(std::mem::replace(&mut current, next));
                let admitted = current.try_add(rejected);
                debug_assert!(admitted.is_ok(), "an empty batch admits its first command");
            }
            position += 1;
        }

        if !current.is_empty() {
            batches.push(current);
        }
        batches
    }
}
