//! In-process test double for the provider traits
//!
//! `FakeDatabase` records committed statements, emulates the migrations
//! history table, hands out scripted affected-row counts and fails statements
//! on demand. Transactions buffer their effects until commit.

use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::backends::{
    DatabaseBackend, DatabaseBackendType, DatabaseConnection, DatabaseExecutor, DatabasePool, DatabasePoolConfig,
    DatabaseTransaction, DatabaseValue, RenderedBatch, SqlDialect,
};
use crate::error::{MigrationError, MigrationResult};
use crate::update::BatchPolicy;

#[derive(Debug, Clone, Default)]
struct Store {
    statements: Vec<String>,
    history: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct State {
    committed: Store,
    batch_counts: VecDeque<Vec<u64>>,
    fail_patterns: Vec<String>,
    commits: usize,
    rollbacks: usize,
    pools_created: usize,
}

/// Shared handle; clones observe the same database
#[derive(Debug, Clone)]
pub struct FakeDatabase {
    backend_type: DatabaseBackendType,
    dialect: SqlDialect,
    state: Arc<Mutex<State>>,
}

impl FakeDatabase {
    pub fn new(backend_type: DatabaseBackendType, dialect: SqlDialect) -> Self {
        Self {
            backend_type,
            dialect,
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    pub fn postgres() -> Self {
        Self::new(DatabaseBackendType::PostgreSQL, SqlDialect::PostgreSQL)
    }

    pub fn sqlite() -> Self {
        Self::new(DatabaseBackendType::SQLite, SqlDialect::SQLite)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Pool over this database
    pub fn pool(&self) -> Arc<dyn DatabasePool> {
        Arc::new(self.clone())
    }

    /// Backend whose pools all point at this database
    pub fn backend(&self) -> Arc<dyn DatabaseBackend> {
        Arc::new(self.clone())
    }

    /// Auto-committing connection
    pub fn connection(&self) -> FakeConnection {
        FakeConnection { db: self.clone() }
    }

    /// Committed statements, in execution order
    pub fn statements(&self) -> Vec<String> {
        self.lock().committed.statements.clone()
    }

    /// Committed history ids, sorted
    pub fn history(&self) -> Vec<String> {
        self.lock().committed.history.iter().cloned().collect()
    }

    pub fn seed_history(&self, ids: &[&str]) {
        let mut state = self.lock();
        state.committed.history.extend(ids.iter().map(|id| id.to_string()));
    }

    /// Counts returned by the next `execute_batch` call
    pub fn push_batch_counts(&self, counts: Vec<u64>) {
        self.lock().batch_counts.push_back(counts);
    }

    /// Fail every statement containing `pattern`
    pub fn fail_on(&self, pattern: &str) {
        self.lock().fail_patterns.push(pattern.to_string());
    }

    pub fn commits(&self) -> usize {
        self.lock().commits
    }

    pub fn rollbacks(&self) -> usize {
        self.lock().rollbacks
    }

    pub fn pools_created(&self) -> usize {
        self.lock().pools_created
    }

    fn check_failure(&self, sql: &str) -> MigrationResult<()> {
        let state = self.lock();
        match state.fail_patterns.iter().find(|p| sql.contains(p.as_str())) {
            Some(pattern) => Err(MigrationError::StoreExecution(format!(
                "injected failure for statement matching '{}'",
                pattern
            ))),
            None => Ok(()),
        }
    }

    fn next_counts(&self, batch: &RenderedBatch) -> Vec<u64> {
        self.lock()
            .batch_counts
            .pop_front()
            .unwrap_or_else(|| vec![1; batch.expected_counts()])
    }
}

fn apply(store: &mut Store, sql: &str, params: &[DatabaseValue]) -> u64 {
    store.statements.push(sql.to_string());

    let first_param = params.first().and_then(|p| p.as_text());
    if sql.starts_with("INSERT INTO") && sql.contains("(migration_id, product_version)") {
        if let Some(id) = first_param {
            store.history.insert(id);
        }
        1
    } else if sql.starts_with("DELETE FROM") && sql.contains("WHERE migration_id =") {
        match first_param {
            Some(id) if store.history.remove(&id) => 1,
            _ => 0,
        }
    } else {
        0
    }
}

fn select(store: &Store, sql: &str) -> Vec<String> {
    if sql.starts_with("SELECT migration_id FROM") {
        store.history.iter().cloned().collect()
    } else {
        Vec::new()
    }
}

pub struct FakeConnection {
    db: FakeDatabase,
}

#[async_trait]
impl DatabaseExecutor for FakeConnection {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrationResult<u64> {
        self.db.check_failure(sql)?;
        Ok(apply(&mut self.db.lock().committed, sql, params))
    }

    async fn fetch_column(&mut self, sql: &str, _params: &[DatabaseValue]) -> MigrationResult<Vec<String>> {
        self.db.check_failure(sql)?;
        Ok(select(&self.db.lock().committed, sql))
    }

    async fn execute_batch(&mut self, batch: &RenderedBatch) -> MigrationResult<Vec<u64>> {
        self.db.check_failure(&batch.sql)?;
        let counts = self.db.next_counts(batch);
        self.db.lock().committed.statements.push(batch.sql.clone());
        Ok(counts)
    }
}

impl DatabaseConnection for FakeConnection {}

pub struct FakeTransaction {
    db: FakeDatabase,
    pending: Store,
}

#[async_trait]
impl DatabaseExecutor for FakeTransaction {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrationResult<u64> {
        self.db.check_failure(sql)?;
        Ok(apply(&mut self.pending, sql, params))
    }

    async fn fetch_column(&mut self, sql: &str, _params: &[DatabaseValue]) -> MigrationResult<Vec<String>> {
        self.db.check_failure(sql)?;
        Ok(select(&self.pending, sql))
    }

    async fn execute_batch(&mut self, batch: &RenderedBatch) -> MigrationResult<Vec<u64>> {
        self.db.check_failure(&batch.sql)?;
        let counts = self.db.next_counts(batch);
        self.pending.statements.push(batch.sql.clone());
        Ok(counts)
    }
}

#[async_trait]
impl DatabaseTransaction for FakeTransaction {
    async fn commit(self: Box<Self>) -> MigrationResult<()> {
        let mut state = self.db.lock();
        state.committed = self.pending.clone();
        state.commits += 1;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> MigrationResult<()> {
        self.db.lock().rollbacks += 1;
        Ok(())
    }
}

#[async_trait]
impl DatabasePool for FakeDatabase {
    async fn acquire(&self) -> MigrationResult<Box<dyn DatabaseConnection>> {
        Ok(Box::new(self.connection()))
    }

    async fn begin_transaction(&self) -> MigrationResult<Box<dyn DatabaseTransaction>> {
        let pending = self.lock().committed.clone();
        Ok(Box::new(FakeTransaction {
            db: self.clone(),
            pending,
        }))
    }

    async fn close(&self) {}
}

#[async_trait]
impl DatabaseBackend for FakeDatabase {
    async fn create_pool(&self, _database_url: &str, _config: &DatabasePoolConfig) -> MigrationResult<Arc<dyn DatabasePool>> {
        self.lock().pools_created += 1;
        Ok(self.pool())
    }

    fn sql_dialect(&self) -> SqlDialect {
        self.dialect
    }

    fn backend_type(&self) -> DatabaseBackendType {
        self.backend_type
    }

    fn validate_database_url(&self, _url: &str) -> MigrationResult<()> {
        Ok(())
    }

    fn batch_policy(&self, max_batch_size: Option<usize>) -> BatchPolicy {
        match self.dialect {
            SqlDialect::SQLite => BatchPolicy::Single,
            SqlDialect::PostgreSQL => BatchPolicy::Bounded {
                max_commands: max_batch_size.unwrap_or(42),
                max_parameters: self.dialect.max_parameters(),
            },
        }
    }
}
