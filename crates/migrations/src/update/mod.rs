//! Batched change execution
//!
//! Row-level modification commands are grouped into batches under a
//! provider-chosen admission policy and executed with per-command
//! affected-row verification.

pub mod batch;
pub mod command;
pub mod executor;
pub mod policy;

pub use batch::{BatchState, CommandOutcome, ModificationCommandBatch, ModificationCommandBatchFactory};
pub use command::{ColumnValue, CommandKind, ModificationCommand};
pub use executor::BatchExecutor;
pub use policy::BatchPolicy;
