//! SQL rendering services for schema operations and modification commands.

pub mod migrations;
pub mod update;

pub use migrations::MigrationsSqlGenerator;
pub use update::UpdateSqlGenerator;
