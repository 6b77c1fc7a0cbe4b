//! # elif-migrations-cli
//!
//! Command-line front end for `elif-migrations`. Hosts that ship their own
//! model differ call [`run`] with it; the `elif-migrate` binary runs without one.

pub mod cli;
pub mod commands;
pub mod logging;

use std::io::Write;
use std::sync::Arc;

use elif_migrations::{MigrationsOperations, ModelDiffer};
use tokio_util::sync::CancellationToken;

pub use cli::{Cli, Commands};
pub use logging::LoggingConfig;

pub async fn run<W: Write>(
    cli: Cli,
    differ: Option<Arc<dyn ModelDiffer>>,
    cancel: CancellationToken,
    out: &mut W,
) -> anyhow::Result<()> {
    let dispatch = LoggingConfig::from_verbosity(cli.verbose, cli.json_logs).build_dispatch()?;

    let mut ops = MigrationsOperations::from_project(&cli.project_dir, cli.config.as_deref())?
        .with_dispatch(dispatch)
        .with_cancellation(cancel);
    if let Some(namespace) = &cli.root_namespace {
        ops = ops.with_root_namespace(namespace);
    }
    if let Some(differ) = differ {
        ops = ops.with_differ(differ);
    }

    commands::execute(&ops, cli.command, cli.context.as_deref(), out).await
}
