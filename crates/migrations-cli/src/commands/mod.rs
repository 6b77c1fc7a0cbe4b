pub mod database;
pub mod migration;

use std::io::Write;

use elif_migrations::MigrationsOperations;

use crate::cli::Commands;

pub async fn execute<W: Write>(
    ops: &MigrationsOperations,
    command: Commands,
    context: Option<&str>,
    out: &mut W,
) -> anyhow::Result<()> {
    match command {
        Commands::Add { name } => migration::add(ops, &name, context, out).await,
        Commands::List { json } => migration::list(ops, json, context, out).await,
        Commands::Remove => migration::remove(ops, context, out).await,
        Commands::Update { target } => database::update(ops, target.as_deref(), context, out).await,
        Commands::Script {
            from,
            to,
            idempotent,
            output,
        } => {
            database::script(
                ops,
                database::ScriptArgs {
                    from: from.as_deref(),
                    to: to.as_deref(),
                    idempotent,
                    output: output.as_deref(),
                },
                context,
                out,
            )
            .await
        }
    }
}
