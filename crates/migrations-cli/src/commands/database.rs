use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::Context;
use elif_migrations::MigrationsOperations;

pub struct ScriptArgs<'a> {
    pub from: Option<&'a str>,
    pub to: Option<&'a str>,
    pub idempotent: bool,
    pub output: Option<&'a Path>,
}

pub async fn update<W: Write>(
    ops: &MigrationsOperations,
    target: Option<&str>,
    context: Option<&str>,
    out: &mut W,
) -> anyhow::Result<()> {
    let report = ops.update_database(target, context).await?;

    if report.is_noop() {
        writeln!(out, "Database is already up to date.")?;
        return Ok(());
    }
    for id in &report.reverted {
        writeln!(out, "Reverted {}", id)?;
    }
    for id in &report.applied {
        writeln!(out, "Applied {}", id)?;
    }
    writeln!(out, "Finished in {}ms", report.execution_time_ms)?;
    Ok(())
}

pub async fn script<W: Write>(
    ops: &MigrationsOperations,
    args: ScriptArgs<'_>,
    context: Option<&str>,
    out: &mut W,
) -> anyhow::Result<()> {
    let script = ops
        .script_migration(args.from, args.to, args.idempotent, context)
        .await?;

    match args.output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, &script).with_context(|| format!("Failed to write script to {}", path.display()))?;
            writeln!(out, "Script written to {}", path.display())?;
        }
        None => write!(out, "{}", script)?,
    }
    Ok(())
}
