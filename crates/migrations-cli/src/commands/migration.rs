use std::io::Write;

use elif_migrations::{MigrationFiles, MigrationsOperations};

pub async fn add<W: Write>(
    ops: &MigrationsOperations,
    name: &str,
    context: Option<&str>,
    out: &mut W,
) -> anyhow::Result<()> {
    let files = ops.add_migration(name, context).await?;
    writeln!(out, "Created migration {}", files.migration_id)?;
    print_files(&files, out)?;
    Ok(())
}

pub async fn list<W: Write>(
    ops: &MigrationsOperations,
    json: bool,
    context: Option<&str>,
    out: &mut W,
) -> anyhow::Result<()> {
    let migrations = ops.list_migrations(context).await?;

    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(&migrations)?)?;
        return Ok(());
    }

    for migration in &migrations {
        writeln!(out, "{}", migration.id)?;
    }
    Ok(())
}

pub async fn remove<W: Write>(ops: &MigrationsOperations, context: Option<&str>, out: &mut W) -> anyhow::Result<()> {
    let files = ops.remove_migration(context).await?;
    writeln!(out, "Removed migration {}", files.migration_id)?;
    print_files(&files, out)?;
    Ok(())
}

fn print_files<W: Write>(files: &MigrationFiles, out: &mut W) -> anyhow::Result<()> {
    if let Some(path) = &files.migration_file {
        writeln!(out, "  migration: {}", path.display())?;
    }
    if let Some(path) = &files.snapshot_file {
        writeln!(out, "  snapshot:  {}", path.display())?;
    }
    Ok(())
}
