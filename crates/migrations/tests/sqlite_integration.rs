use std::fs;
use std::sync::Arc;

use elif_migrations::{
    backends::{DatabaseBackend, DatabasePoolConfig, SqliteBackend},
    update::{ColumnValue, ModificationCommandBatchFactory},
    sql::MigrationsSqlGenerator,
    BatchExecutor, ColumnDef, ColumnType, DatabaseExecutor, DatabaseValue, HistoryRepository, Migration,
    MigrationCatalog, MigrationError, MigrationsOperations, Migrator, ModelDiffer, ModelSnapshot, ModificationCommand,
    SchemaOperation, TableModel,
};
use tempfile::TempDir;

/// Creates every table the target has and the source lacks, and the reverse for drops
fn table_differ() -> Arc<dyn ModelDiffer> {
    Arc::new(|source: &ModelSnapshot, target: &ModelSnapshot| {
        let mut ops = Vec::new();
        for table in target.tables.iter().filter(|t| source.table(&t.name).is_none()) {
            ops.push(SchemaOperation::CreateTable {
                name: table.name.clone(),
                columns: table.columns.clone(),
                primary_key: table.primary_key.clone(),
            });
        }
        for table in source.tables.iter().filter(|t| target.table(&t.name).is_none()) {
            ops.push(SchemaOperation::drop_table(&table.name));
        }
        ops
    })
}

fn write_project(dir: &TempDir) {
    let model = ModelSnapshot {
        tables: vec![TableModel {
            name: "orders".to_string(),
            columns: vec![
                ColumnDef::new("id", ColumnType::Integer).not_null(),
                ColumnDef::new("status", ColumnType::Text).not_null(),
                ColumnDef::new("version", ColumnType::Integer).not_null().default_value("1"),
            ],
            primary_key: vec!["id".to_string()],
            indexes: Vec::new(),
        }],
    };
    fs::write(dir.path().join("model.json"), serde_json::to_string(&model).unwrap()).unwrap();

    let config = format!(
        "contexts:\n  - name: Shop\n    provider: sqlite\n    database_url: sqlite://{}\n    model_path: model.json\n",
        dir.path().join("shop.db").display()
    );
    fs::write(dir.path().join("elif-migrations.yaml"), config).unwrap();
}

async fn tables(dir: &TempDir) -> Vec<String> {
    let url = format!("sqlite://{}", dir.path().join("shop.db").display());
    let pool = SqliteBackend::new()
        .create_pool(&url, &DatabasePoolConfig::default())
        .await
        .unwrap();
    let mut conn = pool.acquire().await.unwrap();
    let names = conn
        .fetch_column(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            &[],
        )
        .await
        .unwrap();
    drop(conn);
    pool.close().await;
    names
}

#[tokio::test]
async fn sqlite_project_lifecycle() {
    let dir = TempDir::new().unwrap();
    write_project(&dir);

    let ops = MigrationsOperations::from_project(dir.path(), None)
        .unwrap()
        .with_differ(table_differ());

    let files = ops.add_migration("CreateOrders", None).await.unwrap();
    assert!(files.migration_file.as_ref().unwrap().exists());

    let report = ops.update_database(None, None).await.unwrap();
    assert_eq!(report.applied, vec![files.migration_id.clone()]);
    assert_eq!(tables(&dir).await, vec!["__elif_migrations_history", "orders"]);

    let err = ops.script_migration(None, None, true, None).await.unwrap_err();
    assert!(matches!(err, MigrationError::Validation(_)));

    let script = ops.script_migration(None, None, false, None).await.unwrap();
    assert!(script.contains("CREATE TABLE \"orders\""));

    ops.update_database(Some("0"), None).await.unwrap();
    assert_eq!(tables(&dir).await, vec!["__elif_migrations_history"]);

    ops.remove_migration(None).await.unwrap();
    assert!(!files.migration_file.unwrap().exists());
}

#[tokio::test]
async fn sqlite_batches_detect_lost_updates() {
    let backend = SqliteBackend::new();
    let pool = backend
        .create_pool("sqlite::memory:", &DatabasePoolConfig::default())
        .await
        .unwrap();

    {
        let mut conn = pool.acquire().await.unwrap();
        conn.execute(
            "CREATE TABLE orders (id INTEGER PRIMARY KEY, status TEXT NOT NULL, version INTEGER NOT NULL)",
            &[],
        )
        .await
        .unwrap();
        conn.execute(
            "INSERT INTO orders (id, status, version) VALUES (?1, ?2, ?3)",
            &[DatabaseValue::Int32(1), DatabaseValue::from("new"), DatabaseValue::Int64(1)],
        )
        .await
        .unwrap();
    }

    let executor = BatchExecutor::new(ModificationCommandBatchFactory::new(
        backend.batch_policy(None),
        elif_migrations::sql::UpdateSqlGenerator::new(backend.sql_dialect()),
    ));

    let fresh = vec![ModificationCommand::update("orders")
        .set("status", "paid")
        .set("version", 2i64)
        .key("id", 1)
        .concurrency_token("version", 1i64)];
    assert_eq!(executor.execute(&pool, fresh).await.unwrap(), 1);

    let stale = vec![
        ModificationCommand::insert("orders").value("id", 2).value("status", "new").value("version", 1i64),
        ModificationCommand::update("orders")
            .set("status", "cancelled")
            .key("id", 1)
            .concurrency_token("version", 1i64),
    ];
    let err = executor.execute(&pool, stale).await.unwrap_err();
    match err {
        MigrationError::ConcurrencyConflict(conflict) => {
            // Positions count across the whole flush, not the batch
            assert_eq!(conflict.failed_indexes(), vec![1]);
            assert_eq!(conflict.failed[0].keys, vec![ColumnValue::new("id", 1)]);
            assert!(conflict.to_string().contains("[id=1]"));
        }
        other => panic!("unexpected error: {other}"),
    }

    // The insert from the failed flush was rolled back
    let mut conn = pool.acquire().await.unwrap();
    let ids = conn.fetch_column("SELECT CAST(id AS TEXT) FROM orders", &[]).await.unwrap();
    assert_eq!(ids, vec!["1".to_string()]);
}

#[tokio::test]
async fn sqlite_alter_column_is_refused_and_keeps_data() {
    let dir = TempDir::new().unwrap();
    let url = format!("sqlite://{}", dir.path().join("users.db").display());
    let backend = SqliteBackend::new();
    let pool = backend.create_pool(&url, &DatabasePoolConfig::default()).await.unwrap();

    {
        let mut conn = pool.acquire().await.unwrap();
        conn.execute("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)", &[])
            .await
            .unwrap();
        conn.execute("INSERT INTO users (id, name) VALUES (1, 'alice')", &[])
            .await
            .unwrap();
    }

    let catalog = MigrationCatalog::from_migrations(vec![Migration::new("1_WidenName")
        .unwrap()
        .up(vec![SchemaOperation::AlterColumn {
            table: "users".to_string(),
            column: ColumnDef::new("name", ColumnType::Varchar(100)),
        }])])
    .unwrap();
    let history = HistoryRepository::new("__elif_migrations_history", backend.sql_dialect());
    let migrator = Migrator::new(
        Arc::new(catalog),
        history,
        MigrationsSqlGenerator::new(backend.sql_dialect()),
        Arc::clone(&pool),
        "0.1.0",
    );

    let err = migrator.migrate(None).await.unwrap_err();
    assert!(matches!(err, MigrationError::Validation(_)));

    let mut conn = pool.acquire().await.unwrap();
    let names = conn
        .fetch_column("SELECT COALESCE(name, '<NULL>') FROM users", &[])
        .await
        .unwrap();
    assert_eq!(names, vec!["alice".to_string()]);
    let applied = conn
        .fetch_column("SELECT migration_id FROM __elif_migrations_history", &[])
        .await
        .unwrap();
    assert!(applied.is_empty());
    drop(conn);
    pool.close().await;
}
