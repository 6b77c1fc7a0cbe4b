//! Runs against a live PostgreSQL server when `TEST_DATABASE_URL` is set.

use std::sync::Arc;

use elif_migrations::{
    backends::{DatabaseBackend, DatabasePoolConfig, PostgresBackend},
    sql::{MigrationsSqlGenerator, UpdateSqlGenerator},
    update::ModificationCommandBatchFactory,
    BatchExecutor, BatchPolicy, ColumnDef, ColumnType, HistoryRepository, Migration, MigrationCatalog,
    ModificationCommand, SchemaOperation, ScriptGenerator, SqlDialect,
};
use sqlx::{Executor, PgPool};
use uuid::Uuid;

fn database_url() -> Option<String> {
    match std::env::var("TEST_DATABASE_URL") {
        Ok(url) if url.starts_with("postgres") => Some(url),
        _ => {
            eprintln!("TEST_DATABASE_URL is not a PostgreSQL URL; skipping");
            None
        }
    }
}

fn unique(prefix: &str) -> String {
    format!("{}_{}", prefix, &Uuid::new_v4().simple().to_string()[..12])
}

#[tokio::test]
async fn batched_commands_see_earlier_writes_to_the_same_row() {
    let Some(url) = database_url() else { return };
    let table = unique("orders");

    let raw = PgPool::connect(&url).await.unwrap();
    raw.execute(format!("CREATE TABLE \"{table}\" (id INTEGER PRIMARY KEY, status TEXT NOT NULL)").as_str())
        .await
        .unwrap();

    let pool = PostgresBackend::new()
        .create_pool(&url, &DatabasePoolConfig::default())
        .await
        .unwrap();
    let executor = BatchExecutor::new(ModificationCommandBatchFactory::new(
        BatchPolicy::Bounded {
            max_commands: 42,
            max_parameters: 65535,
        },
        UpdateSqlGenerator::new(SqlDialect::PostgreSQL),
    ));

    let commands = vec![
        ModificationCommand::insert(&table).value("id", 1).value("status", "new"),
        ModificationCommand::update(&table).set("status", "paid").key("id", 1),
        ModificationCommand::insert(&table).value("id", 2).value("status", "new"),
    ];
    let affected = executor.execute(&pool, commands).await;

    let statuses: Vec<String> = sqlx::query_scalar(&format!("SELECT status FROM \"{table}\" ORDER BY id"))
        .fetch_all(&raw)
        .await
        .unwrap();
    raw.execute(format!("DROP TABLE \"{table}\"").as_str()).await.unwrap();
    pool.close().await;

    assert_eq!(affected.unwrap(), 3);
    assert_eq!(statuses, vec!["paid".to_string(), "new".to_string()]);
}

async fn history_ids(pool: &PgPool, history: &str) -> Vec<String> {
    sqlx::query_scalar(&format!("SELECT migration_id FROM \"{history}\" ORDER BY migration_id"))
        .fetch_all(pool)
        .await
        .unwrap()
}

async fn columns(pool: &PgPool, table: &str) -> Vec<String> {
    sqlx::query_scalar(
        "SELECT column_name::text FROM information_schema.columns WHERE table_name = $1 ORDER BY ordinal_position",
    )
    .bind(table)
    .fetch_all(pool)
    .await
    .unwrap()
}

#[tokio::test]
async fn idempotent_scripts_rerun_without_changes() {
    let Some(url) = database_url() else { return };
    let table = unique("users");
    let history_table = unique("__history");

    let catalog = MigrationCatalog::from_migrations(vec![
        Migration::new("1_CreateUsers")
            .unwrap()
            .up(vec![SchemaOperation::create_table(
                &table,
                vec![ColumnDef::new("id", ColumnType::BigInt).not_null()],
            )])
            .down(vec![SchemaOperation::drop_table(&table)]),
        Migration::new("2_AddEmail")
            .unwrap()
            .up(vec![SchemaOperation::add_column(&table, ColumnDef::new("email", ColumnType::Text))])
            .down(vec![SchemaOperation::drop_column(&table, "email")]),
        Migration::new("3_IndexEmail")
            .unwrap()
            .up(vec![SchemaOperation::create_index(format!("idx_{table}_email"), &table, &["email"])])
            .down(vec![SchemaOperation::drop_index(format!("idx_{table}_email"))]),
    ])
    .unwrap();
    let generator = ScriptGenerator::new(
        Arc::new(catalog),
        HistoryRepository::new(&history_table, SqlDialect::PostgreSQL),
        MigrationsSqlGenerator::new(SqlDialect::PostgreSQL),
        "0.1.0",
    );
    let up = generator.generate(None, None, true).unwrap();
    let down = generator.generate(Some("3_IndexEmail"), Some("0"), true).unwrap();

    let pool = PgPool::connect(&url).await.unwrap();

    pool.execute(up.as_str()).await.unwrap();
    let applied = history_ids(&pool, &history_table).await;
    let schema = columns(&pool, &table).await;
    assert_eq!(applied, vec!["1_CreateUsers", "2_AddEmail", "3_IndexEmail"]);
    assert_eq!(schema, vec!["id", "email"]);

    pool.execute(up.as_str()).await.unwrap();
    assert_eq!(history_ids(&pool, &history_table).await, applied);
    assert_eq!(columns(&pool, &table).await, schema);

    pool.execute(down.as_str()).await.unwrap();
    pool.execute(down.as_str()).await.unwrap();
    let remaining = history_ids(&pool, &history_table).await;
    let leftover = columns(&pool, &table).await;

    pool.execute(format!("DROP TABLE IF EXISTS \"{table}\"").as_str()).await.unwrap();
    pool.execute(format!("DROP TABLE \"{history_table}\"").as_str()).await.unwrap();

    assert!(remaining.is_empty());
    assert!(leftover.is_empty());
}
