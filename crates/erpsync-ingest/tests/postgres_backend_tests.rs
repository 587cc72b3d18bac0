//! PostgreSQL backend against a real server
//!
//! Requires Docker. Run with `cargo test -p erpsync-ingest -- --ignored`.

mod common;

use common::{object, ItemsCollector};
use erpsync_ingest::collector::Collector;
use erpsync_ingest::collectors::{ContasReceberCollector, NfseCollector};
use erpsync_ingest::metrics::{metrics_schema, METRICS_TABLE};
use erpsync_ingest::report::{operation_stats, title_totals};
use erpsync_ingest::storage::{PostgresBackend, StorageBackend};
use erpsync_common::RecordKey;
use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use testcontainers::core::IntoContainerPort;
use testcontainers::runners::AsyncRunner;
use testcontainers::ContainerAsync;
use testcontainers_modules::postgres::Postgres;

async fn start() -> (ContainerAsync<Postgres>, PostgresBackend) {
    common::init_tracing();
    let container = Postgres::default()
        .start()
        .await
        .expect("Failed to start PostgreSQL container");
    let host = container.get_host().await.expect("container host");
    let port = container
        .get_host_port_ipv4(5432.tcp())
        .await
        .expect("container port");

    let pool = PgPoolOptions::new()
        .max_connections(4)
        .connect(&format!("postgresql://postgres:postgres@{host}:{port}/postgres"))
        .await
        .expect("Failed to connect to PostgreSQL");

    (container, PostgresBackend::from_pool(pool))
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_create_insert_and_count() {
    let (_container, backend) = start().await;
    let collector = ItemsCollector::new("items", "i/");

    backend
        .create_table("items", &collector.schema())
        .await
        .unwrap();
    // Idempotent
    backend
        .create_table("items", &collector.schema())
        .await
        .unwrap();

    let rows = vec![
        object(json!({"codigo": 1, "nome": "one", "ignored": "x"})),
        object(json!({"codigo": 2, "nome": "two"})),
    ];
    assert_eq!(backend.insert_batch("items", &rows).await.unwrap(), 2);
    assert_eq!(backend.table_count("items").await.unwrap(), 2);

    backend.truncate_table("items").await.unwrap();
    assert_eq!(backend.table_count("items").await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_upsert_on_unique_column_collapses_duplicates() {
    let (_container, backend) = start().await;
    let collector = ItemsCollector::new("items", "i/");
    backend
        .create_table("items", &collector.schema())
        .await
        .unwrap();

    let rows = vec![
        object(json!({"codigo": 1, "nome": "first"})),
        object(json!({"codigo": 1, "nome": "last"})),
    ];
    backend.insert_batch("items", &rows).await.unwrap();
    backend
        .insert_batch("items", &[object(json!({"codigo": 1, "nome": "updated"}))])
        .await
        .unwrap();

    let stored = backend
        .execute_query("SELECT nome FROM items")
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0]["nome"], json!("updated"));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_existing_keys_match_fresh_keys() {
    let (_container, backend) = start().await;
    let collector = ContasReceberCollector;
    backend
        .create_table(collector.table_name(), &collector.schema())
        .await
        .unwrap();

    let title = object(json!({
        "codigo_lancamento": "123",
        "valor_documento": 150.5,
        "valor_pago": 50.0,
        "saldo": 100.5,
        "data_vencimento": "10/02/2024",
        "status": "A VENCER"
    }));
    backend
        .insert_batch(collector.table_name(), &[title.clone()])
        .await
        .unwrap();

    let keys = backend
        .get_existing_keys(collector.table_name(), collector.unique_key_columns())
        .await
        .unwrap();
    let fresh = backend
        .get_key_from_record(&title, collector.unique_key_columns())
        .unwrap();
    assert!(keys.contains(&fresh));
    assert!(keys.contains(&RecordKey::single("123")));

    let due = backend
        .execute_query("SELECT data_vencimento FROM contas_receber")
        .await
        .unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0]["data_vencimento"], json!("2024-02-10"));

    let totals = title_totals(&backend, collector.table_name()).await.unwrap();
    assert_eq!(totals.rows, 1);
    assert!((totals.total - 150.5).abs() < 1e-9);
    assert!((totals.paid - 50.0).abs() < 1e-9);
    assert!((totals.open - 100.5).abs() < 1e-9);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_composite_keys_round_trip() {
    let (_container, backend) = start().await;
    let collector = NfseCollector;
    backend
        .create_table(collector.table_name(), &collector.schema())
        .await
        .unwrap();

    let invoice = object(json!({"numero": "77", "codigo_nfse": 9001}));
    backend
        .insert_batch(collector.table_name(), &[invoice.clone()])
        .await
        .unwrap();

    let keys = backend
        .get_existing_keys(collector.table_name(), collector.unique_key_columns())
        .await
        .unwrap();
    let fresh = backend
        .get_key_from_record(&invoice, collector.unique_key_columns())
        .unwrap();
    assert!(keys.contains(&fresh));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_metrics_table_accepts_metric_rows() {
    let (_container, backend) = start().await;
    backend
        .create_table(METRICS_TABLE, &metrics_schema())
        .await
        .unwrap();

    let rows = [
        object(json!({
            "operation": "clientes_collect",
            "duration": "1.25",
            "success": 1,
            "records_count": 10,
            "error_message": null
        })),
        object(json!({
            "operation": "clientes_collect",
            "duration": "2.75",
            "success": 0,
            "records_count": 0,
            "error_message": "timeout"
        })),
    ];
    assert_eq!(backend.insert_batch(METRICS_TABLE, &rows).await.unwrap(), 2);

    let stats = operation_stats(&backend).await.unwrap();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].operation, "clientes_collect");
    assert_eq!(stats[0].executions, 2);
    assert!((stats[0].avg_duration - 2.0).abs() < 1e-9);
    assert!((stats[0].max_duration - 2.75).abs() < 1e-9);
    assert_eq!(stats[0].total_records, 10);
    assert_eq!((stats[0].successes, stats[0].failures), (1, 1));
    assert!(stats[0].last_execution.is_some());

    backend.close().await;
    backend.close().await;
}
