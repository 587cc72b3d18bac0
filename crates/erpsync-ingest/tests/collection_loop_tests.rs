//! Pagination loop behavior against a scripted API

mod common;

use common::{init_tracing, items_page, ItemsCollector, ScriptedApi};
use erpsync_ingest::client::ApiError;
use erpsync_ingest::collector::{CollectionContext, CollectionLoop, DateWindow, StopReason};
use erpsync_ingest::collectors::{ExtratoCollector, PedidosCompraCollector};
use erpsync_ingest::config::AccountRef;
use chrono::NaiveDate;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const ENDPOINT: &str = "test/items/";

fn collection(api: &Arc<ScriptedApi>) -> CollectionLoop {
    CollectionLoop::new(api.clone()).with_page_delay(Duration::ZERO)
}

fn ctx(page_size: u32) -> CollectionContext {
    CollectionContext::default().with_page_size(page_size)
}

#[tokio::test]
async fn test_stops_at_declared_total_pages() {
    init_tracing();
    let api = Arc::new(
        ScriptedApi::new()
            .push(ENDPOINT, items_page([1, 2], json!({"total_de_paginas": 3})))
            .push(ENDPOINT, items_page([3, 4], json!({"total_de_paginas": 3})))
            .push(ENDPOINT, items_page([5, 6], json!({"total_de_paginas": 3})))
            .always(ENDPOINT, items_page([99, 100], json!({}))),
    );
    let collector = ItemsCollector::new("items", ENDPOINT);

    let collected = collection(&api).collect(&collector, &ctx(2)).await;

    assert_eq!(collected.stop, StopReason::LastPage);
    assert_eq!(collected.records.len(), 6);
    assert_eq!(collected.requests, 3);

    let pages: Vec<u64> = api
        .calls()
        .iter()
        .map(|c| c.payload["pagina"].as_u64().unwrap())
        .collect();
    assert_eq!(pages, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_total_records_gives_page_count() {
    let api = Arc::new(
        ScriptedApi::new()
            .push(ENDPOINT, items_page([1, 2], json!({"total_de_registros": 4})))
            .push(ENDPOINT, items_page([3, 4], json!({"total_de_registros": 4})))
            .always(ENDPOINT, items_page([5, 6], json!({}))),
    );
    let collector = ItemsCollector::new("items", ENDPOINT);

    let collected = collection(&api).collect(&collector, &ctx(2)).await;

    assert_eq!(collected.stop, StopReason::LastPage);
    assert_eq!(collected.requests, 2);
}

#[tokio::test]
async fn test_short_page_ends_collection() {
    let api = Arc::new(
        ScriptedApi::new()
            .push(ENDPOINT, items_page([1, 2, 3], json!({})))
            .push(ENDPOINT, items_page([4], json!({}))),
    );
    let collector = ItemsCollector::new("items", ENDPOINT);

    let collected = collection(&api).collect(&collector, &ctx(3)).await;

    assert_eq!(collected.stop, StopReason::ShortPage);
    assert_eq!(collected.records.len(), 4);
    assert_eq!(api.calls().len(), 2);
}

#[tokio::test]
async fn test_empty_page_keeps_earlier_records() {
    let api = Arc::new(
        ScriptedApi::new()
            .push(ENDPOINT, items_page([1, 2], json!({})))
            .push(ENDPOINT, json!({"items": []})),
    );
    let collector = ItemsCollector::new("items", ENDPOINT);

    let collected = collection(&api).collect(&collector, &ctx(2)).await;

    assert_eq!(collected.stop, StopReason::EmptyPage);
    assert_eq!(collected.records.len(), 2);
}

#[tokio::test]
async fn test_fault_stops_without_error() {
    let api = Arc::new(
        ScriptedApi::new()
            .push(ENDPOINT, items_page([1, 2], json!({})))
            .push(
                ENDPOINT,
                json!({"faultstring": "ERROR: Não existem registros para a página [2]!"}),
            ),
    );
    let collector = ItemsCollector::new("items", ENDPOINT);

    let collected = collection(&api).collect(&collector, &ctx(2)).await;

    assert!(matches!(collected.stop, StopReason::Fault(ref msg) if msg.contains("página [2]")));
    assert_eq!(collected.records.len(), 2);
}

#[tokio::test]
async fn test_request_error_returns_partial_records() {
    let api = Arc::new(
        ScriptedApi::new()
            .push(ENDPOINT, items_page([1, 2], json!({})))
            .push_error(
                ENDPOINT,
                ApiError::Status {
                    status: 500,
                    message: "internal".into(),
                },
            ),
    );
    let collector = ItemsCollector::new("items", ENDPOINT);

    let collected = collection(&api).collect(&collector, &ctx(2)).await;

    assert!(matches!(collected.stop, StopReason::Failed(ref msg) if msg.contains("500")));
    assert_eq!(collected.records.len(), 2);
}

#[tokio::test]
async fn test_iteration_ceiling() {
    let api = Arc::new(ScriptedApi::new().always(ENDPOINT, items_page([1, 2], json!({}))));
    let collector = ItemsCollector::new("items", ENDPOINT);

    let collected = collection(&api)
        .with_max_iterations(3)
        .collect(&collector, &ctx(2))
        .await;

    assert_eq!(collected.stop, StopReason::IterationLimit);
    assert_eq!(collected.requests, 3);
    assert_eq!(collected.records.len(), 6);
}

#[tokio::test(start_paused = true)]
async fn test_page_delay_between_requests_only() {
    let api = Arc::new(
        ScriptedApi::new()
            .push(ENDPOINT, items_page([1, 2], json!({"total_de_paginas": 3})))
            .push(ENDPOINT, items_page([3, 4], json!({"total_de_paginas": 3})))
            .push(ENDPOINT, items_page([5, 6], json!({"total_de_paginas": 3}))),
    );
    let collector = ItemsCollector::new("items", ENDPOINT);
    let collection = CollectionLoop::new(api.clone()).with_page_delay(Duration::from_millis(500));

    let started = tokio::time::Instant::now();
    let collected = collection.collect(&collector, &ctx(2)).await;
    let elapsed = started.elapsed();

    assert_eq!(collected.requests, 3);
    assert!(elapsed >= Duration::from_millis(1000), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(1500), "{elapsed:?}");
}

#[tokio::test]
async fn test_statement_without_account_is_skipped() {
    let api = Arc::new(ScriptedApi::new());

    let collected = collection(&api).collect(&ExtratoCollector, &ctx(50)).await;

    assert_eq!(collected.stop, StopReason::Skipped);
    assert!(collected.records.is_empty());
    assert!(api.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_statement_is_fetched_once() {
    let api = Arc::new(ScriptedApi::new().always(
        "financas/extrato/",
        json!({
            "nCodCC": 4242,
            "listaMovimentos": [
                {"dDataLancamento": "02/01/2024", "nValorDocumento": 10.5, "cNatureza": "C"},
                {"dDataLancamento": "03/01/2024", "nValorDocumento": 7, "cNatureza": "D"}
            ]
        }),
    ));
    let window = DateWindow::new(
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
    );
    let ctx = ctx(50).with_window(window).with_account(AccountRef::Code(4242));

    let collected = collection(&api).collect(&ExtratoCollector, &ctx).await;

    assert_eq!(collected.stop, StopReason::Unpaginated);
    assert_eq!(collected.records.len(), 2);

    let calls = api.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].payload["nCodCC"], json!(4242));
    assert_eq!(calls[0].payload["dPeriodoInicial"], json!("01/01/2024"));
    assert_eq!(calls[0].payload["dPeriodoFinal"], json!("31/01/2024"));
}

#[tokio::test]
async fn test_purchase_orders_page_size_is_capped() {
    let api = Arc::new(ScriptedApi::new());

    collection(&api)
        .collect(&PedidosCompraCollector, &ctx(500))
        .await;

    let calls = api.calls_to("produtos/pedidocompra/");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].payload["nRegsPorPagina"], json!(100));
    assert_eq!(calls[0].payload["nPagina"], json!(1));
}
