//! HTTP client behavior against a mock ERP server

mod common;

use erpsync_ingest::client::{ApiClient, ApiError, OmieClient, Payload};
use erpsync_ingest::config::ApiConfig;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(server: &MockServer) -> ApiConfig {
    ApiConfig {
        app_key: "key".into(),
        app_secret: "secret".into(),
        base_url: server.uri(),
        max_retries: 3,
        retry_delay: Duration::from_millis(10),
        request_delay: Duration::ZERO,
        slow_request_delay: Duration::ZERO,
        block_margin: Duration::ZERO,
        ..ApiConfig::default()
    }
}

fn params() -> Payload {
    common::object(json!({"pagina": 1, "registros_por_pagina": 50}))
}

#[tokio::test]
async fn test_posts_envelope_and_decodes_object() {
    common::init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/geral/clientes/"))
        .and(body_partial_json(json!({
            "call": "ListarClientes",
            "app_key": "key",
            "app_secret": "secret",
            "param": [{"pagina": 1, "registros_por_pagina": 50}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "pagina": 1,
            "total_de_paginas": 1,
            "clientes_cadastro": [{"codigo_cliente_omie": 1}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = OmieClient::new(config(&server)).unwrap();
    let response = client
        .request("geral/clientes/", "ListarClientes", &params())
        .await
        .unwrap();

    assert_eq!(response["total_de_paginas"], json!(1));
}

#[tokio::test]
async fn test_retries_gateway_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let client = OmieClient::new(config(&server)).unwrap();
    let response = client.request("geral/produtos/", "ListarProdutos", &params()).await;

    assert_eq!(response.unwrap()["ok"], json!(true));
}

#[tokio::test]
async fn test_gives_up_after_max_retries() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429))
        .expect(4)
        .mount(&server)
        .await;

    let client = OmieClient::new(config(&server)).unwrap();
    let err = client
        .request("geral/produtos/", "ListarProdutos", &params())
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::Status { status: 429, .. }));
}

#[tokio::test]
async fn test_server_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(500)
                .set_body_json(json!({"faultstring": "Tag [CODIGO] não faz parte da estrutura"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = OmieClient::new(config(&server)).unwrap();
    let err = client
        .request("financas/extrato/", "ListarExtrato", &params())
        .await
        .unwrap_err();

    match err {
        ApiError::Status { status, message } => {
            assert_eq!(status, 500);
            assert!(message.contains("não faz parte"));
        },
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_blocked_response_is_retried_once() {
    let server = MockServer::start().await;
    let blocked = json!({
        "faultstring": "API bloqueada por consumo indevido. Tente novamente em 0 segundos."
    });
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(425).set_body_json(blocked))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let client = OmieClient::new(config(&server)).unwrap();
    let response = client.request("geral/clientes/", "ListarClientes", &params()).await;

    assert!(response.is_ok());
}

#[tokio::test]
async fn test_second_block_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(425).set_body_json(json!({
            "faultstring": "API bloqueada por consumo indevido. Tente novamente em 0 segundos."
        })))
        .expect(2)
        .mount(&server)
        .await;

    let client = OmieClient::new(config(&server)).unwrap();
    let err = client
        .request("geral/clientes/", "ListarClientes", &params())
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::Blocked { wait_secs: 0 }));
}

#[tokio::test]
async fn test_non_object_body_is_a_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([1, 2, 3])))
        .mount(&server)
        .await;

    let client = OmieClient::new(config(&server)).unwrap();
    let err = client
        .request("geral/clientes/", "ListarClientes", &params())
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::Decode(_)));
}

#[tokio::test]
async fn test_closed_client_refuses_requests() {
    let server = MockServer::start().await;
    let client = OmieClient::new(config(&server)).unwrap();

    client.close().await;
    client.close().await;

    let err = client
        .request("geral/clientes/", "ListarClientes", &params())
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Closed));
}
