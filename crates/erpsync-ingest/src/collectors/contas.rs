//! Accounts receivable and payable. Both endpoints return the same title shape.

use super::truthy;
use crate::client::{Payload, Response};
use crate::collector::lookup::locate_records;
use crate::collector::{CollectionContext, Collector};
use erpsync_common::normalize::flatten;
use erpsync_common::{Column, ColumnType, Record, TableSchema};
use serde_json::{json, Value};

/// API field name to table column, applied when the column itself is absent.
const RENAMES: [(&str, &str); 4] = [
    ("codigo_lancamento_omie", "codigo_lancamento"),
    ("status_titulo", "status"),
    ("id_conta_corrente", "codigo_conta_corrente"),
    ("data_pagamento", "data_baixa"),
];

fn title_schema() -> TableSchema {
    use ColumnType::*;
    TableSchema::new(vec![
        Column::surrogate_id(),
        Column::new("codigo_lancamento", Varchar(50)).unique(),
        Column::new("codigo_lancamento_integracao", Varchar(50)),
        Column::new("codigo_cliente_fornecedor", Varchar(50)),
        Column::new("data_vencimento", Date),
        Column::new("data_emissao", Date),
        Column::new("valor_documento", Decimal(15, 2)),
        Column::new("valor_pago", Decimal(15, 2)),
        Column::new("saldo", Decimal(15, 2)),
        Column::new("status", Varchar(50)),
        Column::new("numero_documento", Varchar(50)),
        Column::new("numero_pedido", Varchar(50)),
        Column::new("numero_parcela", Varchar(10)),
        Column::new("observacao", Text),
        Column::new("codigo_categoria", Varchar(50)),
        Column::new("codigo_conta_corrente", Varchar(50)),
        Column::new("codigo_projeto", Varchar(50)),
        Column::new("data_previsao", Date),
        Column::new("data_baixa", Date),
    ])
    .with_timestamps()
}

/// Base payload with the due-date window, when there is one.
fn title_payload(page: u32, page_size: u32, ctx: &CollectionContext) -> Payload {
    let mut payload = super::payload([
        ("pagina", json!(page)),
        ("registros_por_pagina", json!(page_size)),
        ("apenas_importado_api", json!("N")),
    ]);
    if let Some(window) = &ctx.window {
        payload.insert("data_vencimento_inicial".into(), json!(window.start_day_first()));
        payload.insert("data_vencimento_final".into(), json!(window.end_day_first()));
    }
    payload
}

fn title_rows(response: &Response, list_key: &str, schema: &TableSchema) -> Vec<Record> {
    locate_records(response, &[list_key])
        .into_iter()
        .filter_map(Value::as_object)
        .map(|item| map_title(item, schema))
        .collect()
}

fn map_title(item: &Record, schema: &TableSchema) -> Record {
    let mut flat = flatten(item);
    for (from, to) in RENAMES {
        let missing = flat.get(to).is_none_or(|v| !truthy(v));
        if missing {
            if let Some(value) = flat.get(from).cloned() {
                flat.insert(to.to_string(), value);
            }
        }
    }
    if let Some(code) = flat.get("codigo_lancamento").filter(|v| v.is_number()).cloned() {
        flat.insert("codigo_lancamento".into(), json!(super::as_text(&code)));
    }
    flat.retain(|key, _| schema.data_columns().any(|c| &c.name == key));
    flat
}

/// Accounts receivable (`financas/contareceber/`).
pub struct ContasReceberCollector;

impl Collector for ContasReceberCollector {
    fn endpoint(&self) -> &'static str {
        "financas/contareceber/"
    }

    fn method(&self) -> &'static str {
        "ListarContasReceber"
    }

    fn table_name(&self) -> &'static str {
        "contas_receber"
    }

    fn schema(&self) -> TableSchema {
        title_schema()
    }

    fn build_payload(&self, page: u32, page_size: u32, ctx: &CollectionContext) -> Option<Payload> {
        let mut payload = title_payload(page, page_size, ctx);
        if let Some(window) = ctx.incremental_window() {
            payload.insert("filtrar_por_data_de".into(), json!(window.start_day_first()));
            payload.insert("filtrar_por_data_ate".into(), json!(window.end_day_first()));
            payload.insert("filtrar_apenas_alteracao".into(), json!("S"));
        }
        Some(payload)
    }

    fn transform(&self, response: &Response) -> Vec<Record> {
        title_rows(response, "conta_receber_cadastro", &self.schema())
    }

    fn supports_incremental(&self) -> bool {
        true
    }

    fn unique_key_columns(&self) -> &'static [&'static str] {
        &["codigo_lancamento"]
    }
}

/// Accounts payable (`financas/contapagar/`). Payments change status, `valor_pago` and
/// `saldo` on titles that already exist, so every run truncates and reloads.
pub struct ContasPagarCollector;

impl Collector for ContasPagarCollector {
    fn endpoint(&self) -> &'static str {
        "financas/contapagar/"
    }

    fn method(&self) -> &'static str {
        "ListarContasPagar"
    }

    fn table_name(&self) -> &'static str {
        "contas_pagar"
    }

    fn schema(&self) -> TableSchema {
        title_schema()
    }

    fn build_payload(&self, page: u32, page_size: u32, ctx: &CollectionContext) -> Option<Payload> {
        Some(title_payload(page, page_size, ctx))
    }

    fn transform(&self, response: &Response) -> Vec<Record> {
        title_rows(response, "conta_pagar_cadastro", &self.schema())
    }
}
