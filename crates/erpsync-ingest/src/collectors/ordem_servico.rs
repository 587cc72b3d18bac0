//! Service orders. Header fields live under `Cabecalho`, with `InfoCadastro` and
//! `InformacoesAdicionais` alongside; older payloads carry the same fields flat.

use super::{first, group, nested_text, retain_truthy, row, text, truthy};
use crate::client::{Payload, Response};
use crate::collector::lookup::locate_records;
use crate::collector::{CollectionContext, Collector};
use erpsync_common::{Column, ColumnType, Record, TableSchema};
use serde_json::{json, Value};
use tracing::debug;

/// Wrappers some responses put around the order list.
const WRAPPERS: [&str; 2] = ["ListarOS", "osListarResponse"];

const WRAPPED_LIST_KEYS: [&str; 4] = ["osCadastro", "listaOS", "cadastro", "lista"];

/// Service orders (`servicos/os/`).
pub struct OrdemServicoCollector;

impl Collector for OrdemServicoCollector {
    fn endpoint(&self) -> &'static str {
        "servicos/os/"
    }

    fn method(&self) -> &'static str {
        "ListarOS"
    }

    fn table_name(&self) -> &'static str {
        "ordem_servico"
    }

    fn schema(&self) -> TableSchema {
        use ColumnType::*;
        TableSchema::new(vec![
            Column::new("codigo_os", Varchar(50)).primary_key(),
            Column::new("codigo_os_integracao", Varchar(50)),
            Column::new("codigo_cliente", Varchar(50)),
            Column::new("data_previsao", Date),
            Column::new("data_emissao", Date),
            Column::new("data_fechamento", Date),
            Column::new("valor_total", Decimal(15, 2)),
            Column::new("valor_desconto", Decimal(15, 2)),
            Column::new("valor_liquido", Decimal(15, 2)),
            Column::new("status", Varchar(50)),
            Column::new("numero_pedido", Varchar(50)),
            Column::new("observacao", Text),
            Column::new("codigo_projeto", Varchar(50)),
        ])
        .with_timestamps()
    }

    fn build_payload(&self, page: u32, page_size: u32, ctx: &CollectionContext) -> Option<Payload> {
        let mut payload = super::payload([
            ("pagina", json!(page)),
            ("registros_por_pagina", json!(page_size)),
            ("apenas_importado_api", json!("N")),
        ]);
        if let Some(window) = ctx.incremental_window() {
            payload.insert("filtrar_por_data_de".into(), json!(window.start_day_first()));
            payload.insert("filtrar_por_data_ate".into(), json!(window.end_day_first()));
            payload.insert("filtrar_apenas_alteracao".into(), json!("S"));
        }
        Some(payload)
    }

    fn transform(&self, response: &Response) -> Vec<Record> {
        let items = match wrapped_orders(response) {
            Some(items) => items,
            None => locate_records(response, &["osCadastro", "listaOS", "os_cadastro"]),
        };
        items.into_iter().filter_map(map_order).collect()
    }

    fn supports_incremental(&self) -> bool {
        true
    }

    fn unique_key_columns(&self) -> &'static [&'static str] {
        &["codigo_os"]
    }
}

/// Orders nested under a method-named or response wrapper.
fn wrapped_orders(response: &Response) -> Option<Vec<&Value>> {
    if let Some(Value::Array(items)) = response.get("osCadastro") {
        return Some(items.iter().collect());
    }
    WRAPPERS.iter().find_map(|wrapper| match response.get(*wrapper)? {
        Value::Array(items) => Some(items.iter().collect()),
        Value::Object(inner) => WRAPPED_LIST_KEYS.iter().find_map(|key| match inner.get(*key) {
            Some(Value::Array(items)) => Some(items.iter().collect()),
            _ => None,
        }),
        _ => None,
    })
}

/// Header value under `Cabecalho` first, then flat on the item.
fn header_text(item: &Value, header: &Value, keys: &[&str]) -> String {
    match text(header, keys) {
        s if s.is_empty() => text(item, keys),
        s => s,
    }
}

fn amount(item: &Value, header: &Value, keys: &[&str]) -> Value {
    first(header, keys)
        .or_else(|| first(item, keys))
        .cloned()
        .unwrap_or(json!(0))
}

fn map_order(item: &Value) -> Option<Record> {
    if !item.is_object() {
        return None;
    }
    let header = group(item, "Cabecalho");
    let registration = group(item, "InfoCadastro");
    let extra = group(item, "InformacoesAdicionais");

    let code = header_text(item, header, &["nCodOS", "nIdPed", "codigo_os", "codigo"]);
    let number = header_text(item, header, &["cNumOS", "cNumPedido", "numero_pedido"]);

    let issued = match nested_text(registration, &["dDtInc"]) {
        s if s.is_empty() => header_text(item, header, &["dDtEmissao", "data_emissao"]),
        s => s,
    };
    let closed = match nested_text(registration, &["dDtFat"]) {
        s if s.is_empty() => header_text(item, header, &["dDtFechamento", "data_fechamento"]),
        s => s,
    };
    let notes = match nested_text(extra, &["cDadosAdicNF"]) {
        s if s.is_empty() => text(item, &["cObservacao", "observacao"]),
        s => s,
    };
    let project = match nested_text(extra, &["nCodProj"]) {
        s if s.is_empty() => text(item, &["nCodProjeto", "codigo_projeto"]),
        s => s,
    };

    let mut record = row([
        ("codigo_os", json!(code)),
        (
            "codigo_os_integracao",
            json!(header_text(item, header, &["cCodIntOS", "codigo_os_integracao", "codigo_integracao"])),
        ),
        (
            "codigo_cliente",
            json!(header_text(item, header, &["nCodCli", "nCodCliente", "codigo_cliente"])),
        ),
        (
            "data_previsao",
            json!(header_text(item, header, &["dDtPrevisao", "data_previsao"])),
        ),
        ("data_emissao", json!(issued)),
        ("data_fechamento", json!(closed)),
        (
            "valor_total",
            amount(item, header, &["nValorTot", "nValorTotal", "valor_total"]),
        ),
        (
            "valor_desconto",
            amount(item, header, &["nValorDesconto", "valor_desconto"]),
        ),
        (
            "valor_liquido",
            amount(item, header, &["nValorLiquido", "valor_liquido"]),
        ),
        (
            "status",
            json!(header_text(item, header, &["cEtapa", "cStatus", "status"])),
        ),
        ("numero_pedido", json!(number)),
        ("observacao", json!(notes)),
        ("codigo_projeto", json!(project)),
    ]);
    retain_truthy(&mut record, &["codigo_os"]);

    let has_code = record.get("codigo_os").is_some_and(truthy);
    if has_code || record.contains_key("numero_pedido") {
        Some(record)
    } else {
        debug!("Service order without code or number skipped");
        None
    }
}
