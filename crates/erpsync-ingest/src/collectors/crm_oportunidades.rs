use super::{group, nested_or_null, nested_text, row, truncate};
use crate::client::{Payload, Response};
use crate::collector::lookup::locate_records_or_single;
use crate::collector::{CollectionContext, Collector};
use erpsync_common::{Column, ColumnType, Record, TableSchema};
use serde_json::{json, Value};

/// CRM opportunities (`crm/oportunidades/`).
pub struct CrmOportunidadesCollector;

impl Collector for CrmOportunidadesCollector {
    fn endpoint(&self) -> &'static str {
        "crm/oportunidades/"
    }

    fn method(&self) -> &'static str {
        "ListarOportunidades"
    }

    fn table_name(&self) -> &'static str {
        "crm_oportunidades"
    }

    fn schema(&self) -> TableSchema {
        use ColumnType::*;
        TableSchema::new(vec![
            Column::surrogate_id(),
            Column::new("codigo_oportunidade", Varchar(50)).unique(),
            Column::new("codigo_interno", Varchar(50)),
            Column::new("descricao_oportunidade", Varchar(500)),
            Column::new("codigo_conta", Varchar(50)),
            Column::new("codigo_vendedor", Varchar(50)),
            Column::new("codigo_fase", Varchar(20)),
            Column::new("data_inclusao", Varchar(30)),
            Column::new("data_alteracao", Varchar(30)),
            Column::new("ano_previsao", Int),
            Column::new("mes_previsao", Int),
            Column::new("valor_ticket", Decimal(15, 4)),
        ])
        .with_timestamps()
    }

    fn build_payload(&self, page: u32, page_size: u32, ctx: &CollectionContext) -> Option<Payload> {
        let mut payload = super::payload([
            ("pagina", json!(page)),
            ("registros_por_pagina", json!(page_size)),
        ]);
        if let Some(window) = ctx.incremental_window() {
            payload.insert("filtrar_por_data_de".into(), json!(window.start_day_first()));
            payload.insert("filtrar_por_data_ate".into(), json!(window.end_day_first()));
            payload.insert("filtrar_apenas_alteracao".into(), json!("S"));
        }
        Some(payload)
    }

    fn transform(&self, response: &Response) -> Vec<Record> {
        locate_records_or_single(response, &["cadastros"])
            .into_iter()
            .filter(|item| item.is_object())
            .map(map_opportunity)
            .collect()
    }

    fn supports_incremental(&self) -> bool {
        true
    }

    fn unique_key_columns(&self) -> &'static [&'static str] {
        &["codigo_oportunidade"]
    }
}

fn map_opportunity(item: &Value) -> Record {
    let ident = group(item, "identificacao");
    let other = group(item, "outrasInf");
    let phases = group(item, "fasesStatus");
    let forecast = group(item, "previsaoTemp");
    let ticket = group(item, "ticket");

    // Zero means "no forecast".
    let forecast_part = |key: &str| {
        super::nested(forecast, &[key])
            .and_then(|v| match v {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            })
            .filter(|n| *n != 0)
            .map_or(Value::Null, |n| json!(n))
    };

    row([
        ("codigo_oportunidade", json!(nested_text(ident, &["nCodOp"]))),
        ("codigo_interno", json!(nested_text(ident, &["cCodIntOp"]))),
        (
            "descricao_oportunidade",
            json!(truncate(nested_text(ident, &["cDesOp"]), 500)),
        ),
        ("codigo_conta", json!(nested_text(ident, &["nCodConta"]))),
        ("codigo_vendedor", json!(nested_text(ident, &["nCodVendedor"]))),
        ("codigo_fase", json!(nested_text(phases, &["nCodFase"]))),
        ("data_inclusao", json!(nested_text(other, &["dInclusao"]))),
        ("data_alteracao", json!(nested_text(other, &["dAlteracao"]))),
        ("ano_previsao", forecast_part("nAnoPrev")),
        ("mes_previsao", forecast_part("nMesPrev")),
        ("valor_ticket", nested_or_null(ticket, &["nTicket"])),
    ])
}
