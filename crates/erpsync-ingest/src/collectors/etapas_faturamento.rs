use super::{or_default, row, text, truncate};
use crate::client::{Payload, Response};
use crate::collector::{CollectionContext, Collector};
use erpsync_common::{Column, ColumnType, Record, TableSchema};
use serde_json::{json, Value};

/// Billing stages (`produtos/etapafat/`). Each operation lists its stages; every stage
/// becomes its own row.
pub struct EtapasFaturamentoCollector;

impl Collector for EtapasFaturamentoCollector {
    fn endpoint(&self) -> &'static str {
        "produtos/etapafat/"
    }

    fn method(&self) -> &'static str {
        "ListarEtapasFaturamento"
    }

    fn table_name(&self) -> &'static str {
        "etapas_faturamento"
    }

    fn schema(&self) -> TableSchema {
        use ColumnType::*;
        TableSchema::new(vec![
            Column::surrogate_id(),
            Column::new("cod_operacao", Varchar(20)),
            Column::new("de_operacao", Varchar(255)),
            Column::new("cod_etapa_faturamento", Varchar(50)),
            Column::new("de_padrao", Varchar(255)),
            Column::new("de_etapa_faturamento", Varchar(255)),
            Column::new("fl_inativo", Char(1)),
        ])
        .with_timestamps()
    }

    fn build_payload(&self, page: u32, page_size: u32, _ctx: &CollectionContext) -> Option<Payload> {
        Some(super::payload([
            ("pagina", json!(page)),
            ("registros_por_pagina", json!(page_size)),
        ]))
    }

    fn transform(&self, response: &Response) -> Vec<Record> {
        let schema = self.schema();
        let operations: Vec<&Value> = match response.get("cadastros") {
            Some(Value::Array(items)) if !items.is_empty() => items.iter().collect(),
            Some(single @ Value::Object(_)) => vec![single],
            _ => return super::generic_rows(response, &[], &schema),
        };

        operations
            .into_iter()
            .filter_map(|operation| operation.get("etapas").and_then(Value::as_array))
            .flatten()
            .filter(|stage| stage.is_object())
            .map(map_stage)
            .collect()
    }
}

fn map_stage(stage: &Value) -> Record {
    row([
        ("cod_operacao", json!(text(stage, &["cCodOperacao"]))),
        ("de_operacao", json!(truncate(text(stage, &["cDescOperacao"]), 255))),
        ("cod_etapa_faturamento", json!(text(stage, &["cCodigo"]))),
        ("de_padrao", json!(truncate(text(stage, &["cDescrPadrao"]), 255))),
        ("de_etapa_faturamento", json!(truncate(text(stage, &["cDescricao"]), 255))),
        (
            "fl_inativo",
            json!(truncate(or_default(text(stage, &["cInativo"]), "N"), 1)),
        ),
    ])
}
