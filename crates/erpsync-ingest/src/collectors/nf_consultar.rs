use super::{row, text, truncate};
use crate::client::{Payload, Response};
use crate::collector::{CollectionContext, Collector};
use erpsync_common::{Column, ColumnType, Record, TableSchema};
use serde_json::{json, Value};
use tracing::info;

const LIST_KEYS: [&str; 5] = ["listaNF", "lista_nf", "nf", "cadastros", "listaNotasFiscais"];

/// Issued product invoices (`produtos/nfconsultar/`).
pub struct NfConsultarCollector;

impl Collector for NfConsultarCollector {
    fn endpoint(&self) -> &'static str {
        "produtos/nfconsultar/"
    }

    fn method(&self) -> &'static str {
        "ListarNF"
    }

    fn table_name(&self) -> &'static str {
        "nf_consultar"
    }

    fn name(&self) -> &'static str {
        "nfconsultar"
    }

    fn schema(&self) -> TableSchema {
        use ColumnType::*;
        TableSchema::new(vec![
            Column::surrogate_id(),
            Column::new("numero", Varchar(30)),
            Column::new("serie", Varchar(10)),
            Column::new("data_emissao", Varchar(20)),
            Column::new("cod_cliente", Varchar(30)),
            Column::new("valor_total", Decimal(18, 2)),
            Column::new("situacao", Varchar(30)),
        ])
        .with_created_at()
    }

    /// The endpoint has accepted both naming schemes for paging; send both.
    fn build_payload(&self, page: u32, page_size: u32, ctx: &CollectionContext) -> Option<Payload> {
        let mut payload = super::payload([
            ("nPagina", json!(page)),
            ("nRegPorPagina", json!(page_size)),
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
        let listed = LIST_KEYS.iter().find_map(|key| match response.get(*key) {
            Some(Value::Array(items)) if !items.is_empty() => Some(items.iter().collect::<Vec<_>>()),
            Some(single @ Value::Object(_)) => Some(vec![single]),
            _ => None,
        });
        let Some(items) = listed else {
            info!("No invoice list in response, trying generic lookup");
            return super::generic_rows(response, &[], &self.schema());
        };

        items
            .into_iter()
            .filter(|item| item.is_object())
            .map(|item| {
                row([
                    ("numero", json!(truncate(text(item, &["nNumero", "numero"]), 30))),
                    ("serie", json!(truncate(text(item, &["cSerie", "serie"]), 10))),
                    (
                        "data_emissao",
                        json!(truncate(text(item, &["dDataEmissao", "data_emissao"]), 20)),
                    ),
                    (
                        "cod_cliente",
                        json!(truncate(text(item, &["nCodCliente", "cod_cliente"]), 30)),
                    ),
                    (
                        "valor_total",
                        super::first(item, &["nValorTotal", "valor_total"])
                            .cloned()
                            .unwrap_or(Value::Null),
                    ),
                    ("situacao", json!(truncate(text(item, &["cSituacao", "situacao"]), 30))),
                ])
            })
            .collect()
    }

    fn supports_incremental(&self) -> bool {
        true
    }

    fn unique_key_columns(&self) -> &'static [&'static str] {
        &["numero", "serie"]
    }
}
