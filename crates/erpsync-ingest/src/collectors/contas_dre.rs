use super::{retain_truthy, row, text};
use crate::client::{Payload, Response};
use crate::collector::lookup::locate_records;
use crate::collector::{CollectionContext, Collector};
use erpsync_common::{Column, ColumnType, Record, TableSchema};
use serde_json::{json, Value};

/// Income statement (DRE) chart of accounts (`geral/dre/`). One unpaginated call.
pub struct ContasDreCollector;

impl Collector for ContasDreCollector {
    fn endpoint(&self) -> &'static str {
        "geral/dre/"
    }

    fn method(&self) -> &'static str {
        "ListarCadastroDRE"
    }

    fn table_name(&self) -> &'static str {
        "contas_dre"
    }

    fn schema(&self) -> TableSchema {
        use ColumnType::*;
        TableSchema::new(vec![
            Column::new("codigo_conta_dre", Varchar(50)).primary_key(),
            Column::new("codigo_conta_dre_integracao", Varchar(50)),
            Column::new("descricao", Varchar(255)),
            Column::new("tipo", Varchar(50)),
            Column::new("nivel", Int),
            Column::new("conta_pai", Varchar(50)),
            Column::new("natureza", Varchar(50)),
            Column::new("inativo", Char(1)),
            Column::new("data_cadastro", DateTime),
            Column::new("data_alteracao", DateTime),
        ])
        .with_timestamps()
    }

    fn build_payload(&self, _page: u32, _page_size: u32, _ctx: &CollectionContext) -> Option<Payload> {
        Some(super::payload([("apenasContasAtivas", json!("N"))]))
    }

    fn transform(&self, response: &Response) -> Vec<Record> {
        let nested = response
            .get("dreCadastroListResponse")
            .and_then(|inner| match inner {
                Value::Array(items) => Some(items.iter().collect::<Vec<_>>()),
                Value::Object(map) => map
                    .get("dreLista")
                    .and_then(Value::as_array)
                    .map(|items| items.iter().collect()),
                _ => None,
            });
        let items = nested.unwrap_or_else(|| locate_records(response, &["dreLista"]));
        items.into_iter().filter_map(map_account).collect()
    }
}

fn map_account(item: &Value) -> Option<Record> {
    let code = text(item, &["codigoDRE", "codigo_conta_dre"]);
    let description = text(item, &["descricaoDRE", "descricao"]);
    if code.is_empty() && description.is_empty() {
        return None;
    }

    let level = item
        .get("nivelDRE")
        .or_else(|| item.get("nivel"))
        .and_then(|v| match v {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
        .unwrap_or(0);
    let hidden = item.get("naoExibirDRE").and_then(Value::as_str) == Some("S");

    let mut record = row([
        ("codigo_conta_dre", json!(code)),
        (
            "codigo_conta_dre_integracao",
            json!(text(item, &["codigoDRE", "codigo_conta_dre_integracao"])),
        ),
        ("descricao", json!(description)),
        ("tipo", json!(text(item, &["sinalDRE", "tipo"]))),
        ("nivel", json!(level)),
        ("natureza", json!(text(item, &["totalizaDRE", "natureza"]))),
        ("inativo", json!(if hidden { "S" } else { "N" })),
    ]);
    retain_truthy(&mut record, &["codigo_conta_dre"]);
    Some(record)
}
