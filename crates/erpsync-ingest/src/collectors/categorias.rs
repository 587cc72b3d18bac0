use super::{first, row, text};
use crate::client::{Payload, Response};
use crate::collector::lookup::locate_records;
use crate::collector::{CollectionContext, Collector};
use erpsync_common::{Column, ColumnType, Record, TableSchema};
use serde_json::{json, Value};

/// Financial categories (`geral/categorias/`).
pub struct CategoriasCollector;

impl Collector for CategoriasCollector {
    fn endpoint(&self) -> &'static str {
        "geral/categorias/"
    }

    fn method(&self) -> &'static str {
        "ListarCategorias"
    }

    fn table_name(&self) -> &'static str {
        "categorias"
    }

    fn schema(&self) -> TableSchema {
        use ColumnType::*;
        TableSchema::new(vec![
            Column::new("codigo_categoria", Varchar(50)).primary_key(),
            Column::new("nome_categoria", Varchar(255)),
            Column::new("descricao", Text),
            Column::new("categoria_pai", Varchar(50)),
            Column::new("inativo", Char(1)),
            Column::new("data_cadastro", DateTime),
            Column::new("data_alteracao", DateTime),
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
        locate_records(response, &["categoria_cadastro"])
            .into_iter()
            .filter_map(map_category)
            .collect()
    }
}

fn map_category(item: &Value) -> Option<Record> {
    let code = text(item, &["codigo_categoria", "codigo"]);
    if code.is_empty() {
        return None;
    }

    let inativo = match text(item, &["inativo", "conta_inativa"]) {
        s if s.is_empty() => "N".to_string(),
        s => s,
    };

    Some(row([
        ("codigo_categoria", json!(code)),
        ("nome_categoria", json!(text(item, &["nome_categoria", "descricao"]))),
        (
            "descricao",
            first(item, &["descricao_padrao"]).cloned().unwrap_or(Value::Null),
        ),
        (
            "categoria_pai",
            first(item, &["categoria_pai", "categoria_superior"])
                .cloned()
                .unwrap_or(Value::Null),
        ),
        ("inativo", json!(inativo)),
        (
            "data_cadastro",
            first(item, &["data_cadastro", "dDtInc"]).cloned().unwrap_or(Value::Null),
        ),
        (
            "data_alteracao",
            first(item, &["data_alteracao", "dDtAlt"]).cloned().unwrap_or(Value::Null),
        ),
    ]))
}
