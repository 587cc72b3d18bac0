use super::{row, text, truncate};
use crate::client::{Payload, Response};
use crate::collector::{CollectionContext, Collector};
use erpsync_common::{Column, ColumnType, Record, TableSchema};
use serde_json::{json, Value};

/// Supplier product catalog (`estoque/produtofornecedor/`): one row per supplier and
/// product pair.
pub struct ProdutoFornecedorCollector;

impl Collector for ProdutoFornecedorCollector {
    fn endpoint(&self) -> &'static str {
        "estoque/produtofornecedor/"
    }

    fn method(&self) -> &'static str {
        "ListarProdutoFornecedor"
    }

    fn table_name(&self) -> &'static str {
        "produto_fornecedor"
    }

    fn schema(&self) -> TableSchema {
        use ColumnType::*;
        TableSchema::new(vec![
            Column::surrogate_id(),
            Column::new("cod_fornecedor", Varchar(50)),
            Column::new("nome_fantasia", Varchar(255)),
            Column::new("razao_social", Varchar(255)),
            Column::new("cpf_cnpj", Varchar(20)),
            Column::new("id_produto", Varchar(50)),
            Column::new("cod_produto_fornecedor", Varchar(100)),
            Column::new("de_produto", Text),
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
        let suppliers: Vec<&Value> = match response.get("cadastros") {
            Some(Value::Array(items)) if !items.is_empty() => items.iter().collect(),
            Some(single @ Value::Object(_)) => vec![single],
            _ => return super::generic_rows(response, &[], &schema),
        };

        let mut rows = Vec::new();
        for supplier in suppliers {
            let Some(products) = supplier.get("produtos").and_then(Value::as_array) else {
                continue;
            };
            for product in products.iter().filter(|p| p.is_object()) {
                rows.push(map_pair(supplier, product));
            }
        }
        rows
    }
}

/// Supplier codes arrive zero-padded; an all-zero code is kept as is.
fn supplier_code(raw: String) -> String {
    match raw.trim_start_matches('0') {
        "" => raw,
        stripped => stripped.to_string(),
    }
}

fn map_pair(supplier: &Value, product: &Value) -> Record {
    row([
        ("cod_fornecedor", json!(text(supplier, &["nCodForn"]))),
        ("nome_fantasia", json!(truncate(text(supplier, &["cNomeFantasia"]), 255))),
        ("razao_social", json!(truncate(text(supplier, &["cRazaoSocial"]), 255))),
        ("cpf_cnpj", json!(truncate(text(supplier, &["cCpfCnpj"]), 20))),
        ("id_produto", json!(text(product, &["nCodProd"]))),
        (
            "cod_produto_fornecedor",
            json!(truncate(supplier_code(text(product, &["cCodigo"])), 100)),
        ),
        ("de_produto", json!(truncate(text(product, &["cDescricao"]), 2000))),
    ])
}
