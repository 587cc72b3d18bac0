use super::generic_rows;
use crate::client::{Payload, Response};
use crate::collector::{CollectionContext, Collector};
use erpsync_common::{Column, ColumnType, Record, TableSchema};
use serde_json::json;

/// Products (`geral/produtos/`). API field names already match the table.
pub struct ProdutosCollector;

impl Collector for ProdutosCollector {
    fn endpoint(&self) -> &'static str {
        "geral/produtos/"
    }

    fn method(&self) -> &'static str {
        "ListarProdutos"
    }

    fn table_name(&self) -> &'static str {
        "produtos"
    }

    fn schema(&self) -> TableSchema {
        use ColumnType::*;
        TableSchema::new(vec![
            Column::new("codigo_produto", Varchar(50)).primary_key(),
            Column::new("codigo_produto_integracao", Varchar(50)),
            Column::new("descricao", Varchar(255)),
            Column::new("ncm", Varchar(10)),
            Column::new("valor_unitario", Decimal(15, 2)),
            Column::new("unidade", Varchar(10)),
            Column::new("tipo_item", Varchar(20)),
            Column::new("categoria", Varchar(100)),
            Column::new("peso_liq", Decimal(10, 3)),
            Column::new("peso_bruto", Decimal(10, 3)),
            Column::new("altura", Decimal(10, 3)),
            Column::new("largura", Decimal(10, 3)),
            Column::new("profundidade", Decimal(10, 3)),
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
            ("apenas_importado_api", json!("N")),
            ("filtrar_apenas_omiepdv", json!("N")),
        ]))
    }

    fn transform(&self, response: &Response) -> Vec<Record> {
        generic_rows(response, &["produto_servico_cadastro"], &self.schema())
    }
}
