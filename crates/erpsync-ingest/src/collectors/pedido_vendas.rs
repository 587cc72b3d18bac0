use super::{group, nested_text, row, truncate};
use crate::client::{Payload, Response};
use crate::collector::lookup::locate_records_or_single;
use crate::collector::{CollectionContext, Collector};
use erpsync_common::{Column, ColumnType, Record, TableSchema};
use serde_json::{json, Value};

/// Sales orders (`produtos/pedido/`), one row per line item.
pub struct PedidoVendasCollector;

impl Collector for PedidoVendasCollector {
    fn endpoint(&self) -> &'static str {
        "produtos/pedido/"
    }

    fn method(&self) -> &'static str {
        "ListarPedidos"
    }

    fn table_name(&self) -> &'static str {
        "pedido_vendas"
    }

    fn schema(&self) -> TableSchema {
        use ColumnType::*;
        TableSchema::new(vec![
            Column::surrogate_id(),
            Column::new("cod_pedido", Varchar(50)),
            Column::new("nr_pedido", Varchar(50)),
            Column::new("nr_sequencial_pedido", Varchar(50)),
            Column::new("cod_cliente", Varchar(50)),
            Column::new("cod_etapa_faturamento", Varchar(20)),
            Column::new("fl_faturado", Char(1)),
            Column::new("fl_cancelado", Char(1)),
            Column::new("dt_pedido", Varchar(30)),
            Column::new("dt_previsao", Varchar(30)),
            Column::new("cod_vendedor", Varchar(50)),
            Column::new("total_vlr_pedido", Decimal(15, 2)),
            Column::new("produto_codigo_produto", Varchar(50)),
            Column::new("produto_descricao", Text),
            Column::new("produto_quantidade", Decimal(15, 4)),
            Column::new("produto_valor_unitario", Decimal(15, 4)),
            Column::new("produto_valor_total", Decimal(15, 4)),
        ])
        .with_timestamps()
    }

    fn build_payload(&self, page: u32, page_size: u32, _ctx: &CollectionContext) -> Option<Payload> {
        Some(super::payload([
            ("pagina", json!(page)),
            ("registros_por_pagina", json!(page_size)),
            ("apenas_importado_api", json!("N")),
        ]))
    }

    fn transform(&self, response: &Response) -> Vec<Record> {
        locate_records_or_single(response, &["pedido_venda_produto"])
            .into_iter()
            .filter(|order| order.is_object())
            .flat_map(explode_order)
            .collect()
    }
}

/// One row per `det` item. An order without items still yields one row.
fn explode_order(order: &Value) -> Vec<Record> {
    let header = group(order, "cabecalho");
    let info = group(order, "infoCadastro");
    let totals = group(order, "total_pedido");
    let extra = group(order, "informacoes_adicionais");

    let flag = |key: &str| {
        let value = nested_text(info, &[key]);
        truncate(if value.is_empty() { "N".to_string() } else { value }, 1)
    };
    let number_or_zero = |value: &Value, key: &str| {
        super::nested_or_null(value, &[key])
            .as_number()
            .map_or(json!(0), |n| Value::Number(n.clone()))
    };

    let order_columns = [
        ("cod_pedido", json!(nested_text(header, &["codigo_pedido"]))),
        ("nr_pedido", json!(nested_text(header, &["numero_pedido"]))),
        ("nr_sequencial_pedido", json!(nested_text(header, &["sequencial"]))),
        ("cod_cliente", json!(nested_text(header, &["codigo_cliente"]))),
        ("cod_etapa_faturamento", json!(nested_text(header, &["etapa"]))),
        ("fl_faturado", json!(flag("faturado"))),
        ("fl_cancelado", json!(flag("cancelado"))),
        ("dt_pedido", json!(nested_text(info, &["dInc"]))),
        ("dt_previsao", json!(nested_text(header, &["data_previsao"]))),
        ("cod_vendedor", json!(nested_text(extra, &["codVend"]))),
        ("total_vlr_pedido", number_or_zero(totals, "valor_total_pedido")),
    ];

    let empty = [Value::Null];
    let items: &[Value] = match order.get("det") {
        Some(Value::Array(items)) if !items.is_empty() => items,
        _ => &empty,
    };

    items
        .iter()
        .map(|item| {
            let product = group(item, "produto");
            let mut record = row(order_columns.clone());
            record.extend(row([
                (
                    "produto_codigo_produto",
                    json!(nested_text(product, &["codigo_produto"])),
                ),
                (
                    "produto_descricao",
                    json!(truncate(nested_text(product, &["descricao"]), 500)),
                ),
                ("produto_quantidade", number_or_zero(product, "quantidade")),
                ("produto_valor_unitario", number_or_zero(product, "valor_unitario")),
                ("produto_valor_total", number_or_zero(product, "valor_total")),
            ]));
            record
        })
        .collect()
}
