use super::{as_text, group, row, truncate};
use crate::client::{Payload, Response};
use crate::collector::lookup::locate_records_or_single;
use crate::collector::{CollectionContext, Collector};
use chrono::Local;
use erpsync_common::{Column, ColumnType, Record, TableSchema};
use serde_json::{json, Value};

/// The endpoint rejects larger pages.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Start of the default search window (DD/MM/YYYY).
const DEFAULT_START: &str = "01/01/2024";

/// Purchase orders (`produtos/pedidocompra/`), one row per order header.
pub struct PedidosCompraCollector;

impl Collector for PedidosCompraCollector {
    fn endpoint(&self) -> &'static str {
        "produtos/pedidocompra/"
    }

    fn method(&self) -> &'static str {
        "PesquisarPedCompra"
    }

    fn table_name(&self) -> &'static str {
        "pedidos_compra"
    }

    fn schema(&self) -> TableSchema {
        use ColumnType::*;
        TableSchema::new(vec![
            Column::surrogate_id(),
            Column::new("cod_pedido", Varchar(50)),
            Column::new("cod_pedido_integracao", Varchar(50)),
            Column::new("numero", Varchar(30)),
            Column::new("cod_fornecedor", Varchar(50)),
            Column::new("cod_fornecedor_integracao", Varchar(50)),
            Column::new("cnpj_cpf_fornecedor", Varchar(20)),
            Column::new("data_previsao", Varchar(20)),
            Column::new("cod_parc", Varchar(10)),
            Column::new("qtde_parc", Int),
            Column::new("cod_categoria", Varchar(30)),
            Column::new("cod_comprador", Varchar(20)),
            Column::new("contato", Varchar(120)),
            Column::new("numero_contrato", Varchar(30)),
            Column::new("numero_pedido_fornecedor", Varchar(30)),
            Column::new("cod_conta_corrente", Varchar(50)),
            Column::new("cod_conta_corrente_integracao", Varchar(50)),
            Column::new("cod_projeto", Varchar(50)),
            Column::new("observacao", Text),
            Column::new("observacao_interna", Text),
            Column::new("quantidade_itens", Int),
        ])
        .with_timestamps()
    }

    fn build_payload(&self, page: u32, page_size: u32, ctx: &CollectionContext) -> Option<Payload> {
        let (start, end, only_changed) = match ctx.incremental_window() {
            Some(window) => (window.start_day_first(), window.end_day_first(), "T"),
            None => (
                DEFAULT_START.to_string(),
                Local::now().date_naive().format("%d/%m/%Y").to_string(),
                "F",
            ),
        };

        Some(super::payload([
            ("nPagina", json!(page)),
            ("nRegsPorPagina", json!(page_size.min(MAX_PAGE_SIZE))),
            ("lApenasImportadoApi", json!("F")),
            ("lExibirPedidosPendentes", json!("T")),
            ("lExibirPedidosFaturados", json!("T")),
            ("lExibirPedidosRecebidos", json!("T")),
            ("lExibirPedidosCancelados", json!("F")),
            ("lExibirPedidosEncerrados", json!("F")),
            ("lExibirPedidosRecParciais", json!("T")),
            ("lExibirPedidosFatParciais", json!("T")),
            ("dDataInicial", json!(start)),
            ("dDataFinal", json!(end)),
            ("lApenasAlterados", json!(only_changed)),
        ]))
    }

    fn transform(&self, response: &Response) -> Vec<Record> {
        locate_records_or_single(response, &["pedidos_pesquisa"])
            .into_iter()
            .filter_map(map_order)
            .collect()
    }
}

/// Text of a header field cut to `max` characters; null when absent.
fn clipped(header: &Value, key: &str, max: usize) -> Value {
    match header.get(key) {
        None | Some(Value::Null) => Value::Null,
        Some(value) => json!(truncate(as_text(value), max)),
    }
}

fn map_order(order: &Value) -> Option<Record> {
    let header = group(order, "cabecalho_consulta");
    let code = header
        .get("nCodPed")
        .filter(|v| super::truthy(v))
        .map(as_text)?;

    let item_count = match order.get("produtos_consulta") {
        Some(Value::Array(items)) => items.len(),
        Some(Value::Object(_)) => 1,
        _ => 0,
    };

    let supplier_order = if super::truthy(header.get("cNumPedido").unwrap_or(&Value::Null)) {
        clipped(header, "cNumPedido", 30)
    } else {
        clipped(header, "cNumero", 30)
    };

    let notes = |key: &str| {
        super::first(header, &[key])
            .map(|v| json!(as_text(v)))
            .unwrap_or(Value::Null)
    };

    Some(row([
        ("cod_pedido", json!(truncate(code, 50))),
        ("cod_pedido_integracao", clipped(header, "cCodIntPed", 50)),
        ("numero", clipped(header, "cNumero", 30)),
        ("cod_fornecedor", clipped(header, "nCodFor", 50)),
        ("cod_fornecedor_integracao", clipped(header, "cCodIntFor", 50)),
        ("cnpj_cpf_fornecedor", clipped(header, "cCnpjCpfFor", 20)),
        ("data_previsao", clipped(header, "dDtPrevisao", 20)),
        ("cod_parc", clipped(header, "cCodParc", 10)),
        ("qtde_parc", header.get("nQtdeParc").cloned().unwrap_or(Value::Null)),
        ("cod_categoria", clipped(header, "cCodCateg", 30)),
        ("cod_comprador", clipped(header, "nCodCompr", 20)),
        ("contato", clipped(header, "cContato", 120)),
        ("numero_contrato", clipped(header, "cContrato", 30)),
        ("numero_pedido_fornecedor", supplier_order),
        ("cod_conta_corrente", clipped(header, "nCodCC", 50)),
        ("cod_conta_corrente_integracao", clipped(header, "nCodIntCC", 50)),
        ("cod_projeto", clipped(header, "nCodProj", 50)),
        ("observacao", notes("cObs")),
        ("observacao_interna", notes("cObsInt")),
        ("quantidade_itens", json!(item_count)),
    ]))
}
