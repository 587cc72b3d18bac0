//! Period summaries for services and sales.
//!
//! Both endpoints answer one unpaginated call for a date period. The tables hold the
//! summary of the latest period collected, so they are reloaded on every run and carry
//! no unique key. Without a date window the last [`DEFAULT_PERIOD_DAYS`] days are used.

use super::{as_text, row, truncate};
use crate::client::{Payload, Response};
use crate::collector::{CollectionContext, Collector, DateWindow};
use erpsync_common::{Column, ColumnType, Record, TableSchema};
use serde_json::{json, Value};
use tracing::info;

pub const DEFAULT_PERIOD_DAYS: u32 = 30;

fn period(ctx: &CollectionContext) -> DateWindow {
    ctx.window
        .unwrap_or_else(|| DateWindow::ending_today(DEFAULT_PERIOD_DAYS))
}

/// Period bounds echoed by the response, as text.
fn echoed(response: &Response, key: &str) -> Value {
    let raw = response.get(key).map(as_text).unwrap_or_default();
    json!(truncate(raw, 20))
}

/// Integer count, or null for anything else.
fn count(value: Option<&Value>) -> Value {
    value
        .filter(|v| v.is_i64() || v.is_u64())
        .cloned()
        .unwrap_or(Value::Null)
}

/// Service billing summary (`servicos/resumo/`).
pub struct ServicoResumoCollector;

impl Collector for ServicoResumoCollector {
    fn endpoint(&self) -> &'static str {
        "servicos/resumo/"
    }

    fn method(&self) -> &'static str {
        "ObterResumoServicos"
    }

    fn table_name(&self) -> &'static str {
        "servico_resumo"
    }

    fn schema(&self) -> TableSchema {
        use ColumnType::*;
        TableSchema::new(vec![
            Column::surrogate_id(),
            Column::new("data_inicio", Varchar(20)),
            Column::new("data_fim", Varchar(20)),
            Column::new("n_faturadas", Int),
            Column::new("v_faturadas", Decimal(18, 2)),
            Column::new("n_pendentes", Int),
            Column::new("v_pendentes", Decimal(18, 2)),
        ])
        .with_created_at()
    }

    fn build_payload(&self, _page: u32, _page_size: u32, ctx: &CollectionContext) -> Option<Payload> {
        let window = period(ctx);
        Some(super::payload([
            ("dDataInicio", json!(window.start_day_first())),
            ("dDataFim", json!(window.end_day_first())),
            ("lApenasResumo", json!(true)),
        ]))
    }

    fn transform(&self, response: &Response) -> Vec<Record> {
        static NO_PANEL: Value = Value::Null;
        let panel = response
            .get("painel")
            .or_else(|| response.get("painelResumo"))
            .filter(|v| v.is_object());
        if panel.is_none() {
            let keys: Vec<&str> = response.keys().map(String::as_str).collect();
            info!(response_keys = ?keys, "Service summary without a panel");
        }
        let billing = panel
            .map(|p| p.get("faturamentoResumo").filter(|v| v.is_object()).unwrap_or(p))
            .unwrap_or(&NO_PANEL);

        vec![row([
            ("data_inicio", echoed(response, "dDataInicio")),
            ("data_fim", echoed(response, "dDataFim")),
            ("n_faturadas", count(billing.get("nFaturadas"))),
            ("v_faturadas", billing.get("vFaturadas").cloned().unwrap_or(Value::Null)),
            ("n_pendentes", count(billing.get("nPendentes"))),
            ("v_pendentes", billing.get("vPendentes").cloned().unwrap_or(Value::Null)),
        ])]
    }

    fn supports_incremental(&self) -> bool {
        true
    }
}

/// Sales summary across invoice kinds (`produtos/vendas-resumo/`).
pub struct VendasResumoCollector;

const SALES_LIST_KEYS: [&str; 4] = ["listaResumo", "resumoVendas", "cadastros", "resumo_vendas"];

impl Collector for VendasResumoCollector {
    fn endpoint(&self) -> &'static str {
        "produtos/vendas-resumo/"
    }

    fn method(&self) -> &'static str {
        "ResumoVendas"
    }

    fn table_name(&self) -> &'static str {
        "vendas_resumo"
    }

    fn schema(&self) -> TableSchema {
        use ColumnType::*;
        TableSchema::new(vec![
            Column::surrogate_id(),
            Column::new("data_inicio", Varchar(20)),
            Column::new("data_fim", Varchar(20)),
            Column::new("total_nf", Int),
            Column::new("valor_total", Decimal(18, 2)),
        ])
        .with_created_at()
    }

    fn build_payload(&self, _page: u32, _page_size: u32, ctx: &CollectionContext) -> Option<Payload> {
        let window = period(ctx);
        Some(super::payload([
            ("dDataInicio", json!(window.start_day_first())),
            ("dDataFim", json!(window.end_day_first())),
        ]))
    }

    fn transform(&self, response: &Response) -> Vec<Record> {
        let start = echoed(response, "dDataInicio");
        let end = echoed(response, "dDataFim");
        let pick = |item: &Value, keys: &[&str]| {
            keys.iter()
                .find_map(|k| item.get(*k).filter(|v| super::truthy(v)))
                .cloned()
                .unwrap_or(Value::Null)
        };

        let items: Vec<&Value> = SALES_LIST_KEYS
            .iter()
            .find_map(|key| response.get(*key).and_then(Value::as_array).filter(|l| !l.is_empty()))
            .map(|list| list.iter().filter(|item| item.is_object()).collect())
            .unwrap_or_default();

        if items.is_empty() {
            info!("Sales summary without a list, storing response totals");
            return vec![row([
                ("data_inicio", start),
                ("data_fim", end),
                ("total_nf", response.get("total_de_registros").cloned().unwrap_or(Value::Null)),
                ("valor_total", response.get("valor_total").cloned().unwrap_or(Value::Null)),
            ])];
        }

        items
            .into_iter()
            .map(|item| {
                row([
                    ("data_inicio", start.clone()),
                    ("data_fim", end.clone()),
                    ("total_nf", pick(item, &["nTotal", "total_nf", "quantidade"])),
                    ("valor_total", pick(item, &["vTotal", "valor_total", "valor"])),
                ])
            })
            .collect()
    }

    fn supports_incremental(&self) -> bool {
        true
    }
}
