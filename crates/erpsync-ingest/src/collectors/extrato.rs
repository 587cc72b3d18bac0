use super::{first, row, text};
use crate::client::{Payload, Response};
use crate::collector::{CollectionContext, Collector};
use crate::config::AccountRef;
use erpsync_common::{Column, ColumnType, Record, TableSchema};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{error, info};

/// Pause before the first statement request; this endpoint throttles harder.
pub const STATEMENT_WARMUP: Duration = Duration::from_secs(2);

/// Bank statement of one checking account (`financas/extrato/`).
///
/// Unpaginated. Without an account in the context the collection is skipped, since the
/// endpoint answers 500 when both account fields are empty.
pub struct ExtratoCollector;

impl Collector for ExtratoCollector {
    fn endpoint(&self) -> &'static str {
        "financas/extrato/"
    }

    fn method(&self) -> &'static str {
        "ListarExtrato"
    }

    fn table_name(&self) -> &'static str {
        "extrato"
    }

    fn schema(&self) -> TableSchema {
        use ColumnType::*;
        TableSchema::new(vec![
            Column::surrogate_id(),
            Column::new("codigo_conta_corrente", BigInt),
            Column::new("data", Date),
            Column::new("valor", Decimal(15, 2)),
            Column::new("tipo", Char(1)),
            Column::new("descricao", Varchar(255)),
            Column::new("numero_documento", Varchar(50)),
            Column::new("saldo", Decimal(15, 2)),
            Column::new("codigo_lancamento", BigInt),
        ])
        .with_timestamps()
    }

    fn build_payload(&self, _page: u32, _page_size: u32, ctx: &CollectionContext) -> Option<Payload> {
        let Some(account) = &ctx.account else {
            error!(
                "Bank statement needs a checking account; set EXTRATO_CONTA_CORRENTE (nCodCC) \
                 or EXTRATO_CONTA_CORRENTE_INTEGRACAO (cCodIntCC)"
            );
            return None;
        };

        let (code, integration_code) = match account {
            AccountRef::Code(code) => (*code, String::new()),
            AccountRef::IntegrationCode(code) => (0, code.clone()),
        };
        let (start, end) = ctx
            .window
            .map(|w| (w.start_day_first(), w.end_day_first()))
            .unwrap_or_default();

        info!(
            n_cod_cc = code,
            c_cod_int_cc = %integration_code,
            start = %start,
            end = %end,
            "Statement payload"
        );

        Some(super::payload([
            ("nCodCC", json!(code)),
            ("cCodIntCC", json!(integration_code)),
            ("dPeriodoInicial", json!(start)),
            ("dPeriodoFinal", json!(end)),
        ]))
    }

    fn transform(&self, response: &Response) -> Vec<Record> {
        let account = response
            .get("nCodCC")
            .filter(|v| v.is_number())
            .cloned()
            .unwrap_or(Value::Null);

        let Some(Value::Array(movements)) = response.get("listaMovimentos") else {
            return Vec::new();
        };

        movements
            .iter()
            .filter(|item| item.is_object())
            .map(|item| {
                row([
                    ("codigo_conta_corrente", account.clone()),
                    ("data", json!(text(item, &["dDataLancamento"]))),
                    (
                        "valor",
                        first(item, &["nValorDocumento"]).cloned().unwrap_or(json!(0)),
                    ),
                    ("tipo", json!(super::truncate(text(item, &["cNatureza"]), 1))),
                    (
                        "descricao",
                        json!(super::truncate(text(item, &["cDesCliente", "cDesCategoria"]), 255)),
                    ),
                    ("numero_documento", json!(text(item, &["cNumero"]))),
                    ("saldo", item.get("nSaldo").cloned().unwrap_or(Value::Null)),
                    (
                        "codigo_lancamento",
                        item.get("nCodLancamento").cloned().unwrap_or(Value::Null),
                    ),
                ])
            })
            .collect()
    }

    fn warmup_delay(&self) -> Duration {
        STATEMENT_WARMUP
    }
}
