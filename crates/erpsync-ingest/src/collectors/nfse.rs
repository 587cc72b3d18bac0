use super::{group, nested_or_null, nested_text, row, truncate};
use crate::client::{Payload, Response};
use crate::collector::lookup::locate_records_or_single;
use crate::collector::{CollectionContext, Collector};
use erpsync_common::{Column, ColumnType, Record, TableSchema};
use serde_json::{json, Value};

/// Issue-date range used outside incremental runs.
const DEFAULT_START: &str = "01/01/2020";
const DEFAULT_END: &str = "31/12/2030";

/// Issued service invoices (`servicos/nfse/`).
pub struct NfseCollector;

impl Collector for NfseCollector {
    fn endpoint(&self) -> &'static str {
        "servicos/nfse/"
    }

    fn method(&self) -> &'static str {
        "ListarNFSEs"
    }

    fn table_name(&self) -> &'static str {
        "nfse"
    }

    fn schema(&self) -> TableSchema {
        use ColumnType::*;
        TableSchema::new(vec![
            Column::surrogate_id(),
            Column::new("numero", Varchar(30)),
            Column::new("codigo_nfse", Varchar(50)),
            Column::new("data_emissao", Varchar(20)),
            Column::new("cod_cliente", Varchar(30)),
            Column::new("valor_total", Decimal(18, 2)),
            Column::new("situacao", Varchar(30)),
        ])
        .with_created_at()
    }

    fn build_payload(&self, page: u32, page_size: u32, ctx: &CollectionContext) -> Option<Payload> {
        let (start, end) = ctx.window.map_or_else(
            || (DEFAULT_START.to_string(), DEFAULT_END.to_string()),
            |w| (w.start_day_first(), w.end_day_first()),
        );
        Some(super::payload([
            ("nPagina", json!(page)),
            ("nRegPorPagina", json!(page_size)),
            ("dEmiInicial", json!(start)),
            ("dEmiFinal", json!(end)),
        ]))
    }

    fn transform(&self, response: &Response) -> Vec<Record> {
        locate_records_or_single(response, &["nfseEncontradas"])
            .into_iter()
            .filter(|item| item.is_object())
            .map(map_invoice)
            .collect()
    }

    fn supports_incremental(&self) -> bool {
        true
    }

    fn unique_key_columns(&self) -> &'static [&'static str] {
        &["numero", "codigo_nfse"]
    }
}

fn map_invoice(item: &Value) -> Record {
    let header = group(item, "Cabecalho");
    let issue = group(item, "Emissao");

    row([
        ("numero", json!(truncate(nested_text(header, &["nNumeroNFSe"]), 30))),
        (
            "codigo_nfse",
            json!(truncate(nested_text(header, &["cCodigoVerifNFSe"]), 50)),
        ),
        (
            "data_emissao",
            json!(truncate(nested_text(issue, &["cDataEmissao"]), 20)),
        ),
        (
            "cod_cliente",
            json!(truncate(nested_text(header, &["nCodigoCliente"]), 30)),
        ),
        ("valor_total", nested_or_null(header, &["nValorNFSe"])),
        ("situacao", json!(truncate(nested_text(header, &["cStatusNFSe"]), 30))),
    ])
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::collector::DateWindow;
    use crate::collectors::test_support::response;
    use chrono::NaiveDate;

    #[test]
    fn test_default_issue_range() {
        let payload = NfseCollector
            .build_payload(1, 50, &CollectionContext::default())
            .unwrap();
        assert_eq!(payload["dEmiInicial"], json!("01/01/2020"));
        assert_eq!(payload["dEmiFinal"], json!("31/12/2030"));
        assert_eq!(payload["nRegPorPagina"], json!(50));
    }

    #[test]
    fn test_window_sent_day_first() {
        let window = DateWindow::new(
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 6).unwrap(),
        );
        let ctx = CollectionContext::default().incremental(window);
        let payload = NfseCollector.build_payload(1, 50, &ctx).unwrap();
        assert_eq!(payload["dEmiInicial"], json!("01/03/2024"));
        assert_eq!(payload["dEmiFinal"], json!("06/03/2024"));
    }

    #[test]
    fn test_invoice_mapping() {
        let raw = response(json!({
            "nPagina": 1,
            "nTotPaginas": 1,
            "nfseEncontradas": [{
                "Cabecalho": {"nNumeroNFSe": 1201, "cCodigoVerifNFSe": "AB12-CD34", "nValorNFSe": 1500.0,
                              "cStatusNFSe": "F", "nCodigoCliente": 2485994},
                "Emissao": {"cDataEmissao": "05/03/2024"}
            }]
        }));

        let rows = NfseCollector.transform(&raw);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["numero"], json!("1201"));
        assert_eq!(rows[0]["codigo_nfse"], json!("AB12-CD34"));
        assert_eq!(rows[0]["valor_total"], json!(1500.0));
        assert_eq!(rows[0]["data_emissao"], json!("05/03/2024"));
    }
}
