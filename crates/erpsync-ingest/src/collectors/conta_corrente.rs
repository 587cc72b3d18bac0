use super::{first, or_default, row, text};
use crate::client::{Payload, Response};
use crate::collector::lookup::locate_records;
use crate::collector::{CollectionContext, Collector};
use erpsync_common::{Column, ColumnType, Record, TableSchema};
use serde_json::{json, Value};

/// Checking accounts (`financas/contacorrente/`). Their codes feed the bank statement
/// collector.
pub struct ContaCorrenteCollector;

impl Collector for ContaCorrenteCollector {
    fn name(&self) -> &'static str {
        "conta_corrente"
    }

    fn endpoint(&self) -> &'static str {
        "financas/contacorrente/"
    }

    fn method(&self) -> &'static str {
        "ListarContasCorrentes"
    }

    fn table_name(&self) -> &'static str {
        "contas_correntes"
    }

    fn schema(&self) -> TableSchema {
        use ColumnType::*;
        TableSchema::new(vec![
            Column::surrogate_id(),
            Column::new("codigo_conta_corrente", BigInt),
            Column::new("codigo_conta_corrente_integracao", Varchar(50)),
            Column::new("descricao", Varchar(255)),
            Column::new("banco", Varchar(100)),
            Column::new("agencia", Varchar(20)),
            Column::new("conta", Varchar(50)),
            Column::new("saldo_inicial", Decimal(15, 2)),
            Column::new("saldo_atual", Decimal(15, 2)),
            Column::new("tipo", Varchar(50)),
            Column::new("inativo", Char(1)),
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
        locate_records(
            response,
            &[
                "ListarContasCorrentes",
                "listaContasCorrentes",
                "contasCorrentes",
                "contas_correntes",
                "lista_contas_correntes",
                "data",
            ],
        )
        .into_iter()
        .filter(|item| item.is_object())
        .map(map_account)
        .collect()
    }
}

fn map_account(item: &Value) -> Record {
    let number = |keys: &[&str]| first(item, keys).cloned().unwrap_or(json!(0));

    row([
        (
            "codigo_conta_corrente",
            first(item, &["nCodCC", "codigo_conta_corrente"])
                .cloned()
                .unwrap_or(Value::Null),
        ),
        (
            "codigo_conta_corrente_integracao",
            json!(text(item, &["cCodIntCC", "codigo_conta_corrente_integracao"])),
        ),
        ("descricao", json!(text(item, &["cDescricao", "descricao"]))),
        ("banco", json!(text(item, &["cBanco", "codigo_banco", "banco"]))),
        ("agencia", json!(text(item, &["cAgencia", "codigo_agencia", "agencia"]))),
        ("conta", json!(text(item, &["cConta", "conta_corrente", "conta"]))),
        ("saldo_inicial", number(&["nSaldoInicial", "saldo_inicial"])),
        ("saldo_atual", number(&["nSaldoAtual", "saldo_atual"])),
        ("tipo", json!(text(item, &["cTipo", "tipo_conta_corrente", "tipo"]))),
        ("inativo", json!(or_default(text(item, &["cInativo", "inativo"]), "N"))),
    ])
}
