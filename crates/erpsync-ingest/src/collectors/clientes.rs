use super::{group, grouped_text, nested_text, or_default, retain_truthy, row, text};
use crate::client::{Payload, Response};
use crate::collector::lookup::locate_records;
use crate::collector::{CollectionContext, Collector};
use erpsync_common::{Column, ColumnType, Record, TableSchema};
use serde_json::{json, Value};

/// Customers (`geral/clientes/`).
pub struct ClientesCollector;

impl Collector for ClientesCollector {
    fn endpoint(&self) -> &'static str {
        "geral/clientes/"
    }

    fn method(&self) -> &'static str {
        "ListarClientes"
    }

    fn table_name(&self) -> &'static str {
        "clientes"
    }

    fn schema(&self) -> TableSchema {
        use ColumnType::*;
        TableSchema::new(vec![
            Column::new("codigo_cliente_omie", Varchar(50)).primary_key(),
            Column::new("codigo_cliente_integracao", Varchar(50)),
            Column::new("razao_social", Varchar(255)),
            Column::new("nome_fantasia", Varchar(255)),
            Column::new("cnpj_cpf", Varchar(20)),
            Column::new("email", Varchar(255)),
            Column::new("telefone1_ddd", Varchar(5)),
            Column::new("telefone1_numero", Varchar(20)),
            Column::new("endereco", Varchar(255)),
            Column::new("endereco_numero", Varchar(20)),
            Column::new("bairro", Varchar(100)),
            Column::new("cidade", Varchar(100)),
            Column::new("estado", Varchar(2)),
            Column::new("cep", Varchar(10)),
            Column::new("inscricao_estadual", Varchar(50)),
            Column::new("inscricao_municipal", Varchar(50)),
            Column::new("pessoa_fisica", Char(1)),
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
        ]))
    }

    fn transform(&self, response: &Response) -> Vec<Record> {
        locate_records(response, &["clientes_cadastro"])
            .into_iter()
            .filter_map(map_client)
            .collect()
    }
}

/// Map one client; address and phone may be nested groups or flat fields.
fn map_client(item: &Value) -> Option<Record> {
    let address = group(item, "endereco");
    let phone = group(item, "telefone1");

    let code = text(item, &["codigo_cliente_omie", "nCodCliente", "codigo"]);
    if code.is_empty() {
        return None;
    }

    let name = match text(item, &["razao_social", "cNome"]) {
        s if s.is_empty() => nested_text(address, &["cNome"]),
        s => s,
    };
    let street = if address.is_null() {
        text(item, &["endereco", "cEndereco"])
    } else {
        grouped_text(item, address, "endereco", &["cEndereco"])
    };

    let mut record = row([
        ("codigo_cliente_omie", json!(code)),
        (
            "codigo_cliente_integracao",
            json!(text(item, &["codigo_cliente_integracao", "cCodIntCliente", "codigo_integracao"])),
        ),
        ("razao_social", json!(name)),
        ("nome_fantasia", json!(text(item, &["nome_fantasia", "cNomeFantasia"]))),
        ("cnpj_cpf", json!(text(item, &["cnpj_cpf", "cCnpjCpf"]))),
        ("email", json!(text(item, &["email", "cEmail"]))),
        (
            "telefone1_ddd",
            json!(grouped_text(item, phone, "ddd", &["telefone1_ddd", "cDDD"])),
        ),
        (
            "telefone1_numero",
            json!(grouped_text(item, phone, "numero", &["telefone1_numero", "cTelefone"])),
        ),
        ("endereco", json!(street)),
        (
            "endereco_numero",
            json!(grouped_text(item, address, "numero", &["endereco_numero", "cNumero"])),
        ),
        ("bairro", json!(grouped_text(item, address, "bairro", &["bairro", "cBairro"]))),
        ("cidade", json!(grouped_text(item, address, "cidade", &["cidade", "cCidade"]))),
        ("estado", json!(grouped_text(item, address, "estado", &["estado", "cEstado"]))),
        ("cep", json!(grouped_text(item, address, "cep", &["cep", "cCEP"]))),
        ("inscricao_estadual", json!(text(item, &["inscricao_estadual", "cInscEstadual"]))),
        ("inscricao_municipal", json!(text(item, &["inscricao_municipal", "cInscMunicipal"]))),
        (
            "pessoa_fisica",
            json!(or_default(text(item, &["pessoa_fisica", "cPessoaFisica"]), "N")),
        ),
        ("inativo", json!(or_default(text(item, &["inativo", "cInativo"]), "N"))),
        ("data_cadastro", json!(text(item, &["data_cadastro", "dDtInc"]))),
        ("data_alteracao", json!(text(item, &["data_alteracao", "dDtAlt"]))),
    ]);
    retain_truthy(&mut record, &["codigo_cliente_omie"]);
    Some(record)
}
