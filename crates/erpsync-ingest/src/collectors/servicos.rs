use super::{group, grouped_text, or_default, retain_truthy, row, truthy};
use crate::client::{Payload, Response};
use crate::collector::lookup::locate_records;
use crate::collector::{CollectionContext, Collector};
use erpsync_common::{Column, ColumnType, Record, TableSchema};
use serde_json::{json, Value};
use tracing::debug;

/// Response keys this endpoint has been seen to use.
const LIST_KEYS: [&str; 7] = [
    "cadastros",
    "listaServicosCadastro",
    "servicos_cadastro",
    "servico_cadastro",
    "cadastro",
    "srvListarResponse",
    "listaServicoCadastro",
];

/// Services (`servicos/servico/`).
pub struct ServicosCollector;

impl Collector for ServicosCollector {
    fn endpoint(&self) -> &'static str {
        "servicos/servico/"
    }

    fn method(&self) -> &'static str {
        "ListarCadastroServico"
    }

    fn table_name(&self) -> &'static str {
        "servicos"
    }

    fn schema(&self) -> TableSchema {
        use ColumnType::*;
        TableSchema::new(vec![
            Column::new("codigo_servico", Varchar(50)).primary_key(),
            Column::new("codigo_servico_integracao", Varchar(50)),
            Column::new("descricao", Varchar(255)),
            Column::new("valor_unitario", Decimal(15, 2)),
            Column::new("categoria", Varchar(100)),
            Column::new("inativo", Char(1)),
            Column::new("data_cadastro", DateTime),
            Column::new("data_alteracao", DateTime),
        ])
        .with_timestamps()
    }

    fn build_payload(&self, page: u32, page_size: u32, _ctx: &CollectionContext) -> Option<Payload> {
        Some(super::payload([
            ("nPagina", json!(page)),
            ("nRegPorPagina", json!(page_size)),
        ]))
    }

    fn transform(&self, response: &Response) -> Vec<Record> {
        service_list(response)
            .into_iter()
            .filter_map(map_service)
            .collect()
    }
}

/// The list may sit directly under a key or one level down inside an object.
fn service_list(response: &Response) -> Vec<&Value> {
    for key in LIST_KEYS {
        match response.get(key) {
            Some(Value::Array(items)) => return items.iter().collect(),
            Some(Value::Object(inner)) => {
                if let Some((sub_key, Value::Array(items))) =
                    inner.iter().find(|(_, v)| v.is_array())
                {
                    debug!(key, sub_key = %sub_key, count = items.len(), "Service list found");
                    return items.iter().collect();
                }
            },
            _ => {},
        }
    }
    locate_records(response, &[])
}

fn map_service(item: &Value) -> Option<Record> {
    let ids = group(item, "intListar");
    let header = group(item, "cabecalho");
    let info = group(item, "info");

    let code = grouped_text(
        item,
        ids,
        "nCodServ",
        &["nCodServico", "codigo_servico", "codigo", "nCodigo"],
    );
    if code.is_empty() {
        return None;
    }

    let price = header
        .get("nPrecoUnit")
        .filter(|v| truthy(v))
        .or_else(|| super::first(item, &["nValorUnitario", "valor_unitario", "nValor"]))
        .cloned()
        .unwrap_or(Value::Null);

    let inativo = or_default(
        grouped_text(item, info, "inativo", &["cInativo", "inativo", "cAtivo"]),
        "N",
    );

    let mut record = row([
        ("codigo_servico", json!(code)),
        (
            "codigo_servico_integracao",
            json!(grouped_text(
                item,
                ids,
                "cCodIntServ",
                &["cCodIntServico", "codigo_servico_integracao", "codigo_integracao", "cCodInt"],
            )),
        ),
        (
            "descricao",
            json!(grouped_text(item, header, "cDescricao", &["cDescricao", "descricao", "cNome"])),
        ),
        ("valor_unitario", price),
        (
            "categoria",
            json!(grouped_text(item, header, "cCodCateg", &["cCategoria", "categoria"])),
        ),
        ("inativo", json!(inativo)),
        (
            "data_cadastro",
            json!(grouped_text(item, info, "dInc", &["dDtInc", "data_cadastro", "dDataInc"])),
        ),
        (
            "data_alteracao",
            json!(grouped_text(item, info, "dAlt", &["dDtAlt", "data_alteracao", "dDataAlt"])),
        ),
    ]);
    retain_truthy(&mut record, &["codigo_servico"]);
    Some(record)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::collectors::test_support::response;

    #[test]
    fn test_nested_service_groups() {
        let raw = response(json!({
            "nPagina": 1,
            "nTotPaginas": 1,
            "cadastros": [{
                "intListar": {"nCodServ": 3071, "cCodIntServ": "SRV-1"},
                "cabecalho": {"cDescricao": "Consultoria", "nPrecoUnit": 150.5, "cCodCateg": "1.01.02"},
                "info": {"dInc": "05/03/2024", "inativo": "N"}
            }]
        }));

        let rows = ServicosCollector.transform(&raw);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["codigo_servico"], json!("3071"));
        assert_eq!(rows[0]["codigo_servico_integracao"], json!("SRV-1"));
        assert_eq!(rows[0]["valor_unitario"], json!(150.5));
        assert_eq!(rows[0]["categoria"], json!("1.01.02"));
        assert_eq!(rows[0]["data_cadastro"], json!("05/03/2024"));
        assert!(!rows[0].contains_key("data_alteracao"));
    }

    #[test]
    fn test_list_wrapped_in_object_and_rows_without_code() {
        let raw = response(json!({
            "srvListarResponse": {
                "total": 2,
                "lista": [
                    {"nCodServico": 9, "cDescricao": "Suporte", "nValorUnitario": 0},
                    {"cDescricao": "Sem codigo"}
                ]
            }
        }));

        let rows = ServicosCollector.transform(&raw);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["codigo_servico"], json!("9"));
        assert_eq!(rows[0]["inativo"], json!("N"));
        assert!(!rows[0].contains_key("valor_unitario"));
    }
}
