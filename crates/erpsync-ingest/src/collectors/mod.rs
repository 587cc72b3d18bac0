//! ERP entity collectors and the registry that orders them.
//!
//! Each submodule describes one endpoint. The field helpers below mirror how the API
//! behaves in practice: the same field can arrive under several names, zero and empty
//! strings mean "absent", and nested groups may be missing entirely.

mod categorias;
mod clientes;
mod conta_corrente;
mod contas;
mod contas_dre;
mod crm_oportunidades;
mod etapas_faturamento;
mod extrato;
mod nf_consultar;
mod nfse;
mod ordem_servico;
mod pedido_vendas;
mod pedidos_compra;
mod produto_fornecedor;
mod produtos;
mod resumo;
mod servicos;

pub use categorias::CategoriasCollector;
pub use clientes::ClientesCollector;
pub use conta_corrente::ContaCorrenteCollector;
pub use contas::{ContasPagarCollector, ContasReceberCollector};
pub use contas_dre::ContasDreCollector;
pub use crm_oportunidades::CrmOportunidadesCollector;
pub use etapas_faturamento::EtapasFaturamentoCollector;
pub use extrato::ExtratoCollector;
pub use nf_consultar::NfConsultarCollector;
pub use nfse::NfseCollector;
pub use ordem_servico::OrdemServicoCollector;
pub use pedido_vendas::PedidoVendasCollector;
pub use pedidos_compra::PedidosCompraCollector;
pub use produto_fornecedor::ProdutoFornecedorCollector;
pub use produtos::ProdutosCollector;
pub use resumo::{ServicoResumoCollector, VendasResumoCollector};
pub use servicos::ServicosCollector;

use crate::client::{Payload, Response};
use crate::collector::lookup::locate_records;
use crate::collector::Collector;
use erpsync_common::normalize::flatten;
use erpsync_common::{Record, TableSchema};
use serde_json::Value;
use std::sync::Arc;

/// Every collector, in the order sequential runs execute them.
pub fn registry() -> Vec<Arc<dyn Collector>> {
    vec![
        Arc::new(ClientesCollector),
        Arc::new(ProdutosCollector),
        Arc::new(ServicosCollector),
        Arc::new(CategoriasCollector),
        Arc::new(ContasReceberCollector),
        Arc::new(ContasPagarCollector),
        Arc::new(ContaCorrenteCollector),
        Arc::new(ExtratoCollector),
        Arc::new(OrdemServicoCollector),
        Arc::new(ContasDreCollector),
        Arc::new(PedidoVendasCollector),
        Arc::new(PedidosCompraCollector),
        Arc::new(CrmOportunidadesCollector),
        Arc::new(EtapasFaturamentoCollector),
        Arc::new(ProdutoFornecedorCollector),
        Arc::new(ServicoResumoCollector),
        Arc::new(VendasResumoCollector),
        Arc::new(NfseCollector),
        Arc::new(NfConsultarCollector),
    ]
}

/// Build a payload from key/value pairs.
pub(crate) fn payload<I>(pairs: I) -> Payload
where
    I: IntoIterator<Item = (&'static str, Value)>,
{
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

/// Build a record from column/value pairs.
pub(crate) fn row<I>(pairs: I) -> Record
where
    I: IntoIterator<Item = (&'static str, Value)>,
{
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

/// Loose truthiness: null, false, zero, and empty strings or containers are absent.
pub(crate) fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Value at a nested `path`, if every step is an object.
pub(crate) fn nested<'a>(item: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter()
        .try_fold(item, |current, key| current.as_object()?.get(*key))
        .filter(|v| !v.is_null())
}

/// Object at `key`, or an empty stand-in.
pub(crate) fn group<'a>(item: &'a Value, key: &str) -> &'a Value {
    static EMPTY: Value = Value::Null;
    match item.get(key) {
        Some(value @ Value::Object(_)) => value,
        _ => &EMPTY,
    }
}

/// First truthy value among `keys`.
pub(crate) fn first<'a>(item: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| item.get(*key))
        .find(|value| truthy(value))
}

/// Text form of a scalar, without JSON quoting.
pub(crate) fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// First truthy value among `keys` as text, or empty.
pub(crate) fn text(item: &Value, keys: &[&str]) -> String {
    first(item, keys).map(as_text).unwrap_or_default()
}

/// Keep at most `max` characters.
pub(crate) fn truncate(mut s: String, max: usize) -> String {
    if let Some((idx, _)) = s.char_indices().nth(max) {
        s.truncate(idx);
    }
    s
}

/// Text at a nested path (truthy only), or empty.
pub(crate) fn nested_text(item: &Value, path: &[&str]) -> String {
    nested(item, path)
        .filter(|v| truthy(v))
        .map(as_text)
        .unwrap_or_default()
}

/// Text of `key` inside `group`, falling back to the first truthy `flat` field of `item`.
pub(crate) fn grouped_text(item: &Value, group: &Value, key: &str, flat: &[&str]) -> String {
    match nested_text(group, &[key]) {
        s if s.is_empty() => text(item, flat),
        s => s,
    }
}

/// `value`, or `default` when it is empty.
pub(crate) fn or_default(value: String, default: &str) -> String {
    if value.is_empty() {
        default.to_string()
    } else {
        value
    }
}

/// Truthy value at `path`, or null.
pub(crate) fn nested_or_null(item: &Value, path: &[&str]) -> Value {
    nested(item, path)
        .filter(|v| truthy(v))
        .cloned()
        .unwrap_or(Value::Null)
}

/// Drop falsy fields, keeping `always` columns regardless.
pub(crate) fn retain_truthy(record: &mut Record, always: &[&str]) {
    record.retain(|key, value| truthy(value) || always.contains(&key.as_str()));
}

/// Locate the entity list, flatten each object, and keep only the table's data columns.
/// Rows left with no columns are dropped.
pub(crate) fn generic_rows(response: &Response, candidates: &[&str], schema: &TableSchema) -> Vec<Record> {
    let columns: Vec<&str> = schema.data_columns().map(|c| c.name.as_str()).collect();
    locate_records(response, candidates)
        .into_iter()
        .filter_map(Value::as_object)
        .map(|item| {
            flatten(item)
                .into_iter()
                .filter(|(key, _)| columns.contains(&key.as_str()))
                .collect::<Record>()
        })
        .filter(|record| !record.is_empty())
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
pub(crate) mod test_support {
    use crate::client::Response;
    use serde_json::Value;

    pub fn response(value: Value) -> Response {
        value.as_object().cloned().expect("response fixture is an object")
    }
}
