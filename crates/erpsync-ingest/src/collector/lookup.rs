//! Locating the entity list inside differently shaped responses.
//!
//! The ERP wraps list results under endpoint-specific keys. Collectors pass their own
//! candidate keys; this module then tries the keys seen across the API and finally any
//! top-level list of objects.

use crate::client::Response;
use serde_json::Value;
use tracing::{debug, warn};

/// Response keys known to hold entity lists, in lookup order.
pub const KNOWN_LIST_KEYS: &[&str] = &[
    "clientes_cadastro",
    "produto_servico_cadastro",
    "servicos_cadastro",
    "categoria_cadastro",
    "conta_receber_cadastro",
    "conta_pagar_cadastro",
    "extrato",
    "movimento",
    "conta_corrente",
    "contrato",
    "ordem_servico",
    "projeto",
    "tipo_faturamento",
    "conta_dre",
    "fornecedor_cadastro",
    "vendedor_cadastro",
    "pedido_venda_produto",
    "osCadastro",
    "lista_os_cadastro",
    "listaServicosCadastro",
    "listaCategoriaCadastro",
];

/// Find the entity list in `response`.
///
/// `candidates` are tried first, then [`KNOWN_LIST_KEYS`]. A key qualifies when it holds
/// a list or an object with a `cadastro` list. Falls back to the first non-empty top-level list whose first
/// element is an object. Logs the available keys when nothing is found.
pub fn locate_records<'a>(response: &'a Response, candidates: &[&str]) -> Vec<&'a Value> {
    for key in candidates.iter().chain(KNOWN_LIST_KEYS.iter()) {
        if let Some(items) = response.get(*key).and_then(list_under_key) {
            debug!(key, count = items.len(), "Entity list found");
            return items;
        }
    }

    for (key, value) in response {
        if let Value::Array(items) = value {
            if items.first().is_some_and(Value::is_object) {
                debug!(key = %key, count = items.len(), "Entity list found by generic search");
                return items.iter().collect();
            }
        }
    }

    let keys: Vec<&str> = response.keys().map(String::as_str).collect();
    warn!(available_keys = ?keys, "No entity list found in response");
    Vec::new()
}

fn list_under_key(value: &Value) -> Option<Vec<&Value>> {
    match value {
        Value::Array(items) => Some(items.iter().collect()),
        Value::Object(map) => match map.get("cadastro") {
            Some(Value::Array(items)) => Some(items.iter().collect()),
            _ => None,
        },
        _ => None,
    }
}

/// Like [`locate_records`] but also accepts a bare object under a candidate key, for
/// endpoints that return a single entity instead of a one-element list.
pub fn locate_records_or_single<'a>(response: &'a Response, candidates: &[&str]) -> Vec<&'a Value> {
    for key in candidates {
        if let Some(value) = response.get(*key) {
            if value
                .as_object()
                .is_some_and(|map| !map.contains_key("cadastro"))
            {
                return vec![value];
            }
        }
    }
    locate_records(response, candidates)
}
