//! Record normalization shared by every storage backend.
//!
//! Both backends must store the same representation of a record, and incremental
//! deduplication compares keys read back from storage against keys derived from fresh
//! records. Everything that decides that representation lives here:
//!
//! - [`flatten`] joins nested object keys with `_` and turns lists into JSON text
//! - [`storage_value`] serializes nested values and rewrites day/month/year dates to ISO
//! - [`key_from_record`] derives the comparable [`RecordKey`] using the same rules

use chrono::NaiveDate;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::LazyLock;

/// A flat column-name to scalar mapping, one per destination row.
pub type Record = Map<String, Value>;

#[allow(clippy::expect_used)]
static ISO_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4})-(\d{2})-(\d{2})(?:[T ](\d{2}):(\d{2}):(\d{2}))?")
        .expect("ISO date pattern compiles")
});

#[allow(clippy::expect_used)]
static DAY_FIRST_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,2})[/-](\d{1,2})[/-](\d{4})(?:\s+(\d{1,2}):(\d{1,2}):(\d{1,2}))?$")
        .expect("day-first date pattern compiles")
});

#[allow(clippy::expect_used)]
static DECIMAL_TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-?\d+\.\d+$").expect("decimal pattern compiles"));

/// Flatten nested objects into `parent_child` keys.
///
/// Non-empty lists become their JSON text and empty lists become null.
pub fn flatten(record: &Record) -> Record {
    let mut out = Record::new();
    flatten_into(&mut out, None, record);
    out
}

fn flatten_into(out: &mut Record, prefix: Option<&str>, map: &Record) {
    for (key, value) in map {
        let name = match prefix {
            Some(prefix) => format!("{prefix}_{key}"),
            None => key.clone(),
        };
        match value {
            Value::Object(inner) => flatten_into(out, Some(&name), inner),
            Value::Array(items) if items.is_empty() => {
                out.insert(name, Value::Null);
            },
            Value::Array(_) => {
                out.insert(name, Value::String(value.to_string()));
            },
            other => {
                out.insert(name, other.clone());
            },
        }
    }
}

/// Rewrite a date string into `YYYY-MM-DD` (or `YYYY-MM-DD HH:MM:SS`).
///
/// Accepts ISO input and day-first input with `/` or `-` separators. Returns `None` for
/// anything else, including impossible calendar dates.
pub fn normalize_date(raw: &str) -> Option<String> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    let (year, month, day, time) = if let Some(caps) = ISO_DATE.captures(s) {
        (
            caps[1].parse::<i32>().ok()?,
            caps[2].parse::<u32>().ok()?,
            caps[3].parse::<u32>().ok()?,
            caps.get(4)
                .map(|_| format!("{}:{}:{}", &caps[4], &caps[5], &caps[6])),
        )
    } else if let Some(caps) = DAY_FIRST_DATE.captures(s) {
        (
            caps[3].parse::<i32>().ok()?,
            caps[2].parse::<u32>().ok()?,
            caps[1].parse::<u32>().ok()?,
            caps.get(4).map(|_| {
                format!("{:0>2}:{:0>2}:{:0>2}", &caps[4], &caps[5], &caps[6])
            }),
        )
    } else {
        return None;
    };

    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let iso = date.format("%Y-%m-%d").to_string();
    Some(match time {
        Some(time) => format!("{iso} {time}"),
        None => iso,
    })
}

/// Storage form of one value: nested values as JSON text, date-like strings in ISO form,
/// everything else unchanged.
pub fn storage_value(value: &Value) -> Value {
    match value {
        Value::Object(_) | Value::Array(_) => Value::String(value.to_string()),
        Value::String(s) => normalize_date(s)
            .map(Value::String)
            .unwrap_or_else(|| value.clone()),
        other => other.clone(),
    }
}

/// Flatten `record`, keep only `columns`, and serialize every kept value for storage.
pub fn prepare_row<S: AsRef<str>>(record: &Record, columns: &[S]) -> Record {
    flatten(record)
        .into_iter()
        .filter(|(key, _)| columns.iter().any(|c| c.as_ref() == key))
        .map(|(key, value)| {
            let value = storage_value(&value);
            (key, value)
        })
        .collect()
}

/// Text form of a scalar as it is bound to a statement. Null stays `None`.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

/// Comparable identity of a record: one normalized component per key column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RecordKey(Vec<Option<String>>);

impl RecordKey {
    pub fn new(parts: Vec<Option<String>>) -> Self {
        Self(parts)
    }

    pub fn single(value: impl Into<String>) -> Self {
        Self(vec![Some(value.into())])
    }

    pub fn parts(&self) -> &[Option<String>] {
        &self.0
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("|")?;
            }
            f.write_str(part.as_deref().unwrap_or("null"))?;
        }
        Ok(())
    }
}

/// Normalized key component for one stored or fresh value.
///
/// Decimal text loses trailing zeros so `"12.50"` read back from a numeric column
/// matches a fresh `12.5`.
pub fn key_component(value: &Value) -> Option<String> {
    let text = scalar_text(&storage_value(value))?;
    if DECIMAL_TEXT.is_match(&text) {
        let trimmed = text.trim_end_matches('0').trim_end_matches('.');
        return Some(trimmed.to_string());
    }
    Some(text)
}

/// Derive the key of `record` for `key_columns`.
///
/// Returns `None` when no key columns are declared or every component is null.
pub fn key_from_record<S: AsRef<str>>(record: &Record, key_columns: &[S]) -> Option<RecordKey> {
    if key_columns.is_empty() {
        return None;
    }
    let flat = flatten(record);
    let parts: Vec<Option<String>> = key_columns
        .iter()
        .map(|column| flat.get(column.as_ref()).and_then(key_component))
        .collect();

    if parts.iter().all(Option::is_none) {
        return None;
    }
    Some(RecordKey(parts))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_normalize_day_first_dates() {
        assert_eq!(normalize_date("05/03/2024").as_deref(), Some("2024-03-05"));
        assert_eq!(normalize_date("5/3/2024").as_deref(), Some("2024-03-05"));
        assert_eq!(normalize_date("05-03-2024").as_deref(), Some("2024-03-05"));
        assert_eq!(
            normalize_date("05/03/2024 7:04:09").as_deref(),
            Some("2024-03-05 07:04:09")
        );
    }

    #[test]
    fn test_normalize_iso_dates() {
        assert_eq!(normalize_date("2024-03-05").as_deref(), Some("2024-03-05"));
        assert_eq!(
            normalize_date("2024-03-05T10:11:12Z").as_deref(),
            Some("2024-03-05 10:11:12")
        );
        assert_eq!(normalize_date(" 2024-03-05 ").as_deref(), Some("2024-03-05"));
    }

    #[test]
    fn test_normalize_rejects_non_dates() {
        assert_eq!(normalize_date(""), None);
        assert_eq!(normalize_date("CC001"), None);
        assert_eq!(normalize_date("31/02/2024"), None);
        assert_eq!(normalize_date("12/2024"), None);
    }

    #[test]
    fn test_normalized_value_is_stable() {
        let once = storage_value(&json!("05/03/2024"));
        let twice = storage_value(&once);
        assert_eq!(once, json!("2024-03-05"));
        assert_eq!(once, twice);
    }

    #[test]
    fn test_flatten_nested_objects_and_lists() {
        let flat = flatten(&record(json!({
            "codigo": 7,
            "endereco": {"cidade": "Recife", "geo": {"uf": "PE"}},
            "tags": ["a", "b"],
            "vazio": [],
        })));

        assert_eq!(flat["codigo"], json!(7));
        assert_eq!(flat["endereco_cidade"], json!("Recife"));
        assert_eq!(flat["endereco_geo_uf"], json!("PE"));
        assert_eq!(flat["tags"], json!("[\"a\",\"b\"]"));
        assert_eq!(flat["vazio"], Value::Null);
    }

    #[test]
    fn test_prepare_row_filters_columns() {
        let row = prepare_row(
            &record(json!({
                "codigo_lancamento": "42",
                "data_vencimento": "10/01/2025",
                "info": {"dAlt": "01/01/2025"},
                "desconhecido": 1,
            })),
            &["codigo_lancamento", "data_vencimento", "info_dAlt"],
        );

        assert_eq!(row.len(), 3);
        assert_eq!(row["data_vencimento"], json!("2025-01-10"));
        assert_eq!(row["info_dAlt"], json!("2025-01-01"));
    }

    #[test]
    fn test_key_from_record() {
        let rec = record(json!({"codigo": 10, "serie": "A", "nada": null}));
        assert_eq!(key_from_record(&rec, &["codigo"]), Some(RecordKey::single("10")));
        assert_eq!(
            key_from_record(&rec, &["codigo", "serie"]).unwrap().to_string(),
            "10|A"
        );
        assert_eq!(key_from_record(&rec, &["nada"]), None);
        assert_eq!(key_from_record::<&str>(&rec, &[]), None);
    }

    #[test]
    fn test_key_components_match_across_representations() {
        assert_eq!(key_component(&json!("12.50")), key_component(&json!(12.5)));
        assert_eq!(key_component(&json!("7.0")), key_component(&json!(7)));
        assert_eq!(
            key_component(&json!("05/03/2024")),
            key_component(&json!("2024-03-05"))
        );
        assert_ne!(key_component(&json!("0012")), key_component(&json!(12)));
    }
}
