//! Shared fakes for erpsync integration tests
//!
//! - [`ScriptedApi`]: an [`ApiClient`] that answers from per-endpoint scripts and records
//!   every call
//! - [`MemoryBackend`]: a [`StorageBackend`] keeping rows in memory in their stored form,
//!   recording inserts and answering queries from canned rows
//! - [`ItemsCollector`]: a minimal configurable collector over an `items` list

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use erpsync_common::normalize::{flatten, key_from_record, prepare_row, storage_value};
use erpsync_common::{Column, ColumnType, Record, RecordKey, TableSchema};
use erpsync_ingest::client::{ApiClient, ApiError, Payload, Response};
use erpsync_ingest::collector::lookup::locate_records;
use erpsync_ingest::collector::{CollectionContext, Collector};
use erpsync_ingest::storage::{StorageBackend, StorageError};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, Once};

static TRACING: Once = Once::new();

/// Install a test subscriber once per binary; honors `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "warn".into()),
            )
            .with_test_writer()
            .try_init();
    });
}

pub fn object(value: Value) -> Record {
    value.as_object().cloned().expect("fixture is an object")
}

/// `{"items": [...], ...extra}`
pub fn items_page(ids: impl IntoIterator<Item = i64>, extra: Value) -> Value {
    let items: Vec<Value> = ids
        .into_iter()
        .map(|id| json!({"codigo": id, "nome": format!("item {id}")}))
        .collect();
    let mut page = object(json!({ "items": items }));
    if let Value::Object(extra) = extra {
        page.extend(extra);
    }
    Value::Object(page)
}

// ============================================================================
// Scripted API
// ============================================================================

#[derive(Debug, Clone)]
pub struct Call {
    pub endpoint: String,
    pub method: String,
    pub payload: Payload,
}

#[derive(Default)]
struct Script {
    queue: VecDeque<Result<Response, ApiError>>,
    /// Answer once the queue is drained
    fallback: Option<Response>,
}

/// Answers each endpoint from a queue, then from its fallback, then with `{}`.
#[derive(Default)]
pub struct ScriptedApi {
    scripts: Mutex<HashMap<String, Script>>,
    calls: Mutex<Vec<Call>>,
    closed: AtomicBool,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(self, endpoint: &str, response: Value) -> Self {
        self.with_script(endpoint, |s| s.queue.push_back(Ok(object(response))));
        self
    }

    pub fn push_error(self, endpoint: &str, error: ApiError) -> Self {
        self.with_script(endpoint, |s| s.queue.push_back(Err(error)));
        self
    }

    pub fn always(self, endpoint: &str, response: Value) -> Self {
        self.with_script(endpoint, |s| s.fallback = Some(object(response)));
        self
    }

    fn with_script(&self, endpoint: &str, edit: impl FnOnce(&mut Script)) {
        let mut scripts = self.scripts.lock().unwrap();
        edit(scripts.entry(endpoint.to_string()).or_default());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, endpoint: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.endpoint == endpoint)
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ApiClient for ScriptedApi {
    async fn request(
        &self,
        endpoint: &str,
        method: &str,
        params: &Payload,
    ) -> Result<Response, ApiError> {
        self.calls.lock().unwrap().push(Call {
            endpoint: endpoint.to_string(),
            method: method.to_string(),
            payload: params.clone(),
        });

        let mut scripts = self.scripts.lock().unwrap();
        let script = scripts.entry(endpoint.to_string()).or_default();
        match script.queue.pop_front() {
            Some(answer) => answer,
            None => Ok(script.fallback.clone().unwrap_or_default()),
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

// ============================================================================
// In-memory storage
// ============================================================================

/// Rows per table, plus a log of every insert call.
#[derive(Default)]
pub struct MemoryBackend {
    tables: Mutex<HashMap<String, Vec<Record>>>,
    schemas: Mutex<HashMap<String, TableSchema>>,
    inserts: Mutex<Vec<(String, usize)>>,
    truncates: AtomicUsize,
    failing_inserts: Mutex<HashSet<String>>,
    failing_key_lookup: AtomicBool,
    failing_tables: Mutex<HashSet<String>>,
    closes: AtomicUsize,
    answers: Mutex<Vec<(String, Vec<Record>)>>,
    queries: Mutex<Vec<String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every insert into `table` fails.
    pub fn fail_inserts_into(self, table: &str) -> Self {
        self.failing_inserts.lock().unwrap().insert(table.to_string());
        self
    }

    /// `create_table` fails for `table`.
    pub fn fail_create(self, table: &str) -> Self {
        self.failing_tables.lock().unwrap().insert(table.to_string());
        self
    }

    pub fn fail_key_lookup(self) -> Self {
        self.failing_key_lookup.store(true, Ordering::SeqCst);
        self
    }

    /// Queries containing `fragment` return `rows`; the first matching fragment wins.
    pub fn answer_query(self, fragment: &str, rows: Vec<Value>) -> Self {
        let rows = rows.into_iter().map(object).collect();
        self.answers.lock().unwrap().push((fragment.to_string(), rows));
        self
    }

    /// Every SQL text passed to `execute_query`, in call order.
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    pub fn seed(&self, table: &str, rows: Vec<Record>) {
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .extend(rows);
    }

    pub fn rows(&self, table: &str) -> Vec<Record> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.schemas.lock().unwrap().contains_key(table)
    }

    /// Row counts of the insert calls into `table`, in call order.
    pub fn insert_sizes(&self, table: &str) -> Vec<usize> {
        self.inserts
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == table)
            .map(|(_, n)| *n)
            .collect()
    }

    pub fn truncate_count(&self) -> usize {
        self.truncates.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn kind(&self) -> &'static str {
        "memory"
    }

    fn table_ref(&self, name: &str) -> String {
        name.to_string()
    }

    async fn create_table(&self, name: &str, schema: &TableSchema) -> Result<(), StorageError> {
        if self.failing_tables.lock().unwrap().contains(name) {
            return Err(StorageError::Config(format!("cannot create {name}")));
        }
        self.schemas
            .lock()
            .unwrap()
            .insert(name.to_string(), schema.clone());
        self.tables.lock().unwrap().entry(name.to_string()).or_default();
        Ok(())
    }

    async fn truncate_table(&self, name: &str) -> Result<(), StorageError> {
        self.truncates.fetch_add(1, Ordering::SeqCst);
        if let Some(rows) = self.tables.lock().unwrap().get_mut(name) {
            rows.clear();
        }
        Ok(())
    }

    async fn get_existing_keys(
        &self,
        name: &str,
        key_columns: &[&str],
    ) -> Result<HashSet<RecordKey>, StorageError> {
        if self.failing_key_lookup.load(Ordering::SeqCst) {
            return Err(StorageError::TableNotFound(name.to_string()));
        }
        Ok(self
            .rows(name)
            .iter()
            .filter_map(|row| key_from_record(row, key_columns))
            .collect())
    }

    async fn insert_batch(&self, name: &str, records: &[Record]) -> Result<u64, StorageError> {
        self.inserts
            .lock()
            .unwrap()
            .push((name.to_string(), records.len()));
        if self.failing_inserts.lock().unwrap().contains(name) {
            return Err(StorageError::Serialization(format!("insert into {name} rejected")));
        }
        // Same row shape a real backend writes: known columns only, dates in ISO form
        let columns: Option<Vec<String>> = self
            .schemas
            .lock()
            .unwrap()
            .get(name)
            .map(|schema| schema.column_names().map(str::to_string).collect());
        let stored = records
            .iter()
            .map(|record| match &columns {
                Some(columns) => prepare_row(record, columns),
                None => flatten(record)
                    .into_iter()
                    .map(|(key, value)| {
                        let value = storage_value(&value);
                        (key, value)
                    })
                    .collect(),
            })
            .collect();
        self.seed(name, stored);
        Ok(records.len() as u64)
    }

    /// Canned answers first; otherwise `SELECT <column> FROM <table>` reads stored rows.
    async fn execute_query(&self, sql: &str) -> Result<Vec<Record>, StorageError> {
        self.queries.lock().unwrap().push(sql.to_string());
        let canned = self
            .answers
            .lock()
            .unwrap()
            .iter()
            .find(|(fragment, _)| sql.contains(fragment.as_str()))
            .map(|(_, rows)| rows.clone());
        if let Some(rows) = canned {
            return Ok(rows);
        }

        let words: Vec<&str> = sql.split_whitespace().collect();
        match words.as_slice() {
            ["SELECT", column, "FROM", table, ..] => Ok(self
                .rows(table)
                .iter()
                .map(|row| {
                    let value = row.get(*column).cloned().unwrap_or(Value::Null);
                    let mut projected = Record::new();
                    projected.insert(column.to_string(), value);
                    projected
                })
                .collect()),
            _ => Ok(Vec::new()),
        }
    }

    async fn table_count(&self, name: &str) -> Result<u64, StorageError> {
        Ok(self.rows(name).len() as u64)
    }

    fn quote(&self, ident: &str) -> String {
        format!("\"{ident}\"")
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Test collector
// ============================================================================

/// Paginated collector over `{"items": [{"codigo", "nome"}]}` responses.
pub struct ItemsCollector {
    pub name: &'static str,
    pub endpoint: &'static str,
    pub keys: &'static [&'static str],
    pub incremental: bool,
}

impl ItemsCollector {
    pub fn new(name: &'static str, endpoint: &'static str) -> Self {
        Self {
            name,
            endpoint,
            keys: &[],
            incremental: false,
        }
    }

    pub fn keyed(mut self) -> Self {
        self.keys = &["codigo"];
        self
    }

    pub fn incremental(mut self) -> Self {
        self.incremental = true;
        self
    }
}

impl Collector for ItemsCollector {
    fn name(&self) -> &'static str {
        self.name
    }

    fn endpoint(&self) -> &'static str {
        self.endpoint
    }

    fn method(&self) -> &'static str {
        "ListarItems"
    }

    fn table_name(&self) -> &'static str {
        self.name
    }

    fn schema(&self) -> TableSchema {
        TableSchema::new(vec![
            Column::surrogate_id(),
            Column::new("codigo", ColumnType::BigInt).unique(),
            Column::new("nome", ColumnType::Varchar(100)),
        ])
        .with_timestamps()
    }

    fn build_payload(&self, page: u32, page_size: u32, ctx: &CollectionContext) -> Option<Payload> {
        let mut payload = object(json!({
            "pagina": page,
            "registros_por_pagina": page_size,
        }));
        if let Some(window) = ctx.incremental_window() {
            payload.insert("filtrar_por_data_de".into(), json!(window.start_day_first()));
            payload.insert("filtrar_por_data_ate".into(), json!(window.end_day_first()));
        }
        Some(payload)
    }

    fn transform(&self, response: &Response) -> Vec<Record> {
        locate_records(response, &["items"])
            .into_iter()
            .filter_map(Value::as_object)
            .cloned()
            .collect()
    }

    fn supports_incremental(&self) -> bool {
        self.incremental
    }

    fn unique_key_columns(&self) -> &'static [&'static str] {
        self.keys
    }
}
