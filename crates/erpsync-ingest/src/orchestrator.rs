// Collection orchestrator
//
// Owns the collector registry and drives each collector through collect, dedup or
// truncate, then chunked insert. Collectors run strictly in registry order or on a
// bounded number of concurrent tasks via buffer_unordered; pages inside a collector
// are always sequential.

use crate::client::ApiClient;
use crate::collector::{CollectionContext, CollectionLoop, Collector, DateWindow};
use crate::collectors;
use crate::config::{SyncConfig, DEFAULT_INSERT_BATCH_SIZE};
use crate::metrics::{metrics_schema, MetricsCollector, METRICS_TABLE};
use crate::storage::{StorageBackend, StorageError};
use erpsync_common::{Record, RecordKey};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Records per `insert_batch` call.
pub const INSERT_BATCH_SIZE: usize = DEFAULT_INSERT_BATCH_SIZE;

/// Collectors of the financial pass, by registry name.
pub const FINANCIAL_COLLECTORS: [&str; 3] = ["contas_receber", "contas_pagar", "extrato"];

/// Outcome of one collector's collect-and-load sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionResult {
    pub collector: String,
    pub table: String,
    pub success: bool,
    pub records: u64,
    pub message: String,
}

impl CollectionResult {
    fn ok(collector: &dyn Collector, records: u64, message: impl Into<String>) -> Self {
        Self {
            collector: collector.name().to_string(),
            table: collector.table_name().to_string(),
            success: true,
            records,
            message: message.into(),
        }
    }

    fn failed(collector: &dyn Collector, message: impl Into<String>) -> Self {
        Self {
            collector: collector.name().to_string(),
            table: collector.table_name().to_string(),
            success: false,
            records: 0,
            message: message.into(),
        }
    }
}

impl fmt::Display for CollectionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.success { "OK" } else { "ERROR" };
        write!(f, "[{status}] {}: {}", self.table, self.message)
    }
}

/// Results of one run, in completion order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub results: Vec<CollectionResult>,
    pub duration_secs: f64,
}

impl RunReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    pub fn total_records(&self) -> u64 {
        self.results.iter().map(|r| r.records).sum()
    }

    pub fn extend(&mut self, other: RunReport) {
        self.results.extend(other.results);
        self.duration_secs += other.duration_secs;
    }
}

/// How a set of collectors is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Registry order with a pause between collectors
    #[default]
    Sequential,
    /// At most `max_workers` collectors in flight; results arrive in completion order
    Parallel { max_workers: usize },
}

impl ExecutionMode {
    pub fn parallel(max_workers: usize) -> Self {
        ExecutionMode::Parallel {
            max_workers: max_workers.max(1),
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Sequential => f.write_str("sequential"),
            ExecutionMode::Parallel { max_workers } => write!(f, "parallel({max_workers})"),
        }
    }
}

pub struct Orchestrator {
    collection: CollectionLoop,
    storage: Arc<dyn StorageBackend>,
    metrics: Arc<MetricsCollector>,
    collectors: Vec<Arc<dyn Collector>>,
    settings: SyncConfig,
    closed: AtomicBool,
}

impl Orchestrator {
    /// Orchestrator over the full collector registry.
    pub fn new(
        api: Arc<dyn ApiClient>,
        storage: Arc<dyn StorageBackend>,
        metrics: Arc<MetricsCollector>,
        settings: SyncConfig,
    ) -> Self {
        let collection = CollectionLoop::new(api)
            .with_page_delay(settings.page_delay)
            .with_max_iterations(settings.max_iterations);

        Self {
            collection,
            storage,
            metrics,
            collectors: collectors::registry(),
            settings,
            closed: AtomicBool::new(false),
        }
    }

    /// Replace the registry, keeping the given order.
    pub fn with_collectors(mut self, collectors: Vec<Arc<dyn Collector>>) -> Self {
        self.collectors = collectors;
        self
    }

    pub fn collectors(&self) -> &[Arc<dyn Collector>] {
        &self.collectors
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    /// Context every run starts from: configured page size and statement account.
    pub fn base_context(&self) -> CollectionContext {
        let ctx = CollectionContext::default().with_page_size(self.settings.page_size);
        match &self.settings.statement_account {
            Some(account) => ctx.with_account(account.clone()),
            None => ctx,
        }
    }

    /// Create every destination table and the metrics table. Failures are logged and
    /// skipped; returns how many tables are ready.
    pub async fn initialize(&self) -> usize {
        info!(
            backend = self.storage.kind(),
            tables = self.collectors.len() + 1,
            "Initializing storage"
        );

        let mut ready = 0;
        let tables = self
            .collectors
            .iter()
            .map(|c| (c.table_name(), c.schema()))
            .chain(std::iter::once((METRICS_TABLE, metrics_schema())));

        for (table, schema) in tables {
            match self.storage.create_table(table, &schema).await {
                Ok(()) => ready += 1,
                Err(e) => error!(table, error = %e, "Failed to create table"),
            }
        }

        info!(ready, "Storage initialized");
        ready
    }

    /// Collect and load one collector. Never fails: errors become a failed result.
    pub async fn collect_one(
        &self,
        collector: &dyn Collector,
        ctx: &CollectionContext,
    ) -> CollectionResult {
        let table = collector.table_name();
        let operation = format!("{table}_collect");
        let timer_id = self.metrics.start_timer(&operation);

        let collected = self.collection.collect(collector, ctx).await;

        let outcome = if collected.records.is_empty() {
            Ok(None)
        } else {
            self.load(collector, collected.records).await.map(Some)
        };

        let result = match outcome {
            Ok(None) => {
                self.metrics.stop_timer(&timer_id, true, 0, None);
                CollectionResult::ok(collector, 0, "no data found")
            },
            Ok(Some(inserted)) => {
                self.metrics.stop_timer(&timer_id, true, inserted, None);
                CollectionResult::ok(collector, inserted, format!("{inserted} records inserted"))
            },
            Err(e) => {
                let message = e.to_string();
                self.metrics
                    .stop_timer(&timer_id, false, 0, Some(message.clone()));
                error!(table, error = %message, "Collection failed");
                CollectionResult::failed(collector, message)
            },
        };

        self.persist_metric(&operation).await;
        result
    }

    /// Dedup or truncate, then insert in chunks.
    async fn load(&self, collector: &dyn Collector, records: Vec<Record>) -> Result<u64, StorageError> {
        let table = collector.table_name();
        let key_columns = collector.unique_key_columns();

        let records = if key_columns.is_empty() {
            // Full refresh
            if let Err(e) = self.storage.truncate_table(table).await {
                warn!(table, error = %e, "Truncate failed, inserting anyway");
            }
            records
        } else {
            let existing = match self.storage.get_existing_keys(table, key_columns).await {
                Ok(keys) => keys,
                Err(e) => {
                    warn!(table, error = %e, "Existing keys unavailable, treating table as empty");
                    HashSet::new()
                },
            };
            let collected = records.len();
            let fresh = self.retain_new(records, key_columns, existing);
            info!(
                table,
                new = fresh.len(),
                collected,
                existing = collected - fresh.len(),
                "Incremental dedup"
            );
            fresh
        };

        let batch_size = self.settings.insert_batch_size.max(1);
        let mut inserted = 0u64;
        for chunk in records.chunks(batch_size) {
            inserted += self.storage.insert_batch(table, chunk).await?;
        }
        Ok(inserted)
    }

    /// Keep records whose key is present and unseen, in collection order.
    fn retain_new(
        &self,
        records: Vec<Record>,
        key_columns: &[&str],
        mut seen: HashSet<RecordKey>,
    ) -> Vec<Record> {
        records
            .into_iter()
            .filter(|record| {
                self.storage
                    .get_key_from_record(record, key_columns)
                    .is_some_and(|key| seen.insert(key))
            })
            .collect()
    }

    async fn persist_metric(&self, operation: &str) {
        let Some(record) = self.metrics.last_record(operation) else {
            return;
        };
        if let Err(e) = self
            .storage
            .insert_batch(METRICS_TABLE, &[record.to_row()])
            .await
        {
            warn!(operation, error = %e, "Failed to persist metric");
        }
    }

    /// Run every registered collector.
    pub async fn run_collections(&self, mode: ExecutionMode, ctx: &CollectionContext) -> RunReport {
        info!(%mode, collectors = self.collectors.len(), "Starting collections");
        let selected: Vec<Arc<dyn Collector>> = self.collectors.clone();
        self.run(selected, mode, ctx).await
    }

    /// Receivables, payables and the bank statement over `window`.
    pub async fn run_financial_collections(
        &self,
        window: DateWindow,
        mode: ExecutionMode,
    ) -> RunReport {
        let selected: Vec<Arc<dyn Collector>> = self
            .collectors
            .iter()
            .filter(|c| FINANCIAL_COLLECTORS.contains(&c.name()))
            .cloned()
            .collect();

        info!(
            start = %window.start_iso(),
            end = %window.end_iso(),
            collectors = selected.len(),
            "Starting financial collections"
        );

        let ctx = self.base_context().with_window(window);
        self.run(selected, mode, &ctx).await
    }

    /// Incremental collectors over the last `days` days.
    pub async fn run_incremental_collections(&self, days: u32, mode: ExecutionMode) -> RunReport {
        let window = DateWindow::ending_today(days);
        let selected: Vec<Arc<dyn Collector>> = self
            .collectors
            .iter()
            .filter(|c| c.supports_incremental())
            .cloned()
            .collect();

        info!(
            start = %window.start_iso(),
            end = %window.end_iso(),
            days,
            collectors = selected.len(),
            "Starting incremental collections"
        );

        let ctx = self.base_context().incremental(window);
        self.run(selected, mode, &ctx).await
    }

    async fn run(
        &self,
        selected: Vec<Arc<dyn Collector>>,
        mode: ExecutionMode,
        ctx: &CollectionContext,
    ) -> RunReport {
        let started = Instant::now();
        let total = selected.len();

        let results = match mode {
            ExecutionMode::Sequential => {
                let mut results = Vec::with_capacity(total);
                for (index, collector) in selected.iter().enumerate() {
                    if index > 0 && !self.settings.collector_delay.is_zero() {
                        tokio::time::sleep(self.settings.collector_delay).await;
                    }
                    info!(
                        table = collector.table_name(),
                        "[{}/{}] Collecting",
                        index + 1,
                        total
                    );
                    results.push(self.collect_one(collector.as_ref(), ctx).await);
                }
                results
            },
            ExecutionMode::Parallel { max_workers } => {
                stream::iter(selected)
                    .map(|collector| async move { self.collect_one(collector.as_ref(), ctx).await })
                    .buffer_unordered(max_workers.max(1))
                    .collect::<Vec<_>>()
                    .await
            },
        };

        let report = RunReport {
            results,
            duration_secs: started.elapsed().as_secs_f64(),
        };
        info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            records = report.total_records(),
            duration_secs = %format_args!("{:.2}", report.duration_secs),
            "Collections finished"
        );
        report
    }

    /// Close the API client and the storage backend. Only the first call does work.
    pub async fn cleanup(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.collection.api().close().await;
        self.storage.close().await;
        info!("Resources released");
    }
}
