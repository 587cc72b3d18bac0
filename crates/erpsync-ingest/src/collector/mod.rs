//! Collector contract and the shared collection loop
//!
//! A [`Collector`] describes one ERP entity: where to call, what the destination table
//! looks like, how to build the parameters of page `n`, and how to turn a response page
//! into flat records. [`CollectionLoop`] drives any collector through its pages.

pub mod lookup;

use crate::client::{ApiClient, ApiError, Payload, Response};
use crate::config::{AccountRef, DEFAULT_MAX_ITERATIONS, DEFAULT_PAGE_DELAY_MS, DEFAULT_PAGE_SIZE};
use chrono::{Days, Local, NaiveDate};
use erpsync_common::{Record, TableSchema};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Payload keys that mark a paginated call.
pub const PAGINATION_KEYS: [&str; 4] = [
    "pagina",
    "nPagina",
    "registros_por_pagina",
    "nRegPorPagina",
];

/// Payload keys holding the page size, in lookup order.
const PAGE_SIZE_KEYS: [&str; 3] = ["nRegPorPagina", "nRegsPorPagina", "registros_por_pagina"];

const TOTAL_PAGES_KEYS: [&str; 2] = ["total_de_paginas", "nTotPaginas"];

const TOTAL_RECORDS_KEYS: [&str; 2] = ["total_de_registros", "nTotRegistros"];

/// Response field carrying an upstream fault.
pub const FAULT_FIELD: &str = "faultstring";

/// Inclusive date range used by incremental and financial runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// `[end - days, end]`
    pub fn last_days(end: NaiveDate, days: u32) -> Self {
        let start = end
            .checked_sub_days(Days::new(u64::from(days)))
            .unwrap_or(NaiveDate::MIN);
        Self { start, end }
    }

    /// `[today - days, today]` in local time.
    pub fn ending_today(days: u32) -> Self {
        Self::last_days(Local::now().date_naive(), days)
    }

    pub fn start_iso(&self) -> String {
        self.start.format("%Y-%m-%d").to_string()
    }

    pub fn end_iso(&self) -> String {
        self.end.format("%Y-%m-%d").to_string()
    }

    /// Start as `DD/MM/YYYY`, the format some endpoints require.
    pub fn start_day_first(&self) -> String {
        self.start.format("%d/%m/%Y").to_string()
    }

    pub fn end_day_first(&self) -> String {
        self.end.format("%d/%m/%Y").to_string()
    }
}

/// Typed context handed to [`Collector::build_payload`] for every page.
#[derive(Debug, Clone)]
pub struct CollectionContext {
    pub start_page: u32,
    pub page_size: u32,
    pub window: Option<DateWindow>,
    pub incremental: bool,
    /// Checking account for the bank statement collector
    pub account: Option<AccountRef>,
}

impl Default for CollectionContext {
    fn default() -> Self {
        Self {
            start_page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            window: None,
            incremental: false,
            account: None,
        }
    }
}

impl CollectionContext {
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_window(mut self, window: DateWindow) -> Self {
        self.window = Some(window);
        self
    }

    /// Mark the context incremental over `window`.
    pub fn incremental(mut self, window: DateWindow) -> Self {
        self.window = Some(window);
        self.incremental = true;
        self
    }

    pub fn with_account(mut self, account: AccountRef) -> Self {
        self.account = Some(account);
        self
    }

    /// True when the run is incremental and carries a date window.
    pub fn incremental_window(&self) -> Option<&DateWindow> {
        self.window.as_ref().filter(|_| self.incremental)
    }
}

/// One ERP entity type.
///
/// Implementations are stateless descriptors; everything that varies per run comes in
/// through [`CollectionContext`].
pub trait Collector: Send + Sync {
    /// Registry name, used in results and logs.
    fn name(&self) -> &'static str {
        self.table_name()
    }

    fn endpoint(&self) -> &'static str;

    fn method(&self) -> &'static str;

    fn table_name(&self) -> &'static str;

    fn schema(&self) -> TableSchema;

    /// Parameters for `page`. `None` skips the whole collection; it is not an error.
    fn build_payload(&self, page: u32, page_size: u32, ctx: &CollectionContext) -> Option<Payload>;

    /// Turn one response page into destination rows.
    fn transform(&self, response: &Response) -> Vec<Record>;

    fn supports_incremental(&self) -> bool {
        false
    }

    /// Columns identifying a row. Non-empty keys switch the orchestrator from
    /// truncate-and-reload to insert-only-new.
    fn unique_key_columns(&self) -> &'static [&'static str] {
        &[]
    }

    /// Extra pause before the first request.
    fn warmup_delay(&self) -> Duration {
        Duration::ZERO
    }
}

/// Why a collection stopped fetching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    Skipped,
    Unpaginated,
    Fault(String),
    EmptyPage,
    LastPage,
    ShortPage,
    IterationLimit,
    Failed(String),
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Skipped => f.write_str("skipped"),
            StopReason::Unpaginated => f.write_str("unpaginated"),
            StopReason::Fault(msg) => write!(f, "fault: {msg}"),
            StopReason::EmptyPage => f.write_str("empty page"),
            StopReason::LastPage => f.write_str("last page"),
            StopReason::ShortPage => f.write_str("short page"),
            StopReason::IterationLimit => f.write_str("iteration limit"),
            StopReason::Failed(msg) => write!(f, "failed: {msg}"),
        }
    }
}

/// Records gathered by one collection, with how it ended.
#[derive(Debug)]
pub struct Collected {
    pub records: Vec<Record>,
    pub requests: u32,
    pub stop: StopReason,
}

/// Drives a collector through its pages, strictly in order.
#[derive(Clone)]
pub struct CollectionLoop {
    api: Arc<dyn ApiClient>,
    page_delay: Duration,
    max_iterations: u32,
}

impl CollectionLoop {
    pub fn new(api: Arc<dyn ApiClient>) -> Self {
        Self {
            api,
            page_delay: Duration::from_millis(DEFAULT_PAGE_DELAY_MS),
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn with_page_delay(mut self, page_delay: Duration) -> Self {
        self.page_delay = page_delay;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn api(&self) -> &Arc<dyn ApiClient> {
        &self.api
    }

    /// Collect every page. Never fails: a request error ends the loop and the records
    /// gathered before it are returned.
    pub async fn collect(&self, collector: &dyn Collector, ctx: &CollectionContext) -> Collected {
        let mut records = Vec::new();
        let mut requests = 0u32;

        let stop = match self
            .fetch_pages(collector, ctx, &mut records, &mut requests)
            .await
        {
            Ok(stop) => stop,
            Err(e) => {
                error!(
                    collector = collector.name(),
                    error = %e,
                    collected = records.len(),
                    "Collection failed, keeping records gathered so far"
                );
                StopReason::Failed(e.to_string())
            },
        };

        info!(
            collector = collector.name(),
            records = records.len(),
            requests,
            stop = %stop,
            "Collection finished"
        );

        Collected {
            records,
            requests,
            stop,
        }
    }

    async fn fetch_pages(
        &self,
        collector: &dyn Collector,
        ctx: &CollectionContext,
        records: &mut Vec<Record>,
        requests: &mut u32,
    ) -> Result<StopReason, ApiError> {
        let name = collector.name();
        let page_size = ctx.page_size.max(1);
        let mut page = ctx.start_page.max(1);

        for iteration in 0..self.max_iterations {
            let Some(payload) = collector.build_payload(page, page_size, ctx) else {
                info!(collector = name, "Collection skipped: payload not applicable");
                return Ok(StopReason::Skipped);
            };

            let paginated = uses_pagination(&payload);

            let delay = if iteration == 0 {
                collector.warmup_delay()
            } else {
                self.page_delay
            };
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            if paginated {
                info!(collector = name, endpoint = collector.endpoint(), page, "Fetching page");
            } else {
                info!(collector = name, endpoint = collector.endpoint(), "Fetching (unpaginated)");
            }

            *requests += 1;
            let response = self
                .api
                .request(collector.endpoint(), collector.method(), &payload)
                .await?;

            if let Some(fault) = response.get(FAULT_FIELD) {
                let message = fault
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| fault.to_string());
                error!(collector = name, page, fault = %message, "API returned a fault");
                return Ok(StopReason::Fault(message));
            }

            let page_records = collector.transform(&response);
            if page_records.is_empty() {
                let keys: Vec<&str> = response.keys().take(10).map(String::as_str).collect();
                warn!(collector = name, page, response_keys = ?keys, "Page produced no records");
                return Ok(StopReason::EmptyPage);
            }

            let fetched = page_records.len();
            records.extend(page_records);
            info!(collector = name, page, records = fetched, "Page collected");

            if !paginated {
                return Ok(StopReason::Unpaginated);
            }

            if let Some(stop) = end_of_pages(&response, &payload, page, page_size, fetched) {
                return Ok(stop);
            }

            page += 1;
        }

        warn!(
            collector = name,
            max_iterations = self.max_iterations,
            "Iteration limit reached"
        );
        Ok(StopReason::IterationLimit)
    }
}

/// True when the payload carries any pagination key.
pub fn uses_pagination(payload: &Payload) -> bool {
    PAGINATION_KEYS.iter().any(|key| payload.contains_key(*key))
}

/// Decide whether `page` was the last one.
///
/// Checks an explicit page total first, then a record total divided by the page size,
/// and always stops on a page shorter than the page size.
fn end_of_pages(
    response: &Response,
    payload: &Payload,
    page: u32,
    default_page_size: u32,
    fetched: usize,
) -> Option<StopReason> {
    let page_size = PAGE_SIZE_KEYS
        .iter()
        .find_map(|key| payload.get(*key).and_then(as_count))
        .filter(|size| *size > 0)
        .unwrap_or(u64::from(default_page_size));
    let page = u64::from(page);

    if let Some(total_pages) = positive_count(response, &TOTAL_PAGES_KEYS) {
        if page >= total_pages {
            return Some(StopReason::LastPage);
        }
    } else if let Some(total_records) = positive_count(response, &TOTAL_RECORDS_KEYS) {
        if page >= total_records.div_ceil(page_size) {
            return Some(StopReason::LastPage);
        }
    }

    if (fetched as u64) < page_size {
        return Some(StopReason::ShortPage);
    }

    None
}

fn positive_count(response: &Response, keys: &[&str]) -> Option<u64> {
    keys.iter()
        .find_map(|key| response.get(*key).and_then(as_count).filter(|n| *n > 0))
}

fn as_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
