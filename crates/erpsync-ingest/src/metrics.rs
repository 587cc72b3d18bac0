//! Per-operation timing
//!
//! A [`MetricsCollector`] is created once per process and shared with the orchestrator.
//! Timers are keyed by id so concurrent collectors can time themselves independently.

use chrono::{DateTime, Utc};
use erpsync_common::{Column, ColumnType, Record, TableSchema};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Table the orchestrator persists finished metrics into.
pub const METRICS_TABLE: &str = "api_metrics";

/// One finished operation.
#[derive(Debug, Clone, Serialize)]
pub struct MetricRecord {
    pub operation: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub success: bool,
    pub records_count: u64,
    pub error_message: Option<String>,
}

impl MetricRecord {
    /// Row for [`METRICS_TABLE`].
    pub fn to_row(&self) -> Record {
        let mut row = Record::new();
        row.insert("operation".into(), json!(self.operation));
        row.insert("duration".into(), json!(format!("{:.2}", self.duration_secs)));
        row.insert("success".into(), json!(i32::from(self.success)));
        row.insert("records_count".into(), json!(self.records_count));
        row.insert("error_message".into(), json!(self.error_message));
        row
    }
}

/// Schema of [`METRICS_TABLE`].
pub fn metrics_schema() -> TableSchema {
    TableSchema::new(vec![
        Column::surrogate_id(),
        Column::new("operation", ColumnType::Varchar(100)),
        Column::new("duration", ColumnType::Decimal(10, 2)),
        Column::new("success", ColumnType::Int),
        Column::new("records_count", ColumnType::Int),
        Column::new("error_message", ColumnType::Text),
    ])
    .with_created_at()
}

/// Aggregates over every finished operation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSummary {
    pub total_operations: usize,
    pub successful_operations: usize,
    pub failed_operations: usize,
    pub total_time: f64,
    pub average_time: f64,
    pub min_time: f64,
    pub max_time: f64,
    pub total_records: u64,
    pub operations: Vec<MetricRecord>,
}

impl fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(80);
        writeln!(f, "{rule}")?;
        writeln!(f, "PERFORMANCE METRICS SUMMARY")?;
        writeln!(f, "{rule}")?;
        writeln!(f, "Total operations:      {}", self.total_operations)?;
        writeln!(f, "Successful operations: {}", self.successful_operations)?;
        writeln!(f, "Failed operations:     {}", self.failed_operations)?;
        writeln!(f, "Total time:            {:.2}s", self.total_time)?;
        writeln!(f, "Average time:          {:.2}s", self.average_time)?;
        writeln!(f, "Min time:              {:.2}s", self.min_time)?;
        writeln!(f, "Max time:              {:.2}s", self.max_time)?;
        writeln!(f, "Total records:         {}", self.total_records)?;
        writeln!(f)?;
        writeln!(f, "Per operation:")?;
        writeln!(f, "{}", "-".repeat(80))?;
        for op in &self.operations {
            let mark = if op.success { "OK " } else { "ERR" };
            writeln!(
                f,
                "{mark} {}: {:.2}s ({} records)",
                op.operation, op.duration_secs, op.records_count
            )?;
            if let Some(err) = &op.error_message {
                writeln!(f, "    error: {err}")?;
            }
        }
        write!(f, "{rule}")
    }
}

struct ActiveTimer {
    operation: String,
    started_at: DateTime<Utc>,
    started: Instant,
}

#[derive(Default)]
struct State {
    active: HashMap<String, ActiveTimer>,
    completed: Vec<MetricRecord>,
}

#[derive(Default)]
pub struct MetricsCollector {
    state: Mutex<State>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start timing `operation` and return the timer id.
    pub fn start_timer(&self, operation: &str) -> String {
        let started_at = Utc::now();
        let mut state = self.state();

        let mut micros = started_at.timestamp_micros();
        let mut timer_id = format!("{operation}_{micros}");
        while state.active.contains_key(&timer_id) {
            micros += 1;
            timer_id = format!("{operation}_{micros}");
        }

        state.active.insert(
            timer_id.clone(),
            ActiveTimer {
                operation: operation.to_string(),
                started_at,
                started: Instant::now(),
            },
        );
        debug!(operation, timer_id = %timer_id, "Timer started");
        timer_id
    }

    /// Stop a timer and return its duration in seconds. Unknown ids return 0.0.
    pub fn stop_timer(
        &self,
        timer_id: &str,
        success: bool,
        records_count: u64,
        error_message: Option<String>,
    ) -> f64 {
        let mut state = self.state();
        let Some(timer) = state.active.remove(timer_id) else {
            warn!(timer_id, "Timer not found");
            return 0.0;
        };

        let duration_secs = timer.started.elapsed().as_secs_f64();
        let record = MetricRecord {
            operation: timer.operation,
            started_at: timer.started_at,
            ended_at: Utc::now(),
            duration_secs,
            success,
            records_count,
            error_message,
        };
        info!(
            operation = %record.operation,
            duration_secs = %format_args!("{duration_secs:.2}"),
            records = records_count,
            success,
            "Timer stopped"
        );
        state.completed.push(record);
        duration_secs
    }

    /// The most recently finished record for `operation`.
    pub fn last_record(&self, operation: &str) -> Option<MetricRecord> {
        self.state()
            .completed
            .iter()
            .rev()
            .find(|m| m.operation == operation)
            .cloned()
    }

    pub fn summary(&self) -> MetricsSummary {
        let state = self.state();
        let completed = &state.completed;
        if completed.is_empty() {
            return MetricsSummary::default();
        }

        let durations = completed.iter().map(|m| m.duration_secs);
        let total_time: f64 = durations.clone().sum();
        let successful = completed.iter().filter(|m| m.success).count();

        MetricsSummary {
            total_operations: completed.len(),
            successful_operations: successful,
            failed_operations: completed.len() - successful,
            total_time,
            average_time: total_time / completed.len() as f64,
            min_time: durations.clone().fold(f64::INFINITY, f64::min),
            max_time: durations.fold(0.0, f64::max),
            total_records: completed.iter().map(|m| m.records_count).sum(),
            operations: completed.clone(),
        }
    }

    /// Finished records for one operation name.
    pub fn operation_metrics(&self, operation: &str) -> Vec<MetricRecord> {
        self.state()
            .completed
            .iter()
            .filter(|m| m.operation == operation)
            .cloned()
            .collect()
    }

    /// Drop every active and finished record.
    pub fn reset(&self) {
        let mut state = self.state();
        state.active.clear();
        state.completed.clear();
        info!("Metrics reset");
    }

    pub fn print_summary(&self) {
        println!("\n{}\n", self.summary());
    }
}
