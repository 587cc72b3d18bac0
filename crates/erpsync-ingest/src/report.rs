//! Read-side summaries over the loaded tables.
//!
//! Everything here goes through [`StorageBackend::execute_query`] and
//! [`StorageBackend::table_count`], so it works the same on either backend.

use crate::collector::Collector;
use crate::metrics::METRICS_TABLE;
use crate::storage::{StorageBackend, StorageError};
use erpsync_common::Record;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Tables whose document, paid and open totals are reported.
pub const TITLE_TABLES: [&str; 2] = ["contas_receber", "contas_pagar"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableStats {
    pub table: String,
    /// `None` when the count query failed
    pub rows: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TitleTotals {
    pub table: String,
    pub rows: u64,
    /// Sum of `valor_documento`
    pub total: f64,
    /// Sum of `valor_pago`
    pub paid: f64,
    /// Sum of `saldo`, the amount still open
    pub open: f64,
}

/// Aggregate of the persisted API metrics for one operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationStats {
    pub operation: String,
    pub executions: u64,
    pub avg_duration: f64,
    pub min_duration: f64,
    pub max_duration: f64,
    pub total_records: u64,
    pub successes: u64,
    pub failures: u64,
    pub last_execution: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StorageReport {
    pub tables: Vec<TableStats>,
    pub titles: Vec<TitleTotals>,
    pub operations: Vec<OperationStats>,
}

impl fmt::Display for StorageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<24} {:>12}", "table", "rows")?;
        writeln!(f, "{}", "-".repeat(37))?;
        for stats in &self.tables {
            match stats.rows {
                Some(rows) => writeln!(f, "{:<24} {:>12}", stats.table, rows)?,
                None => writeln!(f, "{:<24} {:>12}", stats.table, "n/a")?,
            }
        }
        if !self.titles.is_empty() {
            writeln!(f)?;
            for totals in &self.titles {
                writeln!(
                    f,
                    "{:<24} {:>12} titles  total {:.2}  paid {:.2}  open {:.2}",
                    totals.table, totals.rows, totals.total, totals.paid, totals.open
                )?;
            }
        }
        if !self.operations.is_empty() {
            writeln!(f)?;
            writeln!(
                f,
                "{:<28} {:>6} {:>8} {:>8} {:>8} {:>10} {:>4} {:>4}  last",
                "operation", "runs", "avg s", "min s", "max s", "records", "ok", "err"
            )?;
            for op in &self.operations {
                writeln!(
                    f,
                    "{:<28} {:>6} {:>8.2} {:>8.2} {:>8.2} {:>10} {:>4} {:>4}  {}",
                    op.operation,
                    op.executions,
                    op.avg_duration,
                    op.min_duration,
                    op.max_duration,
                    op.total_records,
                    op.successes,
                    op.failures,
                    op.last_execution.as_deref().unwrap_or("-")
                )?;
            }
        }
        Ok(())
    }
}

/// Row count of every collector table, the title sums and the per-operation metrics.
pub async fn storage_report(
    storage: &Arc<dyn StorageBackend>,
    collectors: &[Arc<dyn Collector>],
) -> StorageReport {
    let mut report = StorageReport::default();

    for collector in collectors {
        let table = collector.table_name();
        let rows = match storage.table_count(table).await {
            Ok(rows) => Some(rows),
            Err(e) => {
                warn!(table, error = %e, "Count failed");
                None
            },
        };
        report.tables.push(TableStats {
            table: table.to_string(),
            rows,
        });
    }

    for table in TITLE_TABLES {
        match title_totals(storage.as_ref(), table).await {
            Ok(totals) => report.titles.push(totals),
            Err(e) => warn!(table, error = %e, "Title totals failed"),
        }
    }

    match operation_stats(storage.as_ref()).await {
        Ok(operations) => report.operations = operations,
        Err(e) => warn!(table = METRICS_TABLE, error = %e, "Metrics aggregate failed"),
    }

    report
}

/// Count plus document, paid and open sums of a title table.
pub async fn title_totals(
    storage: &dyn StorageBackend,
    table: &str,
) -> Result<TitleTotals, StorageError> {
    let sql = format!(
        "SELECT COUNT(*) AS registros, \
         COALESCE(SUM(valor_documento), 0) AS total, \
         COALESCE(SUM(valor_pago), 0) AS pago, \
         COALESCE(SUM(saldo), 0) AS em_aberto \
         FROM {}",
        storage.table_ref(table)
    );
    let rows = storage.execute_query(&sql).await?;
    let row = rows.first().cloned().unwrap_or_default();

    Ok(TitleTotals {
        table: table.to_string(),
        rows: number(&row, "registros").map_or(0, |n| n as u64),
        total: number(&row, "total").unwrap_or(0.0),
        paid: number(&row, "pago").unwrap_or(0.0),
        open: number(&row, "em_aberto").unwrap_or(0.0),
    })
}

/// Executions, durations, records and outcomes per operation in the metrics table.
pub async fn operation_stats(
    storage: &dyn StorageBackend,
) -> Result<Vec<OperationStats>, StorageError> {
    let sql = format!(
        "SELECT operation, \
         COUNT(*) AS execucoes, \
         AVG(duration) AS duracao_media, \
         MIN(duration) AS duracao_min, \
         MAX(duration) AS duracao_max, \
         COALESCE(SUM(records_count), 0) AS total_registros, \
         SUM(CASE WHEN success = 1 THEN 1 ELSE 0 END) AS sucessos, \
         SUM(CASE WHEN success = 0 THEN 1 ELSE 0 END) AS erros, \
         MAX(created_at) AS ultima_execucao \
         FROM {} GROUP BY operation ORDER BY operation",
        storage.table_ref(METRICS_TABLE)
    );
    let rows = storage.execute_query(&sql).await?;

    Ok(rows
        .iter()
        .filter_map(|row| {
            let operation = row.get("operation")?.as_str()?.to_string();
            let count = |column| number(row, column).map_or(0, |n| n as u64);
            Some(OperationStats {
                operation,
                executions: count("execucoes"),
                avg_duration: number(row, "duracao_media").unwrap_or(0.0),
                min_duration: number(row, "duracao_min").unwrap_or(0.0),
                max_duration: number(row, "duracao_max").unwrap_or(0.0),
                total_records: count("total_registros"),
                successes: count("sucessos"),
                failures: count("erros"),
                last_execution: match row.get("ultima_execucao") {
                    Some(Value::String(s)) => Some(s.clone()),
                    Some(Value::Null) | None => None,
                    Some(other) => Some(other.to_string()),
                },
            })
        })
        .collect())
}

/// Numeric column that may come back as a JSON number or as text.
fn number(row: &Record, column: &str) -> Option<f64> {
    match row.get(column)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
