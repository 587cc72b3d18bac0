//! Storage backends
//!
//! The orchestrator talks to storage only through [`StorageBackend`]. Both
//! implementations store the representation produced by
//! [`erpsync_common::normalize`], so keys read back from either compare equal to keys
//! derived from fresh records.

pub mod bigquery;
pub mod postgres;

pub use bigquery::BigQueryBackend;
pub use postgres::PostgresBackend;

use crate::config::Config;
use async_trait::async_trait;
use erpsync_common::normalize::key_from_record;
use erpsync_common::{Record, RecordKey, SyncError, TableSchema};
use regex::Regex;
use std::collections::HashSet;
use std::sync::{Arc, LazyLock};
use thiserror::Error;
use tracing::info;

/// Rows per insert statement or streaming request.
pub const INSERT_CHUNK_SIZE: usize = 500;

#[allow(clippy::expect_used)]
static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("identifier pattern compiles")
});

/// Errors raised by storage backends
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Warehouse error: {0}")]
    Warehouse(#[from] gcp_bigquery_client::error::BQError),

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Backend configuration error: {0}")]
    Config(String),
}

impl From<StorageError> for SyncError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Config(msg) => SyncError::Config(msg),
            StorageError::Serialization(msg) => SyncError::Parse(msg),
            other => SyncError::Database(other.to_string()),
        }
    }
}

/// Destination of collected records.
///
/// Table names come from collector declarations and are validated with
/// [`validate_identifier`] before they reach SQL text.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Short backend name for logs.
    fn kind(&self) -> &'static str;

    /// Fully qualified reference of `name`, usable in query text.
    fn table_ref(&self, name: &str) -> String;

    /// Create `name` if it does not exist.
    async fn create_table(&self, name: &str, schema: &TableSchema) -> Result<(), StorageError>;

    /// Remove every row of `name`.
    async fn truncate_table(&self, name: &str) -> Result<(), StorageError>;

    /// Keys already stored in `name`, normalized like fresh keys.
    async fn get_existing_keys(
        &self,
        name: &str,
        key_columns: &[&str],
    ) -> Result<HashSet<RecordKey>, StorageError> {
        if key_columns.is_empty() {
            return Ok(HashSet::new());
        }
        for column in key_columns {
            validate_identifier(column)?;
        }
        let sql = format!(
            "SELECT DISTINCT {} FROM {}",
            key_columns
                .iter()
                .map(|c| self.quote(c))
                .collect::<Vec<_>>()
                .join(", "),
            self.table_ref(name)
        );
        let rows = self.execute_query(&sql).await?;
        let keys: HashSet<RecordKey> = rows
            .iter()
            .filter_map(|row| key_from_record(row, key_columns))
            .collect();
        info!(table = name, keys = keys.len(), "Existing keys loaded");
        Ok(keys)
    }

    /// Key of a fresh record, or `None` when it has no usable key.
    fn get_key_from_record(&self, record: &Record, key_columns: &[&str]) -> Option<RecordKey> {
        key_from_record(record, key_columns)
    }

    /// Insert `records` and return how many rows were written.
    async fn insert_batch(&self, name: &str, records: &[Record]) -> Result<u64, StorageError>;

    /// Run a read query and return each row as a column map.
    async fn execute_query(&self, sql: &str) -> Result<Vec<Record>, StorageError>;

    /// Row count of `name`.
    async fn table_count(&self, name: &str) -> Result<u64, StorageError>;

    /// Quote a column name for this backend's dialect.
    fn quote(&self, ident: &str) -> String;

    /// Release connections. Safe to call more than once.
    async fn close(&self);
}

/// Reject anything that is not a plain SQL identifier.
pub fn validate_identifier(name: &str) -> Result<&str, StorageError> {
    if IDENTIFIER.is_match(name) {
        Ok(name)
    } else {
        Err(StorageError::InvalidIdentifier(name.to_string()))
    }
}

/// Connect the backend selected by `config`: the warehouse when it is configured,
/// otherwise PostgreSQL.
pub async fn connect(config: &Config) -> Result<Arc<dyn StorageBackend>, StorageError> {
    match &config.warehouse {
        Some(warehouse) => {
            let backend = BigQueryBackend::connect(warehouse).await?;
            Ok(Arc::new(backend))
        },
        None => {
            let backend = PostgresBackend::connect(&config.database).await?;
            Ok(Arc::new(backend))
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifiers() {
        assert!(validate_identifier("contas_receber").is_ok());
        assert!(validate_identifier("_x1").is_ok());
        assert!(validate_identifier("1abc").is_err());
        assert!(validate_identifier("a; DROP TABLE x").is_err());
        assert!(validate_identifier("").is_err());
    }

    #[test]
    fn test_storage_error_maps_to_sync_error() {
        let err: SyncError = StorageError::TableNotFound("extrato".into()).into();
        assert_eq!(err.kind(), "database");
        let err: SyncError = StorageError::Config("missing dataset".into()).into();
        assert_eq!(err.kind(), "config");
    }
}
