//! BigQuery backend
//!
//! DDL, truncation and reads run as standard-SQL query jobs; inserts use the streaming
//! `tabledata.insertAll` API. The warehouse has no generated keys, so the surrogate `id`
//! is a UUID string filled on insert.

use super::{validate_identifier, StorageBackend, StorageError, INSERT_CHUNK_SIZE};
use crate::config::{WarehouseConfig, WarehouseCredentials};
use async_trait::async_trait;
use chrono::Utc;
use erpsync_common::normalize::prepare_row;
use erpsync_common::{Column, ColumnRole, ColumnType, Record, TableSchema};
use gcp_bigquery_client::model::query_request::QueryRequest;
use gcp_bigquery_client::model::query_response::ResultSet;
use gcp_bigquery_client::model::table_data_insert_all_request::TableDataInsertAllRequest;
use gcp_bigquery_client::model::table_data_insert_all_request_rows::TableDataInsertAllRequestRows;
use gcp_bigquery_client::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Timestamp format accepted by streaming inserts into TIMESTAMP columns.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f UTC";

/// A destination column as the warehouse sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
struct WarehouseColumn {
    name: String,
    data_type: String,
    role: ColumnRole,
}

impl WarehouseColumn {
    fn from_schema(column: &Column) -> Self {
        Self {
            name: column.name.clone(),
            data_type: bq_type(column).to_string(),
            role: column.role,
        }
    }

    /// Roles cannot be read back from the catalog; infer them from the naming convention.
    fn from_catalog(name: String, data_type: String) -> Self {
        let role = match name.as_str() {
            "id" if data_type == "STRING" => ColumnRole::SurrogateId,
            "created_at" => ColumnRole::CreatedAt,
            "updated_at" => ColumnRole::UpdatedAt,
            _ => ColumnRole::Plain,
        };
        Self {
            name,
            data_type,
            role,
        }
    }
}

pub struct BigQueryBackend {
    client: Client,
    project_id: String,
    dataset_id: String,
    location: String,
    columns: RwLock<HashMap<String, Arc<Vec<WarehouseColumn>>>>,
    closed: AtomicBool,
}

impl BigQueryBackend {
    /// Authenticate and make sure the dataset exists.
    pub async fn connect(config: &WarehouseConfig) -> Result<Self, StorageError> {
        let client = create_client(&config.credentials).await?;
        let backend = Self {
            client,
            project_id: config.project_id.clone(),
            dataset_id: config.dataset_id.clone(),
            location: config.location.clone(),
            columns: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        };
        backend.ensure_dataset().await?;
        info!(
            project = %backend.project_id,
            dataset = %backend.dataset_id,
            "Warehouse client ready"
        );
        Ok(backend)
    }

    async fn ensure_dataset(&self) -> Result<(), StorageError> {
        validate_identifier(&self.dataset_id)?;
        let sql = format!(
            "CREATE SCHEMA IF NOT EXISTS `{}.{}` OPTIONS(location=\"{}\")",
            self.project_id, self.dataset_id, self.location
        );
        self.run(&sql).await?;
        Ok(())
    }

    async fn run(&self, sql: &str) -> Result<ResultSet, StorageError> {
        let mut request = QueryRequest::new(sql);
        request.location = Some(self.location.clone());
        debug!(sql, "Running warehouse query");
        let response = self.client.job().query(&self.project_id, request).await?;
        Ok(ResultSet::new_from_query_response(response))
    }

    async fn table_columns(&self, name: &str) -> Result<Arc<Vec<WarehouseColumn>>, StorageError> {
        if let Some(columns) = self.columns.read().await.get(name) {
            return Ok(Arc::clone(columns));
        }

        let sql = format!(
            "SELECT column_name, data_type FROM `{}.{}.INFORMATION_SCHEMA.COLUMNS` \
             WHERE table_name = '{name}' ORDER BY ordinal_position",
            self.project_id, self.dataset_id
        );
        let rows = self.execute_query(&sql).await?;
        if rows.is_empty() {
            return Err(StorageError::TableNotFound(name.to_string()));
        }

        let columns: Vec<WarehouseColumn> = rows
            .into_iter()
            .filter_map(|row| {
                let name = row.get("column_name")?.as_str()?.to_string();
                let data_type = row.get("data_type")?.as_str()?.to_string();
                Some(WarehouseColumn::from_catalog(name, data_type))
            })
            .collect();
        let columns = Arc::new(columns);
        self.columns
            .write()
            .await
            .insert(name.to_string(), Arc::clone(&columns));
        Ok(columns)
    }

    async fn insert_chunk(
        &self,
        name: &str,
        rows: Vec<TableDataInsertAllRequestRows>,
    ) -> Result<u64, StorageError> {
        let sent = rows.len() as u64;
        let mut request = TableDataInsertAllRequest::new();
        request.add_rows(rows)?;

        let response = self
            .client
            .tabledata()
            .insert_all(&self.project_id, &self.dataset_id, name, request)
            .await?;

        match response.insert_errors {
            Some(errors) if !errors.is_empty() => {
                for err in errors.iter().take(5) {
                    warn!(
                        table = name,
                        row = err.index.unwrap_or(0),
                        errors = ?err.errors,
                        "Row rejected by warehouse"
                    );
                }
                warn!(table = name, rejected = errors.len(), sent, "Partial insert");
                Ok(sent.saturating_sub(errors.len() as u64))
            },
            _ => Ok(sent),
        }
    }
}

async fn create_client(credentials: &WarehouseCredentials) -> Result<Client, StorageError> {
    let client = match credentials {
        WarehouseCredentials::KeyJson(json) => {
            let sa_key = serde_json::from_str(json).map_err(|e| {
                StorageError::Config(format!("Invalid service account JSON: {e}"))
            })?;
            Client::from_service_account_key(sa_key, false).await?
        },
        WarehouseCredentials::KeyFile(path) => {
            let sa_key = gcp_bigquery_client::yup_oauth2::read_service_account_key(path)
                .await
                .map_err(|e| {
                    StorageError::Config(format!(
                        "Failed to read credentials from '{}': {e}",
                        path.display()
                    ))
                })?;
            Client::from_service_account_key(sa_key, false).await?
        },
        WarehouseCredentials::ApplicationDefault => {
            Client::from_application_default_credentials().await?
        },
    };
    Ok(client)
}

#[async_trait]
impl StorageBackend for BigQueryBackend {
    fn kind(&self) -> &'static str {
        "bigquery"
    }

    fn table_ref(&self, name: &str) -> String {
        format!("`{}.{}.{}`", self.project_id, self.dataset_id, name)
    }

    async fn create_table(&self, name: &str, schema: &TableSchema) -> Result<(), StorageError> {
        validate_identifier(name)?;
        self.run(&create_table_sql(&self.table_ref(name), schema))
            .await?;
        let columns = schema
            .columns()
            .iter()
            .map(WarehouseColumn::from_schema)
            .collect();
        self.columns
            .write()
            .await
            .insert(name.to_string(), Arc::new(columns));
        info!(table = name, "Table ready");
        Ok(())
    }

    async fn truncate_table(&self, name: &str) -> Result<(), StorageError> {
        validate_identifier(name)?;
        self.run(&format!("TRUNCATE TABLE {}", self.table_ref(name)))
            .await?;
        info!(table = name, "Table truncated");
        Ok(())
    }

    async fn insert_batch(&self, name: &str, records: &[Record]) -> Result<u64, StorageError> {
        validate_identifier(name)?;
        if records.is_empty() {
            return Ok(0);
        }

        let columns = self.table_columns(name).await?;
        let now = Utc::now().format(TIMESTAMP_FORMAT).to_string();
        let rows: Vec<TableDataInsertAllRequestRows> = records
            .iter()
            .map(|record| warehouse_row(record, &columns, &now))
            .filter(|row| !row.is_empty())
            .map(|row| TableDataInsertAllRequestRows {
                insert_id: Some(Uuid::new_v4().to_string()),
                json: Value::Object(row),
            })
            .collect();

        let mut inserted = 0u64;
        let mut rows = rows.into_iter().peekable();
        while rows.peek().is_some() {
            let chunk: Vec<_> = rows.by_ref().take(INSERT_CHUNK_SIZE).collect();
            inserted += self.insert_chunk(name, chunk).await?;
        }
        Ok(inserted)
    }

    async fn execute_query(&self, sql: &str) -> Result<Vec<Record>, StorageError> {
        let mut result = self.run(sql).await?;
        let names = result.column_names();
        let mut rows = Vec::new();
        while result.next_row() {
            let mut row = Record::new();
            for (index, column) in names.iter().enumerate() {
                let value = result
                    .get_string(index)?
                    .map_or(Value::Null, Value::String);
                row.insert(column.clone(), value);
            }
            rows.push(row);
        }
        Ok(rows)
    }

    async fn table_count(&self, name: &str) -> Result<u64, StorageError> {
        validate_identifier(name)?;
        let rows = self
            .execute_query(&format!("SELECT COUNT(*) AS n FROM {}", self.table_ref(name)))
            .await?;
        Ok(rows
            .first()
            .and_then(|row| row.get("n"))
            .and_then(Value::as_str)
            .and_then(|n| n.parse().ok())
            .unwrap_or(0))
    }

    fn quote(&self, ident: &str) -> String {
        format!("`{ident}`")
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("Warehouse client released");
        }
    }
}

fn bq_type(column: &Column) -> &'static str {
    if column.role == ColumnRole::SurrogateId {
        return "STRING";
    }
    match column.column_type {
        ColumnType::BigInt | ColumnType::Int => "INTEGER",
        ColumnType::Varchar(_) | ColumnType::Char(_) | ColumnType::Text => "STRING",
        ColumnType::Decimal(_, _) => "NUMERIC",
        ColumnType::Date => "DATE",
        ColumnType::DateTime => "DATETIME",
        ColumnType::Timestamp => "TIMESTAMP",
    }
}

/// `CREATE TABLE IF NOT EXISTS` for an already qualified table reference.
pub fn create_table_sql(table_ref: &str, schema: &TableSchema) -> String {
    let columns = schema
        .columns()
        .iter()
        .map(|c| format!("    `{}` {}", c.name, bq_type(c)))
        .collect::<Vec<_>>()
        .join(",\n");
    format!("CREATE TABLE IF NOT EXISTS {table_ref} (\n{columns}\n)")
}

/// Streaming-insert JSON for one record: destination columns only, empty strings
/// dropped outside STRING columns, bookkeeping columns filled.
fn warehouse_row(record: &Record, columns: &[WarehouseColumn], now: &str) -> Record {
    let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
    let mut row = prepare_row(record, &names);

    row.retain(|key, value| {
        let is_string = columns
            .iter()
            .find(|c| &c.name == key)
            .is_some_and(|c| c.data_type == "STRING");
        !value.is_null() && (is_string || value.as_str() != Some(""))
    });
    if row.is_empty() {
        return row;
    }

    for column in columns {
        match column.role {
            ColumnRole::SurrogateId if !row.contains_key(&column.name) => {
                row.insert(column.name.clone(), Value::String(Uuid::new_v4().to_string()));
            },
            ColumnRole::CreatedAt | ColumnRole::UpdatedAt => {
                row.insert(column.name.clone(), Value::String(now.to_string()));
            },
            _ => {},
        }
    }
    row
}
