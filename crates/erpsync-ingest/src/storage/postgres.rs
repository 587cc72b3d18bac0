//! PostgreSQL backend
//!
//! DDL is rendered from the typed [`TableSchema`]. Inserts bind every value as text and
//! cast it to the destination column's type, so one statement shape serves every table.
//! When a table has a natural key the insert becomes an upsert on that column.

use super::{validate_identifier, StorageBackend, StorageError, INSERT_CHUNK_SIZE};
use crate::config::DatabaseConfig;
use async_trait::async_trait;
use erpsync_common::normalize::{prepare_row, scalar_text};
use erpsync_common::{Column, ColumnRole, ColumnType, Record, TableSchema};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder, Row};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const COLUMNS_SQL: &str = "SELECT column_name::text, udt_name::text, is_identity::text \
     FROM information_schema.columns \
     WHERE table_schema = current_schema() AND table_name::text = $1 \
     ORDER BY ordinal_position";

const SINGLE_COLUMN_UNIQUE_SQL: &str = "SELECT a.attname::text, i.indisprimary \
     FROM pg_index i \
     JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey) \
     WHERE i.indrelid = to_regclass($1) AND i.indisunique AND i.indnatts = 1 \
     ORDER BY i.indisprimary DESC";

/// A writable destination column.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ColumnInfo {
    name: String,
    /// Postgres type name, used as the cast target
    udt: String,
}

impl ColumnInfo {
    fn is_textual(&self) -> bool {
        matches!(self.udt.as_str(), "varchar" | "text" | "bpchar" | "name")
    }
}

/// Destination metadata discovered from the catalog.
#[derive(Debug)]
struct TableInfo {
    columns: Vec<ColumnInfo>,
    conflict_column: Option<String>,
    has_updated_at: bool,
}

pub struct PostgresBackend {
    pool: PgPool,
    tables: RwLock<HashMap<String, Arc<TableInfo>>>,
    closed: AtomicBool,
}

impl PostgresBackend {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout)
            .connect(&config.url)
            .await?;

        info!(
            max_connections = config.max_connections,
            "Database connection pool created"
        );

        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            tables: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn table_info(&self, name: &str) -> Result<Arc<TableInfo>, StorageError> {
        if let Some(info) = self.tables.read().await.get(name) {
            return Ok(Arc::clone(info));
        }

        let rows: Vec<(String, String, String)> = sqlx::query_as(COLUMNS_SQL)
            .bind(name)
            .fetch_all(&self.pool)
            .await?;
        if rows.is_empty() {
            return Err(StorageError::TableNotFound(name.to_string()));
        }

        let identity: Vec<&str> = rows
            .iter()
            .filter(|(_, _, is_identity)| is_identity == "YES")
            .map(|(column, _, _)| column.as_str())
            .collect();

        let uniques: Vec<(String, bool)> = sqlx::query_as(SINGLE_COLUMN_UNIQUE_SQL)
            .bind(quote_ident(name))
            .fetch_all(&self.pool)
            .await?;
        let conflict_column = uniques
            .into_iter()
            .map(|(column, _)| column)
            .find(|column| !identity.contains(&column.as_str()));

        let has_updated_at = rows.iter().any(|(column, _, _)| column == "updated_at");
        let columns = rows
            .iter()
            .filter(|(_, _, is_identity)| is_identity != "YES")
            .map(|(column, udt, _)| ColumnInfo {
                name: column.clone(),
                udt: udt.clone(),
            })
            .collect();

        let info = Arc::new(TableInfo {
            columns,
            conflict_column,
            has_updated_at,
        });
        debug!(table = name, conflict = ?info.conflict_column, "Table metadata loaded");
        self.tables
            .write()
            .await
            .insert(name.to_string(), Arc::clone(&info));
        Ok(info)
    }

    async fn insert_chunk(
        &self,
        name: &str,
        info: &TableInfo,
        rows: &[Record],
    ) -> Result<u64, StorageError> {
        let used: Vec<&ColumnInfo> = info
            .columns
            .iter()
            .filter(|c| rows.iter().any(|r| r.contains_key(&c.name)))
            .collect();
        if used.is_empty() {
            return Ok(0);
        }

        let column_list = used
            .iter()
            .map(|c| quote_ident(&c.name))
            .collect::<Vec<_>>()
            .join(", ");
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("INSERT INTO {} ({column_list}) ", quote_ident(name)));

        qb.push_values(rows, |mut b, row| {
            for column in &used {
                b.push("CAST(")
                    .push_bind_unseparated(bind_text(row.get(&column.name), column))
                    .push_unseparated(format!(" AS {})", column.udt));
            }
        });
        qb.push(conflict_clause(info, &used));

        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl StorageBackend for PostgresBackend {
    fn kind(&self) -> &'static str {
        "postgres"
    }

    fn table_ref(&self, name: &str) -> String {
        quote_ident(name)
    }

    async fn create_table(&self, name: &str, schema: &TableSchema) -> Result<(), StorageError> {
        validate_identifier(name)?;
        sqlx::query(&create_table_sql(name, schema))
            .execute(&self.pool)
            .await?;
        self.tables.write().await.remove(name);
        info!(table = name, "Table ready");
        Ok(())
    }

    async fn truncate_table(&self, name: &str) -> Result<(), StorageError> {
        validate_identifier(name)?;
        sqlx::query(&format!("TRUNCATE TABLE {}", quote_ident(name)))
            .execute(&self.pool)
            .await?;
        info!(table = name, "Table truncated");
        Ok(())
    }

    async fn insert_batch(&self, name: &str, records: &[Record]) -> Result<u64, StorageError> {
        validate_identifier(name)?;
        if records.is_empty() {
            return Ok(0);
        }

        let info = self.table_info(name).await?;
        let names: Vec<&str> = info.columns.iter().map(|c| c.name.as_str()).collect();
        let prepared: Vec<Record> = records
            .iter()
            .map(|record| prepare_row(record, &names))
            .filter(|row| !row.is_empty())
            .collect();
        let rows = match &info.conflict_column {
            Some(column) => collapse_on(prepared, column),
            None => prepared,
        };

        let mut inserted = 0u64;
        for chunk in rows.chunks(INSERT_CHUNK_SIZE) {
            inserted += self.insert_chunk(name, &info, chunk).await?;
        }

        if inserted < records.len() as u64 {
            debug!(
                table = name,
                inserted,
                sent = records.len(),
                "Some rows were collapsed or skipped on conflict"
            );
        }
        Ok(inserted)
    }

    async fn execute_query(&self, sql: &str) -> Result<Vec<Record>, StorageError> {
        let inner = sql.trim().trim_end_matches(';');
        let wrapped = format!("SELECT to_jsonb(q) AS row FROM ({inner}) AS q");
        let rows = sqlx::query(&wrapped).fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| {
                let value: Value = row.try_get("row")?;
                match value {
                    Value::Object(map) => Ok(map),
                    other => Err(StorageError::Serialization(format!(
                        "expected a row object, got {other}"
                    ))),
                }
            })
            .collect()
    }

    async fn table_count(&self, name: &str) -> Result<u64, StorageError> {
        validate_identifier(name)?;
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", quote_ident(name)))
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    fn quote(&self, ident: &str) -> String {
        quote_ident(ident)
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.pool.close().await;
            info!("Database connection pool closed");
        }
    }
}

pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn pg_type(column_type: ColumnType) -> String {
    match column_type {
        ColumnType::BigInt => "BIGINT".to_string(),
        ColumnType::Int => "INTEGER".to_string(),
        ColumnType::Varchar(n) => format!("VARCHAR({n})"),
        ColumnType::Char(n) => format!("CHAR({n})"),
        ColumnType::Text => "TEXT".to_string(),
        ColumnType::Decimal(p, s) => format!("NUMERIC({p},{s})"),
        ColumnType::Date => "DATE".to_string(),
        ColumnType::DateTime => "TIMESTAMP".to_string(),
        ColumnType::Timestamp => "TIMESTAMPTZ".to_string(),
    }
}

fn pg_declaration(column: &Column) -> String {
    let ty = pg_type(column.column_type);
    match column.role {
        ColumnRole::Plain => ty,
        ColumnRole::SurrogateId => "BIGINT GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY".to_string(),
        ColumnRole::PrimaryKey => format!("{ty} PRIMARY KEY"),
        ColumnRole::Unique => format!("{ty} UNIQUE"),
        ColumnRole::CreatedAt | ColumnRole::UpdatedAt => "TIMESTAMPTZ NOT NULL DEFAULT now()".to_string(),
    }
}

/// `CREATE TABLE IF NOT EXISTS` statement for `schema`.
pub fn create_table_sql(name: &str, schema: &TableSchema) -> String {
    let columns = schema
        .columns()
        .iter()
        .map(|c| format!("    {} {}", quote_ident(&c.name), pg_declaration(c)))
        .collect::<Vec<_>>()
        .join(",\n");
    format!("CREATE TABLE IF NOT EXISTS {} (\n{columns}\n)", quote_ident(name))
}

/// Text bound for one cell. Empty strings become null outside text columns, where the
/// cast would fail.
fn bind_text(value: Option<&Value>, column: &ColumnInfo) -> Option<String> {
    let text = scalar_text(value?)?;
    if text.is_empty() && !column.is_textual() {
        return None;
    }
    Some(text)
}

fn conflict_clause(info: &TableInfo, used: &[&ColumnInfo]) -> String {
    let Some(target) = info
        .conflict_column
        .as_deref()
        .filter(|target| used.iter().any(|c| c.name == *target))
    else {
        return " ON CONFLICT DO NOTHING".to_string();
    };

    let mut updates: Vec<String> = used
        .iter()
        .filter(|c| c.name != target)
        .map(|c| format!("{0} = EXCLUDED.{0}", quote_ident(&c.name)))
        .collect();
    if info.has_updated_at && !used.iter().any(|c| c.name == "updated_at") {
        updates.push(format!("{} = now()", quote_ident("updated_at")));
    }

    if updates.is_empty() {
        format!(" ON CONFLICT ({}) DO NOTHING", quote_ident(target))
    } else {
        format!(
            " ON CONFLICT ({}) DO UPDATE SET {}",
            quote_ident(target),
            updates.join(", ")
        )
    }
}

/// Postgres rejects one statement touching the same conflict key twice. Keep the last
/// row per key at the position of the first.
fn collapse_on(rows: Vec<Record>, column: &str) -> Vec<Record> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<Record> = Vec::with_capacity(rows.len());
    let before = rows.len();

    for row in rows {
        match row.get(column).and_then(scalar_text) {
            Some(key) => match positions.get(&key) {
                Some(&pos) => out[pos] = row,
                None => {
                    positions.insert(key, out.len());
                    out.push(row);
                },
            },
            None => out.push(row),
        }
    }

    if out.len() < before {
        warn!(
            column,
            collapsed = before - out.len(),
            "Rows sharing a conflict key were collapsed"
        );
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn column(name: &str, udt: &str) -> ColumnInfo {
        ColumnInfo {
            name: name.to_string(),
            udt: udt.to_string(),
        }
    }

    #[test]
    fn test_create_table_sql() {
        let schema = TableSchema::new(vec![
            Column::surrogate_id(),
            Column::new("codigo_lancamento", ColumnType::Varchar(50)).unique(),
            Column::new("valor_documento", ColumnType::Decimal(15, 2)),
            Column::new("data_emissao", ColumnType::DateTime),
        ])
        .with_timestamps();

        let sql = create_table_sql("contas_receber", &schema);
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"contas_receber\" ("));
        assert!(sql.contains("\"id\" BIGINT GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY"));
        assert!(sql.contains("\"codigo_lancamento\" VARCHAR(50) UNIQUE"));
        assert!(sql.contains("\"valor_documento\" NUMERIC(15,2)"));
        assert!(sql.contains("\"data_emissao\" TIMESTAMP,"));
        assert!(sql.contains("\"updated_at\" TIMESTAMPTZ NOT NULL DEFAULT now()"));
    }

    #[test]
    fn test_quote_ident_escapes() {
        assert_eq!(quote_ident("nfse"), "\"nfse\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_bind_text() {
        let text = column("descricao", "varchar");
        let number = column("valor", "numeric");
        assert_eq!(bind_text(Some(&json!("")), &text), Some(String::new()));
        assert_eq!(bind_text(Some(&json!("")), &number), None);
        assert_eq!(bind_text(Some(&json!(12.5)), &number), Some("12.5".into()));
        assert_eq!(bind_text(Some(&Value::Null), &number), None);
        assert_eq!(bind_text(None, &text), None);
    }

    #[test]
    fn test_conflict_clause() {
        let code = column("codigo_lancamento", "varchar");
        let value = column("valor_documento", "numeric");
        let info = TableInfo {
            columns: vec![code.clone(), value.clone()],
            conflict_column: Some("codigo_lancamento".into()),
            has_updated_at: true,
        };

        let clause = conflict_clause(&info, &[&code, &value]);
        assert_eq!(
            clause,
            " ON CONFLICT (\"codigo_lancamento\") DO UPDATE SET \
             \"valor_documento\" = EXCLUDED.\"valor_documento\", \"updated_at\" = now()"
        );

        assert_eq!(conflict_clause(&info, &[&value]), " ON CONFLICT DO NOTHING");
    }

    #[test]
    fn test_collapse_keeps_last_value_in_first_position() {
        let rows = vec![
            json!({"k": "a", "v": 1}),
            json!({"k": "b", "v": 2}),
            json!({"k": "a", "v": 3}),
            json!({"v": 4}),
        ]
        .into_iter()
        .map(|v| v.as_object().cloned().unwrap())
        .collect();

        let out = collapse_on(rows, "k");
        assert_eq!(out.len(), 3);
        assert_eq!(out[0]["v"], json!(3));
        assert_eq!(out[1]["k"], json!("b"));
        assert_eq!(out[2]["v"], json!(4));
    }
}
