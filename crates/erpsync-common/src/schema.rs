//! Typed destination table declarations.
//!
//! Collectors declare their tables once; each storage backend renders its own DDL from
//! the same [`TableSchema`].

use serde::Serialize;
use std::fmt;

/// Declared column type, independent of any SQL dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ColumnType {
    BigInt,
    Int,
    Varchar(u16),
    Char(u16),
    Text,
    /// Precision and scale
    Decimal(u8, u8),
    Date,
    DateTime,
    Timestamp,
}

impl ColumnType {
    /// String-like columns keep empty strings; other types store them as null.
    pub fn is_textual(self) -> bool {
        matches!(
            self,
            ColumnType::Varchar(_) | ColumnType::Char(_) | ColumnType::Text
        )
    }

    pub fn is_temporal(self) -> bool {
        matches!(
            self,
            ColumnType::Date | ColumnType::DateTime | ColumnType::Timestamp
        )
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::BigInt => f.write_str("BIGINT"),
            ColumnType::Int => f.write_str("INT"),
            ColumnType::Varchar(n) => write!(f, "VARCHAR({n})"),
            ColumnType::Char(n) => write!(f, "CHAR({n})"),
            ColumnType::Text => f.write_str("TEXT"),
            ColumnType::Decimal(p, s) => write!(f, "DECIMAL({p},{s})"),
            ColumnType::Date => f.write_str("DATE"),
            ColumnType::DateTime => f.write_str("DATETIME"),
            ColumnType::Timestamp => f.write_str("TIMESTAMP"),
        }
    }
}

/// How a column participates in keys and bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ColumnRole {
    #[default]
    Plain,
    /// Generated row id. Never supplied by collectors.
    SurrogateId,
    PrimaryKey,
    Unique,
    /// Set once when the row is first written
    CreatedAt,
    /// Refreshed whenever the row is rewritten
    UpdatedAt,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
    pub role: ColumnRole,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            role: ColumnRole::Plain,
        }
    }

    pub fn surrogate_id() -> Self {
        Self {
            name: "id".to_string(),
            column_type: ColumnType::BigInt,
            role: ColumnRole::SurrogateId,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.role = ColumnRole::PrimaryKey;
        self
    }

    pub fn unique(mut self) -> Self {
        self.role = ColumnRole::Unique;
        self
    }

    /// True for columns the storage layer fills on its own.
    pub fn is_managed(&self) -> bool {
        matches!(
            self.role,
            ColumnRole::SurrogateId | ColumnRole::CreatedAt | ColumnRole::UpdatedAt
        )
    }

    /// SQL-ish declaration, e.g. `VARCHAR(50) UNIQUE`.
    pub fn declaration(&self) -> String {
        match self.role {
            ColumnRole::Plain => self.column_type.to_string(),
            ColumnRole::SurrogateId => format!("{} PRIMARY KEY AUTO_INCREMENT", self.column_type),
            ColumnRole::PrimaryKey => format!("{} PRIMARY KEY", self.column_type),
            ColumnRole::Unique => format!("{} UNIQUE", self.column_type),
            ColumnRole::CreatedAt | ColumnRole::UpdatedAt => {
                format!("{} DEFAULT CURRENT_TIMESTAMP", self.column_type)
            },
        }
    }
}

/// Ordered column list of one destination table.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct TableSchema {
    columns: Vec<Column>,
}

impl TableSchema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    /// Append `created_at` and `updated_at` bookkeeping columns.
    pub fn with_timestamps(mut self) -> Self {
        self.columns.push(Column {
            name: "created_at".to_string(),
            column_type: ColumnType::Timestamp,
            role: ColumnRole::CreatedAt,
        });
        self.columns.push(Column {
            name: "updated_at".to_string(),
            column_type: ColumnType::Timestamp,
            role: ColumnRole::UpdatedAt,
        });
        self
    }

    /// Append only `created_at`.
    pub fn with_created_at(mut self) -> Self {
        self.columns.push(Column {
            name: "created_at".to_string(),
            column_type: ColumnType::Timestamp,
            role: ColumnRole::CreatedAt,
        });
        self
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Columns a collector is expected to fill.
    pub fn data_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| !c.is_managed())
    }

    pub fn has_role(&self, role: ColumnRole) -> bool {
        self.columns.iter().any(|c| c.role == role)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receivables() -> TableSchema {
        TableSchema::new(vec![
            Column::surrogate_id(),
            Column::new("codigo_lancamento", ColumnType::Varchar(50)).unique(),
            Column::new("valor_documento", ColumnType::Decimal(15, 2)),
            Column::new("data_vencimento", ColumnType::Date),
        ])
        .with_timestamps()
    }

    #[test]
    fn test_declarations() {
        let schema = receivables();
        let decls: Vec<String> = schema.columns().iter().map(Column::declaration).collect();
        assert_eq!(decls[0], "BIGINT PRIMARY KEY AUTO_INCREMENT");
        assert_eq!(decls[1], "VARCHAR(50) UNIQUE");
        assert_eq!(decls[2], "DECIMAL(15,2)");
        assert_eq!(decls[5], "TIMESTAMP DEFAULT CURRENT_TIMESTAMP");
    }

    #[test]
    fn test_data_columns_skip_managed() {
        let schema = receivables();
        let names: Vec<&str> = schema.data_columns().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["codigo_lancamento", "valor_documento", "data_vencimento"]
        );
        assert_eq!(schema.len(), 6);
        assert!(schema.has_role(ColumnRole::UpdatedAt));
        assert!(ColumnType::Char(1).is_textual());
        assert!(ColumnType::DateTime.is_temporal());
    }
}
