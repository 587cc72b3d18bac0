//! erpsync Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, normalization rules, and error handling for the erpsync workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`SyncError`] and the [`Result`] alias
//! - **Logging**: subscriber setup shared by every binary
//! - **Schema**: typed destination table declarations
//! - **Normalization**: the flattening, serialization and key rules both storage
//!   backends apply to records
//!
//! # Example
//!
//! ```
//! use erpsync_common::normalize::{normalize_date, Record};
//!
//! assert_eq!(normalize_date("05/03/2024").as_deref(), Some("2024-03-05"));
//! let _empty = Record::new();
//! ```

pub mod error;
pub mod logging;
pub mod normalize;
pub mod schema;

// Re-export commonly used types
pub use error::{Result, SyncError};
pub use normalize::{Record, RecordKey};
pub use schema::{Column, ColumnRole, ColumnType, TableSchema};
