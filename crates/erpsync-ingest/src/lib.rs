//! erpsync Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Collects business records from the Omie ERP API and loads them into PostgreSQL or
//! BigQuery.
//!
//! # Layout
//!
//! - [`client`]: paced, retrying HTTP client for the ERP
//! - [`collector`]: the collector contract and the shared pagination loop
//! - [`collectors`]: one collector per ERP entity, and the registry
//! - [`storage`]: the backend contract with its two implementations
//! - [`orchestrator`]: full, financial and incremental runs
//! - [`metrics`]: per-operation timing
//! - [`report`]: table counts, title totals and per-operation metrics
//!
//! # Example
//!
//! ```no_run
//! use erpsync_ingest::config::Config;
//! use erpsync_ingest::client::OmieClient;
//! use erpsync_ingest::metrics::MetricsCollector;
//! use erpsync_ingest::orchestrator::{ExecutionMode, Orchestrator};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let api = Arc::new(OmieClient::new(config.api.clone())?);
//!     let storage = erpsync_ingest::storage::connect(&config).await?;
//!     let orchestrator =
//!         Orchestrator::new(api, storage, Arc::new(MetricsCollector::new()), config.sync);
//!
//!     orchestrator.initialize().await;
//!     let report = orchestrator
//!         .run_incremental_collections(5, ExecutionMode::Sequential)
//!         .await;
//!     println!("{} records", report.total_records());
//!     orchestrator.cleanup().await;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod collector;
pub mod collectors;
pub mod config;
pub mod metrics;
pub mod orchestrator;
pub mod report;
pub mod storage;
