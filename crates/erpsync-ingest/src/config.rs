//! Configuration management
//!
//! Everything is read from the process environment (after loading `.env`). Numeric
//! values that fail to parse fall back to their defaults; missing credentials are an error.

use erpsync_common::{Result, SyncError};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Remote API Constants
// ============================================================================

/// Default API base URL.
pub const DEFAULT_BASE_URL: &str = "https://app.omie.com.br/api/v1";

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Timeout in seconds for endpoints known to answer slowly (purchase orders).
pub const DEFAULT_SLOW_TIMEOUT_SECS: u64 = 120;

/// Default number of retries for retryable HTTP statuses.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default backoff factor in seconds.
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 5;

/// Fixed delay before every request, in milliseconds.
pub const DEFAULT_REQUEST_DELAY_MS: u64 = 300;

/// Fixed delay before bank-statement requests, in milliseconds.
pub const DEFAULT_SLOW_REQUEST_DELAY_MS: u64 = 1000;

/// Seconds added to the server-specified wait of a blocked response.
pub const DEFAULT_BLOCK_MARGIN_SECS: u64 = 10;

// ============================================================================
// Storage Constants
// ============================================================================

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/erpsync";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default location for a newly created warehouse dataset.
pub const DEFAULT_BIGQUERY_LOCATION: &str = "US";

// ============================================================================
// Collection Constants
// ============================================================================

/// Default page size requested from the API.
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Delay between pages of one collector, in milliseconds.
pub const DEFAULT_PAGE_DELAY_MS: u64 = 500;

/// Hard ceiling on pages fetched by one collection.
pub const DEFAULT_MAX_ITERATIONS: u32 = 1000;

/// Delay between collectors in sequential mode, in milliseconds.
pub const DEFAULT_COLLECTOR_DELAY_MS: u64 = 1000;

/// Default worker bound in parallel mode.
pub const DEFAULT_MAX_WORKERS: usize = 4;

/// Window, in days, of the financial pass of a full run.
pub const DEFAULT_FINANCIAL_DAYS: u32 = 180;

/// Default window, in days, of an incremental run.
pub const DEFAULT_INCREMENTAL_DAYS: u32 = 5;

/// Records per insert call.
pub const DEFAULT_INSERT_BATCH_SIZE: usize = 500;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub api: ApiConfig,
    pub database: DatabaseConfig,
    /// Present when the columnar warehouse is configured; it then replaces the database.
    pub warehouse: Option<WarehouseConfig>,
    pub sync: SyncConfig,
}

/// Remote API client configuration
#[derive(Clone)]
pub struct ApiConfig {
    pub app_key: String,
    pub app_secret: String,
    pub base_url: String,
    pub timeout: Duration,
    pub slow_timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub request_delay: Duration,
    pub slow_request_delay: Duration,
    pub block_margin: Duration,
}

impl fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiConfig")
            .field("app_key", &self.app_key)
            .field("app_secret", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("slow_timeout", &self.slow_timeout)
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .field("request_delay", &self.request_delay)
            .field("slow_request_delay", &self.slow_request_delay)
            .field("block_margin", &self.block_margin)
            .finish()
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            app_key: String::new(),
            app_secret: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            slow_timeout: Duration::from_secs(DEFAULT_SLOW_TIMEOUT_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
            request_delay: Duration::from_millis(DEFAULT_REQUEST_DELAY_MS),
            slow_request_delay: Duration::from_millis(DEFAULT_SLOW_REQUEST_DELAY_MS),
            block_margin: Duration::from_secs(DEFAULT_BLOCK_MARGIN_SECS),
        }
    }
}

/// Relational backend configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            connect_timeout: Duration::from_secs(DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS),
        }
    }
}

/// Columnar warehouse configuration
#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    pub project_id: String,
    pub dataset_id: String,
    pub location: String,
    pub credentials: WarehouseCredentials,
}

#[derive(Clone)]
pub enum WarehouseCredentials {
    /// Path to a service-account key file
    KeyFile(PathBuf),
    /// Inline service-account key JSON
    KeyJson(String),
    ApplicationDefault,
}

impl fmt::Debug for WarehouseCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WarehouseCredentials::KeyFile(path) => f.debug_tuple("KeyFile").field(path).finish(),
            WarehouseCredentials::KeyJson(_) => f.write_str("KeyJson(<redacted>)"),
            WarehouseCredentials::ApplicationDefault => f.write_str("ApplicationDefault"),
        }
    }
}

/// Checking account whose statement is collected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountRef {
    /// Numeric account code assigned by the ERP
    Code(i64),
    /// Caller-assigned integration code
    IntegrationCode(String),
}

impl AccountRef {
    /// Numeric account code; anything but a positive integer is rejected.
    pub fn code(raw: &str) -> Result<Self> {
        match raw.trim().parse::<i64>() {
            Ok(code) if code > 0 => Ok(AccountRef::Code(code)),
            _ => Err(SyncError::Config(format!(
                "EXTRATO_CONTA_CORRENTE must be a positive account code, got '{raw}'"
            ))),
        }
    }

    /// Integration code, taken verbatim even when it looks numeric.
    pub fn integration_code(raw: &str) -> Result<Self> {
        match raw.trim() {
            "" => Err(SyncError::Config(
                "EXTRATO_CONTA_CORRENTE_INTEGRACAO is empty".to_string(),
            )),
            code => Ok(AccountRef::IntegrationCode(code.to_string())),
        }
    }
}

/// Collection and scheduling settings
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub page_size: u32,
    pub page_delay: Duration,
    pub max_iterations: u32,
    pub collector_delay: Duration,
    pub max_workers: usize,
    pub financial_days: u32,
    pub incremental_days: u32,
    pub insert_batch_size: usize,
    pub statement_account: Option<AccountRef>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            page_delay: Duration::from_millis(DEFAULT_PAGE_DELAY_MS),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            collector_delay: Duration::from_millis(DEFAULT_COLLECTOR_DELAY_MS),
            max_workers: DEFAULT_MAX_WORKERS,
            financial_days: DEFAULT_FINANCIAL_DAYS,
            incremental_days: DEFAULT_INCREMENTAL_DAYS,
            insert_batch_size: DEFAULT_INSERT_BATCH_SIZE,
            statement_account: None,
        }
    }
}

/// Environment lookup with trimming and typed fallbacks.
struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse_or<T: FromStr>(&self, key: &str, default: T) -> T {
        self.string(key)
            .and_then(|s| s.parse().ok())
            .unwrap_or(default)
    }

    fn secs(&self, key: &str, default: u64) -> Duration {
        Duration::from_secs(self.parse_or(key, default))
    }

    fn millis(&self, key: &str, default: u64) -> Duration {
        Duration::from_millis(self.parse_or(key, default))
    }
}

impl Config {
    /// Load configuration from `.env` and the process environment
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let api = ApiConfig {
            app_key: env.string("OMIE_APP_KEY").unwrap_or_default(),
            app_secret: env.string("OMIE_APP_SECRET").unwrap_or_default(),
            base_url: env
                .string("OMIE_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            timeout: env.secs("OMIE_TIMEOUT", DEFAULT_TIMEOUT_SECS),
            slow_timeout: env.secs("OMIE_SLOW_TIMEOUT", DEFAULT_SLOW_TIMEOUT_SECS),
            max_retries: env.parse_or("OMIE_MAX_RETRIES", DEFAULT_MAX_RETRIES),
            retry_delay: env.secs("OMIE_RETRY_DELAY", DEFAULT_RETRY_DELAY_SECS),
            request_delay: env.millis("OMIE_REQUEST_DELAY_MS", DEFAULT_REQUEST_DELAY_MS),
            slow_request_delay: env
                .millis("OMIE_SLOW_REQUEST_DELAY_MS", DEFAULT_SLOW_REQUEST_DELAY_MS),
            block_margin: Duration::from_secs(DEFAULT_BLOCK_MARGIN_SECS),
        };

        let database = DatabaseConfig {
            url: env
                .string("DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            max_connections: env
                .parse_or("DATABASE_MAX_CONNECTIONS", DEFAULT_DATABASE_MAX_CONNECTIONS),
            connect_timeout: env.secs(
                "DATABASE_CONNECT_TIMEOUT",
                DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            ),
        };

        let warehouse = match (env.string("GCP_PROJECT_ID"), env.string("BIGQUERY_DATASET")) {
            (Some(project_id), Some(dataset_id)) => {
                let credentials = if let Some(json) =
                    env.string("GOOGLE_APPLICATION_CREDENTIALS_JSON")
                {
                    WarehouseCredentials::KeyJson(json)
                } else if let Some(path) = env.string("GOOGLE_APPLICATION_CREDENTIALS") {
                    WarehouseCredentials::KeyFile(PathBuf::from(path))
                } else {
                    WarehouseCredentials::ApplicationDefault
                };
                Some(WarehouseConfig {
                    project_id,
                    dataset_id,
                    location: env
                        .string("BIGQUERY_LOCATION")
                        .unwrap_or_else(|| DEFAULT_BIGQUERY_LOCATION.to_string()),
                    credentials,
                })
            },
            _ => None,
        };

        let statement_account = match (
            env.string("EXTRATO_CONTA_CORRENTE"),
            env.string("EXTRATO_CONTA_CORRENTE_INTEGRACAO"),
        ) {
            (Some(code), integration) => {
                if integration.is_some() {
                    tracing::warn!(
                        "Both EXTRATO_CONTA_CORRENTE and EXTRATO_CONTA_CORRENTE_INTEGRACAO set; \
                         using the account code"
                    );
                }
                Some(AccountRef::code(&code)?)
            },
            (None, Some(integration)) => Some(AccountRef::integration_code(&integration)?),
            (None, None) => None,
        };

        let sync = SyncConfig {
            page_size: env.parse_or("SYNC_PAGE_SIZE", DEFAULT_PAGE_SIZE),
            page_delay: env.millis("SYNC_PAGE_DELAY_MS", DEFAULT_PAGE_DELAY_MS),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            collector_delay: env.millis("SYNC_COLLECTOR_DELAY_MS", DEFAULT_COLLECTOR_DELAY_MS),
            max_workers: env.parse_or("SYNC_MAX_WORKERS", DEFAULT_MAX_WORKERS),
            financial_days: env.parse_or("SYNC_FINANCIAL_DAYS", DEFAULT_FINANCIAL_DAYS),
            incremental_days: env.parse_or("SYNC_INCREMENTAL_DAYS", DEFAULT_INCREMENTAL_DAYS),
            insert_batch_size: DEFAULT_INSERT_BATCH_SIZE,
            statement_account,
        };

        let config = Config {
            api,
            database,
            warehouse,
            sync,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.api.app_key.is_empty() || self.api.app_secret.is_empty() {
            return Err(SyncError::Config(
                "OMIE_APP_KEY and OMIE_APP_SECRET must be set".to_string(),
            ));
        }

        if !self.api.base_url.starts_with("http://") && !self.api.base_url.starts_with("https://")
        {
            return Err(SyncError::Config(format!(
                "OMIE_BASE_URL must be an http(s) URL, got '{}'",
                self.api.base_url
            )));
        }

        if self.warehouse.is_none() {
            if self.database.url.is_empty() {
                return Err(SyncError::Config("Database URL cannot be empty".to_string()));
            }
            if self.database.max_connections == 0 {
                return Err(SyncError::Config(
                    "Database max_connections must be greater than 0".to_string(),
                ));
            }
        }

        if self.sync.page_size == 0 {
            return Err(SyncError::Config("SYNC_PAGE_SIZE must be greater than 0".to_string()));
        }

        if self.sync.max_workers == 0 {
            return Err(SyncError::Config(
                "SYNC_MAX_WORKERS must be greater than 0".to_string(),
            ));
        }

        if self.sync.statement_account.is_none() {
            tracing::warn!(
                "Neither EXTRATO_CONTA_CORRENTE nor EXTRATO_CONTA_CORRENTE_INTEGRACAO set - \
                 bank statement collection will be skipped"
            );
        }

        Ok(())
    }

    /// Name of the selected storage backend.
    pub fn backend_name(&self) -> &'static str {
        if self.warehouse.is_some() {
            "bigquery"
        } else {
            "postgres"
        }
    }
}
