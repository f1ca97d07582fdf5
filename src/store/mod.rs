//! Rule storage
//!
//! The store owns every persisted site and rule. Backends:
//! - [`MemoryStore`]: process-local, lost on restart
//! - [`SqliteStore`]: a single SQLite file (or in-memory database)
//! - [`PostgresStore`]: a PostgreSQL pool
//!
//! The SQL backends share one canonical query text per operation (see [`sql`])
//! and rewrite it once through a [`dialect::Dialect`] when the store is opened.

pub mod dialect;
pub mod memory;
pub mod postgres;
pub mod sql;
pub mod sqlite;

use crate::rule::Rule;
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;

/// Errors produced by a rule store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Site <{0}> already exists")]
    SiteExists(String),
    #[error("Site <{0}> doesn't exist")]
    UnknownSite(String),
    #[error("Malformed rule stored for site <{site}>: {reason}")]
    Deserialize { site: String, reason: String },
    #[error("Unknown storage driver <{0}>. Known drivers: memory, sqlite, postgres")]
    UnknownDriver(String),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Storage task failed: {0}")]
    Task(String),
}

/// Persistence for sites and their rules.
///
/// `create_site` is the arbitration point for unique site names: of two
/// concurrent calls with the same name exactly one succeeds, the other gets
/// [`StoreError::SiteExists`].
///
/// `upsert_rule` replaces the rule with the same `(site, path, method)` key in
/// one atomic step. Two concurrent upserts of the *same* key may race and the
/// last commit wins (or one fails on the primary key); upserts of different
/// keys never interleave.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Short backend name for logs
    fn backend(&self) -> &'static str;

    async fn create_site(&self, site: &str) -> Result<(), StoreError>;

    async fn site_exists(&self, site: &str) -> Result<bool, StoreError>;

    /// Fails with [`StoreError::UnknownSite`] if the rule's site was never created.
    async fn upsert_rule(&self, rule: &Rule) -> Result<(), StoreError>;

    /// All rules of a site, most specific first (see [`crate::rule::specificity_cmp`])
    async fn get_rules(&self, site: &str) -> Result<Vec<Rule>, StoreError>;
}

pub type SharedStore = Arc<dyn RuleStore>;

/// Storage driver selected in the configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Driver {
    Memory,
    Sqlite,
    Postgres,
}

impl FromStr for Driver {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Driver::Memory),
            "sqlite" | "sqlite3" => Ok(Driver::Sqlite),
            "postgres" | "postgresql" => Ok(Driver::Postgres),
            _ => Err(StoreError::UnknownDriver(s.to_string())),
        }
    }
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Driver::Memory => "memory",
            Driver::Sqlite => "sqlite",
            Driver::Postgres => "postgres",
        };
        f.write_str(name)
    }
}

/// Open the store for `driver`, creating the schema if needed
pub async fn open(driver: Driver, data_source: &str) -> Result<SharedStore, StoreError> {
    let store: SharedStore = match driver {
        Driver::Memory => Arc::new(MemoryStore::new()),
        Driver::Sqlite => {
            if data_source.is_empty() || data_source == ":memory:" {
                Arc::new(SqliteStore::open_in_memory()?)
            } else {
                Arc::new(SqliteStore::open(data_source)?)
            }
        }
        Driver::Postgres => Arc::new(PostgresStore::connect(data_source).await?),
    };

    info!(driver = %driver, backend = store.backend(), "Rule store opened");
    Ok(store)
}
