//! SQLite rule store
//!
//! rusqlite is synchronous, so every operation runs on the blocking pool while
//! holding the connection lock. The lock also serializes writers, which is what
//! makes the delete-then-insert upsert atomic for other requests.

use super::dialect::SqliteDialect;
use super::sql::{delay_to_nanos, headers_to_json, Queries, RuleRow};
use super::{RuleStore, StoreError};
use crate::rule::Rule;
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    queries: Arc<Queries>,
}

impl SqliteStore {
    /// Open or create a database file
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        let store = Self::with_connection(conn)?;
        info!("SQLite store opened at {}", path.display());
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        let queries = Queries::new(&SqliteDialect);

        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(&queries.schema)?;
        debug!("SQLite schema ready");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            queries: Arc::new(queries),
        })
    }

    async fn run<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection, &Queries) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let queries = Arc::clone(&self.queries);

        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock();
            f(&mut conn, &queries)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

fn site_row_exists(conn: &Connection, sql: &str, site: &str) -> Result<bool, StoreError> {
    let found = conn
        .query_row(sql, params![site], |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
}

#[async_trait]
impl RuleStore for SqliteStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn create_site(&self, site: &str) -> Result<(), StoreError> {
        let site = site.to_string();
        self.run(move |conn, q| {
            let inserted = conn.execute(&q.create_site, params![site]);
            match inserted {
                Ok(_) => Ok(()),
                Err(e) if is_constraint_violation(&e) => Err(StoreError::SiteExists(site)),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn site_exists(&self, site: &str) -> Result<bool, StoreError> {
        let site = site.to_string();
        self.run(move |conn, q| site_row_exists(conn, &q.get_site, &site))
            .await
    }

    async fn upsert_rule(&self, rule: &Rule) -> Result<(), StoreError> {
        let rule = rule.clone();
        self.run(move |conn, q| {
            let tx = conn.transaction()?;

            if !site_row_exists(&tx, &q.get_site, &rule.site)? {
                return Err(StoreError::UnknownSite(rule.site));
            }

            tx.execute(&q.delete_rule, params![rule.site, rule.path, rule.method])?;
            tx.execute(
                &q.insert_rule,
                params![
                    rule.site,
                    rule.path,
                    rule.method,
                    headers_to_json(&rule.headers),
                    delay_to_nanos(rule.delay),
                    i64::from(rule.status_code),
                    rule.body,
                ],
            )?;

            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn get_rules(&self, site: &str) -> Result<Vec<Rule>, StoreError> {
        let site = site.to_string();
        self.run(move |conn, q| {
            let mut stmt = conn.prepare(&q.get_site_rules)?;
            let rows = stmt
                .query_map(params![site], |row| {
                    Ok(RuleRow {
                        site: row.get(0)?,
                        path: row.get(1)?,
                        method: row.get(2)?,
                        headers: row.get(3)?,
                        delay_nanos: row.get(4)?,
                        status: row.get(5)?,
                        body: row.get(6)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            rows.into_iter().map(RuleRow::into_rule).collect()
        })
        .await
    }
}
