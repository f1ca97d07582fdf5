//! PostgreSQL rule store

use super::dialect::PostgresDialect;
use super::sql::{delay_to_nanos, headers_to_json, Queries, RuleRow};
use super::{RuleStore, StoreError};
use crate::rule::Rule;
use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Executor, PgPool, Row};
use std::time::Duration;
use tracing::info;

pub struct PostgresStore {
    pool: PgPool,
    queries: Queries,
}

impl PostgresStore {
    /// Connect a pool to `database_url` and create the schema if needed
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;

        let queries = Queries::new(&PostgresDialect);
        // No bind arguments, so this runs as a simple query and may hold several statements
        pool.execute(queries.schema.as_str()).await?;

        info!("PostgreSQL store connected");
        Ok(Self { pool, queries })
    }
}

fn decode_row(row: &PgRow) -> Result<Rule, StoreError> {
    let status: i32 = row.try_get("response_status")?;
    RuleRow {
        site: row.try_get("site")?,
        path: row.try_get("path")?,
        method: row.try_get("method")?,
        headers: row.try_get("headers")?,
        delay_nanos: row.try_get("delay")?,
        status: i64::from(status),
        body: row.try_get("response_body")?,
    }
    .into_rule()
}

#[async_trait]
impl RuleStore for PostgresStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn create_site(&self, site: &str) -> Result<(), StoreError> {
        let inserted = sqlx::query(&self.queries.create_site)
            .bind(site)
            .execute(&self.pool)
            .await;

        match inserted {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::SiteExists(site.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn site_exists(&self, site: &str) -> Result<bool, StoreError> {
        let row = sqlx::query(&self.queries.get_site)
            .bind(site)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn upsert_rule(&self, rule: &Rule) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let site = sqlx::query(&self.queries.get_site)
            .bind(rule.site.as_str())
            .fetch_optional(&mut *tx)
            .await?;
        if site.is_none() {
            tx.rollback().await?;
            return Err(StoreError::UnknownSite(rule.site.clone()));
        }

        sqlx::query(&self.queries.delete_rule)
            .bind(rule.site.as_str())
            .bind(rule.path.as_str())
            .bind(rule.method.as_str())
            .execute(&mut *tx)
            .await?;

        sqlx::query(&self.queries.insert_rule)
            .bind(rule.site.as_str())
            .bind(rule.path.as_str())
            .bind(rule.method.as_str())
            .bind(headers_to_json(&rule.headers))
            .bind(delay_to_nanos(rule.delay))
            .bind(i32::from(rule.status_code))
            .bind(rule.body.as_slice())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_rules(&self, site: &str) -> Result<Vec<Rule>, StoreError> {
        let rows = sqlx::query(&self.queries.get_site_rules)
            .bind(site)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(decode_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Needs a disposable database; skipped unless the URL is provided
    fn test_database_url() -> Option<String> {
        std::env::var("DELAYGATE_TEST_POSTGRES_URL").ok()
    }

    #[tokio::test]
    async fn test_postgres_store_roundtrip() {
        let Some(url) = test_database_url() else {
            eprintln!("DELAYGATE_TEST_POSTGRES_URL not set, skipping");
            return;
        };

        let store = PostgresStore::connect(&url).await.unwrap();
        let site = format!("pgtest{}", uuid::Uuid::new_v4().simple());

        store.create_site(&site).await.unwrap();
        assert!(matches!(
            store.create_site(&site).await,
            Err(StoreError::SiteExists(_))
        ));
        assert!(matches!(
            store.upsert_rule(&Rule::new(format!("{}x", site))).await,
            Err(StoreError::UnknownSite(_))
        ));

        let wildcard = Rule::new(site.as_str());
        let specific = Rule::new(site.as_str())
            .with_path("/test")
            .with_method("GET")
            .with_status(201)
            .with_header("X-Test", "1")
            .with_delay(Duration::from_millis(250))
            .with_body("hop");
        store.upsert_rule(&wildcard).await.unwrap();
        store.upsert_rule(&specific).await.unwrap();
        store.upsert_rule(&specific).await.unwrap();

        let rules = store.get_rules(&site).await.unwrap();
        assert_eq!(rules, vec![specific, wildcard]);
    }
}
