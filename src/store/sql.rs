//! Canonical SQL shared by the SQL backends, and row decoding

use super::dialect::Dialect;
use super::StoreError;
use crate::rule::Rule;
use std::collections::HashMap;
use std::time::Duration;

pub const CREATE_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS sites (
    site TEXT PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS rules (
    site TEXT NOT NULL,
    path TEXT NOT NULL,
    method TEXT NOT NULL,
    headers TEXT NOT NULL,
    delay BIGINT NOT NULL,
    response_status INT NOT NULL,
    response_body BYTEA NOT NULL,
    PRIMARY KEY (site, path, method),
    FOREIGN KEY (site) REFERENCES sites(site)
);
"#;

pub const CREATE_SITE_SQL: &str = "INSERT INTO sites (site) VALUES ($1)";

pub const GET_SITE_SQL: &str = "SELECT site FROM sites WHERE site = $1";

pub const DELETE_RULE_SQL: &str =
    "DELETE FROM rules WHERE site = $1 AND path = $2 AND method = $3";

pub const INSERT_RULE_SQL: &str = r#"
INSERT INTO rules (site, path, method, headers, delay, response_status, response_body)
VALUES ($1, $2, $3, $4, $5, $6, $7)
"#;

pub const GET_SITE_RULES_SQL: &str = r#"
SELECT site, path, method, headers, delay, response_status, response_body
FROM rules
WHERE site = $1
ORDER BY LENGTH(path) DESC, LENGTH(method) DESC, path, method
"#;

/// Every query of a SQL backend, already rewritten for its dialect
#[derive(Debug, Clone)]
pub struct Queries {
    pub schema: String,
    pub create_site: String,
    pub get_site: String,
    pub delete_rule: String,
    pub insert_rule: String,
    pub get_site_rules: String,
}

impl Queries {
    pub fn new(dialect: &dyn Dialect) -> Self {
        Self {
            schema: dialect.dialectify(CREATE_SCHEMA_SQL),
            create_site: dialect.dialectify(CREATE_SITE_SQL),
            get_site: dialect.dialectify(GET_SITE_SQL),
            delete_rule: dialect.dialectify(DELETE_RULE_SQL),
            insert_rule: dialect.dialectify(INSERT_RULE_SQL),
            get_site_rules: dialect.dialectify(GET_SITE_RULES_SQL),
        }
    }
}

/// A rules row as read from the database, before validation
pub struct RuleRow {
    pub site: String,
    pub path: String,
    pub method: String,
    pub headers: String,
    pub delay_nanos: i64,
    pub status: i64,
    pub body: Vec<u8>,
}

impl RuleRow {
    pub fn into_rule(self) -> Result<Rule, StoreError> {
        let headers = headers_from_json(&self.site, &self.headers)?;

        let delay_nanos = u64::try_from(self.delay_nanos).map_err(|_| StoreError::Deserialize {
            site: self.site.clone(),
            reason: format!("negative delay {}ns", self.delay_nanos),
        })?;

        let status_code = u16::try_from(self.status).map_err(|_| StoreError::Deserialize {
            site: self.site.clone(),
            reason: format!("status code {} out of range", self.status),
        })?;

        Ok(Rule {
            site: self.site,
            path: self.path,
            method: self.method,
            headers,
            delay: Duration::from_nanos(delay_nanos),
            status_code,
            body: self.body,
        })
    }
}

/// Delay column value; saturates instead of wrapping for absurd durations
pub fn delay_to_nanos(delay: Duration) -> i64 {
    i64::try_from(delay.as_nanos()).unwrap_or(i64::MAX)
}

pub fn headers_to_json(headers: &HashMap<String, String>) -> String {
    serde_json::Value::Object(
        headers
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect(),
    )
    .to_string()
}

/// Decode the headers column, which must be a JSON object of strings
pub fn headers_from_json(site: &str, json: &str) -> Result<HashMap<String, String>, StoreError> {
    let malformed = |reason: String| StoreError::Deserialize {
        site: site.to_string(),
        reason,
    };

    let value: serde_json::Value =
        serde_json::from_str(json).map_err(|e| malformed(format!("bad headers JSON: {}", e)))?;

    let object = match value {
        serde_json::Value::Object(object) => object,
        other => return Err(malformed(format!("expecting headers object, got {}", other))),
    };

    object
        .into_iter()
        .map(|(key, value)| match value {
            serde_json::Value::String(s) => Ok((key, s)),
            other => Err(malformed(format!(
                "expecting string for header <{}>, got {}",
                key, other
            ))),
        })
        .collect()
}
