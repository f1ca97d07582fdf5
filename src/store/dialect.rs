//! SQL dialects
//!
//! Queries are written once in PostgreSQL syntax: numbered `$N` placeholders and
//! `BYTEA` for binary columns. A dialect rewrites that text for its database.

use once_cell::sync::Lazy;
use regex::Regex;

/// Matches $1, $2, $3, ...
static NUMBERED_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\d+").expect("valid placeholder regex"));

static WIDE_BINARY_TYPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bBYTEA\b").expect("valid binary type regex"));

/// Textual rewrite strategy from the canonical query text to a database's syntax
pub trait Dialect: Send + Sync {
    fn name(&self) -> &'static str;

    fn rewrite_placeholders(&self, sql: &str) -> String;

    fn rewrite_schema_types(&self, sql: &str) -> String;

    fn dialectify(&self, sql: &str) -> String {
        self.rewrite_schema_types(&self.rewrite_placeholders(sql))
    }
}

/// The canonical syntax; nothing to rewrite
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn rewrite_placeholders(&self, sql: &str) -> String {
        sql.to_string()
    }

    fn rewrite_schema_types(&self, sql: &str) -> String {
        sql.to_string()
    }
}

/// Positional `?` placeholders and `BLOB` columns.
///
/// Placeholders become positional, so every canonical query must use its
/// parameters in ascending order.
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn rewrite_placeholders(&self, sql: &str) -> String {
        NUMBERED_PLACEHOLDER.replace_all(sql, "?").into_owned()
    }

    fn rewrite_schema_types(&self, sql: &str) -> String {
        WIDE_BINARY_TYPE.replace_all(sql, "BLOB").into_owned()
    }
}
