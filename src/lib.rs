//! Delaygate - An HTTP endpoint simulator for testing slow and failing backends
//!
//! This library provides a server where callers:
//! - Create a uniquely named site with a single POST to the `create` subdomain
//! - Register response rules per path and method (status, body, headers, delay)
//! - Get answered by the most specific matching rule on every other request
//! - Reach builtin sites like `3.example.com` (3 second delay) or `503.example.com`
//! - Keep rules in memory, SQLite or PostgreSQL

pub mod classify;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod params;
pub mod render;
pub mod rule;
pub mod server;
pub mod sitename;
pub mod store;
