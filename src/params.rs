//! Rule parameters carried in the query string of create-site and admin requests

use crate::error::SiteError;
use crate::rule::{ANY, DEFAULT_STATUS_CODE, MAX_DELAY_SECS};
use std::collections::HashMap;
use std::time::Duration;

pub const METHOD_PARAM: &str = "method";
pub const DELAY_PARAM: &str = "delay";
pub const STATUS_PARAM: &str = "status";
pub const OUTPUT_PARAM: &str = "output";

/// 1xx codes are interim responses and cannot carry a rule's body
const MIN_STATUS_PARAM: u16 = 200;
const MAX_STATUS_PARAM: u16 = 999;

#[derive(Debug, Clone, PartialEq)]
pub struct RuleParams {
    /// Upper-cased, or [`ANY`]
    pub method: String,
    pub delay: Duration,
    pub status_code: u16,
    /// `output=short`: answer a create request with the bare site address
    pub short_output: bool,
}

impl Default for RuleParams {
    fn default() -> Self {
        Self {
            method: ANY.to_string(),
            delay: Duration::ZERO,
            status_code: DEFAULT_STATUS_CODE,
            short_output: false,
        }
    }
}

impl RuleParams {
    pub fn from_query(query: Option<&str>) -> Result<Self, SiteError> {
        let values = parse_query(query.unwrap_or(""));
        let mut params = Self::default();

        if let Some(method) = values.get(METHOD_PARAM) {
            params.method = method.to_uppercase();
        }
        if let Some(delay) = values.get(DELAY_PARAM) {
            params.delay = parse_delay(delay)?;
        }
        if let Some(status) = values.get(STATUS_PARAM) {
            params.status_code = parse_status(status)?;
        }
        params.short_output = values.get(OUTPUT_PARAM).map(String::as_str) == Some("short");

        Ok(params)
    }
}

/// Decode `a=1&b=2`; the first occurrence of a key wins
pub fn parse_query(query: &str) -> HashMap<String, String> {
    let mut values = HashMap::new();

    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        values
            .entry(decode_component(key))
            .or_insert_with(|| decode_component(value));
    }

    values
}

/// Form decoding: `+` is a space, invalid escapes are kept as typed
fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced,
    }
}

/// Seconds as a float, kept to millisecond precision
pub fn parse_delay(raw: &str) -> Result<Duration, SiteError> {
    let seconds: f64 = raw
        .parse()
        .map_err(|_| SiteError::InvalidDelay(raw.to_string()))?;

    if !seconds.is_finite() || seconds < 0.0 {
        return Err(SiteError::InvalidDelay(raw.to_string()));
    }
    if seconds > MAX_DELAY_SECS as f64 {
        return Err(SiteError::DelayTooBig(seconds));
    }

    Ok(Duration::from_millis((seconds * 1000.0) as u64))
}

pub fn parse_status(raw: &str) -> Result<u16, SiteError> {
    raw.parse::<u16>()
        .ok()
        .filter(|code| (MIN_STATUS_PARAM..=MAX_STATUS_PARAM).contains(code))
        .ok_or_else(|| SiteError::InvalidStatus(raw.to_string()))
}
