//! Sites and response rules
//!
//! A rule describes how one `(site, path, method)` key responds: which headers,
//! which status code, which body and how long to wait before answering. An empty
//! path or method is a wildcard.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::Duration;

/// Body returned by builtin sites and by rules created without a body
pub const DEFAULT_BODY: &[u8] = br#"{"delaygate": "response"}"#;

pub const DEFAULT_STATUS_CODE: u16 = 200;

/// Largest delay a rule may carry, in seconds
pub const MAX_DELAY_SECS: u64 = 199;

pub const MIN_DELAY_SITE: u16 = 0;
pub const MAX_DELAY_SITE: u16 = 199;
pub const MIN_STATUS_SITE: u16 = 200;
pub const MAX_STATUS_SITE: u16 = 599;

/// Site whose rule answers immediately; redirect sites point here
pub const ZERO_DELAY_SITE: &str = "0";

/// The implicit site served in single-site mode
pub const EMPTY_SITE: &str = "";

/// Subdomain that creates a new site when POSTed to
pub const CREATE_SITE: &str = "create";

/// Subdomain prefix addressing a site's configuration
pub const ADMIN_SUBDOMAIN_PREFIX: &str = "admin-";

/// Wildcard path or method
pub const ANY: &str = "";

/// Status codes whose builtin sites carry a `Location` header
pub const REDIRECT_STATUSES: [u16; 5] = [301, 302, 303, 307, 308];

pub fn max_delay() -> Duration {
    Duration::from_secs(MAX_DELAY_SECS)
}

/// A canned response and the requests it answers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub site: String,
    /// Exact request path, or [`ANY`]
    pub path: String,
    /// Exact request method, or [`ANY`]
    pub method: String,
    pub headers: HashMap<String, String>,
    pub delay: Duration,
    pub status_code: u16,
    pub body: Vec<u8>,
}

impl Rule {
    /// Create a rule answering every path and method of `site` with the defaults
    pub fn new(site: impl Into<String>) -> Self {
        Self {
            site: site.into(),
            path: ANY.to_string(),
            method: ANY.to_string(),
            headers: HashMap::new(),
            delay: Duration::ZERO,
            status_code: DEFAULT_STATUS_CODE,
            body: DEFAULT_BODY.to_vec(),
        }
    }

    /// Set the path pattern (builder pattern)
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Set the method pattern (builder pattern)
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = status_code;
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Does this rule answer a request with the given path and method?
    pub fn matches(&self, path: &str, method: &str) -> bool {
        pattern_matches(&self.path, path) && pattern_matches(&self.method, method)
    }

    /// Key under which the rule is stored; a later rule with the same key replaces it
    pub fn key(&self) -> (&str, &str, &str) {
        (&self.site, &self.path, &self.method)
    }
}

/// Patterns are literal strings; only the empty pattern is special.
fn pattern_matches(pattern: &str, value: &str) -> bool {
    pattern == ANY || pattern == value
}

/// Most specific rule first: longer paths, then longer methods.
///
/// Lengths are counted in characters so the order agrees with SQL `LENGTH()`.
/// Remaining ties fall back to the path and method text so the order is total.
/// Two rules tied on both lengths can never match the same request.
pub fn specificity_cmp(a: &Rule, b: &Rule) -> Ordering {
    char_len(&b.path)
        .cmp(&char_len(&a.path))
        .then_with(|| char_len(&b.method).cmp(&char_len(&a.method)))
        .then_with(|| a.path.cmp(&b.path))
        .then_with(|| a.method.cmp(&b.method))
}

pub fn sort_by_specificity(rules: &mut [Rule]) {
    rules.sort_by(specificity_cmp);
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// First rule, in specificity order, that answers the request
pub fn find_matching<'a>(rules: &'a [Rule], path: &str, method: &str) -> Option<&'a Rule> {
    rules.iter().find(|rule| rule.matches(path, method))
}

pub fn is_create_site(site: &str) -> bool {
    site == CREATE_SITE
}

/// Any integer-looking site up to the last status code is reserved, so `007`
/// and `-1` are protected alongside the canonical `7`.
pub fn is_numeric_builtin(site: &str) -> bool {
    site.parse::<i64>()
        .map(|n| n <= i64::from(MAX_STATUS_SITE))
        .unwrap_or(false)
}

/// Sites that can never be reconfigured through the admin path
pub fn is_builtin(site: &str) -> bool {
    is_create_site(site) || is_numeric_builtin(site)
}
