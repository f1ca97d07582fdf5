//! Request classification and rule resolution
//!
//! The Host header selects the site in multi-tenant mode: `abc.example.com`
//! serves site `abc`, a POST to `admin-abc.example.com` configures it and a POST
//! to `create.example.com` creates a new site. In single-site mode every request
//! belongs to the empty site and POSTs under the admin path prefix configure it.

use crate::rule::{
    find_matching, is_builtin, Rule, ADMIN_SUBDOMAIN_PREFIX, CREATE_SITE, EMPTY_SITE,
};
use crate::store::{RuleStore, StoreError};
use hyper::Method;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    MultiTenant,
    SingleSite { admin_path_prefix: String },
}

impl Mode {
    /// A non-empty admin path prefix selects single-site mode
    pub fn from_admin_path_prefix(prefix: &str) -> Self {
        if prefix.is_empty() {
            Mode::MultiTenant
        } else {
            Mode::SingleSite {
                admin_path_prefix: prefix.to_string(),
            }
        }
    }

    pub fn is_single_site(&self) -> bool {
        matches!(self, Mode::SingleSite { .. })
    }

    pub fn admin_path_prefix(&self) -> &str {
        match self {
            Mode::MultiTenant => "",
            Mode::SingleSite { admin_path_prefix } => admin_path_prefix,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestCategory {
    /// CORS preflight; answered without touching the store
    Preflight,
    CreateSite,
    AdminConfig { site: String },
    ContentServe { site: String },
}

/// First DNS label of the Host header (port included when there is no dot)
pub fn subdomain(host: &str) -> &str {
    host.split('.').next().unwrap_or(host)
}

/// Is `path` addressed to the admin prefix?
///
/// `/admin`, `/admin/` and `/admin/x` are, `/administrator` is not. A prefix
/// ending in `/` matches anything below it.
pub fn is_admin_path(path: &str, admin_path_prefix: &str) -> bool {
    let Some(rest) = path.strip_prefix(admin_path_prefix) else {
        return false;
    };
    admin_path_prefix.ends_with('/')
        || rest.is_empty()
        || rest.starts_with('/')
        || rest.starts_with('?')
}

pub struct Classifier {
    mode: Mode,
}

impl Classifier {
    pub fn new(mode: Mode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    pub fn classify(&self, method: &Method, host: &str, path: &str) -> RequestCategory {
        if *method == Method::OPTIONS {
            return RequestCategory::Preflight;
        }

        let is_post = *method == Method::POST;
        match &self.mode {
            Mode::MultiTenant => {
                let label = subdomain(host);
                if is_post && label == CREATE_SITE {
                    return RequestCategory::CreateSite;
                }
                if is_post {
                    if let Some(site) = label.strip_prefix(ADMIN_SUBDOMAIN_PREFIX) {
                        return RequestCategory::AdminConfig {
                            site: site.to_string(),
                        };
                    }
                }
                RequestCategory::ContentServe {
                    site: label.to_string(),
                }
            }
            Mode::SingleSite { admin_path_prefix } => {
                if is_post && is_admin_path(path, admin_path_prefix) {
                    RequestCategory::AdminConfig {
                        site: EMPTY_SITE.to_string(),
                    }
                } else {
                    RequestCategory::ContentServe {
                        site: EMPTY_SITE.to_string(),
                    }
                }
            }
        }
    }

    /// Path a create or admin request registers its rule under
    pub fn rule_path(&self, path: &str) -> String {
        match &self.mode {
            Mode::MultiTenant => path.to_string(),
            Mode::SingleSite { admin_path_prefix } => {
                let rest = path.strip_prefix(admin_path_prefix.as_str()).unwrap_or(path);
                if rest.starts_with('/') {
                    rest.to_string()
                } else {
                    format!("/{}", rest)
                }
            }
        }
    }
}

/// Outcome of looking up the rule for a content request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Matched(Rule),
    /// No rule matched and the site was never created
    UnknownSite { builtin: bool },
    /// The site exists but none of its rules answers this path and method
    Unmatched { builtin: bool },
}

/// Pick the most specific rule of `site` answering `path` and `method`
pub async fn resolve(
    store: &dyn RuleStore,
    site: &str,
    path: &str,
    method: &str,
) -> Result<Resolution, StoreError> {
    let rules = store.get_rules(site).await?;
    if let Some(rule) = find_matching(&rules, path, method) {
        return Ok(Resolution::Matched(rule.clone()));
    }

    if rules.is_empty() && !store.site_exists(site).await? {
        return Ok(Resolution::UnknownSite {
            builtin: is_builtin(site),
        });
    }

    Ok(Resolution::Unmatched {
        builtin: is_builtin(site),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn multi() -> Classifier {
        Classifier::new(Mode::MultiTenant)
    }

    fn single(prefix: &str) -> Classifier {
        Classifier::new(Mode::from_admin_path_prefix(prefix))
    }

    #[test]
    fn test_mode_selection() {
        assert_eq!(Mode::from_admin_path_prefix(""), Mode::MultiTenant);
        assert!(Mode::from_admin_path_prefix("/admin").is_single_site());
        assert_eq!(Mode::from_admin_path_prefix("/admin").admin_path_prefix(), "/admin");
    }

    #[test]
    fn test_subdomain() {
        assert_eq!(subdomain("abc.localhost:5103"), "abc");
        assert_eq!(subdomain("localhost:5103"), "localhost:5103");
        assert_eq!(subdomain(""), "");
    }

    #[test]
    fn test_options_is_preflight_everywhere() {
        assert_eq!(
            multi().classify(&Method::OPTIONS, "create.localhost", "/"),
            RequestCategory::Preflight
        );
        assert_eq!(
            single("/admin").classify(&Method::OPTIONS, "localhost", "/admin"),
            RequestCategory::Preflight
        );
    }

    #[test]
    fn test_multi_tenant_classification() {
        let c = multi();
        assert_eq!(
            c.classify(&Method::POST, "create.localhost", "/test"),
            RequestCategory::CreateSite
        );
        assert_eq!(
            c.classify(&Method::GET, "create.localhost", "/test"),
            RequestCategory::ContentServe {
                site: "create".to_string()
            }
        );
        assert_eq!(
            c.classify(&Method::POST, "admin-abc.localhost", "/test"),
            RequestCategory::AdminConfig {
                site: "abc".to_string()
            }
        );
        assert_eq!(
            c.classify(&Method::GET, "admin-abc.localhost", "/test"),
            RequestCategory::ContentServe {
                site: "admin-abc".to_string()
            }
        );
        assert_eq!(
            c.classify(&Method::POST, "abc.localhost", "/test"),
            RequestCategory::ContentServe {
                site: "abc".to_string()
            }
        );
    }

    #[test]
    fn test_single_site_classification() {
        let c = single("/admin");
        let admin = RequestCategory::AdminConfig {
            site: String::new(),
        };
        let content = RequestCategory::ContentServe {
            site: String::new(),
        };

        assert_eq!(c.classify(&Method::POST, "create.localhost", "/"), content);
        assert_eq!(c.classify(&Method::POST, "x", "/admin"), admin);
        assert_eq!(c.classify(&Method::POST, "x", "/admin/test"), admin);
        assert_eq!(c.classify(&Method::POST, "x", "/administrator"), content);
        assert_eq!(c.classify(&Method::GET, "x", "/admin/test"), content);
    }

    #[test]
    fn test_admin_path_with_trailing_slash_prefix() {
        assert!(is_admin_path("/admin/", "/admin/"));
        assert!(is_admin_path("/admin/test", "/admin/"));
        assert!(!is_admin_path("/admin", "/admin/"));
        assert!(is_admin_path("/admin", "/admin"));
        assert!(!is_admin_path("/adminx", "/admin"));
    }

    #[test]
    fn test_rule_path() {
        assert_eq!(multi().rule_path("/test"), "/test");

        let c = single("/admin");
        assert_eq!(c.rule_path("/admin/test"), "/test");
        assert_eq!(c.rule_path("/admin"), "/");

        let c = single("/admin/");
        assert_eq!(c.rule_path("/admin/test"), "/test");
    }

    #[tokio::test]
    async fn test_resolve_outcomes() {
        let store = MemoryStore::new();
        store.create_site("abc").await.unwrap();
        store.create_site("404").await.unwrap();
        store
            .upsert_rule(&Rule::new("abc").with_path("/test").with_method("GET").with_body("hop"))
            .await
            .unwrap();
        store
            .upsert_rule(&Rule::new("404").with_path("/only"))
            .await
            .unwrap();

        match resolve(&store, "abc", "/test", "GET").await.unwrap() {
            Resolution::Matched(rule) => assert_eq!(rule.body, b"hop"),
            other => panic!("unexpected resolution: {:?}", other),
        }
        assert_eq!(
            resolve(&store, "abc", "/test", "POST").await.unwrap(),
            Resolution::Unmatched { builtin: false }
        );
        assert_eq!(
            resolve(&store, "404", "/other", "GET").await.unwrap(),
            Resolution::Unmatched { builtin: true }
        );
        assert_eq!(
            resolve(&store, "nope", "/", "GET").await.unwrap(),
            Resolution::UnknownSite { builtin: false }
        );
        assert_eq!(
            resolve(&store, "42", "/", "GET").await.unwrap(),
            Resolution::UnknownSite { builtin: true }
        );
    }

    #[tokio::test]
    async fn test_resolve_empty_existing_site_is_unmatched() {
        let store = MemoryStore::new();
        store.create_site("").await.unwrap();
        assert_eq!(
            resolve(&store, "", "/", "GET").await.unwrap(),
            Resolution::Unmatched { builtin: false }
        );
    }
}
