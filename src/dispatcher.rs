//! Per-request orchestration
//!
//! The dispatcher classifies each request, runs the matching flow (create a
//! site, configure a site, or serve content from a rule) and turns the outcome
//! into a response. It also seeds the builtin sites when it is built.

use crate::classify::{resolve, Classifier, Mode, RequestCategory, Resolution};
use crate::error::{text_error_response, ErrorKind, SiteError};
use crate::params::RuleParams;
use crate::render::{self, full_domain, NotFoundPage, TemplateData};
use crate::rule::{
    is_builtin, is_create_site, Rule, EMPTY_SITE, MAX_DELAY_SITE, MAX_STATUS_SITE,
    MIN_DELAY_SITE, MIN_STATUS_SITE, REDIRECT_STATUSES, ZERO_DELAY_SITE,
};
use crate::sitename::{SiteNameGenerator, MAX_GENERATE_ATTEMPTS};
use crate::store::{SharedStore, StoreError};
use anyhow::{Context, Result};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{
    HeaderMap, HeaderValue, ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_REQUEST_HEADERS, CONTENT_TYPE,
};
use hyper::{Method, Response, StatusCode};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Settings the dispatcher needs from the configuration
#[derive(Debug, Clone)]
pub struct DispatcherOptions {
    pub mode: Mode,
    /// Public address sites live under, e.g. `localhost:5103`
    pub deployment_address: String,
    pub name_salt: String,
    pub min_name_length: usize,
    pub seed_builtin: bool,
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        Self {
            mode: Mode::MultiTenant,
            deployment_address: "localhost:5103".to_string(),
            name_salt: String::new(),
            min_name_length: 6,
            seed_builtin: false,
        }
    }
}

/// A request as the dispatcher sees it: the body is already read
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    pub host: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

pub struct Dispatcher {
    classifier: Classifier,
    deployment_address: String,
    store: SharedStore,
    names: SiteNameGenerator,
}

impl Dispatcher {
    /// Build the dispatcher and prepare the store: builtin sites are seeded when
    /// enabled, and single-site mode gets its empty site.
    pub async fn new(options: DispatcherOptions, store: SharedStore) -> Result<Self> {
        let names = SiteNameGenerator::new(&options.name_salt, options.min_name_length)?;

        let dispatcher = Self {
            classifier: Classifier::new(options.mode),
            deployment_address: options.deployment_address,
            store,
            names,
        };

        if options.seed_builtin {
            dispatcher
                .seed_builtin_sites()
                .await
                .context("Failed to seed builtin sites")?;
        }

        if dispatcher.mode().is_single_site() {
            dispatcher
                .ensure_site(EMPTY_SITE)
                .await
                .context("Failed to create the single site")?;
        }

        Ok(dispatcher)
    }

    pub fn mode(&self) -> &Mode {
        self.classifier.mode()
    }

    pub fn deployment_address(&self) -> &str {
        &self.deployment_address
    }

    pub async fn handle(&self, req: InboundRequest) -> Response<Full<Bytes>> {
        let category = self
            .classifier
            .classify(&req.method, &req.host, &req.path);
        debug!(?category, host = %req.host, path = %req.path, "Classified request");

        let result = match &category {
            RequestCategory::Preflight => Ok(text_response(StatusCode::OK, Bytes::new())),
            RequestCategory::CreateSite => self.create_site(&req).await,
            RequestCategory::AdminConfig { site } => self.configure_site(site, &req).await,
            RequestCategory::ContentServe { site } => self.serve_content(site, &req).await,
        };

        let mut response = result.unwrap_or_else(|e| {
            if e.kind().status_code().is_server_error() {
                error!(error = %e, host = %req.host, path = %req.path, "Request failed");
            } else {
                warn!(error = %e, host = %req.host, path = %req.path, "Request rejected");
            }
            e.to_response()
        });

        allow_cross_domain(response.headers_mut(), &req.headers);
        response
    }

    async fn create_site(&self, req: &InboundRequest) -> Result<Response<Full<Bytes>>, SiteError> {
        // Bad parameters must not leave an empty site behind
        let params = RuleParams::from_query(req.query.as_deref())?;
        let site = self
            .names
            .generate_unique_site_name(self.store.as_ref(), MAX_GENERATE_ATTEMPTS)
            .await?;

        let short_output = params.short_output;
        let rule = self.rule_from_request(&site, req, params);
        self.store.upsert_rule(&rule).await?;
        info!(site = %site, path = %rule.path, method = %rule.method, "Site created");

        let body = if short_output {
            full_domain(self.mode(), &self.deployment_address, &site)
        } else {
            render::create_site_page(&self.template_data(&rule))
        };
        Ok(text_response(StatusCode::OK, body))
    }

    async fn configure_site(
        &self,
        site: &str,
        req: &InboundRequest,
    ) -> Result<Response<Full<Bytes>>, SiteError> {
        if is_builtin(site) {
            return Err(SiteError::ChangeBuiltinSite);
        }
        if !self.store.site_exists(site).await? {
            return Err(SiteError::UnknownSite(site.to_string()));
        }

        let params = RuleParams::from_query(req.query.as_deref())?;
        let rule = self.rule_from_request(site, req, params);
        self.store.upsert_rule(&rule).await.map_err(|e| match e {
            StoreError::UnknownSite(site) => SiteError::UnknownSite(site),
            other => SiteError::Storage(other),
        })?;
        info!(site = %site, path = %rule.path, method = %rule.method, "Rule added");

        Ok(text_response(
            StatusCode::OK,
            render::rule_added_page(&self.template_data(&rule)),
        ))
    }

    async fn serve_content(
        &self,
        site: &str,
        req: &InboundRequest,
    ) -> Result<Response<Full<Bytes>>, SiteError> {
        let resolution = resolve(self.store.as_ref(), site, &req.path, req.method.as_str()).await?;

        let page = match resolution {
            Resolution::Matched(rule) => return Ok(apply_rule(rule).await),
            Resolution::UnknownSite { builtin } => self.not_found_page(site, builtin, true),
            Resolution::Unmatched { builtin } => self.not_found_page(site, builtin, false),
        };

        debug!(site = %site, path = %req.path, ?page, "No rule answers request");
        let data = TemplateData::for_site(self.mode(), &self.deployment_address, site, &req.path);
        Ok(text_response(StatusCode::NOT_FOUND, page.render(&data)))
    }

    fn not_found_page(&self, site: &str, builtin: bool, site_missing: bool) -> NotFoundPage {
        if self.mode().is_single_site() {
            NotFoundPage::UnknownEndpoint
        } else if is_create_site(site) {
            NotFoundPage::CreateSiteHelp
        } else if builtin {
            NotFoundPage::BuiltinMisconfigured
        } else if site_missing {
            NotFoundPage::UnknownSite
        } else {
            NotFoundPage::UnknownEndpoint
        }
    }

    fn rule_from_request(&self, site: &str, req: &InboundRequest, params: RuleParams) -> Rule {
        Rule::new(site)
            .with_path(self.classifier.rule_path(&req.path))
            .with_method(params.method)
            .with_delay(params.delay)
            .with_status(params.status_code)
            .with_body(req.body.to_vec())
    }

    fn template_data(&self, rule: &Rule) -> TemplateData {
        TemplateData::for_rule(self.mode(), &self.deployment_address, rule)
    }

    /// One site per delay and per status code. Sites that already exist keep
    /// existing and get their rule rewritten, so a persistent store survives
    /// restarts with seeding enabled.
    async fn seed_builtin_sites(&self) -> Result<(), StoreError> {
        for seconds in MIN_DELAY_SITE..=MAX_DELAY_SITE {
            let rule = Rule::new(seconds.to_string())
                .with_delay(Duration::from_secs(u64::from(seconds)));
            self.seed_site(&rule).await?;
        }

        let redirect_target = format!(
            "//{}",
            full_domain(self.mode(), &self.deployment_address, ZERO_DELAY_SITE)
        );
        for code in MIN_STATUS_SITE..=MAX_STATUS_SITE {
            let mut rule = Rule::new(code.to_string()).with_status(code);
            if REDIRECT_STATUSES.contains(&code) {
                rule = rule.with_header("Location", redirect_target.as_str());
            }
            self.seed_site(&rule).await?;
        }

        info!(
            delay_sites = u32::from(MAX_DELAY_SITE - MIN_DELAY_SITE) + 1,
            status_sites = u32::from(MAX_STATUS_SITE - MIN_STATUS_SITE) + 1,
            "Builtin sites seeded"
        );
        Ok(())
    }

    async fn seed_site(&self, rule: &Rule) -> Result<(), StoreError> {
        self.ensure_site(&rule.site).await?;
        self.store.upsert_rule(rule).await
    }

    async fn ensure_site(&self, site: &str) -> Result<(), StoreError> {
        match self.store.create_site(site).await {
            Ok(()) | Err(StoreError::SiteExists(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Wait out the rule's delay, then answer with its status, headers and body
async fn apply_rule(rule: Rule) -> Response<Full<Bytes>> {
    if !rule.delay.is_zero() {
        tokio::time::sleep(rule.delay).await;
    }

    let status = match StatusCode::from_u16(rule.status_code) {
        Ok(status) if !status.is_informational() => status,
        _ => {
            error!(
                site = %rule.site,
                path = %rule.path,
                status = rule.status_code,
                "Stored rule has no final status"
            );
            return text_error_response(
                ErrorKind::Internal,
                format!("Internal error: status {} cannot answer a request.", rule.status_code),
            );
        }
    };

    let mut builder = Response::builder().status(status);
    for (name, value) in &rule.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }

    match builder.body(Full::new(Bytes::from(rule.body))) {
        Ok(response) => response,
        Err(e) => {
            error!(
                site = %rule.site,
                path = %rule.path,
                error = %e,
                "Stored rule cannot be served"
            );
            text_error_response(ErrorKind::Internal, format!("Internal error: {}.", e))
        }
    }
}

fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Full::new(body.into()))
        .expect("valid response with StatusCode enum and static header")
}

/// Let browsers call any site from any origin
fn allow_cross_domain(response_headers: &mut HeaderMap, request_headers: &HeaderMap) {
    response_headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response_headers.insert(
        ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("true"),
    );
    for requested in request_headers.get_all(ACCESS_CONTROL_REQUEST_HEADERS) {
        response_headers.append(ACCESS_CONTROL_ALLOW_HEADERS, requested.clone());
    }
}
