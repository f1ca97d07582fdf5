//! Plain-text pages shown to people driving the service with curl

use crate::classify::Mode;
use crate::rule::{Rule, ADMIN_SUBDOMAIN_PREFIX, CREATE_SITE};
use std::time::Duration;

/// Bodies longer than this are shortened in help texts
pub const MAX_SHOWN_BODY_CHARS: usize = 80;

const ELLIPSIS: &str = "...";

/// Everything a page may mention
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateData {
    pub site: String,
    /// e.g. `k3j2x9.localhost:5103`
    pub domain: String,
    pub admin_domain: String,
    pub create_domain: String,
    pub admin_path_prefix: String,
    pub path: String,
    pub method: String,
    pub delay: Duration,
    pub truncated_body: String,
}

impl TemplateData {
    pub fn for_site(mode: &Mode, deployment_address: &str, site: &str, path: &str) -> Self {
        Self {
            site: site.to_string(),
            domain: full_domain(mode, deployment_address, site),
            admin_domain: admin_domain(mode, deployment_address, site),
            create_domain: create_domain(mode, deployment_address),
            admin_path_prefix: mode.admin_path_prefix().to_string(),
            path: path.to_string(),
            ..Self::default()
        }
    }

    pub fn for_rule(mode: &Mode, deployment_address: &str, rule: &Rule) -> Self {
        Self {
            method: rule.method.clone(),
            delay: rule.delay,
            truncated_body: truncate(&String::from_utf8_lossy(&rule.body), MAX_SHOWN_BODY_CHARS),
            ..Self::for_site(mode, deployment_address, &rule.site, &rule.path)
        }
    }
}

/// Address serving `site`; in single-site mode that is the deployment address itself
pub fn full_domain(mode: &Mode, deployment_address: &str, site: &str) -> String {
    if mode.is_single_site() {
        deployment_address.to_string()
    } else {
        format!("{}.{}", site, deployment_address)
    }
}

fn admin_domain(mode: &Mode, deployment_address: &str, site: &str) -> String {
    if mode.is_single_site() {
        deployment_address.to_string()
    } else {
        format!("{}{}.{}", ADMIN_SUBDOMAIN_PREFIX, site, deployment_address)
    }
}

fn create_domain(mode: &Mode, deployment_address: &str) -> String {
    full_domain(mode, deployment_address, CREATE_SITE)
}

/// Shorten to `max_chars` characters, ending with `...` when shortened
pub fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let keep = max_chars.saturating_sub(ELLIPSIS.len());
    let mut shortened: String = s.chars().take(keep).collect();
    shortened.push_str(ELLIPSIS);
    shortened
}

/// `2.5s`, `1s`, `0.001s`
pub fn format_delay(delay: Duration) -> String {
    format!("{}s", delay.as_secs_f64())
}

pub fn banner() -> String {
    "===================== delaygate ====================\n".to_string()
}

pub fn rule_added(data: &TemplateData) -> String {
    let method = if data.method.is_empty() {
        "any HTTP method".to_string()
    } else {
        data.method.clone()
    };
    let delay = if data.delay.is_zero() {
        "without any delay".to_string()
    } else {
        format!("with {} delay", format_delay(data.delay))
    };
    let body = if data.truncated_body.is_empty() {
        "<EMPTY>"
    } else {
        data.truncated_body.as_str()
    };

    format!(
        "Hooray!\nEndpoint http://{}{} responds to {} {}.\nResponse is: {}\n",
        data.domain, data.path, method, delay, body
    )
}

pub fn site_created(data: &TemplateData) -> String {
    format!(
        "Your personal delaygate domain is {}\nYou can configure it with POST requests to {}\n",
        data.domain, data.admin_domain
    )
}

pub fn add_rule_example(data: &TemplateData) -> String {
    format!(
        "Example:\n\
         Let's say you want to add an endpoint {path}\n\
         and you want it to respond to GET requests with \"{body}\" and 2.5 seconds delay.\n\
         \n\
         Just make a POST request to your admin domain ...\n\
         curl -d \"{body}\" \"{admin}{prefix}{path}?delay=2.5&method=GET\"\n\
         \n\
         ... and you're done!\n",
        path = data.path,
        body = data.truncated_body,
        admin = data.admin_domain,
        prefix = data.admin_path_prefix,
    )
}

pub fn unknown_endpoint(data: &TemplateData) -> String {
    format!(
        "Oopsie daisy! Endpoint http://{}{} isn't configured yet.\n",
        data.domain, data.path
    )
}

pub fn create_site_help(data: &TemplateData) -> String {
    format!(
        "Oopsie daisy!\nMake a POST request to http://{} to create new endpoints.\n",
        data.create_domain
    )
}

pub fn builtin_misconfigured() -> String {
    "Oopsie daisy! Server is probably misconfigured. It's not your fault.\n".to_string()
}

pub fn unknown_site(data: &TemplateData) -> String {
    format!("Oopsie daisy! Site {} doesn't exist.\n", data.site)
}

/// Response to a successful create-site request without `output=short`
pub fn create_site_page(data: &TemplateData) -> String {
    let mut page = banner();
    page.push_str(&rule_added(data));
    page.push('\n');
    page.push_str(&site_created(data));
    page.push('\n');
    page.push_str(&add_rule_example(data));
    page
}

pub fn rule_added_page(data: &TemplateData) -> String {
    banner() + &rule_added(data)
}

/// Which 404 text a content request that found no rule gets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundPage {
    UnknownEndpoint,
    CreateSiteHelp,
    BuiltinMisconfigured,
    UnknownSite,
}

impl NotFoundPage {
    pub fn render(self, data: &TemplateData) -> String {
        let text = match self {
            NotFoundPage::UnknownEndpoint => unknown_endpoint(data),
            NotFoundPage::CreateSiteHelp => create_site_help(data),
            NotFoundPage::BuiltinMisconfigured => builtin_misconfigured(),
            NotFoundPage::UnknownSite => unknown_site(data),
        };
        banner() + &text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn multi_data() -> TemplateData {
        let rule = Rule::new("abc")
            .with_path("/test")
            .with_method("GET")
            .with_delay(Duration::from_millis(2500))
            .with_body("hop");
        TemplateData::for_rule(&Mode::MultiTenant, "localhost:5103", &rule)
    }

    #[test]
    fn test_add_rule_example_text() {
        let expected = [
            "Example:",
            "Let's say you want to add an endpoint /test",
            "and you want it to respond to GET requests with \"hop\" and 2.5 seconds delay.",
            "",
            "Just make a POST request to your admin domain ...",
            "curl -d \"hop\" \"admin-abc.localhost:5103/test?delay=2.5&method=GET\"",
            "",
            "... and you're done!",
            "",
        ]
        .join("\n");
        assert_eq!(add_rule_example(&multi_data()), expected);
    }

    #[test]
    fn test_template_data_multi_tenant() {
        let data = multi_data();
        assert_eq!(data.domain, "abc.localhost:5103");
        assert_eq!(data.admin_domain, "admin-abc.localhost:5103");
        assert_eq!(data.create_domain, "create.localhost:5103");
        assert_eq!(data.admin_path_prefix, "");
        assert_eq!(data.truncated_body, "hop");
    }

    #[test]
    fn test_template_data_single_site() {
        let mode = Mode::from_admin_path_prefix("/admin");
        let data = TemplateData::for_site(&mode, "example.com", "", "/x");
        assert_eq!(data.domain, "example.com");
        assert_eq!(data.admin_domain, "example.com");
        assert_eq!(data.create_domain, "example.com");
        assert_eq!(data.admin_path_prefix, "/admin");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 80), "short");

        let long = "x".repeat(100);
        let shortened = truncate(&long, 80);
        assert_eq!(shortened.chars().count(), 80);
        assert!(shortened.ends_with("..."));

        let exact = "y".repeat(80);
        assert_eq!(truncate(&exact, 80), exact);
    }

    #[test]
    fn test_truncate_multibyte() {
        let long = "é".repeat(100);
        let shortened = truncate(&long, 10);
        assert_eq!(shortened, format!("{}...", "é".repeat(7)));
    }

    #[test]
    fn test_format_delay() {
        assert_eq!(format_delay(Duration::from_millis(2500)), "2.5s");
        assert_eq!(format_delay(Duration::from_secs(1)), "1s");
        assert_eq!(format_delay(Duration::from_millis(1)), "0.001s");
    }

    #[test]
    fn test_rule_added_text() {
        let text = rule_added(&multi_data());
        assert_eq!(
            text,
            "Hooray!\nEndpoint http://abc.localhost:5103/test responds to GET with 2.5s delay.\n\
             Response is: hop\n"
        );

        let wildcard = TemplateData {
            domain: "abc.localhost".to_string(),
            path: "/".to_string(),
            ..TemplateData::default()
        };
        assert_eq!(
            rule_added(&wildcard),
            "Hooray!\nEndpoint http://abc.localhost/ responds to any HTTP method \
             without any delay.\nResponse is: <EMPTY>\n"
        );
    }

    #[test]
    fn test_not_found_pages() {
        let data = TemplateData::for_site(&Mode::MultiTenant, "localhost", "create", "/x");

        let help = NotFoundPage::CreateSiteHelp.render(&data);
        assert!(help.starts_with(&banner()));
        assert!(help.contains("http://create.localhost to create new endpoints"));

        let unknown = NotFoundPage::UnknownSite.render(&data);
        assert!(unknown.contains("Site create doesn't exist."));

        let endpoint = NotFoundPage::UnknownEndpoint.render(&data);
        assert!(endpoint.contains("Endpoint http://create.localhost/x isn't configured yet."));
    }

    #[test]
    fn test_create_site_page_mentions_domains() {
        let page = create_site_page(&multi_data());
        assert!(page.contains("Your personal delaygate domain is abc.localhost:5103"));
        assert!(page.contains("POST requests to admin-abc.localhost:5103"));
        assert!(
            page.contains("curl -d \"hop\" \"admin-abc.localhost:5103/test?delay=2.5&method=GET\"")
        );
    }
}
