//! WebExtension-style URL match patterns
//!
//! `<all_urls>`, or `scheme://host/path` where the scheme may be `*`
//! (http or https), the host may be `*` or start with `*.` (the host and its
//! subdomains), and the path may contain `*` wildcards. The path part is
//! matched against the URL's path plus query.

#![allow(clippy::uninlined_format_args)]

use std::fmt;

use regex::Regex;
use url::Url;

use super::route_dispatcher::RouteError;

const ALL_URLS: &str = "<all_urls>";
const WEB_SCHEMES: [&str; 2] = ["http", "https"];

#[derive(Debug, Clone)]
enum SchemeRule {
    AnyWeb,
    Exact(String),
}

#[derive(Debug, Clone)]
enum HostRule {
    Any,
    Exact(String),
    /// The domain itself and every subdomain
    Suffix(String),
}

/// A compiled match pattern
#[derive(Debug, Clone)]
pub struct MatchPattern {
    source: String,
    scheme: SchemeRule,
    host: HostRule,
    path: Regex,
}

impl MatchPattern {
    pub fn parse(pattern: &str) -> Result<Self, RouteError> {
        let invalid = |reason: &str| RouteError::invalid_pattern(pattern, reason);

        if pattern == ALL_URLS {
            return Ok(Self {
                source: pattern.to_string(),
                scheme: SchemeRule::AnyWeb,
                host: HostRule::Any,
                path: glob_regex("/*").map_err(|e| invalid(&e.to_string()))?,
            });
        }

        let (scheme, rest) = pattern
            .split_once("://")
            .ok_or_else(|| invalid("missing '://'"))?;
        let scheme = match scheme {
            "*" => SchemeRule::AnyWeb,
            "" => return Err(invalid("empty scheme")),
            s if s.chars().all(|c| c.is_ascii_alphanumeric() || "+-.".contains(c)) => {
                SchemeRule::Exact(s.to_ascii_lowercase())
            }
            _ => return Err(invalid("invalid scheme")),
        };

        let (host, path) = match rest.find('/') {
            Some(slash) => rest.split_at(slash),
            None => return Err(invalid("missing path")),
        };
        let host = match host {
            "*" => HostRule::Any,
            "" if matches!(&scheme, SchemeRule::Exact(s) if s == "file") => HostRule::Any,
            "" => return Err(invalid("empty host")),
            h if h.starts_with("*.") => HostRule::Suffix(h[2..].to_ascii_lowercase()),
            h if h.contains('*') => return Err(invalid("'*' in host must be alone or lead '*.'")),
            h => HostRule::Exact(h.to_ascii_lowercase()),
        };

        Ok(Self {
            source: pattern.to_string(),
            scheme,
            host,
            path: glob_regex(path).map_err(|e| invalid(&e.to_string()))?,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, url: &Url) -> bool {
        let scheme_ok = match &self.scheme {
            SchemeRule::AnyWeb => WEB_SCHEMES.contains(&url.scheme()),
            SchemeRule::Exact(s) => url.scheme() == s,
        };
        if !scheme_ok {
            return false;
        }

        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
        let host_ok = match &self.host {
            HostRule::Any => true,
            HostRule::Exact(h) => host == *h,
            HostRule::Suffix(domain) => {
                host == *domain || host.strip_suffix(domain.as_str()).is_some_and(|sub| sub.ends_with('.'))
            }
        };
        if !host_ok {
            return false;
        }

        let target = match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        };
        self.path.is_match(&target)
    }

    /// Parse `url` and match it
    pub fn matches_str(&self, url: &str) -> bool {
        Url::parse(url).is_ok_and(|u| self.matches(&u))
    }
}

impl fmt::Display for MatchPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

fn glob_regex(glob: &str) -> Result<Regex, regex::Error> {
    let body = glob
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{}$", body))
}
