//! RFC 6265 cookie storage.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

/// Cookie as exchanged with callers (`requestCookies`, session cookie calls).
///
/// `expires` is unix seconds; `0` or absent means a session cookie.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CookieEntry {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub expires: i64,
    pub max_age: i64,
    pub secure: bool,
    pub http_only: bool,
}

impl CookieEntry {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            ..Default::default()
        }
    }
}

/// Stored cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    /// Lowercase, without a leading dot.
    pub domain: String,
    /// Set when no `Domain` attribute was given: only the exact host matches.
    pub host_only: bool,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: Option<String>,
    /// `None` for session cookies. `Max-Age` wins over `Expires`.
    pub expires: Option<DateTime<Utc>>,
    pub max_age: Option<i64>,
}

impl Cookie {
    /// Parse a `Set-Cookie` value received for `url`. Returns `None` for
    /// values the jar must ignore (RFC 6265 5.2, 5.3).
    pub fn parse(header: &str, url: &Url) -> Option<Self> {
        let host = url.host_str()?.to_ascii_lowercase();
        let mut parts = header.split(';');
        let (name, value) = parts.next()?.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }

        let mut cookie = Cookie {
            name: name.to_string(),
            value: value.trim().trim_matches('"').to_string(),
            domain: host.clone(),
            host_only: true,
            path: default_path(url),
            secure: false,
            http_only: false,
            same_site: None,
            expires: None,
            max_age: None,
        };

        let mut expires = None;
        for attr in parts {
            let (key, val) = match attr.split_once('=') {
                Some((k, v)) => (k.trim(), v.trim()),
                None => (attr.trim(), ""),
            };
            match key.to_ascii_lowercase().as_str() {
                "secure" => cookie.secure = true,
                "httponly" => cookie.http_only = true,
                "samesite" => cookie.same_site = Some(val.to_string()),
                "domain" if !val.is_empty() => {
                    let domain = val.trim_start_matches('.').to_ascii_lowercase();
                    if !domain_matches(&host, &domain) {
                        return None;
                    }
                    cookie.domain = domain;
                    cookie.host_only = false;
                }
                "path" if val.starts_with('/') => cookie.path = val.to_string(),
                "expires" => expires = parse_cookie_date(val),
                "max-age" => cookie.max_age = val.parse().ok(),
                _ => {}
            }
        }
        cookie.expires = match cookie.max_age {
            Some(secs) if secs <= 0 => Some(DateTime::<Utc>::MIN_UTC),
            Some(secs) => Some(expiry_after(secs)),
            None => expires,
        };
        Some(cookie)
    }

    /// Build a cookie from a caller-supplied entry. Missing domain defaults
    /// to the URL host (host-only), missing path to `/`.
    pub fn from_entry(entry: &CookieEntry, url: &Url) -> Result<Self> {
        if entry.name.is_empty() {
            return Err(Error::validation("cookie name must not be empty"));
        }
        let host = url
            .host_str()
            .ok_or_else(|| Error::validation(format!("URL has no host: {}", url)))?
            .to_ascii_lowercase();
        let (domain, host_only) = if entry.domain.is_empty() {
            (host, true)
        } else {
            (entry.domain.trim_start_matches('.').to_ascii_lowercase(), false)
        };
        let expires = if entry.max_age < 0 {
            Some(DateTime::<Utc>::MIN_UTC)
        } else if entry.max_age > 0 {
            Some(expiry_after(entry.max_age))
        } else if entry.expires > 0 {
            Utc.timestamp_opt(entry.expires, 0).single()
        } else {
            None
        };
        Ok(Cookie {
            name: entry.name.clone(),
            value: entry.value.clone(),
            domain,
            host_only,
            path: if entry.path.is_empty() {
                "/".to_string()
            } else {
                entry.path.clone()
            },
            secure: entry.secure,
            http_only: entry.http_only,
            same_site: None,
            expires,
            max_age: (entry.max_age != 0).then_some(entry.max_age),
        })
    }

    pub fn to_entry(&self) -> CookieEntry {
        CookieEntry {
            name: self.name.clone(),
            value: self.value.clone(),
            domain: self.domain.clone(),
            path: self.path.clone(),
            expires: self.expires.map(|e| e.timestamp().max(0)).unwrap_or(0),
            max_age: self.max_age.unwrap_or(0),
            secure: self.secure,
            http_only: self.http_only,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires.is_some_and(|e| e <= now)
    }

    /// RFC 6265 5.4 selection.
    pub fn matches(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        if self.secure && url.scheme() != "https" {
            return false;
        }
        let domain_ok = if self.host_only {
            host == self.domain
        } else {
            domain_matches(&host, &self.domain)
        };
        domain_ok && path_matches(url.path(), &self.path)
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

/// Cookie jar keyed by (domain, path, name).
#[derive(Debug, Default, Clone)]
pub struct CookieJar {
    cookies: HashMap<(String, String, String), Cookie>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace; an already-expired cookie deletes its match.
    pub fn store(&mut self, cookie: Cookie) {
        let key = (cookie.domain.clone(), cookie.path.clone(), cookie.name.clone());
        if cookie.is_expired(Utc::now()) {
            self.cookies.remove(&key);
        } else {
            self.cookies.insert(key, cookie);
        }
    }

    /// Apply every `Set-Cookie` value of one response. Returns the
    /// name/value pairs the response carried.
    pub fn store_response<'a, I>(&mut self, url: &Url, set_cookies: I) -> Vec<(String, String)>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut observed = Vec::new();
        for header in set_cookies {
            if let Some(cookie) = Cookie::parse(header, url) {
                observed.push((cookie.name.clone(), cookie.value.clone()));
                self.store(cookie);
            } else {
                tracing::trace!(url = %url, "ignored set-cookie");
            }
        }
        observed
    }

    /// Cookies to send to `url`, longest path first (RFC 6265 5.4).
    pub fn cookies_for_url(&self, url: &Url) -> Vec<&Cookie> {
        let now = Utc::now();
        let mut matched: Vec<&Cookie> = self
            .cookies
            .values()
            .filter(|c| !c.is_expired(now) && c.matches(url))
            .collect();
        matched.sort_by(|a, b| b.path.len().cmp(&a.path.len()).then(a.name.cmp(&b.name)));
        matched
    }

    /// `Cookie` header value for `url`.
    pub fn header_for_url(&self, url: &Url) -> Option<String> {
        let cookies = self.cookies_for_url(url);
        if cookies.is_empty() {
            return None;
        }
        Some(
            cookies
                .iter()
                .map(|c| c.to_string())
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    pub fn remove_expired(&mut self) {
        let now = Utc::now();
        self.cookies.retain(|_, c| !c.is_expired(now));
    }

    pub fn clear(&mut self) {
        self.cookies.clear();
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }
}

/// RFC 6265 5.1.3.
fn domain_matches(host: &str, domain: &str) -> bool {
    if host == domain {
        return true;
    }
    host.strip_suffix(domain)
        .is_some_and(|prefix| prefix.ends_with('.'))
        && host.parse::<std::net::IpAddr>().is_err()
}

/// RFC 6265 5.1.4.
fn path_matches(request_path: &str, cookie_path: &str) -> bool {
    let request_path = if request_path.is_empty() { "/" } else { request_path };
    if request_path == cookie_path {
        return true;
    }
    request_path.starts_with(cookie_path)
        && (cookie_path.ends_with('/') || request_path[cookie_path.len()..].starts_with('/'))
}

/// RFC 6265 5.1.4 default-path.
fn default_path(url: &Url) -> String {
    let path = url.path();
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(i) => path[..i].to_string(),
    }
}

/// `now + secs`, saturating at the latest representable time.
fn expiry_after(secs: i64) -> DateTime<Utc> {
    chrono::Duration::try_seconds(secs)
        .and_then(|d| Utc::now().checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn parse_cookie_date(value: &str) -> Option<DateTime<Utc>> {
    for fmt in [
        "%a, %d %b %Y %H:%M:%S GMT",
        "%A, %d-%b-%y %H:%M:%S GMT",
        "%a, %d-%b-%Y %H:%M:%S GMT",
        "%a %b %e %H:%M:%S %Y",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(dt.and_utc());
        }
    }
    None
}
