//! Alt-Svc (RFC 7838) bookkeeping for HTTP/3 discovery.
//!
//! Only `h3` alternatives are remembered; draft versions (`h3-29`) are
//! ignored since quiche speaks the final protocol.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

/// RFC 7838 default freshness.
const DEFAULT_MAX_AGE: u64 = 86_400;

/// One advertised alternative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AltSvcEntry {
    pub protocol: String,
    /// `None` means the origin's own host.
    pub host: Option<String>,
    pub port: u16,
    pub max_age: u64,
}

impl AltSvcEntry {
    pub fn is_h3(&self) -> bool {
        self.protocol == "h3"
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AltSvc {
    Clear,
    Entries(Vec<AltSvcEntry>),
}

/// Parse an `alt-svc` header value. Malformed alternatives are skipped.
pub fn parse_alt_svc(header: &str) -> AltSvc {
    if header.trim().eq_ignore_ascii_case("clear") {
        return AltSvc::Clear;
    }
    let mut entries = Vec::new();
    for alternative in header.split(',') {
        let mut parts = alternative.split(';');
        let Some((protocol, authority)) = parts.next().and_then(|p| p.split_once('=')) else {
            continue;
        };
        let protocol = protocol.trim();
        if protocol.is_empty() {
            continue;
        }
        let Some((host, port)) = parse_authority(authority) else {
            continue;
        };
        let mut max_age = DEFAULT_MAX_AGE;
        for param in parts {
            if let Some((key, value)) = param.split_once('=') {
                if key.trim().eq_ignore_ascii_case("ma") {
                    if let Ok(age) = value.trim().trim_matches('"').parse() {
                        max_age = age;
                    }
                }
            }
        }
        entries.push(AltSvcEntry {
            protocol: protocol.to_string(),
            host,
            port,
            max_age,
        });
    }
    AltSvc::Entries(entries)
}

/// `":443"`, `"alt.example:443"` or `"alt.example"` (port 443).
fn parse_authority(value: &str) -> Option<(Option<String>, u16)> {
    let value = value.trim().trim_matches('"').trim();
    match value.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.trim().parse::<u16>().ok()?;
            let host = host.trim();
            Some(((!host.is_empty()).then(|| host.to_string()), port))
        }
        None if !value.is_empty() => Some((Some(value.to_string()), 443)),
        None => None,
    }
}

struct Advertised {
    entry: AltSvcEntry,
    expires_at: Instant,
}

/// HTTP/3 endpoints learned per origin (`https://host:port`).
#[derive(Default)]
pub struct AltSvcCache {
    origins: RwLock<HashMap<String, Advertised>>,
}

impl AltSvcCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record what an `alt-svc` header says about `origin`.
    pub fn observe(&self, origin: &str, header: &str) {
        let mut origins = self.origins.write().unwrap_or_else(PoisonError::into_inner);
        match parse_alt_svc(header) {
            AltSvc::Clear => {
                origins.remove(origin);
            }
            AltSvc::Entries(entries) => {
                let Some(entry) = entries.into_iter().find(AltSvcEntry::is_h3) else {
                    return;
                };
                if entry.max_age == 0 {
                    origins.remove(origin);
                    return;
                }
                tracing::debug!(origin, port = entry.port, max_age = entry.max_age, "h3 alternative recorded");
                let expires_at = Instant::now() + Duration::from_secs(entry.max_age);
                origins.insert(origin.to_string(), Advertised { entry, expires_at });
            }
        }
    }

    /// Fresh HTTP/3 alternative for `origin`, if any.
    pub fn h3_alternative(&self, origin: &str) -> Option<AltSvcEntry> {
        let origins = self.origins.read().unwrap_or_else(PoisonError::into_inner);
        origins
            .get(origin)
            .filter(|a| a.expires_at > Instant::now())
            .map(|a| a.entry.clone())
    }

    /// Forget `origin` (after a failed HTTP/3 attempt).
    pub fn forget(&self, origin: &str) {
        self.origins
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(origin);
    }

    pub fn evict_expired(&self) {
        let now = Instant::now();
        self.origins
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, a| a.expires_at > now);
    }
}

impl std::fmt::Debug for AltSvcCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = self.origins.read().map(|o| o.len()).unwrap_or_default();
        f.debug_struct("AltSvcCache").field("origins", &len).finish()
    }
}
