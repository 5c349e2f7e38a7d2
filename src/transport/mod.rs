//! Connection establishment and the per-protocol exchanges.
//!
//! - TCP dialing and proxy tunnels (`tcp`, `proxy`)
//! - BoringSSL handshakes shaped by a [`TlsFingerprint`](crate::fingerprint::TlsFingerprint)
//! - HTTP/1.1 and a native HTTP/2 implementation over the TLS stream
//! - HTTP/3 via quiche

pub mod connector;
pub mod h1;
pub mod h2;
pub mod h3;
pub mod proxy;
mod session;
pub mod tcp;

use bytes::Bytes;
use http::Method;
use url::Url;

/// One HTTP exchange as handed to a protocol implementation.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    /// Regular headers in send order. Case is preserved for HTTP/1.1 and
    /// lowered for HTTP/2 and HTTP/3.
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
    /// Replaces the `Host` header / `:authority`.
    pub host_override: Option<String>,
    /// Send the full URL as the request target (plain HTTP through an HTTP
    /// proxy).
    pub absolute_form: bool,
}

impl HttpRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Vec::new(),
            body: None,
            host_override: None,
            absolute_form: false,
        }
    }

    /// `host[:port]`, omitting the port when it is the scheme default.
    pub fn authority(&self) -> String {
        if let Some(host) = &self.host_override {
            return host.clone();
        }
        let host = self.url.host_str().unwrap_or_default();
        match self.url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    pub fn path_and_query(&self) -> String {
        let mut target = self.url.path().to_string();
        if target.is_empty() {
            target.push('/');
        }
        if let Some(query) = self.url.query() {
            target.push('?');
            target.push_str(query);
        }
        target
    }

    /// Request-target for the HTTP/1.1 request line.
    pub fn request_target(&self) -> String {
        if self.absolute_form {
            let mut url = self.url.clone();
            url.set_fragment(None);
            url.to_string()
        } else {
            self.path_and_query()
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Headers that only make sense on an HTTP/1.1 connection (RFC 9113 8.2.2).
pub(crate) fn is_connection_specific(name: &str) -> bool {
    ["connection", "keep-alive", "proxy-connection", "transfer-encoding", "upgrade", "host"]
        .iter()
        .any(|h| name.eq_ignore_ascii_case(h))
}
