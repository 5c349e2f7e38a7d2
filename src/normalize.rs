//! Translation between the ergonomic option surface and the engine's wire
//! descriptors.
//!
//! Precedence, highest first: raw override field, per-call option, client
//! default, engine default. Header and cookie maps merge key by key; list
//! fields from a higher layer replace the lower one.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use base64::Engine as _;
use http::Method;
use serde::{Deserialize, Serialize};

use crate::cookie::CookieEntry;
use crate::descriptor::{CustomTlsClient, HeaderFields, RequestDescriptor, ResponseDescriptor, TransportOptions};
use crate::error::{Error, Result};
use crate::fingerprint::{ProfileCatalog, DEFAULT_PROFILE};
use crate::response::{ResponseData, TlsResponse};

/// User-Agent of the default profile, sent by [`ClientOptions::browser_defaults`].
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/146.0.0.0 Safari/537.36";

/// Copy every `Some` field of `$top` over `$base`.
macro_rules! overlay {
    ($base:expr, $top:expr; $($field:ident),* $(,)?) => {
        $(
            if $top.$field.is_some() {
                $base.$field = $top.$field.clone();
            }
        )*
    };
}

/// Request body as given by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Text(String),
    /// Sent base64-encoded as a byte request.
    Bytes(Vec<u8>),
    /// Serialized to JSON.
    Json(serde_json::Value),
}

impl From<&str> for RequestBody {
    fn from(s: &str) -> Self {
        RequestBody::Text(s.to_string())
    }
}

impl From<String> for RequestBody {
    fn from(s: String) -> Self {
        RequestBody::Text(s)
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(b: Vec<u8>) -> Self {
        RequestBody::Bytes(b)
    }
}

impl From<&[u8]> for RequestBody {
    fn from(b: &[u8]) -> Self {
        RequestBody::Bytes(b.to_vec())
    }
}

impl From<serde_json::Value> for RequestBody {
    fn from(v: serde_json::Value) -> Self {
        RequestBody::Json(v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    Json,
    Text,
    ArrayBuffer,
}

/// Raw descriptor fields a caller may set directly. Fields owned by
/// [`ClientOptions`] (method, URL, profile, headers, timeout, redirects,
/// proxy, TLS verification) are not here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawOptions {
    pub custom_tls_client: Option<CustomTlsClient>,
    pub transport_options: Option<TransportOptions>,
    pub certificate_pinning_hosts: Option<HashMap<String, Vec<String>>>,
    pub default_headers: Option<HeaderFields>,
    pub connect_headers: Option<HeaderFields>,
    pub header_order: Option<Vec<String>>,
    pub request_body: Option<String>,
    pub request_cookies: Option<Vec<CookieEntry>>,
    pub session_id: Option<String>,
    pub local_address: Option<String>,
    pub server_name_overwrite: Option<String>,
    pub request_host_override: Option<String>,
    pub is_byte_request: Option<bool>,
    pub is_byte_response: Option<bool>,
    pub is_rotating_proxy: Option<bool>,
    pub force_http1: Option<bool>,
    pub disable_http3: Option<bool>,
    pub with_protocol_racing: Option<bool>,
    #[serde(rename = "disableIPV4")]
    pub disable_ipv4: Option<bool>,
    #[serde(rename = "disableIPV6")]
    pub disable_ipv6: Option<bool>,
    pub with_debug: Option<bool>,
    pub catch_panics: Option<bool>,
    pub without_cookie_jar: Option<bool>,
    pub with_custom_cookie_jar: Option<bool>,
    #[serde(rename = "withRandomTLSExtensionOrder")]
    pub with_random_tls_extension_order: Option<bool>,
    pub euckr_response: Option<bool>,
    pub stream_output_path: Option<String>,
    pub stream_output_block_size: Option<usize>,
    #[serde(rename = "streamOutputEOFSymbol")]
    pub stream_output_eof_symbol: Option<String>,
}

impl RawOptions {
    /// `top` over `self`, field by field.
    pub fn merged_with(&self, top: &RawOptions) -> RawOptions {
        let mut out = self.clone();
        overlay!(out, top;
            certificate_pinning_hosts, header_order, request_body, request_cookies, session_id,
            local_address, server_name_overwrite, request_host_override, is_byte_request,
            is_byte_response, is_rotating_proxy, force_http1, disable_http3, with_protocol_racing,
            disable_ipv4, disable_ipv6, with_debug, catch_panics, without_cookie_jar,
            with_custom_cookie_jar, with_random_tls_extension_order, euckr_response,
            stream_output_path, stream_output_block_size, stream_output_eof_symbol,
        );
        out.default_headers = merge_fields(&self.default_headers, &top.default_headers);
        out.connect_headers = merge_fields(&self.connect_headers, &top.connect_headers);
        out.custom_tls_client = match (&self.custom_tls_client, &top.custom_tls_client) {
            (Some(base), Some(top)) => Some(merge_custom(base, top)),
            (base, top) => top.clone().or_else(|| base.clone()),
        };
        out.transport_options = match (&self.transport_options, &top.transport_options) {
            (Some(base), Some(top)) => {
                let mut merged = base.clone();
                overlay!(merged, top;
                    idle_conn_timeout, max_idle_conns, max_idle_conns_per_host, max_conns_per_host,
                    max_response_header_bytes, write_buffer_size, read_buffer_size,
                );
                merged.disable_keep_alives = top.disable_keep_alives;
                merged.disable_compression = top.disable_compression;
                Some(merged)
            }
            (base, top) => top.clone().or_else(|| base.clone()),
        };
        out
    }
}

fn merge_fields(base: &Option<HeaderFields>, top: &Option<HeaderFields>) -> Option<HeaderFields> {
    match (base, top) {
        (Some(base), Some(top)) => {
            let mut merged = base.clone();
            merged.merge(top);
            Some(merged)
        }
        (base, top) => top.clone().or_else(|| base.clone()),
    }
}

fn merge_custom(base: &CustomTlsClient, top: &CustomTlsClient) -> CustomTlsClient {
    let mut out = base.clone();
    overlay!(out, top;
        ja3_string, h2_settings, h2_settings_order, h3_settings, h3_settings_order,
        h3_pseudo_header_order, h3_priority_param, h3_send_grease_frames, header_priority,
        cert_compression_algos, key_share_curves, alpn_protocols, alps_protocols,
        ech_candidate_payloads, ech_candidate_cipher_suites, priority_frames, pseudo_header_order,
        supported_delegated_credentials_algorithms, supported_signature_algorithms,
        supported_versions, connection_flow, record_size_limit,
    );
    out
}

/// Caller-facing options, used both as client defaults and per call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientOptions {
    pub impersonate: Option<String>,
    pub headers: HeaderFields,
    pub body: Option<RequestBody>,
    pub cookies: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
    pub follow_redirects: Option<bool>,
    pub proxy: Option<String>,
    pub verify_tls: Option<bool>,
    pub response_type: Option<ResponseType>,
    pub throw_on_http_error: Option<bool>,
    pub raw: Option<RawOptions>,
}

impl ClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults of the global client: the default Chrome profile and its
    /// User-Agent, JSON decoding and errors for HTTP status >= 400.
    pub fn browser_defaults() -> Self {
        Self::new()
            .impersonate(DEFAULT_PROFILE)
            .response_type(ResponseType::Json)
            .throw_on_http_error(true)
            .header("user-agent", DEFAULT_USER_AGENT)
    }

    pub fn impersonate(mut self, profile: impl Into<String>) -> Self {
        self.impersonate = Some(profile.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn headers(mut self, headers: HeaderFields) -> Self {
        self.headers = headers;
        self
    }

    pub fn body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn json<T: Serialize>(mut self, value: &T) -> Result<Self> {
        self.body = Some(RequestBody::Json(serde_json::to_value(value)?));
        Ok(self)
    }

    pub fn cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(name.into(), value.into());
        self
    }

    pub fn cookies<I, K, V>(mut self, cookies: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.cookies = cookies.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = Some(follow);
        self
    }

    pub fn proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    pub fn verify_tls(mut self, verify: bool) -> Self {
        self.verify_tls = Some(verify);
        self
    }

    pub fn response_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = Some(response_type);
        self
    }

    pub fn throw_on_http_error(mut self, throw: bool) -> Self {
        self.throw_on_http_error = Some(throw);
        self
    }

    pub fn raw(mut self, raw: RawOptions) -> Self {
        self.raw = Some(raw);
        self
    }

    /// `per_call` over `self`. Headers and cookies merge key by key; raw
    /// bags merge field by field.
    pub fn merged_with(&self, per_call: &ClientOptions) -> ClientOptions {
        let mut out = self.clone();
        overlay!(out, per_call;
            impersonate, body, timeout, follow_redirects, proxy, verify_tls, response_type,
            throw_on_http_error,
        );
        out.headers.merge(&per_call.headers);
        out.cookies
            .extend(per_call.cookies.iter().map(|(k, v)| (k.clone(), v.clone())));
        out.raw = match (&self.raw, &per_call.raw) {
            (Some(base), Some(top)) => Some(base.merged_with(top)),
            (base, top) => top.clone().or_else(|| base.clone()),
        };
        out
    }
}

impl RequestDescriptor {
    /// Apply a raw override bag. Set fields win; header maps merge key by
    /// key; raw cookies replace derived cookies of the same name.
    pub fn merge_raw(&mut self, raw: &RawOptions) {
        if let Some(v) = &raw.custom_tls_client {
            self.custom_tls_client = Some(match &self.custom_tls_client {
                Some(base) => merge_custom(base, v),
                None => v.clone(),
            });
        }
        if let Some(v) = &raw.transport_options {
            self.transport_options = Some(v.clone());
        }
        if let Some(v) = &raw.certificate_pinning_hosts {
            self.certificate_pinning_hosts
                .extend(v.iter().map(|(k, pins)| (k.clone(), pins.clone())));
        }
        if let Some(v) = &raw.default_headers {
            self.default_headers.merge(v);
        }
        if let Some(v) = &raw.connect_headers {
            self.connect_headers.merge(v);
        }
        if let Some(v) = &raw.header_order {
            self.header_order = v.clone();
        }
        if let Some(v) = &raw.request_cookies {
            self.request_cookies.retain(|c| !v.iter().any(|r| r.name == c.name));
            self.request_cookies.extend(v.iter().cloned());
        }
        if raw.request_body.is_some() {
            self.request_body = raw.request_body.clone();
        }
        overlay!(self, raw;
            session_id, local_address, server_name_overwrite, request_host_override,
            stream_output_path, stream_output_block_size, stream_output_eof_symbol, catch_panics,
        );
        macro_rules! flags {
            ($($field:ident),* $(,)?) => {
                $(
                    if let Some(v) = raw.$field {
                        self.$field = v;
                    }
                )*
            };
        }
        flags!(
            is_byte_request, is_byte_response, is_rotating_proxy, force_http1, disable_http3,
            with_protocol_racing, disable_ipv4, disable_ipv6, with_debug, without_cookie_jar,
            with_custom_cookie_jar, with_random_tls_extension_order, euckr_response,
        );
    }
}

/// Build the engine descriptor for one call.
pub fn build_request_descriptor(method: &Method, url: &str, opts: &ClientOptions) -> Result<RequestDescriptor> {
    if let Some(profile) = &opts.impersonate {
        if !ProfileCatalog::global().contains(profile) {
            return Err(Error::ProfileNotFound(profile.clone()));
        }
    }

    let mut desc = RequestDescriptor::new(method.as_str().to_ascii_uppercase(), url);
    desc.tls_client_identifier = opts.impersonate.clone();
    desc.headers = opts.headers.clone();

    match &opts.body {
        Some(RequestBody::Bytes(bytes)) => {
            desc.request_body = Some(base64::engine::general_purpose::STANDARD.encode(bytes));
            desc.is_byte_request = true;
            if !desc.headers.contains("content-type") {
                desc.headers.insert("content-type", "application/octet-stream");
            }
        }
        Some(RequestBody::Json(value)) => {
            desc.request_body = Some(serde_json::to_string(value)?);
            if !desc.headers.contains("content-type") {
                desc.headers.insert("content-type", "application/json");
            }
        }
        Some(RequestBody::Text(text)) if !text.is_empty() => desc.request_body = Some(text.clone()),
        Some(RequestBody::Text(_)) | None => {}
    }

    desc.is_byte_response = opts.response_type == Some(ResponseType::ArrayBuffer);
    desc.request_cookies = opts
        .cookies
        .iter()
        .map(|(name, value)| CookieEntry::new(name.clone(), value.clone()))
        .collect();
    desc.timeout_milliseconds = opts.timeout.map(|t| t.as_millis().min(u64::MAX as u128) as u64);
    desc.follow_redirects = opts.follow_redirects.unwrap_or(false);
    desc.proxy_url = opts.proxy.clone();
    desc.insecure_skip_verify = opts.verify_tls == Some(false);

    if let Some(raw) = &opts.raw {
        desc.merge_raw(raw);
    }
    Ok(desc)
}

/// Shape an engine response for the caller. Status `0` becomes
/// [`Error::EngineFailure`].
pub fn format_response(response: ResponseDescriptor, opts: &ClientOptions) -> Result<TlsResponse> {
    if response.is_engine_failure() {
        return Err(Error::EngineFailure {
            message: response.body,
        });
    }
    let data = match opts.response_type {
        Some(ResponseType::ArrayBuffer) => {
            let payload = response
                .body
                .find("base64,")
                .map_or(response.body.as_str(), |i| &response.body[i + 7..]);
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(payload.trim())
                .map_err(|e| Error::protocol(format!("binary body is not valid base64: {}", e)))?;
            ResponseData::Bytes(bytes)
        }
        Some(ResponseType::Json) => match serde_json::from_str(&response.body) {
            Ok(value) => ResponseData::Json(value),
            Err(_) => ResponseData::Text(response.body),
        },
        Some(ResponseType::Text) | None => ResponseData::Text(response.body),
    };
    Ok(TlsResponse {
        status: response.status,
        headers: response.headers,
        data,
        final_url: response.target,
        cookies: response.cookies,
        used_protocol: response.used_protocol,
        session_id: response.session_id,
    })
}
