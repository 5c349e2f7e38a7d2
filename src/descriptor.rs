//! Wire descriptors exchanged with the engine.
//!
//! A [`RequestDescriptor`] is built once per call and consumed once by
//! [`Engine::execute`](crate::engine::Engine::execute); a
//! [`ResponseDescriptor`] comes back. Field names on the wire are camelCase.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::cookie::CookieEntry;
use crate::error::{Error, Result};
use crate::fingerprint::http2::parse_pseudo_order;
use crate::fingerprint::tls::{parse_group, parse_sigalg, parse_version, EchCandidates};
use crate::fingerprint::{
    CertCompression, FingerprintDescriptor, Http2Fingerprint, Http3Fingerprint, Ja3,
    PriorityFrame, PriorityParam,
};

/// Header map with ordered, case-insensitive names and multiple values per
/// name. On the wire a value is either a string or a list of strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderFields(Vec<(String, Vec<String>)>);

impl HeaderFields {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.0.iter().position(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.position(name).map(|i| self.0[i].1.as_slice())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Replace every value of `name`, keeping its position if present.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.insert_all(name, vec![value.into()]);
    }

    pub fn insert_all(&mut self, name: impl Into<String>, values: Vec<String>) {
        let name = name.into();
        match self.position(&name) {
            Some(i) => self.0[i].1 = values,
            None => self.0.push((name, values)),
        }
    }

    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        match self.position(&name) {
            Some(i) => self.0[i].1.push(value.into()),
            None => self.0.push((name, vec![value.into()])),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Vec<String>> {
        self.position(name).map(|i| self.0.remove(i).1)
    }

    /// Merge `other` key by key; its values replace ours.
    pub fn merge(&mut self, other: &HeaderFields) {
        for (name, values) in &other.0 {
            self.insert_all(name.clone(), values.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// One `(name, value)` pair per value, in order.
    pub fn pairs(&self) -> Vec<(String, String)> {
        self.0
            .iter()
            .flat_map(|(k, vs)| vs.iter().map(move |v| (k.clone(), v.clone())))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for HeaderFields {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut fields = HeaderFields::new();
        for (k, v) in iter {
            fields.append(k, v);
        }
        fields
    }
}

impl Serialize for HeaderFields {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, values) in &self.0 {
            map.serialize_entry(name, values)?;
        }
        map.end()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl<'de> Deserialize<'de> for HeaderFields {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct FieldsVisitor;

        impl<'de> Visitor<'de> for FieldsVisitor {
            type Value = HeaderFields;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of header names to a string or a list of strings")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<HeaderFields, A::Error> {
                let mut fields = HeaderFields::new();
                while let Some((name, value)) = access.next_entry::<String, OneOrMany>()? {
                    let values = match value {
                        OneOrMany::One(v) => vec![v],
                        OneOrMany::Many(vs) => vs,
                    };
                    fields.insert_all(name, values);
                }
                Ok(fields)
            }
        }

        deserializer.deserialize_map(FieldsVisitor)
    }
}

/// Pool and socket tuning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransportOptions {
    /// Milliseconds.
    pub idle_conn_timeout: Option<u64>,
    pub max_idle_conns: Option<usize>,
    pub max_idle_conns_per_host: Option<usize>,
    pub max_conns_per_host: Option<usize>,
    pub max_response_header_bytes: Option<usize>,
    pub write_buffer_size: Option<usize>,
    pub read_buffer_size: Option<usize>,
    pub disable_keep_alives: bool,
    pub disable_compression: bool,
}

/// HPKE suite offered in ECH, by id or by name (`HKDF_SHA256`, `AEAD_AES_128_GCM`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EchCipherSuite {
    pub kdf_id: serde_json::Value,
    pub aead_id: serde_json::Value,
}

impl EchCipherSuite {
    fn ids(&self) -> Result<(u16, u16)> {
        let kdf = hpke_id(&self.kdf_id, &[("HKDF_SHA256", 1), ("HKDF_SHA384", 2), ("HKDF_SHA512", 3)])
            .ok_or_else(|| Error::validation(format!("unknown ECH KDF {}", self.kdf_id)))?;
        let aead = hpke_id(
            &self.aead_id,
            &[("AEAD_AES_128_GCM", 1), ("AEAD_AES_256_GCM", 2), ("AEAD_CHACHA20_POLY1305", 3)],
        )
        .ok_or_else(|| Error::validation(format!("unknown ECH AEAD {}", self.aead_id)))?;
        Ok((kdf, aead))
    }
}

fn hpke_id(value: &serde_json::Value, names: &[(&str, u16)]) -> Option<u16> {
    match value {
        serde_json::Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        serde_json::Value::String(s) => names
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(s))
            .map(|(_, id)| *id),
        _ => None,
    }
}

/// Field-by-field replacement of a resolved profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CustomTlsClient {
    pub ja3_string: Option<String>,
    pub h2_settings: Option<HashMap<String, u32>>,
    pub h2_settings_order: Option<Vec<String>>,
    pub h3_settings: Option<HashMap<String, u64>>,
    pub h3_settings_order: Option<Vec<String>>,
    pub h3_pseudo_header_order: Option<Vec<String>>,
    pub h3_priority_param: Option<u32>,
    pub h3_send_grease_frames: Option<bool>,
    pub header_priority: Option<PriorityParam>,
    pub cert_compression_algos: Option<Vec<String>>,
    pub key_share_curves: Option<Vec<String>>,
    pub alpn_protocols: Option<Vec<String>>,
    pub alps_protocols: Option<Vec<String>>,
    #[serde(rename = "ECHCandidatePayloads")]
    pub ech_candidate_payloads: Option<Vec<u16>>,
    #[serde(rename = "ECHCandidateCipherSuites")]
    pub ech_candidate_cipher_suites: Option<Vec<EchCipherSuite>>,
    pub priority_frames: Option<Vec<PriorityFrame>>,
    pub pseudo_header_order: Option<Vec<String>>,
    pub supported_delegated_credentials_algorithms: Option<Vec<String>>,
    pub supported_signature_algorithms: Option<Vec<String>>,
    pub supported_versions: Option<Vec<String>>,
    pub connection_flow: Option<u32>,
    pub record_size_limit: Option<u16>,
}

fn parse_list<T>(values: &[String], what: &str, parse: impl Fn(&str) -> Option<T>) -> Result<Vec<T>> {
    values
        .iter()
        .map(|v| parse(v).ok_or_else(|| Error::validation(format!("unknown {}: {}", what, v))))
        .collect()
}

impl CustomTlsClient {
    /// Overlay the set fields onto `base` and validate the result.
    pub fn apply_to(&self, mut base: FingerprintDescriptor) -> Result<FingerprintDescriptor> {
        let tls = &mut base.tls;
        if let Some(ja3) = &self.ja3_string {
            tls.apply_ja3(&Ja3::parse(ja3)?);
        }
        if let Some(curves) = &self.key_share_curves {
            tls.key_share_curves = parse_list(curves, "key share curve", parse_group)?;
        }
        if let Some(algos) = &self.cert_compression_algos {
            tls.cert_compression = parse_list(algos, "certificate compression", CertCompression::parse)?;
        }
        if let Some(alpn) = &self.alpn_protocols {
            tls.alpn = alpn.clone();
        }
        if let Some(alps) = &self.alps_protocols {
            tls.alps = alps.clone();
        }
        if let Some(algs) = &self.supported_signature_algorithms {
            tls.signature_algorithms = parse_list(algs, "signature algorithm", parse_sigalg)?;
        }
        if let Some(algs) = &self.supported_delegated_credentials_algorithms {
            tls.delegated_credentials = parse_list(algs, "signature algorithm", parse_sigalg)?;
        }
        if let Some(versions) = &self.supported_versions {
            tls.supported_versions = parse_list(versions, "TLS version", parse_version)?;
        }
        if let Some(limit) = self.record_size_limit {
            tls.record_size_limit = Some(limit);
        }
        if self.ech_candidate_payloads.is_some() || self.ech_candidate_cipher_suites.is_some() {
            let cipher_suites = self
                .ech_candidate_cipher_suites
                .iter()
                .flatten()
                .map(EchCipherSuite::ids)
                .collect::<Result<Vec<_>>>()?;
            tls.ech = Some(EchCandidates {
                payload_lengths: self.ech_candidate_payloads.clone().unwrap_or_default(),
                cipher_suites,
            });
        }

        self.apply_h2(&mut base.http2)?;

        let touches_h3 = self.h3_settings.is_some()
            || self.h3_settings_order.is_some()
            || self.h3_pseudo_header_order.is_some()
            || self.h3_priority_param.is_some()
            || self.h3_send_grease_frames.is_some();
        if touches_h3 {
            let h3 = base.http3.get_or_insert_with(Http3Fingerprint::default);
            if self.h3_settings.is_some() || self.h3_settings_order.is_some() {
                h3.settings = Http3Fingerprint::settings_from_map(
                    &self.h3_settings.clone().unwrap_or_default(),
                    self.h3_settings_order.as_deref().unwrap_or_default(),
                )?;
            }
            if let Some(order) = &self.h3_pseudo_header_order {
                h3.pseudo_header_order = parse_pseudo_order(order)?;
            }
            if let Some(p) = self.h3_priority_param {
                h3.priority_param = Some(p);
            }
            if let Some(grease) = self.h3_send_grease_frames {
                h3.send_grease_frames = grease;
            }
        }

        base.validate()?;
        Ok(base)
    }

    fn apply_h2(&self, h2: &mut Http2Fingerprint) -> Result<()> {
        if self.h2_settings.is_some() || self.h2_settings_order.is_some() {
            h2.settings = Http2Fingerprint::settings_from_map(
                &self.h2_settings.clone().unwrap_or_default(),
                self.h2_settings_order.as_deref().unwrap_or_default(),
            )?;
        }
        if let Some(flow) = self.connection_flow {
            h2.connection_flow = flow;
        }
        if let Some(p) = self.header_priority {
            h2.header_priority = Some(p);
        }
        if let Some(frames) = &self.priority_frames {
            h2.priority_frames = frames.clone();
        }
        if let Some(order) = &self.pseudo_header_order {
            h2.pseudo_header_order = parse_pseudo_order(order)?;
        }
        Ok(())
    }
}

/// One request as the engine consumes it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestDescriptor {
    pub request_method: String,
    pub request_url: String,
    pub tls_client_identifier: Option<String>,
    pub custom_tls_client: Option<CustomTlsClient>,
    pub headers: HeaderFields,
    /// Sent when the caller did not set the same name.
    pub default_headers: HeaderFields,
    /// Sent on the proxy CONNECT request.
    pub connect_headers: HeaderFields,
    pub header_order: Vec<String>,
    pub request_body: Option<String>,
    /// `request_body` is base64.
    pub is_byte_request: bool,
    /// Return the body as a `data:` URL.
    pub is_byte_response: bool,
    pub request_cookies: Vec<CookieEntry>,
    pub session_id: Option<String>,
    pub timeout_milliseconds: Option<u64>,
    pub timeout_seconds: Option<u64>,
    pub follow_redirects: bool,
    pub proxy_url: Option<String>,
    pub is_rotating_proxy: bool,
    pub insecure_skip_verify: bool,
    pub force_http1: bool,
    pub disable_http3: bool,
    pub with_protocol_racing: bool,
    #[serde(rename = "disableIPV4")]
    pub disable_ipv4: bool,
    #[serde(rename = "disableIPV6")]
    pub disable_ipv6: bool,
    pub local_address: Option<String>,
    pub server_name_overwrite: Option<String>,
    pub request_host_override: Option<String>,
    pub certificate_pinning_hosts: HashMap<String, Vec<String>>,
    pub transport_options: Option<TransportOptions>,
    pub with_debug: bool,
    /// Defaults to the engine setting.
    pub catch_panics: Option<bool>,
    pub without_cookie_jar: bool,
    pub with_custom_cookie_jar: bool,
    #[serde(rename = "withRandomTLSExtensionOrder")]
    pub with_random_tls_extension_order: bool,
    pub euckr_response: bool,
    pub stream_output_path: Option<String>,
    pub stream_output_block_size: Option<usize>,
    #[serde(rename = "streamOutputEOFSymbol")]
    pub stream_output_eof_symbol: Option<String>,
}

impl RequestDescriptor {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            request_method: method.into(),
            request_url: url.into(),
            ..Default::default()
        }
    }

    /// Fingerprint this request runs under: the named profile (or the
    /// default) with `customTlsClient` applied on top.
    pub fn resolve_fingerprint(&self) -> Result<FingerprintDescriptor> {
        let name = self
            .tls_client_identifier
            .as_deref()
            .unwrap_or(crate::fingerprint::DEFAULT_PROFILE);
        let base = crate::fingerprint::ProfileCatalog::global().resolve(name)?;
        match &self.custom_tls_client {
            Some(custom) => custom.apply_to(base),
            None => Ok(base),
        }
    }
}

/// Result of one `execute` call. `status == 0` means no HTTP response was
/// produced and `body` holds the diagnostic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResponseDescriptor {
    pub id: String,
    pub status: u16,
    pub headers: BTreeMap<String, Vec<String>>,
    pub body: String,
    pub cookies: HashMap<String, String>,
    /// Final URL after redirects.
    pub target: String,
    pub used_protocol: String,
    pub session_id: Option<String>,
}

impl ResponseDescriptor {
    pub(crate) fn failure(id: String, session_id: Option<String>, message: impl Into<String>) -> Self {
        Self {
            id,
            status: 0,
            body: message.into(),
            session_id,
            ..Default::default()
        }
    }

    pub fn is_engine_failure(&self) -> bool {
        self.status == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_fields_accept_strings_and_lists() {
        let fields: HeaderFields =
            serde_json::from_str(r#"{"Accept":"*/*","X-Multi":["a","b"]}"#).unwrap();
        assert_eq!(fields.get("accept").unwrap(), ["*/*"]);
        assert_eq!(fields.get("x-multi").unwrap(), ["a", "b"]);
        let names: Vec<&str> = fields.iter().map(|(k, _)| k).collect();
        assert_eq!(names, ["Accept", "X-Multi"]);
        assert_eq!(
            serde_json::to_string(&fields).unwrap(),
            r#"{"Accept":["*/*"],"X-Multi":["a","b"]}"#
        );
    }

    #[test]
    fn header_merge_is_case_insensitive() {
        let mut base: HeaderFields = [("Accept", "*/*"), ("User-Agent", "ua")].into_iter().collect();
        let over: HeaderFields = [("accept", "text/html")].into_iter().collect();
        base.merge(&over);
        assert_eq!(base.len(), 2);
        assert_eq!(base.get("ACCEPT").unwrap(), ["text/html"]);
    }

    #[test]
    fn wire_names() {
        let json = r#"{
            "requestMethod": "GET",
            "requestUrl": "https://a.test/",
            "disableIPV6": true,
            "withRandomTLSExtensionOrder": true,
            "streamOutputEOFSymbol": "EOF",
            "transportOptions": {"maxIdleConnsPerHost": 2, "disableCompression": true},
            "requestCookies": [{"name": "a", "value": "1"}]
        }"#;
        let req: RequestDescriptor = serde_json::from_str(json).unwrap();
        assert!(req.disable_ipv6);
        assert!(req.with_random_tls_extension_order);
        assert_eq!(req.stream_output_eof_symbol.as_deref(), Some("EOF"));
        let transport = req.transport_options.unwrap();
        assert_eq!(transport.max_idle_conns_per_host, Some(2));
        assert!(transport.disable_compression);
        assert_eq!(req.request_cookies[0].name, "a");
    }

    #[test]
    fn custom_client_overrides_profile() {
        let custom: CustomTlsClient = serde_json::from_str(
            r#"{
                "h2Settings": {"HEADER_TABLE_SIZE": 65536, "UNKNOWN_SETTING_9": 1},
                "h2SettingsOrder": ["UNKNOWN_SETTING_9", "HEADER_TABLE_SIZE"],
                "connectionFlow": 12517377,
                "pseudoHeaderOrder": [":method", ":path", ":authority", ":scheme"],
                "priorityFrames": [{"streamID": 3, "priorityParam": {"streamDep": 0, "exclusive": false, "weight": 201}}],
                "keyShareCurves": ["GREASE", "X25519"],
                "certCompressionAlgos": ["zstd"],
                "ECHCandidateCipherSuites": [{"kdfId": "HKDF_SHA256", "aeadId": "AEAD_AES_128_GCM"}],
                "ECHCandidatePayloads": [128, 160],
                "h3SettingsOrder": ["QPACK_MAX_TABLE_CAPACITY"],
                "h3Settings": {"QPACK_MAX_TABLE_CAPACITY": 0}
            }"#,
        )
        .unwrap();
        let base = crate::fingerprint::ProfileCatalog::global().resolve("chrome_131").unwrap();
        let fp = custom.apply_to(base).unwrap();
        assert_eq!(fp.http2.settings, vec![(9, 1), (1, 65536)]);
        assert_eq!(fp.http2.connection_flow, 12_517_377);
        assert_eq!(fp.http2.priority_frames[0].stream_id, 3);
        assert_eq!(fp.tls.key_share_curves, vec![0x0a0a, 29]);
        assert_eq!(fp.tls.cert_compression, vec![CertCompression::Zstd]);
        let ech = fp.tls.ech.unwrap();
        assert_eq!(ech.cipher_suites, vec![(1, 1)]);
        assert_eq!(ech.payload_lengths, vec![128, 160]);
        assert_eq!(fp.http3.unwrap().settings, vec![(1, 0)]);
    }

    #[test]
    fn mismatched_order_is_rejected() {
        let custom = CustomTlsClient {
            h2_settings: Some(HashMap::from([("HEADER_TABLE_SIZE".to_string(), 1)])),
            h2_settings_order: Some(vec!["ENABLE_PUSH".to_string()]),
            ..Default::default()
        };
        let base = crate::fingerprint::ProfileCatalog::global().resolve("chrome_131").unwrap();
        assert!(custom.apply_to(base).unwrap_err().is_validation());
    }

    #[test]
    fn unknown_profile_fails_to_resolve() {
        let mut req = RequestDescriptor::new("GET", "https://a.test/");
        req.tls_client_identifier = Some("netscape_4".into());
        assert!(matches!(req.resolve_fingerprint(), Err(Error::ProfileNotFound(_))));
        req.tls_client_identifier = None;
        assert!(req.resolve_fingerprint().is_ok());
    }
}
