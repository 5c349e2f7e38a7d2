//! BoringSSL TLS connector shaped by a [`TlsFingerprint`].
//!
//! The extension list is authoritative: it fixes the ClientHello extension
//! order and gates the optional extensions (OCSP, SCT, certificate
//! compression, ALPS, ECH GREASE, record size limit, delegated credentials,
//! session tickets). Cipher order covers the TLS 1.3 suites too, and the
//! number of key shares follows `key_share_curves`.

use std::collections::HashMap;
use std::io::Write;
use std::net::IpAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use base64::Engine as _;
use boring2::ssl::{
    CertificateCompressionAlgorithm, CertificateCompressor, ExtensionType, NameType, SslConnector,
    SslContextBuilder, SslMethod, SslOptions, SslRef, SslSessionCacheMode, SslVerifyMode,
    SslVersion,
};
use boring2::stack::Stack;
use boring2::x509::store::X509StoreBuilder;
use boring2::x509::{X509StoreContext, X509};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_boring2::SslStream;

use crate::error::{Error, Result};
use crate::fingerprint::tls::{ext, group_name, is_grease, sigalg_name, CertCompression, TlsFingerprint};
use crate::transport::session::TicketStore;
use crate::version::Protocol;

/// Post-quantum hybrids some BoringSSL builds do not know.
const PQ_GROUPS: &[u16] = &[0x11ec, 0x6399];

/// BoringSSL sends at most this many key shares.
const MAX_KEY_SHARES: usize = 3;

struct BrotliCertDecompressor;

impl CertificateCompressor for BrotliCertDecompressor {
    const ALGORITHM: CertificateCompressionAlgorithm = CertificateCompressionAlgorithm::BROTLI;
    const CAN_COMPRESS: bool = false;
    const CAN_DECOMPRESS: bool = true;

    fn decompress<W>(&self, input: &[u8], output: &mut W) -> std::io::Result<()>
    where
        W: Write,
    {
        let mut decoder = brotli::Decompressor::new(input, 4096);
        std::io::copy(&mut decoder, output).map(|_| ())
    }
}

struct ZlibCertDecompressor;

impl CertificateCompressor for ZlibCertDecompressor {
    const ALGORITHM: CertificateCompressionAlgorithm = CertificateCompressionAlgorithm::ZLIB;
    const CAN_COMPRESS: bool = false;
    const CAN_DECOMPRESS: bool = true;

    fn decompress<W>(&self, input: &[u8], output: &mut W) -> std::io::Result<()>
    where
        W: Write,
    {
        let mut decoder = flate2::read::ZlibDecoder::new(input);
        std::io::copy(&mut decoder, output).map(|_| ())
    }
}

struct ZstdCertDecompressor;

impl CertificateCompressor for ZstdCertDecompressor {
    const ALGORITHM: CertificateCompressionAlgorithm = CertificateCompressionAlgorithm::ZSTD;
    const CAN_COMPRESS: bool = false;
    const CAN_DECOMPRESS: bool = true;

    fn decompress<W>(&self, input: &[u8], output: &mut W) -> std::io::Result<()>
    where
        W: Write,
    {
        zstd::stream::copy_decode(input, output)
    }
}

/// Connection-level TLS knobs that are not part of the browser fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TlsOptions {
    pub insecure_skip_verify: bool,
    /// SNI and verification name instead of the URL host.
    pub server_name: Option<String>,
    /// Replaces the fingerprint's ALPN list (e.g. `http/1.1` only).
    pub alpn: Option<Vec<String>>,
    pub random_extension_order: bool,
    /// Extra trust anchors, DER or PEM.
    pub root_certs: Vec<Vec<u8>>,
}

/// Number of key shares to generate, or `None` to keep BoringSSL's choice.
///
/// BoringSSL generates shares for the first supported groups in order, so
/// only a prefix of `supported_groups` can be reproduced exactly.
pub fn key_share_limit(fp: &TlsFingerprint) -> Option<u8> {
    let shares: Vec<u16> = fp.key_share_curves.iter().copied().filter(|g| !is_grease(*g)).collect();
    if shares.is_empty() {
        return None;
    }
    let groups: Vec<u16> = fp.supported_groups.iter().copied().filter(|g| !is_grease(*g)).collect();
    if !groups.starts_with(&shares) {
        tracing::warn!(
            key_shares = ?shares,
            groups = ?groups,
            "key share curves are not a prefix of supported groups; shares follow group order"
        );
    }
    Some(shares.len().clamp(1, MAX_KEY_SHARES) as u8)
}

/// Non-GREASE extension ids in ClientHello order.
fn extension_order(fp: &TlsFingerprint) -> Vec<ExtensionType> {
    fp.extensions
        .iter()
        .copied()
        .filter(|id| !is_grease(*id))
        .map(ExtensionType::from)
        .collect()
}

fn load_root(der_or_pem: &[u8]) -> Result<X509> {
    X509::from_der(der_or_pem)
        .or_else(|_| X509::from_pem(der_or_pem))
        .map_err(|e| Error::tls(format!("invalid root certificate: {}", e)))
}

/// Apply a fingerprint to a BoringSSL context.
pub fn configure_context(
    builder: &mut SslContextBuilder,
    fp: &TlsFingerprint,
    opts: &TlsOptions,
) -> Result<()> {
    // Must precede set_cipher_list.
    builder.set_preserve_tls13_cipher_list(true);
    let (ciphers, skipped) = fp.cipher_list();
    if !skipped.is_empty() {
        tracing::trace!(?skipped, "cipher suites BoringSSL cannot offer");
    }
    if !ciphers.is_empty() {
        builder
            .set_cipher_list(&ciphers)
            .map_err(|e| Error::tls(format!("failed to set cipher list: {}", e)))?;
    }

    let (curves, _) = fp.curves_list();
    if !curves.is_empty() && builder.set_curves_list(&curves).is_err() {
        let classic: Vec<&str> = fp
            .supported_groups
            .iter()
            .filter(|g| !PQ_GROUPS.contains(g))
            .filter_map(|g| group_name(*g))
            .collect();
        tracing::warn!(curves = %curves, "post-quantum groups unavailable, offering classic groups");
        builder
            .set_curves_list(&classic.join(":"))
            .map_err(|e| Error::tls(format!("failed to set curves: {}", e)))?;
    }
    if let Some(limit) = key_share_limit(fp) {
        builder.set_key_shares_limit(limit);
    }

    let (sigalgs, _) = fp.sigalgs_list();
    if !sigalgs.is_empty() {
        builder
            .set_sigalgs_list(&sigalgs)
            .map_err(|e| Error::tls(format!("failed to set signature algorithms: {}", e)))?;
    }

    let (min, max) = fp.version_range();
    builder
        .set_min_proto_version(Some(ssl_version(min)))
        .map_err(|e| Error::tls(format!("failed to set min TLS version: {}", e)))?;
    builder
        .set_max_proto_version(Some(ssl_version(max)))
        .map_err(|e| Error::tls(format!("failed to set max TLS version: {}", e)))?;

    builder.set_grease_enabled(fp.grease());
    if fp.permute_extensions || opts.random_extension_order {
        builder.set_permute_extensions(true);
    } else {
        builder
            .set_extension_permutation(&extension_order(fp))
            .map_err(|e| Error::tls(format!("failed to set extension order: {}", e)))?;
    }

    if fp.has_extension(ext::STATUS_REQUEST) {
        builder.enable_ocsp_stapling();
    }
    if fp.has_extension(ext::SIGNED_CERT_TIMESTAMP) {
        builder.enable_signed_cert_timestamps();
    }
    if !fp.has_extension(ext::SESSION_TICKET) {
        builder.set_options(SslOptions::NO_TICKET);
    }
    if let Some(limit) = fp.record_size_limit.filter(|_| fp.has_extension(ext::RECORD_SIZE_LIMIT)) {
        builder.set_record_size_limit(limit);
    }
    if fp.has_extension(ext::DELEGATED_CREDENTIALS) && !fp.delegated_credentials.is_empty() {
        let names: Vec<&str> = fp.delegated_credentials.iter().filter_map(|s| sigalg_name(*s)).collect();
        builder
            .set_delegated_credentials(&names.join(":"))
            .map_err(|e| Error::tls(format!("failed to set delegated credentials: {}", e)))?;
    }
    // Client side only decompresses.
    if fp.has_extension(ext::COMPRESS_CERTIFICATE) {
        for algo in &fp.cert_compression {
            let registered = match algo {
                CertCompression::Brotli => builder.add_certificate_compression_algorithm(BrotliCertDecompressor),
                CertCompression::Zlib => builder.add_certificate_compression_algorithm(ZlibCertDecompressor),
                CertCompression::Zstd => builder.add_certificate_compression_algorithm(ZstdCertDecompressor),
            };
            registered.map_err(|e| Error::tls(format!("failed to enable {:?} certificate compression: {}", algo, e)))?;
        }
    }

    if opts.insecure_skip_verify {
        builder.set_verify(SslVerifyMode::NONE);
    }
    for der_or_pem in &opts.root_certs {
        builder
            .cert_store_mut()
            .add_cert(load_root(der_or_pem)?)
            .map_err(|e| Error::tls(format!("failed to add root certificate: {}", e)))?;
    }
    Ok(())
}

fn ssl_version(v: u16) -> SslVersion {
    match v {
        0x0301 => SslVersion::TLS1,
        0x0302 => SslVersion::TLS1_1,
        0x0303 => SslVersion::TLS1_2,
        _ => SslVersion::TLS1_3,
    }
}

/// TLS connector for one (fingerprint, options) pair. Cloning is cheap;
/// clones share resumption tickets.
#[derive(Clone)]
pub struct TlsConnector {
    inner: SslConnector,
    fp: TlsFingerprint,
    options: TlsOptions,
    tickets: TicketStore,
}

impl TlsConnector {
    pub fn new(fp: &TlsFingerprint, options: TlsOptions) -> Result<Self> {
        let mut builder = SslConnector::builder(SslMethod::tls())
            .map_err(|e| Error::tls(format!("failed to create SSL connector: {}", e)))?;
        configure_context(&mut builder, fp, &options)?;

        let alpn = options.alpn.as_ref().unwrap_or(&fp.alpn);
        if !alpn.is_empty() {
            builder
                .set_alpn_protos(&alpn_wire(alpn))
                .map_err(|e| Error::tls(format!("failed to set ALPN: {}", e)))?;
        }

        let tickets = TicketStore::default();
        builder.set_session_cache_mode(SslSessionCacheMode::CLIENT);
        let store = tickets.clone();
        builder.set_new_session_callback(move |ssl, session| {
            if let Some(host) = ssl.servername(NameType::HOST_NAME) {
                store.remember(host, session);
            }
        });

        Ok(Self {
            inner: builder.build(),
            fp: fp.clone(),
            options,
            tickets,
        })
    }

    /// Handshake over an established stream, then enforce `pins`.
    pub async fn connect<S>(&self, host: &str, stream: S, pins: &[String]) -> Result<SslStream<S>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let server_name = self.options.server_name.as_deref().unwrap_or(host);
        let mut config = self
            .inner
            .configure()
            .map_err(|e| Error::tls(format!("failed to configure SSL: {}", e)))?;
        if self.options.insecure_skip_verify {
            config.set_verify_hostname(false);
        }

        let alps_new = self.fp.has_extension(ext::APPLICATION_SETTINGS_NEW);
        if alps_new || self.fp.has_extension(ext::APPLICATION_SETTINGS) {
            for proto in &self.fp.alps {
                config
                    .add_application_settings(proto.as_bytes())
                    .map_err(|e| Error::tls(format!("failed to enable ALPS for {}: {}", proto, e)))?;
            }
            config.set_alps_use_new_codepoint(alps_new);
        }
        if self.fp.has_extension(ext::ENCRYPTED_CLIENT_HELLO) {
            config.set_enable_ech_grease(true);
        }
        if self.fp.uses_psk() {
            if let Some(session) = self.tickets.ticket_for(server_name) {
                tracing::trace!(host = server_name, "offering resumption ticket");
                unsafe {
                    config
                        .set_session(&session)
                        .map_err(|e| Error::tls(format!("failed to set session: {}", e)))?;
                }
            }
        }

        let ssl = config
            .into_ssl(server_name)
            .map_err(|e| Error::tls(format!("failed to prepare SSL for {}: {}", server_name, e)))?;
        let mut stream = SslStream::new(ssl, stream)
            .map_err(|e| Error::tls(format!("failed to create TLS stream: {}", e)))?;
        Pin::new(&mut stream)
            .connect()
            .await
            .map_err(|e| Error::tls(format!("TLS handshake with {} failed: {}", host, e)))?;

        tracing::debug!(
            host,
            version = stream.ssl().version_str(),
            alpn = ?stream.ssl().selected_alpn_protocol().map(String::from_utf8_lossy),
            resumed = stream.ssl().session_reused(),
            "tls handshake complete"
        );

        if !pins.is_empty() {
            verify_pins(stream.ssl(), host, pins)?;
        }
        Ok(stream)
    }
}

fn alpn_wire(protos: &[String]) -> Vec<u8> {
    let mut out = Vec::new();
    for proto in protos {
        out.push(proto.len() as u8);
        out.extend_from_slice(proto.as_bytes());
    }
    out
}

/// Pins configured for `host`: exact entries plus `*.` wildcards matching
/// any subdomain.
pub fn pins_for_host(pinning: &HashMap<String, Vec<String>>, host: &str) -> Vec<String> {
    let host = host.to_ascii_lowercase();
    let mut pins = Vec::new();
    for (pattern, values) in pinning {
        let pattern = pattern.to_ascii_lowercase();
        let matched = match pattern.strip_prefix("*.") {
            Some(suffix) => host
                .strip_suffix(suffix)
                .is_some_and(|prefix| prefix.ends_with('.')),
            None => pattern == host,
        };
        if matched {
            pins.extend(values.iter().cloned());
        }
    }
    pins
}

/// `sha256/<base64>` of a DER-encoded SubjectPublicKeyInfo.
pub fn spki_pin(spki_der: &[u8]) -> String {
    let digest = Sha256::digest(spki_der);
    format!(
        "sha256/{}",
        base64::engine::general_purpose::STANDARD.encode(digest)
    )
}

/// Fail closed unless some certificate in the presented chain matches a pin.
pub fn verify_pins(ssl: &SslRef, host: &str, pins: &[String]) -> Result<()> {
    let mut presented = Vec::new();
    if let Some(chain) = ssl.peer_cert_chain() {
        for cert in chain {
            if let Ok(der) = cert.public_key().and_then(|k| k.public_key_to_der()) {
                presented.push(spki_pin(&der));
            }
        }
    }
    if let Some(leaf) = ssl.peer_certificate() {
        if let Ok(der) = leaf.public_key().and_then(|k| k.public_key_to_der()) {
            presented.push(spki_pin(&der));
        }
    }
    match_pins(host, &presented, pins)
}

/// Pin check for transports that only expose the leaf certificate (QUIC).
pub fn verify_leaf_pins(leaf_der: Option<&[u8]>, host: &str, pins: &[String]) -> Result<()> {
    let presented: Vec<String> = leaf_der
        .and_then(|der| X509::from_der(der).ok())
        .and_then(|cert| cert.public_key().and_then(|k| k.public_key_to_der()).ok())
        .map(|der| vec![spki_pin(&der)])
        .unwrap_or_default();
    match_pins(host, &presented, pins)
}

/// Verify a DER chain (leaf first) against the system store plus `roots`,
/// for transports whose own verifier cannot take extra trust anchors.
pub fn verify_chain(chain: &[&[u8]], roots: &[Vec<u8>], host: &str) -> Result<()> {
    let invalid = |e: boring2::error::ErrorStack| Error::tls(format!("certificate verification for {} failed: {}", host, e));
    let (leaf, rest) = chain
        .split_first()
        .ok_or_else(|| Error::tls(format!("{} presented no certificate", host)))?;
    let leaf = X509::from_der(leaf).map_err(invalid)?;
    let mut intermediates = Stack::new().map_err(invalid)?;
    for der in rest {
        intermediates.push(X509::from_der(der).map_err(invalid)?).map_err(invalid)?;
    }

    let mut store = X509StoreBuilder::new().map_err(invalid)?;
    store.set_default_paths().map_err(invalid)?;
    for der_or_pem in roots {
        store.add_cert(load_root(der_or_pem)?).map_err(invalid)?;
    }
    let store = store.build();

    let mut ctx = X509StoreContext::new().map_err(invalid)?;
    let verified = ctx
        .init(&store, &leaf, &intermediates, |c| {
            match host.parse::<IpAddr>() {
                Ok(ip) => c.verify_param_mut().set_ip(ip)?,
                Err(_) => c.verify_param_mut().set_host(host)?,
            }
            if c.verify_cert()? {
                Ok(None)
            } else {
                Ok(Some(c.verify_result().err()))
            }
        })
        .map_err(invalid)?;
    match verified {
        None => Ok(()),
        Some(reason) => Err(Error::tls(format!(
            "certificate verification for {} failed: {}",
            host,
            reason.map(|r| r.to_string()).unwrap_or_else(|| "unknown error".to_string())
        ))),
    }
}

fn match_pins(host: &str, presented: &[String], pins: &[String]) -> Result<()> {
    let wanted: Vec<&str> = pins
        .iter()
        .map(|p| p.trim())
        .map(|p| p.strip_prefix("sha256/").unwrap_or(p))
        .collect();
    let matched = presented.iter().any(|pin| {
        let hash = pin.trim_start_matches("sha256/");
        wanted.contains(&hash)
    });
    if matched {
        Ok(())
    } else {
        tracing::debug!(host, ?presented, "certificate pin mismatch");
        Err(Error::PinMismatch {
            host: host.to_string(),
        })
    }
}

/// Stream that can be either plain TCP or TLS over TCP.
#[derive(Debug)]
pub enum MaybeTlsStream {
    Plain(TcpStream),
    Tls(SslStream<TcpStream>),
}

impl MaybeTlsStream {
    /// Protocol agreed via ALPN; plain streams and servers that skip ALPN
    /// speak HTTP/1.1.
    pub fn negotiated_protocol(&self) -> Protocol {
        match self {
            MaybeTlsStream::Plain(_) => Protocol::Http1,
            MaybeTlsStream::Tls(stream) => {
                Protocol::from_alpn(stream.ssl().selected_alpn_protocol())
            }
        }
    }
}

impl AsyncRead for MaybeTlsStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match &mut *self {
            MaybeTlsStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            MaybeTlsStream::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeTlsStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match &mut *self {
            MaybeTlsStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            MaybeTlsStream::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match &mut *self {
            MaybeTlsStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            MaybeTlsStream::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match &mut *self {
            MaybeTlsStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            MaybeTlsStream::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}
