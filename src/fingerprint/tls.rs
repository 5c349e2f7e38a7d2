//! TLS ClientHello fingerprint: ordered cipher suites, extensions, groups and
//! signature algorithms, plus the BoringSSL names used to configure them.

use serde::{Deserialize, Serialize};

use super::ja3::Ja3;

/// Placeholder written in descriptors wherever a GREASE value goes. The
/// handshake engine substitutes a random reserved value per connection.
pub const GREASE_PLACEHOLDER: u16 = 0x0a0a;

/// Extension ids with engine-side behavior attached.
pub mod ext {
    pub const SERVER_NAME: u16 = 0;
    pub const STATUS_REQUEST: u16 = 5;
    pub const SUPPORTED_GROUPS: u16 = 10;
    pub const EC_POINT_FORMATS: u16 = 11;
    pub const SIGNATURE_ALGORITHMS: u16 = 13;
    pub const ALPN: u16 = 16;
    pub const SIGNED_CERT_TIMESTAMP: u16 = 18;
    pub const PADDING: u16 = 21;
    pub const COMPRESS_CERTIFICATE: u16 = 27;
    pub const RECORD_SIZE_LIMIT: u16 = 28;
    pub const DELEGATED_CREDENTIALS: u16 = 34;
    pub const SESSION_TICKET: u16 = 35;
    pub const PRE_SHARED_KEY: u16 = 41;
    pub const SUPPORTED_VERSIONS: u16 = 43;
    pub const KEY_SHARE: u16 = 51;
    pub const APPLICATION_SETTINGS: u16 = 17513;
    pub const APPLICATION_SETTINGS_NEW: u16 = 17613;
    pub const ENCRYPTED_CLIENT_HELLO: u16 = 65037;
    pub const RENEGOTIATION_INFO: u16 = 65281;
}

/// Whether a value is one of the sixteen RFC 8701 GREASE code points.
pub fn is_grease(value: u16) -> bool {
    (value & 0x0f0f) == 0x0a0a && (value >> 8) == (value & 0xff)
}

const CIPHER_NAMES: &[(u16, &str)] = &[
    (0x1301, "TLS_AES_128_GCM_SHA256"),
    (0x1302, "TLS_AES_256_GCM_SHA384"),
    (0x1303, "TLS_CHACHA20_POLY1305_SHA256"),
    (0xc02b, "ECDHE-ECDSA-AES128-GCM-SHA256"),
    (0xc02f, "ECDHE-RSA-AES128-GCM-SHA256"),
    (0xc02c, "ECDHE-ECDSA-AES256-GCM-SHA384"),
    (0xc030, "ECDHE-RSA-AES256-GCM-SHA384"),
    (0xcca9, "ECDHE-ECDSA-CHACHA20-POLY1305"),
    (0xcca8, "ECDHE-RSA-CHACHA20-POLY1305"),
    (0xc009, "ECDHE-ECDSA-AES128-SHA"),
    (0xc00a, "ECDHE-ECDSA-AES256-SHA"),
    (0xc013, "ECDHE-RSA-AES128-SHA"),
    (0xc014, "ECDHE-RSA-AES256-SHA"),
    (0x009c, "AES128-GCM-SHA256"),
    (0x009d, "AES256-GCM-SHA384"),
    (0x002f, "AES128-SHA"),
    (0x0035, "AES256-SHA"),
    (0x000a, "DES-CBC3-SHA"),
];

const GROUP_NAMES: &[(u16, &str)] = &[
    (29, "X25519"),
    (23, "P-256"),
    (24, "P-384"),
    (25, "P-521"),
    (4588, "X25519MLKEM768"),
    (25497, "X25519Kyber768Draft00"),
];

const SIGALG_NAMES: &[(u16, &str)] = &[
    (0x0403, "ecdsa_secp256r1_sha256"),
    (0x0503, "ecdsa_secp384r1_sha384"),
    (0x0603, "ecdsa_secp521r1_sha512"),
    (0x0804, "rsa_pss_rsae_sha256"),
    (0x0805, "rsa_pss_rsae_sha384"),
    (0x0806, "rsa_pss_rsae_sha512"),
    (0x0401, "rsa_pkcs1_sha256"),
    (0x0501, "rsa_pkcs1_sha384"),
    (0x0601, "rsa_pkcs1_sha512"),
    (0x0807, "ed25519"),
    (0x0203, "ecdsa_sha1"),
    (0x0201, "rsa_pkcs1_sha1"),
];

fn lookup(table: &[(u16, &'static str)], id: u16) -> Option<&'static str> {
    table.iter().find(|(k, _)| *k == id).map(|(_, v)| *v)
}

fn reverse_lookup(table: &[(u16, &'static str)], name: &str) -> Option<u16> {
    table
        .iter()
        .find(|(_, v)| v.eq_ignore_ascii_case(name))
        .map(|(k, _)| *k)
}

/// Resolve a cipher suite id to its BoringSSL name.
pub fn cipher_name(id: u16) -> Option<&'static str> {
    lookup(CIPHER_NAMES, id)
}

/// Resolve a supported-group id to its BoringSSL name.
pub fn group_name(id: u16) -> Option<&'static str> {
    lookup(GROUP_NAMES, id)
}

/// Resolve a signature scheme id to its BoringSSL name.
pub fn sigalg_name(id: u16) -> Option<&'static str> {
    lookup(SIGALG_NAMES, id)
}

/// Parse a curve given either as a number or a name (`X25519`, `P256`,
/// `GREASE`, ...), the two forms `keyShareCurves` accepts.
pub fn parse_group(name: &str) -> Option<u16> {
    if let Ok(id) = name.parse::<u16>() {
        return Some(id);
    }
    match name.to_ascii_uppercase().as_str() {
        "GREASE" => Some(GREASE_PLACEHOLDER),
        "P256" => Some(23),
        "P384" => Some(24),
        "P521" => Some(25),
        "X25519MLKEM768" => Some(4588),
        "X25519KYBER768" => Some(25497),
        _ => reverse_lookup(GROUP_NAMES, name),
    }
}

/// Parse a signature scheme given as a number or an IANA-style name.
/// `PKCS1WithSHA256`-style names are accepted too.
pub fn parse_sigalg(name: &str) -> Option<u16> {
    if let Ok(id) = name.parse::<u16>() {
        return Some(id);
    }
    let id = match name {
        "ECDSAWithP256AndSHA256" => 0x0403,
        "ECDSAWithP384AndSHA384" => 0x0503,
        "ECDSAWithP521AndSHA512" => 0x0603,
        "PSSWithSHA256" => 0x0804,
        "PSSWithSHA384" => 0x0805,
        "PSSWithSHA512" => 0x0806,
        "PKCS1WithSHA256" => 0x0401,
        "PKCS1WithSHA384" => 0x0501,
        "PKCS1WithSHA512" => 0x0601,
        "Ed25519" => 0x0807,
        "ECDSAWithSHA1" => 0x0203,
        "PKCS1WithSHA1" => 0x0201,
        other => return reverse_lookup(SIGALG_NAMES, other),
    };
    Some(id)
}

/// Parse a protocol version given as a number or as `GREASE`, `1.3`, `1.2`.
pub fn parse_version(name: &str) -> Option<u16> {
    if let Ok(id) = name.parse::<u16>() {
        return Some(id);
    }
    match name {
        "GREASE" => Some(GREASE_PLACEHOLDER),
        "1.3" => Some(0x0304),
        "1.2" => Some(0x0303),
        "1.1" => Some(0x0302),
        "1.0" => Some(0x0301),
        _ => None,
    }
}

/// Certificate compression algorithms (RFC 8879).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertCompression {
    Zlib,
    Brotli,
    Zstd,
}

impl CertCompression {
    /// IANA algorithm id.
    pub fn id(&self) -> u16 {
        match self {
            Self::Zlib => 1,
            Self::Brotli => 2,
            Self::Zstd => 3,
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "zlib" => Some(Self::Zlib),
            "brotli" => Some(Self::Brotli),
            "zstd" => Some(Self::Zstd),
            _ => None,
        }
    }
}

/// Encrypted Client Hello candidates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct EchCandidates {
    /// Candidate payload lengths for GREASE ECH.
    pub payload_lengths: Vec<u16>,
    /// `(kdf_id, aead_id)` pairs.
    pub cipher_suites: Vec<(u16, u16)>,
}

/// TLS ClientHello fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TlsFingerprint {
    /// Cipher suites in order, GREASE placeholders included.
    pub cipher_suites: Vec<u16>,
    /// Extension ids in the order the browser sends them.
    pub extensions: Vec<u16>,
    /// `supported_versions` entries.
    pub supported_versions: Vec<u16>,
    pub signature_algorithms: Vec<u16>,
    /// Signature schemes advertised for delegated credentials.
    pub delegated_credentials: Vec<u16>,
    /// `supported_groups` entries.
    pub supported_groups: Vec<u16>,
    /// Groups that carry a key share.
    pub key_share_curves: Vec<u16>,
    pub point_formats: Vec<u8>,
    pub cert_compression: Vec<CertCompression>,
    pub alpn: Vec<String>,
    pub alps: Vec<String>,
    pub record_size_limit: Option<u16>,
    /// The browser shuffles its extension order per connection.
    pub permute_extensions: bool,
    pub ech: Option<EchCandidates>,
}

impl Default for TlsFingerprint {
    fn default() -> Self {
        Self {
            cipher_suites: Vec::new(),
            extensions: Vec::new(),
            supported_versions: vec![0x0304, 0x0303],
            signature_algorithms: Vec::new(),
            delegated_credentials: Vec::new(),
            supported_groups: Vec::new(),
            key_share_curves: Vec::new(),
            point_formats: vec![0],
            cert_compression: Vec::new(),
            alpn: vec!["h2".into(), "http/1.1".into()],
            alps: Vec::new(),
            record_size_limit: None,
            permute_extensions: false,
            ech: None,
        }
    }
}

impl TlsFingerprint {
    /// GREASE is on when any ordered list carries a GREASE value.
    pub fn grease(&self) -> bool {
        self.cipher_suites
            .iter()
            .chain(&self.extensions)
            .chain(&self.supported_groups)
            .chain(&self.supported_versions)
            .any(|v| is_grease(*v))
    }

    pub fn has_extension(&self, id: u16) -> bool {
        self.extensions.contains(&id)
    }

    /// Session resumption via pre-shared keys (extension 41).
    pub fn uses_psk(&self) -> bool {
        self.has_extension(ext::PRE_SHARED_KEY)
    }

    /// Lowest and highest non-GREASE versions, defaulting to TLS 1.2..1.3.
    pub fn version_range(&self) -> (u16, u16) {
        let real = self.supported_versions.iter().filter(|v| !is_grease(**v));
        let min = real.clone().min().copied().unwrap_or(0x0303);
        let max = real.max().copied().unwrap_or(0x0304);
        (min, max)
    }

    /// BoringSSL cipher string in descriptor order, TLS 1.3 suites included.
    ///
    /// Unknown suites are skipped and reported in the second element.
    /// BoringSSL always writes the TLS 1.3 suites ahead of the older ones.
    pub fn cipher_list(&self) -> (String, Vec<u16>) {
        names_for(&self.cipher_suites, cipher_name)
    }

    /// BoringSSL curves string in descriptor order.
    pub fn curves_list(&self) -> (String, Vec<u16>) {
        names_for(&self.supported_groups, group_name)
    }

    /// BoringSSL signature algorithm string in descriptor order.
    pub fn sigalgs_list(&self) -> (String, Vec<u16>) {
        names_for(&self.signature_algorithms, sigalg_name)
    }

    /// ALPN protocols in wire format (length-prefixed).
    pub fn alpn_wire(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for proto in &self.alpn {
            out.push(proto.len() as u8);
            out.extend_from_slice(proto.as_bytes());
        }
        out
    }

    /// Overwrite the lists a JA3 string describes.
    pub fn apply_ja3(&mut self, ja3: &Ja3) {
        self.cipher_suites = ja3.cipher_suites.clone();
        self.extensions = ja3.extensions.clone();
        self.supported_groups = ja3.curves.clone();
        self.point_formats = ja3.point_formats.clone();
        // A JA3 string pins the extension order.
        self.permute_extensions = false;
        if ja3.version == 0x0303 && !self.extensions.contains(&ext::SUPPORTED_VERSIONS) {
            self.supported_versions = vec![0x0303];
        }
    }

    /// JA3 string of this fingerprint, GREASE excluded.
    pub fn ja3_string(&self) -> String {
        // legacy_version is capped at TLS 1.2
        Ja3 {
            version: self.version_range().1.min(0x0303),
            cipher_suites: self.cipher_suites.clone(),
            extensions: self.extensions.clone(),
            curves: self.supported_groups.clone(),
            point_formats: self.point_formats.clone(),
        }
        .to_string()
    }
}

fn names_for(ids: &[u16], name: fn(u16) -> Option<&'static str>) -> (String, Vec<u16>) {
    let mut names = Vec::new();
    let mut skipped = Vec::new();
    for id in ids.iter().copied().filter(|v| !is_grease(*v)) {
        match name(id) {
            Some(n) => names.push(n),
            None => skipped.push(id),
        }
    }
    (names.join(":"), skipped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grease_values() {
        assert!(is_grease(0x0a0a));
        assert!(is_grease(0xfafa));
        assert!(!is_grease(0x0a1a));
        assert!(!is_grease(0x1301));
    }

    #[test]
    fn cipher_list_keeps_order() {
        let fp = TlsFingerprint {
            cipher_suites: vec![GREASE_PLACEHOLDER, 0x1301, 0x1303, 0x1302, 0xc02f, 0xc02b, 0x00ff],
            ..Default::default()
        };
        let (list, skipped) = fp.cipher_list();
        assert_eq!(
            list,
            "TLS_AES_128_GCM_SHA256:TLS_CHACHA20_POLY1305_SHA256:TLS_AES_256_GCM_SHA384:\
             ECDHE-RSA-AES128-GCM-SHA256:ECDHE-ECDSA-AES128-GCM-SHA256"
        );
        assert_eq!(skipped, vec![0x00ff]);
        assert!(fp.grease());
    }

    #[test]
    fn version_range_ignores_grease() {
        let fp = TlsFingerprint {
            supported_versions: vec![GREASE_PLACEHOLDER, 0x0304, 0x0303, 0x0302],
            ..Default::default()
        };
        assert_eq!(fp.version_range(), (0x0302, 0x0304));
    }

    #[test]
    fn parses_named_values() {
        assert_eq!(parse_group("X25519"), Some(29));
        assert_eq!(parse_group("P256"), Some(23));
        assert_eq!(parse_group("GREASE"), Some(GREASE_PLACEHOLDER));
        assert_eq!(parse_sigalg("PSSWithSHA256"), Some(0x0804));
        assert_eq!(parse_version("1.3"), Some(0x0304));
        assert_eq!(CertCompression::parse("Brotli"), Some(CertCompression::Brotli));
    }

    #[test]
    fn alpn_wire_format() {
        let fp = TlsFingerprint::default();
        assert_eq!(fp.alpn_wire(), b"\x02h2\x08http/1.1".to_vec());
    }
}
