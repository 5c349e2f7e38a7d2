//! Impersonation profile catalog.
//!
//! Each profile is one row of [`PROFILES`] pointing at shared TLS, HTTP/2 and
//! HTTP/3 templates. Browsers of the same family share templates; a new
//! profile is a new row.

use std::collections::HashMap;
use std::sync::OnceLock;

use super::http2::{Http2Fingerprint, PriorityFrame, PriorityParam, PseudoHeader};
use super::http3::Http3Fingerprint;
use super::tls::{CertCompression, EchCandidates, TlsFingerprint, GREASE_PLACEHOLDER as G};
use super::FingerprintDescriptor;
use crate::error::{Error, Result};

/// Profile used when the caller names none.
pub const DEFAULT_PROFILE: &str = "chrome_146";

struct TlsTemplate {
    ciphers: &'static [u16],
    extensions: &'static [u16],
    versions: &'static [u16],
    sigalgs: &'static [u16],
    delegated: &'static [u16],
    groups: &'static [u16],
    key_shares: &'static [u16],
    cert_compression: &'static [CertCompression],
    alpn: &'static [&'static str],
    alps: &'static [&'static str],
    record_size_limit: Option<u16>,
    permute: bool,
}

struct H2Template {
    settings: &'static [(u16, u32)],
    connection_flow: u32,
    header_priority: Option<PriorityParam>,
    priority_frames: &'static [PriorityFrame],
    pseudo: &'static [PseudoHeader],
}

struct H3Template {
    settings: &'static [(u64, u64)],
    pseudo: &'static [PseudoHeader],
    priority_param: Option<u32>,
    grease: bool,
}

struct ProfileRow {
    name: &'static str,
    tls: &'static TlsTemplate,
    http2: &'static H2Template,
    http3: Option<&'static H3Template>,
    user_agent: &'static str,
}

use super::http2::PseudoHeader::{Authority as A, Method as M, Path as P, Scheme as S};

const MASP: &[PseudoHeader] = &[M, A, S, P];
const MPAS: &[PseudoHeader] = &[M, P, A, S];
const MSPA: &[PseudoHeader] = &[M, S, P, A];
const MSAP: &[PseudoHeader] = &[M, S, A, P];

// ---- Chrome -----------------------------------------------------------------

const CHROME_CIPHERS: &[u16] = &[
    G, 4865, 4866, 4867, 49195, 49199, 49196, 49200, 52393, 52392, 49171, 49172, 156, 157, 47, 53,
];
const CHROME_SIGALGS: &[u16] = &[1027, 2052, 1025, 1283, 2053, 1281, 2054, 1537];
const CHROME_VERSIONS: &[u16] = &[G, 772, 771];
const CHROME_ALPN: &[&str] = &["h2", "http/1.1"];

const fn chrome_tls(extensions: &'static [u16], groups: &'static [u16], key_shares: &'static [u16], permute: bool) -> TlsTemplate {
    TlsTemplate {
        ciphers: CHROME_CIPHERS,
        extensions,
        versions: CHROME_VERSIONS,
        sigalgs: CHROME_SIGALGS,
        delegated: &[],
        groups,
        key_shares,
        cert_compression: &[CertCompression::Brotli],
        alpn: CHROME_ALPN,
        alps: &["h2"],
        record_size_limit: None,
        permute,
    }
}

static CHROME_103_TLS: TlsTemplate = chrome_tls(
    &[G, 0, 23, 65281, 10, 11, 35, 16, 5, 13, 18, 51, 45, 43, 27, 17513, G, 21],
    &[G, 29, 23, 24],
    &[G, 29],
    false,
);
static CHROME_110_TLS: TlsTemplate = chrome_tls(
    &[G, 0, 23, 65281, 10, 11, 35, 16, 5, 13, 18, 51, 45, 43, 27, 17513, G, 21],
    &[G, 29, 23, 24],
    &[G, 29],
    true,
);
static CHROME_116_PSK_TLS: TlsTemplate = chrome_tls(
    &[G, 0, 23, 65281, 10, 11, 35, 16, 5, 13, 18, 51, 45, 43, 27, 17513, G, 41],
    &[G, 29, 23, 24],
    &[G, 29],
    true,
);
static CHROME_116_PSK_PQ_TLS: TlsTemplate = chrome_tls(
    &[G, 0, 23, 65281, 10, 11, 35, 16, 5, 13, 18, 51, 45, 43, 27, 17513, G, 41],
    &[G, 25497, 29, 23, 24],
    &[G, 25497, 29],
    true,
);
static CHROME_117_TLS: TlsTemplate = chrome_tls(
    &[G, 0, 23, 65281, 10, 11, 35, 16, 5, 13, 18, 51, 45, 43, 27, 17513, 65037, G, 21],
    &[G, 29, 23, 24],
    &[G, 29],
    true,
);
static CHROME_124_TLS: TlsTemplate = chrome_tls(
    &[G, 0, 23, 65281, 10, 11, 35, 16, 5, 13, 18, 51, 45, 43, 27, 17513, 65037, G],
    &[G, 25497, 29, 23, 24],
    &[G, 25497, 29],
    true,
);
static CHROME_130_PSK_TLS: TlsTemplate = chrome_tls(
    &[G, 0, 23, 65281, 10, 11, 35, 16, 5, 13, 18, 51, 45, 43, 27, 17513, 65037, G, 41],
    &[G, 25497, 29, 23, 24],
    &[G, 25497, 29],
    true,
);
static CHROME_131_TLS: TlsTemplate = chrome_tls(
    &[G, 0, 23, 65281, 10, 11, 35, 16, 5, 13, 18, 51, 45, 43, 27, 17513, 65037, G],
    &[G, 4588, 29, 23, 24],
    &[G, 4588, 29],
    true,
);
static CHROME_131_PSK_TLS: TlsTemplate = chrome_tls(
    &[G, 0, 23, 65281, 10, 11, 35, 16, 5, 13, 18, 51, 45, 43, 27, 17513, 65037, G, 41],
    &[G, 4588, 29, 23, 24],
    &[G, 4588, 29],
    true,
);
static CHROME_133_TLS: TlsTemplate = chrome_tls(
    &[G, 0, 23, 65281, 10, 11, 35, 16, 5, 13, 18, 51, 45, 43, 27, 17613, 65037, G],
    &[G, 4588, 29, 23, 24],
    &[G, 4588, 29],
    true,
);
static CHROME_133_PSK_TLS: TlsTemplate = chrome_tls(
    &[G, 0, 23, 65281, 10, 11, 35, 16, 5, 13, 18, 51, 45, 43, 27, 17613, 65037, G, 41],
    &[G, 4588, 29, 23, 24],
    &[G, 4588, 29],
    true,
);

const CHROME_PRIORITY: Option<PriorityParam> = Some(PriorityParam {
    stream_dep: 0,
    exclusive: true,
    weight: 256,
});

static CHROME_103_H2: H2Template = H2Template {
    settings: &[(1, 65536), (3, 1000), (4, 6291456), (6, 262144)],
    connection_flow: 15663105,
    header_priority: CHROME_PRIORITY,
    priority_frames: &[],
    pseudo: MASP,
};
static CHROME_106_H2: H2Template = H2Template {
    settings: &[(1, 65536), (2, 0), (3, 1000), (4, 6291456), (6, 262144)],
    connection_flow: 15663105,
    header_priority: CHROME_PRIORITY,
    priority_frames: &[],
    pseudo: MASP,
};
static CHROME_117_H2: H2Template = H2Template {
    settings: &[(1, 65536), (2, 0), (4, 6291456), (6, 262144)],
    connection_flow: 15663105,
    header_priority: CHROME_PRIORITY,
    priority_frames: &[],
    pseudo: MASP,
};

static CHROME_H3: H3Template = H3Template {
    settings: &[(0x1, 65536), (0x6, 262144), (0x7, 100), (0x33, 1)],
    pseudo: MASP,
    priority_param: None,
    grease: true,
};

// ---- Firefox ----------------------------------------------------------------

const FIREFOX_CIPHERS: &[u16] = &[
    4865, 4867, 4866, 49195, 49199, 52393, 52392, 49196, 49200, 49162, 49161, 49171, 49172, 156,
    157, 47, 53,
];
const FIREFOX_SIGALGS: &[u16] = &[1027, 1283, 1539, 2052, 2053, 2054, 1025, 1281, 1537, 515, 513];
const FIREFOX_DELEGATED: &[u16] = &[1027, 1283, 1539, 515];

static FIREFOX_102_TLS: TlsTemplate = TlsTemplate {
    ciphers: FIREFOX_CIPHERS,
    extensions: &[0, 23, 65281, 10, 11, 35, 16, 5, 34, 51, 43, 13, 45, 28, 21],
    versions: &[772, 771],
    sigalgs: FIREFOX_SIGALGS,
    delegated: FIREFOX_DELEGATED,
    groups: &[29, 23, 24, 25, 256, 257],
    key_shares: &[29, 23],
    cert_compression: &[],
    alpn: CHROME_ALPN,
    alps: &[],
    record_size_limit: Some(0x4001),
    permute: false,
};
static FIREFOX_123_TLS: TlsTemplate = TlsTemplate {
    ciphers: FIREFOX_CIPHERS,
    extensions: &[0, 23, 65281, 10, 11, 35, 16, 5, 34, 51, 43, 13, 45, 28, 65037],
    versions: &[772, 771],
    sigalgs: FIREFOX_SIGALGS,
    delegated: FIREFOX_DELEGATED,
    groups: &[29, 23, 24, 25, 256, 257],
    key_shares: &[29, 23],
    cert_compression: &[],
    alpn: CHROME_ALPN,
    alps: &[],
    record_size_limit: Some(0x4001),
    permute: false,
};
static FIREFOX_132_TLS: TlsTemplate = TlsTemplate {
    ciphers: FIREFOX_CIPHERS,
    extensions: &[0, 23, 65281, 10, 11, 35, 16, 5, 34, 51, 43, 13, 45, 28, 27, 65037],
    versions: &[772, 771],
    sigalgs: FIREFOX_SIGALGS,
    delegated: FIREFOX_DELEGATED,
    groups: &[4588, 29, 23, 24, 25, 256, 257],
    key_shares: &[4588, 29, 23],
    cert_compression: &[CertCompression::Zlib, CertCompression::Brotli, CertCompression::Zstd],
    alpn: CHROME_ALPN,
    alps: &[],
    record_size_limit: Some(0x4001),
    permute: true,
};
static FIREFOX_146_PSK_TLS: TlsTemplate = TlsTemplate {
    ciphers: FIREFOX_CIPHERS,
    extensions: &[0, 23, 65281, 10, 11, 35, 16, 5, 34, 51, 43, 13, 45, 28, 27, 65037, 41],
    versions: &[772, 771],
    sigalgs: FIREFOX_SIGALGS,
    delegated: FIREFOX_DELEGATED,
    groups: &[4588, 29, 23, 24, 25, 256, 257],
    key_shares: &[4588, 29, 23],
    cert_compression: &[CertCompression::Zlib, CertCompression::Brotli, CertCompression::Zstd],
    alpn: CHROME_ALPN,
    alps: &[],
    record_size_limit: Some(0x4001),
    permute: true,
};

const fn firefox_priority(stream_dep: u32, weight: u16) -> PriorityParam {
    PriorityParam {
        stream_dep,
        exclusive: false,
        weight,
    }
}

const fn priority_frame(stream_id: u32, stream_dep: u32, weight: u16) -> PriorityFrame {
    PriorityFrame {
        stream_id,
        priority_param: firefox_priority(stream_dep, weight),
    }
}

static FIREFOX_102_H2: H2Template = H2Template {
    settings: &[(1, 65536), (4, 131072), (5, 16384)],
    connection_flow: 12517377,
    header_priority: Some(firefox_priority(13, 42)),
    priority_frames: &[
        priority_frame(3, 0, 201),
        priority_frame(5, 0, 101),
        priority_frame(7, 0, 1),
        priority_frame(9, 7, 1),
        priority_frame(11, 3, 1),
        priority_frame(13, 0, 241),
    ],
    pseudo: MPAS,
};
static FIREFOX_120_H2: H2Template = H2Template {
    settings: &[(1, 65536), (2, 0), (4, 131072), (5, 16384)],
    connection_flow: 12517377,
    header_priority: Some(firefox_priority(0, 42)),
    priority_frames: &[],
    pseudo: MPAS,
};

static FIREFOX_H3: H3Template = H3Template {
    settings: &[(0x1, 65536), (0x7, 20), (0x8, 1), (0x33, 1)],
    pseudo: MSAP,
    priority_param: Some(4),
    grease: false,
};

// ---- Safari -----------------------------------------------------------------

const SAFARI_CIPHERS: &[u16] = &[
    G, 4865, 4866, 4867, 49196, 49195, 52393, 49200, 49199, 52392, 49162, 49161, 49172, 49171,
    157, 156, 53, 47, 49160, 49170, 10,
];

static SAFARI_TLS: TlsTemplate = TlsTemplate {
    ciphers: SAFARI_CIPHERS,
    extensions: &[G, 0, 23, 65281, 10, 11, 16, 5, 13, 18, 51, 45, 43, 27, 21, G],
    versions: &[G, 772, 771, 770, 769],
    sigalgs: &[1027, 2052, 1025, 1283, 515, 2053, 1281, 2054, 1537, 513],
    delegated: &[],
    groups: &[G, 29, 23, 24, 25],
    key_shares: &[G, 29],
    cert_compression: &[CertCompression::Zlib],
    alpn: CHROME_ALPN,
    alps: &[],
    record_size_limit: None,
    permute: false,
};
static SAFARI_26_TLS: TlsTemplate = TlsTemplate {
    ciphers: SAFARI_CIPHERS,
    extensions: &[G, 0, 23, 65281, 10, 11, 16, 5, 13, 18, 51, 45, 43, 27, 21, G],
    versions: &[G, 772, 771],
    sigalgs: &[1027, 2052, 1025, 1283, 2053, 1281, 2054, 1537, 513],
    delegated: &[],
    groups: &[G, 4588, 29, 23, 24, 25],
    key_shares: &[G, 4588, 29],
    cert_compression: &[CertCompression::Zlib],
    alpn: CHROME_ALPN,
    alps: &[],
    record_size_limit: None,
    permute: false,
};

const SAFARI_PRIORITY: Option<PriorityParam> = Some(PriorityParam {
    stream_dep: 0,
    exclusive: false,
    weight: 255,
});

static SAFARI_15_H2: H2Template = H2Template {
    settings: &[(4, 4194304), (3, 100)],
    connection_flow: 10485760,
    header_priority: SAFARI_PRIORITY,
    priority_frames: &[],
    pseudo: MSPA,
};
static SAFARI_17_H2: H2Template = H2Template {
    settings: &[(2, 0), (4, 2097152), (3, 100)],
    connection_flow: 10485760,
    header_priority: SAFARI_PRIORITY,
    priority_frames: &[],
    pseudo: MSAP,
};
static SAFARI_18_H2: H2Template = H2Template {
    settings: &[(2, 0), (4, 2097152), (3, 100), (9, 1)],
    connection_flow: 10420225,
    header_priority: SAFARI_PRIORITY,
    priority_frames: &[],
    pseudo: MSAP,
};

// ---- OkHttp -----------------------------------------------------------------

static OKHTTP_LEGACY_TLS: TlsTemplate = TlsTemplate {
    ciphers: &[49195, 49196, 52393, 49199, 49200, 52392, 49171, 49172, 156, 157, 47, 53],
    extensions: &[0, 23, 65281, 10, 11, 35, 16, 5, 13, 21],
    versions: &[771, 770, 769],
    sigalgs: &[1027, 2052, 1025, 1283, 2053, 1281, 2054, 1537, 513],
    delegated: &[],
    groups: &[29, 23, 24],
    key_shares: &[],
    cert_compression: &[],
    alpn: CHROME_ALPN,
    alps: &[],
    record_size_limit: None,
    permute: false,
};
static OKHTTP_TLS: TlsTemplate = TlsTemplate {
    ciphers: &[
        4865, 4866, 4867, 49195, 49196, 52393, 49199, 49200, 52392, 49171, 49172, 156, 157, 47, 53,
    ],
    extensions: &[0, 23, 65281, 10, 11, 35, 16, 5, 13, 51, 45, 43, 21],
    versions: &[772, 771],
    sigalgs: &[1027, 2052, 1025, 1283, 2053, 1281, 2054, 1537, 513],
    delegated: &[],
    groups: &[29, 23, 24],
    key_shares: &[29],
    cert_compression: &[],
    alpn: CHROME_ALPN,
    alps: &[],
    record_size_limit: None,
    permute: false,
};
static OKHTTP_H2: H2Template = H2Template {
    settings: &[(4, 16777216)],
    connection_flow: 16711681,
    header_priority: None,
    priority_frames: &[],
    pseudo: MPAS,
};

// ---- User agents ------------------------------------------------------------

macro_rules! chrome_ua {
    ($v:literal) => {
        concat!(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/",
            $v,
            ".0.0.0 Safari/537.36"
        )
    };
}

macro_rules! firefox_ua {
    ($v:literal) => {
        concat!(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:",
            $v,
            ".0) Gecko/20100101 Firefox/",
            $v,
            ".0"
        )
    };
}

macro_rules! safari_ios_ua {
    ($os:literal, $v:literal) => {
        concat!(
            "Mozilla/5.0 (iPhone; CPU iPhone OS ",
            $os,
            " like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/",
            $v,
            " Mobile/15E148 Safari/604.1"
        )
    };
}

macro_rules! okhttp_ua {
    ($v:literal) => {
        concat!("okhttp/4.10.0 (Android ", $v, ")")
    };
}

macro_rules! opera_ua {
    ($chrome:literal, $v:literal) => {
        concat!(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/",
            $chrome,
            ".0.0.0 Safari/537.36 OPR/",
            $v,
            ".0.0.0"
        )
    };
}

macro_rules! row {
    ($name:literal, $tls:expr, $h2:expr, $h3:expr, $ua:expr) => {
        ProfileRow {
            name: $name,
            tls: &$tls,
            http2: &$h2,
            http3: $h3,
            user_agent: $ua,
        }
    };
}

static PROFILES: &[ProfileRow] = &[
    row!("chrome_103", CHROME_103_TLS, CHROME_103_H2, None, chrome_ua!("103")),
    row!("chrome_104", CHROME_103_TLS, CHROME_103_H2, None, chrome_ua!("104")),
    row!("chrome_105", CHROME_103_TLS, CHROME_103_H2, None, chrome_ua!("105")),
    row!("chrome_106", CHROME_103_TLS, CHROME_106_H2, None, chrome_ua!("106")),
    row!("chrome_107", CHROME_103_TLS, CHROME_106_H2, None, chrome_ua!("107")),
    row!("chrome_108", CHROME_103_TLS, CHROME_106_H2, None, chrome_ua!("108")),
    row!("chrome_109", CHROME_103_TLS, CHROME_106_H2, None, chrome_ua!("109")),
    row!("chrome_110", CHROME_110_TLS, CHROME_106_H2, None, chrome_ua!("110")),
    row!("chrome_111", CHROME_110_TLS, CHROME_106_H2, None, chrome_ua!("111")),
    row!("chrome_112", CHROME_110_TLS, CHROME_106_H2, None, chrome_ua!("112")),
    row!("chrome_116_PSK", CHROME_116_PSK_TLS, CHROME_106_H2, None, chrome_ua!("116")),
    row!("chrome_116_PSK_PQ", CHROME_116_PSK_PQ_TLS, CHROME_106_H2, None, chrome_ua!("116")),
    row!("chrome_117", CHROME_117_TLS, CHROME_117_H2, None, chrome_ua!("117")),
    row!("chrome_120", CHROME_117_TLS, CHROME_117_H2, Some(&CHROME_H3), chrome_ua!("120")),
    row!("chrome_124", CHROME_124_TLS, CHROME_117_H2, Some(&CHROME_H3), chrome_ua!("124")),
    row!("chrome_130_PSK", CHROME_130_PSK_TLS, CHROME_117_H2, Some(&CHROME_H3), chrome_ua!("130")),
    row!("chrome_131", CHROME_131_TLS, CHROME_117_H2, Some(&CHROME_H3), chrome_ua!("131")),
    row!("chrome_131_PSK", CHROME_131_PSK_TLS, CHROME_117_H2, Some(&CHROME_H3), chrome_ua!("131")),
    row!("chrome_133", CHROME_133_TLS, CHROME_117_H2, Some(&CHROME_H3), chrome_ua!("133")),
    row!("chrome_133_PSK", CHROME_133_PSK_TLS, CHROME_117_H2, Some(&CHROME_H3), chrome_ua!("133")),
    row!("chrome_144", CHROME_133_TLS, CHROME_117_H2, Some(&CHROME_H3), chrome_ua!("144")),
    row!("chrome_144_PSK", CHROME_133_PSK_TLS, CHROME_117_H2, Some(&CHROME_H3), chrome_ua!("144")),
    row!("chrome_146", CHROME_133_TLS, CHROME_117_H2, Some(&CHROME_H3), chrome_ua!("146")),
    row!("chrome_146_PSK", CHROME_133_PSK_TLS, CHROME_117_H2, Some(&CHROME_H3), chrome_ua!("146")),
    row!("opera_89", CHROME_103_TLS, CHROME_103_H2, None, opera_ua!("103", "89")),
    row!("opera_90", CHROME_103_TLS, CHROME_103_H2, None, opera_ua!("104", "90")),
    row!("opera_91", CHROME_103_TLS, CHROME_106_H2, None, opera_ua!("105", "91")),
    row!("firefox_102", FIREFOX_102_TLS, FIREFOX_102_H2, None, firefox_ua!("102")),
    row!("firefox_104", FIREFOX_102_TLS, FIREFOX_102_H2, None, firefox_ua!("104")),
    row!("firefox_105", FIREFOX_102_TLS, FIREFOX_102_H2, None, firefox_ua!("105")),
    row!("firefox_106", FIREFOX_102_TLS, FIREFOX_102_H2, None, firefox_ua!("106")),
    row!("firefox_108", FIREFOX_102_TLS, FIREFOX_102_H2, None, firefox_ua!("108")),
    row!("firefox_110", FIREFOX_102_TLS, FIREFOX_102_H2, None, firefox_ua!("110")),
    row!("firefox_117", FIREFOX_102_TLS, FIREFOX_102_H2, None, firefox_ua!("117")),
    row!("firefox_120", FIREFOX_102_TLS, FIREFOX_120_H2, None, firefox_ua!("120")),
    row!("firefox_123", FIREFOX_123_TLS, FIREFOX_120_H2, Some(&FIREFOX_H3), firefox_ua!("123")),
    row!("firefox_132", FIREFOX_132_TLS, FIREFOX_120_H2, Some(&FIREFOX_H3), firefox_ua!("132")),
    row!("firefox_133", FIREFOX_132_TLS, FIREFOX_120_H2, Some(&FIREFOX_H3), firefox_ua!("133")),
    row!("firefox_135", FIREFOX_132_TLS, FIREFOX_120_H2, Some(&FIREFOX_H3), firefox_ua!("135")),
    row!("firefox_146_PSK", FIREFOX_146_PSK_TLS, FIREFOX_120_H2, Some(&FIREFOX_H3), firefox_ua!("146")),
    row!("firefox_147", FIREFOX_132_TLS, FIREFOX_120_H2, Some(&FIREFOX_H3), firefox_ua!("147")),
    row!("firefox_147_PSK", FIREFOX_146_PSK_TLS, FIREFOX_120_H2, Some(&FIREFOX_H3), firefox_ua!("147")),
    row!(
        "safari_15_6_1",
        SAFARI_TLS,
        SAFARI_15_H2,
        None,
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/15.6.1 Safari/605.1.15"
    ),
    row!(
        "safari_16_0",
        SAFARI_TLS,
        SAFARI_15_H2,
        None,
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.0 Safari/605.1.15"
    ),
    row!(
        "safari_ipad_15_6",
        SAFARI_TLS,
        SAFARI_15_H2,
        None,
        "Mozilla/5.0 (iPad; CPU OS 15_6 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/15.6 Mobile/15E148 Safari/604.1"
    ),
    row!("safari_ios_15_5", SAFARI_TLS, SAFARI_15_H2, None, safari_ios_ua!("15_5", "15.5")),
    row!("safari_ios_15_6", SAFARI_TLS, SAFARI_15_H2, None, safari_ios_ua!("15_6", "15.6")),
    row!("safari_ios_16_0", SAFARI_TLS, SAFARI_15_H2, None, safari_ios_ua!("16_0", "16.0")),
    row!("safari_ios_17_0", SAFARI_TLS, SAFARI_17_H2, None, safari_ios_ua!("17_0", "17.0")),
    row!("safari_ios_18_0", SAFARI_TLS, SAFARI_18_H2, None, safari_ios_ua!("18_0", "18.0")),
    row!("safari_ios_18_5", SAFARI_TLS, SAFARI_18_H2, None, safari_ios_ua!("18_5", "18.5")),
    row!("safari_ios_26_0", SAFARI_26_TLS, SAFARI_18_H2, None, safari_ios_ua!("18_6", "26.0")),
    row!("okhttp4_android_7", OKHTTP_LEGACY_TLS, OKHTTP_H2, None, okhttp_ua!("7")),
    row!("okhttp4_android_8", OKHTTP_LEGACY_TLS, OKHTTP_H2, None, okhttp_ua!("8")),
    row!("okhttp4_android_9", OKHTTP_LEGACY_TLS, OKHTTP_H2, None, okhttp_ua!("9")),
    row!("okhttp4_android_10", OKHTTP_TLS, OKHTTP_H2, None, okhttp_ua!("10")),
    row!("okhttp4_android_11", OKHTTP_TLS, OKHTTP_H2, None, okhttp_ua!("11")),
    row!("okhttp4_android_12", OKHTTP_TLS, OKHTTP_H2, None, okhttp_ua!("12")),
    row!("okhttp4_android_13", OKHTTP_TLS, OKHTTP_H2, None, okhttp_ua!("13")),
];

impl ProfileRow {
    fn descriptor(&self) -> FingerprintDescriptor {
        let t = self.tls;
        let ech = t
            .extensions
            .contains(&super::tls::ext::ENCRYPTED_CLIENT_HELLO)
            .then(|| EchCandidates {
                payload_lengths: vec![128, 160, 192, 224],
                cipher_suites: vec![(1, 1), (1, 3)],
            });
        let tls = TlsFingerprint {
            cipher_suites: t.ciphers.to_vec(),
            extensions: t.extensions.to_vec(),
            supported_versions: t.versions.to_vec(),
            signature_algorithms: t.sigalgs.to_vec(),
            delegated_credentials: t.delegated.to_vec(),
            supported_groups: t.groups.to_vec(),
            key_share_curves: t.key_shares.to_vec(),
            point_formats: vec![0],
            cert_compression: t.cert_compression.to_vec(),
            alpn: t.alpn.iter().map(|s| s.to_string()).collect(),
            alps: t.alps.iter().map(|s| s.to_string()).collect(),
            record_size_limit: t.record_size_limit,
            permute_extensions: t.permute,
            ech,
        };
        let h = self.http2;
        let http2 = Http2Fingerprint {
            settings: h.settings.to_vec(),
            connection_flow: h.connection_flow,
            header_priority: h.header_priority,
            priority_frames: h.priority_frames.to_vec(),
            pseudo_header_order: h.pseudo.to_vec(),
        };
        let http3 = self.http3.map(|h3| Http3Fingerprint {
            settings: h3.settings.to_vec(),
            pseudo_header_order: h3.pseudo.to_vec(),
            priority_param: h3.priority_param,
            send_grease_frames: h3.grease,
        });
        FingerprintDescriptor {
            tls,
            http2,
            http3,
            user_agent: Some(self.user_agent.to_string()),
        }
    }
}

/// Read-only map from profile identifier to descriptor.
pub struct ProfileCatalog {
    rows: HashMap<&'static str, &'static ProfileRow>,
}

impl ProfileCatalog {
    /// The process-wide catalog.
    pub fn global() -> &'static ProfileCatalog {
        static CATALOG: OnceLock<ProfileCatalog> = OnceLock::new();
        CATALOG.get_or_init(|| ProfileCatalog {
            rows: PROFILES.iter().map(|row| (row.name, row)).collect(),
        })
    }

    pub fn resolve(&self, name: &str) -> Result<FingerprintDescriptor> {
        self.rows
            .get(name)
            .map(|row| row.descriptor())
            .ok_or_else(|| Error::ProfileNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.rows.contains_key(name)
    }

    /// Every identifier, in table order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> {
        PROFILES.iter().map(|row| row.name)
    }
}
