//! Transport fingerprints and the impersonation profile catalog.

pub mod client_hello;
pub mod http2;
pub mod http3;
pub mod ja3;
pub mod profiles;
pub mod tls;

use sha2::{Digest, Sha256};

pub use client_hello::ClientHello;
pub use http2::{Http2Fingerprint, PriorityFrame, PriorityParam, PseudoHeader};
pub use http3::Http3Fingerprint;
pub use ja3::Ja3;
pub use profiles::{ProfileCatalog, DEFAULT_PROFILE};
pub use tls::{CertCompression, TlsFingerprint};

use crate::error::Result;

/// Everything that shapes how a connection looks on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FingerprintDescriptor {
    pub tls: TlsFingerprint,
    pub http2: Http2Fingerprint,
    /// `None` for clients that never speak HTTP/3.
    pub http3: Option<Http3Fingerprint>,
    /// Default `User-Agent` of the impersonated browser.
    pub user_agent: Option<String>,
}

impl FingerprintDescriptor {
    pub fn validate(&self) -> Result<()> {
        self.http2.validate()?;
        if let Some(h3) = &self.http3 {
            h3.validate()?;
        }
        Ok(())
    }

    /// Stable key over every fingerprint-affecting field. Connections are
    /// only reused between requests with equal keys.
    pub fn fingerprint_key(&self) -> u64 {
        let digest = Sha256::digest(format!("{:?}", self).as_bytes());
        let mut key = [0u8; 8];
        key.copy_from_slice(&digest[..8]);
        u64::from_be_bytes(key)
    }
}
