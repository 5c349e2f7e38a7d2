//! Negotiated HTTP protocol.

use std::fmt;

/// Protocol a response was exchanged over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Http1,
    Http2,
    Http3,
}

impl Protocol {
    /// Wire name reported as `usedProtocol`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http1 => "HTTP/1.1",
            Self::Http2 => "HTTP/2.0",
            Self::Http3 => "HTTP/3.0",
        }
    }

    /// ALPN identifier for this protocol.
    pub fn alpn_id(&self) -> &'static str {
        match self {
            Self::Http1 => "http/1.1",
            Self::Http2 => "h2",
            Self::Http3 => "h3",
        }
    }

    /// Map a negotiated ALPN value back to a protocol. Absent or unknown ALPN
    /// means HTTP/1.1.
    pub fn from_alpn(alpn: Option<&[u8]>) -> Self {
        match alpn {
            Some(b"h2") => Self::Http2,
            Some(b"h3") => Self::Http3,
            _ => Self::Http1,
        }
    }

    /// Check if this protocol multiplexes requests over one connection.
    pub fn supports_multiplexing(&self) -> bool {
        matches!(self, Self::Http2 | Self::Http3)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
