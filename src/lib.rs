//! # Masquerade
//!
//! HTTP client that impersonates real browsers and mobile HTTP stacks on the
//! wire.
//!
//! Each request is bound to a named profile that fixes the TLS ClientHello
//! (JA3/JA4), the HTTP/2 SETTINGS and priority layout, and the HTTP/3
//! transport parameters. HTTP/1.1, HTTP/2 and HTTP/3 run over BoringSSL;
//! sessions keep cookies and warm connections across calls.
//!
//! ```no_run
//! # async fn demo() -> masquerade::Result<()> {
//! use masquerade::{Client, ClientOptions};
//!
//! let client = Client::new();
//! let response = client
//!     .get("https://example.com/", ClientOptions::new().impersonate("firefox_135"))
//!     .await?;
//! println!("{} over {}", response.status, response.used_protocol);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod cookie;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod normalize;
pub mod pool;
pub mod registry;
pub mod response;
pub mod transport;
pub mod version;

pub use client::{Client, Session};
pub use cookie::{Cookie, CookieEntry, CookieJar};
pub use descriptor::{CustomTlsClient, HeaderFields, RequestDescriptor, ResponseDescriptor, TransportOptions};
pub use engine::{Engine, EngineConfig};
pub use error::{Error, Result};
pub use fingerprint::{FingerprintDescriptor, ProfileCatalog, DEFAULT_PROFILE};
pub use normalize::{
    build_request_descriptor, format_response, ClientOptions, RawOptions, RequestBody, ResponseType,
};
pub use response::{ResponseData, TlsResponse};
pub use version::Protocol;
