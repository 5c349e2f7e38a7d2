//! HTTP/3 over QUIC (quiche).
//!
//! quiche links its own BoringSSL, so the QUIC ClientHello is quiche's
//! default rather than the profile's. HTTP/3 SETTINGS, pseudo-header order,
//! priority and GREASE frames come from the profile's
//! [`Http3Fingerprint`](crate::fingerprint::Http3Fingerprint).
//!
//! Like HTTP/2, a driver task owns the connection (and its UDP socket) and
//! cloneable [`H3Handle`]s submit requests to it.

mod config;
mod connection;
mod driver;
mod handle;

pub use config::{h3_config, quic_config};
pub use connection::{connect, H3Target};
pub use handle::H3Handle;
