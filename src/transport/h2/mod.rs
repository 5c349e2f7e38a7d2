//! Native HTTP/2 client with full fingerprint control.
//!
//! The `h2` crate hardcodes SETTINGS order, the initial WINDOW_UPDATE and
//! pseudo-header order. Here all of them come from the
//! [`Http2Fingerprint`](crate::fingerprint::Http2Fingerprint):
//!
//! - SETTINGS parameters in descriptor order, unknown ids included
//! - connection WINDOW_UPDATE right after SETTINGS
//! - PRIORITY frames for placeholder streams (older Firefox)
//! - HEADERS priority and pseudo-header order
//!
//! The Akamai fingerprint of the resulting connection is
//! `settings|window_update|priority|pseudo_headers`, e.g.
//! `1:65536;2:0;4:6291456;6:262144|15663105|0|m,a,s,p`.

mod connection;
mod driver;
pub mod frame;
mod handle;
pub mod hpack;

pub use connection::handshake;
pub use handle::H2Handle;
pub(crate) use connection::request_fields;
