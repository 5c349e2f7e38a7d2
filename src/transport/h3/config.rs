//! QUIC transport and HTTP/3 settings derived from a fingerprint.

use crate::error::{Error, Result};
use crate::fingerprint::http3::{
    ENABLE_CONNECT_PROTOCOL, H3_DATAGRAM, MAX_FIELD_SECTION_SIZE, QPACK_BLOCKED_STREAMS,
    QPACK_MAX_TABLE_CAPACITY,
};
use crate::fingerprint::Http3Fingerprint;
use crate::transport::connector::TlsOptions;

/// Chrome's connection-level flow control window.
const INITIAL_MAX_DATA: u64 = 15_663_105;
const INITIAL_MAX_STREAM_DATA: u64 = 6_291_456;
const MAX_IDLE_TIMEOUT_MS: u64 = 30_000;
pub(crate) const MAX_SEND_UDP_PAYLOAD: usize = 1350;
const DGRAM_QUEUE_LEN: usize = 64;

/// QUIC configuration on quiche's own BoringSSL.
///
/// quiche's TLS context cannot be shaped, so the QUIC ClientHello is
/// quiche's default one. With extra root certificates the peer is checked
/// after the handshake instead, see [`verify_chain`](crate::transport::connector::verify_chain).
pub fn quic_config(h3: &Http3Fingerprint, opts: &TlsOptions) -> Result<quiche::Config> {
    let mut config = quiche::Config::new(quiche::PROTOCOL_VERSION)
        .map_err(|e| Error::quic(format!("failed to create QUIC config: {}", e)))?;
    config
        .set_application_protos(quiche::h3::APPLICATION_PROTOCOL)
        .map_err(|e| Error::quic(format!("failed to set ALPN: {}", e)))?;
    config.verify_peer(!opts.insecure_skip_verify && opts.root_certs.is_empty());

    config.set_max_idle_timeout(MAX_IDLE_TIMEOUT_MS);
    config.set_max_recv_udp_payload_size(65535);
    config.set_max_send_udp_payload_size(MAX_SEND_UDP_PAYLOAD);
    config.set_initial_max_data(INITIAL_MAX_DATA);
    config.set_initial_max_stream_data_bidi_local(INITIAL_MAX_STREAM_DATA);
    config.set_initial_max_stream_data_bidi_remote(INITIAL_MAX_STREAM_DATA);
    config.set_initial_max_stream_data_uni(INITIAL_MAX_STREAM_DATA);
    config.set_initial_max_streams_bidi(100);
    config.set_initial_max_streams_uni(103);
    config.set_disable_active_migration(true);
    config.grease(h3.send_grease_frames);
    if h3.datagram() {
        config.enable_dgram(true, DGRAM_QUEUE_LEN, DGRAM_QUEUE_LEN);
    }
    Ok(config)
}

/// HTTP/3 SETTINGS. quiche owns the ids it implements and writes them in
/// its own order; every other id is sent through its additional settings,
/// in fingerprint order.
pub fn h3_config(h3: &Http3Fingerprint) -> Result<quiche::h3::Config> {
    let mut config = quiche::h3::Config::new()
        .map_err(|e| Error::quic(format!("failed to create HTTP/3 config: {}", e)))?;
    let mut extra = Vec::new();
    for (id, value) in &h3.settings {
        match *id {
            QPACK_MAX_TABLE_CAPACITY => config.set_qpack_max_table_capacity(*value),
            QPACK_BLOCKED_STREAMS => config.set_qpack_blocked_streams(*value),
            MAX_FIELD_SECTION_SIZE => config.set_max_field_section_size(*value),
            ENABLE_CONNECT_PROTOCOL => config.enable_extended_connect(*value != 0),
            // Follows the transport's datagram flag.
            H3_DATAGRAM => {}
            other => extra.push((other, *value)),
        }
    }
    if !extra.is_empty() {
        config
            .set_additional_settings(extra)
            .map_err(|e| Error::quic(format!("invalid HTTP/3 settings: {}", e)))?;
    }
    Ok(config)
}
