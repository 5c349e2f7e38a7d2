//! QUIC handshake and driver spawn.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::fingerprint::Http3Fingerprint;
use crate::transport::connector::{verify_chain, verify_leaf_pins, TlsOptions};
use crate::transport::tcp::DialOptions;

use super::config::{h3_config, quic_config, MAX_SEND_UDP_PAYLOAD};
use super::driver::H3Driver;
use super::handle::H3Handle;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Where and how to open an HTTP/3 connection.
pub struct H3Target<'a> {
    pub host: &'a str,
    pub port: u16,
    pub h3: &'a Http3Fingerprint,
    pub options: &'a TlsOptions,
    pub pins: &'a [String],
    pub dial: &'a DialOptions,
}

/// Complete the QUIC handshake, then hand the connection to a driver task.
pub async fn connect(target: H3Target<'_>) -> Result<H3Handle> {
    let H3Target {
        host,
        port,
        h3,
        options,
        pins,
        dial,
    } = target;
    let mut config = quic_config(h3, options)?;
    let server_name = options.server_name.as_deref().unwrap_or(host);

    let peer = resolve(host, port, dial).await?;
    let bind = match (dial.local_address, peer) {
        (Some(local), _) if local.is_ipv4() == peer.is_ipv4() => SocketAddr::new(local, 0),
        (_, SocketAddr::V4(_)) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        (_, SocketAddr::V6(_)) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
    };
    let socket = UdpSocket::bind(bind)
        .await
        .map_err(|e| Error::connection(format!("failed to bind UDP socket: {}", e)))?;
    let local = socket.local_addr()?;

    let mut scid = [0u8; quiche::MAX_CONN_ID_LEN];
    getrandom::fill(&mut scid).map_err(|e| Error::quic(format!("RNG error: {}", e)))?;
    let scid = quiche::ConnectionId::from_ref(&scid);
    let mut conn = quiche::connect(Some(server_name), &scid, local, peer, &mut config)
        .map_err(|e| Error::quic(format!("connect failed: {}", e)))?;

    tokio::time::timeout(HANDSHAKE_TIMEOUT, handshake(&mut conn, &socket, local))
        .await
        .map_err(|_| Error::Timeout(HANDSHAKE_TIMEOUT))??;
    tracing::debug!(host, %peer, "quic handshake complete");

    if !options.insecure_skip_verify && !options.root_certs.is_empty() {
        let chain = conn.peer_cert_chain().unwrap_or_default();
        verify_chain(&chain, &options.root_certs, server_name)?;
    }
    if !pins.is_empty() {
        verify_leaf_pins(conn.peer_cert(), host, pins)?;
    }

    let h3_conn = quiche::h3::Connection::with_transport(&mut conn, &h3_config(h3)?)
        .map_err(|e| Error::quic(format!("HTTP/3 setup failed: {}", e)))?;

    let (command_tx, command_rx) = mpsc::channel(64);
    let closed = Arc::new(AtomicBool::new(false));
    let driver = H3Driver::new(
        conn,
        h3_conn,
        socket,
        peer,
        command_rx,
        h3.clone(),
        closed.clone(),
    );
    let host = host.to_string();
    tokio::spawn(async move {
        if let Err(e) = driver.drive().await {
            tracing::debug!(host = %host, error = %e, "h3 connection ended with error");
        }
    });
    Ok(H3Handle::new(command_tx, closed))
}

async fn resolve(host: &str, port: u16, dial: &DialOptions) -> Result<SocketAddr> {
    let target = host.trim_start_matches('[').trim_end_matches(']');
    tokio::net::lookup_host((target, port))
        .await
        .map_err(|e| Error::connection(format!("DNS resolution failed for {}: {}", host, e)))?
        .find(|a| match a {
            SocketAddr::V4(_) => !dial.disable_ipv4,
            SocketAddr::V6(_) => !dial.disable_ipv6,
        })
        .ok_or_else(|| Error::connection(format!("no usable addresses for {}:{}", host, port)))
}

async fn handshake(conn: &mut quiche::Connection, socket: &UdpSocket, local: SocketAddr) -> Result<()> {
    let mut buf = vec![0u8; 65535];
    let mut out = vec![0u8; MAX_SEND_UDP_PAYLOAD];
    loop {
        flush(conn, socket, &mut out).await?;
        if conn.is_established() {
            return Ok(());
        }
        if conn.is_closed() {
            let reason = conn
                .peer_error()
                .or(conn.local_error())
                .map(|e| String::from_utf8_lossy(&e.reason).into_owned())
                .unwrap_or_else(|| "connection closed".into());
            return Err(Error::quic(format!("handshake failed: {}", reason)));
        }

        let wait = conn.timeout().unwrap_or(Duration::from_millis(100));
        match tokio::time::timeout(wait, socket.recv_from(&mut buf)).await {
            Ok(Ok((len, from))) => {
                let info = quiche::RecvInfo { from, to: local };
                if let Err(e) = conn.recv(&mut buf[..len], info) {
                    tracing::trace!(error = %e, "quic packet rejected during handshake");
                }
            }
            Ok(Err(e)) => return Err(Error::Io(e)),
            Err(_) => conn.on_timeout(),
        }
    }
}

/// Send every packet quiche has queued.
pub(super) async fn flush(
    conn: &mut quiche::Connection,
    socket: &UdpSocket,
    out: &mut [u8],
) -> Result<()> {
    loop {
        match conn.send(out) {
            Ok((len, info)) => {
                socket.send_to(&out[..len], info.to).await?;
            }
            Err(quiche::Error::Done) => return Ok(()),
            Err(e) => return Err(Error::quic(format!("send failed: {}", e))),
        }
    }
}
