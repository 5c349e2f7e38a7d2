//! TCP dialing with per-request socket options.
//!
//! Sockets are built with socket2 so the local address, address family and
//! buffer sizes can be set before connecting, then handed to tokio for the
//! non-blocking connect.

use std::net::{IpAddr, SocketAddr};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpSocket, TcpStream};

use crate::error::{Error, Result};

/// Socket-level options for one dial.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct DialOptions {
    pub local_address: Option<IpAddr>,
    pub disable_ipv4: bool,
    pub disable_ipv6: bool,
    pub read_buffer_size: Option<usize>,
    pub write_buffer_size: Option<usize>,
}

impl DialOptions {
    fn allows(&self, addr: &SocketAddr) -> bool {
        match addr {
            SocketAddr::V4(_) => !self.disable_ipv4,
            SocketAddr::V6(_) => !self.disable_ipv6,
        }
    }
}

/// Resolve `host` and connect to the first address that accepts.
pub async fn dial(host: &str, port: u16, opts: &DialOptions) -> Result<TcpStream> {
    if opts.disable_ipv4 && opts.disable_ipv6 {
        return Err(Error::validation("both IPv4 and IPv6 are disabled"));
    }
    let target = host.trim_start_matches('[').trim_end_matches(']');
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((target, port))
        .await
        .map_err(|e| Error::connection(format!("DNS resolution failed for {}: {}", host, e)))?
        .filter(|a| opts.allows(a))
        .collect();
    if addrs.is_empty() {
        return Err(Error::connection(format!(
            "no usable addresses for {}:{}",
            host, port
        )));
    }

    let mut last_err = None;
    for addr in addrs {
        match connect_addr(addr, opts).await {
            Ok(stream) => {
                tracing::debug!(host, %addr, "tcp connected");
                return Ok(stream);
            }
            Err(e) => {
                tracing::trace!(host, %addr, error = %e, "tcp connect attempt failed");
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| Error::connection(format!("failed to connect to {}", host))))
}

async fn connect_addr(addr: SocketAddr, opts: &DialOptions) -> Result<TcpStream> {
    let domain = match addr {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| Error::connection(format!("failed to create socket: {}", e)))?;
    configure_socket(&socket, addr, opts)
        .map_err(|e| Error::connection(format!("failed to configure socket: {}", e)))?;
    socket.set_nonblocking(true)?;

    let std_stream: std::net::TcpStream = socket.into();
    let stream = TcpSocket::from_std_stream(std_stream)
        .connect(addr)
        .await
        .map_err(|e| Error::connection(format!("failed to connect to {}: {}", addr, e)))?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

fn configure_socket(socket: &Socket, addr: SocketAddr, opts: &DialOptions) -> std::io::Result<()> {
    if let Some(size) = opts.read_buffer_size {
        socket.set_recv_buffer_size(size)?;
    }
    if let Some(size) = opts.write_buffer_size {
        socket.set_send_buffer_size(size)?;
    }
    if let Some(local) = opts.local_address {
        // A local address of the other family cannot be bound; skip it.
        if local.is_ipv4() == addr.is_ipv4() {
            socket.bind(&SocketAddr::new(local, 0).into())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn dials_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let opts = DialOptions {
            local_address: Some("127.0.0.1".parse().unwrap()),
            read_buffer_size: Some(64 * 1024),
            ..Default::default()
        };
        let stream = dial("127.0.0.1", port, &opts).await.unwrap();
        assert_eq!(stream.peer_addr().unwrap().port(), port);
    }

    #[tokio::test]
    async fn family_filter_leaves_nothing() {
        let opts = DialOptions {
            disable_ipv4: true,
            ..Default::default()
        };
        let err = dial("127.0.0.1", 9, &opts).await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
    }

    #[tokio::test]
    async fn both_families_disabled_is_validation() {
        let opts = DialOptions {
            disable_ipv4: true,
            disable_ipv6: true,
            ..Default::default()
        };
        assert!(dial("localhost", 80, &opts).await.unwrap_err().is_validation());
    }
}
