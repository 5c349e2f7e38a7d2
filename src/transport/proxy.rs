//! Proxy tunnels: HTTP CONNECT and SOCKS5 (RFC 1928, RFC 1929 auth).

use std::net::IpAddr;

use base64::Engine as _;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use url::Url;

use crate::error::{Error, Result};
use crate::transport::tcp::{dial, DialOptions};

/// Upper bound on the CONNECT response head.
const MAX_CONNECT_RESPONSE: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyKind {
    Http,
    /// `remote_dns` is set for `socks5h://`: the proxy resolves the target.
    Socks5 { remote_dns: bool },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyConfig {
    pub kind: ProxyKind,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ProxyConfig {
    /// Parse `http://[user:pass@]host:port`, `socks5://..` or `socks5h://..`.
    pub fn parse(proxy_url: &str) -> Result<Self> {
        let url = Url::parse(proxy_url)
            .map_err(|e| Error::validation(format!("invalid proxy url {}: {}", proxy_url, e)))?;
        let (kind, default_port) = match url.scheme() {
            "http" => (ProxyKind::Http, 80),
            "socks5" => (ProxyKind::Socks5 { remote_dns: false }, 1080),
            "socks5h" => (ProxyKind::Socks5 { remote_dns: true }, 1080),
            other => {
                return Err(Error::validation(format!("unsupported proxy scheme: {}", other)))
            }
        };
        let host = url
            .host_str()
            .ok_or_else(|| Error::validation("proxy url has no host"))?
            .to_string();
        let username = Some(url.username())
            .filter(|u| !u.is_empty())
            .map(|u| percent_decode(u));
        let password = url.password().map(percent_decode);
        Ok(Self {
            kind,
            host,
            port: url.port().unwrap_or(default_port),
            username,
            password,
        })
    }

    /// `Proxy-Authorization` value when credentials are present.
    pub fn basic_auth(&self) -> Option<String> {
        let user = self.username.as_deref()?;
        let pass = self.password.as_deref().unwrap_or_default();
        let token = base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", user, pass));
        Some(format!("Basic {}", token))
    }

    pub fn is_http(&self) -> bool {
        self.kind == ProxyKind::Http
    }
}

fn percent_decode(s: &str) -> String {
    url::form_urlencoded::parse(format!("x={}", s).as_bytes())
        .next()
        .map(|(_, v)| v.into_owned())
        .unwrap_or_else(|| s.to_string())
}

/// Dial the proxy itself.
pub async fn dial_proxy(proxy: &ProxyConfig, opts: &DialOptions) -> Result<TcpStream> {
    dial(&proxy.host, proxy.port, opts)
        .await
        .map_err(|e| Error::proxy(format!("cannot reach proxy {}:{}: {}", proxy.host, proxy.port, e)))
}

/// Open a tunnel to `host:port` through the proxy.
pub async fn tunnel(
    proxy: &ProxyConfig,
    host: &str,
    port: u16,
    connect_headers: &[(String, String)],
    opts: &DialOptions,
) -> Result<TcpStream> {
    let mut stream = dial_proxy(proxy, opts).await?;
    match proxy.kind {
        ProxyKind::Http => http_connect(&mut stream, proxy, host, port, connect_headers).await?,
        ProxyKind::Socks5 { remote_dns } => {
            socks5_connect(&mut stream, proxy, host, port, remote_dns).await?
        }
    }
    tracing::debug!(proxy = %proxy.host, host, port, "proxy tunnel established");
    Ok(stream)
}

async fn http_connect(
    stream: &mut TcpStream,
    proxy: &ProxyConfig,
    host: &str,
    port: u16,
    connect_headers: &[(String, String)],
) -> Result<()> {
    let authority = if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    };
    let mut req = format!("CONNECT {} HTTP/1.1\r\nHost: {}\r\n", authority, authority);
    if let Some(auth) = proxy.basic_auth() {
        req.push_str(&format!("Proxy-Authorization: {}\r\n", auth));
    }
    for (name, value) in connect_headers {
        req.push_str(&format!("{}: {}\r\n", name, value));
    }
    req.push_str("\r\n");
    stream.write_all(req.as_bytes()).await?;

    // Byte at a time so nothing past the head is consumed.
    let mut head = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if head.len() >= MAX_CONNECT_RESPONSE {
            return Err(Error::proxy("CONNECT response head too large"));
        }
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Err(Error::proxy("proxy closed the connection during CONNECT"));
        }
        head.push(byte[0]);
    }

    let mut headers = [httparse::EMPTY_HEADER; 64];
    let mut resp = httparse::Response::new(&mut headers);
    resp.parse(&head)
        .map_err(|e| Error::proxy(format!("malformed CONNECT response: {}", e)))?;
    match resp.code {
        Some(code) if (200..300).contains(&code) => Ok(()),
        Some(code) => Err(Error::proxy(format!(
            "proxy refused CONNECT to {}: {} {}",
            authority,
            code,
            resp.reason.unwrap_or_default()
        ))),
        None => Err(Error::proxy("incomplete CONNECT response")),
    }
}

mod socks {
    pub const VERSION: u8 = 0x05;
    pub const NO_AUTH: u8 = 0x00;
    pub const USER_PASS: u8 = 0x02;
    pub const NO_ACCEPTABLE: u8 = 0xff;
    pub const CMD_CONNECT: u8 = 0x01;
    pub const ATYP_V4: u8 = 0x01;
    pub const ATYP_DOMAIN: u8 = 0x03;
    pub const ATYP_V6: u8 = 0x04;
}

fn socks_reply_message(code: u8) -> &'static str {
    match code {
        0x01 => "general SOCKS server failure",
        0x02 => "connection not allowed by ruleset",
        0x03 => "network unreachable",
        0x04 => "host unreachable",
        0x05 => "connection refused",
        0x06 => "TTL expired",
        0x07 => "command not supported",
        0x08 => "address type not supported",
        _ => "unknown SOCKS error",
    }
}

async fn socks5_connect(
    stream: &mut TcpStream,
    proxy: &ProxyConfig,
    host: &str,
    port: u16,
    remote_dns: bool,
) -> Result<()> {
    let has_auth = proxy.username.is_some();
    let greeting: &[u8] = if has_auth {
        &[socks::VERSION, 2, socks::NO_AUTH, socks::USER_PASS]
    } else {
        &[socks::VERSION, 1, socks::NO_AUTH]
    };
    stream.write_all(greeting).await?;

    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await?;
    if choice[0] != socks::VERSION {
        return Err(Error::proxy("not a SOCKS5 proxy"));
    }
    match choice[1] {
        socks::NO_AUTH => {}
        socks::USER_PASS if has_auth => {
            let user = proxy.username.as_deref().unwrap_or_default().as_bytes();
            let pass = proxy.password.as_deref().unwrap_or_default().as_bytes();
            if user.len() > 255 || pass.len() > 255 {
                return Err(Error::proxy("SOCKS5 credentials longer than 255 bytes"));
            }
            let mut auth = Vec::with_capacity(3 + user.len() + pass.len());
            auth.push(0x01);
            auth.push(user.len() as u8);
            auth.extend_from_slice(user);
            auth.push(pass.len() as u8);
            auth.extend_from_slice(pass);
            stream.write_all(&auth).await?;
            let mut status = [0u8; 2];
            stream.read_exact(&mut status).await?;
            if status[1] != 0 {
                return Err(Error::proxy("SOCKS5 authentication failed"));
            }
        }
        socks::NO_ACCEPTABLE => return Err(Error::proxy("SOCKS5 proxy accepted no auth method")),
        other => return Err(Error::proxy(format!("SOCKS5 proxy chose method {}", other))),
    }

    let mut req = vec![socks::VERSION, socks::CMD_CONNECT, 0x00];
    let literal = host
        .trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .ok();
    let ip = match literal {
        Some(ip) => Some(ip),
        None if remote_dns => None,
        None => Some(
            tokio::net::lookup_host((host, port))
                .await
                .map_err(|e| Error::proxy(format!("DNS resolution failed for {}: {}", host, e)))?
                .next()
                .ok_or_else(|| Error::proxy(format!("no addresses for {}", host)))?
                .ip(),
        ),
    };
    match ip {
        Some(IpAddr::V4(v4)) => {
            req.push(socks::ATYP_V4);
            req.extend_from_slice(&v4.octets());
        }
        Some(IpAddr::V6(v6)) => {
            req.push(socks::ATYP_V6);
            req.extend_from_slice(&v6.octets());
        }
        None => {
            if host.len() > 255 {
                return Err(Error::proxy("hostname too long for SOCKS5"));
            }
            req.push(socks::ATYP_DOMAIN);
            req.push(host.len() as u8);
            req.extend_from_slice(host.as_bytes());
        }
    }
    req.extend_from_slice(&port.to_be_bytes());
    stream.write_all(&req).await?;

    let mut reply = [0u8; 4];
    stream.read_exact(&mut reply).await?;
    if reply[1] != 0 {
        return Err(Error::proxy(format!(
            "SOCKS5 connect to {}:{} failed: {}",
            host,
            port,
            socks_reply_message(reply[1])
        )));
    }
    let skip = match reply[3] {
        socks::ATYP_V4 => 4,
        socks::ATYP_V6 => 16,
        socks::ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            len[0] as usize
        }
        other => return Err(Error::proxy(format!("SOCKS5 reply address type {}", other))),
    };
    let mut bound = vec![0u8; skip + 2];
    stream.read_exact(&mut bound).await?;
    Ok(())
}
