//! Protocol choice, connection reuse and dialing for one hop.

use http::Method;
use tokio::sync::OwnedSemaphorePermit;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::pool::{ConnectionPool, PoolKey, PooledH1, SharedConnection};
use crate::response::Response;
use crate::transport::connector::{MaybeTlsStream, TlsConnector};
use crate::transport::h1::H1Connection;
use crate::transport::h3::{self, H3Target};
use crate::transport::{h2, proxy, tcp, HttpRequest};
use crate::version::Protocol;

use super::prepare::Prepared;
use super::Engine;

macro_rules! step {
    ($debug:expr, $($arg:tt)+) => {
        if $debug {
            tracing::debug!($($arg)+)
        } else {
            tracing::trace!($($arg)+)
        }
    };
}
pub(super) use step;

/// `host`, `port`, scheme of a request URL.
fn endpoint(request: &HttpRequest) -> Result<(String, u16, String)> {
    let host = request
        .url
        .host_str()
        .ok_or_else(|| Error::validation(format!("URL has no host: {}", request.url)))?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string();
    let port = request
        .url
        .port_or_known_default()
        .ok_or_else(|| Error::validation(format!("URL has no port: {}", request.url)))?;
    Ok((host, port, request.url.scheme().to_string()))
}

fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::PUT | Method::DELETE | Method::TRACE
    )
}

impl Engine {
    /// One request/response exchange, no redirect handling.
    pub(super) async fn send_once(
        &self,
        prepared: &Prepared,
        pool: &ConnectionPool,
        request: HttpRequest,
    ) -> Result<Response> {
        let (host, port, scheme) = endpoint(&request)?;
        if scheme == "https" && prepared.allows_h3() {
            let origin = format!("https://{}:{}", host, port);
            if prepared.protocol_racing {
                return self.race(prepared, pool, request, &host, port).await;
            }
            if let Some(alt) = self.alt_svc.h3_alternative(&origin) {
                let alt_host = alt.host.clone().unwrap_or_else(|| host.clone());
                match self.send_h3(prepared, pool, &request, &alt_host, alt.port).await {
                    Ok(response) => return Ok(response),
                    Err(e) => {
                        tracing::warn!(%origin, error = %e, "h3 attempt failed, falling back to tcp");
                        self.alt_svc.forget(&origin);
                    }
                }
            }
        }
        self.send_tcp(prepared, pool, request).await
    }

    /// HTTP/3 and TCP in parallel; the first success wins and the other
    /// attempt is dropped.
    async fn race(
        &self,
        prepared: &Prepared,
        pool: &ConnectionPool,
        request: HttpRequest,
        host: &str,
        port: u16,
    ) -> Result<Response> {
        let h3 = self.send_h3(prepared, pool, &request, host, port);
        let tcp = self.send_tcp(prepared, pool, request.clone());
        tokio::pin!(h3);
        tokio::pin!(tcp);
        tokio::select! {
            result = &mut h3 => match result {
                Ok(response) => {
                    step!(prepared.debug, host, "h3 won the race");
                    Ok(response)
                }
                Err(e) => {
                    step!(prepared.debug, host, error = %e, "h3 attempt failed, waiting for tcp");
                    tcp.await
                }
            },
            result = &mut tcp => match result {
                Ok(response) => {
                    step!(prepared.debug, host, protocol = %response.protocol, "tcp won the race");
                    Ok(response)
                }
                Err(tcp_err) => h3.await.map_err(|h3_err| {
                    step!(prepared.debug, host, error = %h3_err, "h3 failed too");
                    tcp_err
                }),
            },
        }
    }

    async fn send_h3(
        &self,
        prepared: &Prepared,
        pool: &ConnectionPool,
        request: &HttpRequest,
        connect_host: &str,
        port: u16,
    ) -> Result<Response> {
        let fp = prepared
            .fingerprint
            .http3
            .as_ref()
            .ok_or_else(|| Error::quic("profile has no HTTP/3 fingerprint"))?;
        let origin_host = request.url.host_str().unwrap_or(connect_host);
        let pins = prepared.pins_for(origin_host);
        let key = prepared.pool_key("h3", connect_host, port, &pins);

        if !prepared.rotating_proxy {
            if let Some(conn) = pool.shared(&key, &prepared.limits) {
                match conn.send_request(request.clone()).await {
                    Ok(response) => return Ok(response),
                    Err(e) => {
                        step!(prepared.debug, host = connect_host, error = %e, "pooled h3 connection failed");
                        pool.remove_shared(&key);
                    }
                }
            }
        }

        let permit = pool.acquire_slot(&key, &prepared.limits).await?;
        let mut options = prepared.tls_options.clone();
        if options.server_name.is_none() && connect_host != origin_host {
            options.server_name = Some(origin_host.to_string());
        }
        let handle = h3::connect(H3Target {
            host: connect_host,
            port,
            h3: fp,
            options: &options,
            pins: &pins,
            dial: &prepared.dial,
        })
        .await?;
        let conn = SharedConnection::H3(handle);
        if prepared.limits.keep_alive && !prepared.rotating_proxy {
            pool.insert_shared(&key, conn.clone(), permit);
        }
        conn.send_request(request.clone()).await
    }

    async fn send_tcp(
        &self,
        prepared: &Prepared,
        pool: &ConnectionPool,
        mut request: HttpRequest,
    ) -> Result<Response> {
        let (host, port, scheme) = endpoint(&request)?;
        if let Some(proxy) = prepared.proxy.as_ref().filter(|p| p.is_http() && scheme == "http") {
            request.absolute_form = true;
            if let Some(auth) = proxy.basic_auth() {
                request.headers.push(("Proxy-Authorization".to_string(), auth));
            }
        }
        let pins = if scheme == "https" { prepared.pins_for(&host) } else { Vec::new() };
        let key = prepared.pool_key(&scheme, &host, port, &pins);
        let reuse = !prepared.rotating_proxy;

        if reuse {
            if let Some(conn) = pool.shared(&key, &prepared.limits) {
                match conn.send_request(request.clone()).await {
                    Ok(response) => return Ok(response),
                    Err(e) => {
                        step!(prepared.debug, host = %host, error = %e, "pooled h2 connection failed, reconnecting");
                        pool.remove_shared(&key);
                    }
                }
            }
            if let Some(mut pooled) = pool.checkout_h1(&key, &prepared.limits) {
                match pooled.conn.send_request(&request).await {
                    Ok(response) => {
                        pool.checkin_h1(&key, pooled, &prepared.limits);
                        return Ok(response);
                    }
                    // A stale keep-alive connection; only retry what is safe to repeat.
                    Err(e) if is_idempotent(&request.method) || request.body.is_none() => {
                        step!(prepared.debug, host = %host, error = %e, "idle h1 connection failed, reconnecting");
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        let permit = pool.acquire_slot(&key, &prepared.limits).await?;
        let stream = self.open_stream(prepared, &scheme, &host, port, &pins).await?;
        let protocol = stream.negotiated_protocol();
        step!(prepared.debug, host = %host, port, %protocol, "connection established");
        match protocol {
            Protocol::Http2 => {
                let handle = h2::handshake(stream, &prepared.fingerprint.http2).await?;
                let conn = SharedConnection::H2(handle);
                if reuse && prepared.limits.keep_alive {
                    pool.insert_shared(&key, conn.clone(), permit);
                }
                conn.send_request(request).await
            }
            _ => self.send_h1(prepared, pool, &key, stream, permit, &request, reuse).await,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn send_h1(
        &self,
        prepared: &Prepared,
        pool: &ConnectionPool,
        key: &PoolKey,
        stream: MaybeTlsStream,
        permit: Option<OwnedSemaphorePermit>,
        request: &HttpRequest,
        reuse: bool,
    ) -> Result<Response> {
        let conn = H1Connection::new(stream).with_max_header_bytes(prepared.max_header_bytes);
        let mut pooled = PooledH1::new(conn, permit);
        let response = pooled.conn.send_request(request).await?;
        if reuse {
            pool.checkin_h1(key, pooled, &prepared.limits);
        }
        Ok(response)
    }

    async fn open_stream(
        &self,
        prepared: &Prepared,
        scheme: &str,
        host: &str,
        port: u16,
        pins: &[String],
    ) -> Result<MaybeTlsStream> {
        let tcp = match &prepared.proxy {
            None => tcp::dial(host, port, &prepared.dial).await?,
            Some(p) if p.is_http() && scheme == "http" => proxy::dial_proxy(p, &prepared.dial).await?,
            Some(p) => proxy::tunnel(p, host, port, &prepared.connect_headers, &prepared.dial).await?,
        };
        if scheme != "https" {
            return Ok(MaybeTlsStream::Plain(tcp));
        }
        let connector = self.connector(prepared)?;
        let tls = connector.connect(host, tcp, pins).await?;
        Ok(MaybeTlsStream::Tls(tls))
    }

    /// Connectors are cached per fingerprint and TLS options so the session
    /// resumption cache survives across requests. The sweeper drops the
    /// ones left unused.
    pub(super) fn connector(&self, prepared: &Prepared) -> Result<TlsConnector> {
        let key = prepared.connector_key();
        let mut connectors = self
            .connectors
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some((connector, last_used)) = connectors.get_mut(&key) {
            *last_used = Instant::now();
            return Ok(connector.clone());
        }
        let connector = TlsConnector::new(&prepared.fingerprint.tls, prepared.tls_options.clone())?;
        connectors.insert(key, (connector.clone(), Instant::now()));
        Ok(connector)
    }
}
