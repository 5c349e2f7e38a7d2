//! The request engine.
//!
//! [`Engine::execute`] runs one [`RequestDescriptor`] to completion: it
//! resolves the fingerprint, attaches cookies from the session (or a
//! throwaway jar), picks HTTP/3 or TCP, follows redirects and folds every
//! failure into a status `0` [`ResponseDescriptor`].
//!
//! The session calls (`get_cookies_from_session`, `add_cookies_to_session`,
//! `destroy_session`, `destroy_all`) go straight to the [`SessionRegistry`].

mod dispatch;
mod prepare;

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use base64::Engine as _;
use bytes::Bytes;
use http::Method;
use tokio::io::AsyncWriteExt;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;
use tracing::Instrument;
use url::Url;

use crate::cookie::{Cookie, CookieEntry, CookieJar};
use crate::descriptor::{RequestDescriptor, ResponseDescriptor};
use crate::error::{Error, Result};
use crate::pool::{AltSvcCache, ConnectionPool, PoolLimits, PoolStats};
use crate::registry::{SessionRegistry, SessionState};
use crate::response::Response;
use crate::transport::connector::TlsConnector;
use crate::transport::HttpRequest;

use dispatch::step;
use prepare::{apply_header_order, Prepared, StreamOutput};

/// Engine-wide defaults.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Redirects followed before giving up.
    pub max_redirects: u32,
    /// Used when a request sets no timeout.
    pub default_timeout: Duration,
    pub pool: PoolLimits,
    /// Sessions idle this long are destroyed by the sweeper.
    pub session_ttl: Duration,
    pub sweep_interval: Duration,
    /// Run requests on their own task and report panics as failures.
    pub catch_panics: bool,
    /// Extra trust anchors (DER or PEM) for every TLS connection.
    pub root_certs: Vec<Vec<u8>>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_redirects: 10,
            default_timeout: Duration::from_secs(30),
            pool: PoolLimits::default(),
            session_ttl: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(60),
            catch_panics: true,
            root_certs: Vec::new(),
        }
    }
}

pub struct Engine {
    config: EngineConfig,
    registry: SessionRegistry,
    /// Connections of session-less requests.
    pool: ConnectionPool,
    alt_svc: AltSvcCache,
    /// TLS connectors by fingerprint and options, with their last use.
    connectors: Mutex<HashMap<u64, (TlsConnector, Instant)>>,
    sweeper: Mutex<Option<AbortHandle>>,
}

/// Aborts the request task when the caller stops waiting for it.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Where a request's cookies come from and go to.
enum Jar<'a> {
    Session(&'a SessionState),
    Local(CookieJar),
    /// `withoutCookieJar`: only the request's own cookies are sent and
    /// nothing is stored.
    Disabled(Vec<(String, String)>),
}

impl Jar<'_> {
    fn header_for(&self, url: &Url) -> Option<String> {
        match self {
            Jar::Session(session) => session.jar().header_for_url(url),
            Jar::Local(jar) => jar.header_for_url(url),
            Jar::Disabled(cookies) if cookies.is_empty() => None,
            Jar::Disabled(cookies) => Some(
                cookies
                    .iter()
                    .map(|(n, v)| format!("{}={}", n, v))
                    .collect::<Vec<_>>()
                    .join("; "),
            ),
        }
    }

    fn seed(&mut self, url: &Url, entries: &[CookieEntry]) -> Result<()> {
        let cookies = entries
            .iter()
            .map(|e| Cookie::from_entry(e, url))
            .collect::<Result<Vec<_>>>()?;
        match self {
            Jar::Session(session) => {
                let mut jar = session.jar();
                cookies.into_iter().for_each(|c| jar.store(c));
            }
            Jar::Local(jar) => cookies.into_iter().for_each(|c| jar.store(c)),
            Jar::Disabled(list) => list.extend(cookies.into_iter().map(|c| (c.name, c.value))),
        }
        Ok(())
    }

    fn store(&mut self, url: &Url, response: &Response) -> Vec<(String, String)> {
        let set_cookies = response.get_headers("set-cookie");
        match self {
            Jar::Session(session) => session.jar().store_response(url, set_cookies),
            Jar::Local(jar) => jar.store_response(url, set_cookies),
            Jar::Disabled(_) => set_cookies
                .filter_map(|h| Cookie::parse(h, url))
                .map(|c| (c.name, c.value))
                .collect(),
        }
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            registry: SessionRegistry::new(),
            pool: ConnectionPool::new(),
            alt_svc: AltSvcCache::new(),
            connectors: Mutex::new(HashMap::new()),
            sweeper: Mutex::new(None),
        }
    }

    /// Process-wide engine with default configuration.
    pub fn global() -> Arc<Engine> {
        static ENGINE: OnceLock<Arc<Engine>> = OnceLock::new();
        ENGINE
            .get_or_init(|| Arc::new(Engine::new(EngineConfig::default())))
            .clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn alt_svc(&self) -> &AltSvcCache {
        &self.alt_svc
    }

    /// Counters of the engine-wide pool (session pools are separate).
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Run one request. Never fails: errors and panics come back as status
    /// `0` with the diagnostic in `body`.
    ///
    /// The first call starts the background sweeper.
    pub async fn execute(self: &Arc<Self>, request: RequestDescriptor) -> ResponseDescriptor {
        self.start_session_sweeper();
        let id = uuid::Uuid::new_v4().to_string();
        let session_id = request.session_id.clone().filter(|s| !s.is_empty());
        let span = tracing::debug_span!(
            "request",
            %id,
            method = %request.request_method,
            url = %request.request_url,
            session = session_id.as_deref().unwrap_or_default(),
            debug = request.with_debug,
        );

        let result = if request.catch_panics.unwrap_or(self.config.catch_panics) {
            let engine = Arc::clone(self);
            let task = tokio::spawn(async move { engine.run(request).await }.instrument(span));
            let _guard = AbortOnDrop(task.abort_handle());
            match task.await {
                Ok(result) => result,
                Err(e) if e.is_panic() => Err(Error::EngineFailure {
                    message: format!("engine panic: {}", panic_message(e.into_panic())),
                }),
                Err(_) => Err(Error::EngineFailure {
                    message: "request task was cancelled".to_string(),
                }),
            }
        } else {
            self.run(request).instrument(span).await
        };

        match result {
            Ok(mut response) => {
                response.id = id;
                response
            }
            Err(e) => {
                tracing::debug!(%id, error = %e, "request failed");
                ResponseDescriptor::failure(id, session_id, e.to_string())
            }
        }
    }

    async fn run(&self, request: RequestDescriptor) -> Result<ResponseDescriptor> {
        let prepared = Prepared::new(&request, &self.config)?;
        let timeout = prepared.timeout;
        match tokio::time::timeout(timeout, self.perform(&request, prepared)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(timeout)),
        }
    }

    async fn perform(&self, request: &RequestDescriptor, prepared: Prepared) -> Result<ResponseDescriptor> {
        let session_id = request.session_id.clone().filter(|s| !s.is_empty());
        let session = session_id.as_deref().map(|id| self.registry.get_or_create(id));
        let pool = session.as_deref().map_or(&self.pool, SessionState::pool);

        let mut jar = match (&session, request.without_cookie_jar) {
            (_, true) => Jar::Disabled(Vec::new()),
            (Some(session), false) => Jar::Session(session),
            (None, false) => Jar::Local(CookieJar::new()),
        };
        jar.seed(&prepared.url, &request.request_cookies)?;

        let mut url = prepared.url.clone();
        let mut method = prepared.method.clone();
        let mut body = prepared.body.clone();
        let mut headers = prepared.headers.clone();
        let mut cookies = HashMap::new();
        let mut redirects = 0u32;

        let response = loop {
            let mut hop = HttpRequest::new(method.clone(), url.clone());
            hop.headers = headers.clone();
            if let Some(cookie) = jar.header_for(&url) {
                match hop.headers.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case("cookie")) {
                    Some((_, existing)) => *existing = format!("{}; {}", existing, cookie),
                    None => hop.headers.push(("Cookie".to_string(), cookie)),
                }
                apply_header_order(&mut hop.headers, &prepared.header_order);
            }
            hop.body = body.clone();
            hop.host_override = prepared.host_override.clone();

            let response = self.send_once(&prepared, pool, hop).await?;
            step!(prepared.debug, status = response.status, protocol = %response.protocol, url = %url, "response received");

            cookies.extend(jar.store(&url, &response));
            if url.scheme() == "https" && response.protocol != crate::version::Protocol::Http3 {
                if let (Some(alt_svc), Some(host)) = (response.get_header("alt-svc"), url.host_str()) {
                    let origin = format!("https://{}:{}", host, url.port_or_known_default().unwrap_or(443));
                    self.alt_svc.observe(&origin, alt_svc);
                }
            }

            let location = match response.location() {
                Some(location) if prepared.follow_redirects && response.is_redirect() => location,
                _ => break response,
            };
            redirects += 1;
            if redirects > self.config.max_redirects {
                return Err(Error::RedirectLimit {
                    count: self.config.max_redirects,
                });
            }
            let next = url.join(location)?;
            if matches!(response.status, 301..=303) && method != Method::HEAD {
                method = Method::GET;
                body = None;
                headers.retain(|(k, _)| {
                    !["content-type", "content-length", "transfer-encoding"]
                        .iter()
                        .any(|h| k.eq_ignore_ascii_case(h))
                });
            }
            if next.host_str() != url.host_str() {
                headers.retain(|(k, _)| !k.eq_ignore_ascii_case("authorization"));
            }
            step!(prepared.debug, from = %url, to = %next, status = response.status, "following redirect");
            url = next;
        };

        if let Some(session) = &session {
            session.touch();
        }
        self.finish(&prepared, url, response, cookies, session_id).await
    }

    async fn finish(
        &self,
        prepared: &Prepared,
        url: Url,
        response: Response,
        cookies: HashMap<String, String>,
        session_id: Option<String>,
    ) -> Result<ResponseDescriptor> {
        let body = if prepared.disable_compression {
            response.body().clone()
        } else {
            response.decoded_body()?
        };
        if let Some(output) = &prepared.stream_output {
            write_stream_output(output, &body).await?;
        }
        let body = if prepared.byte_response {
            let content_type = response.content_type().unwrap_or("application/octet-stream");
            format!(
                "data:{};base64,{}",
                content_type,
                base64::engine::general_purpose::STANDARD.encode(&body)
            )
        } else {
            String::from_utf8_lossy(&body).into_owned()
        };
        Ok(ResponseDescriptor {
            id: String::new(),
            status: response.status,
            headers: response.header_map(),
            body,
            cookies,
            target: url.to_string(),
            used_protocol: response.protocol.as_str().to_string(),
            session_id,
        })
    }

    /// Cookies session `session_id` would send to `url`.
    pub fn get_cookies_from_session(&self, session_id: &str, url: &str) -> Result<Vec<CookieEntry>> {
        let url = Url::parse(url)?;
        Ok(self.registry.get_cookies(session_id, &url))
    }

    /// Add cookies to a session as if `url` had set them. Creates the
    /// session, and starts the sweeper, when needed.
    pub fn add_cookies_to_session(
        self: &Arc<Self>,
        session_id: &str,
        url: &str,
        cookies: &[CookieEntry],
    ) -> Result<Vec<CookieEntry>> {
        let url = Url::parse(url)?;
        self.start_session_sweeper();
        self.registry.set_cookies(session_id, &url, cookies)
    }

    /// Idempotent; always `true`.
    pub fn destroy_session(&self, session_id: &str) -> bool {
        self.registry.destroy(session_id)
    }

    /// Destroy every session and close the engine-wide pool.
    pub fn destroy_all(&self) -> usize {
        self.pool.clear();
        self.registry.destroy_all()
    }

    /// Start the background sweep of idle sessions, idle connections and
    /// expired Alt-Svc entries. Returns `None` when it is already running or
    /// no Tokio runtime is available.
    pub fn start_session_sweeper(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let runtime = tokio::runtime::Handle::try_current().ok()?;
        let mut sweeper = self.sweeper.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if sweeper.as_ref().is_some_and(|h| !h.is_finished()) {
            return None;
        }
        let engine: Weak<Engine> = Arc::downgrade(self);
        let interval = self.config.sweep_interval;
        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                engine.sweep();
            }
        });
        *sweeper = Some(handle.abort_handle());
        Some(handle)
    }

    fn sweep(&self) {
        let swept = self.registry.sweep(self.config.session_ttl);
        if swept > 0 {
            tracing::debug!(swept, "idle sessions destroyed");
        }
        let idle = self.config.pool.idle_timeout;
        self.registry.evict_idle_connections(idle);
        self.pool.evict_idle(idle);
        self.alt_svc.evict_expired();
        self.evict_connectors(self.config.session_ttl);
    }

    /// Drop TLS connectors, and their resumption tickets, unused for `ttl`.
    fn evict_connectors(&self, ttl: Duration) {
        let mut connectors = self
            .connectors
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let before = connectors.len();
        connectors.retain(|_, (_, last_used)| last_used.elapsed() < ttl);
        let evicted = before - connectors.len();
        if evicted > 0 {
            tracing::debug!(evicted, "unused tls connectors dropped");
        }
    }

    fn connector_count(&self) -> usize {
        self.connectors
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Some(handle) = self
            .sweeper
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("sessions", &self.registry.len())
            .field("pool", &self.pool)
            .finish()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

async fn write_stream_output(output: &StreamOutput, body: &Bytes) -> Result<()> {
    let mut file = tokio::fs::File::create(&output.path).await?;
    for chunk in body.chunks(output.block_size) {
        file.write_all(chunk).await?;
    }
    if let Some(eof) = &output.eof_symbol {
        file.write_all(eof.as_bytes()).await?;
    }
    file.flush().await?;
    Ok(())
}
