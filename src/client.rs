//! Client and session facade.
//!
//! A [`Client`] holds default [`ClientOptions`] and sends every call through
//! an [`Engine`]. A [`Session`] is a client bound to one session id, so its
//! cookies and connections persist across calls until it is destroyed.

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use http::Method;

use crate::cookie::CookieEntry;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::normalize::{build_request_descriptor, format_response, ClientOptions, RequestBody};
use crate::response::TlsResponse;

#[derive(Debug, Clone)]
pub struct Client {
    engine: Arc<Engine>,
    defaults: ClientOptions,
    session_id: Option<String>,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    /// Client with [`ClientOptions::browser_defaults`] on the global engine.
    pub fn new() -> Self {
        Self::with_options(ClientOptions::browser_defaults())
    }

    pub fn with_options(defaults: ClientOptions) -> Self {
        Self::with_engine(Engine::global(), defaults)
    }

    pub fn with_engine(engine: Arc<Engine>, defaults: ClientOptions) -> Self {
        Self {
            engine,
            defaults,
            session_id: None,
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn defaults(&self) -> &ClientOptions {
        &self.defaults
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Send one request. `options` are merged over the client defaults.
    ///
    /// Returns [`Error::EngineFailure`] when no HTTP response was obtained,
    /// and [`Error::HttpStatus`] for status >= 400 when `throw_on_http_error`
    /// is set.
    pub async fn request(&self, method: Method, url: &str, options: ClientOptions) -> Result<TlsResponse> {
        let mut options = self.defaults.merged_with(&options);
        if let Some(id) = &self.session_id {
            let raw = options.raw.get_or_insert_with(Default::default);
            if raw.session_id.is_none() {
                raw.session_id = Some(id.clone());
            }
        }
        let descriptor = build_request_descriptor(&method, url, &options)?;
        let response = format_response(self.engine.execute(descriptor).await, &options)?;
        if options.throw_on_http_error.unwrap_or(false) && response.status >= 400 {
            tracing::debug!(status = response.status, url, "raising http status error");
            return Err(Error::HttpStatus {
                response: Box::new(response),
            });
        }
        Ok(response)
    }

    pub async fn get(&self, url: &str, options: ClientOptions) -> Result<TlsResponse> {
        self.request(Method::GET, url, options).await
    }

    pub async fn head(&self, url: &str, options: ClientOptions) -> Result<TlsResponse> {
        self.request(Method::HEAD, url, options).await
    }

    pub async fn delete(&self, url: &str, options: ClientOptions) -> Result<TlsResponse> {
        self.request(Method::DELETE, url, options).await
    }

    pub async fn options(&self, url: &str, options: ClientOptions) -> Result<TlsResponse> {
        self.request(Method::OPTIONS, url, options).await
    }

    /// A body already set on `options` takes precedence over `body`.
    pub async fn post(&self, url: &str, body: impl Into<RequestBody>, options: ClientOptions) -> Result<TlsResponse> {
        self.request(Method::POST, url, with_body(body, options)).await
    }

    pub async fn put(&self, url: &str, body: impl Into<RequestBody>, options: ClientOptions) -> Result<TlsResponse> {
        self.request(Method::PUT, url, with_body(body, options)).await
    }

    pub async fn patch(&self, url: &str, body: impl Into<RequestBody>, options: ClientOptions) -> Result<TlsResponse> {
        self.request(Method::PATCH, url, with_body(body, options)).await
    }
}

fn with_body(body: impl Into<RequestBody>, mut options: ClientOptions) -> ClientOptions {
    if options.body.is_none() {
        options.body = Some(body.into());
    }
    options
}

/// A client bound to one session id.
///
/// Dropping a session destroys it on a best-effort basis; call
/// [`Session::destroy`] to observe failures.
#[derive(Debug)]
pub struct Session {
    client: Client,
    id: String,
    destroyed: AtomicBool,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// New session with a random id and the browser defaults.
    pub fn new() -> Self {
        Self::with_options(ClientOptions::browser_defaults())
    }

    pub fn with_options(options: ClientOptions) -> Self {
        Self::with_engine(Engine::global(), options, uuid::Uuid::new_v4().to_string())
    }

    /// Attach to a caller-chosen id; two sessions with the same id share
    /// cookies and connections.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self::with_engine(Engine::global(), ClientOptions::browser_defaults(), id)
    }

    pub fn with_engine(engine: Arc<Engine>, options: ClientOptions, id: impl Into<String>) -> Self {
        let id = id.into();
        engine.start_session_sweeper();
        tracing::debug!(session_id = %id, "session opened");
        Self {
            client: Client {
                engine,
                defaults: options,
                session_id: Some(id.clone()),
            },
            id,
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Cookies this session would send to `url`.
    pub fn get_cookies(&self, url: &str) -> Result<Vec<CookieEntry>> {
        self.client.engine.get_cookies_from_session(&self.id, url)
    }

    /// Store `cookies` as if `url` had set them; returns the cookies now
    /// sent to `url`.
    pub fn set_cookies(&self, url: &str, cookies: &[CookieEntry]) -> Result<Vec<CookieEntry>> {
        self.client.engine.add_cookies_to_session(&self.id, url, cookies)
    }

    /// Release the session's cookies and connections. Calling it again, from
    /// any thread, is a no-op.
    pub fn destroy(&self) -> Result<()> {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if self.client.engine.destroy_session(&self.id) {
            Ok(())
        } else {
            Err(Error::SessionLifecycle {
                session_id: self.id.clone(),
                message: "engine did not confirm destroy".to_string(),
            })
        }
    }
}

impl Deref for Session {
    type Target = Client;

    fn deref(&self) -> &Client {
        &self.client
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.destroy() {
            tracing::warn!(session_id = %self.id, error = %e, "implicit session destroy failed");
        }
    }
}

fn global() -> &'static Client {
    static CLIENT: OnceLock<Client> = OnceLock::new();
    CLIENT.get_or_init(Client::new)
}

/// [`Client::request`] on a process-wide client with browser defaults.
pub async fn request(method: Method, url: &str, options: ClientOptions) -> Result<TlsResponse> {
    global().request(method, url, options).await
}

pub async fn get(url: &str, options: ClientOptions) -> Result<TlsResponse> {
    global().get(url, options).await
}

pub async fn post(url: &str, body: impl Into<RequestBody>, options: ClientOptions) -> Result<TlsResponse> {
    global().post(url, body, options).await
}
