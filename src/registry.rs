//! Session registry.
//!
//! Two lock levels: the registry map is locked only to insert, look up or
//! remove a session; each session's cookie jar has its own lock, so traffic
//! on unrelated sessions never contends.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

use url::Url;

use crate::cookie::{Cookie, CookieEntry, CookieJar};
use crate::error::Result;
use crate::pool::ConnectionPool;

/// State carried across the requests of one session.
pub struct SessionState {
    id: String,
    jar: Mutex<CookieJar>,
    pool: ConnectionPool,
    last_used: Mutex<Instant>,
}

impl SessionState {
    fn new(id: String) -> Self {
        Self {
            id,
            jar: Mutex::new(CookieJar::new()),
            pool: ConnectionPool::new(),
            last_used: Mutex::new(Instant::now()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Exclusive access to the cookie jar. Every read-modify-write of one
    /// request happens inside a single call.
    pub fn jar(&self) -> MutexGuard<'_, CookieJar> {
        self.jar.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn touch(&self) {
        *self.last_used.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_used
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    fn release(&self) {
        self.pool.clear();
        self.jar().clear();
    }
}

impl std::fmt::Debug for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionState")
            .field("id", &self.id)
            .field("cookies", &self.jar().len())
            .field("pool", &self.pool)
            .finish()
    }
}

/// Sessions by id. At most one [`SessionState`] exists per id.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<SessionState>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The session for `id`, created on first use. Concurrent first use
    /// resolves to the same session.
    pub fn get_or_create(&self, id: &str) -> Arc<SessionState> {
        if let Some(session) = self.get(id) {
            session.touch();
            return session;
        }
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let session = sessions
            .entry(id.to_string())
            .or_insert_with(|| {
                tracing::debug!(session_id = id, "session created");
                Arc::new(SessionState::new(id.to_string()))
            })
            .clone();
        session.touch();
        session
    }

    pub fn get(&self, id: &str) -> Option<Arc<SessionState>> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Remove `id` and release its connections and cookies. Returns `true`
    /// whether or not the session still existed.
    pub fn destroy(&self, id: &str) -> bool {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        match removed {
            Some(session) => {
                session.release();
                tracing::debug!(session_id = id, "session destroyed");
            }
            None => tracing::trace!(session_id = id, "session already gone"),
        }
        true
    }

    /// Destroy every session; returns how many existed.
    pub fn destroy_all(&self) -> usize {
        let drained: Vec<_> = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        for (_, session) in &drained {
            session.release();
        }
        tracing::debug!(count = drained.len(), "all sessions destroyed");
        drained.len()
    }

    /// Cookies the session would send to `url`; empty for unknown sessions.
    pub fn get_cookies(&self, id: &str, url: &Url) -> Vec<CookieEntry> {
        let Some(session) = self.get(id) else {
            return Vec::new();
        };
        let jar = session.jar();
        jar.cookies_for_url(url).into_iter().map(Cookie::to_entry).collect()
    }

    /// Store `cookies` as if `url` had set them, creating the session when
    /// needed. Returns the cookies now sent to `url`.
    pub fn set_cookies(&self, id: &str, url: &Url, cookies: &[CookieEntry]) -> Result<Vec<CookieEntry>> {
        let parsed = cookies
            .iter()
            .map(|entry| Cookie::from_entry(entry, url))
            .collect::<Result<Vec<_>>>()?;
        let session = self.get_or_create(id);
        let mut jar = session.jar();
        for cookie in parsed {
            jar.store(cookie);
        }
        Ok(jar.cookies_for_url(url).into_iter().map(Cookie::to_entry).collect())
    }

    /// Destroy sessions unused for longer than `ttl`; returns how many.
    pub fn sweep(&self, ttl: Duration) -> usize {
        let stale: Vec<String> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|s| s.idle_for() > ttl)
            .map(|s| s.id.clone())
            .collect();
        let mut swept = 0;
        for id in stale {
            let removed = {
                let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
                // It may have been used since the scan.
                match sessions.get(&id) {
                    Some(s) if s.idle_for() > ttl => sessions.remove(&id),
                    _ => None,
                }
            };
            if let Some(session) = removed {
                session.release();
                swept += 1;
                tracing::debug!(session_id = %id, "idle session swept");
            }
        }
        swept
    }

    /// Close idle connections held by live sessions.
    pub fn evict_idle_connections(&self, idle_timeout: Duration) {
        let sessions: Vec<_> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for session in sessions {
            session.pool.evict_idle(idle_timeout);
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
