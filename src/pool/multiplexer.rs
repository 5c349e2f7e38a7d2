//! Connection pool.
//!
//! - HTTP/1.1: idle connections are checked out for one exchange and
//!   checked back in afterwards.
//! - HTTP/2 and HTTP/3: one multiplexed handle per key, shared by every
//!   request while it stays open.
//!
//! Keys include the fingerprint, so a connection is never reused for a
//! request that would have produced a different handshake.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{Error, Result};
use crate::response::Response;
use crate::transport::h1::H1Connection;
use crate::transport::h2::H2Handle;
use crate::transport::h3::H3Handle;
use crate::transport::HttpRequest;

/// Identity of a reusable connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub proxy: Option<String>,
    /// [`FingerprintDescriptor::fingerprint_key`](crate::fingerprint::FingerprintDescriptor::fingerprint_key).
    pub fingerprint: u64,
    /// Hash of the TLS and socket options used to connect.
    pub options: u64,
    /// Hash of the certificate pins the handshake was checked against.
    pub pins: u64,
}

/// Per-request pool limits. Zero means unlimited for the caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolLimits {
    pub idle_timeout: Duration,
    pub max_idle: usize,
    pub max_idle_per_host: usize,
    pub max_conns_per_host: usize,
    pub keep_alive: bool,
}

impl Default for PoolLimits {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(90),
            max_idle: 100,
            max_idle_per_host: 6,
            max_conns_per_host: 0,
            keep_alive: true,
        }
    }
}

/// A multiplexed connection handle.
#[derive(Debug, Clone)]
pub enum SharedConnection {
    H2(H2Handle),
    H3(H3Handle),
}

impl SharedConnection {
    pub async fn send_request(&self, request: HttpRequest) -> Result<Response> {
        match self {
            SharedConnection::H2(handle) => handle.send_request(request).await,
            SharedConnection::H3(handle) => handle.send_request(request).await,
        }
    }

    pub fn is_closed(&self) -> bool {
        match self {
            SharedConnection::H2(handle) => handle.is_closed(),
            SharedConnection::H3(handle) => handle.is_closed(),
        }
    }
}

/// HTTP/1.1 connection on loan from the pool. Holds its per-host
/// connection slot while alive.
pub struct PooledH1 {
    pub conn: H1Connection,
    permit: Option<OwnedSemaphorePermit>,
}

impl PooledH1 {
    pub fn new(conn: H1Connection, permit: Option<OwnedSemaphorePermit>) -> Self {
        Self { conn, permit }
    }
}

struct IdleH1 {
    conn: PooledH1,
    since: Instant,
}

struct SharedEntry {
    conn: SharedConnection,
    last_used: Instant,
    _permit: Option<OwnedSemaphorePermit>,
}

#[derive(Default)]
struct HostEntry {
    idle: Vec<IdleH1>,
    shared: Option<SharedEntry>,
    slots: Option<Arc<Semaphore>>,
}

/// Pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub keys: usize,
    pub idle_h1: usize,
    pub shared: usize,
}

/// Connection pool. The key map is locked only to find a key's entry; each
/// entry has its own lock.
#[derive(Default)]
pub struct ConnectionPool {
    hosts: Mutex<HashMap<PoolKey, Arc<Mutex<HostEntry>>>>,
    idle_total: AtomicUsize,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, key: &PoolKey) -> Arc<Mutex<HostEntry>> {
        lock(&self.hosts).entry(key.clone()).or_default().clone()
    }

    fn existing(&self, key: &PoolKey) -> Option<Arc<Mutex<HostEntry>>> {
        lock(&self.hosts).get(key).cloned()
    }

    /// Wait for a connection slot under `max_conns_per_host`. `None` when
    /// the host is unlimited.
    pub async fn acquire_slot(
        &self,
        key: &PoolKey,
        limits: &PoolLimits,
    ) -> Result<Option<OwnedSemaphorePermit>> {
        if limits.max_conns_per_host == 0 {
            return Ok(None);
        }
        let semaphore = {
            let entry = self.entry(key);
            let mut entry = lock(&entry);
            entry
                .slots
                .get_or_insert_with(|| Arc::new(Semaphore::new(limits.max_conns_per_host)))
                .clone()
        };
        let permit = semaphore
            .acquire_owned()
            .await
            .map_err(|_| Error::connection("connection pool closed"))?;
        Ok(Some(permit))
    }

    /// Most recently used idle HTTP/1.1 connection that has not expired.
    pub fn checkout_h1(&self, key: &PoolKey, limits: &PoolLimits) -> Option<PooledH1> {
        let entry = self.existing(key)?;
        let mut entry = lock(&entry);
        while let Some(idle) = entry.idle.pop() {
            self.idle_total.fetch_sub(1, Ordering::AcqRel);
            if idle.since.elapsed() < limits.idle_timeout {
                tracing::debug!(host = %key.host, port = key.port, "h1 pool hit");
                return Some(idle.conn);
            }
            tracing::trace!(host = %key.host, "h1 pool entry expired");
        }
        tracing::trace!(host = %key.host, port = key.port, "h1 pool miss");
        None
    }

    /// Return a connection after a complete exchange. Dropped when it must
    /// close or the idle caps are reached.
    pub fn checkin_h1(&self, key: &PoolKey, conn: PooledH1, limits: &PoolLimits) {
        if !limits.keep_alive || conn.conn.should_close() {
            tracing::trace!(host = %key.host, "h1 connection not reusable");
            return;
        }
        if limits.max_idle > 0 && self.idle_total.load(Ordering::Acquire) >= limits.max_idle {
            tracing::debug!(host = %key.host, "pool idle cap reached, closing connection");
            return;
        }
        let entry = self.entry(key);
        let mut entry = lock(&entry);
        if limits.max_idle_per_host > 0 && entry.idle.len() >= limits.max_idle_per_host {
            // Oldest first.
            entry.idle.remove(0);
            self.idle_total.fetch_sub(1, Ordering::AcqRel);
            tracing::debug!(host = %key.host, "per-host idle cap reached, evicted oldest");
        }
        entry.idle.push(IdleH1 {
            conn,
            since: Instant::now(),
        });
        self.idle_total.fetch_add(1, Ordering::AcqRel);
    }

    /// Open multiplexed connection for `key`.
    pub fn shared(&self, key: &PoolKey, limits: &PoolLimits) -> Option<SharedConnection> {
        let entry = self.existing(key)?;
        let mut entry = lock(&entry);
        let usable = entry
            .shared
            .as_ref()
            .is_some_and(|s| !s.conn.is_closed() && s.last_used.elapsed() < limits.idle_timeout);
        if !usable {
            if entry.shared.take().is_some() {
                tracing::debug!(host = %key.host, "retired closed or idle multiplexed connection");
            }
            return None;
        }
        let shared = entry.shared.as_mut()?;
        shared.last_used = Instant::now();
        tracing::debug!(host = %key.host, port = key.port, "multiplexed connection reused");
        Some(shared.conn.clone())
    }

    pub fn insert_shared(
        &self,
        key: &PoolKey,
        conn: SharedConnection,
        permit: Option<OwnedSemaphorePermit>,
    ) {
        let entry = self.entry(key);
        lock(&entry).shared = Some(SharedEntry {
            conn,
            last_used: Instant::now(),
            _permit: permit,
        });
    }

    /// Drop the shared connection for `key` after it failed.
    pub fn remove_shared(&self, key: &PoolKey) {
        if let Some(entry) = self.existing(key) {
            lock(&entry).shared = None;
        }
    }

    /// Close everything idle longer than `idle_timeout` and forget empty
    /// keys.
    pub fn evict_idle(&self, idle_timeout: Duration) {
        let mut hosts = lock(&self.hosts);
        hosts.retain(|key, entry| {
            let mut entry = lock(entry);
            let before = entry.idle.len();
            entry.idle.retain(|i| i.since.elapsed() < idle_timeout);
            let evicted = before - entry.idle.len();
            if evicted > 0 {
                self.idle_total.fetch_sub(evicted, Ordering::AcqRel);
                tracing::debug!(host = %key.host, evicted, "evicted idle h1 connections");
            }
            if entry
                .shared
                .as_ref()
                .is_some_and(|s| s.conn.is_closed() || s.last_used.elapsed() >= idle_timeout)
            {
                entry.shared = None;
                tracing::debug!(host = %key.host, "evicted idle multiplexed connection");
            }
            !entry.idle.is_empty() || entry.shared.is_some() || entry.slots.is_some()
        });
    }

    /// Close every pooled connection.
    pub fn clear(&self) {
        lock(&self.hosts).clear();
        self.idle_total.store(0, Ordering::Release);
    }

    pub fn stats(&self) -> PoolStats {
        let hosts = lock(&self.hosts);
        let mut stats = PoolStats {
            keys: hosts.len(),
            ..Default::default()
        };
        for entry in hosts.values() {
            let entry = lock(entry);
            stats.idle_h1 += entry.idle.len();
            stats.shared += entry.shared.is_some() as usize;
        }
        stats
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::connector::MaybeTlsStream;
    use tokio::net::{TcpListener, TcpStream};

    fn key(host: &str, fingerprint: u64) -> PoolKey {
        PoolKey {
            scheme: "http".into(),
            host: host.into(),
            port: 80,
            proxy: None,
            fingerprint,
            options: 0,
            pins: 0,
        }
    }

    async fn h1() -> PooledH1 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((s, _)) = listener.accept().await {
                held.push(s);
            }
        });
        let stream = TcpStream::connect(addr).await.unwrap();
        PooledH1::new(H1Connection::new(MaybeTlsStream::Plain(stream)), None)
    }

    #[tokio::test]
    async fn checkin_then_checkout_same_key_only() {
        let pool = ConnectionPool::new();
        let limits = PoolLimits::default();
        pool.checkin_h1(&key("a.test", 1), h1().await, &limits);
        assert_eq!(pool.stats().idle_h1, 1);

        assert!(pool.checkout_h1(&key("a.test", 2), &limits).is_none());
        assert!(pool.checkout_h1(&key("b.test", 1), &limits).is_none());
        assert!(pool.checkout_h1(&key("a.test", 1), &limits).is_some());
        assert!(pool.checkout_h1(&key("a.test", 1), &limits).is_none());
    }

    #[tokio::test]
    async fn keep_alive_off_drops_connection() {
        let pool = ConnectionPool::new();
        let limits = PoolLimits {
            keep_alive: false,
            ..Default::default()
        };
        pool.checkin_h1(&key("a.test", 1), h1().await, &limits);
        assert_eq!(pool.stats().idle_h1, 0);
    }

    #[tokio::test]
    async fn per_host_and_total_idle_caps() {
        let pool = ConnectionPool::new();
        let limits = PoolLimits {
            max_idle_per_host: 1,
            max_idle: 2,
            ..Default::default()
        };
        pool.checkin_h1(&key("a.test", 1), h1().await, &limits);
        pool.checkin_h1(&key("a.test", 1), h1().await, &limits);
        assert_eq!(pool.stats().idle_h1, 1);
        pool.checkin_h1(&key("b.test", 1), h1().await, &limits);
        pool.checkin_h1(&key("c.test", 1), h1().await, &limits);
        assert_eq!(pool.stats().idle_h1, 2);
    }

    #[tokio::test]
    async fn expired_entries_not_returned() {
        let pool = ConnectionPool::new();
        let limits = PoolLimits {
            idle_timeout: Duration::from_millis(10),
            ..Default::default()
        };
        pool.checkin_h1(&key("a.test", 1), h1().await, &limits);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(pool.checkout_h1(&key("a.test", 1), &limits).is_none());

        pool.checkin_h1(&key("a.test", 1), h1().await, &limits);
        tokio::time::sleep(Duration::from_millis(30)).await;
        pool.evict_idle(limits.idle_timeout);
        assert_eq!(pool.stats(), PoolStats::default());
    }

    #[tokio::test]
    async fn slots_bound_connections_per_host() {
        let pool = ConnectionPool::new();
        let limits = PoolLimits {
            max_conns_per_host: 1,
            ..Default::default()
        };
        let k = key("a.test", 1);
        let first = pool.acquire_slot(&k, &limits).await.unwrap();
        assert!(first.is_some());
        let waiting = tokio::time::timeout(Duration::from_millis(50), pool.acquire_slot(&k, &limits)).await;
        assert!(waiting.is_err());
        drop(first);
        assert!(pool.acquire_slot(&k, &limits).await.unwrap().is_some());
    }
}
