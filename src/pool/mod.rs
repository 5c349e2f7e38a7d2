//! Connection reuse: the per-key connection pool and Alt-Svc discovery.

pub mod alt_svc;
pub mod multiplexer;

pub use alt_svc::AltSvcCache;
pub use multiplexer::{ConnectionPool, PoolKey, PoolLimits, PoolStats, PooledH1, SharedConnection};
