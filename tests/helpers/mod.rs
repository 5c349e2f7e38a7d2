#![allow(dead_code)]

pub mod client_hello;
pub mod h2_server;
pub mod http_server;
pub mod proxy;
pub mod tls;

use std::sync::Arc;

use masquerade::{Engine, EngineConfig};

/// Install a test subscriber once; `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("masquerade=debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// A private engine so tests never share pools or sessions.
pub fn engine() -> Arc<Engine> {
    Arc::new(Engine::new(EngineConfig::default()))
}
