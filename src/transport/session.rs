//! Resumption tickets for PSK-capable profiles.
//!
//! BoringSSL hands every new session to a callback on the connector; the
//! newest one per server name is replayed on the next handshake to that name
//! so the ClientHello carries `pre_shared_key` the way a returning browser's
//! does.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use boring2::ssl::SslSession;

/// Browsers drop tickets well before the 7 day TLS 1.3 ceiling.
const TICKET_LIFETIME: Duration = Duration::from_secs(2 * 60 * 60);
const MAX_TICKETS: usize = 256;

#[derive(Clone, Default)]
pub(crate) struct TicketStore {
    tickets: Arc<Mutex<HashMap<String, Ticket>>>,
}

struct Ticket {
    session: SslSession,
    issued: Instant,
}

impl TicketStore {
    fn tickets(&self) -> MutexGuard<'_, HashMap<String, Ticket>> {
        self.tickets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn remember(&self, server_name: &str, session: SslSession) {
        let mut tickets = self.tickets();
        if tickets.len() >= MAX_TICKETS && !tickets.contains_key(server_name) {
            tickets.retain(|_, t| t.issued.elapsed() < TICKET_LIFETIME);
            if tickets.len() >= MAX_TICKETS {
                let oldest = tickets
                    .iter()
                    .min_by_key(|(_, t)| t.issued)
                    .map(|(name, _)| name.clone());
                if let Some(name) = oldest {
                    tickets.remove(&name);
                }
            }
        }
        tracing::trace!(server_name, "resumption ticket stored");
        tickets.insert(
            server_name.to_string(),
            Ticket {
                session,
                issued: Instant::now(),
            },
        );
    }

    /// Ticket to offer to `server_name`; stale ones are forgotten.
    pub(crate) fn ticket_for(&self, server_name: &str) -> Option<SslSession> {
        let mut tickets = self.tickets();
        let fresh = tickets.get(server_name)?.issued.elapsed() < TICKET_LIFETIME;
        if fresh {
            tickets.get(server_name).map(|t| t.session.clone())
        } else {
            tickets.remove(server_name);
            None
        }
    }
}

impl std::fmt::Debug for TicketStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TicketStore")
            .field("tickets", &self.tickets().len())
            .finish()
    }
}
