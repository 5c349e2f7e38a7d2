//! Cloneable handle onto a running HTTP/2 connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};
use crate::response::Response;
use crate::transport::HttpRequest;

use super::driver::Command;

/// Submits requests to the connection's driver task. Clones share the
/// connection; the driver shuts it down once the last clone is dropped and
/// its streams have finished.
#[derive(Clone)]
pub struct H2Handle {
    commands: mpsc::Sender<Command>,
    closed: Arc<AtomicBool>,
}

impl H2Handle {
    pub(super) fn new(commands: mpsc::Sender<Command>, closed: Arc<AtomicBool>) -> Self {
        Self { commands, closed }
    }

    /// Send a request and wait for the complete response.
    pub async fn send_request(&self, request: HttpRequest) -> Result<Response> {
        let (response_tx, response_rx) = oneshot::channel();
        self.commands
            .send(Command::Request {
                request,
                response_tx,
            })
            .await
            .map_err(|_| Error::connection("h2 connection closed"))?;
        response_rx
            .await
            .map_err(|_| Error::connection("h2 connection closed before the response completed"))?
    }

    /// Whether new requests can no longer be sent (GOAWAY, I/O failure or
    /// driver exit).
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.commands.is_closed()
    }
}

impl std::fmt::Debug for H2Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("H2Handle")
            .field("closed", &self.is_closed())
            .finish()
    }
}
