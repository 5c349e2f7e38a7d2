//! Cloneable handle onto a running HTTP/3 connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};
use crate::response::Response;
use crate::transport::HttpRequest;

use super::driver::Command;

#[derive(Clone)]
pub struct H3Handle {
    commands: mpsc::Sender<Command>,
    closed: Arc<AtomicBool>,
}

impl H3Handle {
    pub(super) fn new(commands: mpsc::Sender<Command>, closed: Arc<AtomicBool>) -> Self {
        Self { commands, closed }
    }

    pub async fn send_request(&self, request: HttpRequest) -> Result<Response> {
        let (response_tx, response_rx) = oneshot::channel();
        self.commands
            .send(Command::Request {
                request,
                response_tx,
            })
            .await
            .map_err(|_| Error::quic("h3 connection closed"))?;
        response_rx
            .await
            .map_err(|_| Error::quic("h3 connection closed before the response completed"))?
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.commands.is_closed()
    }
}

impl std::fmt::Debug for H3Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("H3Handle")
            .field("closed", &self.is_closed())
            .finish()
    }
}
