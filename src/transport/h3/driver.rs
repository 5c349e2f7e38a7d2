//! Task owning one QUIC connection and its UDP socket.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use quiche::h3::NameValue;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};
use crate::fingerprint::Http3Fingerprint;
use crate::response::Response;
use crate::transport::h2::request_fields;
use crate::transport::HttpRequest;
use crate::version::Protocol;

use super::config::MAX_SEND_UDP_PAYLOAD;
use super::connection::flush;

pub(super) enum Command {
    Request {
        request: HttpRequest,
        response_tx: oneshot::Sender<Result<Response>>,
    },
}

struct Stream {
    response_tx: oneshot::Sender<Result<Response>>,
    status: Option<u16>,
    headers: Vec<(String, String)>,
    body: BytesMut,
    /// Request body bytes quiche has not accepted yet.
    pending_body: Option<Bytes>,
}

type Queued = (HttpRequest, oneshot::Sender<Result<Response>>);

pub(super) struct H3Driver {
    conn: quiche::Connection,
    h3: quiche::h3::Connection,
    socket: UdpSocket,
    local: SocketAddr,
    commands: mpsc::Receiver<Command>,
    fp: Http3Fingerprint,
    closed: Arc<AtomicBool>,
    streams: HashMap<u64, Stream>,
    /// Requests waiting for stream credit.
    queued: VecDeque<Queued>,
    commands_done: bool,
    goaway: bool,
}

impl H3Driver {
    pub(super) fn new(
        conn: quiche::Connection,
        h3: quiche::h3::Connection,
        socket: UdpSocket,
        peer: SocketAddr,
        commands: mpsc::Receiver<Command>,
        fp: Http3Fingerprint,
        closed: Arc<AtomicBool>,
    ) -> Self {
        let local = socket
            .local_addr()
            .unwrap_or_else(|_| SocketAddr::new(peer.ip(), 0));
        Self {
            conn,
            h3,
            socket,
            local,
            commands,
            fp,
            closed,
            streams: HashMap::new(),
            queued: VecDeque::new(),
            commands_done: false,
            goaway: false,
        }
    }

    pub(super) async fn drive(mut self) -> Result<()> {
        let result = self.run().await;
        self.closed.store(true, Ordering::Release);
        let reason = match &result {
            Ok(()) => "h3 connection closed".to_string(),
            Err(e) => e.to_string(),
        };
        for (_, stream) in self.streams.drain() {
            let _ = stream.response_tx.send(Err(Error::quic(reason.clone())));
        }
        for (_, tx) in self.queued.drain(..) {
            let _ = tx.send(Err(Error::quic(reason.clone())));
        }
        result
    }

    async fn run(&mut self) -> Result<()> {
        let mut buf = vec![0u8; 65535];
        let mut out = vec![0u8; MAX_SEND_UDP_PAYLOAD];
        loop {
            flush(&mut self.conn, &self.socket, &mut out).await?;
            if self.conn.is_closed() {
                tracing::debug!("quic connection closed");
                return Ok(());
            }
            if self.commands_done && self.streams.is_empty() && self.queued.is_empty() {
                let _ = self.conn.close(true, 0x100, b"");
                flush(&mut self.conn, &self.socket, &mut out).await?;
                return Ok(());
            }

            let wait = self.conn.timeout().unwrap_or(Duration::from_secs(60));
            tokio::select! {
                command = self.commands.recv(), if !self.commands_done => match command {
                    Some(Command::Request { request, response_tx }) => {
                        self.submit(request, response_tx);
                    }
                    None => self.commands_done = true,
                },
                received = self.socket.recv_from(&mut buf) => {
                    let (len, from) = received?;
                    let info = quiche::RecvInfo { from, to: self.local };
                    match self.conn.recv(&mut buf[..len], info) {
                        Ok(_) | Err(quiche::Error::Done) => {}
                        Err(e) => tracing::trace!(error = %e, "quic packet rejected"),
                    }
                    self.poll_events()?;
                    self.send_pending_bodies();
                    self.promote_queued();
                }
                _ = tokio::time::sleep(wait) => self.conn.on_timeout(),
            }
        }
    }

    fn submit(&mut self, request: HttpRequest, response_tx: oneshot::Sender<Result<Response>>) {
        if self.goaway {
            let _ = response_tx.send(Err(Error::quic("connection is going away")));
            return;
        }
        if let Some((request, response_tx)) = self.open_stream(request, response_tx) {
            self.queued.push_back((request, response_tx));
        }
    }

    /// Returns the request back when quiche has no stream credit for it.
    fn open_stream(
        &mut self,
        request: HttpRequest,
        response_tx: oneshot::Sender<Result<Response>>,
    ) -> Option<Queued> {
        let mut fields = request_fields(&request, &self.fp.pseudo_header_order);
        if let Some(urgency) = self.fp.priority_param {
            if !fields.iter().any(|(k, _)| k == "priority") {
                fields.push(("priority".into(), format!("u={}, i", urgency)));
            }
        }
        let headers: Vec<quiche::h3::Header> = fields
            .iter()
            .map(|(k, v)| quiche::h3::Header::new(k.as_bytes(), v.as_bytes()))
            .collect();
        let body = request.body.clone().filter(|b| !b.is_empty());

        match self.h3.send_request(&mut self.conn, &headers, body.is_none()) {
            Ok(stream_id) => {
                tracing::trace!(stream_id, method = %request.method, "h3 request sent");
                self.streams.insert(
                    stream_id,
                    Stream {
                        response_tx,
                        status: None,
                        headers: Vec::new(),
                        body: BytesMut::new(),
                        pending_body: body,
                    },
                );
                self.send_body(stream_id);
                None
            }
            Err(quiche::h3::Error::StreamBlocked) | Err(quiche::h3::Error::TransportError(quiche::Error::StreamLimit)) => {
                Some((request, response_tx))
            }
            Err(e) => {
                let _ = response_tx.send(Err(Error::quic(format!("failed to send request: {}", e))));
                None
            }
        }
    }

    fn send_body(&mut self, stream_id: u64) {
        let Some(stream) = self.streams.get_mut(&stream_id) else {
            return;
        };
        let Some(mut body) = stream.pending_body.take() else {
            return;
        };
        match self.h3.send_body(&mut self.conn, stream_id, &body, true) {
            Ok(written) if written < body.len() => {
                let _ = body.split_to(written);
                stream.pending_body = Some(body);
            }
            Ok(_) => {}
            Err(quiche::h3::Error::Done) => stream.pending_body = Some(body),
            Err(e) => {
                if let Some(stream) = self.streams.remove(&stream_id) {
                    let _ = stream
                        .response_tx
                        .send(Err(Error::quic(format!("failed to send body: {}", e))));
                }
            }
        }
    }

    fn send_pending_bodies(&mut self) {
        let waiting: Vec<u64> = self
            .streams
            .iter()
            .filter(|(_, s)| s.pending_body.is_some())
            .map(|(id, _)| *id)
            .collect();
        for stream_id in waiting {
            self.send_body(stream_id);
        }
    }

    fn promote_queued(&mut self) {
        while let Some((request, response_tx)) = self.queued.pop_front() {
            if let Some(blocked) = self.open_stream(request, response_tx) {
                self.queued.push_front(blocked);
                break;
            }
        }
    }

    fn poll_events(&mut self) -> Result<()> {
        loop {
            match self.h3.poll(&mut self.conn) {
                Ok((stream_id, quiche::h3::Event::Headers { list, .. })) => {
                    self.on_headers(stream_id, list);
                }
                Ok((stream_id, quiche::h3::Event::Data)) => self.on_data(stream_id),
                Ok((stream_id, quiche::h3::Event::Finished)) => self.complete(stream_id),
                Ok((stream_id, quiche::h3::Event::Reset(code))) => {
                    if let Some(stream) = self.streams.remove(&stream_id) {
                        let _ = stream
                            .response_tx
                            .send(Err(Error::quic(format!("stream reset by peer: {:#x}", code))));
                    }
                }
                Ok((last_id, quiche::h3::Event::GoAway)) => {
                    tracing::debug!(last_id, "h3 goaway received");
                    self.goaway = true;
                    self.closed.store(true, Ordering::Release);
                    for (_, tx) in self.queued.drain(..) {
                        let _ = tx.send(Err(Error::quic("connection is going away")));
                    }
                }
                Ok(_) => {}
                Err(quiche::h3::Error::Done) => return Ok(()),
                Err(e) => return Err(Error::quic(format!("HTTP/3 error: {}", e))),
            }
        }
    }

    fn on_headers(&mut self, stream_id: u64, list: Vec<quiche::h3::Header>) {
        let Some(stream) = self.streams.get_mut(&stream_id) else {
            return;
        };
        let mut status = None;
        let mut headers = Vec::with_capacity(list.len());
        for header in &list {
            let name = String::from_utf8_lossy(header.name()).into_owned();
            let value = String::from_utf8_lossy(header.value()).into_owned();
            if name == ":status" {
                status = value.parse::<u16>().ok();
            } else if !name.starts_with(':') {
                headers.push((name, value));
            }
        }
        match (stream.status, status) {
            // Informational responses precede the final one.
            (_, Some(code)) if (100..200).contains(&code) => {}
            (None, Some(code)) => {
                stream.status = Some(code);
                stream.headers = headers;
            }
            // Trailers.
            (Some(_), None) => stream.headers.extend(headers),
            _ => {}
        }
    }

    fn on_data(&mut self, stream_id: u64) {
        let mut chunk = [0u8; 16 * 1024];
        while let Ok(n) = self.h3.recv_body(&mut self.conn, stream_id, &mut chunk) {
            if let Some(stream) = self.streams.get_mut(&stream_id) {
                stream.body.extend_from_slice(&chunk[..n]);
            }
        }
    }

    fn complete(&mut self, stream_id: u64) {
        let Some(stream) = self.streams.remove(&stream_id) else {
            return;
        };
        let result = match stream.status {
            Some(status) => Ok(Response::new(
                status,
                stream.headers,
                stream.body.freeze(),
                Protocol::Http3,
            )),
            None => Err(Error::protocol("h3 stream finished without a :status")),
        };
        let _ = stream.response_tx.send(result);
    }
}
