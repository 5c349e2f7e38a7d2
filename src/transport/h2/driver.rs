//! HTTP/2 connection driver.
//!
//! One task per connection owns the write half, the HPACK contexts and every
//! stream. Handles talk to it over a command channel; the reader task feeds it
//! decoded frames. Everything written while handling one event is flushed
//! together.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;

use crate::error::{Error, Result};
use crate::fingerprint::http2::{Http2Fingerprint, PriorityParam, PseudoHeader};
use crate::response::Response;
use crate::transport::HttpRequest;
use crate::version::Protocol;

use super::connection::request_fields;
use super::frame::*;
use super::hpack::{Decoder, Encoder};

/// Initial window for both directions until SETTINGS say otherwise.
const DEFAULT_WINDOW: u32 = 65_535;

/// HPACK table size the encoder will use at most, whatever the peer allows.
const MAX_ENCODER_TABLE_SIZE: u32 = 4096;

const MAX_WINDOW: i64 = 0x7fff_ffff;

const MAX_STREAM_ID: u32 = 0x7fff_ffff;

pub(super) enum Command {
    Request {
        request: HttpRequest,
        response_tx: oneshot::Sender<Result<Response>>,
    },
}

type ResponseTx = oneshot::Sender<Result<Response>>;

struct Stream {
    response_tx: Option<ResponseTx>,
    status: Option<u16>,
    headers: Vec<(String, String)>,
    body: BytesMut,
    /// Request body not yet covered by a send window.
    pending: Bytes,
    send_window: i64,
    recv_unacked: u32,
    /// END_STREAM has been sent.
    local_closed: bool,
}

impl Stream {
    fn fail(mut self, err: Error) {
        if let Some(tx) = self.response_tx.take() {
            let _ = tx.send(Err(err));
        }
    }
}

/// A header block split across CONTINUATION frames.
struct PartialBlock {
    stream_id: u32,
    block: BytesMut,
    end_stream: bool,
    push: bool,
}

pub(super) struct H2Driver<W> {
    writer: W,
    frames: mpsc::Receiver<Result<Frame>>,
    commands: mpsc::Receiver<Command>,
    commands_open: bool,
    reader: AbortHandle,
    closed: Arc<AtomicBool>,
    out: BytesMut,

    encoder: Encoder,
    decoder: Decoder,
    pseudo_order: Vec<PseudoHeader>,
    header_priority: Option<PriorityParam>,

    streams: HashMap<u32, Stream>,
    queued: VecDeque<(HttpRequest, ResponseTx)>,
    next_stream_id: u32,
    continuation: Option<PartialBlock>,
    going_away: bool,

    max_concurrent: usize,
    peer_initial_window: i64,
    peer_max_frame_size: usize,
    conn_send_window: i64,
    local_stream_window: u32,
    local_conn_window: u32,
    conn_recv_unacked: u32,
}

impl<W> H2Driver<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub(super) fn new(
        writer: W,
        frames: mpsc::Receiver<Result<Frame>>,
        commands: mpsc::Receiver<Command>,
        fp: &Http2Fingerprint,
        closed: Arc<AtomicBool>,
        reader: AbortHandle,
    ) -> Self {
        // Streams used by PRIORITY frames are idle placeholders; requests
        // start above them.
        let next_stream_id = fp
            .priority_frames
            .iter()
            .map(|p| p.stream_id)
            .filter(|id| id % 2 == 1)
            .max()
            .map(|id| id + 2)
            .unwrap_or(1);

        Self {
            writer,
            frames,
            commands,
            commands_open: true,
            reader,
            closed,
            out: BytesMut::with_capacity(16 * 1024),
            encoder: Encoder::new(MAX_ENCODER_TABLE_SIZE as usize),
            decoder: Decoder::new(fp.header_table_size() as usize),
            pseudo_order: fp.pseudo_header_order.clone(),
            header_priority: fp.header_priority.clone(),
            streams: HashMap::new(),
            queued: VecDeque::new(),
            next_stream_id,
            continuation: None,
            going_away: false,
            max_concurrent: usize::MAX,
            peer_initial_window: DEFAULT_WINDOW as i64,
            peer_max_frame_size: DEFAULT_MAX_FRAME_SIZE as usize,
            conn_send_window: DEFAULT_WINDOW as i64,
            local_stream_window: fp.initial_window_size(),
            local_conn_window: DEFAULT_WINDOW.saturating_add(fp.connection_flow),
            conn_recv_unacked: 0,
        }
    }

    /// Run until the connection is closed or every handle is gone.
    pub(super) async fn drive(mut self) -> Result<()> {
        let result = self.run().await;
        self.closed.store(true, Ordering::Release);
        self.reader.abort();
        let reason = match &result {
            Ok(()) => "h2 connection closed".to_string(),
            Err(e) => e.to_string(),
        };
        for (_, stream) in self.streams.drain() {
            stream.fail(Error::connection(reason.clone()));
        }
        for (_, tx) in self.queued.drain(..) {
            let _ = tx.send(Err(Error::connection(reason.clone())));
        }
        result
    }

    async fn run(&mut self) -> Result<()> {
        loop {
            if self.going_away && self.streams.is_empty() {
                return Ok(());
            }
            if !self.commands_open && self.streams.is_empty() && self.queued.is_empty() {
                encode_goaway(&mut self.out, 0, ErrorCode::NoError);
                self.flush().await?;
                tracing::debug!("h2 connection released");
                return Ok(());
            }

            tokio::select! {
                cmd = self.commands.recv(), if self.commands_open => match cmd {
                    Some(Command::Request { request, response_tx }) => {
                        self.submit(request, response_tx);
                    }
                    None => self.commands_open = false,
                },
                frame = self.frames.recv() => match frame {
                    Some(Ok(frame)) => self.handle_frame(frame)?,
                    Some(Err(e)) => return Err(e),
                    None => return Err(Error::connection("h2 frame reader stopped")),
                },
            }
            self.flush().await?;
        }
    }

    async fn flush(&mut self) -> Result<()> {
        if self.out.is_empty() {
            return Ok(());
        }
        let buf = self.out.split();
        self.writer.write_all(&buf).await?;
        self.writer.flush().await?;
        Ok(())
    }

    fn submit(&mut self, request: HttpRequest, response_tx: ResponseTx) {
        if self.going_away {
            let _ = response_tx.send(Err(Error::connection("h2 connection is going away")));
            return;
        }
        if self.streams.len() >= self.max_concurrent {
            tracing::trace!(active = self.streams.len(), "h2 stream limit reached, queueing");
            self.queued.push_back((request, response_tx));
            return;
        }
        self.open_stream(request, response_tx);
    }

    fn open_stream(&mut self, request: HttpRequest, response_tx: ResponseTx) {
        let stream_id = self.next_stream_id;
        if stream_id > MAX_STREAM_ID {
            self.going_away = true;
            self.closed.store(true, Ordering::Release);
            let _ = response_tx.send(Err(Error::connection("h2 stream ids exhausted")));
            return;
        }
        self.next_stream_id += 2;

        let fields = request_fields(&request, &self.pseudo_order);
        let mut block = BytesMut::new();
        self.encoder
            .encode(fields.iter().map(|(n, v)| (n.as_str(), v.as_str())), &mut block);

        let body = request.body.unwrap_or_default();
        let end_stream = body.is_empty();
        encode_headers(
            &mut self.out,
            stream_id,
            &block,
            end_stream,
            self.header_priority.as_ref(),
            self.peer_max_frame_size,
        );
        tracing::trace!(stream_id, method = %request.method, "h2 request opened");

        self.streams.insert(
            stream_id,
            Stream {
                response_tx: Some(response_tx),
                status: None,
                headers: Vec::new(),
                body: BytesMut::new(),
                pending: body,
                send_window: self.peer_initial_window,
                recv_unacked: 0,
                local_closed: end_stream,
            },
        );
        self.send_pending(stream_id);
    }

    /// Emit as much of a stream's body as both send windows allow.
    fn send_pending(&mut self, stream_id: u32) {
        let Some(stream) = self.streams.get_mut(&stream_id) else {
            return;
        };
        while !stream.pending.is_empty() {
            let window = stream.send_window.min(self.conn_send_window);
            if window <= 0 {
                tracing::trace!(stream_id, "h2 send window exhausted");
                break;
            }
            let n = (window as usize)
                .min(self.peer_max_frame_size)
                .min(stream.pending.len());
            let chunk = stream.pending.split_to(n);
            stream.send_window -= n as i64;
            self.conn_send_window -= n as i64;
            let end = stream.pending.is_empty();
            encode_data(&mut self.out, stream_id, &chunk, end);
            if end {
                stream.local_closed = true;
            }
        }
    }

    fn resume_all(&mut self) {
        let blocked: Vec<u32> = self
            .streams
            .iter()
            .filter(|(_, s)| !s.pending.is_empty())
            .map(|(id, _)| *id)
            .collect();
        for id in blocked {
            self.send_pending(id);
        }
    }

    fn promote_queued(&mut self) {
        while !self.going_away && self.streams.len() < self.max_concurrent {
            let Some((request, tx)) = self.queued.pop_front() else {
                break;
            };
            self.open_stream(request, tx);
        }
    }

    fn handle_frame(&mut self, frame: Frame) -> Result<()> {
        if let Some(partial) = &self.continuation {
            match &frame {
                Frame::Continuation { stream_id, .. } if *stream_id == partial.stream_id => {}
                _ => return Err(Error::protocol("expected CONTINUATION frame")),
            }
        }

        match frame {
            Frame::Data {
                stream_id,
                data,
                end_stream,
                flow_len,
            } => self.on_data(stream_id, data, end_stream, flow_len),
            Frame::Headers {
                stream_id,
                block,
                end_stream,
                end_headers,
            } => {
                if end_headers {
                    self.on_header_block(stream_id, &block, end_stream, false)?;
                } else {
                    self.continuation = Some(PartialBlock {
                        stream_id,
                        block: BytesMut::from(&block[..]),
                        end_stream,
                        push: false,
                    });
                }
            }
            Frame::Continuation {
                stream_id: _,
                block,
                end_headers,
            } => {
                let Some(mut partial) = self.continuation.take() else {
                    return Err(Error::protocol("CONTINUATION without HEADERS"));
                };
                partial.block.extend_from_slice(&block);
                if end_headers {
                    self.on_header_block(
                        partial.stream_id,
                        &partial.block,
                        partial.end_stream,
                        partial.push,
                    )?;
                } else {
                    self.continuation = Some(partial);
                }
            }
            Frame::PushPromise {
                stream_id,
                promised_id,
                block,
                end_headers,
            } => {
                tracing::debug!(stream_id, promised_id, "refusing server push");
                encode_rst_stream(&mut self.out, promised_id, ErrorCode::RefusedStream);
                if end_headers {
                    // Decoded only to keep the HPACK table in sync.
                    self.decoder.decode(&block)?;
                } else {
                    self.continuation = Some(PartialBlock {
                        stream_id,
                        block: BytesMut::from(&block[..]),
                        end_stream: false,
                        push: true,
                    });
                }
            }
            Frame::Settings { ack, values } => {
                if !ack {
                    self.apply_settings(&values)?;
                    encode_settings_ack(&mut self.out);
                }
            }
            Frame::Ping { ack, payload } => {
                if !ack {
                    encode_ping_ack(&mut self.out, payload);
                }
            }
            Frame::GoAway {
                last_stream_id,
                error_code,
                debug,
            } => self.on_goaway(last_stream_id, error_code, &debug),
            Frame::WindowUpdate {
                stream_id,
                increment,
            } => self.on_window_update(stream_id, increment)?,
            Frame::RstStream {
                stream_id,
                error_code,
            } => {
                if let Some(stream) = self.streams.remove(&stream_id) {
                    let reason = ErrorCode::from_u32(error_code)
                        .map(|c| format!("{:?}", c))
                        .unwrap_or_else(|| format!("0x{:x}", error_code));
                    tracing::debug!(stream_id, reason = %reason, "h2 stream reset by peer");
                    stream.fail(Error::protocol(format!(
                        "stream {} reset by peer: {}",
                        stream_id, reason
                    )));
                    self.promote_queued();
                }
            }
            Frame::Priority { .. } | Frame::Unknown { .. } => {}
        }
        Ok(())
    }

    fn on_header_block(
        &mut self,
        stream_id: u32,
        block: &[u8],
        end_stream: bool,
        push: bool,
    ) -> Result<()> {
        // Always decode: skipping a block desynchronizes the dynamic table.
        let fields = self.decoder.decode(block)?;
        if push {
            return Ok(());
        }
        let Some(stream) = self.streams.get_mut(&stream_id) else {
            tracing::trace!(stream_id, "headers for unknown stream");
            return Ok(());
        };

        if stream.status.is_none() {
            let status = fields
                .iter()
                .find(|(n, _)| n == ":status")
                .and_then(|(_, v)| v.parse::<u16>().ok());
            let Some(status) = status else {
                self.reset(stream_id, ErrorCode::ProtocolError, "response without :status");
                return Ok(());
            };
            if (100..200).contains(&status) {
                return Ok(());
            }
            stream.status = Some(status);
            stream.headers = fields.into_iter().filter(|(n, _)| !n.starts_with(':')).collect();
        } else {
            // Trailers.
            stream
                .headers
                .extend(fields.into_iter().filter(|(n, _)| !n.starts_with(':')));
        }

        if end_stream {
            self.complete(stream_id);
        }
        Ok(())
    }

    fn on_data(&mut self, stream_id: u32, data: Bytes, end_stream: bool, flow_len: u32) {
        self.conn_recv_unacked += flow_len;
        if self.conn_recv_unacked >= self.local_conn_window / 2 {
            encode_window_update(&mut self.out, 0, self.conn_recv_unacked);
            self.conn_recv_unacked = 0;
        }

        let Some(stream) = self.streams.get_mut(&stream_id) else {
            return;
        };
        if stream.status.is_none() {
            self.reset(stream_id, ErrorCode::ProtocolError, "DATA before response HEADERS");
            return;
        }
        stream.body.extend_from_slice(&data);
        if end_stream {
            self.complete(stream_id);
            return;
        }
        stream.recv_unacked += flow_len;
        if stream.recv_unacked >= self.local_stream_window / 2 && stream.recv_unacked > 0 {
            encode_window_update(&mut self.out, stream_id, stream.recv_unacked);
            stream.recv_unacked = 0;
        }
    }

    fn on_window_update(&mut self, stream_id: u32, increment: u32) -> Result<()> {
        if stream_id == 0 {
            if increment == 0 {
                return Err(Error::protocol("connection WINDOW_UPDATE of 0"));
            }
            self.conn_send_window += increment as i64;
            if self.conn_send_window > MAX_WINDOW {
                return Err(Error::protocol("connection send window overflow"));
            }
            self.resume_all();
            return Ok(());
        }

        let Some(stream) = self.streams.get_mut(&stream_id) else {
            return Ok(());
        };
        if increment == 0 {
            self.reset(stream_id, ErrorCode::ProtocolError, "stream WINDOW_UPDATE of 0");
            return Ok(());
        }
        stream.send_window += increment as i64;
        if stream.send_window > MAX_WINDOW {
            self.reset(stream_id, ErrorCode::FlowControlError, "stream send window overflow");
            return Ok(());
        }
        self.send_pending(stream_id);
        Ok(())
    }

    fn apply_settings(&mut self, values: &[(u16, u32)]) -> Result<()> {
        for &(id, value) in values {
            match id {
                settings::HEADER_TABLE_SIZE => {
                    self.encoder
                        .set_max_table_size(value.min(MAX_ENCODER_TABLE_SIZE) as usize);
                }
                settings::MAX_CONCURRENT_STREAMS => {
                    self.max_concurrent = value as usize;
                }
                settings::INITIAL_WINDOW_SIZE => {
                    if value as i64 > MAX_WINDOW {
                        return Err(Error::protocol("INITIAL_WINDOW_SIZE above 2^31-1"));
                    }
                    let delta = value as i64 - self.peer_initial_window;
                    self.peer_initial_window = value as i64;
                    for stream in self.streams.values_mut() {
                        stream.send_window += delta;
                    }
                }
                settings::MAX_FRAME_SIZE => {
                    if !(DEFAULT_MAX_FRAME_SIZE..=MAX_ALLOWED_FRAME_SIZE).contains(&value) {
                        return Err(Error::protocol(format!("invalid MAX_FRAME_SIZE {}", value)));
                    }
                    self.peer_max_frame_size = value as usize;
                }
                _ => {}
            }
        }
        tracing::trace!(?values, "h2 peer settings applied");
        self.resume_all();
        self.promote_queued();
        Ok(())
    }

    fn on_goaway(&mut self, last_stream_id: u32, error_code: u32, debug: &[u8]) {
        tracing::debug!(
            last_stream_id,
            error_code,
            debug = %String::from_utf8_lossy(debug),
            "h2 GOAWAY received"
        );
        self.going_away = true;
        self.closed.store(true, Ordering::Release);

        let unprocessed: Vec<u32> = self
            .streams
            .keys()
            .filter(|id| **id > last_stream_id)
            .copied()
            .collect();
        for id in unprocessed {
            if let Some(stream) = self.streams.remove(&id) {
                stream.fail(Error::connection(format!(
                    "stream {} not processed before GOAWAY",
                    id
                )));
            }
        }
        for (_, tx) in self.queued.drain(..) {
            let _ = tx.send(Err(Error::connection("h2 connection is going away")));
        }
    }

    fn reset(&mut self, stream_id: u32, code: ErrorCode, reason: &str) {
        encode_rst_stream(&mut self.out, stream_id, code);
        if let Some(stream) = self.streams.remove(&stream_id) {
            stream.fail(Error::protocol(format!("stream {}: {}", stream_id, reason)));
        }
        self.promote_queued();
    }

    fn complete(&mut self, stream_id: u32) {
        if let Some(mut stream) = self.streams.remove(&stream_id) {
            if !stream.local_closed {
                // Response finished before our body did; stop sending.
                encode_rst_stream(&mut self.out, stream_id, ErrorCode::NoError);
            }
            let response = Response::new(
                stream.status.unwrap_or_default(),
                std::mem::take(&mut stream.headers),
                std::mem::take(&mut stream.body).freeze(),
                Protocol::Http2,
            );
            tracing::trace!(stream_id, status = response.status, "h2 response complete");
            if let Some(tx) = stream.response_tx.take() {
                let _ = tx.send(Ok(response));
            }
        }
        self.promote_queued();
    }
}
