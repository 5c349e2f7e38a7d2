//! HTTP/2 frame layer (RFC 9113 section 4 and 6).
//!
//! Encoding writes straight into a `BytesMut` so the connection preface,
//! SETTINGS, WINDOW_UPDATE and PRIORITY frames can go out in a single write,
//! in exactly the order the fingerprint dictates.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::fingerprint::PriorityParam;

pub const FRAME_HEADER_SIZE: usize = 9;

pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;

/// Largest frame payload we accept regardless of what we advertised.
pub const MAX_ALLOWED_FRAME_SIZE: u32 = (1 << 24) - 1;

pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

pub mod frame_type {
    pub const DATA: u8 = 0x0;
    pub const HEADERS: u8 = 0x1;
    pub const PRIORITY: u8 = 0x2;
    pub const RST_STREAM: u8 = 0x3;
    pub const SETTINGS: u8 = 0x4;
    pub const PUSH_PROMISE: u8 = 0x5;
    pub const PING: u8 = 0x6;
    pub const GOAWAY: u8 = 0x7;
    pub const WINDOW_UPDATE: u8 = 0x8;
    pub const CONTINUATION: u8 = 0x9;
}

pub mod flags {
    pub const END_STREAM: u8 = 0x1;
    pub const ACK: u8 = 0x1;
    pub const END_HEADERS: u8 = 0x4;
    pub const PADDED: u8 = 0x8;
    pub const PRIORITY: u8 = 0x20;
}

pub mod settings {
    pub const HEADER_TABLE_SIZE: u16 = 0x1;
    pub const ENABLE_PUSH: u16 = 0x2;
    pub const MAX_CONCURRENT_STREAMS: u16 = 0x3;
    pub const INITIAL_WINDOW_SIZE: u16 = 0x4;
    pub const MAX_FRAME_SIZE: u16 = 0x5;
    pub const MAX_HEADER_LIST_SIZE: u16 = 0x6;
}

/// HTTP/2 error codes (RFC 9113 section 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    NoError = 0x0,
    ProtocolError = 0x1,
    InternalError = 0x2,
    FlowControlError = 0x3,
    SettingsTimeout = 0x4,
    StreamClosed = 0x5,
    FrameSizeError = 0x6,
    RefusedStream = 0x7,
    Cancel = 0x8,
    CompressionError = 0x9,
    ConnectError = 0xa,
    EnhanceYourCalm = 0xb,
    InadequateSecurity = 0xc,
    Http11Required = 0xd,
}

impl ErrorCode {
    pub fn from_u32(code: u32) -> Option<Self> {
        use ErrorCode::*;
        Some(match code {
            0x0 => NoError,
            0x1 => ProtocolError,
            0x2 => InternalError,
            0x3 => FlowControlError,
            0x4 => SettingsTimeout,
            0x5 => StreamClosed,
            0x6 => FrameSizeError,
            0x7 => RefusedStream,
            0x8 => Cancel,
            0x9 => CompressionError,
            0xa => ConnectError,
            0xb => EnhanceYourCalm,
            0xc => InadequateSecurity,
            0xd => Http11Required,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: u32,
    pub kind: u8,
    pub flags: u8,
    pub stream_id: u32,
}

impl FrameHeader {
    pub fn parse(buf: &[u8; FRAME_HEADER_SIZE]) -> Self {
        Self {
            length: ((buf[0] as u32) << 16) | ((buf[1] as u32) << 8) | buf[2] as u32,
            kind: buf[3],
            flags: buf[4],
            stream_id: u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]) & 0x7fff_ffff,
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8((self.length >> 16) as u8);
        buf.put_u8((self.length >> 8) as u8);
        buf.put_u8(self.length as u8);
        buf.put_u8(self.kind);
        buf.put_u8(self.flags);
        buf.put_u32(self.stream_id & 0x7fff_ffff);
    }

    pub fn has(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Data {
        stream_id: u32,
        data: Bytes,
        end_stream: bool,
        /// Bytes counted against flow control, padding included.
        flow_len: u32,
    },
    Headers {
        stream_id: u32,
        block: Bytes,
        end_stream: bool,
        end_headers: bool,
    },
    Priority {
        stream_id: u32,
    },
    RstStream {
        stream_id: u32,
        error_code: u32,
    },
    Settings {
        ack: bool,
        values: Vec<(u16, u32)>,
    },
    PushPromise {
        stream_id: u32,
        promised_id: u32,
        block: Bytes,
        end_headers: bool,
    },
    Ping {
        ack: bool,
        payload: [u8; 8],
    },
    GoAway {
        last_stream_id: u32,
        error_code: u32,
        debug: Bytes,
    },
    WindowUpdate {
        stream_id: u32,
        increment: u32,
    },
    Continuation {
        stream_id: u32,
        block: Bytes,
        end_headers: bool,
    },
    /// Extension frame types are ignored (RFC 9113 section 5.5).
    Unknown {
        kind: u8,
    },
}

fn strip_padding(header: &FrameHeader, payload: &mut Bytes) -> Result<()> {
    if header.has(flags::PADDED) {
        if payload.is_empty() {
            return Err(Error::protocol("padded frame without pad length"));
        }
        let pad = payload.get_u8() as usize;
        if pad > payload.len() {
            return Err(Error::protocol("padding exceeds frame payload"));
        }
        payload.truncate(payload.len() - pad);
    }
    Ok(())
}

impl Frame {
    pub fn decode(header: FrameHeader, mut payload: Bytes) -> Result<Self> {
        let sid = header.stream_id;
        let frame = match header.kind {
            frame_type::DATA => {
                if sid == 0 {
                    return Err(Error::protocol("DATA on stream 0"));
                }
                let flow_len = payload.len() as u32;
                strip_padding(&header, &mut payload)?;
                Frame::Data {
                    stream_id: sid,
                    data: payload,
                    end_stream: header.has(flags::END_STREAM),
                    flow_len,
                }
            }
            frame_type::HEADERS => {
                if sid == 0 {
                    return Err(Error::protocol("HEADERS on stream 0"));
                }
                strip_padding(&header, &mut payload)?;
                if header.has(flags::PRIORITY) {
                    if payload.len() < 5 {
                        return Err(Error::protocol("HEADERS priority block truncated"));
                    }
                    payload.advance(5);
                }
                Frame::Headers {
                    stream_id: sid,
                    block: payload,
                    end_stream: header.has(flags::END_STREAM),
                    end_headers: header.has(flags::END_HEADERS),
                }
            }
            frame_type::PRIORITY => {
                if payload.len() != 5 {
                    return Err(Error::protocol("PRIORITY frame must be 5 bytes"));
                }
                Frame::Priority { stream_id: sid }
            }
            frame_type::RST_STREAM => {
                if payload.len() != 4 {
                    return Err(Error::protocol("RST_STREAM frame must be 4 bytes"));
                }
                Frame::RstStream {
                    stream_id: sid,
                    error_code: payload.get_u32(),
                }
            }
            frame_type::SETTINGS => {
                if sid != 0 {
                    return Err(Error::protocol("SETTINGS on a stream"));
                }
                let ack = header.has(flags::ACK);
                if ack && !payload.is_empty() {
                    return Err(Error::protocol("SETTINGS ack with payload"));
                }
                if payload.len() % 6 != 0 {
                    return Err(Error::protocol("SETTINGS payload not a multiple of 6"));
                }
                let mut values = Vec::with_capacity(payload.len() / 6);
                while payload.has_remaining() {
                    values.push((payload.get_u16(), payload.get_u32()));
                }
                Frame::Settings { ack, values }
            }
            frame_type::PUSH_PROMISE => {
                strip_padding(&header, &mut payload)?;
                if payload.len() < 4 {
                    return Err(Error::protocol("PUSH_PROMISE truncated"));
                }
                Frame::PushPromise {
                    stream_id: sid,
                    promised_id: payload.get_u32() & 0x7fff_ffff,
                    block: payload,
                    end_headers: header.has(flags::END_HEADERS),
                }
            }
            frame_type::PING => {
                if payload.len() != 8 {
                    return Err(Error::protocol("PING frame must be 8 bytes"));
                }
                let mut data = [0u8; 8];
                payload.copy_to_slice(&mut data);
                Frame::Ping {
                    ack: header.has(flags::ACK),
                    payload: data,
                }
            }
            frame_type::GOAWAY => {
                if payload.len() < 8 {
                    return Err(Error::protocol("GOAWAY truncated"));
                }
                Frame::GoAway {
                    last_stream_id: payload.get_u32() & 0x7fff_ffff,
                    error_code: payload.get_u32(),
                    debug: payload,
                }
            }
            frame_type::WINDOW_UPDATE => {
                if payload.len() != 4 {
                    return Err(Error::protocol("WINDOW_UPDATE frame must be 4 bytes"));
                }
                Frame::WindowUpdate {
                    stream_id: sid,
                    increment: payload.get_u32() & 0x7fff_ffff,
                }
            }
            frame_type::CONTINUATION => Frame::Continuation {
                stream_id: sid,
                block: payload,
                end_headers: header.has(flags::END_HEADERS),
            },
            kind => Frame::Unknown { kind },
        };
        Ok(frame)
    }
}

fn put_header(buf: &mut BytesMut, length: usize, kind: u8, flags: u8, stream_id: u32) {
    FrameHeader {
        length: length as u32,
        kind,
        flags,
        stream_id,
    }
    .encode(buf);
}

/// SETTINGS with parameters in the given order; unknown ids are written as-is.
pub fn encode_settings(buf: &mut BytesMut, values: &[(u16, u32)]) {
    put_header(buf, values.len() * 6, frame_type::SETTINGS, 0, 0);
    for (id, value) in values {
        buf.put_u16(*id);
        buf.put_u32(*value);
    }
}

pub fn encode_settings_ack(buf: &mut BytesMut) {
    put_header(buf, 0, frame_type::SETTINGS, flags::ACK, 0);
}

pub fn encode_window_update(buf: &mut BytesMut, stream_id: u32, increment: u32) {
    put_header(buf, 4, frame_type::WINDOW_UPDATE, 0, stream_id);
    buf.put_u32(increment & 0x7fff_ffff);
}

fn put_priority(buf: &mut BytesMut, p: &PriorityParam) {
    let dep = if p.exclusive {
        p.stream_dep | 0x8000_0000
    } else {
        p.stream_dep & 0x7fff_ffff
    };
    buf.put_u32(dep);
    buf.put_u8(p.weight.saturating_sub(1).min(255) as u8);
}

pub fn encode_priority(buf: &mut BytesMut, stream_id: u32, p: &PriorityParam) {
    put_header(buf, 5, frame_type::PRIORITY, 0, stream_id);
    put_priority(buf, p);
}

/// HEADERS followed by as many CONTINUATION frames as the block needs.
pub fn encode_headers(
    buf: &mut BytesMut,
    stream_id: u32,
    block: &[u8],
    end_stream: bool,
    priority: Option<&PriorityParam>,
    max_frame_size: usize,
) {
    let prio_len = if priority.is_some() { 5 } else { 0 };
    let first_len = block.len().min(max_frame_size - prio_len);
    let (first, mut rest) = block.split_at(first_len);

    let mut f = 0;
    if end_stream {
        f |= flags::END_STREAM;
    }
    if rest.is_empty() {
        f |= flags::END_HEADERS;
    }
    if priority.is_some() {
        f |= flags::PRIORITY;
    }
    put_header(buf, first.len() + prio_len, frame_type::HEADERS, f, stream_id);
    if let Some(p) = priority {
        put_priority(buf, p);
    }
    buf.put_slice(first);

    while !rest.is_empty() {
        let n = rest.len().min(max_frame_size);
        let (chunk, tail) = rest.split_at(n);
        let f = if tail.is_empty() { flags::END_HEADERS } else { 0 };
        put_header(buf, chunk.len(), frame_type::CONTINUATION, f, stream_id);
        buf.put_slice(chunk);
        rest = tail;
    }
}

pub fn encode_data(buf: &mut BytesMut, stream_id: u32, data: &[u8], end_stream: bool) {
    let f = if end_stream { flags::END_STREAM } else { 0 };
    put_header(buf, data.len(), frame_type::DATA, f, stream_id);
    buf.put_slice(data);
}

pub fn encode_ping_ack(buf: &mut BytesMut, payload: [u8; 8]) {
    put_header(buf, 8, frame_type::PING, flags::ACK, 0);
    buf.put_slice(&payload);
}

pub fn encode_rst_stream(buf: &mut BytesMut, stream_id: u32, code: ErrorCode) {
    put_header(buf, 4, frame_type::RST_STREAM, 0, stream_id);
    buf.put_u32(code as u32);
}

pub fn encode_goaway(buf: &mut BytesMut, last_stream_id: u32, code: ErrorCode) {
    put_header(buf, 8, frame_type::GOAWAY, 0, 0);
    buf.put_u32(last_stream_id & 0x7fff_ffff);
    buf.put_u32(code as u32);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(buf: &BytesMut) -> (FrameHeader, Bytes) {
        let mut head = [0u8; FRAME_HEADER_SIZE];
        head.copy_from_slice(&buf[..FRAME_HEADER_SIZE]);
        let header = FrameHeader::parse(&head);
        let payload = Bytes::copy_from_slice(&buf[FRAME_HEADER_SIZE..]);
        (header, payload)
    }

    #[test]
    fn settings_keep_order_and_unknown_ids() {
        let mut buf = BytesMut::new();
        encode_settings(&mut buf, &[(4, 6291456), (1, 65536), (0x0a0a, 7)]);
        let (header, payload) = split(&buf);
        assert_eq!(header.kind, frame_type::SETTINGS);
        assert_eq!(header.length, 18);
        match Frame::decode(header, payload).unwrap() {
            Frame::Settings { ack, values } => {
                assert!(!ack);
                assert_eq!(values, vec![(4, 6291456), (1, 65536), (0x0a0a, 7)]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn headers_with_priority_and_continuation() {
        let block = vec![0x82u8; 40];
        let prio = PriorityParam {
            stream_dep: 0,
            exclusive: true,
            weight: 256,
        };
        let mut buf = BytesMut::new();
        encode_headers(&mut buf, 1, &block, true, Some(&prio), 20);

        let mut head = [0u8; FRAME_HEADER_SIZE];
        head.copy_from_slice(&buf[..9]);
        let first = FrameHeader::parse(&head);
        assert_eq!(first.kind, frame_type::HEADERS);
        assert!(first.has(flags::PRIORITY));
        assert!(first.has(flags::END_STREAM));
        assert!(!first.has(flags::END_HEADERS));
        assert_eq!(first.length, 20);
        assert_eq!(&buf[9..13], &[0x80, 0, 0, 0]);
        assert_eq!(buf[13], 255);

        let mut offset = 9 + first.length as usize;
        let mut total = first.length as usize - 5;
        let mut saw_end = false;
        while offset < buf.len() {
            head.copy_from_slice(&buf[offset..offset + 9]);
            let h = FrameHeader::parse(&head);
            assert_eq!(h.kind, frame_type::CONTINUATION);
            total += h.length as usize;
            saw_end = h.has(flags::END_HEADERS);
            offset += 9 + h.length as usize;
        }
        assert_eq!(total, 40);
        assert!(saw_end);
    }

    #[test]
    fn padded_data_counts_padding_for_flow_control() {
        let header = FrameHeader {
            length: 6,
            kind: frame_type::DATA,
            flags: flags::PADDED | flags::END_STREAM,
            stream_id: 3,
        };
        let payload = Bytes::from_static(&[2, b'h', b'i', b'!', 0, 0]);
        match Frame::decode(header, payload).unwrap() {
            Frame::Data {
                data,
                end_stream,
                flow_len,
                ..
            } => {
                assert_eq!(&data[..], b"hi!");
                assert!(end_stream);
                assert_eq!(flow_len, 6);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn rejects_malformed_control_frames() {
        let ping = FrameHeader {
            length: 4,
            kind: frame_type::PING,
            flags: 0,
            stream_id: 0,
        };
        assert!(Frame::decode(ping, Bytes::from_static(&[0; 4])).is_err());

        let settings = FrameHeader {
            length: 6,
            kind: frame_type::SETTINGS,
            flags: 0,
            stream_id: 1,
        };
        assert!(Frame::decode(settings, Bytes::from_static(&[0; 6])).is_err());
    }
}
