//! HTTP/2 connection setup: preface, fingerprinted SETTINGS, and the frame
//! reader that feeds the driver.

use bytes::{Bytes, BytesMut};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf};
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::fingerprint::http2::{Http2Fingerprint, PseudoHeader};
use crate::transport::{is_connection_specific, HttpRequest};

use super::driver::H2Driver;
use super::frame::*;
use super::handle::H2Handle;

/// Queue depth between the reader task and the driver.
const FRAME_CHANNEL_CAPACITY: usize = 64;

/// Queue depth for requests submitted through handles.
const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Perform the client side of the HTTP/2 handshake and spawn the driver.
///
/// The preface, SETTINGS (in fingerprint order), the connection-level
/// WINDOW_UPDATE and any PRIORITY frames go out in a single write, matching
/// what browsers put in their first TLS record.
pub async fn handshake<S>(stream: S, fp: &Http2Fingerprint) -> Result<H2Handle>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (read_half, mut write_half) = tokio::io::split(stream);

    let mut buf = BytesMut::with_capacity(256);
    buf.extend_from_slice(CONNECTION_PREFACE);
    encode_settings(&mut buf, &fp.settings);
    if fp.connection_flow > 0 {
        encode_window_update(&mut buf, 0, fp.connection_flow);
    }
    for frame in &fp.priority_frames {
        encode_priority(&mut buf, frame.stream_id, &frame.priority_param);
    }
    write_half.write_all(&buf).await?;
    write_half.flush().await?;

    tracing::debug!(
        settings = fp.settings.len(),
        window_update = fp.connection_flow,
        priority_frames = fp.priority_frames.len(),
        "h2 preface sent"
    );

    let max_frame_size = fp
        .setting(settings::MAX_FRAME_SIZE)
        .unwrap_or(DEFAULT_MAX_FRAME_SIZE);
    let (frame_tx, frame_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
    let reader = tokio::spawn(read_frames(read_half, frame_tx, max_frame_size));

    let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
    let closed = Arc::new(AtomicBool::new(false));
    let driver = H2Driver::new(
        write_half,
        frame_rx,
        command_rx,
        fp,
        closed.clone(),
        reader.abort_handle(),
    );
    tokio::spawn(async move {
        if let Err(e) = driver.drive().await {
            tracing::debug!(error = %e, "h2 driver stopped");
        }
    });

    Ok(H2Handle::new(command_tx, closed))
}

/// Read frames until EOF or error and hand them to the driver.
///
/// Runs as its own task so a partially read frame is never lost to a
/// cancelled `select!` branch in the driver.
async fn read_frames<S>(
    mut reader: ReadHalf<S>,
    tx: mpsc::Sender<Result<Frame>>,
    max_frame_size: u32,
) where
    S: AsyncRead + AsyncWrite,
{
    loop {
        let frame = read_frame(&mut reader, max_frame_size).await;
        let stop = frame.is_err();
        if tx.send(frame).await.is_err() || stop {
            break;
        }
    }
}

async fn read_frame<R>(reader: &mut R, max_frame_size: u32) -> Result<Frame>
where
    R: AsyncRead + Unpin,
{
    let mut head = [0u8; FRAME_HEADER_SIZE];
    reader.read_exact(&mut head).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::connection("h2 connection closed by peer")
        } else {
            Error::Io(e)
        }
    })?;
    let header = FrameHeader::parse(&head);
    if header.length > max_frame_size.max(DEFAULT_MAX_FRAME_SIZE) {
        return Err(Error::protocol(format!(
            "frame of {} bytes exceeds max frame size {}",
            header.length, max_frame_size
        )));
    }
    let mut payload = vec![0u8; header.length as usize];
    reader.read_exact(&mut payload).await?;
    tracing::trace!(
        kind = header.kind,
        flags = header.flags,
        stream_id = header.stream_id,
        len = header.length,
        "h2 frame received"
    );
    Frame::decode(header, Bytes::from(payload))
}

/// Field list for a request: pseudo headers in fingerprint order, then the
/// regular headers lowercased with connection-specific ones removed.
pub(crate) fn request_fields(
    req: &HttpRequest,
    pseudo_order: &[PseudoHeader],
) -> Vec<(String, String)> {
    let authority = req
        .header("host")
        .map(str::to_string)
        .unwrap_or_else(|| req.authority());
    let authority = req.host_override.clone().unwrap_or(authority);

    let mut fields = Vec::with_capacity(req.headers.len() + 4);
    for pseudo in pseudo_order {
        let value = match pseudo {
            PseudoHeader::Method => req.method.as_str().to_string(),
            PseudoHeader::Authority => authority.clone(),
            PseudoHeader::Scheme => req.url.scheme().to_string(),
            PseudoHeader::Path => req.path_and_query(),
        };
        fields.push((pseudo.name().to_string(), value));
    }
    for (name, value) in &req.headers {
        if is_connection_specific(name) {
            continue;
        }
        let name = name.to_ascii_lowercase();
        if name == "te" && !value.eq_ignore_ascii_case("trailers") {
            continue;
        }
        fields.push((name, value.clone()));
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;
    use url::Url;

    #[test]
    fn fields_follow_pseudo_order() {
        let mut req = HttpRequest::new(Method::GET, Url::parse("https://a.test/p?q=1").unwrap());
        req.headers = vec![
            ("User-Agent".into(), "ua".into()),
            ("Connection".into(), "keep-alive".into()),
            ("TE".into(), "gzip".into()),
            ("Accept".into(), "*/*".into()),
        ];
        let order = [
            PseudoHeader::Method,
            PseudoHeader::Scheme,
            PseudoHeader::Authority,
            PseudoHeader::Path,
        ];
        let fields = request_fields(&req, &order);
        let names: Vec<&str> = fields.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(
            names,
            vec![":method", ":scheme", ":authority", ":path", "user-agent", "accept"]
        );
        assert_eq!(fields[2].1, "a.test");
        assert_eq!(fields[3].1, "/p?q=1");
    }

    #[test]
    fn host_header_becomes_authority() {
        let mut req = HttpRequest::new(Method::GET, Url::parse("https://a.test/").unwrap());
        req.headers = vec![("Host".into(), "b.test".into())];
        let fields = request_fields(&req, &[PseudoHeader::Authority]);
        assert_eq!(fields, vec![(":authority".to_string(), "b.test".to_string())]);

        req.host_override = Some("c.test".into());
        let fields = request_fields(&req, &[PseudoHeader::Authority]);
        assert_eq!(fields[0].1, "c.test");
    }
}
