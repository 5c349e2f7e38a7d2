use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use bytes::BytesMut;
use masquerade::transport::h2::frame::{self, flags, frame_type, CONNECTION_PREFACE};
use masquerade::transport::h2::hpack::Decoder;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use super::tls::acceptor;

/// What one client connection put on the wire, frame by frame.
#[derive(Debug, Clone, Default)]
pub struct H2Capture {
    /// The first SETTINGS frame, in wire order.
    pub settings: Vec<(u16, u32)>,
    /// Connection-level WINDOW_UPDATE increment, if one was sent.
    pub window_update: Option<u32>,
    /// Stream ids of PRIORITY frames, in order.
    pub priority_streams: Vec<u32>,
    /// Whether HEADERS carried the PRIORITY flag.
    pub headers_priority: Vec<bool>,
    /// Decoded header blocks, pseudo headers included.
    pub requests: Vec<Vec<(String, String)>>,
}

/// Frame-level HTTP/2 server over TLS. Every request gets `200` with a fixed
/// body.
pub struct MockH2Server {
    addr: SocketAddr,
    captures: Arc<Mutex<Vec<H2Capture>>>,
    task: JoinHandle<()>,
}

impl MockH2Server {
    pub async fn start(body: &'static str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let captures = Arc::new(Mutex::new(Vec::new()));
        let acceptor = Arc::new(acceptor(b"\x02h2"));

        let task = {
            let captures = captures.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let index = {
                        let mut captures = captures.lock().unwrap();
                        captures.push(H2Capture::default());
                        captures.len() - 1
                    };
                    let captures = captures.clone();
                    let acceptor = acceptor.clone();
                    tokio::spawn(async move {
                        if let Some(mut tls) = super::tls::accept(&acceptor, stream).await {
                            let _ = serve(&mut tls, index, body, &captures).await;
                        }
                    });
                }
            })
        };
        Self { addr, captures, task }
    }

    pub fn url(&self, path: &str) -> String {
        format!("https://127.0.0.1:{}{}", self.addr.port(), path)
    }

    pub fn captures(&self) -> Vec<H2Capture> {
        self.captures.lock().unwrap().clone()
    }
}

impl Drop for MockH2Server {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve<S>(stream: &mut S, index: usize, body: &str, captures: &Mutex<Vec<H2Capture>>) -> std::io::Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let mut preface = [0u8; 24];
    stream.read_exact(&mut preface).await?;
    assert_eq!(&preface[..], CONNECTION_PREFACE);

    let mut decoder = Decoder::new(65_536);
    let mut seen_settings = false;
    loop {
        let mut head = [0u8; 9];
        stream.read_exact(&mut head).await?;
        let length = ((head[0] as usize) << 16) | ((head[1] as usize) << 8) | head[2] as usize;
        let (kind, frame_flags) = (head[3], head[4]);
        let stream_id = u32::from_be_bytes([head[5], head[6], head[7], head[8]]) & 0x7fff_ffff;
        let mut payload = vec![0u8; length];
        stream.read_exact(&mut payload).await?;

        match kind {
            frame_type::SETTINGS if frame_flags & flags::ACK == 0 => {
                if !seen_settings {
                    seen_settings = true;
                    let settings = payload
                        .chunks_exact(6)
                        .map(|c| (u16::from_be_bytes([c[0], c[1]]), u32::from_be_bytes([c[2], c[3], c[4], c[5]])))
                        .collect();
                    captures.lock().unwrap()[index].settings = settings;
                }
                let mut out = BytesMut::new();
                frame::encode_settings(&mut out, &[]);
                frame::encode_settings_ack(&mut out);
                stream.write_all(&out).await?;
            }
            frame_type::WINDOW_UPDATE if stream_id == 0 => {
                let increment = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) & 0x7fff_ffff;
                let mut captures = captures.lock().unwrap();
                captures[index].window_update.get_or_insert(increment);
            }
            frame_type::PRIORITY => {
                captures.lock().unwrap()[index].priority_streams.push(stream_id);
            }
            frame_type::HEADERS => {
                let mut block = &payload[..];
                if frame_flags & flags::PADDED != 0 {
                    let pad = block[0] as usize;
                    block = &block[1..block.len() - pad];
                }
                let has_priority = frame_flags & flags::PRIORITY != 0;
                if has_priority {
                    block = &block[5..];
                }
                let fields = decoder
                    .decode(block)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
                {
                    let mut captures = captures.lock().unwrap();
                    captures[index].headers_priority.push(has_priority);
                    captures[index].requests.push(fields);
                }
                if frame_flags & flags::END_STREAM != 0 {
                    respond(stream, stream_id, body).await?;
                }
            }
            frame_type::DATA if frame_flags & flags::END_STREAM != 0 => {
                respond(stream, stream_id, body).await?;
            }
            frame_type::PING if frame_flags & flags::ACK == 0 => {
                let mut out = BytesMut::new();
                let mut data = [0u8; 8];
                data.copy_from_slice(&payload[..8]);
                frame::encode_ping_ack(&mut out, data);
                stream.write_all(&out).await?;
            }
            frame_type::GOAWAY => return Ok(()),
            _ => {}
        }
    }
}

async fn respond<S>(stream: &mut S, stream_id: u32, body: &str) -> std::io::Result<()>
where
    S: tokio::io::AsyncWrite + Unpin,
{
    let mut out = BytesMut::new();
    // Static table index 8 is ":status: 200".
    frame::encode_headers(&mut out, stream_id, &[0x88], false, None, 16_384);
    frame::encode_data(&mut out, stream_id, body.as_bytes(), true);
    stream.write_all(&out).await?;
    stream.flush().await
}
