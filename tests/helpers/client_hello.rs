use std::net::SocketAddr;

use masquerade::fingerprint::ClientHello;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// Listener that records the first ClientHello it receives and then hangs up.
pub struct HelloCapture {
    addr: SocketAddr,
    rx: oneshot::Receiver<Vec<u8>>,
}

impl HelloCapture {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let mut records = Vec::new();
            let mut handshake_len = None;
            let mut handshake_read = 0usize;
            loop {
                let mut header = [0u8; 5];
                if stream.read_exact(&mut header).await.is_err() {
                    return;
                }
                let len = u16::from_be_bytes([header[3], header[4]]) as usize;
                let mut body = vec![0u8; len];
                if stream.read_exact(&mut body).await.is_err() {
                    return;
                }
                if handshake_len.is_none() && body.len() >= 4 {
                    handshake_len = Some(((body[1] as usize) << 16 | (body[2] as usize) << 8 | body[3] as usize) + 4);
                }
                handshake_read += body.len();
                records.extend_from_slice(&header);
                records.extend_from_slice(&body);
                if handshake_len.is_some_and(|total| handshake_read >= total) {
                    break;
                }
            }
            let _ = tx.send(records);
        });
        Self { addr, rx }
    }

    pub fn url(&self) -> String {
        format!("https://127.0.0.1:{}/", self.addr.port())
    }

    pub async fn hello(self) -> ClientHello {
        let records = tokio::time::timeout(std::time::Duration::from_secs(10), self.rx)
            .await
            .expect("client never connected")
            .expect("capture task ended early");
        ClientHello::parse(&records).expect("parse ClientHello")
    }
}
