use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// A CONNECT request head as the proxy saw it.
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub authority: String,
    pub headers: Vec<(String, String)>,
}

impl ConnectRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// HTTP CONNECT proxy that records each tunnel request and splices the
/// client to the requested authority.
pub struct MockConnectProxy {
    addr: SocketAddr,
    connects: Arc<Mutex<Vec<ConnectRequest>>>,
    task: JoinHandle<()>,
}

impl MockConnectProxy {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let connects = Arc::new(Mutex::new(Vec::new()));
        let task = {
            let connects = connects.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let connects = connects.clone();
                    tokio::spawn(async move {
                        let _ = tunnel(stream, connects).await;
                    });
                }
            })
        };
        Self { addr, connects, task }
    }

    pub fn url(&self, credentials: &str) -> String {
        format!("http://{}@127.0.0.1:{}", credentials, self.addr.port())
    }

    pub fn connects(&self) -> Vec<ConnectRequest> {
        self.connects.lock().unwrap().clone()
    }
}

impl Drop for MockConnectProxy {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn tunnel(mut client: TcpStream, connects: Arc<Mutex<Vec<ConnectRequest>>>) -> std::io::Result<()> {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if client.read(&mut byte).await? == 0 {
            return Ok(());
        }
        head.push(byte[0]);
    }
    let head = String::from_utf8_lossy(&head).into_owned();
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default();
    let authority = request_line.split(' ').nth(1).unwrap_or_default().to_string();
    let headers = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();
    connects.lock().unwrap().push(ConnectRequest {
        authority: authority.clone(),
        headers,
    });

    let mut upstream = TcpStream::connect(&authority).await?;
    client.write_all(b"HTTP/1.1 200 Connection established\r\n\r\n").await?;
    tokio::io::copy_bidirectional(&mut client, &mut upstream).await?;
    Ok(())
}
