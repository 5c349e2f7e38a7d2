//! HTTP/1.1 client connection.
//!
//! Requests are serialized by hand so header order and case go out exactly
//! as given; responses are parsed with httparse (RFC 9112).

use bytes::Bytes;
use http::Method;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::response::Response;
use crate::transport::connector::MaybeTlsStream;
use crate::transport::HttpRequest;
use crate::version::Protocol;

/// Response header cap when the caller sets none.
pub const DEFAULT_MAX_HEADER_BYTES: usize = 64 * 1024;

const MAX_HEADERS_COUNT: usize = 128;
const READ_CHUNK: usize = 8192;

/// HTTP/1.1 connection carrying one request at a time.
pub struct H1Connection<S = MaybeTlsStream> {
    stream: S,
    /// Bytes read past the end of the previous response.
    buffer: Vec<u8>,
    max_header_bytes: usize,
    /// The connection cannot carry another request.
    should_close: bool,
}

impl<S> H1Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: Vec::new(),
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
            should_close: false,
        }
    }

    pub fn with_max_header_bytes(mut self, limit: usize) -> Self {
        if limit > 0 {
            self.max_header_bytes = limit;
        }
        self
    }

    pub fn set_max_header_bytes(&mut self, limit: usize) {
        self.max_header_bytes = if limit > 0 {
            limit
        } else {
            DEFAULT_MAX_HEADER_BYTES
        };
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    pub fn should_close(&self) -> bool {
        self.should_close
    }

    /// Send a request and read the full response.
    pub async fn send_request(&mut self, request: &HttpRequest) -> Result<Response> {
        let head = build_request_head(request)?;
        if header_says_close(request.header("connection")) {
            self.should_close = true;
        }
        self.stream
            .write_all(&head)
            .await
            .map_err(|e| Error::protocol(format!("failed to write request: {}", e)))?;
        if let Some(body) = &request.body {
            self.stream
                .write_all(body)
                .await
                .map_err(|e| Error::protocol(format!("failed to write body: {}", e)))?;
        }
        self.stream
            .flush()
            .await
            .map_err(|e| Error::protocol(format!("failed to flush: {}", e)))?;
        tracing::trace!(method = %request.method, target = %request.request_target(), "h1 request sent");

        self.read_response(&request.method).await
    }

    /// Read responses until a final (non-1xx) one arrives (RFC 9112 6).
    async fn read_response(&mut self, method: &Method) -> Result<Response> {
        loop {
            let head_len = loop {
                if let Some(end) = find_header_end(&self.buffer) {
                    if end > self.max_header_bytes {
                        return Err(header_limit_error(self.max_header_bytes));
                    }
                    break end;
                }
                if self.buffer.len() >= self.max_header_bytes {
                    return Err(header_limit_error(self.max_header_bytes));
                }
                if self.fill().await? == 0 {
                    self.should_close = true;
                    return Err(Error::protocol("connection closed before response headers"));
                }
            };

            let head = parse_head(&self.buffer[..head_len])?;
            self.buffer.drain(..head_len);

            if (100..200).contains(&head.status) && head.status != 101 {
                tracing::trace!(status = head.status, "h1 skipping informational response");
                continue;
            }
            if head.status == 101 {
                self.should_close = true;
            }
            return self.read_body(head, method).await;
        }
    }

    async fn read_body(&mut self, head: Head, method: &Method) -> Result<Response> {
        let Head { status, mut headers } = head;
        if headers
            .iter()
            .any(|(k, v)| k.eq_ignore_ascii_case("connection") && header_says_close(Some(v)))
        {
            self.should_close = true;
        }

        let has_body = !matches!(status, 100..=199 | 204 | 304) && *method != Method::HEAD;
        if !has_body {
            return Ok(Response::new(status, headers, Bytes::new(), Protocol::Http1));
        }

        let transfer_encoding = find_header(&headers, "transfer-encoding").map(str::to_string);
        let body = match transfer_encoding {
            Some(te) if is_chunked(&te) => {
                let (body, trailers) = self.read_chunked_body().await?;
                headers.extend(trailers);
                body
            }
            // Transfer-Encoding overrides Content-Length (RFC 9112 6.3).
            Some(_) => self.read_until_close().await?,
            None => match find_header(&headers, "content-length") {
                Some(value) => {
                    let len = parse_content_length(value)?;
                    self.read_fixed_body(len).await?
                }
                None => self.read_until_close().await?,
            },
        };
        Ok(Response::new(status, headers, body, Protocol::Http1))
    }

    async fn fill(&mut self) -> Result<usize> {
        let mut chunk = [0u8; READ_CHUNK];
        let n = self
            .stream
            .read(&mut chunk)
            .await
            .map_err(|e| Error::protocol(format!("failed to read response: {}", e)))?;
        self.buffer.extend_from_slice(&chunk[..n]);
        Ok(n)
    }

    async fn read_until_close(&mut self) -> Result<Bytes> {
        self.should_close = true;
        while self.fill().await? > 0 {}
        Ok(Bytes::from(std::mem::take(&mut self.buffer)))
    }

    async fn read_fixed_body(&mut self, len: usize) -> Result<Bytes> {
        while self.buffer.len() < len {
            if self.fill().await? == 0 {
                self.should_close = true;
                return Err(Error::protocol(format!(
                    "connection closed before receiving full body (got {} of {} bytes)",
                    self.buffer.len(),
                    len
                )));
            }
        }
        let body: Vec<u8> = self.buffer.drain(..len).collect();
        Ok(Bytes::from(body))
    }

    /// chunked-body = *chunk last-chunk trailer-section CRLF (RFC 9112 7.1)
    async fn read_chunked_body(&mut self) -> Result<(Bytes, Vec<(String, String)>)> {
        let mut body = Vec::new();
        loop {
            let (size, line_end) = loop {
                if let Some(found) = find_chunk_size(&self.buffer)? {
                    break found;
                }
                if self.fill().await? == 0 {
                    self.should_close = true;
                    return Err(Error::protocol("connection closed while reading chunk size"));
                }
            };
            self.buffer.drain(..line_end);

            if size == 0 {
                let trailers = self.read_trailers().await?;
                return Ok((Bytes::from(body), trailers));
            }

            while self.buffer.len() < size + 2 {
                if self.fill().await? == 0 {
                    self.should_close = true;
                    return Err(Error::protocol("connection closed while reading chunk data"));
                }
            }
            body.extend_from_slice(&self.buffer[..size]);
            if &self.buffer[size..size + 2] != b"\r\n" {
                return Err(Error::protocol("chunk data not terminated by CRLF"));
            }
            self.buffer.drain(..size + 2);
        }
    }

    async fn read_trailers(&mut self) -> Result<Vec<(String, String)>> {
        let mut trailers = Vec::new();
        loop {
            match find_crlf(&self.buffer) {
                Some(0) => {
                    self.buffer.drain(..2);
                    return Ok(trailers);
                }
                Some(pos) => {
                    let line = String::from_utf8_lossy(&self.buffer[..pos]).into_owned();
                    if let Some((name, value)) = line.split_once(':') {
                        trailers.push((name.trim().to_string(), value.trim().to_string()));
                    }
                    self.buffer.drain(..pos + 2);
                }
                None => {
                    if self.fill().await? == 0 {
                        // Servers that close right after the last chunk
                        // still delivered a complete body.
                        self.should_close = true;
                        return Ok(trailers);
                    }
                }
            }
        }
    }
}

struct Head {
    status: u16,
    headers: Vec<(String, String)>,
}

fn parse_head(buf: &[u8]) -> Result<Head> {
    let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS_COUNT];
    let mut response = httparse::Response::new(&mut slots);
    match response
        .parse(buf)
        .map_err(|e| Error::protocol(format!("failed to parse response: {}", e)))?
    {
        httparse::Status::Complete(_) => {}
        httparse::Status::Partial => return Err(Error::protocol("incomplete response headers")),
    }
    let status = response
        .code
        .ok_or_else(|| Error::protocol("missing status code"))?;
    let headers = response
        .headers
        .iter()
        .filter(|h| !h.name.is_empty())
        .map(|h| (h.name.to_string(), String::from_utf8_lossy(h.value).into_owned()))
        .collect();
    Ok(Head { status, headers })
}

/// Serialize the request line and header block.
///
/// `Host` goes first, then the caller's headers in order. `Connection:
/// keep-alive` and `Content-Length` are added when the caller set neither.
fn build_request_head(request: &HttpRequest) -> Result<Vec<u8>> {
    for (name, value) in &request.headers {
        validate_header_name(name)?;
        validate_header_value(value)?;
    }

    let mut head = Vec::with_capacity(1024);
    head.extend_from_slice(request.method.as_str().as_bytes());
    head.push(b' ');
    head.extend_from_slice(request.request_target().as_bytes());
    head.extend_from_slice(b" HTTP/1.1\r\n");

    let host = match (&request.host_override, request.header("host")) {
        (Some(host), _) => host.clone(),
        (None, Some(host)) => host.to_string(),
        (None, None) => request.authority(),
    };
    validate_header_value(&host)?;
    push_header(&mut head, "Host", &host);

    let mut has_connection = false;
    let mut has_length = false;
    let mut has_transfer_encoding = false;
    for (name, value) in &request.headers {
        if name.eq_ignore_ascii_case("host") {
            continue;
        }
        has_connection |= name.eq_ignore_ascii_case("connection");
        has_length |= name.eq_ignore_ascii_case("content-length");
        has_transfer_encoding |= name.eq_ignore_ascii_case("transfer-encoding");
        push_header(&mut head, name, value);
    }
    if !has_connection {
        push_header(&mut head, "Connection", "keep-alive");
    }
    // RFC 9112 6.2: no Content-Length alongside Transfer-Encoding.
    if !has_length && !has_transfer_encoding {
        match &request.body {
            Some(body) => push_header(&mut head, "Content-Length", &body.len().to_string()),
            None if method_expects_body(&request.method) => {
                push_header(&mut head, "Content-Length", "0")
            }
            None => {}
        }
    }
    head.extend_from_slice(b"\r\n");
    Ok(head)
}

fn push_header(buf: &mut Vec<u8>, name: &str, value: &str) {
    buf.extend_from_slice(name.as_bytes());
    buf.extend_from_slice(b": ");
    buf.extend_from_slice(value.as_bytes());
    buf.extend_from_slice(b"\r\n");
}

fn method_expects_body(method: &Method) -> bool {
    *method == Method::POST || *method == Method::PUT || *method == Method::PATCH
}

fn header_limit_error(limit: usize) -> Error {
    Error::protocol(format!("response headers exceed {} bytes", limit))
}

fn header_says_close(value: Option<&str>) -> bool {
    value.is_some_and(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case("close")))
}

/// chunked must be the final transfer coding.
fn is_chunked(transfer_encoding: &str) -> bool {
    transfer_encoding
        .split(',')
        .next_back()
        .is_some_and(|s| s.trim().eq_ignore_ascii_case("chunked"))
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

fn find_crlf(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\r\n")
}

/// `(size, end_of_line)` once a full size line is buffered. Chunk
/// extensions after `;` are ignored.
fn find_chunk_size(buffer: &[u8]) -> Result<Option<(usize, usize)>> {
    let Some(pos) = find_crlf(buffer) else {
        return Ok(None);
    };
    let line = String::from_utf8_lossy(&buffer[..pos]);
    let size_part = line.split(';').next().unwrap_or_default().trim();
    let size = usize::from_str_radix(size_part, 16)
        .map_err(|_| Error::protocol(format!("invalid chunk size: {:?}", size_part)))?;
    Ok(Some((size, pos + 2)))
}

/// RFC 9110 5.1: field names are tokens.
fn validate_header_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::validation("empty header name"));
    }
    if let Some(bad) = name.bytes().find(|b| !is_tchar(*b)) {
        return Err(Error::validation(format!(
            "invalid character {:?} in header name {:?}",
            bad as char, name
        )));
    }
    Ok(())
}

fn is_tchar(b: u8) -> bool {
    matches!(b,
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' |
        b'^' | b'_' | b'`' | b'|' | b'~' | b'0'..=b'9' | b'A'..=b'Z' | b'a'..=b'z'
    )
}

/// NUL, CR and LF would allow header injection.
fn validate_header_value(value: &str) -> Result<()> {
    if value.bytes().any(|b| b == 0 || b == b'\r' || b == b'\n') {
        return Err(Error::validation(
            "invalid character in header value (CR/LF/NUL not allowed)",
        ));
    }
    Ok(())
}

/// Repeated values must all agree (RFC 9112 6.2).
fn parse_content_length(value: &str) -> Result<usize> {
    let mut parsed = None;
    for part in value.split(',') {
        let n = part
            .trim()
            .parse::<usize>()
            .map_err(|_| Error::protocol(format!("invalid Content-Length: {}", value)))?;
        match parsed {
            Some(prev) if prev != n => {
                return Err(Error::protocol(format!(
                    "conflicting Content-Length values: {}",
                    value
                )))
            }
            _ => parsed = Some(n),
        }
    }
    parsed.ok_or_else(|| Error::protocol("empty Content-Length"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;
    use url::Url;

    fn request(method: Method, url: &str) -> HttpRequest {
        HttpRequest::new(method, Url::parse(url).unwrap())
    }

    /// Run one exchange against a canned server reply; returns the response
    /// and the raw request bytes.
    async fn exchange(req: HttpRequest, reply: &'static [u8]) -> (Result<Response>, Vec<u8>, bool) {
        let (client, mut server) = duplex(64 * 1024);
        let server_task = tokio::spawn(async move {
            let mut seen = Vec::new();
            let mut buf = [0u8; 4096];
            while find_header_end(&seen).is_none() {
                let n = server.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                seen.extend_from_slice(&buf[..n]);
            }
            server.write_all(reply).await.unwrap();
            server.shutdown().await.unwrap();
            seen
        });
        let mut conn = H1Connection::new(client);
        let result = conn.send_request(&req).await;
        let close = conn.should_close();
        (result, server_task.await.unwrap(), close)
    }

    #[test]
    fn host_first_then_caller_order() {
        let mut req = request(Method::POST, "http://example.test:8080/submit?x=1");
        req.headers = vec![
            ("User-Agent".into(), "ua".into()),
            ("accept".into(), "*/*".into()),
            ("Host".into(), "ignored.test".into()),
        ];
        req.host_override = Some("override.test".into());
        req.body = Some(Bytes::from_static(b"abc"));
        let head = String::from_utf8(build_request_head(&req).unwrap()).unwrap();
        assert_eq!(
            head,
            "POST /submit?x=1 HTTP/1.1\r\nHost: override.test\r\nUser-Agent: ua\r\naccept: */*\r\nConnection: keep-alive\r\nContent-Length: 3\r\n\r\n"
        );
    }

    #[test]
    fn caller_host_header_used_without_override() {
        let mut req = request(Method::GET, "http://example.test/");
        req.headers = vec![("host".into(), "vhost.test".into())];
        let head = String::from_utf8(build_request_head(&req).unwrap()).unwrap();
        assert!(head.starts_with("GET / HTTP/1.1\r\nHost: vhost.test\r\n"));
    }

    #[test]
    fn absolute_form_through_proxy() {
        let mut req = request(Method::GET, "http://example.test/a");
        req.absolute_form = true;
        let head = String::from_utf8(build_request_head(&req).unwrap()).unwrap();
        assert!(head.starts_with("GET http://example.test/a HTTP/1.1\r\n"));
    }

    #[test]
    fn no_content_length_with_transfer_encoding() {
        let mut req = request(Method::POST, "http://example.test/");
        req.headers = vec![("Transfer-Encoding".into(), "chunked".into())];
        req.body = Some(Bytes::from_static(b"0\r\n\r\n"));
        let head = String::from_utf8(build_request_head(&req).unwrap()).unwrap();
        assert!(!head.contains("Content-Length"));
    }

    #[test]
    fn header_injection_rejected() {
        let mut req = request(Method::GET, "http://example.test/");
        req.headers = vec![("X-A".into(), "v\r\nEvil: 1".into())];
        assert!(build_request_head(&req).unwrap_err().is_validation());
        req.headers = vec![("Bad Name".into(), "v".into())];
        assert!(build_request_head(&req).unwrap_err().is_validation());
    }

    #[tokio::test]
    async fn fixed_length_response() {
        let (resp, raw, close) = exchange(
            request(Method::GET, "http://example.test/"),
            b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nX-Test: yes\r\n\r\nhello",
        )
        .await;
        let resp = resp.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body().as_ref(), b"hello");
        assert_eq!(resp.get_header("x-test"), Some("yes"));
        assert_eq!(resp.protocol, Protocol::Http1);
        assert!(!close);
        assert!(raw.starts_with(b"GET / HTTP/1.1\r\nHost: example.test\r\n"));
    }

    #[tokio::test]
    async fn chunked_response_with_trailers() {
        let (resp, _, _) = exchange(
            request(Method::GET, "http://example.test/"),
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5;ext=1\r\nhello\r\n6\r\n world\r\n0\r\nX-Checksum: abc\r\n\r\n",
        )
        .await;
        let resp = resp.unwrap();
        assert_eq!(resp.body().as_ref(), b"hello world");
        assert_eq!(resp.get_header("x-checksum"), Some("abc"));
    }

    #[tokio::test]
    async fn close_delimited_response() {
        let (resp, _, close) = exchange(
            request(Method::GET, "http://example.test/"),
            b"HTTP/1.1 200 OK\r\n\r\nuntil close",
        )
        .await;
        assert_eq!(resp.unwrap().body().as_ref(), b"until close");
        assert!(close);
    }

    #[tokio::test]
    async fn informational_responses_skipped() {
        let (resp, _, _) = exchange(
            request(Method::GET, "http://example.test/"),
            b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 103 Early Hints\r\nLink: </a>\r\n\r\nHTTP/1.1 201 Created\r\nContent-Length: 2\r\n\r\nok",
        )
        .await;
        let resp = resp.unwrap();
        assert_eq!(resp.status, 201);
        assert_eq!(resp.body().as_ref(), b"ok");
    }

    #[tokio::test]
    async fn head_response_has_no_body() {
        let (resp, _, _) = exchange(
            request(Method::HEAD, "http://example.test/"),
            b"HTTP/1.1 200 OK\r\nContent-Length: 1000\r\n\r\n",
        )
        .await;
        assert!(resp.unwrap().body().is_empty());
    }

    #[tokio::test]
    async fn truncated_body_is_error() {
        let (resp, _, close) = exchange(
            request(Method::GET, "http://example.test/"),
            b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nshort",
        )
        .await;
        assert!(matches!(resp.unwrap_err(), Error::HttpProtocol(_)));
        assert!(close);
    }

    #[tokio::test]
    async fn header_cap_enforced() {
        let (client, mut server) = duplex(64 * 1024);
        tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            let _ = server.read(&mut buf).await;
            let big = format!("HTTP/1.1 200 OK\r\nX-Big: {}\r\n\r\n", "a".repeat(2048));
            let _ = server.write_all(big.as_bytes()).await;
        });
        let mut conn = H1Connection::new(client).with_max_header_bytes(512);
        let err = conn
            .send_request(&request(Method::GET, "http://example.test/"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exceed 512"));
    }

    #[tokio::test]
    async fn connection_close_header_marks_connection() {
        let (resp, _, close) = exchange(
            request(Method::GET, "http://example.test/"),
            b"HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert_eq!(resp.unwrap().status, 204);
        assert!(close);
    }

    #[test]
    fn content_length_rules() {
        assert_eq!(parse_content_length("100, 100").unwrap(), 100);
        assert!(parse_content_length("100, 200").is_err());
        assert!(parse_content_length("-1").is_err());
        assert!(parse_content_length("1.5").is_err());
    }

    #[test]
    fn chunk_size_lines() {
        assert_eq!(find_chunk_size(b"a\r\n").unwrap(), Some((10, 3)));
        assert_eq!(find_chunk_size(b"10;name=value\r\n").unwrap(), Some((16, 15)));
        assert_eq!(find_chunk_size(b"10").unwrap(), None);
        assert!(find_chunk_size(b"XYZ\r\n").is_err());
    }
}
