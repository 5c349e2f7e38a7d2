//! HTTP responses: the raw exchange result and the caller-facing shape.

use std::collections::{BTreeMap, HashMap};
use std::io::Read;

use bytes::Bytes;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::version::Protocol;

/// HTTP response as read off one connection, before redirect handling.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    /// Header fields in wire order; names as received.
    pub headers: Vec<(String, String)>,
    body: Bytes,
    pub protocol: Protocol,
}

impl Response {
    pub fn new(status: u16, headers: Vec<(String, String)>, body: Bytes, protocol: Protocol) -> Self {
        Self {
            status,
            headers,
            body,
            protocol,
        }
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn into_body(self) -> Bytes {
        self.body
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self.status, 301 | 302 | 303 | 307 | 308)
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.trim())
    }

    pub fn get_headers<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.trim())
    }

    pub fn location(&self) -> Option<&str> {
        self.get_header("location")
    }

    pub fn content_type(&self) -> Option<&str> {
        self.get_header("content-type")
    }

    pub fn content_encoding(&self) -> Option<&str> {
        self.get_header("content-encoding")
    }

    /// Decode body based on Content-Encoding (gzip, deflate, br, zstd).
    /// Stacked encodings are undone right to left.
    pub fn decoded_body(&self) -> Result<Bytes> {
        let Some(encoding) = self.content_encoding() else {
            return Ok(self.body.clone());
        };
        let mut body = self.body.clone();
        for coding in encoding.rsplit(',').map(|c| c.trim().to_ascii_lowercase()) {
            body = match coding.as_str() {
                "gzip" | "x-gzip" => decode_gzip(&body)?,
                "deflate" => decode_deflate(&body)?,
                "br" => decode_brotli(&body)?,
                "zstd" => decode_zstd(&body)?,
                "identity" | "" => body,
                other => {
                    return Err(Error::Decompression(format!("unsupported content-encoding {}", other)))
                }
            };
        }
        Ok(body)
    }

    /// Headers grouped by name, preserving value order.
    pub fn header_map(&self) -> BTreeMap<String, Vec<String>> {
        let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in &self.headers {
            map.entry(name.clone()).or_default().push(value.clone());
        }
        map
    }
}

fn decode_gzip(data: &[u8]) -> Result<Bytes> {
    let mut decoder = flate2::read::MultiGzDecoder::new(data);
    let mut decoded = Vec::new();
    decoder
        .read_to_end(&mut decoded)
        .map_err(|e| Error::Decompression(format!("gzip: {}", e)))?;
    Ok(Bytes::from(decoded))
}

/// `deflate` is zlib-wrapped per RFC 9110, but raw deflate is common enough
/// to accept as a fallback.
fn decode_deflate(data: &[u8]) -> Result<Bytes> {
    let mut decoded = Vec::new();
    if flate2::read::ZlibDecoder::new(data).read_to_end(&mut decoded).is_ok() {
        return Ok(Bytes::from(decoded));
    }
    decoded.clear();
    flate2::read::DeflateDecoder::new(data)
        .read_to_end(&mut decoded)
        .map_err(|e| Error::Decompression(format!("deflate: {}", e)))?;
    Ok(Bytes::from(decoded))
}

fn decode_brotli(data: &[u8]) -> Result<Bytes> {
    let mut decoder = brotli::Decompressor::new(data, 4096);
    let mut decoded = Vec::new();
    decoder
        .read_to_end(&mut decoded)
        .map_err(|e| Error::Decompression(format!("brotli: {}", e)))?;
    Ok(Bytes::from(decoded))
}

fn decode_zstd(data: &[u8]) -> Result<Bytes> {
    zstd::stream::decode_all(data)
        .map(Bytes::from)
        .map_err(|e| Error::Decompression(format!("zstd: {}", e)))
}

/// Decoded body of a [`TlsResponse`], shaped by the requested response type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResponseData {
    Json(serde_json::Value),
    Text(String),
    Bytes(Vec<u8>),
}

impl ResponseData {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ResponseData::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            ResponseData::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            ResponseData::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

/// Caller-facing response returned by [`Client`](crate::Client).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsResponse {
    pub status: u16,
    pub headers: BTreeMap<String, Vec<String>>,
    pub data: ResponseData,
    pub final_url: String,
    pub cookies: HashMap<String, String>,
    pub used_protocol: String,
    pub session_id: Option<String>,
}

impl TlsResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// First value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .and_then(|(_, v)| v.first())
            .map(String::as_str)
    }

    pub fn text(&self) -> Option<&str> {
        self.data.as_text()
    }

    /// Deserialize a JSON body into `T`.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        match &self.data {
            ResponseData::Json(v) => Ok(serde_json::from_value(v.clone())?),
            ResponseData::Text(s) => Ok(serde_json::from_str(s)?),
            ResponseData::Bytes(b) => Ok(serde_json::from_slice(b)?),
        }
    }
}
