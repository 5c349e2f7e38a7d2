//! ClientHello decoding.
//!
//! Parses the first TLS record a client sends into its ordered lists so the
//! handshake the engine emits can be compared with the descriptor that
//! configured it.

use super::ja3::Ja3;
use super::tls::ext;
use crate::error::{Error, Result};

/// Decoded ClientHello. Every list keeps wire order, GREASE included.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientHello {
    pub legacy_version: u16,
    pub cipher_suites: Vec<u16>,
    pub extensions: Vec<u16>,
    pub server_name: Option<String>,
    pub supported_groups: Vec<u16>,
    pub point_formats: Vec<u8>,
    pub signature_algorithms: Vec<u16>,
    pub supported_versions: Vec<u16>,
    pub key_share_groups: Vec<u16>,
    pub alpn: Vec<String>,
    pub cert_compression: Vec<u16>,
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(Error::protocol("truncated ClientHello"));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u24(&mut self) -> Result<usize> {
        let b = self.take(3)?;
        Ok(((b[0] as usize) << 16) | ((b[1] as usize) << 8) | b[2] as usize)
    }

    fn vec8(&mut self) -> Result<&'a [u8]> {
        let len = self.u8()? as usize;
        self.take(len)
    }

    fn vec16(&mut self) -> Result<&'a [u8]> {
        let len = self.u16()? as usize;
        self.take(len)
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }
}

fn u16_list(data: &[u8]) -> Vec<u16> {
    data.chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect()
}

impl ClientHello {
    /// Parse a TLS record (`0x16` handshake) containing a ClientHello.
    ///
    /// The handshake message may span several records only if they are all
    /// present in `record`.
    pub fn parse(record: &[u8]) -> Result<Self> {
        let mut handshake = Vec::new();
        let mut records = Reader::new(record);
        while !records.is_empty() {
            let content_type = records.u8()?;
            if content_type != 0x16 {
                return Err(Error::protocol(format!(
                    "not a handshake record (content type 0x{:02x})",
                    content_type
                )));
            }
            records.u16()?;
            handshake.extend_from_slice(records.vec16()?);
            if handshake.len() >= 4 {
                let body_len = ((handshake[1] as usize) << 16)
                    | ((handshake[2] as usize) << 8)
                    | handshake[3] as usize;
                if handshake.len() >= body_len + 4 {
                    break;
                }
            }
        }

        let mut r = Reader::new(&handshake);
        let msg_type = r.u8()?;
        if msg_type != 0x01 {
            return Err(Error::protocol(format!(
                "not a ClientHello (handshake type 0x{:02x})",
                msg_type
            )));
        }
        let body_len = r.u24()?;
        let mut r = Reader::new(r.take(body_len)?);

        let mut hello = ClientHello {
            legacy_version: r.u16()?,
            ..Default::default()
        };
        r.take(32)?; // random
        r.vec8()?; // legacy_session_id
        hello.cipher_suites = u16_list(r.vec16()?);
        r.vec8()?; // compression methods

        if r.is_empty() {
            return Ok(hello);
        }
        let mut exts = Reader::new(r.vec16()?);
        while !exts.is_empty() {
            let id = exts.u16()?;
            let data = exts.vec16()?;
            hello.extensions.push(id);
            hello.decode_extension(id, data)?;
        }
        Ok(hello)
    }

    fn decode_extension(&mut self, id: u16, data: &[u8]) -> Result<()> {
        let mut r = Reader::new(data);
        match id {
            ext::SERVER_NAME if !data.is_empty() => {
                let mut list = Reader::new(r.vec16()?);
                while !list.is_empty() {
                    let kind = list.u8()?;
                    let name = list.vec16()?;
                    if kind == 0 {
                        self.server_name = Some(String::from_utf8_lossy(name).into_owned());
                    }
                }
            }
            ext::SUPPORTED_GROUPS => self.supported_groups = u16_list(r.vec16()?),
            ext::EC_POINT_FORMATS => self.point_formats = r.vec8()?.to_vec(),
            ext::SIGNATURE_ALGORITHMS => self.signature_algorithms = u16_list(r.vec16()?),
            ext::SUPPORTED_VERSIONS => self.supported_versions = u16_list(r.vec8()?),
            ext::COMPRESS_CERTIFICATE => self.cert_compression = u16_list(r.vec8()?),
            ext::KEY_SHARE => {
                let mut shares = Reader::new(r.vec16()?);
                while !shares.is_empty() {
                    self.key_share_groups.push(shares.u16()?);
                    shares.vec16()?;
                }
            }
            ext::ALPN => {
                let mut list = Reader::new(r.vec16()?);
                while !list.is_empty() {
                    let proto = list.vec8()?;
                    self.alpn.push(String::from_utf8_lossy(proto).into_owned());
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// JA3 view of this ClientHello.
    pub fn ja3(&self) -> Ja3 {
        Ja3 {
            version: self.legacy_version,
            cipher_suites: self.cipher_suites.clone(),
            extensions: self.extensions.clone(),
            curves: self.supported_groups.clone(),
            point_formats: self.point_formats.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ext(id: u16, body: &[u8]) -> Vec<u8> {
        let mut out = id.to_be_bytes().to_vec();
        out.extend_from_slice(&(body.len() as u16).to_be_bytes());
        out.extend_from_slice(body);
        out
    }

    fn record(ciphers: &[u16], extensions: &[Vec<u8>]) -> Vec<u8> {
        let mut body = vec![0x03, 0x03];
        body.extend_from_slice(&[7u8; 32]);
        body.push(0);
        body.extend_from_slice(&((ciphers.len() * 2) as u16).to_be_bytes());
        for c in ciphers {
            body.extend_from_slice(&c.to_be_bytes());
        }
        body.extend_from_slice(&[1, 0]);
        let exts: Vec<u8> = extensions.concat();
        body.extend_from_slice(&(exts.len() as u16).to_be_bytes());
        body.extend_from_slice(&exts);

        let mut hs = vec![0x01];
        hs.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
        hs.extend_from_slice(&body);

        let mut rec = vec![0x16, 0x03, 0x01];
        rec.extend_from_slice(&(hs.len() as u16).to_be_bytes());
        rec.extend_from_slice(&hs);
        rec
    }

    #[test]
    fn decodes_ordered_lists() {
        let sni = {
            let name = b"example.com";
            let mut entry = vec![0u8];
            entry.extend_from_slice(&(name.len() as u16).to_be_bytes());
            entry.extend_from_slice(name);
            let mut list = (entry.len() as u16).to_be_bytes().to_vec();
            list.extend_from_slice(&entry);
            list
        };
        let rec = record(
            &[0x0a0a, 0x1301, 0xc02b],
            &[
                ext(0x1a1a, &[]),
                ext(0, &sni),
                ext(10, &[0, 4, 0, 29, 0, 23]),
                ext(11, &[1, 0]),
                ext(16, &[0, 3, 2, b'h', b'2']),
                ext(43, &[4, 0x03, 0x04, 0x03, 0x03]),
            ],
        );
        let hello = ClientHello::parse(&rec).unwrap();
        assert_eq!(hello.cipher_suites, vec![0x0a0a, 0x1301, 0xc02b]);
        assert_eq!(hello.extensions, vec![0x1a1a, 0, 10, 11, 16, 43]);
        assert_eq!(hello.server_name.as_deref(), Some("example.com"));
        assert_eq!(hello.supported_groups, vec![29, 23]);
        assert_eq!(hello.alpn, vec!["h2".to_string()]);
        assert_eq!(hello.supported_versions, vec![0x0304, 0x0303]);
        assert_eq!(hello.ja3().to_string(), "771,4865-49195,0-10-11-16-43,29-23,0");
    }

    #[test]
    fn rejects_non_handshake() {
        assert!(ClientHello::parse(&[0x17, 3, 3, 0, 0]).is_err());
        assert!(ClientHello::parse(&[0x16, 3, 1, 0, 4, 2, 0, 0, 0]).is_err());
    }
}
