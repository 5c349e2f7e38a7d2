//! HPACK header compression (RFC 7541).
//!
//! The encoder indexes headers the way browsers do (incremental indexing,
//! Huffman when it is shorter) so the header block size matches a real
//! client; the decoder handles everything a server may send.

use std::collections::VecDeque;
use std::sync::OnceLock;

use bytes::{BufMut, BytesMut};

use crate::error::{Error, Result};

/// Per-entry overhead counted against the table size (RFC 7541 section 4.1).
const ENTRY_OVERHEAD: usize = 32;

const STATIC_TABLE: [(&str, &str); 61] = [
    (":authority", ""),
    (":method", "GET"),
    (":method", "POST"),
    (":path", "/"),
    (":path", "/index.html"),
    (":scheme", "http"),
    (":scheme", "https"),
    (":status", "200"),
    (":status", "204"),
    (":status", "206"),
    (":status", "304"),
    (":status", "400"),
    (":status", "404"),
    (":status", "500"),
    ("accept-charset", ""),
    ("accept-encoding", "gzip, deflate"),
    ("accept-language", ""),
    ("accept-ranges", ""),
    ("accept", ""),
    ("access-control-allow-origin", ""),
    ("age", ""),
    ("allow", ""),
    ("authorization", ""),
    ("cache-control", ""),
    ("content-disposition", ""),
    ("content-encoding", ""),
    ("content-language", ""),
    ("content-length", ""),
    ("content-location", ""),
    ("content-range", ""),
    ("content-type", ""),
    ("cookie", ""),
    ("date", ""),
    ("etag", ""),
    ("expect", ""),
    ("expires", ""),
    ("from", ""),
    ("host", ""),
    ("if-match", ""),
    ("if-modified-since", ""),
    ("if-none-match", ""),
    ("if-range", ""),
    ("if-unmodified-since", ""),
    ("last-modified", ""),
    ("link", ""),
    ("location", ""),
    ("max-forwards", ""),
    ("proxy-authenticate", ""),
    ("proxy-authorization", ""),
    ("range", ""),
    ("referer", ""),
    ("refresh", ""),
    ("retry-after", ""),
    ("server", ""),
    ("set-cookie", ""),
    ("strict-transport-security", ""),
    ("transfer-encoding", ""),
    ("user-agent", ""),
    ("vary", ""),
    ("via", ""),
    ("www-authenticate", ""),
];

/// `(code, bit length)` per symbol; index 256 is EOS.
const HUFFMAN_CODES: [(u32, u8); 257] = [
    (0x1ff8, 13), (0x7fffd8, 23), (0xfffffe2, 28), (0xfffffe3, 28),
    (0xfffffe4, 28), (0xfffffe5, 28), (0xfffffe6, 28), (0xfffffe7, 28),
    (0xfffffe8, 28), (0xffffea, 24), (0x3ffffffc, 30), (0xfffffe9, 28),
    (0xfffffea, 28), (0x3ffffffd, 30), (0xfffffeb, 28), (0xfffffec, 28),
    (0xfffffed, 28), (0xfffffee, 28), (0xfffffef, 28), (0xffffff0, 28),
    (0xffffff1, 28), (0xffffff2, 28), (0x3ffffffe, 30), (0xffffff3, 28),
    (0xffffff4, 28), (0xffffff5, 28), (0xffffff6, 28), (0xffffff7, 28),
    (0xffffff8, 28), (0xffffff9, 28), (0xffffffa, 28), (0xffffffb, 28),
    (0x14, 6), (0x3f8, 10), (0x3f9, 10), (0xffa, 12),
    (0x1ff9, 13), (0x15, 6), (0xf8, 8), (0x7fa, 11),
    (0x3fa, 10), (0x3fb, 10), (0xf9, 8), (0x7fb, 11),
    (0xfa, 8), (0x16, 6), (0x17, 6), (0x18, 6),
    (0x0, 5), (0x1, 5), (0x2, 5), (0x19, 6),
    (0x1a, 6), (0x1b, 6), (0x1c, 6), (0x1d, 6),
    (0x1e, 6), (0x1f, 6), (0x5c, 7), (0xfb, 8),
    (0x7ffc, 15), (0x20, 6), (0xffb, 12), (0x3fc, 10),
    (0x1ffa, 13), (0x21, 6), (0x5d, 7), (0x5e, 7),
    (0x5f, 7), (0x60, 7), (0x61, 7), (0x62, 7),
    (0x63, 7), (0x64, 7), (0x65, 7), (0x66, 7),
    (0x67, 7), (0x68, 7), (0x69, 7), (0x6a, 7),
    (0x6b, 7), (0x6c, 7), (0x6d, 7), (0x6e, 7),
    (0x6f, 7), (0x70, 7), (0x71, 7), (0x72, 7),
    (0xfc, 8), (0x73, 7), (0xfd, 8), (0x1ffb, 13),
    (0x7fff0, 19), (0x1ffc, 13), (0x3ffc, 14), (0x22, 6),
    (0x7ffd, 15), (0x3, 5), (0x23, 6), (0x4, 5),
    (0x24, 6), (0x5, 5), (0x25, 6), (0x26, 6),
    (0x27, 6), (0x6, 5), (0x74, 7), (0x75, 7),
    (0x28, 6), (0x29, 6), (0x2a, 6), (0x7, 5),
    (0x2b, 6), (0x76, 7), (0x2c, 6), (0x8, 5),
    (0x9, 5), (0x2d, 6), (0x77, 7), (0x78, 7),
    (0x79, 7), (0x7a, 7), (0x7b, 7), (0x7ffe, 15),
    (0x7fc, 11), (0x3ffd, 14), (0x1ffd, 13), (0xffffffc, 28),
    (0xfffe6, 20), (0x3fffd2, 22), (0xfffe7, 20), (0xfffe8, 20),
    (0x3fffd3, 22), (0x3fffd4, 22), (0x3fffd5, 22), (0x7fffd9, 23),
    (0x3fffd6, 22), (0x7fffda, 23), (0x7fffdb, 23), (0x7fffdc, 23),
    (0x7fffdd, 23), (0x7fffde, 23), (0xffffeb, 24), (0x7fffdf, 23),
    (0xffffec, 24), (0xffffed, 24), (0x3fffd7, 22), (0x7fffe0, 23),
    (0xffffee, 24), (0x7fffe1, 23), (0x7fffe2, 23), (0x7fffe3, 23),
    (0x7fffe4, 23), (0x1fffdc, 21), (0x3fffd8, 22), (0x7fffe5, 23),
    (0x3fffd9, 22), (0x7fffe6, 23), (0x7fffe7, 23), (0xffffef, 24),
    (0x3fffda, 22), (0x1fffdd, 21), (0xfffe9, 20), (0x3fffdb, 22),
    (0x3fffdc, 22), (0x7fffe8, 23), (0x7fffe9, 23), (0x1fffde, 21),
    (0x7fffea, 23), (0x3fffdd, 22), (0x3fffde, 22), (0xfffff0, 24),
    (0x1fffdf, 21), (0x3fffdf, 22), (0x7fffeb, 23), (0x7fffec, 23),
    (0x1fffe0, 21), (0x1fffe1, 21), (0x3fffe0, 22), (0x1fffe2, 21),
    (0x7fffed, 23), (0x3fffe1, 22), (0x7fffee, 23), (0x7fffef, 23),
    (0xfffea, 20), (0x3fffe2, 22), (0x3fffe3, 22), (0x3fffe4, 22),
    (0x7ffff0, 23), (0x3fffe5, 22), (0x3fffe6, 22), (0x7ffff1, 23),
    (0x3ffffe0, 26), (0x3ffffe1, 26), (0xfffeb, 20), (0x7fff1, 19),
    (0x3fffe7, 22), (0x7ffff2, 23), (0x3fffe8, 22), (0x1ffffec, 25),
    (0x3ffffe2, 26), (0x3ffffe3, 26), (0x3ffffe4, 26), (0x7ffffde, 27),
    (0x7ffffdf, 27), (0x3ffffe5, 26), (0xfffff1, 24), (0x1ffffed, 25),
    (0x7fff2, 19), (0x1fffe3, 21), (0x3ffffe6, 26), (0x7ffffe0, 27),
    (0x7ffffe1, 27), (0x3ffffe7, 26), (0x7ffffe2, 27), (0xfffff2, 24),
    (0x1fffe4, 21), (0x1fffe5, 21), (0x3ffffe8, 26), (0x3ffffe9, 26),
    (0xffffffd, 28), (0x7ffffe3, 27), (0x7ffffe4, 27), (0x7ffffe5, 27),
    (0xfffec, 20), (0xfffff3, 24), (0xfffed, 20), (0x1fffe6, 21),
    (0x3fffe9, 22), (0x1fffe7, 21), (0x1fffe8, 21), (0x7ffff3, 23),
    (0x3fffea, 22), (0x3fffeb, 22), (0x1ffffee, 25), (0x1ffffef, 25),
    (0xfffff4, 24), (0xfffff5, 24), (0x3ffffea, 26), (0x7ffff4, 23),
    (0x3ffffeb, 26), (0x7ffffe6, 27), (0x3ffffec, 26), (0x3ffffed, 26),
    (0x7ffffe7, 27), (0x7ffffe8, 27), (0x7ffffe9, 27), (0x7ffffea, 27),
    (0x7ffffeb, 27), (0xffffffe, 28), (0x7ffffec, 27), (0x7ffffed, 27),
    (0x7ffffee, 27), (0x7ffffef, 27), (0x7fffff0, 27), (0x3ffffee, 26),
    (0x3fffffff, 30),
];

// ---- integers ---------------------------------------------------------------

fn encode_int(dst: &mut BytesMut, value: usize, prefix_bits: u8, first_byte: u8) {
    let max = (1usize << prefix_bits) - 1;
    if value < max {
        dst.put_u8(first_byte | value as u8);
        return;
    }
    dst.put_u8(first_byte | max as u8);
    let mut rest = value - max;
    while rest >= 128 {
        dst.put_u8((rest % 128) as u8 | 0x80);
        rest /= 128;
    }
    dst.put_u8(rest as u8);
}

fn decode_int(buf: &[u8], pos: &mut usize, prefix_bits: u8) -> Result<usize> {
    let max = (1usize << prefix_bits) - 1;
    let first = *buf
        .get(*pos)
        .ok_or_else(|| Error::protocol("HPACK integer truncated"))?;
    *pos += 1;
    let mut value = (first as usize) & max;
    if value < max {
        return Ok(value);
    }
    let mut shift = 0u32;
    loop {
        let b = *buf
            .get(*pos)
            .ok_or_else(|| Error::protocol("HPACK integer truncated"))?;
        *pos += 1;
        if shift > 28 {
            return Err(Error::protocol("HPACK integer overflow"));
        }
        value += ((b & 0x7f) as usize) << shift;
        shift += 7;
        if b & 0x80 == 0 {
            return Ok(value);
        }
    }
}

// ---- huffman ----------------------------------------------------------------

fn huffman_len(input: &[u8]) -> usize {
    let bits: usize = input.iter().map(|b| HUFFMAN_CODES[*b as usize].1 as usize).sum();
    bits.div_ceil(8)
}

fn huffman_encode(input: &[u8], dst: &mut BytesMut) {
    let mut acc: u64 = 0;
    let mut bits: u32 = 0;
    for b in input {
        let (code, len) = HUFFMAN_CODES[*b as usize];
        acc = (acc << len) | code as u64;
        bits += len as u32;
        while bits >= 8 {
            bits -= 8;
            dst.put_u8((acc >> bits) as u8);
        }
    }
    if bits > 0 {
        // pad with the most significant bits of EOS (all ones)
        let pad = 8 - bits;
        dst.put_u8(((acc << pad) | ((1 << pad) - 1)) as u8);
    }
}

/// Binary decoding tree. Each node holds two children; values >= 0x8000
/// mark a leaf carrying `symbol | 0x8000`.
struct HuffmanTree {
    nodes: Vec<[u16; 2]>,
}

const LEAF: u16 = 0x8000;

fn huffman_tree() -> &'static HuffmanTree {
    static TREE: OnceLock<HuffmanTree> = OnceLock::new();
    TREE.get_or_init(|| {
        let mut nodes = vec![[0u16; 2]];
        for (symbol, (code, len)) in HUFFMAN_CODES.iter().enumerate() {
            let mut node = 0usize;
            for i in (0..*len).rev() {
                let bit = ((code >> i) & 1) as usize;
                if i == 0 {
                    nodes[node][bit] = LEAF | symbol as u16;
                } else {
                    if nodes[node][bit] == 0 {
                        nodes.push([0, 0]);
                        nodes[node][bit] = (nodes.len() - 1) as u16;
                    }
                    node = nodes[node][bit] as usize;
                }
            }
        }
        HuffmanTree { nodes }
    })
}

fn huffman_decode(input: &[u8]) -> Result<Vec<u8>> {
    let tree = huffman_tree();
    let mut out = Vec::with_capacity(input.len() * 8 / 5);
    let mut node = 0usize;
    let mut depth = 0u32;
    let mut all_ones = true;
    for byte in input {
        for i in (0..8).rev() {
            let bit = ((byte >> i) & 1) as usize;
            all_ones &= bit == 1;
            depth += 1;
            let next = tree.nodes[node][bit];
            if next & LEAF != 0 {
                let symbol = next & !LEAF;
                if symbol == 256 {
                    return Err(Error::protocol("HPACK Huffman string contains EOS"));
                }
                out.push(symbol as u8);
                node = 0;
                depth = 0;
                all_ones = true;
            } else if next == 0 {
                return Err(Error::protocol("invalid HPACK Huffman code"));
            } else {
                node = next as usize;
            }
        }
    }
    if depth > 7 || !all_ones {
        return Err(Error::protocol("invalid HPACK Huffman padding"));
    }
    Ok(out)
}

// ---- strings ----------------------------------------------------------------

fn encode_string(dst: &mut BytesMut, value: &[u8]) {
    let huff = huffman_len(value);
    if huff < value.len() {
        encode_int(dst, huff, 7, 0x80);
        huffman_encode(value, dst);
    } else {
        encode_int(dst, value.len(), 7, 0);
        dst.put_slice(value);
    }
}

fn decode_string(buf: &[u8], pos: &mut usize) -> Result<String> {
    let huffman = buf
        .get(*pos)
        .map(|b| b & 0x80 != 0)
        .ok_or_else(|| Error::protocol("HPACK string truncated"))?;
    let len = decode_int(buf, pos, 7)?;
    let end = pos
        .checked_add(len)
        .filter(|end| *end <= buf.len())
        .ok_or_else(|| Error::protocol("HPACK string truncated"))?;
    let raw = &buf[*pos..end];
    *pos = end;
    let bytes = if huffman {
        huffman_decode(raw)?
    } else {
        raw.to_vec()
    };
    Ok(match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    })
}

// ---- dynamic table ----------------------------------------------------------

#[derive(Debug, Default)]
struct DynamicTable {
    entries: VecDeque<(String, String)>,
    size: usize,
    max_size: usize,
}

impl DynamicTable {
    fn new(max_size: usize) -> Self {
        Self {
            max_size,
            ..Default::default()
        }
    }

    fn entry_size(name: &str, value: &str) -> usize {
        name.len() + value.len() + ENTRY_OVERHEAD
    }

    fn insert(&mut self, name: String, value: String) {
        let size = Self::entry_size(&name, &value);
        if size > self.max_size {
            self.entries.clear();
            self.size = 0;
            return;
        }
        while self.size + size > self.max_size {
            self.evict();
        }
        self.size += size;
        self.entries.push_front((name, value));
    }

    fn evict(&mut self) {
        if let Some((n, v)) = self.entries.pop_back() {
            self.size -= Self::entry_size(&n, &v);
        }
    }

    fn resize(&mut self, max_size: usize) {
        self.max_size = max_size;
        while self.size > self.max_size {
            self.evict();
        }
    }

    fn get(&self, index: usize) -> Option<(&str, &str)> {
        if index == 0 {
            return None;
        }
        if index <= STATIC_TABLE.len() {
            return Some(STATIC_TABLE[index - 1]);
        }
        self.entries
            .get(index - STATIC_TABLE.len() - 1)
            .map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Best match: `(index, value matched too)`.
    fn find(&self, name: &str, value: &str) -> Option<(usize, bool)> {
        let mut name_only = None;
        for (i, (n, v)) in STATIC_TABLE.iter().enumerate() {
            if *n == name {
                if *v == value {
                    return Some((i + 1, true));
                }
                name_only.get_or_insert(i + 1);
            }
        }
        for (i, (n, v)) in self.entries.iter().enumerate() {
            if n == name {
                let index = STATIC_TABLE.len() + i + 1;
                if v == value {
                    return Some((index, true));
                }
                name_only.get_or_insert(index);
            }
        }
        name_only.map(|i| (i, false))
    }
}

// ---- encoder / decoder -------------------------------------------------------

pub struct Encoder {
    table: DynamicTable,
    pending_resize: Option<usize>,
}

impl Encoder {
    pub fn new(max_size: usize) -> Self {
        Self {
            table: DynamicTable::new(max_size),
            pending_resize: None,
        }
    }

    /// Apply the peer's SETTINGS_HEADER_TABLE_SIZE. The next block starts
    /// with a size update.
    pub fn set_max_table_size(&mut self, size: usize) {
        if size != self.table.max_size {
            self.table.resize(size);
            self.pending_resize = Some(size);
        }
    }

    /// Encode fields in the given order. Names must already be lowercase.
    pub fn encode<'a>(
        &mut self,
        fields: impl IntoIterator<Item = (&'a str, &'a str)>,
        dst: &mut BytesMut,
    ) {
        if let Some(size) = self.pending_resize.take() {
            encode_int(dst, size, 5, 0x20);
        }
        for (name, value) in fields {
            match self.table.find(name, value) {
                Some((index, true)) => encode_int(dst, index, 7, 0x80),
                found => {
                    let cacheable =
                        DynamicTable::entry_size(name, value) <= self.table.max_size / 2;
                    let (prefix, first) = if cacheable { (6, 0x40) } else { (4, 0x00) };
                    match found {
                        Some((index, false)) => encode_int(dst, index, prefix, first),
                        _ => {
                            dst.put_u8(first);
                            encode_string(dst, name.as_bytes());
                        }
                    }
                    encode_string(dst, value.as_bytes());
                    if cacheable {
                        self.table.insert(name.to_string(), value.to_string());
                    }
                }
            }
        }
    }
}

pub struct Decoder {
    table: DynamicTable,
    /// Upper bound for size updates: the header table size we advertised.
    limit: usize,
}

impl Decoder {
    pub fn new(limit: usize) -> Self {
        Self {
            table: DynamicTable::new(limit),
            limit,
        }
    }

    pub fn decode(&mut self, block: &[u8]) -> Result<Vec<(String, String)>> {
        let mut fields = Vec::new();
        let mut pos = 0;
        while pos < block.len() {
            let b = block[pos];
            if b & 0x80 != 0 {
                let index = decode_int(block, &mut pos, 7)?;
                let (n, v) = self
                    .table
                    .get(index)
                    .ok_or_else(|| Error::protocol(format!("HPACK index {} out of range", index)))?;
                fields.push((n.to_string(), v.to_string()));
            } else if b & 0xe0 == 0x20 {
                let size = decode_int(block, &mut pos, 5)?;
                if size > self.limit {
                    return Err(Error::protocol("HPACK table size update above limit"));
                }
                self.table.resize(size);
            } else {
                let (prefix, index_it) = if b & 0x40 != 0 { (6, true) } else { (4, false) };
                let index = decode_int(block, &mut pos, prefix)?;
                let name = if index == 0 {
                    decode_string(block, &mut pos)?
                } else {
                    self.table
                        .get(index)
                        .map(|(n, _)| n.to_string())
                        .ok_or_else(|| {
                            Error::protocol(format!("HPACK name index {} out of range", index))
                        })?
                };
                let value = decode_string(block, &mut pos)?;
                if index_it {
                    self.table.insert(name.clone(), value.clone());
                }
                fields.push((name, value));
            }
        }
        Ok(fields)
    }
}
