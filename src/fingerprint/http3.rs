//! HTTP/3 fingerprint: SETTINGS, pseudo-header order, datagram and grease
//! behavior.

use std::collections::HashMap;

use super::http2::PseudoHeader;
use crate::error::{Error, Result};

pub const QPACK_MAX_TABLE_CAPACITY: u64 = 0x1;
pub const MAX_FIELD_SECTION_SIZE: u64 = 0x6;
pub const QPACK_BLOCKED_STREAMS: u64 = 0x7;
pub const ENABLE_CONNECT_PROTOCOL: u64 = 0x8;
pub const H3_DATAGRAM: u64 = 0x33;

const SETTING_NAMES: &[(&str, u64)] = &[
    ("QPACK_MAX_TABLE_CAPACITY", QPACK_MAX_TABLE_CAPACITY),
    ("MAX_FIELD_SECTION_SIZE", MAX_FIELD_SECTION_SIZE),
    ("QPACK_BLOCKED_STREAMS", QPACK_BLOCKED_STREAMS),
    ("ENABLE_CONNECT_PROTOCOL", ENABLE_CONNECT_PROTOCOL),
    ("H3_DATAGRAM", H3_DATAGRAM),
];

pub fn setting_id(name: &str) -> Option<u64> {
    if let Ok(id) = name.parse::<u64>() {
        return Some(id);
    }
    SETTING_NAMES
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, id)| *id)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Http3Fingerprint {
    /// `(id, value)` pairs in send order.
    pub settings: Vec<(u64, u64)>,
    pub pseudo_header_order: Vec<PseudoHeader>,
    /// RFC 9218 urgency sent in the `priority` header, if any.
    pub priority_param: Option<u32>,
    pub send_grease_frames: bool,
}

impl Default for Http3Fingerprint {
    fn default() -> Self {
        Self {
            settings: vec![
                (QPACK_MAX_TABLE_CAPACITY, 65536),
                (MAX_FIELD_SECTION_SIZE, 262144),
                (QPACK_BLOCKED_STREAMS, 100),
                (H3_DATAGRAM, 1),
            ],
            pseudo_header_order: vec![
                PseudoHeader::Method,
                PseudoHeader::Authority,
                PseudoHeader::Scheme,
                PseudoHeader::Path,
            ],
            priority_param: None,
            send_grease_frames: true,
        }
    }
}

impl Http3Fingerprint {
    pub fn settings_from_map(
        map: &HashMap<String, u64>,
        order: &[String],
    ) -> Result<Vec<(u64, u64)>> {
        if order.is_empty() {
            let mut out = map
                .iter()
                .map(|(name, value)| {
                    setting_id(name)
                        .map(|id| (id, *value))
                        .ok_or_else(|| Error::validation(format!("unknown HTTP/3 setting: {}", name)))
                })
                .collect::<Result<Vec<_>>>()?;
            out.sort_unstable();
            return Ok(out);
        }
        let mut out: Vec<(u64, u64)> = Vec::with_capacity(order.len());
        for name in order {
            let value = map.get(name).ok_or_else(|| {
                Error::validation(format!("h3SettingsOrder names {} which h3Settings lacks", name))
            })?;
            let id = setting_id(name)
                .ok_or_else(|| Error::validation(format!("unknown HTTP/3 setting: {}", name)))?;
            if out.iter().any(|(k, _)| *k == id) {
                return Err(Error::validation(format!("h3SettingsOrder repeats {}", name)));
            }
            out.push((id, *value));
        }
        if let Some(missing) = map.keys().find(|k| !order.contains(k)) {
            return Err(Error::validation(format!(
                "h3Settings key {} missing from h3SettingsOrder",
                missing
            )));
        }
        Ok(out)
    }

    pub fn setting(&self, id: u64) -> Option<u64> {
        self.settings.iter().find(|(k, _)| *k == id).map(|(_, v)| *v)
    }

    pub fn datagram(&self) -> bool {
        self.setting(H3_DATAGRAM).is_some_and(|v| v != 0)
    }

    pub fn validate(&self) -> Result<()> {
        let mut ids: Vec<u64> = self.settings.iter().map(|(id, _)| *id).collect();
        ids.sort_unstable();
        if ids.windows(2).any(|w| w[0] == w[1]) {
            return Err(Error::validation("duplicate HTTP/3 setting"));
        }
        if self.pseudo_header_order.len() != 4 {
            return Err(Error::validation("HTTP/3 pseudo header order must have 4 entries"));
        }
        Ok(())
    }
}
