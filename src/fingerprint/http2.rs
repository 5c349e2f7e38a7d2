//! HTTP/2 fingerprint: SETTINGS order, connection window, priorities and
//! pseudo-header order.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Named HTTP/2 SETTINGS identifiers, including the unassigned ids browsers
/// send as grease.
const SETTING_NAMES: &[(&str, u16)] = &[
    ("HEADER_TABLE_SIZE", 0x1),
    ("ENABLE_PUSH", 0x2),
    ("MAX_CONCURRENT_STREAMS", 0x3),
    ("INITIAL_WINDOW_SIZE", 0x4),
    ("MAX_FRAME_SIZE", 0x5),
    ("MAX_HEADER_LIST_SIZE", 0x6),
    ("UNKNOWN_SETTING_7", 0x7),
    ("UNKNOWN_SETTING_8", 0x8),
    ("ENABLE_CONNECT_PROTOCOL", 0x8),
    ("UNKNOWN_SETTING_9", 0x9),
    ("NO_RFC7540_PRIORITIES", 0x9),
];

/// Resolve a setting name (or a decimal id) to its identifier.
pub fn setting_id(name: &str) -> Option<u16> {
    if let Ok(id) = name.parse::<u16>() {
        return Some(id);
    }
    SETTING_NAMES
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, id)| *id)
}

/// HTTP/2 pseudo-header fields of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PseudoHeader {
    Method,
    Authority,
    Scheme,
    Path,
}

impl PseudoHeader {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            ":method" | "m" => Some(Self::Method),
            ":authority" | "a" => Some(Self::Authority),
            ":scheme" | "s" => Some(Self::Scheme),
            ":path" | "p" => Some(Self::Path),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Method => ":method",
            Self::Authority => ":authority",
            Self::Scheme => ":scheme",
            Self::Path => ":path",
        }
    }

    fn letter(&self) -> char {
        match self {
            Self::Method => 'm',
            Self::Authority => 'a',
            Self::Scheme => 's',
            Self::Path => 'p',
        }
    }
}

/// Parse a pseudo-header order list; it must name each pseudo header once.
pub fn parse_pseudo_order(order: &[String]) -> Result<Vec<PseudoHeader>> {
    let mut out = Vec::with_capacity(4);
    for name in order {
        let p = PseudoHeader::parse(name)
            .ok_or_else(|| Error::validation(format!("unknown pseudo header: {}", name)))?;
        if out.contains(&p) {
            return Err(Error::validation(format!("duplicate pseudo header: {}", name)));
        }
        out.push(p);
    }
    if out.len() != 4 {
        return Err(Error::validation(
            "pseudo header order must list :method, :authority, :scheme and :path",
        ));
    }
    Ok(out)
}

/// Stream priority as sent in HEADERS and PRIORITY frames. `weight` is the
/// RFC 9113 value (1-256); the wire carries `weight - 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriorityParam {
    pub stream_dep: u32,
    pub exclusive: bool,
    pub weight: u16,
}

/// A PRIORITY frame sent right after the connection preface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriorityFrame {
    #[serde(rename = "streamID")]
    pub stream_id: u32,
    pub priority_param: PriorityParam,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Http2Fingerprint {
    /// `(id, value)` pairs in the exact order they go on the wire.
    pub settings: Vec<(u16, u32)>,
    /// Increment of the connection-level WINDOW_UPDATE sent after SETTINGS.
    /// Zero sends none.
    pub connection_flow: u32,
    pub header_priority: Option<PriorityParam>,
    pub priority_frames: Vec<PriorityFrame>,
    pub pseudo_header_order: Vec<PseudoHeader>,
}

impl Default for Http2Fingerprint {
    fn default() -> Self {
        Self {
            settings: vec![(0x1, 4096), (0x2, 0), (0x4, 65535)],
            connection_flow: 0,
            header_priority: None,
            priority_frames: Vec::new(),
            pseudo_header_order: vec![
                PseudoHeader::Method,
                PseudoHeader::Authority,
                PseudoHeader::Scheme,
                PseudoHeader::Path,
            ],
        }
    }
}

impl Http2Fingerprint {
    /// Build the ordered settings list from a name→value map and an explicit
    /// order. The order must be a permutation of the map keys; an empty
    /// order sends the settings by ascending id.
    pub fn settings_from_map(
        map: &HashMap<String, u32>,
        order: &[String],
    ) -> Result<Vec<(u16, u32)>> {
        if order.is_empty() {
            let mut out = map
                .iter()
                .map(|(name, value)| {
                    setting_id(name)
                        .map(|id| (id, *value))
                        .ok_or_else(|| Error::validation(format!("unknown HTTP/2 setting: {}", name)))
                })
                .collect::<Result<Vec<_>>>()?;
            out.sort_unstable();
            return Ok(out);
        }
        let mut out = Vec::with_capacity(order.len());
        let mut seen = Vec::with_capacity(order.len());
        for name in order {
            let value = map.get(name).ok_or_else(|| {
                Error::validation(format!("h2SettingsOrder names {} which h2Settings lacks", name))
            })?;
            let id = setting_id(name)
                .ok_or_else(|| Error::validation(format!("unknown HTTP/2 setting: {}", name)))?;
            if seen.contains(&name) {
                return Err(Error::validation(format!("h2SettingsOrder repeats {}", name)));
            }
            seen.push(name);
            out.push((id, *value));
        }
        if let Some(missing) = map.keys().find(|k| !order.contains(k)) {
            return Err(Error::validation(format!(
                "h2Settings key {} missing from h2SettingsOrder",
                missing
            )));
        }
        Ok(out)
    }

    pub fn setting(&self, id: u16) -> Option<u32> {
        self.settings.iter().find(|(k, _)| *k == id).map(|(_, v)| *v)
    }

    /// Our advertised SETTINGS_INITIAL_WINDOW_SIZE.
    pub fn initial_window_size(&self) -> u32 {
        self.setting(0x4).unwrap_or(65_535)
    }

    /// Our advertised SETTINGS_HEADER_TABLE_SIZE.
    pub fn header_table_size(&self) -> u32 {
        self.setting(0x1).unwrap_or(4096)
    }

    pub fn validate(&self) -> Result<()> {
        let mut ids: Vec<u16> = self.settings.iter().map(|(id, _)| *id).collect();
        ids.sort_unstable();
        if ids.windows(2).any(|w| w[0] == w[1]) {
            return Err(Error::validation("duplicate HTTP/2 setting"));
        }
        if self.pseudo_header_order.len() != 4 {
            return Err(Error::validation("pseudo header order must have 4 entries"));
        }
        if let Some(p) = &self.header_priority {
            if p.weight == 0 || p.weight > 256 {
                return Err(Error::validation("priority weight must be 1..=256"));
            }
        }
        Ok(())
    }

    /// Akamai HTTP/2 fingerprint: `settings|window|priority frames|pseudo`.
    pub fn akamai(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Http2Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let settings: Vec<String> = self
            .settings
            .iter()
            .map(|(id, v)| format!("{}:{}", id, v))
            .collect();
        let priorities: Vec<String> = self
            .priority_frames
            .iter()
            .map(|p| {
                format!(
                    "{}:{}:{}:{}",
                    p.stream_id,
                    p.priority_param.exclusive as u8,
                    p.priority_param.stream_dep,
                    p.priority_param.weight
                )
            })
            .collect();
        let priorities = if priorities.is_empty() {
            "0".to_string()
        } else {
            priorities.join(",")
        };
        let pseudo: Vec<String> = self
            .pseudo_header_order
            .iter()
            .map(|p| p.letter().to_string())
            .collect();
        write!(
            f,
            "{}|{}|{}|{}",
            settings.join(";"),
            self.connection_flow,
            priorities,
            pseudo.join(",")
        )
    }
}
