//! JA3 fingerprint strings.
//!
//! `version,ciphers,extensions,curves,point_formats`, lists joined with `-`.

use std::fmt;
use std::str::FromStr;

use super::tls::is_grease;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ja3 {
    pub version: u16,
    pub cipher_suites: Vec<u16>,
    pub extensions: Vec<u16>,
    pub curves: Vec<u16>,
    pub point_formats: Vec<u8>,
}

impl Ja3 {
    pub fn parse(s: &str) -> Result<Self> {
        let fields: Vec<&str> = s.trim().split(',').collect();
        if fields.len() != 5 {
            return Err(Error::validation(format!(
                "JA3 string must have 5 fields, got {}",
                fields.len()
            )));
        }
        let version = fields[0]
            .parse::<u16>()
            .map_err(|_| Error::validation(format!("invalid JA3 version: {}", fields[0])))?;
        Ok(Self {
            version,
            cipher_suites: parse_list(fields[1], "cipher")?,
            extensions: parse_list(fields[2], "extension")?,
            curves: parse_list(fields[3], "curve")?,
            point_formats: parse_list::<u8>(fields[4], "point format")?,
        })
    }
}

fn parse_list<T: FromStr>(field: &str, what: &str) -> Result<Vec<T>> {
    if field.is_empty() {
        return Ok(Vec::new());
    }
    field
        .split('-')
        .map(|v| {
            v.parse::<T>()
                .map_err(|_| Error::validation(format!("invalid JA3 {}: {}", what, v)))
        })
        .collect()
}

fn join<T: fmt::Display>(values: impl Iterator<Item = T>) -> String {
    values.map(|v| v.to_string()).collect::<Vec<_>>().join("-")
}

impl fmt::Display for Ja3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let strip = |v: &&u16| !is_grease(**v);
        write!(
            f,
            "{},{},{},{},{}",
            self.version,
            join(self.cipher_suites.iter().filter(strip)),
            join(self.extensions.iter().filter(strip)),
            join(self.curves.iter().filter(strip)),
            join(self.point_formats.iter()),
        )
    }
}

impl FromStr for Ja3 {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIREFOX_LIKE: &str = "771,4866-4865-4867-49196-49195-52393-49200-49199-52392-255,11-13-51-43-16-0-35-5-23-10-45,29-23-24-4588,0";

    #[test]
    fn parse_and_render() {
        let ja3 = Ja3::parse(FIREFOX_LIKE).unwrap();
        assert_eq!(ja3.version, 771);
        assert_eq!(ja3.cipher_suites[0], 4866);
        assert_eq!(ja3.extensions.len(), 11);
        assert_eq!(ja3.curves, vec![29, 23, 24, 4588]);
        assert_eq!(ja3.point_formats, vec![0]);
        assert_eq!(ja3.to_string(), FIREFOX_LIKE);
    }

    #[test]
    fn grease_is_omitted_when_rendering() {
        let ja3 = Ja3 {
            version: 771,
            cipher_suites: vec![0x0a0a, 4865],
            extensions: vec![0x1a1a, 0, 0x2a2a],
            curves: vec![0x3a3a, 29],
            point_formats: vec![0],
        };
        assert_eq!(ja3.to_string(), "771,4865,0,29,0");
    }

    #[test]
    fn empty_fields_are_allowed() {
        let ja3 = Ja3::parse("771,4865,,,").unwrap();
        assert!(ja3.extensions.is_empty());
        assert!(ja3.point_formats.is_empty());
    }

    #[test]
    fn rejects_malformed() {
        assert!(Ja3::parse("771,4865").is_err());
        assert!(Ja3::parse("771,abc,0,29,0").is_err());
    }
}
