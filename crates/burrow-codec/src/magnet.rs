//! Magnet URI build and parse.
//!
//! Covers the fields the torrent tooling round-trips: infohash
//! (`xt=urn:btih:`), display name (`dn`), tracker list (`tr`, order
//! preserved) and total length (`xl`). Unknown parameters are ignored on
//! parse.

use std::fmt::Write as _;

use crate::error::Error;

const BTIH_PREFIX: &str = "urn:btih:";

/// A parsed magnet link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MagnetUri {
    /// 40-char hex (or 32-char base32) infohash, stored verbatim.
    pub info_hash: String,
    /// Display name (`dn`).
    pub display_name: Option<String>,
    /// Tracker URLs (`tr`), order preserved.
    pub trackers: Vec<String>,
    /// Total content length in bytes (`xl`).
    pub total_length: Option<u64>,
}

impl MagnetUri {
    /// Builds the `magnet:?...` string.
    pub fn build(&self) -> String {
        let mut out = String::from("magnet:?xt=");
        out.push_str(BTIH_PREFIX);
        out.push_str(&self.info_hash);
        if let Some(name) = &self.display_name {
            let _ = write!(out, "&dn={}", percent_encode(name));
        }
        for tracker in &self.trackers {
            let _ = write!(out, "&tr={}", percent_encode(tracker));
        }
        if let Some(len) = self.total_length {
            let _ = write!(out, "&xl={len}");
        }
        out
    }

    /// Parses a `magnet:?...` string.
    pub fn parse(uri: &str) -> Result<Self, Error> {
        let query = uri
            .strip_prefix("magnet:?")
            .ok_or_else(|| Error::InvalidMagnet("missing magnet:? scheme".into()))?;
        let mut info_hash = None;
        let mut display_name = None;
        let mut trackers = Vec::new();
        let mut total_length = None;
        for pair in query.split('&') {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            match key {
                "xt" => {
                    let hash = value
                        .strip_prefix(BTIH_PREFIX)
                        .ok_or_else(|| Error::InvalidMagnet(format!("unsupported xt {value}")))?;
                    if hash.is_empty() {
                        return Err(Error::InvalidMagnet("empty infohash".into()));
                    }
                    info_hash = Some(hash.to_owned());
                }
                "dn" => display_name = Some(percent_decode(value)?),
                "tr" => trackers.push(percent_decode(value)?),
                "xl" => {
                    total_length = Some(value.parse::<u64>().map_err(|_| {
                        Error::InvalidMagnet(format!("bad length {value}"))
                    })?);
                }
                _ => {}
            }
        }
        Ok(Self {
            info_hash: info_hash
                .ok_or_else(|| Error::InvalidMagnet("missing xt parameter".into()))?,
            display_name,
            trackers,
            total_length,
        })
    }
}

fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char);
            }
            _ => {
                let _ = write!(out, "%{byte:02X}");
            }
        }
    }
    out
}

fn percent_decode(s: &str) -> Result<String, Error> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = bytes
                    .get(i + 1..i + 3)
                    .ok_or_else(|| Error::InvalidMagnet("truncated escape".into()))?;
                let hi = (hex[0] as char)
                    .to_digit(16)
                    .ok_or_else(|| Error::InvalidMagnet("bad escape".into()))?;
                let lo = (hex[1] as char)
                    .to_digit(16)
                    .ok_or_else(|| Error::InvalidMagnet("bad escape".into()))?;
                out.push((hi * 16 + lo) as u8);
                i += 3;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8(out).map_err(|_| Error::InvalidMagnet("escape not utf-8".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_parse_roundtrip() {
        let magnet = MagnetUri {
            info_hash: "c12fe1c06bba254a9dc9f519b335aa7c1367a88a".into(),
            display_name: Some("Some File (v2).tar.gz".into()),
            trackers: vec![
                "udp://tracker.example.org:1337/announce".into(),
                "https://tracker.example.net/announce".into(),
            ],
            total_length: Some(734_003_200),
        };
        let uri = magnet.build();
        let parsed = MagnetUri::parse(&uri).unwrap();
        assert_eq!(parsed, magnet);
    }

    #[test]
    fn tracker_order_preserved() {
        let uri = "magnet:?xt=urn:btih:aa&tr=udp%3A%2F%2Fb&tr=udp%3A%2F%2Fa";
        let parsed = MagnetUri::parse(uri).unwrap();
        assert_eq!(parsed.trackers, vec!["udp://b", "udp://a"]);
    }

    #[test]
    fn unknown_params_ignored() {
        let parsed = MagnetUri::parse("magnet:?xt=urn:btih:aa&ws=http%3A%2F%2Fx").unwrap();
        assert_eq!(parsed.info_hash, "aa");
        assert!(parsed.trackers.is_empty());
    }

    #[test]
    fn missing_xt_rejected() {
        assert!(MagnetUri::parse("magnet:?dn=x").is_err());
        assert!(MagnetUri::parse("magnet:?xt=urn:sha1:aa").is_err());
    }
}
