//! Ingest stream handling: envelope extraction, filter-array splitting and
//! tags normalization.
//!
//! All three routines work on raw text with string- and escape-aware
//! scanning so the original event bytes survive untouched into storage.

use std::borrow::Cow;

use crate::error::Error;

/// Scans JSON text tracking nesting depth outside of string literals.
struct Scanner<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            bytes: text.as_bytes(),
            pos: 0,
        }
    }

    fn skip_ws(&mut self) {
        while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    /// Consumes one string literal including quotes. Assumes `peek() == '"'`.
    fn skip_string(&mut self) -> Result<(), Error> {
        self.pos += 1;
        while let Some(b) = self.peek() {
            self.pos += 1;
            match b {
                b'\\' => self.pos += 1,
                b'"' => return Ok(()),
                _ => {}
            }
        }
        Err(Error::InvalidEnvelope("unterminated string".into()))
    }

    /// Consumes one balanced value starting at an opening brace or bracket.
    /// Returns the byte range of the value.
    fn skip_balanced(&mut self) -> Result<(usize, usize), Error> {
        let start = self.pos;
        let mut depth = 0usize;
        while let Some(b) = self.peek() {
            match b {
                b'"' => self.skip_string()?,
                b'{' | b'[' => {
                    depth += 1;
                    self.pos += 1;
                }
                b'}' | b']' => {
                    depth = depth
                        .checked_sub(1)
                        .ok_or_else(|| Error::InvalidEnvelope("unbalanced nesting".into()))?;
                    self.pos += 1;
                    if depth == 0 {
                        return Ok((start, self.pos));
                    }
                }
                _ => self.pos += 1,
            }
        }
        Err(Error::InvalidEnvelope("truncated value".into()))
    }

    /// Consumes any single JSON value (scalar, string or container).
    fn skip_value(&mut self) -> Result<(), Error> {
        self.skip_ws();
        match self.peek() {
            Some(b'"') => self.skip_string(),
            Some(b'{') | Some(b'[') => self.skip_balanced().map(|_| ()),
            Some(_) => {
                while let Some(b) = self.peek() {
                    if matches!(b, b',' | b'}' | b']') || b.is_ascii_whitespace() {
                        break;
                    }
                    self.pos += 1;
                }
                Ok(())
            }
            None => Err(Error::InvalidEnvelope("truncated value".into())),
        }
    }
}

/// Extracts the event object from an ingest line.
///
/// A line is either a raw event object or the envelope form
/// `["EVENT", subid, {event}]`. Returns the slice holding the event object.
pub fn extract_event_json(line: &str) -> Result<&str, Error> {
    let mut scanner = Scanner::new(line);
    scanner.skip_ws();
    match scanner.peek() {
        Some(b'{') => {
            let (start, end) = scanner.skip_balanced()?;
            Ok(&line[start..end])
        }
        Some(b'[') => {
            scanner.pos += 1;
            scanner.skip_ws();
            // ["EVENT"
            if scanner.peek() != Some(b'"') {
                return Err(Error::InvalidEnvelope("expected envelope label".into()));
            }
            let label_start = scanner.pos;
            scanner.skip_string()?;
            if &line[label_start..scanner.pos] != "\"EVENT\"" {
                return Err(Error::InvalidEnvelope(format!(
                    "unsupported envelope {}",
                    &line[label_start..scanner.pos]
                )));
            }
            scanner.skip_ws();
            if scanner.peek() != Some(b',') {
                return Err(Error::InvalidEnvelope("short envelope".into()));
            }
            scanner.pos += 1;
            scanner.skip_value()?; // subscription id
            scanner.skip_ws();
            if scanner.peek() != Some(b',') {
                return Err(Error::InvalidEnvelope("short envelope".into()));
            }
            scanner.pos += 1;
            scanner.skip_ws();
            if scanner.peek() != Some(b'{') {
                return Err(Error::InvalidEnvelope("envelope without event object".into()));
            }
            let (start, end) = scanner.skip_balanced()?;
            Ok(&line[start..end])
        }
        _ => Err(Error::InvalidEnvelope("not an object or envelope".into())),
    }
}

/// Splits filter JSON into individual filter objects.
///
/// Accepts either a single object (returned as-is) or a top-level array,
/// split on `{...}` boundaries with string-aware brace tracking. Leading
/// whitespace is tolerated.
pub fn split_filters(json: &str) -> Result<Vec<&str>, Error> {
    let mut scanner = Scanner::new(json);
    scanner.skip_ws();
    match scanner.peek() {
        Some(b'{') => {
            let (start, end) = scanner.skip_balanced()?;
            Ok(vec![&json[start..end]])
        }
        Some(b'[') => {
            scanner.pos += 1;
            let mut out = Vec::new();
            loop {
                scanner.skip_ws();
                match scanner.peek() {
                    Some(b']') => return Ok(out),
                    Some(b'{') => {
                        let (start, end) = scanner.skip_balanced()?;
                        out.push(&json[start..end]);
                        scanner.skip_ws();
                        if scanner.peek() == Some(b',') {
                            scanner.pos += 1;
                        }
                    }
                    _ => return Err(Error::InvalidEnvelope("expected filter object".into())),
                }
            }
        }
        _ => Err(Error::InvalidEnvelope("expected filter or array".into())),
    }
}

/// Inserts `"tags":[]` after the `kind` field when the event JSON lacks a
/// `tags` field. Upstream relays frequently omit empty tags.
pub fn normalize_tags(json: &str) -> Result<Cow<'_, str>, Error> {
    if top_level_key_pos(json, "tags")?.is_some() {
        return Ok(Cow::Borrowed(json));
    }
    let Some(kind_pos) = top_level_key_pos(json, "kind")? else {
        return Err(Error::InvalidEnvelope("event without kind".into()));
    };
    let mut scanner = Scanner::new(json);
    scanner.pos = kind_pos;
    scanner.skip_string()?;
    scanner.skip_ws();
    if scanner.peek() != Some(b':') {
        return Err(Error::InvalidEnvelope("malformed kind field".into()));
    }
    scanner.pos += 1;
    scanner.skip_value()?;
    let insert_at = scanner.pos;
    let mut out = String::with_capacity(json.len() + 12);
    out.push_str(&json[..insert_at]);
    out.push_str(",\"tags\":[]");
    out.push_str(&json[insert_at..]);
    Ok(Cow::Owned(out))
}

/// Byte offset of the opening quote of a top-level object key, if present.
fn top_level_key_pos(json: &str, key: &str) -> Result<Option<usize>, Error> {
    let mut scanner = Scanner::new(json);
    scanner.skip_ws();
    if scanner.peek() != Some(b'{') {
        return Err(Error::InvalidEnvelope("not an object".into()));
    }
    scanner.pos += 1;
    loop {
        scanner.skip_ws();
        match scanner.peek() {
            Some(b'}') | None => return Ok(None),
            Some(b'"') => {
                let key_start = scanner.pos;
                scanner.skip_string()?;
                if json[key_start..scanner.pos] == format!("\"{key}\"") {
                    return Ok(Some(key_start));
                }
                scanner.skip_ws();
                if scanner.peek() != Some(b':') {
                    return Err(Error::InvalidEnvelope("missing colon".into()));
                }
                scanner.pos += 1;
                scanner.skip_value()?;
                scanner.skip_ws();
                if scanner.peek() == Some(b',') {
                    scanner.pos += 1;
                }
            }
            _ => return Err(Error::InvalidEnvelope("malformed object".into())),
        }
    }
}

/// Iterates the event objects of a line-delimited ingest buffer.
///
/// Yields one extracted event JSON slice per non-empty line.
pub fn iter_ldjson(buf: &str) -> impl Iterator<Item = Result<&str, Error>> {
    buf.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(extract_event_json)
}
