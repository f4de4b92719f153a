//! The v1 range-message wire format.
//!
//! Layout: version byte `0x61`, varint range count, then per range a bound
//! followed by one TLV payload. TLV types: `0x00` Skip, `0x01` Fingerprint
//! (16 bytes), `0x02` IdList (varint count, packed 32-byte ids).

use crate::bound::Bound;
use crate::error::Error;
use crate::varint;

/// Protocol version tag for v1 messages.
pub const PROTOCOL_VERSION: u8 = 0x61;

const TLV_SKIP: u8 = 0x00;
const TLV_FINGERPRINT: u8 = 0x01;
const TLV_IDLIST: u8 = 0x02;

/// Payload attached to a range bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Nothing to say about the range.
    Skip,
    /// 16-byte range fingerprint.
    Fingerprint([u8; 16]),
    /// Explicit id list.
    IdList(Vec<[u8; 32]>),
}

/// One bound plus its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Range {
    /// Range boundary.
    pub bound: Bound,
    /// Attached payload.
    pub payload: Payload,
}

/// Encodes `ranges` into a binary message.
pub fn encode_message(ranges: &[Range]) -> Vec<u8> {
    let mut out = vec![PROTOCOL_VERSION];
    varint::encode(ranges.len() as u64, &mut out);
    let mut prev_ts = 0u64;
    for range in ranges {
        range.bound.encode(&mut prev_ts, &mut out);
        match &range.payload {
            Payload::Skip => out.push(TLV_SKIP),
            Payload::Fingerprint(fp) => {
                out.push(TLV_FINGERPRINT);
                out.extend_from_slice(fp);
            }
            Payload::IdList(ids) => {
                out.push(TLV_IDLIST);
                varint::encode(ids.len() as u64, &mut out);
                for id in ids {
                    out.extend_from_slice(id);
                }
            }
        }
    }
    out
}

/// Decodes a binary message, bounded by `max_ranges`.
pub fn decode_message(buf: &[u8], max_ranges: usize) -> Result<Vec<Range>, Error> {
    let mut pos = 0usize;
    let version = *buf
        .get(pos)
        .ok_or_else(|| Error::invalid("empty message"))?;
    pos += 1;
    if version != PROTOCOL_VERSION {
        return Err(Error::invalid(format!(
            "unsupported protocol version 0x{version:02x}"
        )));
    }
    let count = varint::decode(buf, &mut pos)?;
    let count = usize::try_from(count)
        .ok()
        .filter(|c| *c <= max_ranges)
        .ok_or_else(|| Error::invalid(format!("range count {count} over cap {max_ranges}")))?;
    let mut ranges = Vec::with_capacity(count);
    let mut prev_ts = 0u64;
    for _ in 0..count {
        let bound = Bound::decode(buf, &mut pos, &mut prev_ts)?;
        let tlv_type = *buf
            .get(pos)
            .ok_or_else(|| Error::invalid("truncated TLV"))?;
        pos += 1;
        let payload = match tlv_type {
            TLV_SKIP => Payload::Skip,
            TLV_FINGERPRINT => {
                let raw = buf
                    .get(pos..pos + 16)
                    .ok_or_else(|| Error::invalid("truncated fingerprint"))?;
                pos += 16;
                let mut fp = [0u8; 16];
                fp.copy_from_slice(raw);
                Payload::Fingerprint(fp)
            }
            TLV_IDLIST => {
                let n = varint::decode(buf, &mut pos)?;
                let n = usize::try_from(n)
                    .ok()
                    .filter(|n| n.checked_mul(32).is_some_and(|b| pos + b <= buf.len()))
                    .ok_or_else(|| Error::invalid("id list overruns message"))?;
                let mut ids = Vec::with_capacity(n);
                for _ in 0..n {
                    let raw = buf
                        .get(pos..pos + 32)
                        .ok_or_else(|| Error::invalid("truncated id"))?;
                    pos += 32;
                    let mut id = [0u8; 32];
                    id.copy_from_slice(raw);
                    ids.push(id);
                }
                Payload::IdList(ids)
            }
            other => return Err(Error::invalid(format!("unknown TLV type 0x{other:02x}"))),
        };
        ranges.push(Range { bound, payload });
    }
    if pos != buf.len() {
        return Err(Error::invalid("trailing bytes after last range"));
    }
    Ok(ranges)
}
