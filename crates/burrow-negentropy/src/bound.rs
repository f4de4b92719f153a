//! Range bounds: timestamps plus id bit-prefixes.

use crate::error::Error;
use crate::varint;

/// Number of bits in an event id.
pub const ID_BITS: u16 = 256;

/// Timestamp value representing infinity on the wire (encoded as zero).
pub const TS_INFINITY: u64 = u64::MAX;

/// An id bit-prefix with explicit length in `[0, 256]`.
///
/// Bits beyond `bit_len` are always zero. A zero-length prefix matches
/// every id; a 256-bit prefix matches exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Prefix {
    bytes: [u8; 32],
    bit_len: u16,
}

impl Prefix {
    /// The empty prefix covering the whole id space.
    pub fn root() -> Self {
        Self {
            bytes: [0u8; 32],
            bit_len: 0,
        }
    }

    /// Builds a prefix from raw bytes, masking bits beyond `bit_len`.
    pub fn new(bytes: [u8; 32], bit_len: u16) -> Result<Self, Error> {
        if bit_len > ID_BITS {
            return Err(Error::invalid(format!("prefix bit length {bit_len} > 256")));
        }
        let mut masked = [0u8; 32];
        let full_bytes = usize::from(bit_len / 8);
        masked[..full_bytes].copy_from_slice(&bytes[..full_bytes]);
        let rem = bit_len % 8;
        if rem > 0 {
            let mask = 0xffu8 << (8 - rem);
            masked[full_bytes] = bytes[full_bytes] & mask;
        }
        Ok(Self {
            bytes: masked,
            bit_len,
        })
    }

    /// Prefix bit length.
    pub fn bit_len(&self) -> u16 {
        self.bit_len
    }

    /// Raw prefix bytes (trailing bits zeroed).
    pub fn bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    /// Extends the prefix by one bit. `None` at full depth.
    pub fn child(&self, bit: bool) -> Option<Prefix> {
        if self.bit_len >= ID_BITS {
            return None;
        }
        let mut bytes = self.bytes;
        if bit {
            let idx = usize::from(self.bit_len / 8);
            bytes[idx] |= 0x80 >> (self.bit_len % 8);
        }
        Some(Prefix {
            bytes,
            bit_len: self.bit_len + 1,
        })
    }

    /// Whether `id` starts with this prefix, bit for bit.
    pub fn matches(&self, id: &[u8; 32]) -> bool {
        let full_bytes = usize::from(self.bit_len / 8);
        if self.bytes[..full_bytes] != id[..full_bytes] {
            return false;
        }
        let rem = self.bit_len % 8;
        if rem == 0 {
            return true;
        }
        let mask = 0xffu8 << (8 - rem);
        (id[full_bytes] & mask) == self.bytes[full_bytes]
    }

    fn byte_len(&self) -> usize {
        usize::from(self.bit_len).div_ceil(8)
    }
}

/// A range boundary: `(timestamp, id_prefix)`, ordered on
/// `(created_at ASC, id ASC)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bound {
    /// Boundary timestamp; [`TS_INFINITY`] covers all times.
    pub timestamp: u64,
    /// Id bit-prefix.
    pub prefix: Prefix,
}

impl Bound {
    /// The all-covering bound: infinite timestamp, empty prefix.
    pub fn everything() -> Self {
        Self {
            timestamp: TS_INFINITY,
            prefix: Prefix::root(),
        }
    }

    /// Bound for `prefix` with an infinite timestamp.
    pub fn for_prefix(prefix: Prefix) -> Self {
        Self {
            timestamp: TS_INFINITY,
            prefix,
        }
    }

    /// Encodes the bound, delta-compressing the timestamp against
    /// `prev_ts`. Infinity encodes as zero; finite timestamps as
    /// `ts - prev + 1`.
    pub fn encode(&self, prev_ts: &mut u64, out: &mut Vec<u8>) {
        if self.timestamp == TS_INFINITY {
            varint::encode(0, out);
        } else {
            let delta = self.timestamp.saturating_sub(*prev_ts) + 1;
            varint::encode(delta, out);
            *prev_ts = self.timestamp;
        }
        varint::encode(u64::from(self.prefix.bit_len), out);
        out.extend_from_slice(&self.prefix.bytes[..self.prefix.byte_len()]);
    }

    /// Decodes a bound at `*pos`, updating `prev_ts` symmetrically to
    /// [`encode`](Bound::encode).
    pub fn decode(buf: &[u8], pos: &mut usize, prev_ts: &mut u64) -> Result<Self, Error> {
        let raw_ts = varint::decode(buf, pos)?;
        let timestamp = if raw_ts == 0 {
            TS_INFINITY
        } else {
            let ts = prev_ts
                .checked_add(raw_ts - 1)
                .ok_or_else(|| Error::invalid("timestamp delta overflow"))?;
            *prev_ts = ts;
            ts
        };
        let bit_len = varint::decode(buf, pos)?;
        let bit_len = u16::try_from(bit_len)
            .ok()
            .filter(|b| *b <= ID_BITS)
            .ok_or_else(|| Error::invalid(format!("bad prefix bit length {bit_len}")))?;
        let byte_len = usize::from(bit_len).div_ceil(8);
        let raw = buf
            .get(*pos..*pos + byte_len)
            .ok_or_else(|| Error::invalid("truncated prefix"))?;
        *pos += byte_len;
        let mut bytes = [0u8; 32];
        bytes[..byte_len].copy_from_slice(raw);
        Ok(Self {
            timestamp,
            prefix: Prefix::new(bytes, bit_len)?,
        })
    }
}
