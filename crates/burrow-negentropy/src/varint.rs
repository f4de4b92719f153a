//! Big-endian base-128 varints.
//!
//! Each byte carries seven payload bits; the MSB marks continuation.
//! High-order groups come first, after leading-zero compaction. Zero
//! encodes as a single `0x00` byte.

use crate::error::Error;

/// Appends the encoding of `n` to `out`.
pub fn encode(n: u64, out: &mut Vec<u8>) {
    if n == 0 {
        out.push(0);
        return;
    }
    let mut groups = [0u8; 10];
    let mut len = 0;
    let mut rest = n;
    while rest > 0 {
        groups[len] = (rest & 0x7f) as u8;
        rest >>= 7;
        len += 1;
    }
    for i in (0..len).rev() {
        let mut byte = groups[i];
        if i != 0 {
            byte |= 0x80;
        }
        out.push(byte);
    }
}

/// Decodes a varint at `*pos`, advancing it past the encoding.
pub fn decode(buf: &[u8], pos: &mut usize) -> Result<u64, Error> {
    let mut value: u64 = 0;
    loop {
        let byte = *buf
            .get(*pos)
            .ok_or_else(|| Error::invalid("truncated varint"))?;
        *pos += 1;
        value = value
            .checked_shl(7)
            .filter(|_| value >> 57 == 0)
            .ok_or_else(|| Error::invalid("varint overflows u64"))?
            | u64::from(byte & 0x7f);
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(n: u64) {
        let mut buf = Vec::new();
        encode(n, &mut buf);
        let mut pos = 0;
        assert_eq!(decode(&buf, &mut pos).unwrap(), n);
        assert_eq!(pos, buf.len());
    }

    #[test]
    fn roundtrip_edges() {
        for n in [0, 1, 127, 128, 129, 16_383, 16_384, u32::MAX as u64, u64::MAX] {
            roundtrip(n);
        }
    }

    #[test]
    fn known_encodings() {
        let mut buf = Vec::new();
        encode(0, &mut buf);
        assert_eq!(buf, [0x00]);
        buf.clear();
        encode(128, &mut buf);
        assert_eq!(buf, [0x81, 0x00]);
        buf.clear();
        encode(300, &mut buf);
        assert_eq!(buf, [0x82, 0x2c]);
    }

    #[test]
    fn truncated_rejected() {
        let mut pos = 0;
        assert!(decode(&[0x81], &mut pos).is_err());
        let mut pos = 0;
        assert!(decode(&[], &mut pos).is_err());
    }

    #[test]
    fn overflow_rejected() {
        // Eleven continuation bytes exceed 64 bits.
        let buf = [0xff; 11];
        let mut pos = 0;
        assert!(decode(&buf, &mut pos).is_err());
    }
}
