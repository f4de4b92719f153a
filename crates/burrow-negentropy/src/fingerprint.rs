//! Order-independent range fingerprints.

use sha2::{Digest, Sha256};

use crate::varint;

/// Incremental fingerprint accumulator.
///
/// Sums 32-byte ids as 256-bit little-endian integers modulo 2^256; the
/// fingerprint is the first 16 bytes of `sha256(acc || varint(count))`.
/// Commutative and associative by construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Accumulator {
    acc: [u8; 32],
    count: u64,
}

impl Accumulator {
    /// Empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one id to the sum.
    pub fn add(&mut self, id: &[u8; 32]) {
        let mut carry = 0u16;
        for i in 0..32 {
            let sum = u16::from(self.acc[i]) + u16::from(id[i]) + carry;
            self.acc[i] = (sum & 0xff) as u8;
            carry = sum >> 8;
        }
        // Mod 2^256: the final carry drops.
        self.count += 1;
    }

    /// Number of ids accumulated.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Finalizes the 16-byte fingerprint.
    pub fn fingerprint(&self) -> [u8; 16] {
        let mut hasher = Sha256::new();
        hasher.update(self.acc);
        let mut count_buf = Vec::with_capacity(10);
        varint::encode(self.count, &mut count_buf);
        hasher.update(&count_buf);
        let digest = hasher.finalize();
        let mut out = [0u8; 16];
        out.copy_from_slice(&digest[..16]);
        out
    }
}

/// Fingerprint over a slice of ids.
pub fn fingerprint_of(ids: impl IntoIterator<Item = [u8; 32]>) -> [u8; 16] {
    let mut acc = Accumulator::new();
    for id in ids {
        acc.add(&id);
    }
    acc.fingerprint()
}

#[cfg(test)]
mod tests {
    use sha2::{Digest, Sha256};

    use super::*;

    #[test]
    fn empty_golden_vector() {
        // sha256 of 32 zero bytes followed by varint(0) = 0x00.
        let mut hasher = Sha256::new();
        hasher.update([0u8; 32]);
        hasher.update([0u8]);
        let expected = &hasher.finalize()[..16];
        assert_eq!(Accumulator::new().fingerprint(), expected);
    }

    #[test]
    fn three_id_golden_vector() {
        // Byte 0 is least significant in the little-endian sum, so ids
        // differing only at byte 31 add without carries.
        let mut ids = [[0u8; 32]; 3];
        ids[0][31] = 1;
        ids[1][31] = 2;
        ids[2][31] = 3;
        let mut acc_bytes = [0u8; 32];
        acc_bytes[31] = 6;
        let mut hasher = Sha256::new();
        hasher.update(acc_bytes);
        hasher.update([3u8]); // varint(3)
        let expected = &hasher.finalize()[..16];
        assert_eq!(fingerprint_of(ids), expected);
    }

    #[test]
    fn commutative_under_permutation() {
        let a = [0x11u8; 32];
        let b = [0xfe; 32];
        let c = {
            let mut c = [0u8; 32];
            c[0] = 9;
            c
        };
        assert_eq!(fingerprint_of([a, b, c]), fingerprint_of([c, a, b]));
        assert_eq!(fingerprint_of([b, c, a]), fingerprint_of([a, b, c]));
    }

    #[test]
    fn carry_propagates() {
        // 0xff + 0x01 in the lowest little-endian byte carries into the
        // next byte.
        let mut x = [0u8; 32];
        x[0] = 0xff;
        let mut y = [0u8; 32];
        y[0] = 0x01;
        let mut acc = Accumulator::new();
        acc.add(&x);
        acc.add(&y);
        let mut expected = Accumulator::new();
        let mut z = [0u8; 32];
        z[1] = 0x01;
        expected.add(&z);
        expected.add(&[0u8; 32]);
        assert_eq!(acc.fingerprint(), expected.fingerprint());
    }

    #[test]
    fn count_distinguishes_sets() {
        // Same sum, different count.
        let z = [0u8; 32];
        assert_ne!(fingerprint_of([z]), fingerprint_of([z, z]));
    }
}
