//! Randomized DHCP client hostname (Option 12, "Host Name").
//!
//! 63-byte max length comes from the "label" syntax in RFC 1035 §2.3.1.
//! Adapted from `sw/net`'s `hostname.rs` to draw its entropy from
//! [`crate::prng::NetPrng`] instead of raw caller-supplied words.

use crate::prng::NetPrng;

pub struct Hostname {
    pub length: usize,
    pub buffer: [u8; 63],
}

impl Hostname {
    pub const fn new_blank() -> Self {
        Hostname { length: 1, buffer: [0; 63] }
    }

    /// Generate a pseudorandom alphanumeric hostname of length 5 to 8
    /// characters (RFC 952, RFC 1123 §2.1, RFC 2181 §11).
    pub fn randomize(&mut self, prng: &mut NetPrng) {
        let entropy0 = prng.next_u32();
        let entropy1 = prng.next_u32();
        self.length = 8 - ((entropy0 & 0b011) as usize);
        let rbytes0: [u8; 4] = entropy0.to_le_bytes();
        let rbytes4: [u8; 4] = entropy1.to_le_bytes();
        let rbytes = rbytes0.iter().chain(rbytes4.iter()).take(self.length);
        // Translation table for charset "0123456789ABCDFGHJKLMNPQRSTVWXYZ"
        // (32 symbols, RFC 952 hostname charset minus ambiguous letters).
        for (i, (dst, src)) in self.buffer.iter_mut().zip(rbytes).enumerate() {
            let mut masked_src = src & 0b0001_1111;
            if i == 0 && masked_src <= 10 {
                masked_src += 11; // avoid starting with a digit
            }
            *dst = match masked_src {
                x @ 0..=9 => b'0' + x,
                x @ 10..=13 => b'A' + x - 10,
                x @ 14..=16 => b'F' + x - 14,
                x @ 17..=21 => b'J' + x - 17,
                x @ 22..=26 => b'P' + x - 22,
                x @ 27..=31 => b'V' + x - 27,
                _ => b'0',
            };
        }
    }

    pub fn as_str(&self) -> &str {
        core::str::from_utf8(self.as_bytes()).unwrap_or("")
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer[..self.length]
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn randomized_hostname_is_printable_ascii_and_in_length_range() {
        let mut prng = NetPrng::new_from(&[1, 2, 3, 4, 5, 6, 7, 8]);
        let mut h = Hostname::new_blank();
        h.randomize(&mut prng);
        assert!((5..=8).contains(&h.len()));
        for &b in h.as_bytes() {
            assert!(b.is_ascii_alphanumeric());
        }
        assert!(!h.as_bytes()[0].is_ascii_digit());
    }
}
