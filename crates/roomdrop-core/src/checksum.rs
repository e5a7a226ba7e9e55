//! Additive 16-bit checksum: the sum of all byte values modulo 65536.
//!
//! Detects accidental corruption of whole-file payloads. It is not a
//! cryptographic digest and makes no collision guarantees.

/// Sum of byte values, wrapping at 2^16.
pub fn additive16(bytes: &[u8]) -> u16 {
    bytes
        .iter()
        .fold(0u16, |acc, &b| acc.wrapping_add(u16::from(b)))
}
