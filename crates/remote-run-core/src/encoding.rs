//! Primitive encodings of the patch wire format.
//!
//! All integers are big-endian. Strings are written as a 2-byte length
//! followed by the raw UTF-8 bytes.

use crate::error::{RemoteRunError, Result};

/// Largest byte length representable by the 2-byte string prefix.
pub const MAX_UTF_LEN: usize = u16::MAX as usize;

/// Width of an encoded long.
pub const LONG_LEN: usize = 8;

/// Encode `s` as a 2-byte big-endian length followed by its UTF-8 bytes.
pub fn encode_utf(s: &str) -> Result<Vec<u8>> {
    let bytes = s.as_bytes();
    if bytes.len() > MAX_UTF_LEN {
        return Err(RemoteRunError::Encoding { len: bytes.len() });
    }
    let mut out = Vec::with_capacity(2 + bytes.len());
    out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    out.extend_from_slice(bytes);
    Ok(out)
}

/// Encode a single byte, keeping only the low 8 bits of `code`.
pub fn encode_byte(code: u32) -> [u8; 1] {
    [(code & 0xFF) as u8]
}

/// Encode `n` as 8 big-endian bytes, most significant first.
pub fn encode_long(n: u64) -> [u8; LONG_LEN] {
    let mut out = [0u8; LONG_LEN];
    let mut rest = n;
    for slot in out.iter_mut().rev() {
        *slot = (rest % 256) as u8;
        rest /= 256;
    }
    out
}

/// Decode a big-endian long. Returns `None` for empty input.
///
/// Inputs shorter than eight bytes are read as the low-order bytes of the
/// value; bytes beyond the eighth are ignored.
pub fn decode_long(bytes: &[u8]) -> Option<u64> {
    if bytes.is_empty() {
        return None;
    }
    let take = bytes.len().min(LONG_LEN);
    Some(
        bytes[..take]
            .iter()
            .fold(0u64, |acc, b| (acc << 8) | u64::from(*b)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_utf_prefixes_byte_length() {
        let encoded = encode_utf("a.txt").unwrap();
        assert_eq!(&encoded[..2], &[0, 5]);
        assert_eq!(&encoded[2..], b"a.txt");
    }

    #[test]
    fn encode_utf_counts_bytes_not_chars() {
        let s = "dé";
        let encoded = encode_utf(s).unwrap();
        assert_eq!(&encoded[..2], &[0, 3]);
        assert_eq!(&encoded[2..], s.as_bytes());
    }

    #[test]
    fn encode_utf_empty() {
        assert_eq!(encode_utf("").unwrap(), vec![0, 0]);
    }

    #[test]
    fn encode_utf_at_limit() {
        let s = "x".repeat(MAX_UTF_LEN);
        let encoded = encode_utf(&s).unwrap();
        assert_eq!(&encoded[..2], &[0xFF, 0xFF]);
        assert_eq!(encoded.len(), MAX_UTF_LEN + 2);
    }

    #[test]
    fn encode_utf_over_limit_fails() {
        let s = "x".repeat(MAX_UTF_LEN + 1);
        match encode_utf(&s) {
            Err(RemoteRunError::Encoding { len }) => assert_eq!(len, MAX_UTF_LEN + 1),
            other => panic!("expected Encoding error, got {other:?}"),
        }
    }

    #[test]
    fn encode_byte_truncates() {
        assert_eq!(encode_byte(26), [26]);
        assert_eq!(encode_byte(0x1_0A), [0x0A]);
        assert_eq!(encode_byte(255), [255]);
    }

    #[test]
    fn encode_long_is_big_endian() {
        assert_eq!(encode_long(2), [0, 0, 0, 0, 0, 0, 0, 2]);
        assert_eq!(encode_long(0x0102), [0, 0, 0, 0, 0, 0, 1, 2]);
        assert_eq!(encode_long(u64::MAX), [0xFF; 8]);
        assert_eq!(encode_long(1234567890123), 1234567890123u64.to_be_bytes());
    }

    #[test]
    fn decode_long_inverts_encode_long() {
        for n in [0u64, 1, 255, 256, 65_535, 1 << 32, (1 << 53) - 1, u64::MAX] {
            assert_eq!(decode_long(&encode_long(n)), Some(n), "n = {n}");
        }
    }

    #[test]
    fn decode_long_empty_is_none() {
        assert_eq!(decode_long(&[]), None);
    }

    #[test]
    fn decode_long_short_input() {
        assert_eq!(decode_long(&[1, 0]), Some(256));
    }
}
