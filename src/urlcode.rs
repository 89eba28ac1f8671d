//! Percent-encoding used for callback paths and form payloads.
//!
//! Only `[0-9a-zA-Z/.]` pass through unchanged; every other byte becomes
//! `%XX` with uppercase hex digits.

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

fn is_unreserved(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'/' || b == b'.'
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

pub fn encode_bytes(raw: &[u8]) -> String {
    let mut out = String::with_capacity(raw.len());
    for &b in raw {
        if is_unreserved(b) {
            out.push(b as char);
        } else {
            out.push('%');
            out.push(HEX_DIGITS[(b >> 4) as usize] as char);
            out.push(HEX_DIGITS[(b & 0x0F) as usize] as char);
        }
    }
    out
}

pub fn encode(raw: &str) -> String {
    encode_bytes(raw.as_bytes())
}

/// Reverses [`encode_bytes`]. A `%` that is not followed by two hex digits
/// is kept literally instead of reading past the input.
pub fn decode_bytes(encoded: &str) -> Vec<u8> {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && let (Some(hi), Some(lo)) = (
                bytes.get(i + 1).copied().and_then(hex_value),
                bytes.get(i + 2).copied().and_then(hex_value),
            )
        {
            out.push((hi << 4) | lo);
            i += 3;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}

pub fn decode(encoded: &str) -> String {
    String::from_utf8_lossy(&decode_bytes(encoded)).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_path_safe_characters() {
        assert_eq!(encode("abc/XYZ.019"), "abc/XYZ.019");
    }

    #[test]
    fn encodes_everything_else_as_uppercase_hex() {
        assert_eq!(encode("a b&c"), "a%20b%26c");
        assert_eq!(encode("-_~"), "%2D%5F%7E");
        assert_eq!(encode("ł"), "%C5%82");
        assert_eq!(encode_bytes(&[0xff, 0x00]), "%FF%00");
    }

    #[test]
    fn every_byte_round_trips_inside_a_path() {
        for b in 0u8..=255 {
            let raw = [b'/', b'a', b, b'.', b'z'];
            let encoded = encode_bytes(&raw);
            assert!(
                encoded.bytes().all(|c| is_unreserved(c) || c == b'%'),
                "byte {b} leaked into {encoded}"
            );
            assert_eq!(decode_bytes(&encoded), raw, "byte {b}");
        }
    }

    #[test]
    fn decodes_lowercase_hex() {
        assert_eq!(decode("%2f%3A"), "/:");
    }

    #[test]
    fn truncated_escape_is_kept_literally() {
        assert_eq!(decode("abc%"), "abc%");
        assert_eq!(decode("abc%4"), "abc%4");
        assert_eq!(decode("%zz1"), "%zz1");
    }
}
