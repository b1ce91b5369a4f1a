//! Modified UTF-8 as used by `CONSTANT_Utf8` entries.
//!
//! Differences from standard UTF-8: NUL is encoded as `C0 80` and supplementary characters
//! are encoded as a surrogate pair of two three-byte sequences.

/// Decode modified UTF-8, replacing malformed sequences with U+FFFD.
pub fn decode(bytes: &[u8]) -> String {
    String::from_utf16_lossy(&decode_utf16(bytes))
}

/// Decode modified UTF-8 into the UTF-16 code units a JVM string would hold.
pub fn decode_utf16(bytes: &[u8]) -> Vec<u16> {
    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b & 0x80 == 0 {
            units.push(b as u16);
            i += 1;
        } else if b & 0xE0 == 0xC0 && i + 1 < bytes.len() && bytes[i + 1] & 0xC0 == 0x80 {
            units.push((((b & 0x1F) as u16) << 6) | (bytes[i + 1] & 0x3F) as u16);
            i += 2;
        } else if b & 0xF0 == 0xE0
            && i + 2 < bytes.len()
            && bytes[i + 1] & 0xC0 == 0x80
            && bytes[i + 2] & 0xC0 == 0x80
        {
            units.push(
                (((b & 0x0F) as u16) << 12)
                    | (((bytes[i + 1] & 0x3F) as u16) << 6)
                    | (bytes[i + 2] & 0x3F) as u16,
            );
            i += 3;
        } else {
            units.push(0xFFFD);
            i += 1;
        }
    }
    units
}

/// Encode a string as modified UTF-8.
pub fn encode(value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len());
    for unit in value.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | ((unit >> 6) & 0x1F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | ((unit >> 12) & 0x0F) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nul_uses_two_byte_form() {
        assert_eq!(encode("a\0b"), vec![b'a', 0xC0, 0x80, b'b']);
        assert_eq!(decode(&[b'a', 0xC0, 0x80, b'b']), "a\0b");
    }

    #[test]
    fn supplementary_characters_become_surrogate_pairs() {
        let encoded = encode("\u{1F600}");
        assert_eq!(encoded.len(), 6);
        assert_eq!(decode(&encoded), "\u{1F600}");
    }

    #[test]
    fn cyrillic_text_survives() {
        let text = "Выбрать файл";
        assert_eq!(decode(&encode(text)), text);
        assert_eq!(encode(text), text.as_bytes());
    }
}
