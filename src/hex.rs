//! Hex text helpers for the decode-facing entry points.
//!
//! Captures usually arrive as pasted hex: whitespace and `:`/`-`/`,`
//! separators are tolerated, anything else is rejected. Length is checked
//! before any digit is decoded.

use ::hex::FromHexError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HexError {
    #[error("empty hex string")]
    EmptyHex,
    #[error("hex string has odd length {len}")]
    InvalidHexLength { len: usize },
    #[error("invalid hex character {ch:?} at position {position}")]
    InvalidHexCharacter { ch: char, position: usize },
}

fn is_separator(c: char) -> bool {
    c.is_ascii_whitespace() || matches!(c, ':' | '-' | ',')
}

/// Decode hex text into bytes. `position` in errors indexes `text`.
pub fn decode(text: &str) -> Result<Vec<u8>, HexError> {
    let kept: Vec<(usize, char)> = text.char_indices().filter(|(_, c)| !is_separator(*c)).collect();
    if kept.is_empty() {
        return Err(HexError::EmptyHex);
    }
    if kept.len() % 2 != 0 {
        return Err(HexError::InvalidHexLength { len: kept.len() });
    }
    // The hex crate works on bytes; a multi-byte character would shift its indices.
    if let Some(&(position, ch)) = kept.iter().find(|(_, c)| !c.is_ascii()) {
        return Err(HexError::InvalidHexCharacter { ch, position });
    }
    let digits: String = kept.iter().map(|(_, c)| *c).collect();
    ::hex::decode(&digits).map_err(|e| match e {
        FromHexError::InvalidHexCharacter { c, index } => {
            HexError::InvalidHexCharacter { ch: c, position: kept.get(index).map(|k| k.0).unwrap_or(index) }
        }
        FromHexError::OddLength | FromHexError::InvalidStringLength => {
            HexError::InvalidHexLength { len: kept.len() }
        }
    })
}

pub fn encode_upper(bytes: &[u8]) -> String {
    ::hex::encode_upper(bytes)
}

pub fn encode_lower(bytes: &[u8]) -> String {
    ::hex::encode(bytes)
}

/// Space-separated lowercase hex, for dumps.
pub fn spaced(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_tolerates_separators() {
        assert_eq!(decode("5a 01:02-0d,FF").unwrap(), vec![0x5a, 0x01, 0x02, 0x0d, 0xff]);
    }

    #[test]
    fn odd_length_rejected() {
        assert_eq!(decode("001").unwrap_err(), HexError::InvalidHexLength { len: 3 });
    }

    #[test]
    fn length_checked_before_digits() {
        assert_eq!(decode("0g0").unwrap_err(), HexError::InvalidHexLength { len: 3 });
        assert_eq!(decode("0 g 0").unwrap_err(), HexError::InvalidHexLength { len: 3 });
    }

    #[test]
    fn invalid_character_rejected() {
        assert!(matches!(decode("00g0"), Err(HexError::InvalidHexCharacter { ch: 'g', position: 2 })));
        assert!(matches!(decode("00 :0g"), Err(HexError::InvalidHexCharacter { ch: 'g', position: 5 })));
        assert!(matches!(decode("0é"), Err(HexError::InvalidHexCharacter { ch: 'é', position: 1 })));
    }

    #[test]
    fn empty_rejected() {
        assert_eq!(decode("  \n").unwrap_err(), HexError::EmptyHex);
    }

    #[test]
    fn encode_cases() {
        assert_eq!(encode_upper(&[0xab, 0x01]), "AB01");
        assert_eq!(encode_lower(&[0xab, 0x01]), "ab01");
        assert_eq!(spaced(&[0xab, 0x01]), "ab 01");
    }
}
