//! DATA packet tokens and stream ids.
//!
//! A DATA payload starts with a two-character ASCII token followed by a
//! little-endian stream id. The id width depends on the token; the FDO
//! payload is whatever follows.

use byteorder::{ByteOrder, LittleEndian};
use std::fmt;
use thiserror::Error;

pub const TOKEN_LEN: usize = 2;

/// Tokens whose DATA payloads carry FDO streams unless configured otherwise.
pub const DEFAULT_FDO_TOKENS: [&str; 3] = ["AT", "at", "At"];

/// Known tokens and the width in bytes of their stream id.
pub const STREAM_ID_WIDTHS: &[(&str, usize)] = &[
    ("AT", 2),
    ("at", 4),
    ("At", 3),
    ("f1", 2),
    ("ff", 2),
    ("DD", 2),
    ("Dd", 2),
    ("D3", 2),
    ("NX", 2),
    ("OT", 2),
    ("XS", 2),
    ("Aa", 2),
    ("aS", 2),
    ("iO", 2),
    ("ME", 2),
    ("fh", 2),
    ("iS", 2),
    ("CA", 2),
];

/// Two-byte packet token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(pub [u8; TOKEN_LEN]);

impl Token {
    pub fn parse(text: &str) -> Result<Self, TokenError> {
        match text.as_bytes() {
            [a, b] if a.is_ascii_graphic() && b.is_ascii_graphic() => Ok(Token([*a, *b])),
            _ => Err(TokenError::InvalidToken(text.to_string())),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }

    /// Stream id width, or `None` for tokens outside the table.
    pub fn stream_id_width(&self) -> Option<usize> {
        let text = self.as_str()?;
        STREAM_ID_WIDTHS.iter().find(|(t, _)| *t == text).map(|(_, w)| *w)
    }

    pub fn is_known(&self) -> bool {
        self.stream_id_width().is_some()
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            if b.is_ascii_graphic() {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{:02x}", b)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("token must be two printable ASCII characters, got {0:?}")]
    InvalidToken(String),
    #[error("data too short for a token ({len} byte(s))")]
    TooShort { len: usize },
    #[error("unknown token '{0}'")]
    UnknownToken(Token),
    #[error("token '{token}' needs a {width}-byte stream id, {available} byte(s) available")]
    MissingStreamId { token: Token, width: usize, available: usize },
    #[error("stream id {stream_id} does not fit the {width}-byte id of token '{token}'")]
    StreamIdOutOfRange { token: Token, stream_id: u64, width: usize },
}

/// Token, stream id and the offset where the FDO payload begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataHeader {
    pub token: Token,
    pub stream_id: u64,
    pub header_len: usize,
}

/// Split the token/stream-id prefix off DATA packet data.
pub fn parse_data_header(data: &[u8]) -> Result<DataHeader, TokenError> {
    if data.len() < TOKEN_LEN {
        return Err(TokenError::TooShort { len: data.len() });
    }
    let token = Token([data[0], data[1]]);
    let width = token.stream_id_width().ok_or(TokenError::UnknownToken(token))?;
    let available = data.len() - TOKEN_LEN;
    if available < width {
        return Err(TokenError::MissingStreamId { token, width, available });
    }
    let stream_id = LittleEndian::read_uint(&data[TOKEN_LEN..TOKEN_LEN + width], width);
    Ok(DataHeader { token, stream_id, header_len: TOKEN_LEN + width })
}

/// Prefix `fdo` with `token` and its little-endian stream id.
pub fn build_payload(token: &str, stream_id: u64, fdo: &[u8]) -> Result<Vec<u8>, TokenError> {
    let token = Token::parse(token)?;
    let width = token.stream_id_width().ok_or(TokenError::UnknownToken(token))?;
    if width < 8 && stream_id >> (width * 8) != 0 {
        return Err(TokenError::StreamIdOutOfRange { token, stream_id, width });
    }
    let mut out = Vec::with_capacity(TOKEN_LEN + width + fdo.len());
    out.extend_from_slice(&token.0);
    let mut id = [0u8; 8];
    LittleEndian::write_uint(&mut id[..width], stream_id, width);
    out.extend_from_slice(&id[..width]);
    out.extend_from_slice(fdo);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widths_follow_token() {
        assert_eq!(Token(*b"at").stream_id_width(), Some(4));
        assert_eq!(Token(*b"At").stream_id_width(), Some(3));
        assert_eq!(Token(*b"AT").stream_id_width(), Some(2));
        assert_eq!(Token(*b"CA").stream_id_width(), Some(2));
        assert_eq!(Token(*b"zz").stream_id_width(), None);
    }

    #[test]
    fn header_reads_little_endian_id() {
        let h = parse_data_header(&[b'A', b't', 0x01, 0x02, 0x03, 0xaa]).unwrap();
        assert_eq!(h.stream_id, 0x030201);
        assert_eq!(h.header_len, 5);
    }

    #[test]
    fn missing_stream_id() {
        let err = parse_data_header(b"at\x01").unwrap_err();
        assert_eq!(err, TokenError::MissingStreamId { token: Token(*b"at"), width: 4, available: 1 });
    }

    #[test]
    fn build_checks_range() {
        assert_eq!(build_payload("AT", 0x1234, &[0xff]).unwrap(), vec![b'A', b'T', 0x34, 0x12, 0xff]);
        assert!(matches!(build_payload("AT", 0x10000, &[]), Err(TokenError::StreamIdOutOfRange { .. })));
        assert!(matches!(build_payload("A", 1, &[]), Err(TokenError::InvalidToken(_))));
        assert!(matches!(build_payload("qq", 1, &[]), Err(TokenError::UnknownToken(_))));
    }

    #[test]
    fn display_escapes_binary() {
        assert_eq!(Token([b'A', 0x01]).to_string(), "A\\x01");
    }
}
