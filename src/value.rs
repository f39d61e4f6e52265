//! Typed argument values carried by atoms.

use std::fmt;

/// A single atom argument.
///
/// The variant must agree with the parameter's [`ArgType`](crate::dictionary::ArgType);
/// the encoder and the parser both check this against the dictionary signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypedValue {
    /// Two's-complement integer of a declared width.
    Signed(i64),
    /// Unsigned integer of a declared width.
    Unsigned(u64),
    /// One-byte enumerated constant.
    Enum8(u8),
    /// Opaque byte string (fixed or length-prefixed).
    Bytes(Vec<u8>),
    /// UTF-8 text (length-prefixed).
    Text(String),
}

impl TypedValue {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            TypedValue::Unsigned(x) => Some(*x),
            TypedValue::Enum8(x) => Some(*x as u64),
            TypedValue::Signed(x) if *x >= 0 => Some(*x as u64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            TypedValue::Signed(x) => Some(*x),
            TypedValue::Unsigned(x) => i64::try_from(*x).ok(),
            TypedValue::Enum8(x) => Some(*x as i64),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            TypedValue::Bytes(b) => Some(b),
            TypedValue::Text(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            TypedValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Short type label used in diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            TypedValue::Signed(_) => "signed integer",
            TypedValue::Unsigned(_) => "unsigned integer",
            TypedValue::Enum8(_) => "enum constant",
            TypedValue::Bytes(_) => "byte string",
            TypedValue::Text(_) => "text",
        }
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypedValue::Signed(x) => write!(f, "{}", x),
            TypedValue::Unsigned(x) => write!(f, "{}", x),
            TypedValue::Enum8(x) => write!(f, "{}", x),
            TypedValue::Bytes(b) => write!(f, "{}x", crate::hex::encode_lower(b)),
            TypedValue::Text(s) => write!(f, "{:?}", s),
        }
    }
}
