//! Operation-level errors and their serializable diagnostics.
//!
//! Each layer keeps its own `thiserror` enum. `compile` and `decompile`
//! compose them, and every failure can be flattened into a [`Diagnostic`]
//! for callers that render errors rather than match on them.

use crate::codec::{DecodeError, EncodeError};
use crate::hex::HexError;
use crate::parser::{ParseError, ParseErrorKind};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Syntax,
    UnknownAtom,
    ArityMismatch,
    TypeMismatch,
    MalformedLiteral,
    Range,
    MissingStartMarker,
    MissingEndMarker,
    UnknownOpcode,
    NameMismatch,
    RecordTooLarge,
    TruncatedStream,
    InvalidUtf8,
    TrailingBytes,
    ReservedStyle,
    OrphanRepeat,
    UnsupportedFormatVersion,
    EmptyHex,
    InvalidHexLength,
    InvalidHexCharacter,
}

impl From<ParseErrorKind> for ErrorKind {
    fn from(kind: ParseErrorKind) -> Self {
        match kind {
            ParseErrorKind::Syntax => ErrorKind::Syntax,
            ParseErrorKind::UnknownAtom => ErrorKind::UnknownAtom,
            ParseErrorKind::ArityMismatch => ErrorKind::ArityMismatch,
            ParseErrorKind::TypeMismatch => ErrorKind::TypeMismatch,
            ParseErrorKind::MalformedLiteral => ErrorKind::MalformedLiteral,
            ParseErrorKind::Range => ErrorKind::Range,
        }
    }
}

/// Flattened error for display and JSON output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub message: String,
    pub kind: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl Diagnostic {
    fn new(kind: ErrorKind, message: String) -> Self {
        Diagnostic { message, kind, line: None, column: None, offset: None, context: Vec::new(), hint: None }
    }

    fn hint(mut self, hint: &str) -> Self {
        self.hint = Some(hint.to_string());
        self
    }
}

impl From<&ParseError> for Diagnostic {
    fn from(e: &ParseError) -> Self {
        Diagnostic {
            message: e.message.clone(),
            kind: e.kind.into(),
            line: Some(e.line),
            column: Some(e.column),
            offset: Some(e.offset),
            context: e.context.clone(),
            hint: e.hint.clone(),
        }
    }
}

impl From<&EncodeError> for Diagnostic {
    fn from(e: &EncodeError) -> Self {
        let kind = match e {
            EncodeError::MissingStartMarker => ErrorKind::MissingStartMarker,
            EncodeError::MissingEndMarker { .. } => ErrorKind::MissingEndMarker,
            EncodeError::UnknownOpcode { .. } => ErrorKind::UnknownOpcode,
            EncodeError::NameMismatch { .. } => ErrorKind::NameMismatch,
            EncodeError::ArityMismatch { .. } => ErrorKind::ArityMismatch,
            EncodeError::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            EncodeError::Range { .. } => ErrorKind::Range,
            EncodeError::RecordTooLarge { .. } => ErrorKind::RecordTooLarge,
        };
        let d = Diagnostic::new(kind, e.to_string());
        match e {
            EncodeError::MissingStartMarker => d.hint("begin the stream with start-stream <00x>"),
            EncodeError::MissingEndMarker { .. } => d.hint("end the stream with end-stream <00x>"),
            _ => d,
        }
    }
}

impl From<&DecodeError> for Diagnostic {
    fn from(e: &DecodeError) -> Self {
        let kind = match e {
            DecodeError::TruncatedStream { .. } => ErrorKind::TruncatedStream,
            DecodeError::UnknownOpcode { .. } => ErrorKind::UnknownOpcode,
            DecodeError::ArityMismatch { .. } => ErrorKind::ArityMismatch,
            DecodeError::InvalidUtf8 { .. } => ErrorKind::InvalidUtf8,
            DecodeError::TrailingBytes { .. } => ErrorKind::TrailingBytes,
            DecodeError::ReservedStyle { .. } => ErrorKind::ReservedStyle,
            DecodeError::OrphanRepeat { .. } => ErrorKind::OrphanRepeat,
            DecodeError::UnsupportedFormatVersion { .. } => ErrorKind::UnsupportedFormatVersion,
        };
        let mut d = Diagnostic::new(kind, e.to_string());
        d.offset = e.offset();
        match e {
            DecodeError::UnsupportedFormatVersion { .. } => {
                d.hint("raw streams start with 00 01, compact streams with 40 01")
            }
            DecodeError::TruncatedStream { .. } => {
                d.hint("the buffer ends inside a record; the capture may be cut short")
            }
            _ => d,
        }
    }
}

impl From<&HexError> for Diagnostic {
    fn from(e: &HexError) -> Self {
        match e {
            HexError::EmptyHex => Diagnostic::new(ErrorKind::EmptyHex, e.to_string()),
            HexError::InvalidHexLength { .. } => {
                Diagnostic::new(ErrorKind::InvalidHexLength, e.to_string()).hint("each byte needs two hex digits")
            }
            HexError::InvalidHexCharacter { position, .. } => {
                let mut d = Diagnostic::new(ErrorKind::InvalidHexCharacter, e.to_string());
                d.offset = Some(*position);
                d
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// `line`/`context` point at the statement of the failing atom when known.
    #[error("{error}")]
    Encode { error: EncodeError, line: Option<usize>, context: Vec<String> },
}

impl From<EncodeError> for CompileError {
    fn from(error: EncodeError) -> Self {
        CompileError::Encode { error, line: None, context: Vec::new() }
    }
}

impl CompileError {
    pub fn diagnostic(&self) -> Diagnostic {
        match self {
            CompileError::Parse(e) => e.into(),
            CompileError::Encode { error, line, context } => {
                let mut d = Diagnostic::from(error);
                d.line = *line;
                d.context = context.clone();
                d
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecompileError {
    #[error(transparent)]
    Hex(#[from] HexError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl DecompileError {
    pub fn diagnostic(&self) -> Diagnostic {
        match self {
            DecompileError::Hex(e) => e.into(),
            DecompileError::Decode(e) => e.into(),
        }
    }
}
