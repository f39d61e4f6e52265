//! Atom stream model shared by the parser, codec and printer.

use crate::dictionary::{AtomDictionary, Signature};
use crate::value::TypedValue;
use serde::Serialize;
use std::fmt;

/// Binary layout of an encoded stream, flagged by the two header bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatVersion {
    /// Uncompacted records.
    #[default]
    Raw,
    /// Records rewritten by the compaction transform.
    Compact,
}

pub const RAW_MARKER: [u8; 2] = [0x00, 0x01];
pub const COMPACT_MARKER: [u8; 2] = [0x40, crate::compact::TRANSFORM_REVISION];

impl FormatVersion {
    pub fn marker(self) -> [u8; 2] {
        match self {
            FormatVersion::Raw => RAW_MARKER,
            FormatVersion::Compact => COMPACT_MARKER,
        }
    }

    pub fn from_marker(marker: [u8; 2]) -> Option<Self> {
        match marker {
            RAW_MARKER => Some(FormatVersion::Raw),
            COMPACT_MARKER => Some(FormatVersion::Compact),
            _ => None,
        }
    }

    /// Sniff the format from the leading bytes of a buffer.
    pub fn detect(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [a, b, ..] => Self::from_marker([*a, *b]),
            _ => None,
        }
    }
}

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatVersion::Raw => f.write_str("raw"),
            FormatVersion::Compact => f.write_str("compact"),
        }
    }
}

/// One named operation with its typed arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Atom {
    pub opcode: u16,
    pub name: &'static str,
    pub args: Vec<TypedValue>,
}

impl Atom {
    pub fn new(sig: &Signature, args: Vec<TypedValue>) -> Self {
        Self { opcode: sig.opcode, name: sig.name, args }
    }

    /// Build an atom by name; `None` when the dictionary has no such atom.
    pub fn named(dict: &AtomDictionary, name: &str, args: Vec<TypedValue>) -> Option<Self> {
        dict.lookup(name).map(|sig| Self::new(sig, args))
    }
}

/// Ordered atoms plus the format they were read from or will be written as.
///
/// Streams are not mutated in place; [`AtomStream::with_format`] and
/// [`AtomStream::with_atoms`] return new values.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AtomStream {
    format: FormatVersion,
    atoms: Vec<Atom>,
}

impl AtomStream {
    pub fn new(format: FormatVersion, atoms: Vec<Atom>) -> Self {
        Self { format, atoms }
    }

    pub fn format(&self) -> FormatVersion {
        self.format
    }

    pub fn atoms(&self) -> &[Atom] {
        &self.atoms
    }

    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    pub fn with_format(&self, format: FormatVersion) -> Self {
        Self { format, atoms: self.atoms.clone() }
    }

    pub fn with_atoms(&self, atoms: Vec<Atom>) -> Self {
        Self { format: self.format, atoms }
    }

    pub fn into_atoms(self) -> Vec<Atom> {
        self.atoms
    }
}
