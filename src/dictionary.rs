//! Atom dictionary: atom names, opcodes and argument signatures.
//!
//! Opcodes are `(protocol << 8) | atom_number`. The high byte names the
//! protocol family, so routing and the compact encoding can work from it
//! without resolving the full signature.
//!
//! # Protocol families
//!
//! - `0x00` uni: stream control
//! - `0x01` man: object manager
//! - `0x02` act: actions
//! - `0x03` de: data extraction
//! - `0x05` idb: database
//! - `0x07` dod: download on demand
//! - `0x0C` chat
//! - `0x0E` sm: session manager
//! - `0x10` mat: object attributes
//!
//! The standard dictionary is built once from a static table and shared
//! read-only; see [`AtomDictionary::standard`].

use crate::value::TypedValue;
use std::collections::HashMap;
use std::sync::OnceLock;
use thiserror::Error;

pub const START_STREAM: u16 = 0x0001;
pub const END_STREAM: u16 = 0x0002;

/// Maximum length of a length-prefixed byte string or text.
pub const MAX_VARIABLE_LEN: usize = 0x7FFF;

/// Encoding width of an integer argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    One,
    Two,
    Four,
}

impl Width {
    pub fn bytes(self) -> usize {
        match self {
            Width::One => 1,
            Width::Two => 2,
            Width::Four => 4,
        }
    }

    pub fn unsigned_max(self) -> u64 {
        match self {
            Width::One => u8::MAX as u64,
            Width::Two => u16::MAX as u64,
            Width::Four => u32::MAX as u64,
        }
    }

    pub fn signed_range(self) -> (i64, i64) {
        match self {
            Width::One => (i8::MIN as i64, i8::MAX as i64),
            Width::Two => (i16::MIN as i64, i16::MAX as i64),
            Width::Four => (i32::MIN as i64, i32::MAX as i64),
        }
    }
}

/// Declared type of one atom argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    Unsigned(Width),
    Signed(Width),
    /// One byte; the table maps constant names to values.
    Enum8(&'static [(&'static str, u8)]),
    /// `Some(n)`: exactly n bytes, no prefix. `None`: length-prefixed.
    Bytes(Option<usize>),
    /// Length-prefixed UTF-8.
    Text,
}

impl ArgType {
    pub fn label(&self) -> String {
        match self {
            ArgType::Unsigned(w) => format!("u{}", w.bytes() * 8),
            ArgType::Signed(w) => format!("i{}", w.bytes() * 8),
            ArgType::Enum8(_) => "enum".to_string(),
            ArgType::Bytes(Some(n)) => format!("bytes[{}]", n),
            ArgType::Bytes(None) => "bytes".to_string(),
            ArgType::Text => "text".to_string(),
        }
    }

    pub(crate) fn expected_kind(&self) -> &'static str {
        match self {
            ArgType::Unsigned(_) => "unsigned integer",
            ArgType::Signed(_) => "signed integer",
            ArgType::Enum8(_) => "enum constant",
            ArgType::Bytes(_) => "byte string",
            ArgType::Text => "text",
        }
    }

    /// Check that `value` has this type and fits its declared width.
    pub fn check(&self, value: &TypedValue) -> Result<(), ValueError> {
        match (self, value) {
            (ArgType::Unsigned(w), TypedValue::Unsigned(x)) => {
                if *x > w.unsigned_max() {
                    return Err(ValueError::OutOfRange {
                        value: *x as i128,
                        min: 0,
                        max: w.unsigned_max() as i128,
                    });
                }
                Ok(())
            }
            (ArgType::Signed(w), TypedValue::Signed(x)) => {
                let (min, max) = w.signed_range();
                if *x < min || *x > max {
                    return Err(ValueError::OutOfRange {
                        value: *x as i128,
                        min: min as i128,
                        max: max as i128,
                    });
                }
                Ok(())
            }
            (ArgType::Enum8(_), TypedValue::Enum8(_)) => Ok(()),
            (ArgType::Bytes(Some(n)), TypedValue::Bytes(b)) => {
                if b.len() != *n {
                    return Err(ValueError::FixedLength { len: b.len(), expected: *n });
                }
                Ok(())
            }
            (ArgType::Bytes(None), TypedValue::Bytes(b)) => check_variable_len(b.len()),
            (ArgType::Text, TypedValue::Text(s)) => check_variable_len(s.len()),
            (expected, found) => Err(ValueError::TypeMismatch {
                expected: expected.expected_kind(),
                found: found.kind_name(),
            }),
        }
    }
}

fn check_variable_len(len: usize) -> Result<(), ValueError> {
    if len > MAX_VARIABLE_LEN {
        return Err(ValueError::TooLong { len, max: MAX_VARIABLE_LEN });
    }
    Ok(())
}

/// A value that does not satisfy its parameter type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    #[error("expected {expected}, found {found}")]
    TypeMismatch { expected: &'static str, found: &'static str },
    #[error("value {value} outside {min}..={max}")]
    OutOfRange { value: i128, min: i128, max: i128 },
    #[error("byte string has {len} bytes, exactly {expected} required")]
    FixedLength { len: usize, expected: usize },
    #[error("length {len} exceeds maximum of {max} bytes")]
    TooLong { len: usize, max: usize },
}

impl ValueError {
    pub fn is_range(&self) -> bool {
        !matches!(self, ValueError::TypeMismatch { .. })
    }
}

/// How an atom affects stream/object nesting (used for indentation).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nesting {
    Flat,
    Open,
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Param {
    pub name: &'static str,
    pub ty: ArgType,
}

/// Registered signature of one atom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    pub opcode: u16,
    pub name: &'static str,
    pub params: &'static [Param],
    pub nesting: Nesting,
}

impl Signature {
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn protocol(&self) -> u8 {
        (self.opcode >> 8) as u8
    }

    pub fn atom_number(&self) -> u8 {
        (self.opcode & 0xFF) as u8
    }

    /// `start-object <class: enum, title: text>`
    pub fn usage(&self) -> String {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| format!("{}: {}", p.name, p.ty.label()))
            .collect();
        format!("{} <{}>", self.name, params.join(", "))
    }

    /// Validate a full argument list against this signature.
    pub fn check_args(&self, args: &[TypedValue]) -> Result<(), ArgsError> {
        if args.len() != self.arity() {
            return Err(ArgsError::Arity { expected: self.arity(), found: args.len() });
        }
        for (i, (param, value)) in self.params.iter().zip(args).enumerate() {
            param.ty.check(value).map_err(|source| ArgsError::Value { arg: i, source })?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArgsError {
    #[error("expected {expected} argument(s), found {found}")]
    Arity { expected: usize, found: usize },
    #[error("argument {}: {source}", .arg + 1)]
    Value { arg: usize, source: ValueError },
}

/// Name of an Enum8 constant, if the table knows the value.
pub fn enum_name(constants: &[(&'static str, u8)], value: u8) -> Option<&'static str> {
    constants.iter().find(|(_, v)| *v == value).map(|(n, _)| *n)
}

pub fn enum_value(constants: &[(&'static str, u8)], name: &str) -> Option<u8> {
    constants.iter().find(|(n, _)| *n == name).map(|(_, v)| *v)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DictionaryError {
    #[error("duplicate atom name '{0}'")]
    DuplicateName(&'static str),
    #[error("duplicate opcode 0x{0:04x}")]
    DuplicateOpcode(u16),
}

/// Immutable name/opcode index over a static signature table.
#[derive(Debug)]
pub struct AtomDictionary {
    entries: &'static [Signature],
    by_name: HashMap<&'static str, usize>,
    by_opcode: HashMap<u16, usize>,
}

impl AtomDictionary {
    /// Build a dictionary, rejecting duplicate names or opcodes.
    pub fn from_table(entries: &'static [Signature]) -> Result<Self, DictionaryError> {
        let mut by_name = HashMap::with_capacity(entries.len());
        let mut by_opcode = HashMap::with_capacity(entries.len());
        for (i, sig) in entries.iter().enumerate() {
            if by_name.insert(sig.name, i).is_some() {
                return Err(DictionaryError::DuplicateName(sig.name));
            }
            if by_opcode.insert(sig.opcode, i).is_some() {
                return Err(DictionaryError::DuplicateOpcode(sig.opcode));
            }
        }
        Ok(Self { entries, by_name, by_opcode })
    }

    /// The built-in dictionary, constructed on first use.
    pub fn standard() -> &'static AtomDictionary {
        static STANDARD: OnceLock<AtomDictionary> = OnceLock::new();
        STANDARD.get_or_init(|| {
            let by_name = STANDARD_ATOMS.iter().enumerate().map(|(i, s)| (s.name, i)).collect();
            let by_opcode = STANDARD_ATOMS.iter().enumerate().map(|(i, s)| (s.opcode, i)).collect();
            AtomDictionary { entries: STANDARD_ATOMS, by_name, by_opcode }
        })
    }

    pub fn lookup(&self, name: &str) -> Option<&'static Signature> {
        let entries = self.entries;
        self.by_name.get(name).map(|&i| &entries[i])
    }

    pub fn lookup_by_opcode(&self, opcode: u16) -> Option<&'static Signature> {
        let entries = self.entries;
        self.by_opcode.get(&opcode).map(|&i| &entries[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &'static Signature> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Closest known name, for "did you mean" hints.
    pub fn suggest(&self, name: &str) -> Option<&'static str> {
        let limit = (name.len() / 2).clamp(1, 3);
        self.entries
            .iter()
            .map(|s| (edit_distance(name, s.name), s.name))
            .filter(|(d, _)| *d <= limit)
            .min_by_key(|(d, _)| *d)
            .map(|(_, n)| n)
    }
}

fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut cur = vec![i + 1; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            cur[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        prev = cur;
    }
    prev[b.len()]
}

// Enumerated constant sets.

pub const OBJECT_CLASSES: &[(&str, u8)] = &[
    ("org-group", 0x00),
    ("independent", 0x01),
    ("ind-group", 0x02),
    ("dms-list", 0x03),
    ("sms-list", 0x04),
    ("dss-list", 0x05),
    ("sss-list", 0x06),
    ("trigger", 0x07),
    ("ornament", 0x08),
    ("view", 0x09),
    ("editable-view", 0x0A),
    ("boolean", 0x0B),
    ("select-boolean", 0x0C),
    ("range", 0x0D),
    ("select-range", 0x0E),
    ("variable", 0x0F),
    ("ruler", 0x10),
    ("root", 0x11),
    ("rich-text", 0x12),
    ("multimedia", 0x13),
    ("chart", 0x14),
    ("pictalk", 0x15),
    ("www", 0x16),
    ("split", 0x17),
    ("organizer", 0x18),
    ("tree", 0x19),
    ("tab", 0x1A),
];

pub const ORIENTATIONS: &[(&str, u8)] = &[
    ("hcf", 0),
    ("hff", 1),
    ("hlf", 2),
    ("hrf", 3),
    ("vcf", 4),
    ("vff", 5),
    ("vlf", 6),
    ("vrf", 7),
    ("hct", 8),
    ("vct", 9),
    ("hcb", 10),
    ("vcb", 11),
];

pub const POSITIONS: &[(&str, u8)] = &[
    ("cascade", 0),
    ("top-left", 1),
    ("top-center", 2),
    ("top-right", 3),
    ("center-left", 4),
    ("center-center", 5),
    ("center-right", 6),
    ("bottom-left", 7),
    ("bottom-center", 8),
    ("bottom-right", 9),
];

pub const CRITERIA: &[(&str, u8)] = &[
    ("select", 1),
    ("gain-focus", 2),
    ("lose-focus", 3),
    ("close", 4),
    ("open", 5),
    ("cancel", 6),
    ("timer", 7),
];

pub const BOOLEAN: &[(&str, u8)] = &[("no", 0), ("yes", 1)];

const fn atom(opcode: u16, name: &'static str, params: &'static [Param]) -> Signature {
    Signature { opcode, name, params, nesting: Nesting::Flat }
}

const fn nested(opcode: u16, name: &'static str, params: &'static [Param], nesting: Nesting) -> Signature {
    Signature { opcode, name, params, nesting }
}

const MARKER: &[Param] = &[Param { name: "marker", ty: ArgType::Bytes(Some(1)) }];
const NONE: &[Param] = &[];
const TEXT: &[Param] = &[Param { name: "text", ty: ArgType::Text }];
const DATA: &[Param] = &[Param { name: "data", ty: ArgType::Bytes(None) }];
const GID: &[Param] = &[Param { name: "gid", ty: ArgType::Unsigned(Width::Four) }];
const CRITERION: &[Param] = &[Param { name: "criterion", ty: ArgType::Enum8(CRITERIA) }];

pub static STANDARD_ATOMS: &[Signature] = &[
    // uni (0x00)
    nested(START_STREAM, "start-stream", MARKER, Nesting::Open),
    nested(END_STREAM, "end-stream", MARKER, Nesting::Close),
    atom(0x0003, "abort-stream", NONE),
    atom(0x0004, "wait-on", NONE),
    atom(0x0005, "wait-off", NONE),
    atom(0x0006, "wait-clear", NONE),
    atom(0x0007, "comment", TEXT),
    atom(
        0x0008,
        "version",
        &[
            Param { name: "major", ty: ArgType::Unsigned(Width::One) },
            Param { name: "minor", ty: ArgType::Unsigned(Width::One) },
        ],
    ),
    // man (0x01)
    nested(
        0x0100,
        "start-object",
        &[
            Param { name: "class", ty: ArgType::Enum8(OBJECT_CLASSES) },
            Param { name: "title", ty: ArgType::Text },
        ],
        Nesting::Open,
    ),
    nested(0x0101, "end-object", NONE, Nesting::Close),
    atom(0x0102, "append-data", TEXT),
    atom(0x0103, "replace-data", TEXT),
    atom(0x0104, "update-display", NONE),
    atom(0x0105, "set-context-relative", &[Param { name: "id", ty: ArgType::Unsigned(Width::Four) }]),
    atom(0x0106, "set-context-global", GID),
    atom(0x0107, "end-context", NONE),
    atom(0x0108, "make-focus", NONE),
    atom(0x0109, "close-update", NONE),
    // act (0x02)
    atom(0x0200, "set-criterion", CRITERION),
    atom(0x0201, "do-action", CRITERION),
    atom(0x0202, "send-selection", NONE),
    // de (0x03)
    atom(0x0300, "ez-send-form", NONE),
    atom(0x0301, "set-data-type", &[Param { name: "type", ty: ArgType::Unsigned(Width::One) }]),
    // idb (0x05)
    atom(0x0501, "idb-append-data", DATA),
    atom(0x0502, "idb-set-length", &[Param { name: "length", ty: ArgType::Unsigned(Width::Four) }]),
    // dod (0x07)
    atom(0x0700, "dod-data", DATA),
    atom(0x0701, "dod-gid", GID),
    // chat (0x0C)
    atom(0x0C00, "chat-add-user", &[Param { name: "name", ty: ArgType::Text }]),
    atom(0x0C01, "chat-remove-user", &[Param { name: "name", ty: ArgType::Text }]),
    // sm (0x0E)
    atom(0x0E00, "send-token-arg", &[Param { name: "token", ty: ArgType::Text }]),
    atom(0x0E01, "send-k1", &[Param { name: "keyword", ty: ArgType::Text }]),
    atom(0x0E02, "send-token-raw", &[Param { name: "token", ty: ArgType::Bytes(Some(2)) }]),
    // mat (0x10)
    atom(0x1000, "object-id", &[Param { name: "id", ty: ArgType::Text }]),
    atom(0x1001, "orientation", &[Param { name: "orientation", ty: ArgType::Enum8(ORIENTATIONS) }]),
    atom(0x1002, "position", &[Param { name: "position", ty: ArgType::Enum8(POSITIONS) }]),
    atom(0x1003, "font-id", &[Param { name: "font", ty: ArgType::Unsigned(Width::One) }]),
    atom(0x1004, "font-size", &[Param { name: "points", ty: ArgType::Unsigned(Width::One) }]),
    atom(0x1005, "width", &[Param { name: "chars", ty: ArgType::Unsigned(Width::Two) }]),
    atom(0x1006, "height", &[Param { name: "lines", ty: ArgType::Unsigned(Width::Two) }]),
    atom(0x1007, "offset-x", &[Param { name: "pixels", ty: ArgType::Signed(Width::Two) }]),
    atom(0x1008, "offset-y", &[Param { name: "pixels", ty: ArgType::Signed(Width::Two) }]),
    atom(0x1009, "relative-tag", &[Param { name: "tag", ty: ArgType::Unsigned(Width::Four) }]),
    atom(0x100A, "bool-disabled", &[Param { name: "state", ty: ArgType::Enum8(BOOLEAN) }]),
    atom(0x100B, "art-id", GID),
    atom(0x100C, "color-face", &[Param { name: "rgb", ty: ArgType::Bytes(Some(3)) }]),
    atom(0x100D, "scroll-delta", &[Param { name: "lines", ty: ArgType::Signed(Width::One) }]),
    atom(0x100E, "timestamp", &[Param { name: "seconds", ty: ArgType::Signed(Width::Four) }]),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_table_has_unique_names_and_opcodes() {
        let dict = AtomDictionary::from_table(STANDARD_ATOMS).expect("valid table");
        assert_eq!(dict.len(), STANDARD_ATOMS.len());
    }

    #[test]
    fn lookup_by_name_and_opcode_agree() {
        let dict = AtomDictionary::standard();
        for sig in dict.iter() {
            assert_eq!(dict.lookup(sig.name).map(|s| s.opcode), Some(sig.opcode));
            assert_eq!(dict.lookup_by_opcode(sig.opcode).map(|s| s.name), Some(sig.name));
        }
        assert!(dict.lookup("no-such-atom").is_none());
        assert!(dict.lookup_by_opcode(0xFFFF).is_none());
    }

    #[test]
    fn compact_styles_can_address_every_atom() {
        // SWITCH carries the protocol in five bits.
        for sig in AtomDictionary::standard().iter() {
            assert!(sig.protocol() < 32, "{} protocol too large", sig.name);
        }
    }

    #[test]
    fn duplicate_opcode_rejected() {
        static DUP: &[Signature] = &[atom(0x0001, "a", NONE), atom(0x0001, "b", NONE)];
        assert_eq!(
            AtomDictionary::from_table(DUP).unwrap_err(),
            DictionaryError::DuplicateOpcode(0x0001)
        );
    }

    #[test]
    fn range_check_rejects_overflow() {
        let ty = ArgType::Unsigned(Width::One);
        assert!(ty.check(&TypedValue::Unsigned(255)).is_ok());
        let err = ty.check(&TypedValue::Unsigned(256)).unwrap_err();
        assert!(err.is_range());
        let ty = ArgType::Signed(Width::Two);
        assert!(ty.check(&TypedValue::Signed(-32768)).is_ok());
        assert!(ty.check(&TypedValue::Signed(32768)).is_err());
    }

    #[test]
    fn type_mismatch_is_not_a_range_error() {
        let err = ArgType::Text.check(&TypedValue::Bytes(vec![1])).unwrap_err();
        assert!(!err.is_range());
    }

    #[test]
    fn suggest_close_names() {
        let dict = AtomDictionary::standard();
        assert_eq!(dict.suggest("start-strem"), Some("start-stream"));
        assert_eq!(dict.suggest("zzzzzzzzzzzz"), None);
    }

    #[test]
    fn usage_lists_params() {
        let sig = AtomDictionary::standard().lookup("start-object").unwrap();
        assert_eq!(sig.usage(), "start-object <class: enum, title: text>");
    }
}
