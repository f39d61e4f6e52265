//! Encode atom streams to FDO binaries and decode them back.
//!
//! # Raw layout
//!
//! ```text
//! +------+------+------------------------------------------+
//! | 0x00 | 0x01 | record*                                  |
//! +------+------+------------------------------------------+
//!
//! record:
//! +----------------+-----------+-------------------------+
//! | opcode (u16BE) | argc (u8) | argument * argc         |
//! +----------------+-----------+-------------------------+
//! ```
//!
//! Arguments are written in their declared width: integers big-endian,
//! Enum8 as one byte, fixed byte strings without prefix, variable byte
//! strings and text behind a length prefix (one byte below 0x80, otherwise
//! two bytes big-endian with the high bit set).
//!
//! Compact streams (`0x40 0x01`) carry the same argument bytes behind
//! rewritten record headers; see [`crate::compact`].

use crate::ast::{Atom, AtomStream, FormatVersion};
use crate::compact::{self, Record};
use crate::dictionary::{
    ArgType, ArgsError, AtomDictionary, ValueError, END_STREAM, MAX_VARIABLE_LEN, START_STREAM,
};
use crate::value::TypedValue;
use crate::walk::{BinaryWalker, HEADER_LEN};
use byteorder::{BigEndian, ByteOrder};
use std::ops::Range;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("stream must begin with start-stream")]
    MissingStartMarker,
    #[error("stream must end with end-stream (atom {index} is '{name}')")]
    MissingEndMarker { index: usize, name: &'static str },
    #[error("atom {index}: unknown opcode 0x{opcode:04x}")]
    UnknownOpcode { index: usize, opcode: u16 },
    #[error("atom {index}: name '{name}' does not match opcode 0x{opcode:04x} ('{expected}')")]
    NameMismatch { index: usize, opcode: u16, name: &'static str, expected: &'static str },
    #[error("atom {index} ({name}): expected {expected} argument(s), found {found}")]
    ArityMismatch { index: usize, name: &'static str, expected: usize, found: usize },
    #[error("atom {index} ({name}) argument {}: {source}", .arg + 1)]
    TypeMismatch { index: usize, name: &'static str, arg: usize, source: ValueError },
    #[error("atom {index} ({name}) argument {}: {source}", .arg + 1)]
    Range { index: usize, name: &'static str, arg: usize, source: ValueError },
    #[error("atom {index}: record payload of {len} bytes exceeds the compact length prefix")]
    RecordTooLarge { index: usize, len: usize },
}

impl EncodeError {
    /// Index of the first atom that failed, when one is responsible.
    pub fn index(&self) -> Option<usize> {
        match self {
            EncodeError::MissingStartMarker => None,
            EncodeError::MissingEndMarker { index, .. }
            | EncodeError::UnknownOpcode { index, .. }
            | EncodeError::NameMismatch { index, .. }
            | EncodeError::ArityMismatch { index, .. }
            | EncodeError::TypeMismatch { index, .. }
            | EncodeError::Range { index, .. }
            | EncodeError::RecordTooLarge { index, .. } => Some(*index),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("stream truncated at offset {offset}: {needed} more byte(s) required")]
    TruncatedStream { offset: usize, needed: usize },
    #[error("unknown opcode 0x{opcode:04x} at offset {offset}")]
    UnknownOpcode { opcode: u16, offset: usize },
    #[error("'{name}' at offset {offset} declares {found} argument(s), signature has {expected}")]
    ArityMismatch { name: &'static str, offset: usize, expected: usize, found: usize },
    #[error("invalid UTF-8 in text argument at offset {offset}")]
    InvalidUtf8 { offset: usize },
    #[error("{count} unread argument byte(s) at offset {offset}")]
    TrailingBytes { offset: usize, count: usize },
    #[error("reserved compact record style 0b{style:03b} at offset {offset}")]
    ReservedStyle { style: u8, offset: usize },
    #[error("repeat marker at offset {offset} has no preceding record")]
    OrphanRepeat { offset: usize },
    #[error("unsupported format marker {:02x} {:02x}", .marker[0], .marker[1])]
    UnsupportedFormatVersion { marker: [u8; 2] },
}

impl DecodeError {
    pub fn offset(&self) -> Option<usize> {
        match self {
            DecodeError::TruncatedStream { offset, .. }
            | DecodeError::UnknownOpcode { offset, .. }
            | DecodeError::ArityMismatch { offset, .. }
            | DecodeError::InvalidUtf8 { offset }
            | DecodeError::TrailingBytes { offset, .. }
            | DecodeError::ReservedStyle { offset, .. }
            | DecodeError::OrphanRepeat { offset } => Some(*offset),
            DecodeError::UnsupportedFormatVersion { .. } => Some(0),
        }
    }
}

/// Bounds-checked forward reader over `bytes[pos..end]`.
///
/// Offsets in errors are absolute positions in `bytes`.
pub(crate) struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
    end: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(bytes: &'a [u8], start: usize, end: usize) -> Self {
        let end = end.min(bytes.len());
        Reader { bytes, pos: start.min(end), end }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn remaining(&self) -> usize {
        self.end - self.pos
    }

    pub(crate) fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let available = self.remaining();
        if n > available {
            return Err(DecodeError::TruncatedStream { offset: self.pos, needed: n - available });
        }
        let out = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub(crate) fn skip(&mut self, n: usize) -> Result<(), DecodeError> {
        self.take(n).map(|_| ())
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn read_u16(&mut self) -> Result<u16, DecodeError> {
        Ok(BigEndian::read_u16(self.take(2)?))
    }

    /// Variable length prefix: `0lllllll` or `1lllllll llllllll`.
    pub(crate) fn read_len(&mut self) -> Result<usize, DecodeError> {
        let first = self.read_u8()?;
        if first & 0x80 == 0 {
            return Ok(first as usize);
        }
        let second = self.read_u8()?;
        Ok((((first & 0x7F) as usize) << 8) | second as usize)
    }
}

pub(crate) fn write_len(out: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        out.push(len as u8);
    } else {
        let mut buf = [0u8; 2];
        BigEndian::write_u16(&mut buf, 0x8000 | (len.min(MAX_VARIABLE_LEN) as u16));
        out.extend_from_slice(&buf);
    }
}

/// Read and dispatch on the two-byte format marker.
pub fn read_header(bytes: &[u8]) -> Result<FormatVersion, DecodeError> {
    let mut r = Reader::new(bytes, 0, bytes.len());
    let marker = r.take(HEADER_LEN)?;
    let marker = [marker[0], marker[1]];
    FormatVersion::from_marker(marker).ok_or(DecodeError::UnsupportedFormatVersion { marker })
}

/// One atom ready for the wire: opcode, argument count and argument bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedRecord {
    pub opcode: u16,
    pub argc: u8,
    pub payload: Vec<u8>,
}

impl EncodedRecord {
    pub fn as_record(&self) -> Record<'_> {
        Record { opcode: self.opcode, argc: self.argc, payload: &self.payload }
    }
}

/// Atom stream encoder bound to a dictionary.
#[derive(Debug, Clone, Copy)]
pub struct Encoder<'d> {
    dict: &'d AtomDictionary,
}

impl<'d> Encoder<'d> {
    pub fn new(dict: &'d AtomDictionary) -> Self {
        Encoder { dict }
    }

    /// Encode a whole stream in its own format version. Nothing is returned
    /// unless every atom encoded.
    pub fn encode(&self, stream: &AtomStream) -> Result<Vec<u8>, EncodeError> {
        let atoms = stream.atoms();
        match atoms.first() {
            Some(first) if first.opcode == START_STREAM => {}
            _ => return Err(EncodeError::MissingStartMarker),
        }
        if let Some(last) = atoms.last() {
            if last.opcode != END_STREAM {
                return Err(EncodeError::MissingEndMarker { index: atoms.len() - 1, name: last.name });
            }
        }

        let records = atoms
            .iter()
            .enumerate()
            .map(|(index, atom)| self.encode_atom(index, atom))
            .collect::<Result<Vec<_>, _>>()?;

        let mut out = stream.format().marker().to_vec();
        match stream.format() {
            FormatVersion::Raw => {
                for rec in &records {
                    write_raw_record(&mut out, &rec.as_record());
                }
            }
            FormatVersion::Compact => {
                let borrowed: Vec<Record<'_>> = records.iter().map(EncodedRecord::as_record).collect();
                let body = compact::compact(&borrowed).map_err(
                    |compact::CompactError::RecordTooLarge { index, len }| EncodeError::RecordTooLarge { index, len },
                )?;
                out.extend_from_slice(&body);
            }
        }
        debug!(atoms = atoms.len(), bytes = out.len(), format = %stream.format(), "encoded atom stream");
        Ok(out)
    }

    /// Validate one atom against its signature and encode its arguments.
    pub fn encode_atom(&self, index: usize, atom: &Atom) -> Result<EncodedRecord, EncodeError> {
        let sig = self
            .dict
            .lookup_by_opcode(atom.opcode)
            .ok_or(EncodeError::UnknownOpcode { index, opcode: atom.opcode })?;
        if sig.name != atom.name {
            return Err(EncodeError::NameMismatch {
                index,
                opcode: atom.opcode,
                name: atom.name,
                expected: sig.name,
            });
        }
        sig.check_args(&atom.args).map_err(|e| match e {
            ArgsError::Arity { expected, found } => {
                EncodeError::ArityMismatch { index, name: sig.name, expected, found }
            }
            ArgsError::Value { arg, source } if source.is_range() => {
                EncodeError::Range { index, name: sig.name, arg, source }
            }
            ArgsError::Value { arg, source } => EncodeError::TypeMismatch { index, name: sig.name, arg, source },
        })?;
        let argc = u8::try_from(atom.args.len()).map_err(|_| EncodeError::ArityMismatch {
            index,
            name: sig.name,
            expected: sig.arity(),
            found: atom.args.len(),
        })?;

        let mut payload = Vec::new();
        for (arg, (param, value)) in sig.params.iter().zip(&atom.args).enumerate() {
            write_value(&mut payload, &param.ty, value)
                .map_err(|source| EncodeError::TypeMismatch { index, name: sig.name, arg, source })?;
        }
        Ok(EncodedRecord { opcode: atom.opcode, argc, payload })
    }
}

pub(crate) fn write_raw_record(out: &mut Vec<u8>, rec: &Record<'_>) {
    let mut op = [0u8; 2];
    BigEndian::write_u16(&mut op, rec.opcode);
    out.extend_from_slice(&op);
    out.push(rec.argc);
    out.extend_from_slice(rec.payload);
}

fn write_value(out: &mut Vec<u8>, ty: &ArgType, value: &TypedValue) -> Result<(), ValueError> {
    ty.check(value)?;
    let mut buf = [0u8; 8];
    match (ty, value) {
        (ArgType::Unsigned(w), TypedValue::Unsigned(x)) => {
            BigEndian::write_uint(&mut buf, *x, w.bytes());
            out.extend_from_slice(&buf[..w.bytes()]);
        }
        (ArgType::Signed(w), TypedValue::Signed(x)) => {
            BigEndian::write_int(&mut buf, *x, w.bytes());
            out.extend_from_slice(&buf[..w.bytes()]);
        }
        (ArgType::Enum8(_), TypedValue::Enum8(x)) => out.push(*x),
        (ArgType::Bytes(Some(_)), TypedValue::Bytes(b)) => out.extend_from_slice(b),
        (ArgType::Bytes(None), TypedValue::Bytes(b)) => {
            write_len(out, b.len());
            out.extend_from_slice(b);
        }
        (ArgType::Text, TypedValue::Text(s)) => {
            write_len(out, s.len());
            out.extend_from_slice(s.as_bytes());
        }
        (expected, found) => {
            return Err(ValueError::TypeMismatch {
                expected: expected.expected_kind(),
                found: found.kind_name(),
            })
        }
    }
    Ok(())
}

/// A decoded atom and the bytes it was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedAtom {
    pub span: Range<usize>,
    pub atom: Atom,
}

/// FDO binary decoder bound to a dictionary.
#[derive(Debug, Clone, Copy)]
pub struct Decoder<'d> {
    dict: &'d AtomDictionary,
}

impl<'d> Decoder<'d> {
    pub fn new(dict: &'d AtomDictionary) -> Self {
        Decoder { dict }
    }

    /// Decode a complete buffer. Unknown opcodes and short buffers are
    /// errors; no bytes are ever skipped.
    pub fn decode(&self, bytes: &[u8]) -> Result<AtomStream, DecodeError> {
        let (format, located) = self.decode_located(bytes)?;
        let atoms: Vec<Atom> = located.into_iter().map(|l| l.atom).collect();
        debug!(atoms = atoms.len(), bytes = bytes.len(), format = %format, "decoded atom stream");
        Ok(AtomStream::new(format, atoms))
    }

    /// Decode keeping the byte span each atom came from.
    pub fn decode_located(&self, bytes: &[u8]) -> Result<(FormatVersion, Vec<LocatedAtom>), DecodeError> {
        let format = read_header(bytes)?;
        let mut atoms = Vec::new();
        match format {
            FormatVersion::Raw => {
                for extent in BinaryWalker::new(bytes, HEADER_LEN, self.dict) {
                    let extent = extent?;
                    let span = extent.offset..extent.end();
                    let atom = self.decode_record(bytes, extent.offset, extent.opcode, extent.argc, extent.payload)?;
                    atoms.push(LocatedAtom { span, atom });
                }
            }
            FormatVersion::Compact => {
                for rec in compact::expand(bytes, HEADER_LEN)? {
                    let span = rec.offset..rec.payload.end.max(rec.offset + 1);
                    let atom = self.decode_record(bytes, rec.offset, rec.opcode, rec.argc, rec.payload)?;
                    atoms.push(LocatedAtom { span, atom });
                }
            }
        }
        Ok((format, atoms))
    }

    fn decode_record(
        &self,
        bytes: &[u8],
        offset: usize,
        opcode: u16,
        argc: u8,
        payload: Range<usize>,
    ) -> Result<Atom, DecodeError> {
        let sig = self
            .dict
            .lookup_by_opcode(opcode)
            .ok_or(DecodeError::UnknownOpcode { opcode, offset })?;
        if argc as usize != sig.arity() {
            return Err(DecodeError::ArityMismatch {
                name: sig.name,
                offset,
                expected: sig.arity(),
                found: argc as usize,
            });
        }
        let mut r = Reader::new(bytes, payload.start, payload.end);
        let mut args = Vec::with_capacity(sig.arity());
        for param in sig.params {
            args.push(read_value(&mut r, &param.ty)?);
        }
        if r.remaining() > 0 {
            return Err(DecodeError::TrailingBytes { offset: r.position(), count: r.remaining() });
        }
        Ok(Atom::new(sig, args))
    }
}

fn read_value(r: &mut Reader<'_>, ty: &ArgType) -> Result<TypedValue, DecodeError> {
    Ok(match ty {
        ArgType::Unsigned(w) => TypedValue::Unsigned(BigEndian::read_uint(r.take(w.bytes())?, w.bytes())),
        ArgType::Signed(w) => TypedValue::Signed(BigEndian::read_int(r.take(w.bytes())?, w.bytes())),
        ArgType::Enum8(_) => TypedValue::Enum8(r.read_u8()?),
        ArgType::Bytes(Some(n)) => TypedValue::Bytes(r.take(*n)?.to_vec()),
        ArgType::Bytes(None) => {
            let len = r.read_len()?;
            TypedValue::Bytes(r.take(len)?.to_vec())
        }
        ArgType::Text => {
            let len = r.read_len()?;
            let start = r.position();
            let raw = r.take(len)?;
            match std::str::from_utf8(raw) {
                Ok(s) => TypedValue::Text(s.to_string()),
                Err(e) => return Err(DecodeError::InvalidUtf8 { offset: start + e.valid_up_to() }),
            }
        }
    })
}
