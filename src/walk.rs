//! Zero-copy walk over FDO record bodies.
//!
//! The walker advances through Raw records using only the argument widths
//! declared in the dictionary: it reads opcodes, argument counts and length
//! prefixes, and never materializes [`TypedValue`](crate::value::TypedValue)s.
//!
//! | Use case | Prefer |
//! |----------|--------|
//! | Byte extent of one record | [`record_extent`] |
//! | Iterate record extents | [`BinaryWalker`] |
//! | Count records / sniff a buffer | [`summarize`] |
//! | Full decode for inspection/display | [codec](crate::codec) |
//!
//! Errors are the decoder's: the walker fails where decoding would fail
//! structurally (truncation, unknown opcode, wrong argument count).

use crate::ast::FormatVersion;
use crate::codec::{read_header, DecodeError, Reader};
use crate::compact;
use crate::dictionary::{ArgType, AtomDictionary};
use serde::Serialize;
use std::ops::Range;

/// Length of the format marker preceding every body.
pub const HEADER_LEN: usize = 2;

/// Position of one Raw record within a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordExtent {
    pub offset: usize,
    pub opcode: u16,
    pub argc: u8,
    pub payload: Range<usize>,
}

impl RecordExtent {
    pub fn end(&self) -> usize {
        self.payload.end
    }

    pub fn len(&self) -> usize {
        self.end() - self.offset
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Compute the extent of the Raw record starting at `offset`.
pub fn record_extent(bytes: &[u8], offset: usize, dict: &AtomDictionary) -> Result<RecordExtent, DecodeError> {
    let mut r = Reader::new(bytes, offset, bytes.len());
    let opcode = r.read_u16()?;
    let sig = dict
        .lookup_by_opcode(opcode)
        .ok_or(DecodeError::UnknownOpcode { opcode, offset })?;
    let argc = r.read_u8()?;
    if argc as usize != sig.arity() {
        return Err(DecodeError::ArityMismatch {
            name: sig.name,
            offset,
            expected: sig.arity(),
            found: argc as usize,
        });
    }
    let start = r.position();
    for param in sig.params {
        skip_value(&mut r, &param.ty)?;
    }
    Ok(RecordExtent { offset, opcode, argc, payload: start..r.position() })
}

fn skip_value(r: &mut Reader<'_>, ty: &ArgType) -> Result<(), DecodeError> {
    match ty {
        ArgType::Unsigned(w) | ArgType::Signed(w) => r.skip(w.bytes()),
        ArgType::Enum8(_) => r.skip(1),
        ArgType::Bytes(Some(n)) => r.skip(*n),
        ArgType::Bytes(None) | ArgType::Text => {
            let len = r.read_len()?;
            r.skip(len)
        }
    }
}

/// Iterator over consecutive Raw record extents. Stops after the first error.
pub struct BinaryWalker<'a> {
    data: &'a [u8],
    pos: usize,
    dict: &'a AtomDictionary,
    failed: bool,
}

impl<'a> BinaryWalker<'a> {
    pub fn new(data: &'a [u8], start: usize, dict: &'a AtomDictionary) -> Self {
        BinaryWalker { data, pos: start, dict, failed: false }
    }

    pub fn position(&self) -> usize {
        self.pos
    }
}

impl Iterator for BinaryWalker<'_> {
    type Item = Result<RecordExtent, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.data.len() {
            return None;
        }
        match record_extent(self.data, self.pos, self.dict) {
            Ok(extent) => {
                self.pos = extent.end();
                Some(Ok(extent))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Shape of an encoded stream, obtained without decoding values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSummary {
    pub format: FormatVersion,
    pub records: usize,
    pub byte_length: usize,
}

pub fn summarize(bytes: &[u8], dict: &AtomDictionary) -> Result<StreamSummary, DecodeError> {
    let format = read_header(bytes)?;
    let records = match format {
        FormatVersion::Raw => {
            let mut n = 0;
            for extent in BinaryWalker::new(bytes, HEADER_LEN, dict) {
                extent?;
                n += 1;
            }
            n
        }
        FormatVersion::Compact => compact::expand(bytes, HEADER_LEN)?.len(),
    };
    Ok(StreamSummary { format, records, byte_length: bytes.len() })
}
