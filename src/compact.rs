//! Compaction transform (revision 1) between Raw and Compact record layouts.
//!
//! The transform only rewrites record headers; argument bytes are copied
//! verbatim, so the inverse needs no dictionary. Each compact record starts
//! with a style byte `sss nnnnn`:
//!
//! ```text
//! 000 00000  FULL    protocol u8 | atom u8 | argc u8 | len | payload
//! 001 aaaaa  SAME    argc u8 | len | payload          (current protocol)
//! 010 aaaaa  BARE    no arguments                     (current protocol)
//! 011 aaaaa  SHORT   one byte of payload, argc = 1    (current protocol)
//! 100 ppppp  SWITCH  atom u8 | argc u8 | len | payload
//! 101 rrrrr  REPEAT  previous record, rrrrr + 1 more times
//! 110/111    reserved
//! ```
//!
//! `len` is the variable length prefix used by the Raw codec. FULL and
//! SWITCH set the current protocol, which starts at 0.

use crate::ast::{FormatVersion, COMPACT_MARKER, RAW_MARKER};
use crate::codec::{read_header, write_len, write_raw_record, DecodeError, Reader};
use crate::dictionary::{AtomDictionary, MAX_VARIABLE_LEN};
use crate::walk::{BinaryWalker, HEADER_LEN};
use std::ops::Range;
use thiserror::Error;

/// Transform revision carried in the second header byte of Compact streams.
pub const TRANSFORM_REVISION: u8 = 0x01;

const STYLE_FULL: u8 = 0b000;
const STYLE_SAME: u8 = 0b001;
const STYLE_BARE: u8 = 0b010;
const STYLE_SHORT: u8 = 0b011;
const STYLE_SWITCH: u8 = 0b100;
const STYLE_REPEAT: u8 = 0b101;

const LOW_MASK: u8 = 0x1F;
const MAX_REPEAT: usize = 32;

fn style_byte(style: u8, low: u8) -> u8 {
    (style << 5) | (low & LOW_MASK)
}

/// A record in transform-neutral form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record<'a> {
    pub opcode: u16,
    pub argc: u8,
    pub payload: &'a [u8],
}

impl Record<'_> {
    fn protocol(&self) -> u8 {
        (self.opcode >> 8) as u8
    }

    fn atom_number(&self) -> u8 {
        (self.opcode & 0xFF) as u8
    }
}

/// A record recovered from a compact body. `payload` indexes the input buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactRecord {
    pub offset: usize,
    pub opcode: u16,
    pub argc: u8,
    pub payload: Range<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompactError {
    #[error("record {index}: payload of {len} bytes exceeds the length prefix")]
    RecordTooLarge { index: usize, len: usize },
}

/// Errors converting whole buffers between formats.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConvertError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Compact(#[from] CompactError),
    #[error("expected a {expected} stream, found {found}")]
    WrongFormat { expected: FormatVersion, found: FormatVersion },
}

/// Compact a record sequence into a body (no header).
pub fn compact(records: &[Record<'_>]) -> Result<Vec<u8>, CompactError> {
    let mut out = Vec::new();
    let mut protocol = 0u8;
    let mut i = 0;
    while i < records.len() {
        let rec = &records[i];
        write_compact_record(&mut out, rec, &mut protocol, i)?;
        let mut run = 0;
        while i + 1 + run < records.len() && records[i + 1 + run] == *rec {
            run += 1;
        }
        let mut remaining = run;
        while remaining > 0 {
            let n = remaining.min(MAX_REPEAT);
            out.push(style_byte(STYLE_REPEAT, (n - 1) as u8));
            remaining -= n;
        }
        i += 1 + run;
    }
    Ok(out)
}

fn write_compact_record(
    out: &mut Vec<u8>,
    rec: &Record<'_>,
    protocol: &mut u8,
    index: usize,
) -> Result<(), CompactError> {
    let proto = rec.protocol();
    let atom = rec.atom_number();
    if proto == *protocol && atom <= LOW_MASK {
        if rec.argc == 0 && rec.payload.is_empty() {
            out.push(style_byte(STYLE_BARE, atom));
            return Ok(());
        }
        if rec.argc == 1 && rec.payload.len() == 1 {
            out.push(style_byte(STYLE_SHORT, atom));
            out.push(rec.payload[0]);
            return Ok(());
        }
        out.push(style_byte(STYLE_SAME, atom));
    } else if proto <= LOW_MASK {
        out.push(style_byte(STYLE_SWITCH, proto));
        out.push(atom);
        *protocol = proto;
    } else {
        out.push(style_byte(STYLE_FULL, 0));
        out.push(proto);
        out.push(atom);
        *protocol = proto;
    }
    if rec.payload.len() > MAX_VARIABLE_LEN {
        return Err(CompactError::RecordTooLarge { index, len: rec.payload.len() });
    }
    out.push(rec.argc);
    write_len(out, rec.payload.len());
    out.extend_from_slice(rec.payload);
    Ok(())
}

/// Undo the transform over `bytes[start..]`.
pub fn expand(bytes: &[u8], start: usize) -> Result<Vec<CompactRecord>, DecodeError> {
    let mut r = Reader::new(bytes, start, bytes.len());
    let mut protocol = 0u8;
    let mut out: Vec<CompactRecord> = Vec::new();
    while r.remaining() > 0 {
        let offset = r.position();
        let head = r.read_u8()?;
        let low = head & LOW_MASK;
        let (proto, atom) = match head >> 5 {
            STYLE_FULL => {
                if low != 0 {
                    return Err(DecodeError::ReservedStyle { style: STYLE_FULL, offset });
                }
                let proto = r.read_u8()?;
                (proto, r.read_u8()?)
            }
            STYLE_SAME | STYLE_BARE | STYLE_SHORT => (protocol, low),
            STYLE_SWITCH => (low, r.read_u8()?),
            STYLE_REPEAT => {
                let prev = out.last().cloned().ok_or(DecodeError::OrphanRepeat { offset })?;
                for _ in 0..=low {
                    out.push(CompactRecord { offset, ..prev.clone() });
                }
                continue;
            }
            style => return Err(DecodeError::ReservedStyle { style, offset }),
        };
        let opcode = ((proto as u16) << 8) | atom as u16;
        let (argc, payload) = match head >> 5 {
            STYLE_BARE => (0, r.position()..r.position()),
            STYLE_SHORT => {
                let at = r.position();
                r.skip(1)?;
                (1, at..at + 1)
            }
            _ => {
                let argc = r.read_u8()?;
                let len = r.read_len()?;
                let at = r.position();
                r.skip(len)?;
                (argc, at..at + len)
            }
        };
        protocol = proto;
        out.push(CompactRecord { offset, opcode, argc, payload });
    }
    Ok(out)
}

/// Convert a complete Raw buffer into the Compact form.
pub fn compact_raw(raw: &[u8], dict: &AtomDictionary) -> Result<Vec<u8>, ConvertError> {
    let found = read_header(raw)?;
    if found != FormatVersion::Raw {
        return Err(ConvertError::WrongFormat { expected: FormatVersion::Raw, found });
    }
    let mut records = Vec::new();
    for extent in BinaryWalker::new(raw, HEADER_LEN, dict) {
        let extent = extent?;
        records.push(Record { opcode: extent.opcode, argc: extent.argc, payload: &raw[extent.payload] });
    }
    let mut out = COMPACT_MARKER.to_vec();
    out.extend_from_slice(&compact(&records)?);
    Ok(out)
}

/// Convert a complete Compact buffer back into the Raw form.
pub fn expand_to_raw(bytes: &[u8]) -> Result<Vec<u8>, ConvertError> {
    let found = read_header(bytes)?;
    if found != FormatVersion::Compact {
        return Err(ConvertError::WrongFormat { expected: FormatVersion::Compact, found });
    }
    let mut out = RAW_MARKER.to_vec();
    for rec in expand(bytes, HEADER_LEN)? {
        let record = Record { opcode: rec.opcode, argc: rec.argc, payload: &bytes[rec.payload] };
        write_raw_record(&mut out, &record);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(opcode: u16, argc: u8, payload: &[u8]) -> Record<'_> {
        Record { opcode, argc, payload }
    }

    #[test]
    fn styles_chosen_by_shape() {
        let body = compact(&[
            rec(0x0001, 1, &[0x00]),          // SHORT
            rec(0x0104, 0, &[]),              // SWITCH to man
            rec(0x0101, 0, &[]),              // BARE
            rec(0x0102, 1, &[2, b'h', b'i']), // SAME
            rec(0x2001, 0, &[]),              // FULL, protocol above 31
        ])
        .unwrap();
        assert_eq!(
            body,
            vec![
                0x61, 0x00, //
                0x81, 0x04, 0x00, 0x00, //
                0x41, //
                0x22, 0x01, 0x03, 0x02, b'h', b'i', //
                0x00, 0x20, 0x01, 0x00, 0x00,
            ]
        );
    }

    #[test]
    fn repeats_are_folded() {
        let r = rec(0x0004, 0, &[]);
        let records = vec![r; 35];
        let body = compact(&records).unwrap();
        // BARE, REPEAT x32, REPEAT x2
        assert_eq!(body, vec![0x44, 0xBF, 0xA1]);
        let expanded = expand(&body, 0).unwrap();
        assert_eq!(expanded.len(), 35);
        assert!(expanded.iter().all(|e| e.opcode == 0x0004 && e.argc == 0));
    }

    #[test]
    fn expand_inverts_compact() {
        let records = [
            rec(0x0001, 1, &[0x00]),
            rec(0x0100, 2, &[0x01, 0x02, b'h', b'i']),
            rec(0x1001, 1, &[0x05]),
            rec(0x1001, 1, &[0x05]),
            rec(0x0101, 0, &[]),
            rec(0x0002, 1, &[0x00]),
        ];
        let body = compact(&records).unwrap();
        let expanded = expand(&body, 0).unwrap();
        let back: Vec<Record<'_>> = expanded
            .iter()
            .map(|e| Record { opcode: e.opcode, argc: e.argc, payload: &body[e.payload.clone()] })
            .collect();
        assert_eq!(back, records);
    }

    #[test]
    fn reserved_style_rejected() {
        assert_eq!(expand(&[0xC0], 0), Err(DecodeError::ReservedStyle { style: 0b110, offset: 0 }));
        assert_eq!(expand(&[0x05], 0), Err(DecodeError::ReservedStyle { style: 0b000, offset: 0 }));
    }

    #[test]
    fn repeat_without_record_rejected() {
        assert_eq!(expand(&[0xA0], 0), Err(DecodeError::OrphanRepeat { offset: 0 }));
    }

    #[test]
    fn truncated_payload_reports_offset() {
        // SAME atom 2, argc 1, len 4, only 1 byte present
        let err = expand(&[0x22, 0x01, 0x04, b'a'], 0).unwrap_err();
        assert_eq!(err, DecodeError::TruncatedStream { offset: 3, needed: 3 });
    }

    #[test]
    fn whole_buffer_conversion_round_trips() {
        let dict = AtomDictionary::standard();
        let raw = vec![
            0x00, 0x01, // header
            0x00, 0x01, 0x01, 0x00, // start-stream <00x>
            0x01, 0x04, 0x00, // update-display
            0x01, 0x04, 0x00, // update-display
            0x00, 0x02, 0x01, 0x00, // end-stream <00x>
        ];
        let compacted = compact_raw(&raw, dict).unwrap();
        assert_eq!(&compacted[..2], &COMPACT_MARKER);
        assert!(compacted.len() < raw.len());
        assert_eq!(expand_to_raw(&compacted).unwrap(), raw);
    }

    #[test]
    fn conversion_checks_source_format() {
        let err = expand_to_raw(&[0x00, 0x01]).unwrap_err();
        assert_eq!(err, ConvertError::WrongFormat { expected: FormatVersion::Compact, found: FormatVersion::Raw });
    }
}
