//! Splitting compiled streams into P3 DATA payloads, and joining them back.
//!
//! Records are the packing unit: each payload carries as many whole records
//! as fit, and the format marker travels with the first record. A record
//! larger than a payload is segmented. Its first segment fills a payload of
//! its own; every later segment starts with a continuation byte `0x80 | n`,
//! `n` being the number of segment bytes that follow (at most 127).
//!
//! ```text
//! AT 09 00 | 00 01 <records...>              whole records
//! AT 09 00 | <head of a long record>         first segment
//! AT 09 00 | 80|n <n bytes>                  continuation
//! AT 09 00 | <records...>                    whole records again
//! ```
//!
//! [`join`] expects a continuation byte only where the bytes gathered so far
//! end inside a record, so it is never mistaken for a record header (compact
//! SWITCH style bytes share the `100xxxxx` pattern).

use crate::ast::{Atom, AtomStream, FormatVersion};
use crate::codec::{read_header, DecodeError, EncodeError, Encoder};
use crate::compact;
use crate::dictionary::AtomDictionary;
use crate::token::{build_payload, TokenError};
use crate::value::TypedValue;
use crate::walk::{BinaryWalker, HEADER_LEN};
use serde::Serialize;
use std::ops::Range;
use thiserror::Error;
use tracing::debug;

/// Largest DATA payload a client sends in one frame.
pub const MAX_OUTBOUND_SIZE: usize = 119;

pub const CONTINUATION_FLAG: u8 = 0x80;

/// Largest continuation segment, bounded by the seven length bits.
pub const MAX_SEGMENT_LEN: usize = 0x7F;

/// Longest `append-data`/`idb-append-data` argument kept in one atom.
pub const MAX_APPEND_LEN: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkError {
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("payload limit of {limit} bytes leaves no room for records after the {header}-byte data header")]
    LimitTooSmall { limit: usize, header: usize },
}

/// One DATA payload produced by [`chunk`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    /// Token, stream id and fragment.
    pub payload: Vec<u8>,
    /// The fragment continues a record begun in an earlier chunk.
    pub continuation: bool,
}

/// Split a compiled stream into DATA payloads of at most `limit` bytes.
pub fn chunk(
    fdo: &[u8],
    token: &str,
    stream_id: u64,
    limit: usize,
    dict: &AtomDictionary,
) -> Result<Vec<Chunk>, ChunkError> {
    let header = build_payload(token, stream_id, &[])?.len();
    let room = limit.saturating_sub(header);
    // The first payload holds the format marker and at least one record byte.
    if room <= HEADER_LEN {
        return Err(ChunkError::LimitTooSmall { limit, header });
    }
    let segment_len = (room - 1).min(MAX_SEGMENT_LEN);

    let mut chunks = Vec::new();
    let mut pending = Vec::new();
    for range in record_units(fdo, dict)? {
        let unit = &fdo[range];
        if unit.len() <= room {
            if pending.len() + unit.len() > room {
                flush(&mut chunks, &mut pending, token, stream_id)?;
            }
            pending.extend_from_slice(unit);
            continue;
        }
        flush(&mut chunks, &mut pending, token, stream_id)?;
        let (head, rest) = unit.split_at(room);
        chunks.push(Chunk { payload: build_payload(token, stream_id, head)?, continuation: false });
        for piece in rest.chunks(segment_len) {
            let mut fragment = Vec::with_capacity(piece.len() + 1);
            fragment.push(CONTINUATION_FLAG | piece.len() as u8);
            fragment.extend_from_slice(piece);
            chunks.push(Chunk { payload: build_payload(token, stream_id, &fragment)?, continuation: true });
        }
    }
    flush(&mut chunks, &mut pending, token, stream_id)?;
    debug!(bytes = fdo.len(), chunks = chunks.len(), limit, "stream chunked");
    Ok(chunks)
}

/// Split long append atoms, encode, then [`chunk`].
pub fn chunk_stream(
    stream: &AtomStream,
    token: &str,
    stream_id: u64,
    limit: usize,
    dict: &AtomDictionary,
) -> Result<Vec<Chunk>, ChunkError> {
    let bytes = Encoder::new(dict).encode(&split_long_appends(stream))?;
    chunk(&bytes, token, stream_id, limit, dict)
}

fn flush(chunks: &mut Vec<Chunk>, pending: &mut Vec<u8>, token: &str, stream_id: u64) -> Result<(), TokenError> {
    if !pending.is_empty() {
        chunks.push(Chunk { payload: build_payload(token, stream_id, pending)?, continuation: false });
        pending.clear();
    }
    Ok(())
}

/// Byte ranges of the records in `fdo`; the first range includes the marker.
fn record_units(fdo: &[u8], dict: &AtomDictionary) -> Result<Vec<Range<usize>>, DecodeError> {
    let mut starts: Vec<usize> = match read_header(fdo)? {
        FormatVersion::Raw => BinaryWalker::new(fdo, HEADER_LEN, dict)
            .map(|extent| extent.map(|e| e.offset))
            .collect::<Result<_, _>>()?,
        FormatVersion::Compact => {
            // Records expanded from one REPEAT byte share its offset.
            let mut starts: Vec<usize> = compact::expand(fdo, HEADER_LEN)?.into_iter().map(|r| r.offset).collect();
            starts.dedup();
            starts
        }
    };
    match starts.first_mut() {
        Some(first) => *first = 0,
        None => starts.push(0),
    }
    let ends = starts.iter().skip(1).copied().chain(std::iter::once(fdo.len()));
    Ok(starts.iter().copied().zip(ends).map(|(s, e)| s..e).collect())
}

/// Replace `append-data` and `idb-append-data` atoms whose argument exceeds
/// [`MAX_APPEND_LEN`] with several atoms of the same kind.
pub fn split_long_appends(stream: &AtomStream) -> AtomStream {
    let mut atoms = Vec::with_capacity(stream.len());
    for atom in stream.atoms() {
        match (atom.name, atom.args.as_slice()) {
            ("append-data", [TypedValue::Text(text)]) if text.len() > MAX_APPEND_LEN => {
                for part in split_text(text, MAX_APPEND_LEN) {
                    atoms.push(Atom { args: vec![TypedValue::Text(part.to_string())], ..atom.clone() });
                }
            }
            ("idb-append-data", [TypedValue::Bytes(data)]) if data.len() > MAX_APPEND_LEN => {
                for part in data.chunks(MAX_APPEND_LEN) {
                    atoms.push(Atom { args: vec![TypedValue::Bytes(part.to_vec())], ..atom.clone() });
                }
            }
            _ => atoms.push(atom.clone()),
        }
    }
    stream.with_atoms(atoms)
}

/// Pieces of at most `max` bytes, cut on character boundaries.
fn split_text(text: &str, max: usize) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut rest = text;
    while rest.len() > max {
        let mut cut = max;
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        let (part, tail) = rest.split_at(cut);
        parts.push(part);
        rest = tail;
    }
    parts.push(rest);
    parts
}

/// Join FDO fragments (payloads without token and stream id) in order.
///
/// A fragment arriving while the joined bytes end inside a record has its
/// continuation byte stripped when the byte announces exactly the bytes
/// that follow; otherwise it is appended as captured.
pub fn join<'a, I>(fragments: I, dict: &AtomDictionary) -> Vec<u8>
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut out: Vec<u8> = Vec::new();
    for fragment in fragments {
        match fragment.split_first() {
            Some((&marker, rest))
                if !out.is_empty() && is_continuation(marker, rest.len()) && ends_inside_record(&out, dict) =>
            {
                out.extend_from_slice(rest);
            }
            _ => out.extend_from_slice(fragment),
        }
    }
    out
}

fn is_continuation(marker: u8, following: usize) -> bool {
    marker & CONTINUATION_FLAG != 0 && (marker & !CONTINUATION_FLAG) as usize == following
}

fn ends_inside_record(bytes: &[u8], dict: &AtomDictionary) -> bool {
    let truncated = |e: &DecodeError| matches!(e, DecodeError::TruncatedStream { .. });
    match read_header(bytes) {
        Ok(FormatVersion::Raw) => BinaryWalker::new(bytes, HEADER_LEN, dict).any(|r| r.as_ref().is_err_and(truncated)),
        Ok(FormatVersion::Compact) => compact::expand(bytes, HEADER_LEN).as_ref().is_err_and(truncated),
        Err(e) => truncated(&e),
    }
}
