//! Text dumps for inspection: offset-annotated hex, per-record listings of
//! an FDO stream and one-line frame summaries.

use crate::codec::{DecodeError, Decoder};
use crate::dictionary::AtomDictionary;
use crate::frame::P3Frame;
use crate::printer::Printer;
use std::fmt::Write as _;

const ROW: usize = 16;

/// Classic hex dump: offset, 16 bytes per row, printable ASCII column.
pub fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::new();
    for (row, chunk) in bytes.chunks(ROW).enumerate() {
        let hex: Vec<String> = chunk.iter().map(|b| format!("{:02x}", b)).collect();
        let ascii: String = chunk
            .iter()
            .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
            .collect();
        let _ = writeln!(out, "{:08x}  {:<width$}  |{}|", row * ROW, hex.join(" "), ascii, width = ROW * 3 - 1);
    }
    out
}

/// One line per record: offset, record bytes and the atom they decode to.
///
/// ```text
/// 000002  00 01 01 00           start-stream <00x>
/// ```
pub fn record_dump(bytes: &[u8], dict: &AtomDictionary) -> Result<String, DecodeError> {
    let (format, atoms) = Decoder::new(dict).decode_located(bytes)?;
    let printer = Printer::new(dict);
    let mut out = String::new();
    let marker = bytes.get(..crate::walk::HEADER_LEN).unwrap_or(&[]);
    let _ = writeln!(out, "000000  {:<20}  ; {} header", crate::hex::spaced(marker), format);
    for located in &atoms {
        let _ = writeln!(
            out,
            "{:06x}  {:<20}  {}",
            located.span.start,
            crate::hex::spaced(&bytes[located.span.clone()]),
            printer.render_atom(&located.atom)
        );
    }
    Ok(out)
}

/// `@offset TYPE tx/rx token id len crc` summary of a frame.
pub fn frame_summary(frame: &P3Frame) -> String {
    let mut s = format!(
        "@{:<8} {:?} tx={:02x} rx={:02x} len={}",
        frame.offset,
        frame.packet_type,
        frame.tx_seq,
        frame.rx_seq,
        frame.data.len()
    );
    if let Some(h) = frame.data_header {
        let _ = write!(s, " token={} stream={}", h.token, h.stream_id);
    }
    let crc = match (frame.checksum_checked, frame.checksum_valid) {
        (false, _) => "unchecked",
        (true, true) => "ok",
        (true, false) => "BAD",
    };
    let _ = write!(s, " crc={}", crc);
    if frame.is_fdo() {
        let _ = write!(s, " fdo={}B", frame.payload.len());
        if let Some(format) = frame.format {
            let _ = write!(s, " ({})", format);
        }
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_dump_rows() {
        let bytes: Vec<u8> = (0x40..0x52).collect();
        let text = hex_dump(&bytes);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("00000000  40 41"));
        assert!(lines[0].ends_with("|@ABCDEFGHIJKLMNO|"));
        assert!(lines[1].starts_with("00000010  50 51"));
    }

    #[test]
    fn record_dump_lists_each_atom() {
        let bytes = [0x00, 0x01, 0x00, 0x01, 0x01, 0x00, 0x00, 0x02, 0x01, 0x00];
        let text = record_dump(&bytes, AtomDictionary::standard()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("; raw header"));
        assert!(lines[1].starts_with("000002  00 01 01 00"));
        assert!(lines[1].ends_with("start-stream <00x>"));
        assert!(lines[2].starts_with("000006"));
    }
}
