//! The four public operations: compile, decompile, detect a frame and
//! extract frames from a capture.
//!
//! Each is a pure function of its input and a shared, read-only
//! [`AtomDictionary`]. The `*_with` variants take the dictionary and
//! configuration explicitly; the short forms use the standard ones.

use crate::ast::FormatVersion;
use crate::codec::{Decoder, EncodeError, Encoder};
use crate::dictionary::AtomDictionary;
use crate::error::{CompileError, DecompileError};
use crate::frame::{read_frame, scan_capture, PacketType, ScanConfig};
use crate::hex;
use crate::parser::{context_lines, locate, parse_located};
use crate::printer::Printer;
use crate::walk;
use serde::{Serialize, Serializer};
use tracing::debug;

/// Compile source to a Raw stream with the standard dictionary.
pub fn compile(source: &str) -> Result<Vec<u8>, CompileError> {
    compile_with(source, AtomDictionary::standard(), FormatVersion::Raw)
}

pub fn compile_with(source: &str, dict: &AtomDictionary, format: FormatVersion) -> Result<Vec<u8>, CompileError> {
    let (stream, offsets) = parse_located(source, dict)?;
    let stream = stream.with_format(format);
    let bytes = Encoder::new(dict)
        .encode(&stream)
        .map_err(|error| locate_encode_error(source, &offsets, error))?;
    debug!(atoms = stream.len(), bytes = bytes.len(), %format, "compiled");
    Ok(bytes)
}

fn locate_encode_error(source: &str, offsets: &[usize], error: EncodeError) -> CompileError {
    let index = match error {
        EncodeError::MissingStartMarker if !offsets.is_empty() => Some(0),
        _ => error.index(),
    };
    match index.and_then(|i| offsets.get(i)) {
        Some(&offset) => {
            let (line, _) = locate(source, offset);
            CompileError::Encode { error, line: Some(line), context: context_lines(source, line) }
        }
        None => error.into(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decompiled {
    pub source_text: String,
    pub byte_length: usize,
    pub format: FormatVersion,
}

pub fn decompile(bytes: &[u8]) -> Result<Decompiled, DecompileError> {
    decompile_with(bytes, AtomDictionary::standard())
}

pub fn decompile_with(bytes: &[u8], dict: &AtomDictionary) -> Result<Decompiled, DecompileError> {
    let stream = Decoder::new(dict).decode(bytes)?;
    Ok(Decompiled {
        source_text: Printer::new(dict).render(&stream),
        byte_length: bytes.len(),
        format: stream.format(),
    })
}

/// Decompile hex text. Malformed hex is rejected before decoding starts.
pub fn decompile_hex(text: &str) -> Result<Decompiled, DecompileError> {
    let bytes = hex::decode(text)?;
    decompile(&bytes)
}

fn upper_hex<S: Serializer>(bytes: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
    match bytes {
        Some(b) => s.serialize_some(&hex::encode_upper(b)),
        None => s.serialize_none(),
    }
}

/// What a single frame contains.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameDetection {
    pub frame_valid: bool,
    pub fdo_detected: bool,
    pub token: Option<String>,
    pub stream_id: Option<u64>,
    pub fdo_byte_length: Option<usize>,
    #[serde(serialize_with = "upper_hex")]
    pub fdo_payload: Option<Vec<u8>>,
    pub checksum_valid: Option<bool>,
    pub packet_type: Option<PacketType>,
    pub format: Option<FormatVersion>,
    /// Record count when the payload walks cleanly.
    pub atom_count: Option<usize>,
    /// Why the bytes are not a valid frame.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn detect_frame(bytes: &[u8]) -> FrameDetection {
    detect_frame_with(bytes, &ScanConfig::any_known_token(), AtomDictionary::standard())
}

pub fn detect_frame_with(bytes: &[u8], config: &ScanConfig, dict: &AtomDictionary) -> FrameDetection {
    let frame = match read_frame(bytes, config) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(error = %e, "not a frame");
            return FrameDetection { error: Some(e.to_string()), ..FrameDetection::default() };
        }
    };
    // A frame is valid when it is well formed and passes its checksum; the
    // header fields are reported either way.
    let mut detection = FrameDetection {
        frame_valid: frame.checksum_valid,
        error: (!frame.checksum_valid).then(|| "checksum mismatch".to_string()),
        fdo_detected: frame.is_fdo(),
        token: frame.token().map(|t| t.to_string()),
        stream_id: frame.stream_id(),
        checksum_valid: Some(frame.checksum_valid),
        packet_type: Some(frame.packet_type),
        format: frame.format,
        ..FrameDetection::default()
    };
    if frame.is_fdo() {
        detection.fdo_byte_length = Some(frame.payload.len());
        detection.atom_count = walk::summarize(&frame.payload, dict).ok().map(|s| s.records);
        detection.fdo_payload = Some(frame.payload);
    }
    detection
}

/// Concatenated FDO payloads of a capture and the scan counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameExtraction {
    pub fdo_hex_concatenated: String,
    pub frames_found: u32,
    pub total_fdo_bytes: u64,
    pub frames_skipped_non_fdo: u32,
    pub frames_with_checksum_issues: u32,
    pub frames_scanned: u32,
    pub frames_truncated: u32,
}

pub fn extract_frames(bytes: &[u8]) -> FrameExtraction {
    extract_frames_with(bytes, &ScanConfig::default())
}

pub fn extract_frames_with(bytes: &[u8], config: &ScanConfig) -> FrameExtraction {
    let (frames, report) = scan_capture(bytes, config);
    let fdo: Vec<u8> = frames.iter().filter(|f| f.is_fdo()).flat_map(|f| f.payload.iter().copied()).collect();
    FrameExtraction {
        fdo_hex_concatenated: hex::encode_upper(&fdo),
        frames_found: report.fdo_frames_found(),
        total_fdo_bytes: report.total_payload_bytes(),
        frames_skipped_non_fdo: report.frames_skipped_non_fdo(),
        frames_with_checksum_issues: report.frames_with_checksum_issues(),
        frames_scanned: report.frames_scanned(),
        frames_truncated: report.frames_truncated(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{encode_frame, FrameHeader};
    use crate::token::build_payload;

    const MINIMAL: &str = "start-stream <00x>\nend-stream <00x>";

    #[test]
    fn compile_minimal_stream() {
        assert_eq!(compile(MINIMAL).unwrap(), vec![0x00, 0x01, 0x00, 0x01, 0x01, 0x00, 0x00, 0x02, 0x01, 0x00]);
    }

    #[test]
    fn missing_end_marker_points_at_last_statement() {
        let err = compile("start-stream <00x>\nwait-on").unwrap_err();
        let d = err.diagnostic();
        assert_eq!(d.line, Some(2));
        assert_eq!(d.context[1], ">> 2 | wait-on");
    }

    #[test]
    fn decompile_reports_format() {
        let bytes = compile_with(MINIMAL, AtomDictionary::standard(), FormatVersion::Compact).unwrap();
        let out = decompile(&bytes).unwrap();
        assert_eq!(out.format, FormatVersion::Compact);
        assert_eq!(out.source_text, format!("{}\n", MINIMAL));
        assert_eq!(out.byte_length, bytes.len());
    }

    #[test]
    fn detection_serializes_uppercase_payload() {
        let fdo = compile(MINIMAL).unwrap();
        let frame = encode_frame(FrameHeader::data(1, 2), &build_payload("at", 9, &fdo).unwrap()).unwrap();
        let d = detect_frame(&frame);
        assert!(d.frame_valid && d.fdo_detected);
        assert_eq!(d.token.as_deref(), Some("at"));
        assert_eq!(d.atom_count, Some(2));
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["fdoPayload"], "0001000101000002 0100".replace(' ', ""));
        assert_eq!(json["packetType"], "DATA");
    }

    #[test]
    fn bad_checksum_is_not_a_valid_frame() {
        let fdo = compile(MINIMAL).unwrap();
        let mut frame = encode_frame(FrameHeader::data(1, 2), &build_payload("AT", 9, &fdo).unwrap()).unwrap();
        frame[9] ^= 0x01;
        let d = detect_frame(&frame);
        assert!(!d.frame_valid);
        assert_eq!(d.checksum_valid, Some(false));
        assert_eq!(d.error.as_deref(), Some("checksum mismatch"));
        assert_eq!(d.packet_type, Some(PacketType::Data));
    }

    #[test]
    fn detection_of_garbage() {
        let d = detect_frame(&[0x00, 0x01]);
        assert!(!d.frame_valid);
        assert!(d.error.is_some());
    }
}
