//! P3 frame scanning: framing edge cases, chunked input, tokens and the
//! extraction counters.

use atomforge::frame::{
    crc16, encode_frame, read_frame, scan_capture, ExtractionReport, FrameError, FrameHeader, FrameScanner, PacketType,
    PayloadKind, ScanConfig, SYNC,
};
use atomforge::token::{build_payload, parse_data_header, Token, TokenError};
use atomforge::FormatVersion;

const FDO: [u8; 10] = [0x00, 0x01, 0x00, 0x01, 0x01, 0x00, 0x00, 0x02, 0x01, 0x00];

fn frame(token: &str, stream_id: u64, fdo: &[u8]) -> Vec<u8> {
    encode_frame(FrameHeader::data(0x10, 0x20), &build_payload(token, stream_id, fdo).unwrap()).unwrap()
}

fn capture() -> Vec<u8> {
    let mut c = Vec::new();
    c.extend(frame("AT", 0x0102, &FDO));
    c.extend(encode_frame(FrameHeader { packet_type: PacketType::Heartbeat, ..FrameHeader::data(1, 2) }, &[]).unwrap());
    c.extend([0x00, 0x5a, 0x5a, 0x13]);
    c.extend(frame("at", 0xdeadbeef, &FDO));
    c.extend(frame("At", 0x00abcdef, &[0x40, 0x01, 0x44]));
    c
}

#[test]
fn frame_layout_on_the_wire() {
    let bytes = frame("AT", 0x0201, &FDO);
    assert_eq!(bytes[0], SYNC);
    let length = u16::from_be_bytes([bytes[3], bytes[4]]) as usize;
    assert_eq!(length, 3 + 2 + 2 + FDO.len());
    assert_eq!(bytes.len(), 8 + length - 3 + 1);
    assert_eq!(&bytes[5..8], &[0x10, 0x20, 0x20]);
    assert_eq!(&bytes[8..12], b"AT\x01\x02");
    assert_eq!(*bytes.last().unwrap(), 0x0D);
    let crc = u16::from_be_bytes([bytes[1], bytes[2]]);
    assert_eq!(crc, crc16(&bytes[5..]));
}

#[test]
fn checksum_covers_sequence_through_terminator() {
    // Captured DATA frame: AT, stream 0x0102, minimal raw stream.
    let captured: [u8; 23] = [
        0x5a, 0x86, 0x3b, 0x00, 0x11, 0x10, 0x20, 0x20, 0x41, 0x54, 0x02, 0x01, 0x00, 0x01, 0x00, 0x01, 0x01, 0x00,
        0x00, 0x02, 0x01, 0x00, 0x0d,
    ];
    assert_eq!(frame("AT", 0x0102, &FDO), captured);
    let f = read_frame(&captured, &ScanConfig::default()).unwrap();
    assert!(f.checksum_checked);
    assert!(f.checksum_valid);
    let (frames, report) = scan_capture(&captured, &ScanConfig::default());
    assert_eq!(frames.len(), 1);
    assert_eq!(report.frames_with_checksum_issues(), 0);

    // The length field is outside the checksum.
    let mut shifted = captured.to_vec();
    let crc = crc16(&shifted[3..22]);
    shifted[1..3].copy_from_slice(&crc.to_be_bytes());
    assert!(!read_frame(&shifted, &ScanConfig::default()).unwrap().checksum_valid);
}

#[test]
fn single_byte_damage_never_hides_the_next_frame() {
    let damaged = frame("AT", 0x0102, &FDO);
    let next = frame("AT", 0x0304, &FDO);
    for pos in 0..damaged.len() {
        let mut capture = damaged.clone();
        capture[pos] ^= 0xff;
        capture.extend_from_slice(&next);
        let (frames, report) = scan_capture(&capture, &ScanConfig::default());
        // Sync, length, type and terminator damage breaks the framing: the
        // candidate is resynced past and never reaches the checksum.
        let (issues, truncated) = match pos {
            0 | 3 | 7 | 22 => (0, 0),
            // The low length byte now points past the end of the capture.
            4 => (0, 1),
            _ => (1, 0),
        };
        assert_eq!(report.fdo_frames_found(), 1, "byte {}", pos);
        assert_eq!(frames.last().and_then(|f| f.stream_id()), Some(0x0304), "byte {}", pos);
        assert_eq!(report.frames_with_checksum_issues(), issues, "byte {}", pos);
        assert_eq!(report.frames_truncated(), truncated, "byte {}", pos);
        assert_eq!(report.frames_scanned(), 1 + issues, "byte {}", pos);
    }
}

#[test]
fn client_bit_is_reported_and_masked() {
    let header = FrameHeader { client: true, ..FrameHeader::data(0, 0) };
    let bytes = encode_frame(header, &build_payload("AT", 1, &FDO).unwrap()).unwrap();
    assert_eq!(bytes[7], 0xA0);
    let f = read_frame(&bytes, &ScanConfig::default()).unwrap();
    assert!(f.client);
    assert_eq!(f.packet_type, PacketType::Data);
    assert!(f.is_fdo());
}

#[test]
fn stream_id_widths_follow_token() {
    for (token, width) in [("AT", 2), ("at", 4), ("At", 3)] {
        let data = build_payload(token, 1, &FDO).unwrap();
        let header = parse_data_header(&data).unwrap();
        assert_eq!(header.header_len, 2 + width, "token {}", token);
        assert_eq!(header.stream_id, 1);
        assert_eq!(header.token, Token::parse(token).unwrap());
    }
    assert!(matches!(build_payload("AT", 0x1_0000, &FDO), Err(TokenError::StreamIdOutOfRange { .. })));
    assert!(matches!(build_payload("A", 0, &FDO), Err(TokenError::InvalidToken(_))));
    assert!(matches!(parse_data_header(b"at\x01"), Err(TokenError::MissingStreamId { width: 4, .. })));
}

#[test]
fn scan_whole_capture() {
    let (frames, report) = scan_capture(&capture(), &ScanConfig::default());
    assert_eq!(frames.len(), 4);
    assert_eq!(report.frames_scanned(), 4);
    assert_eq!(report.fdo_frames_found(), 3);
    assert_eq!(report.frames_skipped_non_fdo(), 1);
    assert_eq!(report.total_payload_bytes(), (FDO.len() * 2 + 3) as u64);
    assert_eq!(frames[1].packet_type, PacketType::Heartbeat);
    assert_eq!(frames[1].payload_kind, PayloadKind::Other);
    assert_eq!(frames[2].stream_id(), Some(0xdeadbeef));
    assert_eq!(frames[3].format, Some(FormatVersion::Compact));
}

#[test]
fn chunk_boundaries_do_not_matter() {
    let bytes = capture();
    let (whole, whole_report) = scan_capture(&bytes, &ScanConfig::default());
    for size in [1, 2, 3, 7, 13, 64] {
        let mut scanner = FrameScanner::new(ScanConfig::default());
        let mut frames = Vec::new();
        for chunk in bytes.chunks(size) {
            frames.extend(scanner.feed(chunk));
        }
        let (rest, report) = scanner.finish();
        frames.extend(rest);
        assert_eq!(frames, whole, "chunk size {}", size);
        assert_eq!(report, whole_report, "chunk size {}", size);
    }
}

#[test]
fn offsets_are_absolute_across_chunks() {
    let bytes = capture();
    let mut scanner = FrameScanner::new(ScanConfig::default());
    let mut offsets = Vec::new();
    for chunk in bytes.chunks(5) {
        offsets.extend(scanner.feed(chunk).iter().map(|f| f.offset));
    }
    assert_eq!(offsets[0], 0);
    for &o in &offsets {
        assert_eq!(bytes[o], SYNC);
    }
}

#[test]
fn custom_token_set() {
    let config = ScanConfig { fdo_tokens: vec!["at".into()], ..ScanConfig::default() };
    let (_, report) = scan_capture(&capture(), &config);
    assert_eq!(report.fdo_frames_found(), 1);
    assert_eq!(report.frames_skipped_non_fdo(), 3);
}

#[test]
fn oversized_length_is_skipped() {
    let big = frame("AT", 1, &vec![0u8; 300]);
    let config = ScanConfig { max_data_len: 64, ..ScanConfig::default() };
    assert!(matches!(read_frame(&big, &config), Err(FrameError::LengthTooLarge { .. })));
    let mut bytes = big;
    bytes.extend(frame("AT", 2, &FDO));
    let (frames, report) = scan_capture(&bytes, &config);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].stream_id(), Some(2));
    assert_eq!(report.frames_scanned(), 1);
}

#[test]
fn length_below_minimum() {
    let mut bytes = frame("AT", 1, &FDO);
    bytes[3] = 0;
    bytes[4] = 2;
    assert_eq!(read_frame(&bytes, &ScanConfig::default()), Err(FrameError::LengthTooSmall(2)));
}

#[test]
fn capture_cut_mid_frame() {
    let mut bytes = frame("AT", 1, &FDO);
    let cut = frame("AT", 2, &FDO);
    bytes.extend_from_slice(&cut[..cut.len() - 4]);
    let mut scanner = FrameScanner::new(ScanConfig::default());
    assert_eq!(scanner.feed(&bytes).len(), 1);
    assert!(scanner.pending() > 0);
    let (rest, report) = scanner.finish();
    assert!(rest.is_empty());
    assert_eq!(report.frames_truncated(), 1);
    assert_eq!(report.fdo_frames_found(), 1);
}

#[test]
fn strict_checksums_reject_unchecked_frames() {
    let header = FrameHeader { unchecked: true, ..FrameHeader::data(0, 0) };
    let bytes = encode_frame(header, &build_payload("AT", 1, &FDO).unwrap()).unwrap();
    let (frames, report) = scan_capture(&bytes, &ScanConfig::default());
    assert_eq!(frames.len(), 1);
    assert_eq!(report.frames_with_checksum_issues(), 0);
    let strict = ScanConfig { accept_unchecked: false, ..ScanConfig::default() };
    let (frames, report) = scan_capture(&bytes, &strict);
    assert!(frames.is_empty());
    assert_eq!(report.frames_with_checksum_issues(), 1);
}

#[test]
fn reports_merge_and_serialize() {
    let (_, a) = scan_capture(&capture(), &ScanConfig::default());
    let mut total = ExtractionReport::default();
    total.merge(&a);
    total.merge(&a);
    assert_eq!(total.frames_scanned(), 2 * a.frames_scanned());
    let json = serde_json::to_value(&total).unwrap();
    assert_eq!(json["fdoFramesFound"], 6);
    assert_eq!(json["framesTruncated"], 0);
}
