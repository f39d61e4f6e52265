//! P3 frame scanning: find frames in a capture, check their CRC and pull
//! out FDO payloads.
//!
//! ```text
//! 0      sync 0x5A
//! 1..3   CRC-16/ARC over tx sequence..0x0D, big-endian ("**" = not checksummed)
//! 3..5   length = 3 + data length
//! 5      tx sequence
//! 6      rx sequence
//! 7      packet type (high bit: client-originated)
//! 8..    data
//! last   0x0D
//! ```
//!
//! The scanner never gives up on a buffer. A sync byte that does not start a
//! well-formed frame is skipped one byte at a time; a frame with a bad CRC
//! is counted and skipped whole.

use crate::ast::FormatVersion;
use crate::token::{parse_data_header, DataHeader, Token, DEFAULT_FDO_TOKENS, STREAM_ID_WIDTHS};
use byteorder::{BigEndian, ByteOrder};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

pub const SYNC: u8 = 0x5A;
pub const MESSAGE_END: u8 = 0x0D;
/// Stored in place of the CRC by senders that do not checksum.
pub const UNCHECKED: u16 = 0x2A2A;
/// Sync, CRC, length, sequences and type.
pub const HEADER_LEN: usize = 8;
/// Length field value of a frame with no data.
pub const MIN_LENGTH: usize = 3;
pub const DEFAULT_MAX_DATA_LEN: usize = 4096;
/// First byte covered by the CRC (tx sequence); coverage runs through 0x0D.
pub const CRC_START: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PacketType {
    Data,
    Ss,
    Ssr,
    Init,
    Ack,
    Nak,
    Heartbeat,
}

impl PacketType {
    pub fn from_byte(b: u8) -> Option<Self> {
        Some(match b & 0x7F {
            0x20 => PacketType::Data,
            0x21 => PacketType::Ss,
            0x22 => PacketType::Ssr,
            0x23 => PacketType::Init,
            0x24 => PacketType::Ack,
            0x25 => PacketType::Nak,
            0x26 => PacketType::Heartbeat,
            _ => return None,
        })
    }

    pub fn to_byte(self) -> u8 {
        match self {
            PacketType::Data => 0x20,
            PacketType::Ss => 0x21,
            PacketType::Ssr => 0x22,
            PacketType::Init => 0x23,
            PacketType::Ack => 0x24,
            PacketType::Nak => 0x25,
            PacketType::Heartbeat => 0x26,
        }
    }
}

/// CRC-16/ARC: reflected polynomial 0xA001, initial value 0.
pub fn crc16(bytes: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &b in bytes {
        crc ^= b as u16;
        for _ in 0..8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ 0xA001 } else { crc >> 1 };
        }
    }
    crc
}

/// Why the bytes at a sync position are not a frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("no sync byte")]
    NotSync,
    #[error("incomplete header: {available} of 8 bytes")]
    Incomplete { available: usize },
    #[error("unknown packet type 0x{0:02x}")]
    UnknownPacketType(u8),
    #[error("length field {0} is below the minimum of 3")]
    LengthTooSmall(usize),
    #[error("data length {len} exceeds the maximum of {max}")]
    LengthTooLarge { len: usize, max: usize },
    #[error("frame needs {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },
    #[error("expected 0x0d message end, found 0x{0:02x}")]
    MissingTerminator(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    Fdo,
    Other,
}

/// Scanner settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    /// DATA tokens whose payloads are FDO streams.
    pub fdo_tokens: Vec<String>,
    /// Largest data section accepted as a frame.
    pub max_data_len: usize,
    /// Treat "**" in the CRC field as valid.
    pub accept_unchecked: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            fdo_tokens: DEFAULT_FDO_TOKENS.iter().map(|t| t.to_string()).collect(),
            max_data_len: DEFAULT_MAX_DATA_LEN,
            accept_unchecked: true,
        }
    }
}

impl ScanConfig {
    /// Every known token counts as FDO.
    pub fn any_known_token() -> Self {
        ScanConfig { fdo_tokens: STREAM_ID_WIDTHS.iter().map(|(t, _)| t.to_string()).collect(), ..Self::default() }
    }

    fn is_fdo_token(&self, token: &Token) -> bool {
        token.as_str().map(|t| self.fdo_tokens.iter().any(|f| f == t)).unwrap_or(false)
    }
}

/// One frame found in a capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct P3Frame {
    /// Offset of the sync byte in the scanned stream.
    pub offset: usize,
    pub header: [u8; HEADER_LEN],
    pub packet_type: PacketType,
    pub client: bool,
    pub tx_seq: u8,
    pub rx_seq: u8,
    pub checksum: u32,
    /// False when the sender wrote "**" and unchecked frames are accepted.
    pub checksum_checked: bool,
    pub checksum_valid: bool,
    pub data: Vec<u8>,
    /// Token and stream id of a DATA frame with a known token.
    pub data_header: Option<DataHeader>,
    pub payload_kind: PayloadKind,
    /// Data after the token and stream id (all data when there is none).
    pub payload: Vec<u8>,
    /// Format of an FDO payload whose marker is recognized.
    pub format: Option<FormatVersion>,
}

impl P3Frame {
    /// Encoded length including the terminator.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.data.len() + 1
    }

    pub fn token(&self) -> Option<Token> {
        self.data_header.map(|h| h.token)
    }

    pub fn stream_id(&self) -> Option<u64> {
        self.data_header.map(|h| h.stream_id)
    }

    pub fn is_fdo(&self) -> bool {
        self.payload_kind == PayloadKind::Fdo
    }
}

/// Parse the frame at the start of `bytes`. The CRC is checked but a
/// mismatch is reported through `checksum_valid`, not as an error.
pub fn read_frame(bytes: &[u8], config: &ScanConfig) -> Result<P3Frame, FrameError> {
    if bytes.first() != Some(&SYNC) {
        return Err(FrameError::NotSync);
    }
    if bytes.len() < HEADER_LEN {
        return Err(FrameError::Incomplete { available: bytes.len() });
    }
    let packet_type = PacketType::from_byte(bytes[7]).ok_or(FrameError::UnknownPacketType(bytes[7]))?;
    let length = BigEndian::read_u16(&bytes[3..5]) as usize;
    if length < MIN_LENGTH {
        return Err(FrameError::LengthTooSmall(length));
    }
    let data_len = length - MIN_LENGTH;
    if data_len > config.max_data_len {
        return Err(FrameError::LengthTooLarge { len: data_len, max: config.max_data_len });
    }
    let data_end = HEADER_LEN + data_len;
    if bytes.len() <= data_end {
        return Err(FrameError::Truncated { needed: data_end + 1, available: bytes.len() });
    }
    if bytes[data_end] != MESSAGE_END {
        return Err(FrameError::MissingTerminator(bytes[data_end]));
    }

    let stored = BigEndian::read_u16(&bytes[1..3]);
    let (checksum_checked, checksum_valid) = if stored == UNCHECKED && config.accept_unchecked {
        (false, true)
    } else {
        (true, crc16(&bytes[CRC_START..=data_end]) == stored)
    };

    let mut header = [0u8; HEADER_LEN];
    header.copy_from_slice(&bytes[..HEADER_LEN]);
    let data = bytes[HEADER_LEN..data_end].to_vec();
    let data_header = match packet_type {
        PacketType::Data => parse_data_header(&data).ok(),
        _ => None,
    };
    let payload = data[data_header.map(|h| h.header_len).unwrap_or(0)..].to_vec();
    let payload_kind = match data_header {
        Some(h) if config.is_fdo_token(&h.token) && !payload.is_empty() => PayloadKind::Fdo,
        _ => PayloadKind::Other,
    };
    let format = match payload_kind {
        PayloadKind::Fdo => FormatVersion::detect(&payload),
        PayloadKind::Other => None,
    };

    Ok(P3Frame {
        offset: 0,
        header,
        packet_type,
        client: bytes[7] & 0x80 != 0,
        tx_seq: bytes[5],
        rx_seq: bytes[6],
        checksum: stored as u32,
        checksum_checked,
        checksum_valid,
        data,
        data_header,
        payload_kind,
        payload,
        format,
    })
}

/// Header fields for [`encode_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub packet_type: PacketType,
    pub client: bool,
    pub tx_seq: u8,
    pub rx_seq: u8,
    /// Write "**" instead of a CRC.
    pub unchecked: bool,
}

impl FrameHeader {
    pub fn data(tx_seq: u8, rx_seq: u8) -> Self {
        FrameHeader { packet_type: PacketType::Data, client: false, tx_seq, rx_seq, unchecked: false }
    }
}

/// Build a complete frame around `data`.
pub fn encode_frame(header: FrameHeader, data: &[u8]) -> Result<Vec<u8>, FrameError> {
    let max = u16::MAX as usize - MIN_LENGTH;
    if data.len() > max {
        return Err(FrameError::LengthTooLarge { len: data.len(), max });
    }
    let mut out = Vec::with_capacity(HEADER_LEN + data.len() + 1);
    out.extend_from_slice(&[SYNC, 0, 0, 0, 0]);
    BigEndian::write_u16(&mut out[3..5], (data.len() + MIN_LENGTH) as u16);
    out.push(header.tx_seq);
    out.push(header.rx_seq);
    out.push(header.packet_type.to_byte() | if header.client { 0x80 } else { 0 });
    out.extend_from_slice(data);
    out.push(MESSAGE_END);
    let crc = if header.unchecked { UNCHECKED } else { crc16(&out[CRC_START..]) };
    BigEndian::write_u16(&mut out[1..3], crc);
    Ok(out)
}

/// Scan counters. Only grow while scanning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionReport {
    frames_scanned: u32,
    fdo_frames_found: u32,
    total_payload_bytes: u64,
    frames_skipped_non_fdo: u32,
    frames_with_checksum_issues: u32,
    frames_truncated: u32,
}

impl ExtractionReport {
    pub fn frames_scanned(&self) -> u32 {
        self.frames_scanned
    }

    pub fn fdo_frames_found(&self) -> u32 {
        self.fdo_frames_found
    }

    pub fn total_payload_bytes(&self) -> u64 {
        self.total_payload_bytes
    }

    pub fn frames_skipped_non_fdo(&self) -> u32 {
        self.frames_skipped_non_fdo
    }

    pub fn frames_with_checksum_issues(&self) -> u32 {
        self.frames_with_checksum_issues
    }

    pub fn frames_truncated(&self) -> u32 {
        self.frames_truncated
    }

    /// Fold another report into this one.
    pub fn merge(&mut self, other: &ExtractionReport) {
        self.frames_scanned += other.frames_scanned;
        self.fdo_frames_found += other.fdo_frames_found;
        self.total_payload_bytes += other.total_payload_bytes;
        self.frames_skipped_non_fdo += other.frames_skipped_non_fdo;
        self.frames_with_checksum_issues += other.frames_with_checksum_issues;
        self.frames_truncated += other.frames_truncated;
    }
}

/// Incremental scanner. Bytes are fed in arbitrary chunks; a frame split
/// across chunks is emitted once its last byte arrives.
#[derive(Debug)]
pub struct FrameScanner {
    config: ScanConfig,
    buf: Vec<u8>,
    /// Stream offset of `buf[0]`.
    base: usize,
    report: ExtractionReport,
}

impl FrameScanner {
    pub fn new(config: ScanConfig) -> Self {
        FrameScanner { config, buf: Vec::new(), base: 0, report: ExtractionReport::default() }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn report(&self) -> &ExtractionReport {
        &self.report
    }

    /// Bytes held back waiting for the rest of a frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Append `chunk` and return the frames completed by it that passed
    /// the checksum.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<P3Frame> {
        self.buf.extend_from_slice(chunk);
        self.drain(false)
    }

    /// Flush the remaining bytes and return the final report.
    pub fn finish(mut self) -> (Vec<P3Frame>, ExtractionReport) {
        let frames = self.drain(true);
        (frames, self.report)
    }

    fn drain(&mut self, at_end: bool) -> Vec<P3Frame> {
        let mut frames = Vec::new();
        let mut pos = 0;
        let mut waiting = false;
        while let Some(i) = self.buf[pos..].iter().position(|&b| b == SYNC) {
            let start = pos + i;
            match read_frame(&self.buf[start..], &self.config) {
                Ok(mut frame) => {
                    frame.offset = self.base + start;
                    pos = start + frame.encoded_len();
                    if let Some(frame) = self.record(frame) {
                        frames.push(frame);
                    }
                }
                Err(FrameError::Incomplete { .. }) | Err(FrameError::Truncated { .. }) if !at_end => {
                    pos = start;
                    waiting = true;
                    break;
                }
                Err(e) => {
                    if let FrameError::Truncated { needed, available } = e {
                        self.report.frames_truncated += 1;
                        debug!(offset = self.base + start, needed, available, "truncated frame");
                    }
                    pos = start + 1;
                }
            }
        }
        // Without a pending frame the tail holds no sync byte and can go.
        if !waiting {
            pos = self.buf.len();
        }
        self.buf.drain(..pos);
        self.base += pos;
        frames
    }

    fn record(&mut self, frame: P3Frame) -> Option<P3Frame> {
        self.report.frames_scanned += 1;
        if !frame.checksum_valid {
            self.report.frames_with_checksum_issues += 1;
            debug!(offset = frame.offset, stored = frame.checksum, "checksum mismatch, frame skipped");
            return None;
        }
        match frame.payload_kind {
            PayloadKind::Fdo => {
                self.report.fdo_frames_found += 1;
                self.report.total_payload_bytes += frame.payload.len() as u64;
                debug!(offset = frame.offset, token = ?frame.token(), len = frame.payload.len(), "fdo frame");
            }
            PayloadKind::Other => {
                self.report.frames_skipped_non_fdo += 1;
                debug!(offset = frame.offset, packet_type = ?frame.packet_type, "non-fdo frame");
            }
        }
        Some(frame)
    }
}

/// Scan a whole capture held in memory.
pub fn scan_capture(bytes: &[u8], config: &ScanConfig) -> (Vec<P3Frame>, ExtractionReport) {
    let mut scanner = FrameScanner::new(config.clone());
    let mut frames = scanner.feed(bytes);
    let (rest, report) = scanner.finish();
    frames.extend(rest);
    (frames, report)
}
