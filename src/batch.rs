//! Batch decompilation of captured session logs.
//!
//! A session log is JSON Lines, one captured frame per line:
//!
//! ```text
//! {"ts": 1759028162.441, "fullHex": "5A...0D", "token": "AT", "dir": "in"}
//! ```
//!
//! Frames are processed oldest first on scoped worker threads. Each worker
//! owns a contiguous slice of the log and returns its outcomes in order;
//! the slices are concatenated and the counts reduced afterwards, so no
//! accumulator is shared between threads.

use crate::chunk;
use crate::codec::Decoder;
use crate::dictionary::AtomDictionary;
use crate::error::Diagnostic;
use crate::frame::{read_frame, ScanConfig};
use crate::hex;
use crate::printer::Printer;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use tracing::{debug, info, warn};

/// Capture time as written by the logger: a number or a numeric string.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Timestamp {
    Number(f64),
    Text(String),
}

impl Timestamp {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Timestamp::Number(n) => Some(*n),
            Timestamp::Text(s) => s.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    #[serde(default)]
    pub ts: Option<Timestamp>,
    pub full_hex: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub dir: Option<String>,
}

impl SessionRecord {
    fn time(&self) -> f64 {
        self.ts.as_ref().and_then(Timestamp::as_f64).unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionLog {
    pub records: Vec<SessionRecord>,
    /// Lines that were not valid records.
    pub skipped_lines: usize,
}

impl SessionLog {
    pub fn from_reader<R: BufRead>(reader: R) -> io::Result<Self> {
        let mut log = SessionLog::default();
        for (n, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<SessionRecord>(line) {
                Ok(record) if record.full_hex.trim().is_empty() => {
                    warn!(line = n + 1, "record without fullHex skipped");
                    log.skipped_lines += 1;
                }
                Ok(record) => log.records.push(record),
                Err(e) => {
                    warn!(line = n + 1, error = %e, "unparseable session log line skipped");
                    log.skipped_lines += 1;
                }
            }
        }
        Ok(log)
    }

    pub fn from_path(path: &Path) -> io::Result<Self> {
        Self::from_reader(BufReader::new(File::open(path)?))
    }

    pub fn parse(text: &str) -> Self {
        // Reading from memory cannot fail.
        Self::from_reader(text.as_bytes()).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Order {
    OldestFirst,
    NewestFirst,
}

/// Order of a log judged from its first and last timestamps.
pub fn detect_order(records: &[SessionRecord]) -> Order {
    match (records.first(), records.last()) {
        (Some(first), Some(last)) if first.time() > last.time() => Order::NewestFirst,
        _ => Order::OldestFirst,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    pub workers: usize,
    /// Also decode the concatenated payloads of each stream id.
    pub reassemble: bool,
    pub scan: ScanConfig,
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfig {
            workers: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            reassemble: false,
            scan: ScanConfig::default(),
        }
    }
}

/// Result for one frame; `index` is the position in processing order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum FrameOutcome {
    #[serde(rename_all = "camelCase")]
    Decompiled {
        index: usize,
        token: Option<String>,
        stream_id: Option<u64>,
        byte_length: usize,
        source_text: String,
    },
    #[serde(rename_all = "camelCase")]
    DecodeFailed { index: usize, stream_id: Option<u64>, diagnostic: Diagnostic },
    #[serde(rename_all = "camelCase")]
    NoFdo { index: usize, token: Option<String> },
    #[serde(rename_all = "camelCase")]
    InvalidFrame { index: usize, reason: String },
    #[serde(rename_all = "camelCase")]
    InvalidHex { index: usize, diagnostic: Diagnostic },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReassembledStream {
    pub stream_id: u64,
    pub frames: usize,
    pub byte_length: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<Diagnostic>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub order: Order,
    pub frames_total: usize,
    pub decompiled: usize,
    pub decode_failed: usize,
    pub no_fdo: usize,
    pub invalid_frame: usize,
    pub invalid_hex: usize,
    pub skipped_lines: usize,
    pub outcomes: Vec<FrameOutcome>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub streams: Vec<ReassembledStream>,
}

struct FrameWork {
    outcome: FrameOutcome,
    fdo: Option<(u64, Vec<u8>)>,
}

pub fn process(log: &SessionLog, config: &BatchConfig, dict: &AtomDictionary) -> BatchReport {
    let order = detect_order(&log.records);
    let mut frames: Vec<&SessionRecord> = log.records.iter().collect();
    if order == Order::NewestFirst {
        frames.reverse();
    }
    let workers = config.workers.clamp(1, frames.len().max(1));
    let chunk = frames.len().div_ceil(workers).max(1);
    debug!(frames = frames.len(), workers, chunk, ?order, "batch start");

    let work: Vec<FrameWork> = std::thread::scope(|s| {
        let handles: Vec<_> = frames
            .chunks(chunk)
            .enumerate()
            .map(|(c, part)| {
                let scan = &config.scan;
                s.spawn(move || {
                    part.iter()
                        .enumerate()
                        .map(|(i, record)| process_frame(c * chunk + i, record, scan, dict))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
            .collect()
    });

    let streams = if config.reassemble { reassemble(&work, dict) } else { Vec::new() };
    let mut report = BatchReport {
        order,
        frames_total: work.len(),
        decompiled: 0,
        decode_failed: 0,
        no_fdo: 0,
        invalid_frame: 0,
        invalid_hex: 0,
        skipped_lines: log.skipped_lines,
        outcomes: Vec::with_capacity(work.len()),
        streams,
    };
    for w in work {
        match w.outcome {
            FrameOutcome::Decompiled { .. } => report.decompiled += 1,
            FrameOutcome::DecodeFailed { .. } => report.decode_failed += 1,
            FrameOutcome::NoFdo { .. } => report.no_fdo += 1,
            FrameOutcome::InvalidFrame { .. } => report.invalid_frame += 1,
            FrameOutcome::InvalidHex { .. } => report.invalid_hex += 1,
        }
        report.outcomes.push(w.outcome);
    }
    info!(
        total = report.frames_total,
        decompiled = report.decompiled,
        failed = report.decode_failed,
        "batch complete"
    );
    report
}

fn process_frame(index: usize, record: &SessionRecord, scan: &ScanConfig, dict: &AtomDictionary) -> FrameWork {
    let outcome = |outcome| FrameWork { outcome, fdo: None };
    let bytes = match hex::decode(&record.full_hex) {
        Ok(b) => b,
        Err(e) => return outcome(FrameOutcome::InvalidHex { index, diagnostic: (&e).into() }),
    };
    let frame = match read_frame(&bytes, scan) {
        Ok(f) => f,
        Err(e) => return outcome(FrameOutcome::InvalidFrame { index, reason: e.to_string() }),
    };
    if !frame.checksum_valid {
        return outcome(FrameOutcome::InvalidFrame { index, reason: "checksum mismatch".into() });
    }
    let token = frame.token().map(|t| t.to_string()).or_else(|| record.token.clone());
    if !frame.is_fdo() {
        return outcome(FrameOutcome::NoFdo { index, token });
    }
    let stream_id = frame.stream_id();
    let result = match Decoder::new(dict).decode(&frame.payload) {
        Ok(stream) => FrameOutcome::Decompiled {
            index,
            token,
            stream_id,
            byte_length: frame.payload.len(),
            source_text: Printer::new(dict).render(&stream),
        },
        Err(e) => {
            debug!(index, error = %e, "frame payload did not decode");
            FrameOutcome::DecodeFailed { index, stream_id, diagnostic: (&e).into() }
        }
    };
    FrameWork { outcome: result, fdo: stream_id.map(|id| (id, frame.payload)) }
}

/// Join payloads per stream id in processing order and decode each.
/// Continuation bytes written by [`chunk`](crate::chunk::chunk) are stripped.
fn reassemble(work: &[FrameWork], dict: &AtomDictionary) -> Vec<ReassembledStream> {
    let mut order: Vec<u64> = Vec::new();
    let mut parts: HashMap<u64, Vec<&[u8]>> = HashMap::new();
    for (id, payload) in work.iter().filter_map(|w| w.fdo.as_ref()) {
        parts
            .entry(*id)
            .or_insert_with(|| {
                order.push(*id);
                Vec::new()
            })
            .push(payload.as_slice());
    }
    order
        .into_iter()
        .filter_map(|id| parts.remove(&id).map(|p| (id, p)))
        .map(|(stream_id, fragments)| {
            let frames = fragments.len();
            let bytes = chunk::join(fragments, dict);
            let decoded = Decoder::new(dict).decode(&bytes);
            ReassembledStream {
                stream_id,
                frames,
                byte_length: bytes.len(),
                source_text: decoded.as_ref().ok().map(|s| Printer::new(dict).render(s)),
                diagnostic: decoded.as_ref().err().map(Diagnostic::from),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_accept_numbers_and_strings() {
        let log = SessionLog::parse(
            "{\"ts\": 2.5, \"fullHex\": \"00\"}\n{\"ts\": \"1.759028162441E9\", \"fullHex\": \"00\"}\n",
        );
        assert_eq!(log.records[0].time(), 2.5);
        assert_eq!(log.records[1].time(), 1_759_028_162.441);
    }

    #[test]
    fn bad_lines_are_counted() {
        let log = SessionLog::parse("not json\n\n{\"fullHex\": \"\"}\n{\"fullHex\": \"5a\"}\n");
        assert_eq!(log.records.len(), 1);
        assert_eq!(log.skipped_lines, 2);
    }

    #[test]
    fn order_from_first_and_last() {
        let log = SessionLog::parse("{\"ts\": 9, \"fullHex\": \"00\"}\n{\"ts\": 3, \"fullHex\": \"00\"}\n");
        assert_eq!(detect_order(&log.records), Order::NewestFirst);
        assert_eq!(detect_order(&[]), Order::OldestFirst);
    }

    #[test]
    fn invalid_hex_outcome() {
        let log = SessionLog::parse("{\"fullHex\": \"5a0\"}\n");
        let report = process(&log, &BatchConfig::default(), AtomDictionary::standard());
        assert_eq!(report.invalid_hex, 1);
        assert!(matches!(report.outcomes[0], FrameOutcome::InvalidHex { index: 0, .. }));
    }
}
