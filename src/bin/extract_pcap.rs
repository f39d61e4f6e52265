//! Extract FDO payloads from P3 traffic in a pcap or pcapng capture.
//!
//! TCP segments are reassembled only by concatenation in capture order, one
//! [`FrameScanner`] per direction of each connection, so frames split across
//! segments are still found.

use anyhow::Context;
use atomforge::dictionary::AtomDictionary;
use atomforge::dump::{frame_summary, hex_dump};
use atomforge::frame::{ExtractionReport, FrameScanner, P3Frame, ScanConfig, DEFAULT_MAX_DATA_LEN};
use atomforge::hex;
use atomforge::logging::{init_logging, LogFormat, LogLevel};
use clap::Parser;
use pcap_parser::pcapng::Block as PcapNgBlock;
use pcap_parser::traits::{PcapNGPacketBlock, PcapReaderIterator};
use pcap_parser::{Linktype, PcapBlockOwned, PcapError};
use serde::Serialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "extract_pcap", version, about = "Extract FDO payloads from P3 traffic in a capture")]
struct Args {
    /// pcap or pcapng file.
    capture: PathBuf,
    /// Only segments to or from this TCP port.
    #[arg(long)]
    port: Option<u16>,
    /// FDO token (repeatable; default AT, at, At).
    #[arg(long = "token")]
    tokens: Vec<String>,
    #[arg(long, default_value_t = DEFAULT_MAX_DATA_LEN)]
    max_data_len: usize,
    /// Print every frame and a hex dump of each FDO payload.
    #[arg(short, long)]
    verbose: bool,
    /// Decompile each FDO payload.
    #[arg(long)]
    decompile: bool,
    #[arg(long)]
    json: bool,
    #[arg(long, default_value = "text")]
    log_format: LogFormat,
    #[arg(long, default_value = "warn")]
    log_level: LogLevel,
}

/// One direction of a TCP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct FlowKey {
    src: [u8; 4],
    dst: [u8; 4],
    src_port: u16,
    dst_port: u16,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct CaptureStats {
    packets: u64,
    tcp_segments: u64,
    flows: usize,
    #[serde(flatten)]
    frames: ExtractionReport,
    fdo_hex: Vec<String>,
}

struct Extractor<'a> {
    args: &'a Args,
    config: ScanConfig,
    flows: HashMap<FlowKey, FrameScanner>,
    stats: CaptureStats,
}

impl<'a> Extractor<'a> {
    fn new(args: &'a Args) -> Self {
        let mut config = ScanConfig { max_data_len: args.max_data_len, ..ScanConfig::default() };
        if !args.tokens.is_empty() {
            config.fdo_tokens = args.tokens.clone();
        }
        Extractor { args, config, flows: HashMap::new(), stats: CaptureStats::default() }
    }

    fn packet(&mut self, linktype: Linktype, data: &[u8]) {
        self.stats.packets += 1;
        let Some((key, payload)) = tcp_payload_from_linktype(linktype, data) else {
            return;
        };
        if let Some(port) = self.args.port {
            if key.src_port != port && key.dst_port != port {
                return;
            }
        }
        if payload.is_empty() {
            return;
        }
        self.stats.tcp_segments += 1;
        let config = &self.config;
        let scanner = self.flows.entry(key).or_insert_with(|| {
            debug!(?key, "new flow");
            FrameScanner::new(config.clone())
        });
        let frames = scanner.feed(payload);
        for frame in &frames {
            self.frame(frame);
        }
    }

    fn frame(&mut self, frame: &P3Frame) {
        if self.args.verbose && !self.args.json {
            println!("{}", frame_summary(frame));
        }
        if !frame.is_fdo() {
            return;
        }
        if self.args.verbose && !self.args.json {
            print!("{}", hex_dump(&frame.payload));
        }
        if self.args.decompile && !self.args.json {
            match atomforge::decompile_with(&frame.payload, AtomDictionary::standard()) {
                Ok(out) => print!("{}", out.source_text),
                Err(e) => println!("// {}", e),
            }
        }
        self.stats.fdo_hex.push(hex::encode_upper(&frame.payload));
    }

    fn finish(mut self) -> CaptureStats {
        self.stats.flows = self.flows.len();
        let mut report = ExtractionReport::default();
        let mut trailing = Vec::new();
        for (_, scanner) in self.flows.drain() {
            let (frames, flow_report) = scanner.finish();
            report.merge(&flow_report);
            trailing.extend(frames);
        }
        for frame in &trailing {
            self.frame(frame);
        }
        self.stats.frames = report;
        self.stats
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.log_format, args.log_level);

    let mut magic = [0u8; 4];
    File::open(&args.capture)
        .and_then(|mut f| f.read_exact(&mut magic))
        .with_context(|| format!("reading {}", args.capture.display()))?;
    let is_pcapng = magic == [0x0a, 0x0d, 0x0d, 0x0a];

    let mut extractor = Extractor::new(&args);
    let file = File::open(&args.capture)?;
    if is_pcapng {
        run_pcapng(file, &mut extractor)?;
    } else {
        run_legacy_pcap(file, &mut extractor)?;
    }
    let stats = extractor.finish();
    info!(packets = stats.packets, segments = stats.tcp_segments, "capture done");

    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }
    eprintln!("capture: {}", args.capture.display());
    eprintln!("packets: {}", stats.packets);
    eprintln!("tcp segments: {}  flows: {}", stats.tcp_segments, stats.flows);
    eprintln!("frames scanned: {}", stats.frames.frames_scanned());
    eprintln!("fdo frames: {}  bytes: {}", stats.frames.fdo_frames_found(), stats.frames.total_payload_bytes());
    eprintln!("non-fdo frames: {}", stats.frames.frames_skipped_non_fdo());
    eprintln!("checksum issues: {}", stats.frames.frames_with_checksum_issues());
    eprintln!("truncated: {}", stats.frames.frames_truncated());
    Ok(())
}

fn run_legacy_pcap<R: Read>(file: R, extractor: &mut Extractor<'_>) -> anyhow::Result<()> {
    let mut reader = pcap_parser::pcap::LegacyPcapReader::new(1 << 20, file)?;
    let mut linktype: Option<Linktype> = None;
    loop {
        match reader.next() {
            Ok((offset, block)) => {
                match block {
                    PcapBlockOwned::LegacyHeader(h) => linktype = Some(h.network),
                    PcapBlockOwned::Legacy(b) => extractor.packet(linktype.unwrap_or(Linktype(1)), b.data),
                    PcapBlockOwned::NG(_) => {}
                }
                reader.consume(offset);
            }
            Err(PcapError::Eof) => break,
            Err(PcapError::Incomplete(_)) => {
                reader.refill().map_err(|e| anyhow::anyhow!("pcap refill error: {:?}", e))?;
            }
            Err(e) => return Err(anyhow::anyhow!("pcap read error: {:?}", e)),
        }
    }
    Ok(())
}

fn run_pcapng<R: Read>(file: R, extractor: &mut Extractor<'_>) -> anyhow::Result<()> {
    let mut reader = pcap_parser::pcapng::PcapNGReader::new(1 << 20, file)?;
    let mut if_linktypes: Vec<Linktype> = Vec::new();
    loop {
        match reader.next() {
            Ok((offset, block)) => {
                if let PcapBlockOwned::NG(b) = block {
                    match &b {
                        PcapNgBlock::InterfaceDescription(idb) => if_linktypes.push(idb.linktype),
                        PcapNgBlock::EnhancedPacket(epb) => {
                            let lt = if_linktypes.get(epb.if_id as usize).copied().unwrap_or(Linktype(1));
                            extractor.packet(lt, epb.packet_data());
                        }
                        PcapNgBlock::SimplePacket(spb) => {
                            let lt = if_linktypes.first().copied().unwrap_or(Linktype(1));
                            extractor.packet(lt, spb.packet_data());
                        }
                        _ => {}
                    }
                }
                reader.consume(offset);
            }
            Err(PcapError::Eof) => break,
            Err(PcapError::Incomplete(_)) => {
                reader.refill().map_err(|e| anyhow::anyhow!("pcapng refill error: {:?}", e))?;
            }
            Err(e) => return Err(anyhow::anyhow!("pcapng read error: {:?}", e)),
        }
    }
    Ok(())
}

fn tcp_payload_from_linktype(linktype: Linktype, frame: &[u8]) -> Option<(FlowKey, &[u8])> {
    let l3 = match linktype.0 {
        1 => ethernet_l3(frame)?,
        101 => frame,
        113 => linux_sll_l3(frame)?,
        _ => return None,
    };
    ipv4_tcp_payload(l3)
}

fn ethernet_l3(frame: &[u8]) -> Option<&[u8]> {
    if frame.len() < 14 {
        return None;
    }
    let mut off = 12usize;
    let mut ethertype = u16::from_be_bytes([frame[off], frame[off + 1]]);
    off += 2;
    // 802.1Q / 802.1ad tags
    while ethertype == 0x8100 || ethertype == 0x88a8 {
        if frame.len() < off + 4 + 2 {
            return None;
        }
        off += 4;
        ethertype = u16::from_be_bytes([frame[off], frame[off + 1]]);
        off += 2;
    }
    match ethertype {
        0x0800 => Some(&frame[off..]),
        _ => None,
    }
}

fn linux_sll_l3(frame: &[u8]) -> Option<&[u8]> {
    if frame.len() < 16 {
        return None;
    }
    match u16::from_be_bytes([frame[14], frame[15]]) {
        0x0800 => Some(&frame[16..]),
        _ => None,
    }
}

/// TCP payload of an IPv4 packet, bounded by the IP total length so
/// Ethernet padding is not mistaken for data.
fn ipv4_tcp_payload(l3: &[u8]) -> Option<(FlowKey, &[u8])> {
    if l3.len() < 20 || l3[0] >> 4 != 4 {
        return None;
    }
    let ihl = (l3[0] & 0x0f) as usize * 4;
    if ihl < 20 || l3.len() < ihl {
        return None;
    }
    let total_len = u16::from_be_bytes([l3[2], l3[3]]) as usize;
    if total_len < ihl {
        return None;
    }
    let l3 = if total_len <= l3.len() { &l3[..total_len] } else { l3 };
    if l3[9] != 6 {
        return None;
    }
    let tcp = &l3[ihl..];
    if tcp.len() < 20 {
        return None;
    }
    let data_offset = (tcp[12] >> 4) as usize * 4;
    if data_offset < 20 || tcp.len() < data_offset {
        return None;
    }
    let key = FlowKey {
        src: [l3[12], l3[13], l3[14], l3[15]],
        dst: [l3[16], l3[17], l3[18], l3[19]],
        src_port: u16::from_be_bytes([tcp[0], tcp[1]]),
        dst_port: u16::from_be_bytes([tcp[2], tcp[3]]),
    };
    Some((key, &tcp[data_offset..]))
}
