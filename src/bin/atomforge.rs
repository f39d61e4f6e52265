use anyhow::{bail, Context};
use atomforge::api::{self, Decompiled};
use atomforge::batch::{self, BatchConfig, SessionLog};
use atomforge::dictionary::AtomDictionary;
use atomforge::dump;
use atomforge::error::Diagnostic;
use atomforge::frame::{encode_frame, FrameHeader, PacketType, ScanConfig, DEFAULT_MAX_DATA_LEN};
use atomforge::hex;
use atomforge::lint::{lint, lint_fix, Severity};
use atomforge::logging::{init_logging, LogFormat, LogLevel};
use atomforge::token::build_payload;
use atomforge::FormatVersion;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "atomforge", version, about = "Atom stream compiler/decompiler and P3 FDO extractor")]
struct Cli {
    /// Print results as JSON.
    #[arg(long, global = true)]
    json: bool,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "warn", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile atom stream source to FDO bytes.
    Compile {
        /// Source file, or `-` for stdin.
        input: PathBuf,
        /// Write bytes here instead of printing hex.
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Emit the compact format.
        #[arg(long)]
        compact: bool,
    },
    /// Decompile FDO bytes to source.
    Decompile {
        input: PathBuf,
        /// Input is hex text rather than binary.
        #[arg(long)]
        hex: bool,
        /// List records with their offsets and bytes.
        #[arg(long)]
        records: bool,
    },
    /// Describe a single P3 frame given as hex.
    Detect {
        /// Frame hex, or `@path` to read it from a file.
        frame: String,
    },
    /// Scan a capture for P3 frames and extract FDO payloads.
    Extract {
        input: PathBuf,
        #[arg(long)]
        hex: bool,
        #[command(flatten)]
        scan: ScanArgs,
        /// Print one line per frame.
        #[arg(long)]
        frames: bool,
    },
    /// Decompile every frame of a JSON Lines session log.
    Batch {
        log: PathBuf,
        /// Worker threads (default: available cores).
        #[arg(long)]
        workers: Option<usize>,
        /// Also decode concatenated payloads per stream id.
        #[arg(long)]
        reassemble: bool,
        #[command(flatten)]
        scan: ScanArgs,
    },
    /// Check source layout.
    Lint {
        input: PathBuf,
        /// Rewrite the file in canonical layout.
        #[arg(long)]
        fix: bool,
    },
    /// Wrap FDO bytes (hex) in DATA frames.
    Wrap {
        /// FDO hex, or `@path`.
        fdo: String,
        #[arg(long, default_value = "AT")]
        token: String,
        #[arg(long, default_value_t = 0)]
        stream_id: u64,
        #[arg(long, default_value_t = 0x10)]
        tx: u8,
        #[arg(long, default_value_t = 0x10)]
        rx: u8,
        /// Mark as client-originated.
        #[arg(long)]
        client: bool,
        /// Write "**" instead of a CRC.
        #[arg(long)]
        unchecked: bool,
        /// Split into DATA payloads of at most LIMIT bytes, one frame each.
        #[arg(long, value_name = "LIMIT", num_args = 0..=1, default_missing_value = "119")]
        chunk: Option<usize>,
    },
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct WrappedFrame {
    hex: String,
    byte_length: usize,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    continuation: bool,
}

#[derive(Args, Debug)]
struct ScanArgs {
    /// FDO token (repeatable; default AT, at, At).
    #[arg(long = "token", value_name = "TOKEN")]
    tokens: Vec<String>,
    #[arg(long, default_value_t = DEFAULT_MAX_DATA_LEN)]
    max_data_len: usize,
    /// Treat "**" checksums as failures.
    #[arg(long)]
    strict_crc: bool,
}

impl ScanArgs {
    fn config(&self) -> ScanConfig {
        let mut config = ScanConfig {
            max_data_len: self.max_data_len,
            accept_unchecked: !self.strict_crc,
            ..ScanConfig::default()
        };
        if !self.tokens.is_empty() {
            config.fdo_tokens = self.tokens.clone();
        }
        config
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn read_input(path: &Path) -> anyhow::Result<Vec<u8>> {
    if path.as_os_str() == "-" {
        let mut buf = Vec::new();
        std::io::stdin().read_to_end(&mut buf).context("reading stdin")?;
        return Ok(buf);
    }
    std::fs::read(path).with_context(|| format!("reading {}", path.display()))
}

fn read_text(path: &Path) -> anyhow::Result<String> {
    String::from_utf8(read_input(path)?).with_context(|| format!("{} is not UTF-8", path.display()))
}

/// `@path` reads the argument from a file.
fn hex_arg(arg: &str) -> anyhow::Result<Vec<u8>> {
    let text = match arg.strip_prefix('@') {
        Some(path) => read_text(Path::new(path))?,
        None => arg.to_string(),
    };
    Ok(hex::decode(&text)?)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_diagnostic(d: &Diagnostic, json: bool) -> anyhow::Result<i32> {
    if json {
        print_json(d)?;
        return Ok(1);
    }
    match (d.line, d.column) {
        (Some(line), Some(col)) => eprintln!("error: {} (line {}, column {})", d.message, line, col),
        (Some(line), None) => eprintln!("error: {} (line {})", d.message, line),
        _ => eprintln!("error: {}", d.message),
    }
    for ctx in &d.context {
        eprintln!("  {}", ctx);
    }
    if let Some(hint) = &d.hint {
        eprintln!("hint: {}", hint);
    }
    Ok(1)
}

fn run(cli: Cli) -> anyhow::Result<i32> {
    let dict = AtomDictionary::standard();
    let json = cli.json;
    match cli.command {
        Command::Compile { input, output, compact } => {
            let source = read_text(&input)?;
            let format = if compact { FormatVersion::Compact } else { FormatVersion::Raw };
            let bytes = match api::compile_with(&source, dict, format) {
                Ok(b) => b,
                Err(e) => return print_diagnostic(&e.diagnostic(), json),
            };
            info!(bytes = bytes.len(), %format, "compiled {}", input.display());
            match output {
                Some(path) => std::fs::write(&path, &bytes).with_context(|| format!("writing {}", path.display()))?,
                None if json => print_json(&serde_json::json!({
                    "hex": hex::encode_upper(&bytes),
                    "byteLength": bytes.len(),
                    "format": format,
                }))?,
                None => println!("{}", hex::encode_upper(&bytes)),
            }
        }
        Command::Decompile { input, hex: is_hex, records } => {
            let raw = read_input(&input)?;
            let bytes = if is_hex {
                match hex::decode(&String::from_utf8_lossy(&raw)) {
                    Ok(b) => b,
                    Err(e) => return print_diagnostic(&Diagnostic::from(&e), json),
                }
            } else {
                raw
            };
            if records {
                match dump::record_dump(&bytes, dict) {
                    Ok(text) => print!("{}", text),
                    Err(e) => return print_diagnostic(&Diagnostic::from(&e), json),
                }
                return Ok(0);
            }
            let out: Decompiled = match api::decompile_with(&bytes, dict) {
                Ok(d) => d,
                Err(e) => return print_diagnostic(&e.diagnostic(), json),
            };
            if json {
                print_json(&out)?;
            } else {
                print!("{}", out.source_text);
            }
        }
        Command::Detect { frame } => {
            let bytes = hex_arg(&frame)?;
            let detection = api::detect_frame(&bytes);
            if json {
                print_json(&detection)?;
            } else if let Some(packet_type) = detection.packet_type {
                let checksum = if detection.checksum_valid == Some(true) { "ok" } else { "BAD" };
                println!("frame: {:?}, checksum {}", packet_type, checksum);
                if let (Some(token), Some(id)) = (&detection.token, detection.stream_id) {
                    println!("token: {} stream {}", token, id);
                }
                if let Some(payload) = &detection.fdo_payload {
                    println!("fdo: {} bytes", payload.len());
                    print!("{}", dump::hex_dump(payload));
                }
            } else {
                println!("not a frame: {}", detection.error.as_deref().unwrap_or("unknown"));
            }
            if !detection.frame_valid {
                return Ok(1);
            }
        }
        Command::Extract { input, hex: is_hex, scan, frames } => {
            let raw = read_input(&input)?;
            let bytes = if is_hex { hex::decode(&String::from_utf8_lossy(&raw))? } else { raw };
            let config = scan.config();
            if frames {
                let (found, _) = atomforge::scan_capture(&bytes, &config);
                for f in &found {
                    eprintln!("{}", dump::frame_summary(f));
                }
            }
            let extraction = api::extract_frames_with(&bytes, &config);
            if json {
                print_json(&extraction)?;
            } else {
                println!("{}", extraction.fdo_hex_concatenated);
                eprintln!(
                    "fdo frames: {}  bytes: {}  non-fdo: {}  checksum issues: {}  truncated: {}",
                    extraction.frames_found,
                    extraction.total_fdo_bytes,
                    extraction.frames_skipped_non_fdo,
                    extraction.frames_with_checksum_issues,
                    extraction.frames_truncated
                );
            }
        }
        Command::Batch { log, workers, reassemble, scan } => {
            let session = SessionLog::from_path(&log).with_context(|| format!("reading {}", log.display()))?;
            let mut config = BatchConfig { reassemble, scan: scan.config(), ..BatchConfig::default() };
            if let Some(w) = workers {
                config.workers = w;
            }
            let report = batch::process(&session, &config, dict);
            if json {
                print_json(&report)?;
            } else {
                for outcome in &report.outcomes {
                    if let batch::FrameOutcome::Decompiled { index, source_text, .. } = outcome {
                        println!("// frame {}", index);
                        print!("{}", source_text);
                    }
                }
                for stream in &report.streams {
                    println!("// stream {} ({} frames, {} bytes)", stream.stream_id, stream.frames, stream.byte_length);
                    match (&stream.source_text, &stream.diagnostic) {
                        (Some(text), _) => print!("{}", text),
                        (None, Some(d)) => println!("// {}", d.message),
                        (None, None) => {}
                    }
                }
                eprintln!(
                    concat!(
                        "frames: {}  decompiled: {}  decode failed: {}  no fdo: {}  ",
                        "invalid: {}  bad hex: {}  skipped lines: {}"
                    ),
                    report.frames_total,
                    report.decompiled,
                    report.decode_failed,
                    report.no_fdo,
                    report.invalid_frame,
                    report.invalid_hex,
                    report.skipped_lines
                );
            }
        }
        Command::Lint { input, fix } => {
            let source = read_text(&input)?;
            if fix {
                if input.as_os_str() == "-" {
                    bail!("--fix needs a file path");
                }
                std::fs::write(&input, lint_fix(&source, dict))?;
                return Ok(0);
            }
            let messages = lint(&source, dict);
            if json {
                print_json(&messages)?;
            } else {
                let mut stdout = std::io::stdout().lock();
                for m in &messages {
                    writeln!(stdout, "{}:{}:{}: {:?}: {}", input.display(), m.line, m.column, m.severity, m.message)?;
                }
            }
            if messages.iter().any(|m| m.severity == Severity::Error) {
                return Ok(1);
            }
        }
        Command::Wrap { fdo, token, stream_id, tx, rx, client, unchecked, chunk } => {
            let fdo = hex_arg(&fdo)?;
            let header = FrameHeader { packet_type: PacketType::Data, client, tx_seq: tx, rx_seq: rx, unchecked };
            let payloads = match chunk {
                Some(limit) => atomforge::chunk::chunk(&fdo, &token, stream_id, limit, dict)?
                    .into_iter()
                    .map(|c| (c.payload, c.continuation))
                    .collect(),
                None => vec![(build_payload(&token, stream_id, &fdo)?, false)],
            };
            let mut frames = Vec::with_capacity(payloads.len());
            for (payload, continuation) in payloads {
                let frame = encode_frame(header, &payload)?;
                frames.push(WrappedFrame { hex: hex::encode_upper(&frame), byte_length: frame.len(), continuation });
            }
            info!(frames = frames.len(), "wrapped");
            match frames.as_slice() {
                [single] if json && chunk.is_none() => print_json(single)?,
                all if json => print_json(&all)?,
                all => all.iter().for_each(|f| println!("{}", f.hex)),
            }
        }
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_compile_subcommand() {
        let cli = Cli::try_parse_from(["atomforge", "compile", "in.fdo", "--compact", "-o", "out.bin"])
            .expect("compile args should parse");
        assert!(matches!(cli.command, Command::Compile { compact: true, output: Some(_), .. }));
    }

    #[test]
    fn wrap_chunk_limit_is_optional() {
        let cli = Cli::try_parse_from(["atomforge", "wrap", "0001", "--chunk"]).expect("wrap args should parse");
        assert!(matches!(cli.command, Command::Wrap { chunk: Some(119), .. }));
        let cli = Cli::try_parse_from(["atomforge", "wrap", "0001", "--chunk", "64"]).expect("wrap args should parse");
        assert!(matches!(cli.command, Command::Wrap { chunk: Some(64), .. }));
        let cli = Cli::try_parse_from(["atomforge", "wrap", "0001"]).expect("wrap args should parse");
        assert!(matches!(cli.command, Command::Wrap { chunk: None, .. }));
    }

    #[test]
    fn scan_args_override_tokens() {
        let cli = Cli::try_parse_from(["atomforge", "extract", "cap.bin", "--token", "at", "--strict-crc"])
            .expect("extract args should parse");
        let Command::Extract { scan, .. } = cli.command else { panic!("expected extract") };
        let config = scan.config();
        assert_eq!(config.fdo_tokens, vec!["at".to_string()]);
        assert!(!config.accept_unchecked);
    }
}
