//! # atomforge: atom stream DSL compiler/decompiler and P3 FDO extractor
//!
//! Converts between line-oriented atom stream source and FDO binaries, and
//! finds FDO payloads inside captured P3 traffic.
//!
//! ## Pipeline
//!
//! - **Compile**: [`parser`] → [`codec::Encoder`] → bytes (Raw or Compact)
//! - **Decompile**: bytes → [`codec::Decoder`] → [`printer`] → source
//! - **Detect / extract**: bytes → [`frame`] scanner → FDO payloads and counters
//! - **Batch**: session logs (JSON Lines) → [`batch`] workers → per-frame outcomes
//! - **Chunk**: bytes → [`chunk`] → DATA payloads that fit one frame each
//!
//! ## Source format
//!
//! ```text
//! <<<<< GID: 32-105 >>>>>
//! start-stream <00x>
//!   start-object <independent, "Welcome">
//!     orientation <vff>
//!     width <320>
//!   end-object <>
//! end-stream <00x>
//! ```
//!
//! Hex byte strings end in `x`, text is quoted, integers are decimal (or
//! hex), enumerated arguments take a constant name.
//!
//! ## Binary formats
//!
//! - **Raw** (`00 01`): opcode `u16`, argument count, arguments at their
//!   declared widths.
//! - **Compact** (`40 01`): the same records with compressed headers; see
//!   [`compact`].
//!
//! The dictionary is built once and shared read-only; every operation in
//! [`api`] is a pure function of its input.

pub mod api;
pub mod ast;
pub mod batch;
pub mod chunk;
pub mod codec;
pub mod compact;
pub mod dictionary;
pub mod dump;
pub mod error;
pub mod frame;
pub mod hex;
pub mod lint;
#[cfg(feature = "cli")]
pub mod logging;
pub mod parser;
pub mod printer;
pub mod token;
pub mod value;
pub mod walk;

pub use api::{
    compile, compile_with, decompile, decompile_hex, decompile_with, detect_frame, detect_frame_with, extract_frames,
    extract_frames_with, Decompiled, FrameDetection, FrameExtraction,
};
pub use ast::{Atom, AtomStream, FormatVersion};
pub use codec::{DecodeError, Decoder, EncodeError, Encoder};
pub use dictionary::{AtomDictionary, Signature};
pub use error::{CompileError, DecompileError, Diagnostic, ErrorKind};
pub use frame::{scan_capture, ExtractionReport, FrameScanner, P3Frame, ScanConfig};
pub use parser::{parse, parse_with, ParseError};
pub use printer::render;
pub use value::TypedValue;
pub use walk::BinaryWalker;
