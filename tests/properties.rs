//! Property tests over generated atom streams and arbitrary input bytes.

use atomforge::chunk::{chunk, join};
use atomforge::compact::{compact_raw, expand_to_raw};
use atomforge::dictionary::{ArgType, AtomDictionary, Signature, END_STREAM, START_STREAM};
use atomforge::frame::{scan_capture, FrameScanner, ScanConfig};
use atomforge::token::parse_data_header;
use atomforge::walk::summarize;
use atomforge::{hex, parse, render, Atom, AtomStream, Decoder, Encoder, FormatVersion, TypedValue};
use proptest::prelude::*;

fn arg_strategy(ty: ArgType) -> BoxedStrategy<TypedValue> {
    match ty {
        ArgType::Unsigned(w) => (0..=w.unsigned_max()).prop_map(TypedValue::Unsigned).boxed(),
        ArgType::Signed(w) => {
            let (min, max) = w.signed_range();
            (min..=max).prop_map(TypedValue::Signed).boxed()
        }
        ArgType::Enum8(_) => any::<u8>().prop_map(TypedValue::Enum8).boxed(),
        ArgType::Bytes(Some(n)) => prop::collection::vec(any::<u8>(), n).prop_map(TypedValue::Bytes).boxed(),
        // Past 127 bytes the length prefix takes two bytes.
        ArgType::Bytes(None) => prop::collection::vec(any::<u8>(), 0..200).prop_map(TypedValue::Bytes).boxed(),
        ArgType::Text => r#"[a-zA-Z0-9 "\\\n\t/<>,é]{0,30}"#.prop_map(TypedValue::Text).boxed(),
    }
}

fn atom_strategy() -> impl Strategy<Value = Atom> {
    let sigs: Vec<&'static Signature> = AtomDictionary::standard()
        .iter()
        .filter(|s| s.opcode != START_STREAM && s.opcode != END_STREAM)
        .collect();
    prop::sample::select(sigs).prop_flat_map(|sig| {
        let args: Vec<BoxedStrategy<TypedValue>> = sig.params.iter().map(|p| arg_strategy(p.ty)).collect();
        args.prop_map(move |args| Atom::new(sig, args))
    })
}

fn stream_strategy() -> impl Strategy<Value = AtomStream> {
    (any::<u8>(), prop::collection::vec(atom_strategy(), 0..24), any::<u8>()).prop_map(|(open, body, close)| {
        let dict = AtomDictionary::standard();
        let mut atoms = Vec::with_capacity(body.len() + 2);
        atoms.extend(Atom::named(dict, "start-stream", vec![TypedValue::Bytes(vec![open])]));
        atoms.extend(body);
        atoms.extend(Atom::named(dict, "end-stream", vec![TypedValue::Bytes(vec![close])]));
        AtomStream::new(FormatVersion::Raw, atoms)
    })
}

proptest! {
    #[test]
    fn raw_and_compact_decode_to_the_same_atoms(stream in stream_strategy()) {
        let dict = AtomDictionary::standard();
        let encoder = Encoder::new(dict);
        let decoder = Decoder::new(dict);
        let raw = encoder.encode(&stream).unwrap();
        let compact = encoder.encode(&stream.with_format(FormatVersion::Compact)).unwrap();

        let from_raw = decoder.decode(&raw).unwrap();
        let from_compact = decoder.decode(&compact).unwrap();
        prop_assert_eq!(from_raw.atoms(), stream.atoms());
        prop_assert_eq!(from_compact.atoms(), stream.atoms());
        prop_assert_eq!(from_compact.format(), FormatVersion::Compact);

        prop_assert_eq!(compact_raw(&raw, dict).unwrap(), compact.clone());
        prop_assert_eq!(expand_to_raw(&compact).unwrap(), raw.clone());
        prop_assert_eq!(summarize(&raw, dict).unwrap().records, stream.len());
        prop_assert_eq!(summarize(&compact, dict).unwrap().records, stream.len());
    }

    #[test]
    fn rendered_source_parses_back(stream in stream_strategy()) {
        let dict = AtomDictionary::standard();
        let text = render(&stream, dict);
        let reparsed = parse(&text).unwrap();
        prop_assert_eq!(reparsed.atoms(), stream.atoms());
        prop_assert_eq!(render(&reparsed, dict), text);
    }

    #[test]
    fn chunks_join_back_to_the_stream(stream in stream_strategy(), compact in any::<bool>(), limit in 8usize..160) {
        let dict = AtomDictionary::standard();
        let format = if compact { FormatVersion::Compact } else { FormatVersion::Raw };
        let fdo = Encoder::new(dict).encode(&stream.with_format(format)).unwrap();
        let chunks = chunk(&fdo, "AT", 5, limit, dict).unwrap();
        prop_assert!(chunks.iter().all(|c| c.payload.len() <= limit));
        let fragments: Vec<&[u8]> = chunks
            .iter()
            .map(|c| &c.payload[parse_data_header(&c.payload).unwrap().header_len..])
            .collect();
        prop_assert_eq!(join(fragments, dict), fdo);
    }

    #[test]
    fn hex_text_round_trips(bytes in prop::collection::vec(any::<u8>(), 1..64)) {
        prop_assert_eq!(hex::decode(&hex::encode_upper(&bytes)).unwrap(), bytes.clone());
        prop_assert_eq!(hex::decode(&hex::encode_lower(&bytes)).unwrap(), bytes);
    }

    #[test]
    fn decoder_rejects_garbage_without_panicking(
        marker in prop::sample::select(vec![[0x00u8, 0x01], [0x40, 0x01]]),
        body in prop::collection::vec(any::<u8>(), 0..128),
    ) {
        let mut bytes = marker.to_vec();
        bytes.extend(body);
        let dict = AtomDictionary::standard();
        let decoded = Decoder::new(dict).decode(&bytes);
        let walked = summarize(&bytes, dict);
        if let Ok(stream) = decoded {
            prop_assert_eq!(walked.map(|s| s.records), Ok(stream.len()));
        }
    }

    #[test]
    fn parser_never_panics(src in "\\PC{0,80}") {
        let _ = parse(&src);
    }

    #[test]
    fn scanner_ignores_chunking(bytes in prop::collection::vec(any::<u8>(), 0..256), split in 0usize..256) {
        let mut bytes = bytes;
        // Bias towards sync bytes so candidate frames are common.
        for b in bytes.iter_mut().step_by(7) {
            *b = 0x5A;
        }
        let split = split.min(bytes.len());
        let (whole, whole_report) = scan_capture(&bytes, &ScanConfig::default());
        let mut scanner = FrameScanner::new(ScanConfig::default());
        let mut frames = scanner.feed(&bytes[..split]);
        frames.extend(scanner.feed(&bytes[split..]));
        let (rest, report) = scanner.finish();
        frames.extend(rest);
        prop_assert_eq!(frames, whole);
        prop_assert_eq!(report, whole_report);
    }
}
