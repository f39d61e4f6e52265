//! Decoder fuzz target: arbitrary bytes after either format marker. A
//! stream that decodes must render to source that compiles back to a stream
//! decoding to the same atoms.
//! Build with: cargo fuzz run decode_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    use atomforge::{render, AtomDictionary, Decoder};
    let dict = AtomDictionary::standard();
    let Ok(stream) = Decoder::new(dict).decode(data) else {
        return;
    };
    let text = render(&stream, dict);
    let reparsed = atomforge::parse(&text).expect("rendered source must parse");
    assert_eq!(reparsed.atoms(), stream.atoms());
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run decode_fuzz");
}
