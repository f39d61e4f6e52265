//! Parser fuzz target: arbitrary text must parse or fail with a located
//! error, never panic. Sources that parse are compiled as well.
//! Build with: cargo fuzz run parser_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    let Ok(src) = std::str::from_utf8(data) else {
        return;
    };
    match atomforge::parse(src) {
        Ok(_) => {
            let _ = atomforge::compile(src);
        }
        Err(e) => assert!(e.line >= 1 && e.column >= 1),
    }
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run parser_fuzz");
}
