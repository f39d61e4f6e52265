//! Frame scanner fuzz target: the first byte picks a split point, the rest
//! is the capture. Chunked and whole-buffer scans must agree.
//! Build with: cargo fuzz run scan_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    use atomforge::frame::{scan_capture, FrameScanner, ScanConfig};
    let Some((&split, capture)) = data.split_first() else {
        return;
    };
    let split = (split as usize).min(capture.len());
    let config = ScanConfig::default();
    let (whole, whole_report) = scan_capture(capture, &config);
    let mut scanner = FrameScanner::new(config);
    let mut frames = scanner.feed(&capture[..split]);
    frames.extend(scanner.feed(&capture[split..]));
    let (rest, report) = scanner.finish();
    frames.extend(rest);
    assert_eq!(frames, whole);
    assert_eq!(report, whole_report);
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run scan_fuzz");
}
