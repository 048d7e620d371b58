//! Fuzz target for the note parser.
//!
//! Run with: cargo +nightly fuzz run fuzz_note_parser
//!
//! Parsing never fails, so every input must produce a note whose link spans
//! lie inside the content.

#![no_main]

use std::path::Path;

use libfuzzer_sys::fuzz_target;
use touchlog_core::note;

fuzz_target!(|data: &[u8]| {
    if let Ok(content) = std::str::from_utf8(data) {
        let parsed = note::parse(Path::new("note/fuzz.Rmd"), content);
        for link in &parsed.links {
            assert!(link.span.start_byte <= link.span.end_byte);
            assert!(link.span.end_byte <= content.len());
        }
    }
});
