//! Fuzz target for the search query parser.
//!
//! Run with: cargo +nightly fuzz run fuzz_query_parser

#![no_main]

use libfuzzer_sys::fuzz_target;
use touchlog_core::query::SearchQuery;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data)
        && let Ok(query) = SearchQuery::parse(s)
    {
        assert!(query.limit != Some(0));
    }
});
