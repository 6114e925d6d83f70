//! Fuzz target for option-string parsing.
//!
//! Run with: cargo +nightly fuzz run option_string

#![no_main]

use arcstream::{Filter, OptionString};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(parsed) = text.parse::<OptionString>() {
        for filter in [Filter::Gzip, Filter::Zstd, Filter::Lz4] {
            let _ = parsed.compression_level(filter);
        }
        let _ = parsed.value("zip", "compression");
        let _ = parsed.is_enabled("tar", "read_concatenated_archives");
    }
});
