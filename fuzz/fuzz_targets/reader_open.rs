//! Fuzz target for ArchiveReader::open with arbitrary byte input.
//!
//! Exercises filter sniffing, format detection, header scanning and entry
//! data pulls with malformed or adversarial input, looking for panics,
//! hangs and unbounded allocation.
//!
//! Run with: cargo +nightly fuzz run reader_open

#![no_main]

use arcstream::{ArchiveReader, ReadOptions, Selector, SharedStream, list_entries};
use libfuzzer_sys::fuzz_target;
use std::io::{Cursor, Read};

fuzz_target!(|data: &[u8]| {
    let stream = SharedStream::from_reader(Cursor::new(data.to_vec()));
    let _ = list_entries(stream, &ReadOptions::default());

    // Stream the first entry through a small block size
    let stream = SharedStream::from_reader(Cursor::new(data.to_vec()));
    let options = ReadOptions::default().block_size(512);
    let Ok(mut reader) = ArchiveReader::new(stream, Selector::All, options) else {
        return;
    };
    if let Ok(mut entry) = reader.open() {
        let mut sink = [0u8; 4096];
        while let Ok(n) = entry.read(&mut sink) {
            if n == 0 {
                break;
            }
        }
    }
    let _ = reader.close();
});
