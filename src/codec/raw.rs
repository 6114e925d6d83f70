//! The raw pseudo-format: one unnamed entry with no container framing.

use std::io::{Read, Write};

use super::filter::{DecodedInput, Encoder};
use super::{EntryCursor, FormatWriter};
use crate::codes::Format;
use crate::entry::EntryHeader;
use crate::error::from_codec_io;
use crate::progress::{CancelToken, copy_blocks};
use crate::{Error, Result};

/// Pathname reported for the sole raw entry.
pub(crate) const RAW_ENTRY_NAME: &str = "data";

/// Cursor yielding the whole decoded input as a single entry.
pub(crate) struct RawCursor {
    input: DecodedInput,
    yielded: bool,
}

impl RawCursor {
    pub(crate) fn new(input: DecodedInput) -> Self {
        Self {
            input,
            yielded: false,
        }
    }
}

impl EntryCursor for RawCursor {
    fn next_header(&mut self) -> Result<Option<EntryHeader>> {
        if self.yielded {
            return Ok(None);
        }
        self.yielded = true;
        Ok(Some(EntryHeader::file(RAW_ENTRY_NAME)))
    }

    fn data(&mut self) -> Result<Box<dyn Read + '_>> {
        if !self.yielded {
            return Err(Error::InvalidState("no current entry"));
        }
        Ok(Box::new(&mut self.input))
    }

    fn format(&self) -> Format {
        Format::Raw
    }
}

/// Writes the data of a single entry through the filter chain.
pub(crate) struct RawWriter {
    chain: Box<dyn Encoder>,
    entries: usize,
    block_size: usize,
    cancel: CancelToken,
}

impl RawWriter {
    pub(crate) fn new(chain: Box<dyn Encoder>, block_size: usize, cancel: CancelToken) -> Self {
        Self {
            chain,
            entries: 0,
            block_size,
            cancel,
        }
    }

    fn claim_entry(&mut self, header: &EntryHeader) -> Result<()> {
        if self.entries > 0 {
            return Err(Error::unsupported(format!(
                "raw output holds a single entry, cannot add '{}'",
                header.pathname
            )));
        }
        if header.is_dir() {
            return Err(Error::unsupported("raw output cannot hold a directory"));
        }
        self.entries += 1;
        Ok(())
    }
}

impl FormatWriter for RawWriter {
    fn append(&mut self, header: &EntryHeader, data: &mut dyn Read) -> Result<u64> {
        self.claim_entry(header)?;
        copy_blocks(data, &mut self.chain, self.block_size, &self.cancel)
    }

    fn start_unsized(&mut self, header: &EntryHeader) -> Result<()> {
        self.claim_entry(header)
    }

    fn write_data(&mut self, data: &[u8]) -> Result<()> {
        if self.entries == 0 {
            return Err(Error::InvalidState("no unsized entry is open"));
        }
        self.chain
            .write_all(data)
            .map_err(|e| from_codec_io("write_data_block", e))
    }

    fn finish(self: Box<Self>) -> Result<()> {
        self.chain
            .finish()
            .map_err(|e| from_codec_io("close_filters", e))
    }

    fn format(&self) -> Format {
        Format::Raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{SharedStream, StreamBinding};
    use std::io::Cursor;

    #[test]
    fn test_single_entry() {
        let host = SharedStream::from_reader(Cursor::new(b"just bytes".to_vec()));
        let binding = StreamBinding::bind(host, 512).unwrap();
        let (input, _) = DecodedInput::open(binding, Some(&[])).unwrap();
        let mut cursor = RawCursor::new(input);
        assert!(cursor.data().is_err());
        let header = cursor.next_header().unwrap().unwrap();
        assert_eq!(header.pathname, RAW_ENTRY_NAME);
        assert_eq!(header.size, None);
        let mut text = String::new();
        cursor.data().unwrap().read_to_string(&mut text).unwrap();
        assert_eq!(text, "just bytes");
        assert!(cursor.next_header().unwrap().is_none());
    }
}
