//! Format and filter backends.
//!
//! This module provides the abstraction layer between sessions and the
//! codec crates: [`EntryCursor`] walks the headers of an archive being
//! read, [`FormatWriter`] emits entries into an archive being written, and
//! [`filter`] wraps either side in compression stages.

pub(crate) mod detect;
pub(crate) mod filter;
pub(crate) mod raw;
pub(crate) mod tar;

#[cfg(feature = "zip")]
pub(crate) mod zip;

use std::fs::File;
use std::io::Read;

use crate::codes::{Filter, Format};
use crate::entry::EntryHeader;
use crate::error::from_codec_io;
use crate::options::{OptionString, WriteOptions};
use crate::{Error, Result};

use self::detect::{Detected, PROBE_LEN, detect_format};
use self::filter::{DecodedInput, FileSink, encoder_chain};

/// Walks the entries of an archive in encounter order.
pub(crate) trait EntryCursor {
    /// Advances to the next header, discarding unread data of the current
    /// entry. Returns `None` at the end of the archive.
    fn next_header(&mut self) -> Result<Option<EntryHeader>>;

    /// Reader over the data of the entry returned by the last
    /// [`next_header`](Self::next_header) call.
    fn data(&mut self) -> Result<Box<dyn Read + '_>>;

    /// The format being read.
    fn format(&self) -> Format;
}

/// Emits entries into an archive being written.
pub(crate) trait FormatWriter {
    /// Writes one entry whose header carries its final size.
    ///
    /// `data` must supply exactly the declared size for regular files.
    fn append(&mut self, header: &EntryHeader, data: &mut dyn Read) -> Result<u64>;

    /// Starts an entry whose size is not known yet; data follows through
    /// [`write_data`](Self::write_data).
    fn start_unsized(&mut self, header: &EntryHeader) -> Result<()> {
        let _ = header;
        Err(Error::unsupported(format!(
            "format '{}' needs the entry size before its data",
            self.format()
        )))
    }

    /// Appends data to the entry opened by [`start_unsized`](Self::start_unsized).
    fn write_data(&mut self, data: &[u8]) -> Result<()> {
        let _ = data;
        Err(Error::InvalidState("no unsized entry is open"))
    }

    /// Writes the archive trailer and finishes every filter.
    fn finish(self: Box<Self>) -> Result<()>;

    /// The format being written.
    fn format(&self) -> Format;
}

/// Cursor for an input with no bytes at all.
pub(crate) struct EmptyCursor;

impl EntryCursor for EmptyCursor {
    fn next_header(&mut self) -> Result<Option<EntryHeader>> {
        Ok(None)
    }

    fn data(&mut self) -> Result<Box<dyn Read + '_>> {
        Err(Error::InvalidState("archive has no entries"))
    }

    fn format(&self) -> Format {
        Format::Raw
    }
}

/// How a read session wants its input interpreted.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CursorRequest<'a> {
    pub(crate) format: Option<Format>,
    pub(crate) raw: bool,
    pub(crate) options: &'a OptionString,
    pub(crate) passphrase: Option<&'a str>,
}

/// Negotiates the format of `input` and opens a cursor over it.
///
/// Unrecognized bytes inside at least one filter are read as a raw
/// stream; unrecognized bytes without any filter are an invalid archive.
pub(crate) fn open_cursor(
    mut input: DecodedInput,
    applied: &[Filter],
    request: CursorRequest<'_>,
) -> Result<Box<dyn EntryCursor>> {
    let format = match request.format {
        Some(format) => format,
        None if request.raw => Format::Raw,
        None => {
            let head = input
                .peek(PROBE_LEN)
                .map_err(|e| from_codec_io("read_format_signature", e))?;
            match detect_format(head) {
                Detected::Empty => {
                    log::debug!("input is empty");
                    return Ok(Box::new(EmptyCursor));
                }
                Detected::Format(format) => {
                    format.ensure_supported()?;
                    format
                }
                Detected::Unknown if !applied.is_empty() => {
                    log::debug!("no container inside the filter chain, reading raw");
                    Format::Raw
                }
                Detected::Unknown => {
                    if let Some(filter) = filter::sniff_filter(head) {
                        filter.ensure_supported()?;
                    }
                    return Err(Error::InvalidFormat(
                        "unrecognized archive format".to_string(),
                    ));
                }
            }
        }
    };
    log::debug!("reading {format} archive");

    if request.passphrase.is_some() && format != Format::Zip {
        log::debug!("passphrase ignored for {format} input");
    }
    match format {
        Format::Tar => {
            let concatenated = request.options.is_enabled("tar", "read_concatenated_archives");
            Ok(Box::new(tar::TarCursor::new(input, concatenated)))
        }
        Format::Raw => Ok(Box::new(raw::RawCursor::new(input))),
        #[cfg(feature = "zip")]
        Format::Zip => Ok(Box::new(zip::ZipCursor::new(
            input,
            request.passphrase.map(str::to_string),
        )?)),
        other => Err(Error::unsupported(format!(
            "format '{other}' is not available in this build"
        ))),
    }
}

/// Opens the format writer for a validated write session.
pub(crate) fn create_writer(
    file: File,
    options: &WriteOptions,
    parsed: &OptionString,
) -> Result<Box<dyn FormatWriter>> {
    let cancel = options.cancel.clone();
    match options.format {
        Format::Tar => {
            let chain = encoder_chain(Box::new(FileSink::new(file)), &options.filters, parsed)?;
            Ok(Box::new(tar::TarWriter::new(chain, options.block_size, cancel)))
        }
        Format::Raw => {
            let chain = encoder_chain(Box::new(FileSink::new(file)), &options.filters, parsed)?;
            Ok(Box::new(raw::RawWriter::new(chain, options.block_size, cancel)))
        }
        #[cfg(feature = "zip")]
        Format::Zip => {
            let settings =
                zip::EntrySettings::from_options(parsed, options.passphrase.is_some())?;
            Ok(Box::new(zip::ZipBackend::new(
                file,
                settings,
                options.passphrase.clone(),
                options.block_size,
                cancel,
            )))
        }
        other => Err(Error::unsupported(format!(
            "format '{other}' is not available in this build"
        ))),
    }
}
