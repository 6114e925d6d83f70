//! tar reading and writing on top of the `tar` crate.
//!
//! Reading parses one header at a time with a short-lived
//! [`tar::Archive`], so the cursor owns its input and can hand out data
//! readers without borrowing from a parser. Entry data and its padding
//! to the next 512-byte boundary are tracked here.

use std::io::{self, Read};

use tar::EntryType;

use super::filter::{DecodedInput, Encoder};
use super::{EntryCursor, FormatWriter};
use crate::codes::Format;
use crate::entry::{EntryHeader, EntryKind};
use crate::error::from_codec_io;
use crate::progress::{CancelToken, CancellableReader};
use crate::{Error, Result};

const BLOCK: u64 = 512;

fn padding(size: u64) -> u64 {
    (BLOCK - size % BLOCK) % BLOCK
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn header_of<R: Read>(entry: &tar::Entry<'_, R>) -> EntryHeader {
    let raw = entry.header();
    let entry_type = raw.entry_type();
    let kind = match entry_type {
        EntryType::Regular | EntryType::Continuous => EntryKind::File,
        EntryType::Directory => EntryKind::Directory,
        EntryType::Symlink => EntryKind::Symlink,
        EntryType::Link => EntryKind::Hardlink,
        _ => EntryKind::Other,
    };
    let default_mode = if kind == EntryKind::Directory { 0o755 } else { 0o644 };
    EntryHeader {
        pathname: lossy(&entry.path_bytes()),
        size: Some(entry.size()),
        mtime: raw.mtime().ok().and_then(|m| i64::try_from(m).ok()),
        mode: raw.mode().map(|m| m & 0o7777).unwrap_or(default_mode),
        kind,
        link_target: entry.link_name_bytes().map(|target| lossy(&target)),
        encrypted: false,
    }
}

/// Header cursor over tar input.
pub(crate) struct TarCursor {
    input: DecodedInput,
    remaining: u64,
    padding: u64,
    concatenated: bool,
    finished: bool,
}

impl TarCursor {
    /// With `concatenated`, zero blocks are skipped instead of ending the
    /// archive, so archives appended to each other read as one.
    pub(crate) fn new(input: DecodedInput, concatenated: bool) -> Self {
        Self {
            input,
            remaining: 0,
            padding: 0,
            concatenated,
            finished: false,
        }
    }

    fn parse_header(&mut self) -> Result<Option<(EntryHeader, bool)>> {
        let mut archive = tar::Archive::new(&mut self.input);
        archive.set_ignore_zeros(self.concatenated);
        let mut entries = archive
            .entries()
            .map_err(|e| from_codec_io("read_next_header", e))?;
        let next = entries.next();
        let parsed = match next {
            None => None,
            Some(Err(e)) => return Err(from_codec_io("read_next_header", e)),
            Some(Ok(entry)) => {
                let global = entry.header().entry_type() == EntryType::XGlobalHeader;
                Some((header_of(&entry), global))
            }
        };
        Ok(parsed)
    }
}

impl EntryCursor for TarCursor {
    fn next_header(&mut self) -> Result<Option<EntryHeader>> {
        loop {
            if self.finished {
                return Ok(None);
            }
            self.input
                .skip(self.remaining + self.padding)
                .map_err(|e| from_codec_io("skip_data", e))?;
            self.remaining = 0;
            self.padding = 0;

            let Some((header, global)) = self.parse_header()? else {
                self.finished = true;
                return Ok(None);
            };
            let size = header.size.unwrap_or(0);
            self.remaining = size;
            self.padding = padding(size);
            if global {
                log::trace!("skipping pax global header");
                continue;
            }
            log::trace!("tar header '{}' ({size} bytes)", header.pathname);
            return Ok(Some(header));
        }
    }

    fn data(&mut self) -> Result<Box<dyn Read + '_>> {
        Ok(Box::new(EntryData {
            input: &mut self.input,
            remaining: &mut self.remaining,
        }))
    }

    fn format(&self) -> Format {
        Format::Tar
    }
}

/// The unread data of the current tar entry.
struct EntryData<'a> {
    input: &'a mut DecodedInput,
    remaining: &'a mut u64,
}

impl Read for EntryData<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if *self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let max = buf.len().min(usize::try_from(*self.remaining).unwrap_or(usize::MAX));
        let n = self.input.read(&mut buf[..max])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "archive truncated inside entry data",
            ));
        }
        *self.remaining -= n as u64;
        Ok(n)
    }
}

/// Writes GNU tar entries through an encoder chain.
pub(crate) struct TarWriter {
    builder: tar::Builder<Box<dyn Encoder>>,
    block_size: usize,
    cancel: CancelToken,
}

impl TarWriter {
    pub(crate) fn new(chain: Box<dyn Encoder>, block_size: usize, cancel: CancelToken) -> Self {
        Self {
            builder: tar::Builder::new(chain),
            block_size,
            cancel,
        }
    }
}

impl FormatWriter for TarWriter {
    fn append(&mut self, header: &EntryHeader, data: &mut dyn Read) -> Result<u64> {
        let mut raw = tar::Header::new_gnu();
        raw.set_mode(header.mode);
        raw.set_mtime(header.mtime.unwrap_or(0).max(0).unsigned_abs());
        let path = header.pathname.as_str();

        match header.kind {
            EntryKind::Directory => {
                raw.set_entry_type(EntryType::Directory);
                raw.set_size(0);
                self.builder
                    .append_data(&mut raw, path, io::empty())
                    .map_err(|e| from_codec_io("write_header", e))?;
                Ok(0)
            }
            EntryKind::Symlink | EntryKind::Hardlink => {
                let target = header.link_target.as_deref().ok_or_else(|| {
                    Error::InvalidOption(format!("link entry '{path}' has no target"))
                })?;
                raw.set_entry_type(if header.kind == EntryKind::Symlink {
                    EntryType::Symlink
                } else {
                    EntryType::Link
                });
                raw.set_size(0);
                self.builder
                    .append_link(&mut raw, path, target)
                    .map_err(|e| from_codec_io("write_header", e))?;
                Ok(0)
            }
            EntryKind::File | EntryKind::Other => {
                let size = header.size.ok_or(Error::InvalidState(
                    "tar entries need their size before data",
                ))?;
                raw.set_entry_type(EntryType::Regular);
                raw.set_size(size);
                let mut limited = data.take(size);
                let mut reader =
                    CancellableReader::new(&mut limited, self.block_size, &self.cancel);
                self.builder
                    .append_data(&mut raw, path, &mut reader)
                    .map_err(|e| from_codec_io("write_data_block", e))?;
                if limited.limit() > 0 {
                    return Err(Error::codec(
                        "write_data_block",
                        format!("entry '{path}' ended before its declared size of {size} bytes"),
                    ));
                }
                Ok(size)
            }
        }
    }

    fn finish(self: Box<Self>) -> Result<()> {
        let chain = self
            .builder
            .into_inner()
            .map_err(|e| from_codec_io("write_trailer", e))?;
        chain.finish().map_err(|e| from_codec_io("close_filters", e))
    }

    fn format(&self) -> Format {
        Format::Tar
    }
}
