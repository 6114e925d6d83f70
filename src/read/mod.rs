//! Streaming reads of a single archive entry.
//!
//! An [`ArchiveReader`] is a session over one source. Opening it binds the
//! source, peels the filter chain, negotiates the format and scans headers
//! until the [`Selector`] matches; the matched entry's data is then read
//! through the returned [`EntryStream`] in order, with bounded memory.
//!
//! # Example
//!
//! ```rust,no_run
//! use arcstream::{ArchiveReader, ReadOptions, Selector};
//! use std::io::Read;
//!
//! let mut reader = ArchiveReader::new(
//!     "bundle.tar.gz",
//!     Selector::by_name("config/app.toml"),
//!     ReadOptions::default(),
//! )?;
//! let mut text = String::new();
//! reader.open()?.read_to_string(&mut text)?;
//! reader.close()?;
//! # Ok::<(), arcstream::Error>(())
//! ```

mod extract;

pub use extract::extract_entries;

use std::fmt;
use std::io::{self, BufRead, Read};
use std::path::{Path, PathBuf};

use crate::buffer::ByteBuffer;
use crate::codec::filter::DecodedInput;
use crate::codec::{CursorRequest, EntryCursor, open_cursor};
use crate::codes::{Filter, Format};
use crate::entry::{EntryHeader, EntryInfo};
use crate::error::from_codec_io;
use crate::options::{OptionString, ReadOptions};
use crate::progress::CancelToken;
use crate::selector::Selector;
use crate::stream::{CloseHandle, SharedStream, StreamBinding};
use crate::{Error, Result};

/// Where a session reads its bytes from.
#[derive(Debug, Clone)]
pub enum Source {
    /// A file, opened anew by every session.
    Path(PathBuf),
    /// A host stream shared with the caller.
    Stream(SharedStream),
}

impl Source {
    fn host(&self) -> SharedStream {
        match self {
            Source::Path(path) => SharedStream::from_path(path),
            Source::Stream(stream) => stream.clone(),
        }
    }
}

impl From<&str> for Source {
    fn from(path: &str) -> Self {
        Source::Path(PathBuf::from(path))
    }
}

impl From<String> for Source {
    fn from(path: String) -> Self {
        Source::Path(PathBuf::from(path))
    }
}

impl From<&Path> for Source {
    fn from(path: &Path) -> Self {
        Source::Path(path.to_path_buf())
    }
}

impl From<PathBuf> for Source {
    fn from(path: PathBuf) -> Self {
        Source::Path(path)
    }
}

impl From<&PathBuf> for Source {
    fn from(path: &PathBuf) -> Self {
        Source::Path(path.clone())
    }
}

impl From<SharedStream> for Source {
    fn from(stream: SharedStream) -> Self {
        Source::Stream(stream)
    }
}

/// Lifecycle of an [`ArchiveReader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadState {
    /// Created, never opened.
    #[default]
    Unopened,
    /// Walking headers looking for the selected entry.
    Scanning,
    /// The selected entry's data is being read.
    Streaming,
    /// Closed; may be opened again.
    Closed,
    /// A negotiation, selection or data error ended the session; close it
    /// before opening again.
    Failed,
}

/// Outcome of the most recent codec call made by a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Response {
    /// No codec call since the session was created or closed.
    #[default]
    Idle,
    /// The call succeeded.
    Ok,
    /// The codec reported the end of the archive or of the entry data.
    EndOfData,
    /// The call failed.
    Failed,
}

/// An open entry cursor together with the handle that closes its host
/// stream.
pub(crate) struct OpenArchive {
    pub(crate) cursor: Box<dyn EntryCursor>,
    pub(crate) closer: CloseHandle,
}

impl OpenArchive {
    /// Binds `source`, applies the filter chain and negotiates the format.
    pub(crate) fn open(
        source: &Source,
        options: &ReadOptions,
        parsed: &OptionString,
        raw: bool,
    ) -> Result<Self> {
        let binding = StreamBinding::bind(source.host(), options.block_size)?;
        let closer = binding.close_handle();
        let (input, applied) = DecodedInput::open(binding, options.filters.as_deref())?;
        if !applied.is_empty() {
            let names: Vec<&str> = applied.iter().map(|f| Filter::name(*f)).collect();
            log::debug!("filter chain: {}", names.join(" -> "));
        }
        let request = CursorRequest {
            format: options.format,
            raw,
            options: parsed,
            passphrase: options.passphrase.as_deref(),
        };
        let cursor = open_cursor(input, &applied, request)?;
        Ok(Self { cursor, closer })
    }

    /// Closes the host stream, then releases the cursor.
    pub(crate) fn close(self) -> Result<()> {
        let result = self.closer.close();
        drop(self.cursor);
        result.map_err(Error::from)
    }
}

/// Lists the entries of `source` in archive order.
///
/// Every call opens a fresh session and only reads headers.
///
/// # Example
///
/// ```rust,no_run
/// use arcstream::{ReadOptions, list_entries};
///
/// for info in list_entries("backup.tar.xz", &ReadOptions::default())? {
///     println!("{} {:?}", info.path, info.size);
/// }
/// # Ok::<(), arcstream::Error>(())
/// ```
pub fn list_entries(source: impl Into<Source>, options: &ReadOptions) -> Result<Vec<EntryInfo>> {
    let parsed = options.option_string()?;
    let source = source.into();
    let mut archive = OpenArchive::open(&source, options, &parsed, false)?;
    let mut entries = Vec::new();
    let scanned = loop {
        if let Err(e) = options.cancel.check() {
            break Err(e);
        }
        match archive.cursor.next_header() {
            Ok(Some(header)) => entries.push(EntryInfo::from(&header)),
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        }
    };
    let closed = archive.close();
    scanned?;
    closed?;
    log::debug!("listed {} entries", entries.len());
    Ok(entries)
}

/// A read session over one archive source.
///
/// The session is created without touching the source; [`open`](Self::open)
/// does all the negotiation. [`close`](Self::close) releases the codec
/// handle, buffer and host binding and may be followed by another
/// `open`, which behaves like a fresh session. Dropping the session closes
/// it.
pub struct ArchiveReader {
    source: Source,
    selector: Selector,
    options: ReadOptions,
    parsed: OptionString,
    state: ReadState,
    archive: Option<Box<dyn EntryCursor>>,
    closer: Option<CloseHandle>,
    entry: Option<EntryHeader>,
    buffer: ByteBuffer,
    eof: bool,
    response: Response,
}

impl fmt::Debug for ArchiveReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveReader")
            .field("source", &self.source)
            .field("selector", &self.selector)
            .field("state", &self.state)
            .field("entry", &self.entry)
            .finish_non_exhaustive()
    }
}

impl ArchiveReader {
    /// Creates a session, validating `options` without any I/O.
    pub fn new(source: impl Into<Source>, selector: Selector, options: ReadOptions) -> Result<Self> {
        selector.validate()?;
        let parsed = options.option_string()?;
        let buffer = ByteBuffer::with_capacity(options.block_size);
        Ok(Self {
            source: source.into(),
            selector,
            options,
            parsed,
            state: ReadState::Unopened,
            archive: None,
            closer: None,
            entry: None,
            buffer,
            eof: false,
            response: Response::Idle,
        })
    }

    /// Creates a session over a single compressed file with no container,
    /// e.g. a `.gz` of a text file.
    pub fn compressed_file(source: impl Into<Source>, options: ReadOptions) -> Result<Self> {
        Self::new(source, Selector::RawSingle, options.format(Format::Raw))
    }

    /// Opens the session and positions it on the selected entry.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] if the session is open or failed,
    /// [`Error::InvalidFormat`] if the source is not a recognized archive,
    /// [`Error::EntryNotFound`] if no header matches the selector, plus any
    /// I/O or codec error met on the way. After an error the session is
    /// [`ReadState::Failed`].
    pub fn open(&mut self) -> Result<EntryStream<'_>> {
        match self.state {
            ReadState::Unopened | ReadState::Closed => {}
            ReadState::Scanning | ReadState::Streaming => {
                return Err(Error::InvalidState("session is already open"));
            }
            ReadState::Failed => {
                return Err(Error::InvalidState("session failed; close it before reopening"));
            }
        }
        if let Err(e) = self.start() {
            self.release_after_error();
            return Err(e);
        }
        let mut stream = self.stream()?;
        stream.prime()?;
        Ok(stream)
    }

    fn start(&mut self) -> Result<()> {
        let raw = self.selector == Selector::RawSingle;
        let archive = OpenArchive::open(&self.source, &self.options, &self.parsed, raw)?;
        self.closer = Some(archive.closer);
        let cursor = self.archive.insert(archive.cursor);
        self.state = ReadState::Scanning;
        self.buffer.clear();
        self.eof = false;

        let mut index = 0;
        loop {
            self.options.cancel.check()?;
            let Some(header) = cursor.next_header()? else {
                self.response = Response::EndOfData;
                return Err(Error::EntryNotFound {
                    selector: self.selector.to_string(),
                });
            };
            index += 1;
            if self.selector.matches(index, &header.pathname) {
                log::debug!("selected entry {index} '{}'", header.pathname);
                self.entry = Some(header);
                self.response = Response::Ok;
                self.state = ReadState::Streaming;
                return Ok(());
            }
            log::trace!("skipping entry {index} '{}'", header.pathname);
        }
    }

    fn release_after_error(&mut self) {
        if let Some(closer) = self.closer.take() {
            if let Err(e) = closer.close() {
                log::warn!("failed to close host stream after error: {e}");
            }
        }
        self.archive = None;
        self.entry = None;
        self.buffer.clear();
        self.state = ReadState::Failed;
        self.response = Response::Failed;
    }

    fn stream(&mut self) -> Result<EntryStream<'_>> {
        let Self {
            archive,
            closer,
            entry,
            buffer,
            eof,
            response,
            state,
            options,
            ..
        } = self;
        let (Some(cursor), Some(entry)) = (archive.as_mut(), entry.as_ref()) else {
            return Err(Error::InvalidState("no entry is selected"));
        };
        let data = match cursor.data() {
            Ok(data) => data,
            Err(e) => {
                mark_failed(state, response, closer.as_ref());
                return Err(e);
            }
        };
        Ok(EntryStream {
            data,
            entry,
            buffer,
            eof,
            response,
            state,
            closer: closer.as_ref(),
            block: vec![0; options.block_size],
            cancel: &options.cancel,
        })
    }

    /// Releases the codec handle, buffer and host binding.
    ///
    /// Closing twice, or closing a session that was never opened, is a
    /// no-op. The first error from closing the host stream is returned.
    pub fn close(&mut self) -> Result<()> {
        if matches!(self.state, ReadState::Unopened | ReadState::Closed) {
            return Ok(());
        }
        let closed = match self.closer.take() {
            Some(closer) => closer.close(),
            None => Ok(()),
        };
        self.archive = None;
        self.entry = None;
        self.buffer.clear();
        self.eof = false;
        self.response = Response::Idle;
        self.state = ReadState::Closed;
        log::trace!("read session closed");
        closed.map_err(Error::from)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ReadState {
        self.state
    }

    /// Returns `true` while data of the selected entry remains.
    pub fn has_more(&self) -> bool {
        self.state == ReadState::Streaming && (!self.eof || !self.buffer.is_empty())
    }

    /// Outcome of the most recent codec call.
    pub fn last_response(&self) -> Response {
        self.response
    }

    /// Header of the selected entry while the session is streaming.
    pub fn entry(&self) -> Option<&EntryHeader> {
        self.entry.as_ref()
    }

    /// The selector this session was created with.
    pub fn selector(&self) -> &Selector {
        &self.selector
    }
}

impl Drop for ArchiveReader {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("failed to close read session: {e}");
        }
    }
}

fn mark_failed(state: &mut ReadState, response: &mut Response, closer: Option<&CloseHandle>) {
    *state = ReadState::Failed;
    *response = Response::Failed;
    if let Some(Err(e)) = closer.map(CloseHandle::close) {
        log::warn!("failed to close host stream after error: {e}");
    }
}

/// Data of the selected entry.
///
/// Reads drain the session buffer first, then pull decoded blocks until
/// the request is satisfied or the entry ends. A short read is final only
/// when [`has_more`](Self::has_more) returns `false`.
pub struct EntryStream<'s> {
    data: Box<dyn Read + 's>,
    entry: &'s EntryHeader,
    buffer: &'s mut ByteBuffer,
    eof: &'s mut bool,
    response: &'s mut Response,
    state: &'s mut ReadState,
    closer: Option<&'s CloseHandle>,
    block: Vec<u8>,
    cancel: &'s CancelToken,
}

impl fmt::Debug for EntryStream<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryStream")
            .field("entry", &self.entry.pathname)
            .field("buffered", &self.buffer.available())
            .field("eof", &*self.eof)
            .finish_non_exhaustive()
    }
}

impl EntryStream<'_> {
    /// Header of the entry being read.
    pub fn entry(&self) -> &EntryHeader {
        self.entry
    }

    /// Returns `false` once the decoder signaled the end of the entry and
    /// every buffered byte has been read.
    pub fn has_more(&self) -> bool {
        !*self.eof || !self.buffer.is_empty()
    }

    fn prime(&mut self) -> Result<()> {
        if self.buffer.is_empty() && !*self.eof {
            self.pull_block()?;
        }
        Ok(())
    }

    /// Pulls one decoded block into the buffer.
    fn pull_block(&mut self) -> Result<()> {
        if *self.state == ReadState::Failed {
            return Err(Error::InvalidState("session failed; close it before reopening"));
        }
        let pulled = self.cancel.check().and_then(|()| loop {
            match self.data.read(&mut self.block) {
                Ok(n) => break Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => break Err(from_codec_io("read_data_block", e)),
            }
        });
        match pulled {
            Ok(0) => {
                log::trace!("end of entry '{}'", self.entry.pathname);
                *self.eof = true;
                *self.response = Response::EndOfData;
                Ok(())
            }
            Ok(n) => {
                log::trace!("pulled {n} bytes of '{}'", self.entry.pathname);
                self.buffer.push(&self.block[..n]);
                *self.response = Response::Ok;
                self.cancel.on_block(n)
            }
            Err(e) => {
                mark_failed(self.state, self.response, self.closer);
                Err(e)
            }
        }
    }
}

impl Read for EntryStream<'_> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < out.len() {
            if self.buffer.is_empty() {
                if *self.eof {
                    break;
                }
                self.pull_block()?;
                continue;
            }
            filled += self.buffer.pop(&mut out[filled..]);
        }
        Ok(filled)
    }
}

impl BufRead for EntryStream<'_> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        while self.buffer.is_empty() && !*self.eof {
            self.pull_block()?;
        }
        Ok(self.buffer.as_slice())
    }

    fn consume(&mut self, amt: usize) {
        self.buffer.consume(amt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn tar_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn stream_source(bytes: Vec<u8>) -> SharedStream {
        SharedStream::from_seekable(Cursor::new(bytes)).unwrap()
    }

    #[test]
    fn test_reads_selected_entry() {
        let source = stream_source(tar_bytes(&[("a.txt", b"first"), ("b.txt", b"second")]));
        let mut reader =
            ArchiveReader::new(source, Selector::by_name("b.txt"), ReadOptions::default()).unwrap();
        let mut stream = reader.open().unwrap();
        assert_eq!(stream.entry().pathname, "b.txt");
        let mut text = String::new();
        stream.read_to_string(&mut text).unwrap();
        assert_eq!(text, "second");
        assert!(!stream.has_more());
        drop(stream);
        assert_eq!(reader.state(), ReadState::Streaming);
        assert_eq!(reader.last_response(), Response::EndOfData);
        reader.close().unwrap();
        assert_eq!(reader.state(), ReadState::Closed);
    }

    #[test]
    fn test_open_twice_is_invalid() {
        let source = stream_source(tar_bytes(&[("a", b"1")]));
        let mut reader = ArchiveReader::new(source, Selector::All, ReadOptions::default()).unwrap();
        drop(reader.open().unwrap());
        assert!(matches!(reader.open(), Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_missing_entry_fails_session() {
        let source = stream_source(tar_bytes(&[("a", b"1")]));
        let mut reader =
            ArchiveReader::new(source.clone(), Selector::by_name("zzz"), ReadOptions::default())
                .unwrap();
        assert!(matches!(reader.open(), Err(Error::EntryNotFound { .. })));
        assert_eq!(reader.state(), ReadState::Failed);
        assert!(!source.is_open());
        assert!(matches!(reader.open(), Err(Error::InvalidState(_))));
        reader.close().unwrap();
        assert!(matches!(reader.open(), Err(Error::EntryNotFound { .. })));
    }

    #[test]
    fn test_close_then_reopen_matches_fresh_session() {
        let source = stream_source(tar_bytes(&[("a", b"alpha"), ("b", b"bravo")]));
        let mut reader =
            ArchiveReader::new(source, Selector::by_index(2), ReadOptions::default()).unwrap();
        let mut first = Vec::new();
        reader.open().unwrap().read_to_end(&mut first).unwrap();
        reader.close().unwrap();
        reader.close().unwrap();
        let mut second = Vec::new();
        reader.open().unwrap().read_to_end(&mut second).unwrap();
        assert_eq!(first, b"bravo");
        assert_eq!(first, second);
    }

    #[test]
    fn test_small_reads_and_lines() {
        let body = b"line one\nline two\nline three\n";
        let source = stream_source(tar_bytes(&[("notes", body)]));
        let options = ReadOptions::default().block_size(512);
        let mut reader = ArchiveReader::new(source, Selector::All, options).unwrap();
        let stream = reader.open().unwrap();
        let lines: Vec<String> = stream.lines().map(|l| l.unwrap()).collect();
        assert_eq!(lines, ["line one", "line two", "line three"]);
    }

    #[test]
    fn test_invalid_format() {
        let source = stream_source(b"this is not an archive at all".to_vec());
        let mut reader = ArchiveReader::new(source, Selector::All, ReadOptions::default()).unwrap();
        assert!(matches!(reader.open(), Err(Error::InvalidFormat(_))));
    }

    #[test]
    fn test_raw_single_reads_whole_stream() {
        let source = stream_source(b"no container here".to_vec());
        let mut reader = ArchiveReader::compressed_file(source, ReadOptions::default()).unwrap();
        let mut text = String::new();
        reader.open().unwrap().read_to_string(&mut text).unwrap();
        assert_eq!(text, "no container here");
    }

    #[test]
    fn test_list_entries_from_stream() {
        let source = stream_source(tar_bytes(&[("x", b"1"), ("y", b"22")]));
        let entries = list_entries(source, &ReadOptions::default()).unwrap();
        let rows: Vec<(&str, Option<u64>)> =
            entries.iter().map(|e| (e.path.as_str(), e.size)).collect();
        assert_eq!(rows, [("x", Some(1)), ("y", Some(2))]);
    }

    #[test]
    fn test_cancelled_before_open() {
        let token = CancelToken::new();
        token.cancel();
        let source = stream_source(tar_bytes(&[("x", b"1")]));
        let options = ReadOptions::default().cancel_token(token);
        let mut reader = ArchiveReader::new(source, Selector::All, options).unwrap();
        assert!(matches!(reader.open(), Err(Error::Cancelled)));
    }
}
