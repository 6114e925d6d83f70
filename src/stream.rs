//! Host stream abstraction and the binding that adapts it for codecs.
//!
//! A host environment supplies byte endpoints (files, sockets, in-memory
//! buffers, anything with a read primitive). They are injected as
//! [`HostStream`] trait objects wrapped in a [`SharedStream`]: the caller
//! keeps its own handle and this crate only borrows the stream for the
//! lifetime of a session.
//!
//! # Example
//!
//! ```rust
//! use arcstream::SharedStream;
//! use std::io::Cursor;
//!
//! let stream = SharedStream::from_seekable(Cursor::new(b"plain bytes".to_vec())).unwrap();
//! assert!(stream.is_open());
//! ```

use std::cell::{Cell, RefCell};
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Byte-stream primitives a host provides.
///
/// Only [`read`](HostStream::read) is required. Seekable streams override
/// [`is_seekable`](HostStream::is_seekable), [`seek`](HostStream::seek)
/// and [`position`](HostStream::position) together.
pub trait HostStream {
    /// Opens the stream if it is not open yet.
    fn open(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Returns `true` while the stream is open.
    fn is_open(&self) -> bool {
        true
    }

    /// Reads into `buf`, returning 0 at end of stream.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Returns `true` if [`seek`](HostStream::seek) is supported.
    fn is_seekable(&self) -> bool {
        false
    }

    /// Moves the stream position.
    fn seek(&mut self, pos: SeekFrom) -> io::Result<()> {
        let _ = pos;
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "stream is not seekable",
        ))
    }

    /// Reports the current absolute position.
    fn position(&mut self) -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "stream cannot report its position",
        ))
    }

    /// Closes the stream. Must tolerate being called more than once.
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "stream is closed")
}

/// Forward-only stream over any reader.
///
/// Once closed it cannot be reopened, since the consumed bytes are gone.
pub struct ReaderStream<R> {
    inner: R,
    open: bool,
}

impl<R: Read> ReaderStream<R> {
    /// Wraps an open reader.
    pub fn new(inner: R) -> Self {
        Self { inner, open: true }
    }
}

impl<R: Read> HostStream for ReaderStream<R> {
    fn open(&mut self) -> io::Result<()> {
        if self.open {
            return Ok(());
        }
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "a forward-only stream cannot be reopened",
        ))
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.open {
            return Err(closed_error());
        }
        self.inner.read(buf)
    }

    fn close(&mut self) -> io::Result<()> {
        self.open = false;
        Ok(())
    }
}

/// Seekable stream over any `Read + Seek` value.
///
/// Reopening rewinds to the position the stream had when it was wrapped.
pub struct SeekableStream<R> {
    inner: R,
    start: u64,
    open: bool,
}

impl<R: Read + Seek> SeekableStream<R> {
    /// Wraps an open reader, recording its current position as the start.
    pub fn new(mut inner: R) -> io::Result<Self> {
        let start = inner.stream_position()?;
        Ok(Self {
            inner,
            start,
            open: true,
        })
    }
}

impl<R: Read + Seek> HostStream for SeekableStream<R> {
    fn open(&mut self) -> io::Result<()> {
        if !self.open {
            self.inner.seek(SeekFrom::Start(self.start))?;
            self.open = true;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.open {
            return Err(closed_error());
        }
        self.inner.read(buf)
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<()> {
        self.inner.seek(pos).map(|_| ())
    }

    fn position(&mut self) -> io::Result<u64> {
        self.inner.stream_position()
    }

    fn close(&mut self) -> io::Result<()> {
        self.open = false;
        Ok(())
    }
}

/// File stream opened lazily from a path.
pub struct FileStream {
    path: PathBuf,
    file: Option<File>,
}

impl FileStream {
    /// Creates a closed stream for `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
        }
    }

    /// The path this stream reads from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file(&mut self) -> io::Result<&mut File> {
        self.file.as_mut().ok_or_else(closed_error)
    }
}

impl HostStream for FileStream {
    fn open(&mut self) -> io::Result<()> {
        if self.file.is_none() {
            self.file = Some(File::open(&self.path)?);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file()?.read(buf)
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<()> {
        self.file()?.seek(pos).map(|_| ())
    }

    fn position(&mut self) -> io::Result<u64> {
        self.file()?.stream_position()
    }

    fn close(&mut self) -> io::Result<()> {
        self.file = None;
        Ok(())
    }
}

/// Shared handle to a host stream.
///
/// Cloning yields another handle to the same stream. Sessions hold a clone
/// and close the stream when they close; the stream itself is freed when
/// the last handle drops.
#[derive(Clone)]
pub struct SharedStream(Rc<RefCell<dyn HostStream>>);

impl SharedStream {
    /// Wraps a host stream implementation.
    pub fn new(stream: impl HostStream + 'static) -> Self {
        SharedStream(Rc::new(RefCell::new(stream)))
    }

    /// Wraps a forward-only reader.
    pub fn from_reader(reader: impl Read + 'static) -> Self {
        Self::new(ReaderStream::new(reader))
    }

    /// Wraps a seekable reader.
    pub fn from_seekable(reader: impl Read + Seek + 'static) -> io::Result<Self> {
        Ok(Self::new(SeekableStream::new(reader)?))
    }

    /// Wraps a file path, opened on first use.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self::new(FileStream::new(path))
    }

    /// Returns `true` while the underlying stream is open.
    pub fn is_open(&self) -> bool {
        self.0.try_borrow().map(|s| s.is_open()).unwrap_or(true)
    }

    fn with<T>(&self, f: impl FnOnce(&mut dyn HostStream) -> io::Result<T>) -> io::Result<T> {
        let mut stream = self
            .0
            .try_borrow_mut()
            .map_err(|_| io::Error::new(io::ErrorKind::WouldBlock, "host stream is busy"))?;
        f(&mut *stream)
    }
}

impl fmt::Debug for SharedStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedStream")
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

/// Closes a bound host stream at most once.
///
/// The binding and the session that created it share one handle, so the
/// host stream is closed exactly once whichever of them gets there first.
#[derive(Clone)]
pub(crate) struct CloseHandle {
    host: SharedStream,
    closed: Rc<Cell<bool>>,
}

impl CloseHandle {
    pub(crate) fn close(&self) -> io::Result<()> {
        if self.closed.replace(true) {
            return Ok(());
        }
        self.host.with(|s| s.close())
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.get()
    }
}

/// Binds a host stream to a session.
///
/// Reads go through a fixed-size scratch buffer. Seekability is probed
/// once at bind time and seeks are refused when it was `false`.
pub(crate) struct StreamBinding {
    host: SharedStream,
    scratch: Box<[u8]>,
    pos: usize,
    filled: usize,
    seekable: bool,
    closer: CloseHandle,
}

impl StreamBinding {
    /// Opens the host stream if needed and probes its seekability.
    pub(crate) fn bind(host: SharedStream, block_size: usize) -> io::Result<Self> {
        let seekable = host.with(|s| {
            if !s.is_open() {
                s.open()?;
            }
            Ok(s.is_seekable())
        })?;
        log::trace!("bound host stream (seekable: {seekable}, block size: {block_size})");
        let closer = CloseHandle {
            host: host.clone(),
            closed: Rc::new(Cell::new(false)),
        };
        Ok(Self {
            host,
            scratch: vec![0; block_size].into_boxed_slice(),
            pos: 0,
            filled: 0,
            seekable,
            closer,
        })
    }

    pub(crate) fn is_seekable(&self) -> bool {
        self.seekable
    }

    /// Handle that closes the host stream independently of this binding.
    pub(crate) fn close_handle(&self) -> CloseHandle {
        self.closer.clone()
    }

    /// Returns up to `len` upcoming bytes without consuming them.
    ///
    /// Fewer bytes are returned only at end of stream. `len` is capped at
    /// the scratch buffer size.
    pub(crate) fn peek(&mut self, len: usize) -> io::Result<&[u8]> {
        let len = len.min(self.scratch.len());
        if self.filled - self.pos < len {
            self.scratch.copy_within(self.pos..self.filled, 0);
            self.filled -= self.pos;
            self.pos = 0;
            while self.filled < len {
                let n = self.read_host(self.filled)?;
                if n == 0 {
                    break;
                }
                self.filled += n;
            }
        }
        let end = self.filled.min(self.pos + len);
        Ok(&self.scratch[self.pos..end])
    }

    /// Closes the host stream once; later calls are no-ops.
    pub(crate) fn close(&mut self) -> io::Result<()> {
        self.pos = 0;
        self.filled = 0;
        self.closer.close()
    }

    fn read_host(&mut self, offset: usize) -> io::Result<usize> {
        if self.closer.is_closed() {
            return Err(closed_error());
        }
        let scratch = &mut self.scratch[offset..];
        self.host.with(|s| s.read(scratch))
    }
}

impl Read for StreamBinding {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let count = available.len().min(buf.len());
        buf[..count].copy_from_slice(&available[..count]);
        self.consume(count);
        Ok(count)
    }
}

impl BufRead for StreamBinding {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        if self.pos >= self.filled {
            self.filled = self.read_host(0)?;
            self.pos = 0;
        }
        Ok(&self.scratch[self.pos..self.filled])
    }

    fn consume(&mut self, amt: usize) {
        self.pos = (self.pos + amt).min(self.filled);
    }
}

impl Seek for StreamBinding {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        if !self.seekable {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "host stream is not seekable",
            ));
        }
        if self.closer.is_closed() {
            return Err(closed_error());
        }
        let pos = match pos {
            SeekFrom::Current(offset) => {
                SeekFrom::Current(offset - (self.filled - self.pos) as i64)
            }
            other => other,
        };
        self.pos = 0;
        self.filled = 0;
        self.host.with(|s| {
            s.seek(pos)?;
            s.position().map_err(|e| {
                io::Error::other(format!(
                    "host stream sought but cannot report its position: {e}"
                ))
            })
        })
    }
}

impl Drop for StreamBinding {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("failed to close host stream: {e}");
        }
    }
}
