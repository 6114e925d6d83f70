//! Cooperative cancellation for long-running copy loops.
//!
//! A [`CancelToken`] is shared between the thread driving an archive
//! operation and whoever may want to stop it (another thread, a Ctrl+C
//! handler). Copy loops check it once per block; a cancelled operation
//! returns [`Error::Cancelled`](crate::Error::Cancelled). Entries finished
//! before the check remain valid, the entry in progress may be incomplete.
//!
//! # Example
//!
//! ```rust
//! use arcstream::CancelToken;
//!
//! let token = CancelToken::new();
//! let remote = token.clone();
//! std::thread::spawn(move || remote.cancel()).join().unwrap();
//! assert!(token.is_cancelled());
//! ```

use std::io::{self, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::error::from_codec_io;
use crate::{Error, Result};

#[derive(Debug, Default)]
struct Shared {
    cancelled: AtomicBool,
    bytes: AtomicU64,
}

/// Shared cancellation flag with a running byte counter.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    shared: Arc<Shared>,
}

impl CancelToken {
    /// Creates a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation of every operation holding this token.
    pub fn cancel(&self) {
        self.shared.cancelled.store(true, Ordering::Relaxed);
    }

    /// Returns `true` once [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::Relaxed)
    }

    /// Total bytes moved by copy loops that hold this token.
    pub fn bytes_copied(&self) -> u64 {
        self.shared.bytes.load(Ordering::Relaxed)
    }

    /// Returns [`Error::Cancelled`] if cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Checks for cancellation, then accounts for `bytes` copied.
    pub(crate) fn on_block(&self, bytes: usize) -> Result<()> {
        self.check()?;
        self.shared.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        Ok(())
    }
}

/// Copies `reader` into `writer` one block at a time, checking `token`
/// before each block.
pub(crate) fn copy_blocks(
    reader: &mut dyn Read,
    writer: &mut dyn Write,
    block_size: usize,
    token: &CancelToken,
) -> Result<u64> {
    let mut block = vec![0u8; block_size];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut block) {
            Ok(0) => return Ok(total),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(from_codec_io("read_data_block", e)),
        };
        token.on_block(n)?;
        writer
            .write_all(&block[..n])
            .map_err(|e| from_codec_io("write_data_block", e))?;
        total += n as u64;
    }
}

/// Reader that caps each read at one block and checks a token per block.
///
/// Cancellation surfaces as an `io::Error` carrying [`Error::Cancelled`],
/// so codec crates that drive the read loop pass it through untouched.
pub(crate) struct CancellableReader<'a, R: ?Sized> {
    inner: &'a mut R,
    block_size: usize,
    token: &'a CancelToken,
}

impl<'a, R: Read + ?Sized> CancellableReader<'a, R> {
    pub(crate) fn new(inner: &'a mut R, block_size: usize, token: &'a CancelToken) -> Self {
        Self {
            inner,
            block_size,
            token,
        }
    }
}

impl<R: Read + ?Sized> Read for CancellableReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = buf.len().min(self.block_size);
        let n = self.inner.read(&mut buf[..len])?;
        self.token.on_block(n)?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_not_cancelled() {
        let token = CancelToken::default();
        assert!(!token.is_cancelled());
        assert!(token.check().is_ok());
    }

    #[test]
    fn test_clones_share_state() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.on_block(10).unwrap();
        clone.cancel();
        assert!(token.is_cancelled());
        assert_eq!(token.bytes_copied(), 10);
        assert!(matches!(token.on_block(1), Err(Error::Cancelled)));
        assert_eq!(token.bytes_copied(), 10);
    }

    #[test]
    fn test_copy_blocks_counts_bytes() {
        let token = CancelToken::new();
        let mut out = Vec::new();
        let copied = copy_blocks(&mut &b"hello world"[..], &mut out, 4, &token).unwrap();
        assert_eq!(copied, 11);
        assert_eq!(out, b"hello world");
        assert_eq!(token.bytes_copied(), 11);
    }

    #[test]
    fn test_cancelled_copy_stops() {
        let token = CancelToken::new();
        token.cancel();
        let mut out = Vec::new();
        let err = copy_blocks(&mut &[0u8; 64][..], &mut out, 8, &token).unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(out.is_empty());
    }

    #[test]
    fn test_cancellable_reader_surfaces_cancelled() {
        let token = CancelToken::new();
        let mut data = &[1u8; 32][..];
        let mut reader = CancellableReader::new(&mut data, 8, &token);
        let mut buf = [0u8; 32];
        assert_eq!(reader.read(&mut buf).unwrap(), 8);
        token.cancel();
        let err = reader.read(&mut buf).unwrap_err();
        assert!(matches!(from_codec_io("read", err), Error::Cancelled));
    }
}
