//! Writing a single logical file into a new archive.
//!
//! An [`ArchiveWriter`] creates one archive holding one entry and accepts
//! its content through [`std::io::Write`]. Two disciplines exist:
//!
//! - **Deferred**: data is staged in a temporary file; on close the
//!   destination is created and one entry is written with its final size.
//!   Required for tar, whose headers carry the size.
//! - **Direct**: the destination is created on open and data streams
//!   straight into an entry whose size is left unset. Used by zip and raw
//!   output. A failure may leave a truncated destination behind.
//!
//! # Example
//!
//! ```rust,no_run
//! use arcstream::{ArchiveWriter, Filter, Format, WriteOptions};
//! use std::io::Write;
//!
//! let options = WriteOptions::new(Format::Tar).filter(Filter::Gzip);
//! let mut writer = ArchiveWriter::new("report.tar.gz", "report.csv", options)?;
//! writeln!(writer, "id,total")?;
//! writeln!(writer, "1,42")?;
//! writer.close()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod pack;
mod staging;

pub use pack::{PackResult, pack_files};

use std::fmt;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::codec::raw::RAW_ENTRY_NAME;
use crate::codec::{FormatWriter, create_writer};
use crate::codes::Format;
use crate::entry::EntryHeader;
use crate::options::{OptionString, WriteMode, WriteOptions};
use crate::timestamp::unix_secs;
use crate::{Error, Result};

use self::staging::StagingFile;

/// Lifecycle of an [`ArchiveWriter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteState {
    /// Created; neither the destination nor a staging file exists yet.
    #[default]
    Unopened,
    /// Accepting data.
    Open,
    /// Finished, or closed without ever being opened.
    Closed,
    /// A write or finalization error ended the session.
    Failed,
}

enum Sink {
    Staged(StagingFile),
    Direct(Box<dyn FormatWriter>),
}

/// A write session producing one archive with one entry.
///
/// Creating the writer only validates its options; nothing is written
/// until [`open`](Self::open) or the first [`write`](Self::write).
/// Dropping an open writer closes it and logs any failure.
pub struct ArchiveWriter {
    destination: PathBuf,
    entry_name: String,
    options: WriteOptions,
    parsed: OptionString,
    mode: WriteMode,
    state: WriteState,
    sink: Option<Sink>,
    written: u64,
}

impl fmt::Debug for ArchiveWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveWriter")
            .field("destination", &self.destination)
            .field("entry_name", &self.entry_name)
            .field("format", &self.options.format)
            .field("mode", &self.mode)
            .field("state", &self.state)
            .field("written", &self.written)
            .finish_non_exhaustive()
    }
}

impl ArchiveWriter {
    /// Creates a session writing `entry_name` into a new archive at
    /// `destination`.
    ///
    /// # Errors
    ///
    /// Configuration errors ([`Error::TooManyFilters`],
    /// [`Error::InvalidOption`], [`Error::Unsupported`]) are reported here
    /// and leave `destination` untouched.
    pub fn new(
        destination: impl AsRef<Path>,
        entry_name: impl Into<String>,
        options: WriteOptions,
    ) -> Result<Self> {
        let entry_name = entry_name.into();
        if entry_name.is_empty() {
            return Err(Error::InvalidOption("entry name is empty".to_string()));
        }
        let (parsed, mode) = options.resolve()?;
        Ok(Self {
            destination: destination.as_ref().to_path_buf(),
            entry_name,
            options,
            parsed,
            mode,
            state: WriteState::Unopened,
            sink: None,
            written: 0,
        })
    }

    /// Creates a session writing a single compressed file with no
    /// container, e.g. a `.gz`.
    ///
    /// The format of `options` is replaced by [`Format::Raw`].
    pub fn compressed_file(destination: impl AsRef<Path>, mut options: WriteOptions) -> Result<Self> {
        options.format = Format::Raw;
        Self::new(destination, RAW_ENTRY_NAME, options)
    }

    /// Opens the session: creates the staging file (deferred) or the
    /// destination with an unsized entry (direct).
    pub fn open(&mut self) -> Result<()> {
        match self.state {
            WriteState::Unopened => {}
            WriteState::Open => return Err(Error::InvalidState("writer is already open")),
            WriteState::Closed | WriteState::Failed => {
                return Err(Error::InvalidState("writer is closed"));
            }
        }
        match self.start() {
            Ok(sink) => {
                log::debug!(
                    "writing '{}' into {} archive '{}' ({:?})",
                    self.entry_name,
                    self.options.format,
                    self.destination.display(),
                    self.mode
                );
                self.sink = Some(sink);
                self.state = WriteState::Open;
                Ok(())
            }
            Err(e) => {
                self.state = WriteState::Failed;
                Err(e)
            }
        }
    }

    fn start(&self) -> Result<Sink> {
        match self.mode {
            WriteMode::Direct => {
                let file = File::create(&self.destination)?;
                let mut writer = create_writer(file, &self.options, &self.parsed)?;
                writer.start_unsized(&self.header())?;
                Ok(Sink::Direct(writer))
            }
            WriteMode::Deferred | WriteMode::Auto => {
                Ok(Sink::Staged(StagingFile::create(&self.entry_name)?))
            }
        }
    }

    fn header(&self) -> EntryHeader {
        EntryHeader::file(self.entry_name.as_str())
            .with_mode(0o644)
            .with_mtime(unix_secs(SystemTime::now()))
    }

    /// Appends `data` to the entry, opening the session first if needed.
    ///
    /// Returns the number of bytes accepted, always `data.len()`.
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        if self.state == WriteState::Unopened {
            self.open()?;
        }
        if self.state != WriteState::Open {
            return Err(Error::InvalidState("writer is closed"));
        }
        let Some(sink) = self.sink.as_mut() else {
            return Err(Error::InvalidState("writer is closed"));
        };
        let result = self.options.cancel.on_block(data.len()).and_then(|()| match sink {
            Sink::Staged(staging) => io::Write::write_all(staging, data).map_err(Error::from),
            Sink::Direct(writer) => writer.write_data(data),
        });
        match result {
            Ok(()) => {
                self.written += data.len() as u64;
                log::trace!("wrote {} bytes to '{}'", data.len(), self.entry_name);
                Ok(data.len())
            }
            Err(e) => {
                self.state = WriteState::Failed;
                Err(e)
            }
        }
    }

    /// Finishes the archive and releases every resource.
    ///
    /// Deferred sessions create the destination here and copy the staged
    /// data into it; the staging file is removed whatever the outcome, and
    /// so is a destination left incomplete by a failed copy. Closing again,
    /// or closing a session that was never opened, does nothing.
    pub fn close(&mut self) -> Result<()> {
        let sink = self.sink.take();
        match self.state {
            WriteState::Unopened | WriteState::Closed => {
                self.state = WriteState::Closed;
                return Ok(());
            }
            WriteState::Failed => {
                drop(sink);
                self.state = WriteState::Closed;
                return Ok(());
            }
            WriteState::Open => {}
        }
        let result = match sink {
            Some(Sink::Staged(mut staging)) => {
                let result = self.finish_deferred(&mut staging);
                if let Err(e) = staging.remove() {
                    log::warn!("failed to remove staging file: {e}");
                }
                result
            }
            Some(Sink::Direct(writer)) => writer.finish(),
            None => Ok(()),
        };
        match result {
            Ok(()) => {
                log::debug!(
                    "closed '{}' after {} bytes",
                    self.destination.display(),
                    self.written
                );
                self.state = WriteState::Closed;
                Ok(())
            }
            Err(e) => {
                self.state = WriteState::Failed;
                Err(e)
            }
        }
    }

    fn finish_deferred(&self, staging: &mut StagingFile) -> Result<()> {
        let header = self.header().with_size(staging.len());
        let file = File::create(&self.destination)?;
        let written = create_writer(file, &self.options, &self.parsed).and_then(|mut writer| {
            writer.append(&header, staging.reader()?)?;
            writer.finish()
        });
        if written.is_err() {
            if let Err(e) = fs::remove_file(&self.destination) {
                log::warn!(
                    "failed to remove incomplete '{}': {e}",
                    self.destination.display()
                );
            }
        }
        written
    }

    /// Current state.
    pub fn state(&self) -> WriteState {
        self.state
    }

    /// The resolved discipline, never [`WriteMode::Auto`].
    pub fn mode(&self) -> WriteMode {
        self.mode
    }

    /// Bytes accepted so far.
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Archive path being written.
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Name of the entry being written.
    pub fn entry_name(&self) -> &str {
        &self.entry_name
    }

    /// Target format.
    pub fn format(&self) -> Format {
        self.options.format
    }
}

impl io::Write for ArchiveWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        ArchiveWriter::write(self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.sink.as_mut() {
            Some(Sink::Staged(staging)) => io::Write::flush(staging),
            _ => Ok(()),
        }
    }
}

impl Drop for ArchiveWriter {
    fn drop(&mut self) {
        if self.state == WriteState::Open {
            if let Err(e) = self.close() {
                log::warn!(
                    "failed to finish '{}' on drop: {e}",
                    self.destination.display()
                );
            }
        }
    }
}
