//! Error types for streaming archive operations.
//!
//! This module provides the [`Error`] enum which represents every failure
//! mode of the crate, along with a convenient [`Result<T>`] type alias.
//!
//! # Error Categories
//!
//! | Category | Variants | Raised |
//! |----------|----------|--------|
//! | Configuration | [`TooManyFilters`][Error::TooManyFilters], [`InvalidOption`][Error::InvalidOption], [`Unsupported`][Error::Unsupported], [`InvalidState`][Error::InvalidState] | Before any I/O |
//! | Negotiation | [`InvalidFormat`][Error::InvalidFormat] | While opening a source |
//! | Selection | [`EntryNotFound`][Error::EntryNotFound] | After a full header scan |
//! | I/O | [`Io`][Error::Io], [`Codec`][Error::Codec] | Any read, write, seek or close |
//! | Decoding | [`Codec`][Error::Codec], [`WrongPassword`][Error::WrongPassword] | Data block pulls and pushes |
//! | Control | [`Cancelled`][Error::Cancelled], [`PathTraversal`][Error::PathTraversal] | Copy loops and extraction |
//!
//! Cleanup failures (closing a host stream, removing a staging file) are
//! logged with [`log::warn!`] and never replace an error that is already
//! being returned.
//!
//! # Example
//!
//! ```rust,no_run
//! use arcstream::{ArchiveReader, Error, ReadOptions, Selector};
//!
//! fn first_line(path: &str) -> arcstream::Result<Option<String>> {
//!     let mut reader = ArchiveReader::new(path, Selector::by_name("README"), ReadOptions::default())?;
//!     match reader.open() {
//!         Ok(stream) => {
//!             use std::io::BufRead;
//!             Ok(stream.lines().next().transpose()?)
//!         }
//!         Err(Error::EntryNotFound { .. }) => Ok(None),
//!         Err(e) => Err(e),
//!     }
//! }
//! ```

use std::fmt;
use std::io;
use std::panic::Location;

/// Source location and operation name attached to codec failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSite {
    /// Name of the codec operation that failed, e.g. `"read_data_block"`.
    pub operation: &'static str,
    /// Source file of the call site.
    pub file: &'static str,
    /// Line of the call site.
    pub line: u32,
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}:{}", self.operation, self.file, self.line)
    }
}

/// The error type for all archive operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An I/O error occurred on a host stream or the filesystem.
    ///
    /// Errors raised by the host stream's own primitives are wrapped
    /// unchanged so that the [`std::io::ErrorKind`] stays inspectable.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// More filters were requested than a session can hold.
    ///
    /// Raised by option validation, before any destination is created.
    #[error("cannot use more than {max} filters (got {count})")]
    TooManyFilters {
        /// Number of filters requested.
        count: usize,
        /// The fixed maximum, [`FILTER_MAX`](crate::FILTER_MAX).
        max: usize,
    },

    /// The option string is malformed or names an unknown module or key.
    #[error("invalid option: {0}")]
    InvalidOption(String),

    /// A filter, format or combination that this build cannot handle.
    ///
    /// Filters and formats without a compiled backend, zip wrapped in a
    /// filter, tar written without staging, and passphrases on formats
    /// without encryption all end up here.
    #[error("unsupported: {what}")]
    Unsupported {
        /// Human readable description of the unsupported request.
        what: String,
    },

    /// A session method was called in a state that does not allow it.
    #[error("invalid session state: {0}")]
    InvalidState(&'static str),

    /// The source was not recognized as a supported archive.
    #[error("invalid archive: {0}")]
    InvalidFormat(String),

    /// The selector matched no entry after a full header scan.
    ///
    /// This is terminal for the session that raised it; the session must
    /// be closed before it can be opened again.
    #[error("entry not found: {selector}")]
    EntryNotFound {
        /// Display form of the selector that failed to match.
        selector: String,
    },

    /// The codec library reported a failure while pulling or pushing data.
    ///
    /// The message is the codec's own when it supplied one, and
    /// `"unknown codec error"` otherwise. The call site names the
    /// operation and source location that observed the failure.
    #[error("{message} ({site})")]
    Codec {
        /// Operation name and source location.
        site: CallSite,
        /// Message reported by the codec.
        message: String,
    },

    /// The passphrase was missing or did not decrypt the entry.
    #[error("wrong or missing passphrase for entry: {path}")]
    WrongPassword {
        /// Pathname of the encrypted entry.
        path: String,
    },

    /// The operation was cancelled through a [`CancelToken`](crate::CancelToken).
    #[error("operation cancelled")]
    Cancelled,

    /// An extracted entry would escape the destination directory.
    #[error("path traversal detected in entry: {path}")]
    PathTraversal {
        /// The offending pathname.
        path: String,
    },
}

impl Error {
    /// Wraps a codec failure, tagging it with the caller's location.
    #[track_caller]
    pub(crate) fn codec(operation: &'static str, message: impl fmt::Display) -> Self {
        let location = Location::caller();
        let mut message = message.to_string();
        if message.is_empty() {
            message = "unknown codec error".to_string();
        }
        Error::Codec {
            site: CallSite {
                operation,
                file: location.file(),
                line: location.line(),
            },
            message,
        }
    }

    /// Shorthand for [`Error::Unsupported`].
    pub(crate) fn unsupported(what: impl Into<String>) -> Self {
        Error::Unsupported { what: what.into() }
    }

    /// Returns `true` for errors raised while validating configuration.
    ///
    /// These are fully recoverable by adjusting the input and never leave
    /// any artifact behind.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::TooManyFilters { .. }
                | Error::InvalidOption(_)
                | Error::Unsupported { .. }
                | Error::InvalidState(_)
        )
    }

    /// Returns `true` if retrying with different input might succeed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::WrongPassword { .. } | Error::Cancelled | Error::EntryNotFound { .. } => true,
            Error::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::TimedOut
            ),
            other => other.is_configuration(),
        }
    }

    /// Returns the call site for codec errors.
    pub fn call_site(&self) -> Option<CallSite> {
        match self {
            Error::Codec { site, .. } => Some(*site),
            _ => None,
        }
    }
}

/// Maps an I/O error raised inside a codec crate to an [`Error`].
///
/// Errors that originate from our own layers (cancellation, host stream
/// failures) travel through codec crates as `io::Error` payloads; they are
/// unwrapped here so callers see the original variant.
#[track_caller]
pub(crate) fn from_codec_io(operation: &'static str, err: io::Error) -> Error {
    if err.get_ref().is_some_and(|inner| inner.is::<Error>()) {
        if let Some(Ok(inner)) = err.into_inner().map(|inner| inner.downcast::<Error>()) {
            return *inner;
        }
        return Error::codec(operation, "");
    }
    match err.kind() {
        io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof | io::ErrorKind::Other => {
            Error::codec(operation, err)
        }
        _ => Error::Io(err),
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(e) => e,
            other => io::Error::other(other),
        }
    }
}

/// A specialized Result type for archive operations.
pub type Result<T> = std::result::Result<T, Error>;
