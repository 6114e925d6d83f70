//! # arcstream
//!
//! Streaming read and write access to single entries of compressed
//! archives.
//!
//! This crate opens tar and zip archives, and bare compressed streams,
//! optionally wrapped in stacked compression filters (gzip, bzip2, xz,
//! lzma, zstd, lz4). It exposes the content of one selected entry as a
//! [`std::io::Read`] stream, and writes one logical file into a new archive
//! entry through [`std::io::Write`], even when its size is not known up
//! front. An archive is never held in memory as a whole.
//!
//! ## Quick Start
//!
//! ### Reading an Entry
//!
//! ```rust,no_run
//! use arcstream::{ArchiveReader, ReadOptions, Result, Selector};
//! use std::io::BufRead;
//!
//! fn main() -> Result<()> {
//!     // Filters and format are detected from the data
//!     let mut reader = ArchiveReader::new(
//!         "logs.tar.xz",
//!         Selector::by_name("var/log/app.log"),
//!         ReadOptions::default(),
//!     )?;
//!     for line in reader.open()?.lines() {
//!         println!("{}", line?);
//!     }
//!     reader.close()
//! }
//! ```
//!
//! ### Writing an Entry
//!
//! ```rust,no_run
//! use arcstream::{ArchiveWriter, Filter, Format, WriteOptions};
//! use std::io::Write;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = WriteOptions::new(Format::Tar).filter(Filter::Zstd);
//!     let mut writer = ArchiveWriter::new("metrics.tar.zst", "metrics.csv", options)?;
//!     for day in 1..=31 {
//!         writeln!(writer, "{day},{}", day * 7)?;
//!     }
//!     writer.close()?;
//!     Ok(())
//! }
//! ```
//!
//! ### Host Streams
//!
//! Sources need not be files: anything implementing [`HostStream`], or any
//! `Read`, can be wrapped in a [`SharedStream`]. The caller keeps a clone
//! and sees the stream closed once the session is done with it.
//!
//! ```rust
//! use arcstream::{ReadOptions, SharedStream, list_entries};
//!
//! let mut builder = tar::Builder::new(Vec::new());
//! let mut header = tar::Header::new_gnu();
//! header.set_size(2);
//! builder.append_data(&mut header, "hi.txt", &b"hi"[..]).unwrap();
//! let bytes = builder.into_inner().unwrap();
//!
//! let stream = SharedStream::from_reader(std::io::Cursor::new(bytes));
//! let entries = list_entries(stream.clone(), &ReadOptions::default()).unwrap();
//! assert_eq!(entries[0].path, "hi.txt");
//! assert!(!stream.is_open());
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `gzip` | Yes | gzip filter via `flate2` |
//! | `bzip2` | Yes | bzip2 filter |
//! | `xz` | Yes | xz and lzma filters via `xz2` |
//! | `zstd` | Yes | Zstandard filter |
//! | `lz4` | Yes | LZ4 frame filter via `lz4_flex` |
//! | `zip` | Yes | zip format, including encrypted entries |
//! | `cli` | No | The `arcstream` command line tool |
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T>`]; see [`Error`] for the
//! categories. Configuration errors are raised before any I/O and leave no
//! file behind.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod buffer;
pub(crate) mod codec;
pub mod codes;
pub mod entry;
pub mod error;
pub mod options;
pub mod progress;
pub mod read;
pub mod selector;
pub mod stream;
pub(crate) mod timestamp;
pub mod write;

pub use buffer::ByteBuffer;
pub use codes::{FILTER_MAX, Filter, Format, filter_table, format_table, versions};
pub use entry::{EntryHeader, EntryInfo, EntryKind};
pub use error::{CallSite, Error, Result};
pub use options::{
    DEFAULT_BLOCK_SIZE, ExtractOptions, ModuleOption, OptionString, OptionValue, PackOptions,
    ReadOptions, WriteMode, WriteOptions,
};
pub use progress::CancelToken;
pub use read::{
    ArchiveReader, EntryStream, ReadState, Response, Source, extract_entries, list_entries,
};
pub use selector::Selector;
pub use stream::{FileStream, HostStream, ReaderStream, SeekableStream, SharedStream};
pub use write::{ArchiveWriter, PackResult, WriteState, pack_files};
