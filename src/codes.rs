//! Filter and format code tables.
//!
//! Names and numeric codes follow the widely used libarchive numbering so
//! that values stored by other tools keep their meaning. Only a subset has
//! a backend in this crate; see [`Filter::is_supported`] and
//! [`Format::is_supported`].

use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Maximum number of filters a single session can stack.
pub const FILTER_MAX: usize = 8;

/// A compression transform applied to the whole archive stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Filter {
    /// No transform.
    None,
    /// gzip (RFC 1952).
    Gzip,
    /// bzip2.
    Bzip2,
    /// Unix `compress` (LZW).
    Compress,
    /// Legacy `.lzma` (LZMA-alone) container.
    Lzma,
    /// xz container.
    Xz,
    /// uuencode.
    Uuencode,
    /// lzip.
    Lzip,
    /// lrzip.
    Lrzip,
    /// lzop.
    Lzop,
    /// grzip.
    Grzip,
    /// LZ4 frame format.
    Lz4,
    /// Zstandard.
    Zstd,
}

const FILTERS: [(Filter, &str, i32); 13] = [
    (Filter::None, "none", 0),
    (Filter::Gzip, "gzip", 1),
    (Filter::Bzip2, "bzip2", 2),
    (Filter::Compress, "compress", 3),
    (Filter::Lzma, "lzma", 5),
    (Filter::Xz, "xz", 6),
    (Filter::Uuencode, "uuencode", 7),
    (Filter::Lzip, "lzip", 9),
    (Filter::Lrzip, "lrzip", 10),
    (Filter::Lzop, "lzop", 11),
    (Filter::Grzip, "grzip", 12),
    (Filter::Lz4, "lz4", 13),
    (Filter::Zstd, "zstd", 14),
];

impl Filter {
    /// Numeric code of this filter.
    pub fn code(self) -> i32 {
        FILTERS
            .iter()
            .find(|(f, _, _)| *f == self)
            .map_or(0, |(_, _, code)| *code)
    }

    /// Symbolic name of this filter.
    pub fn name(self) -> &'static str {
        FILTERS
            .iter()
            .find(|(f, _, _)| *f == self)
            .map_or("none", |(_, name, _)| name)
    }

    /// Looks a filter up by numeric code.
    pub fn from_code(code: i32) -> Option<Self> {
        FILTERS
            .iter()
            .find(|(_, _, c)| *c == code)
            .map(|(f, _, _)| *f)
    }

    /// Returns `true` if this build can encode and decode the filter.
    pub fn is_supported(self) -> bool {
        match self {
            Filter::None => true,
            Filter::Gzip => cfg!(feature = "gzip"),
            Filter::Bzip2 => cfg!(feature = "bzip2"),
            Filter::Lzma | Filter::Xz => cfg!(feature = "xz"),
            Filter::Lz4 => cfg!(feature = "lz4"),
            Filter::Zstd => cfg!(feature = "zstd"),
            _ => false,
        }
    }

    /// Returns an error unless the filter has a backend in this build.
    pub(crate) fn ensure_supported(self) -> Result<()> {
        if self.is_supported() {
            Ok(())
        } else {
            Err(Error::unsupported(format!(
                "filter '{}' is not available in this build",
                self.name()
            )))
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Filter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        FILTERS
            .iter()
            .find(|(_, name, _)| name.eq_ignore_ascii_case(s))
            .map(|(f, _, _)| *f)
            .ok_or_else(|| Error::InvalidOption(format!("unknown filter '{s}'")))
    }
}

/// A container layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Format {
    /// 7-Zip.
    SevenZip,
    /// Microsoft cabinet.
    Cab,
    /// cpio.
    Cpio,
    /// ISO 9660 image.
    Iso9660,
    /// LHA/LZH.
    Lha,
    /// mtree manifest.
    Mtree,
    /// Shell archive.
    Shar,
    /// RAR.
    Rar,
    /// A single unnamed entry with no container framing.
    Raw,
    /// tar (ustar, pax and GNU variants).
    Tar,
    /// XAR.
    Xar,
    /// zip.
    Zip,
    /// WARC web archive.
    Warc,
}

const FORMATS: [(Format, &str, i32); 13] = [
    (Format::SevenZip, "7zip", 0xE0000),
    (Format::Cab, "cab", 0xC0000),
    (Format::Cpio, "cpio", 0x10000),
    (Format::Iso9660, "iso9660", 0x40000),
    (Format::Lha, "lha", 0xB0000),
    (Format::Mtree, "mtree", 0x80000),
    (Format::Shar, "shar", 0x20000),
    (Format::Rar, "rar", 0xD0000),
    (Format::Raw, "raw", 0x90000),
    (Format::Tar, "tar", 0x30000),
    (Format::Xar, "xar", 0xA0000),
    (Format::Zip, "zip", 0x50000),
    (Format::Warc, "warc", 0xF0000),
];

impl Format {
    /// Numeric code of this format.
    pub fn code(self) -> i32 {
        FORMATS
            .iter()
            .find(|(f, _, _)| *f == self)
            .map_or(0, |(_, _, code)| *code)
    }

    /// Symbolic name of this format.
    pub fn name(self) -> &'static str {
        FORMATS
            .iter()
            .find(|(f, _, _)| *f == self)
            .map_or("raw", |(_, name, _)| name)
    }

    /// Looks a format up by numeric code.
    pub fn from_code(code: i32) -> Option<Self> {
        FORMATS
            .iter()
            .find(|(_, _, c)| *c == code)
            .map(|(f, _, _)| *f)
    }

    /// Returns `true` if this build can read and write the format.
    pub fn is_supported(self) -> bool {
        match self {
            Format::Tar | Format::Raw => true,
            Format::Zip => cfg!(feature = "zip"),
            _ => false,
        }
    }

    pub(crate) fn ensure_supported(self) -> Result<()> {
        if self.is_supported() {
            Ok(())
        } else {
            Err(Error::unsupported(format!(
                "format '{}' is not available in this build",
                self.name()
            )))
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Format {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = if s.eq_ignore_ascii_case("7z") { "7zip" } else { s };
        FORMATS
            .iter()
            .find(|(_, name, _)| name.eq_ignore_ascii_case(s))
            .map(|(f, _, _)| *f)
            .ok_or_else(|| Error::InvalidOption(format!("unknown format '{s}'")))
    }
}

/// All filters as `(name, code)` pairs, in code order.
pub fn filter_table() -> Vec<(&'static str, i32)> {
    FILTERS.iter().map(|(_, name, code)| (*name, *code)).collect()
}

/// All formats as `(name, code)` pairs.
///
/// The raw pseudo-format is included; it is never chosen by detection.
pub fn format_table() -> Vec<(&'static str, i32)> {
    FORMATS.iter().map(|(_, name, code)| (*name, *code)).collect()
}

/// Versions of the compiled-in codec backends.
///
/// Each sub-codec function returns `None` when its cargo feature is
/// disabled. Native libraries report their runtime version; the pure-Rust
/// backends report the version of the crate linked into the build.
pub mod versions {
    /// Version of this crate, which owns the format negotiation layer.
    pub fn library_version() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    /// gzip backend (`flate2` on zlib-rs).
    pub fn zlib_version() -> Option<&'static str> {
        cfg!(feature = "gzip").then_some(env!("ARCSTREAM_FLATE2_VERSION"))
    }

    /// liblzma runtime library version.
    pub fn liblzma_version() -> Option<&'static str> {
        #[cfg(feature = "xz")]
        {
            // SAFETY: liblzma returns a static NUL-terminated string.
            let version = unsafe { std::ffi::CStr::from_ptr(lzma_sys::lzma_version_string()) };
            version.to_str().ok()
        }
        #[cfg(not(feature = "xz"))]
        {
            None
        }
    }

    /// bzip2 backend.
    pub fn bzlib_version() -> Option<&'static str> {
        cfg!(feature = "bzip2").then_some(env!("ARCSTREAM_BZIP2_VERSION"))
    }

    /// LZ4 backend (`lz4_flex`).
    pub fn liblz4_version() -> Option<&'static str> {
        cfg!(feature = "lz4").then_some(env!("ARCSTREAM_LZ4_FLEX_VERSION"))
    }

    /// Zstandard runtime library version.
    pub fn libzstd_version() -> Option<String> {
        #[cfg(feature = "zstd")]
        {
            Some(zstd::zstd_safe::version_string().to_string())
        }
        #[cfg(not(feature = "zstd"))]
        {
            None
        }
    }
}
