//! zip reading and writing on top of the `zip` crate.
//!
//! The central directory sits at the end of a zip file, so reading needs
//! random access. Seekable unfiltered input is read in place; anything
//! else is spooled to an anonymous temporary file first.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

use zip::result::ZipError;
use zip::write::{FileOptions, SimpleFileOptions};
use zip::unstable::write::FileOptionsExt;
use zip::{AesMode, CompressionMethod, DateTime, ZipArchive, ZipWriter};

use super::filter::DecodedInput;
use super::{EntryCursor, FormatWriter};
use crate::codes::Format;
use crate::entry::{EntryHeader, EntryKind};
use crate::error::from_codec_io;
use crate::options::OptionString;
use crate::progress::{CancelToken, copy_blocks};
use crate::timestamp::CivilTime;
use crate::{Error, Result};

const S_IFMT: u32 = 0o170_000;
const S_IFLNK: u32 = 0o120_000;

#[track_caller]
fn zip_error(operation: &'static str, err: ZipError) -> Error {
    match err {
        ZipError::Io(e) => from_codec_io(operation, e),
        e @ ZipError::InvalidArchive(_) => Error::InvalidFormat(e.to_string()),
        other => Error::codec(operation, other),
    }
}

/// Zip DOS time for Unix seconds; out-of-range times become 1980-01-01.
fn zip_time(mtime: Option<i64>) -> DateTime {
    let Some(secs) = mtime else {
        return DateTime::default();
    };
    let civil = CivilTime::from_unix_secs(secs);
    u16::try_from(civil.year)
        .ok()
        .and_then(|year| {
            DateTime::from_date_and_time(
                year,
                civil.month,
                civil.day,
                civil.hour,
                civil.minute,
                civil.second,
            )
            .ok()
        })
        .unwrap_or_default()
}

fn unix_time(time: DateTime) -> i64 {
    CivilTime {
        year: i64::from(time.year()),
        month: time.month(),
        day: time.day(),
        hour: time.hour(),
        minute: time.minute(),
        second: time.second(),
    }
    .to_unix_secs()
}

/// Encryption applied to written entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Encryption {
    ZipCrypto,
    Aes128,
    Aes256,
}

/// Per-entry settings derived from the `zip:` options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EntrySettings {
    pub(crate) method: CompressionMethod,
    pub(crate) encryption: Option<Encryption>,
}

impl EntrySettings {
    /// Reads `zip:compression` (`deflate` or `store`) and `zip:encryption`
    /// (`zipcrypt`, `aes128` or `aes256`). A passphrase without an explicit
    /// encryption selects AES-256.
    pub(crate) fn from_options(options: &OptionString, has_passphrase: bool) -> Result<Self> {
        let method = match options.value("zip", "compression")? {
            None | Some("deflate") => CompressionMethod::Deflated,
            Some("store") => CompressionMethod::Stored,
            Some(other) => {
                return Err(Error::InvalidOption(format!(
                    "zip:compression must be 'deflate' or 'store', got '{other}'"
                )));
            }
        };
        let encryption = match options.value("zip", "encryption")? {
            None => has_passphrase.then_some(Encryption::Aes256),
            Some("zipcrypt" | "traditional") => Some(Encryption::ZipCrypto),
            Some("aes128") => Some(Encryption::Aes128),
            Some("aes256") => Some(Encryption::Aes256),
            Some(other) => {
                return Err(Error::InvalidOption(format!(
                    "zip:encryption must be 'zipcrypt', 'aes128' or 'aes256', got '{other}'"
                )));
            }
        };
        if encryption.is_some() && !has_passphrase {
            return Err(Error::InvalidOption(
                "zip:encryption requires a passphrase".to_string(),
            ));
        }
        Ok(Self { method, encryption })
    }
}

/// Random-access source for [`ZipArchive`].
enum ZipInput {
    Direct(DecodedInput),
    Spooled {
        file: File,
        // keeps the host stream bound until the session closes
        _source: DecodedInput,
    },
}

impl Read for ZipInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ZipInput::Direct(input) => input.read(buf),
            ZipInput::Spooled { file, .. } => file.read(buf),
        }
    }
}

impl Seek for ZipInput {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            ZipInput::Direct(input) => input.seek(pos),
            ZipInput::Spooled { file, .. } => file.seek(pos),
        }
    }
}

/// Header cursor over zip input, in central directory order.
pub(crate) struct ZipCursor {
    archive: ZipArchive<ZipInput>,
    next: usize,
    current: Option<(usize, String, bool)>,
    passphrase: Option<String>,
}

impl ZipCursor {
    pub(crate) fn new(mut input: DecodedInput, passphrase: Option<String>) -> Result<Self> {
        let source = if input.is_seekable() {
            ZipInput::Direct(input)
        } else {
            log::debug!("spooling forward-only zip input to a temporary file");
            let mut file = tempfile::tempfile()?;
            io::copy(&mut input, &mut file).map_err(|e| from_codec_io("spool_input", e))?;
            file.rewind()?;
            ZipInput::Spooled {
                file,
                _source: input,
            }
        };
        let archive = ZipArchive::new(source).map_err(|e| zip_error("open_archive", e))?;
        log::debug!("zip central directory lists {} entries", archive.len());
        Ok(Self {
            archive,
            next: 0,
            current: None,
            passphrase,
        })
    }

    fn symlink_target(&mut self, index: usize) -> Result<String> {
        let mut target = String::new();
        self.archive
            .by_index(index)
            .map_err(|e| zip_error("read_link_target", e))?
            .read_to_string(&mut target)
            .map_err(|e| from_codec_io("read_link_target", e))?;
        Ok(target)
    }
}

impl EntryCursor for ZipCursor {
    fn next_header(&mut self) -> Result<Option<EntryHeader>> {
        if self.next >= self.archive.len() {
            self.current = None;
            return Ok(None);
        }
        let index = self.next;
        self.next += 1;

        let mut header = {
            let file = self
                .archive
                .by_index_raw(index)
                .map_err(|e| zip_error("read_next_header", e))?;
            let unix_mode = file.unix_mode();
            let kind = if file.is_dir() {
                EntryKind::Directory
            } else if unix_mode.is_some_and(|m| m & S_IFMT == S_IFLNK) {
                EntryKind::Symlink
            } else {
                EntryKind::File
            };
            let default_mode = if kind == EntryKind::Directory { 0o755 } else { 0o644 };
            EntryHeader {
                pathname: file.name().to_string(),
                size: Some(file.size()),
                mtime: file.last_modified().map(unix_time),
                mode: unix_mode.map(|m| m & 0o7777).unwrap_or(default_mode),
                kind,
                link_target: None,
                encrypted: file.encrypted(),
            }
        };
        if header.kind == EntryKind::Symlink && !header.encrypted {
            header.link_target = Some(self.symlink_target(index)?);
        }
        self.current = Some((index, header.pathname.clone(), header.encrypted));
        Ok(Some(header))
    }

    fn data(&mut self) -> Result<Box<dyn Read + '_>> {
        let Some((index, path, encrypted)) = self.current.clone() else {
            return Err(Error::InvalidState("no current entry"));
        };
        let file = if encrypted {
            let Some(passphrase) = self.passphrase.as_deref() else {
                return Err(Error::WrongPassword { path });
            };
            self.archive.by_index_decrypt(index, passphrase.as_bytes())
        } else {
            self.archive.by_index(index)
        };
        match file {
            Ok(file) => Ok(Box::new(file)),
            Err(ZipError::InvalidPassword) => Err(Error::WrongPassword { path }),
            Err(e) => Err(zip_error("read_data", e)),
        }
    }

    fn format(&self) -> Format {
        Format::Zip
    }
}

fn file_options<'k>(
    settings: EntrySettings,
    passphrase: Option<&'k str>,
    header: &EntryHeader,
    large: bool,
) -> FileOptions<'k, ()> {
    let options = SimpleFileOptions::default()
        .compression_method(settings.method)
        .last_modified_time(zip_time(header.mtime))
        .unix_permissions(header.mode)
        .large_file(large);
    match (settings.encryption, passphrase) {
        (Some(Encryption::Aes128), Some(pw)) => options.with_aes_encryption(AesMode::Aes128, pw),
        (Some(Encryption::Aes256), Some(pw)) => options.with_aes_encryption(AesMode::Aes256, pw),
        (Some(Encryption::ZipCrypto), Some(pw)) => {
            options.with_deprecated_encryption(pw.as_bytes())
        }
        _ => options,
    }
}

/// Writes zip entries straight to the destination file.
pub(crate) struct ZipBackend {
    zip: ZipWriter<File>,
    settings: EntrySettings,
    passphrase: Option<String>,
    block_size: usize,
    cancel: CancelToken,
}

impl ZipBackend {
    pub(crate) fn new(
        file: File,
        settings: EntrySettings,
        passphrase: Option<String>,
        block_size: usize,
        cancel: CancelToken,
    ) -> Self {
        Self {
            zip: ZipWriter::new(file),
            settings,
            passphrase,
            block_size,
            cancel,
        }
    }
}

impl FormatWriter for ZipBackend {
    fn append(&mut self, header: &EntryHeader, data: &mut dyn Read) -> Result<u64> {
        let large = header.size.is_none_or(|size| size >= u64::from(u32::MAX));
        let options = file_options(self.settings, self.passphrase.as_deref(), header, large);
        let name = header.pathname.as_str();
        match header.kind {
            EntryKind::Directory => {
                self.zip
                    .add_directory(name, options)
                    .map_err(|e| zip_error("write_header", e))?;
                Ok(0)
            }
            EntryKind::Symlink => {
                let target = header.link_target.as_deref().ok_or_else(|| {
                    Error::InvalidOption(format!("link entry '{name}' has no target"))
                })?;
                self.zip
                    .add_symlink(name, target, options)
                    .map_err(|e| zip_error("write_header", e))?;
                Ok(0)
            }
            EntryKind::Hardlink => Err(Error::unsupported(format!(
                "zip cannot store hard link '{name}'"
            ))),
            EntryKind::File | EntryKind::Other => {
                self.zip
                    .start_file(name, options)
                    .map_err(|e| zip_error("write_header", e))?;
                copy_blocks(data, &mut self.zip, self.block_size, &self.cancel)
            }
        }
    }

    fn start_unsized(&mut self, header: &EntryHeader) -> Result<()> {
        let options = file_options(self.settings, self.passphrase.as_deref(), header, true);
        self.zip
            .start_file(header.pathname.as_str(), options)
            .map_err(|e| zip_error("write_header", e))
    }

    fn write_data(&mut self, data: &[u8]) -> Result<()> {
        self.zip
            .write_all(data)
            .map_err(|e| from_codec_io("write_data_block", e))
    }

    fn finish(self: Box<Self>) -> Result<()> {
        let file = self.zip.finish().map_err(|e| zip_error("write_trailer", e))?;
        file.sync_all()?;
        Ok(())
    }

    fn format(&self) -> Format {
        Format::Zip
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{SharedStream, StreamBinding};

    fn zip_bytes(password: Option<&str>) -> Vec<u8> {
        let mut writer = ZipWriter::new(io::Cursor::new(Vec::new()));
        let base = SimpleFileOptions::default().unix_permissions(0o600);
        let options = match password {
            Some(pw) => base.with_deprecated_encryption(pw.as_bytes()),
            None => base,
        };
        writer.add_directory("docs/", SimpleFileOptions::default()).unwrap();
        writer.start_file("docs/readme.txt", options).unwrap();
        writer.write_all(b"read me").unwrap();
        writer.finish().unwrap().into_inner()
    }

    fn cursor(bytes: Vec<u8>, seekable: bool, passphrase: Option<&str>) -> ZipCursor {
        let host = if seekable {
            SharedStream::from_seekable(io::Cursor::new(bytes)).unwrap()
        } else {
            SharedStream::from_reader(io::Cursor::new(bytes))
        };
        let binding = StreamBinding::bind(host, 4096).unwrap();
        let (input, _) = DecodedInput::open(binding, Some(&[])).unwrap();
        ZipCursor::new(input, passphrase.map(str::to_string)).unwrap()
    }

    #[test]
    fn test_settings_defaults() {
        let settings = EntrySettings::from_options(&OptionString::default(), false).unwrap();
        assert_eq!(settings.method, CompressionMethod::Deflated);
        assert_eq!(settings.encryption, None);
        let settings = EntrySettings::from_options(&OptionString::default(), true).unwrap();
        assert_eq!(settings.encryption, Some(Encryption::Aes256));
    }

    #[test]
    fn test_settings_from_options() {
        let parsed: OptionString = "zip:compression=store,zip:encryption=zipcrypt".parse().unwrap();
        let settings = EntrySettings::from_options(&parsed, true).unwrap();
        assert_eq!(settings.method, CompressionMethod::Stored);
        assert_eq!(settings.encryption, Some(Encryption::ZipCrypto));
        assert!(EntrySettings::from_options(&parsed, false).is_err());
    }

    #[test]
    fn test_zip_time_round_trip() {
        let secs = 1_700_000_000;
        assert_eq!(unix_time(zip_time(Some(secs))), secs);
        assert_eq!(zip_time(Some(0)), DateTime::default());
    }

    #[test]
    fn test_reads_seekable_and_spooled() {
        for seekable in [true, false] {
            let mut cursor = cursor(zip_bytes(None), seekable, None);
            let dir = cursor.next_header().unwrap().unwrap();
            assert!(dir.is_dir());
            let file = cursor.next_header().unwrap().unwrap();
            assert_eq!(file.pathname, "docs/readme.txt");
            assert_eq!(file.mode, 0o600);
            let mut text = String::new();
            cursor.data().unwrap().read_to_string(&mut text).unwrap();
            assert_eq!(text, "read me");
            assert!(cursor.next_header().unwrap().is_none());
        }
    }

    #[test]
    fn test_encrypted_entry_needs_passphrase() {
        let mut locked = cursor(zip_bytes(Some("secret")), true, None);
        locked.next_header().unwrap();
        let header = locked.next_header().unwrap().unwrap();
        assert!(header.encrypted);
        assert!(matches!(locked.data(), Err(Error::WrongPassword { .. })));

        let mut unlocked = cursor(zip_bytes(Some("secret")), true, Some("secret"));
        unlocked.next_header().unwrap();
        unlocked.next_header().unwrap();
        let mut text = String::new();
        unlocked.data().unwrap().read_to_string(&mut text).unwrap();
        assert_eq!(text, "read me");
    }
}
