//! Shared test utilities for integration tests.
//!
//! Archives are built with the `tar` crate directly, so the reading side is
//! checked against an independent writer. Compressed variants are produced
//! through [`ArchiveWriter::compressed_file`].
//!
//! Note: `#![allow(dead_code)]` is required because each integration test file
//! compiles as a separate crate and may only use a subset of these helpers.

#![allow(dead_code)]

use std::fs;
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};

use arcstream::{ArchiveWriter, CancelToken, Filter, Format, WriteOptions};
use tempfile::TempDir;

/// Modification time stamped on every test entry.
pub const MTIME: u64 = 1_700_000_000;

/// The two-entry archive used by the scenario tests.
pub const SCENARIO: &[(&str, &[u8])] = &[("a.txt", b"hello"), ("dir/b.txt", b"world!")];

/// Builds an uncompressed tar archive in memory.
///
/// Names ending in `/` become directories.
pub fn tar_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_mtime(MTIME);
        if name.ends_with('/') {
            header.set_entry_type(tar::EntryType::Directory);
            header.set_mode(0o755);
            header.set_size(0);
            builder.append_data(&mut header, name, std::io::empty()).unwrap();
        } else {
            header.set_mode(0o644);
            header.set_size(data.len() as u64);
            builder.append_data(&mut header, name, *data).unwrap();
        }
    }
    builder.into_inner().unwrap()
}

/// Builds a tar archive whose single entry has a name the `tar` crate
/// refuses to write, such as `../escape.txt`.
pub fn tar_with_raw_name(name: &str, data: &[u8]) -> Vec<u8> {
    let mut header = tar::Header::new_gnu();
    header.as_gnu_mut().unwrap().name[..name.len()].copy_from_slice(name.as_bytes());
    header.set_mode(0o644);
    header.set_mtime(MTIME);
    header.set_size(data.len() as u64);
    header.set_cksum();
    let mut builder = tar::Builder::new(Vec::new());
    builder.append(&header, data).unwrap();
    builder.into_inner().unwrap()
}

/// Writes `bytes` to `dir/name` and returns the path.
pub fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, bytes).unwrap();
    path
}

/// Writes `bytes` through a raw filter chain into `dir/name`.
pub fn write_filtered(dir: &Path, name: &str, bytes: &[u8], filters: &[Filter]) -> PathBuf {
    let path = dir.join(name);
    let options = WriteOptions::new(Format::Raw).filters(filters.iter().copied());
    let mut writer = ArchiveWriter::compressed_file(&path, options).unwrap();
    writer.write_all(bytes).unwrap();
    writer.close().unwrap();
    path
}

/// Creates a temp dir holding `archive.tar` built from `entries`.
pub fn tar_on_disk(entries: &[(&str, &[u8])]) -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = write_file(dir.path(), "archive.tar", &tar_bytes(entries));
    (dir, path)
}

/// Creates a directory tree below `root` from `(relative path, content)`
/// pairs.
pub fn make_tree(root: &Path, files: &[(&str, &[u8])]) {
    for (name, data) in files {
        let path = root.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, data).unwrap();
    }
}

/// Forward-only host stream that cancels `token` as soon as a read starts
/// at or past byte `at`.
pub struct CancelAt {
    inner: Cursor<Vec<u8>>,
    at: u64,
    token: CancelToken,
}

impl CancelAt {
    pub fn new(bytes: Vec<u8>, at: u64, token: CancelToken) -> Self {
        Self {
            inner: Cursor::new(bytes),
            at,
            token,
        }
    }
}

impl Read for CancelAt {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.inner.position() >= self.at {
            self.token.cancel();
        }
        self.inner.read(buf)
    }
}
