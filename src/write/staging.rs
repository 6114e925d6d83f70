//! Scratch file holding the data of a deferred entry until its size is known.

use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};
use std::path::Path;

use tempfile::NamedTempFile;

/// Temporary file in the system temp directory, named after the entry.
///
/// The file is removed by [`remove`](Self::remove) or, failing that, on
/// drop.
#[derive(Debug)]
pub(crate) struct StagingFile {
    file: Option<NamedTempFile>,
    len: u64,
}

impl StagingFile {
    /// Creates a staging file whose name starts with the base name of
    /// `entry_name`.
    pub(crate) fn create(entry_name: &str) -> io::Result<Self> {
        let base = Path::new(entry_name)
            .file_name()
            .and_then(|name| name.to_str())
            .filter(|name| !name.is_empty())
            .unwrap_or("entry");
        let file = tempfile::Builder::new()
            .prefix(&format!("{base}."))
            .suffix(".staging")
            .tempfile()?;
        log::debug!("staging '{entry_name}' in '{}'", file.path().display());
        Ok(Self {
            file: Some(file),
            len: 0,
        })
    }

    fn handle(&mut self) -> io::Result<&mut File> {
        self.file
            .as_mut()
            .map(NamedTempFile::as_file_mut)
            .ok_or_else(|| io::Error::other("staging file already removed"))
    }

    /// Number of bytes staged so far.
    pub(crate) fn len(&self) -> u64 {
        self.len
    }

    /// Path of the staging file while it exists.
    #[cfg(test)]
    pub(crate) fn path(&self) -> Option<&Path> {
        self.file.as_ref().map(NamedTempFile::path)
    }

    /// Flushes and rewinds, returning a reader over the staged bytes.
    pub(crate) fn reader(&mut self) -> io::Result<&mut File> {
        let file = self.handle()?;
        file.flush()?;
        file.seek(SeekFrom::Start(0))?;
        Ok(file)
    }

    /// Deletes the file. Calling it again is a no-op.
    pub(crate) fn remove(&mut self) -> io::Result<()> {
        match self.file.take() {
            Some(file) => file.close(),
            None => Ok(()),
        }
    }
}

impl Write for StagingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.handle()?.write(buf)?;
        self.len += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.handle()?.flush()
    }
}

impl Drop for StagingFile {
    fn drop(&mut self) {
        if let Err(e) = self.remove() {
            log::warn!("failed to remove staging file: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_stage_and_read_back() {
        let mut staging = StagingFile::create("dir/report.csv").unwrap();
        let name = staging
            .path()
            .unwrap()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .into_owned();
        assert!(name.starts_with("report.csv."));

        staging.write_all(b"a,b\n1,2\n").unwrap();
        assert_eq!(staging.len(), 8);
        let mut text = String::new();
        staging.reader().unwrap().read_to_string(&mut text).unwrap();
        assert_eq!(text, "a,b\n1,2\n");
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut staging = StagingFile::create("x").unwrap();
        let path = staging.path().unwrap().to_path_buf();
        assert!(path.exists());
        staging.remove().unwrap();
        staging.remove().unwrap();
        assert!(!path.exists());
        assert!(staging.write(b"late").is_err());
    }

    #[test]
    fn test_drop_removes_file() {
        let staging = StagingFile::create("y").unwrap();
        let path = staging.path().unwrap().to_path_buf();
        drop(staging);
        assert!(!path.exists());
    }
}
