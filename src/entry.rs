//! Entry metadata copied out of archive headers.

use std::time::SystemTime;

use crate::timestamp;

/// Kind of filesystem object an entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntryKind {
    /// Regular file with data blocks.
    #[default]
    File,
    /// Directory.
    Directory,
    /// Symbolic link; see [`EntryHeader::link_target`].
    Symlink,
    /// Hard link to an earlier entry; see [`EntryHeader::link_target`].
    Hardlink,
    /// Device nodes, FIFOs and other special files.
    Other,
}

/// Header fields of one archive entry.
///
/// This is a copy; it never refers back into the codec that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct EntryHeader {
    /// Pathname as stored in the archive, `/` separated.
    pub pathname: String,
    /// Uncompressed size, unknown for raw streams.
    pub size: Option<u64>,
    /// Modification time in Unix seconds.
    pub mtime: Option<i64>,
    /// Permission bits.
    pub mode: u32,
    /// Entry kind.
    pub kind: EntryKind,
    /// Target of symbolic and hard links.
    pub link_target: Option<String>,
    /// Whether the entry data is encrypted.
    pub encrypted: bool,
}

impl EntryHeader {
    /// Header for a regular file.
    pub fn file(pathname: impl Into<String>) -> Self {
        Self {
            pathname: pathname.into(),
            size: None,
            mtime: None,
            mode: 0o644,
            kind: EntryKind::File,
            link_target: None,
            encrypted: false,
        }
    }

    /// Header for a directory.
    pub fn directory(pathname: impl Into<String>) -> Self {
        Self {
            mode: 0o755,
            kind: EntryKind::Directory,
            size: Some(0),
            ..Self::file(pathname)
        }
    }

    /// Sets the size.
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Sets the modification time.
    pub fn with_mtime(mut self, mtime: i64) -> Self {
        self.mtime = Some(mtime);
        self
    }

    /// Sets the permission bits.
    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode & 0o7777;
        self
    }

    /// Modification time as `SystemTime`.
    pub fn modified(&self) -> Option<SystemTime> {
        self.mtime.map(timestamp::system_time)
    }

    /// Returns `true` for directories.
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// One row of an archive listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    /// Pathname as stored in the archive.
    pub path: String,
    /// Uncompressed size, if the format records one.
    pub size: Option<u64>,
    /// Modification time, if the format records one.
    pub modified: Option<SystemTime>,
}

impl From<&EntryHeader> for EntryInfo {
    fn from(header: &EntryHeader) -> Self {
        Self {
            path: header.pathname.clone(),
            size: header.size,
            modified: header.modified(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;

    #[test]
    fn test_builders() {
        let header = EntryHeader::file("a.txt").with_size(5).with_mode(0o100755);
        assert_eq!(header.mode, 0o755);
        assert_eq!(header.size, Some(5));
        assert!(!header.is_dir());
        assert!(EntryHeader::directory("d/").is_dir());
    }

    #[test]
    fn test_info_from_header() {
        let header = EntryHeader::file("x").with_size(3).with_mtime(10);
        let info = EntryInfo::from(&header);
        assert_eq!(info.path, "x");
        assert_eq!(info.modified, Some(UNIX_EPOCH + std::time::Duration::from_secs(10)));
    }
}
