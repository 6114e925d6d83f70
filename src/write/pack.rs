//! Packing files and directory trees into a new archive.

use std::fs::{self, File, Metadata};
use std::path::{Path, PathBuf};

use crate::codec::{FormatWriter, create_writer};
use crate::codes::Format;
use crate::entry::{EntryHeader, EntryKind};
use crate::options::PackOptions;
use crate::timestamp::unix_secs;
use crate::{Error, Result};

/// Summary of a [`pack_files`] run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackResult {
    /// Entry names in the order they were written.
    pub entries: Vec<String>,
    /// Total bytes of file content written, before compression.
    pub bytes: u64,
}

/// Writes `paths` into a new archive at `destination`.
///
/// Directories are walked recursively in name order. Entry names are
/// relative to the strip prefix of `options` when one is set, otherwise
/// the path itself with any leading `/` removed. Sizes, modification
/// times and permission bits come from the filesystem.
///
/// On failure the partially written destination is removed.
///
/// # Example
///
/// ```rust,no_run
/// use arcstream::{Filter, Format, PackOptions, WriteOptions, pack_files};
///
/// let options = PackOptions::from(WriteOptions::new(Format::Tar).filter(Filter::Zstd))
///     .strip_prefix("build");
/// let result = pack_files("dist.tar.zst", &["build/bin", "build/lib"], &options)?;
/// println!("{} entries, {} bytes", result.entries.len(), result.bytes);
/// # Ok::<(), arcstream::Error>(())
/// ```
pub fn pack_files<P: AsRef<Path>>(
    destination: impl AsRef<Path>,
    paths: &[P],
    options: &PackOptions,
) -> Result<PackResult> {
    let destination = destination.as_ref();
    let (parsed, _) = options.write.resolve()?;
    if options.write.format == Format::Raw && paths.len() != 1 {
        return Err(Error::InvalidOption(format!(
            "raw output holds exactly one file, got {} paths",
            paths.len()
        )));
    }

    let file = File::create(destination)?;
    let packed = create_writer(file, &options.write, &parsed).and_then(|mut writer| {
        let mut result = PackResult::default();
        for path in paths {
            add_path(writer.as_mut(), path.as_ref(), options, &mut result)?;
        }
        writer.finish()?;
        Ok(result)
    });
    match packed {
        Ok(result) => {
            log::debug!(
                "packed {} entries ({} bytes) into '{}'",
                result.entries.len(),
                result.bytes,
                destination.display()
            );
            Ok(result)
        }
        Err(e) => {
            if let Err(cleanup) = fs::remove_file(destination) {
                log::warn!(
                    "failed to remove incomplete '{}': {cleanup}",
                    destination.display()
                );
            }
            Err(e)
        }
    }
}

fn entry_name(path: &Path, options: &PackOptions) -> Result<String> {
    let relative = match &options.strip_prefix {
        Some(prefix) => path.strip_prefix(prefix).map_err(|_| {
            Error::InvalidOption(format!(
                "'{}' is not below '{}'",
                path.display(),
                prefix.display()
            ))
        })?,
        None => path,
    };
    let name = relative.to_string_lossy().replace('\\', "/");
    let trimmed = name.trim_start_matches('/');
    if trimmed.len() != name.len() {
        log::warn!("removing leading '/' from '{name}'");
    }
    let trimmed = trimmed.trim_start_matches("./");
    if trimmed.is_empty() {
        return Err(Error::InvalidOption(format!(
            "'{}' leaves an empty entry name",
            path.display()
        )));
    }
    Ok(trimmed.to_string())
}

fn header_for(name: String, meta: &Metadata) -> EntryHeader {
    let mut header = EntryHeader::file(name);
    if let Ok(modified) = meta.modified() {
        header.mtime = Some(unix_secs(modified));
    }
    header.mode = permission_bits(meta, header.mode);
    header
}

#[cfg(unix)]
fn permission_bits(meta: &Metadata, _default: u32) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn permission_bits(meta: &Metadata, default: u32) -> u32 {
    if meta.permissions().readonly() {
        default & !0o222
    } else {
        default
    }
}

fn add_path(
    writer: &mut dyn FormatWriter,
    path: &Path,
    options: &PackOptions,
    result: &mut PackResult,
) -> Result<()> {
    options.write.cancel.check()?;
    let meta = fs::symlink_metadata(path)?;
    let file_type = meta.file_type();

    // a strip prefix naming the directory itself adds its children only
    let is_root = options
        .strip_prefix
        .as_deref()
        .is_some_and(|prefix| prefix == path);

    if file_type.is_dir() {
        if !is_root {
            let mut name = entry_name(path, options)?;
            name.push('/');
            let mut header = header_for(name.clone(), &meta);
            header.kind = EntryKind::Directory;
            header.size = Some(0);
            writer.append(&header, &mut std::io::empty())?;
            result.entries.push(name);
        }
        let mut children: Vec<PathBuf> = fs::read_dir(path)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<std::io::Result<_>>()?;
        children.sort();
        for child in children {
            add_path(writer, &child, options, result)?;
        }
        return Ok(());
    }

    let name = entry_name(path, options)?;
    let mut header = header_for(name.clone(), &meta);
    if file_type.is_symlink() {
        let target = fs::read_link(path)?;
        header.kind = EntryKind::Symlink;
        header.size = Some(0);
        header.link_target = Some(target.to_string_lossy().into_owned());
        writer.append(&header, &mut std::io::empty())?;
    } else if file_type.is_file() {
        header.size = Some(meta.len());
        let mut file = File::open(path)?;
        result.bytes += writer.append(&header, &mut file)?;
    } else {
        log::warn!("'{}' is not a regular file, directory or symlink, skipped", path.display());
        return Ok(());
    }
    log::trace!("packed '{name}'");
    result.entries.push(name);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{ReadOptions, WriteOptions};
    use crate::read::list_entries;
    use tempfile::TempDir;

    fn tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("site");
        fs::create_dir_all(root.join("css")).unwrap();
        fs::write(root.join("index.html"), "<html></html>").unwrap();
        fs::write(root.join("css/main.css"), "body{}").unwrap();
        dir
    }

    #[test]
    fn test_entry_names() {
        let options = PackOptions::new(Format::Tar).strip_prefix("/srv");
        assert_eq!(entry_name(Path::new("/srv/a/b.txt"), &options).unwrap(), "a/b.txt");
        assert!(entry_name(Path::new("/etc/x"), &options).is_err());
        let options = PackOptions::new(Format::Tar);
        assert_eq!(entry_name(Path::new("/abs/path"), &options).unwrap(), "abs/path");
        assert_eq!(entry_name(Path::new("./rel"), &options).unwrap(), "rel");
    }

    #[test]
    fn test_pack_tree() {
        let dir = tree();
        let dest = dir.path().join("site.tar");
        let options = PackOptions::new(Format::Tar).strip_prefix(dir.path());
        let result = pack_files(&dest, &[dir.path().join("site")], &options).unwrap();
        assert_eq!(
            result.entries,
            ["site/", "site/css/", "site/css/main.css", "site/index.html"]
        );
        assert_eq!(result.bytes, 19);

        let listed: Vec<_> = list_entries(&dest, &ReadOptions::default())
            .unwrap()
            .into_iter()
            .map(|info| info.path)
            .collect();
        assert_eq!(listed, result.entries);
    }

    #[test]
    fn test_prefix_is_root() {
        let dir = tree();
        let root = dir.path().join("site");
        let dest = dir.path().join("flat.tar");
        let options = PackOptions::new(Format::Tar).strip_prefix(&root);
        let result = pack_files(&dest, &[&root], &options).unwrap();
        assert_eq!(result.entries, ["css/", "css/main.css", "index.html"]);
    }

    #[test]
    fn test_raw_needs_one_path() {
        let dir = tree();
        let dest = dir.path().join("two.raw");
        let options = PackOptions::new(Format::Raw);
        let paths = [dir.path().join("site/index.html"), dir.path().join("site/css/main.css")];
        assert!(pack_files(&dest, &paths, &options).is_err());
        assert!(!dest.exists());
    }

    #[test]
    fn test_failure_removes_destination() {
        let dir = tree();
        let dest = dir.path().join("broken.tar");
        let options = PackOptions::from(WriteOptions::new(Format::Tar));
        let missing = [dir.path().join("site/missing.txt")];
        assert!(pack_files(&dest, &missing, &options).is_err());
        assert!(!dest.exists());
    }
}
