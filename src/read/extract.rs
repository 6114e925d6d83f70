//! Bulk extraction to a directory.

use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};

use filetime::FileTime;

use super::{OpenArchive, Source};
use crate::entry::{EntryHeader, EntryKind};
use crate::options::ExtractOptions;
use crate::progress::copy_blocks;
use crate::selector::Selector;
use crate::{Error, Result};

/// Removes `count` leading components from a `/` separated pathname.
///
/// Returns `None` when the name has fewer than `count` separators or
/// nothing is left after stripping.
pub(crate) fn strip_components(pathname: &str, count: usize) -> Option<&str> {
    let mut rest = pathname;
    for _ in 0..count {
        let (_, tail) = rest.split_once('/')?;
        rest = tail.trim_start_matches('/');
    }
    (!rest.is_empty()).then_some(rest)
}

/// Turns an archive pathname into a path relative to the destination,
/// rejecting absolute paths and parent components.
fn relative_path(pathname: &str) -> Result<PathBuf> {
    let traversal = || Error::PathTraversal {
        path: pathname.to_string(),
    };
    let mut path = PathBuf::new();
    for component in Path::new(pathname).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(traversal());
            }
        }
    }
    Ok(path)
}

/// Rejects symlink targets that resolve outside the destination.
#[cfg_attr(not(unix), allow(dead_code))]
fn check_link_target(entry: &Path, target: &str, pathname: &str) -> Result<()> {
    let mut depth = entry.components().count().saturating_sub(1) as isize;
    for component in Path::new(target).components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => depth -= 1,
            Component::RootDir | Component::Prefix(_) => depth = -1,
        }
        if depth < 0 {
            return Err(Error::PathTraversal {
                path: format!("{pathname} -> {target}"),
            });
        }
    }
    Ok(())
}

/// Replaces an existing symlink at `path` so writes never follow it.
fn unlink_symlink(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => fs::remove_file(path),
        _ => Ok(()),
    }
}

fn create_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

fn apply_metadata(path: &Path, header: &EntryHeader, options: &ExtractOptions) {
    if options.preserve_permissions {
        set_mode(path, header.mode);
    }
    if options.preserve_mtime {
        if let Some(mtime) = header.mtime {
            let time = FileTime::from_unix_time(mtime, 0);
            if let Err(e) = filetime::set_file_mtime(path, time) {
                log::warn!("failed to set mtime on '{}': {e}", path.display());
            }
        }
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(mode)) {
        log::warn!("failed to set permissions on '{}': {e}", path.display());
    }
}

#[cfg(not(unix))]
fn set_mode(path: &Path, mode: u32) {
    if mode & 0o222 == 0 {
        if let Ok(meta) = fs::metadata(path) {
            let mut permissions = meta.permissions();
            permissions.set_readonly(true);
            if let Err(e) = fs::set_permissions(path, permissions) {
                log::warn!("failed to set permissions on '{}': {e}", path.display());
            }
        }
    }
}

/// Extracts the entries of `source` matched by `selector` below the
/// destination directory of `options`.
///
/// Entries are matched against their pathname as stored, before
/// stripping. Indices are 1-based and count every header. Returns the
/// stripped pathnames of the extracted entries in archive order.
///
/// Directory permissions and times are applied after all entries are
/// written, so read-only directories can still be filled.
///
/// # Errors
///
/// [`Error::PathTraversal`] for absolute pathnames, `..` components and
/// link targets that leave the destination; I/O and codec errors
/// otherwise. Entries extracted before an error remain on disk; a file
/// interrupted by cancellation is removed.
///
/// # Example
///
/// ```rust,no_run
/// use arcstream::{ExtractOptions, Selector, extract_entries};
///
/// let options = ExtractOptions::new().destination("out").strip_components(1);
/// let written = extract_entries("release.tar.gz", &Selector::All, &options)?;
/// println!("extracted {} entries", written.len());
/// # Ok::<(), arcstream::Error>(())
/// ```
pub fn extract_entries(
    source: impl Into<Source>,
    selector: &Selector,
    options: &ExtractOptions,
) -> Result<Vec<String>> {
    selector.validate()?;
    let parsed = options.read.option_string()?;
    let source = source.into();
    fs::create_dir_all(&options.destination)?;

    let raw = *selector == Selector::RawSingle;
    let mut archive = OpenArchive::open(&source, &options.read, &parsed, raw)?;
    let mut directories = Vec::new();
    let mut extracted = Vec::new();
    let result = extract_all(
        &mut archive,
        selector,
        options,
        &mut directories,
        &mut extracted,
    );
    let closed = archive.close();

    // deepest first, so parents are fixed up after their children
    directories.sort_by(|a: &(PathBuf, EntryHeader), b| b.0.cmp(&a.0));
    for (path, header) in &directories {
        apply_metadata(path, header, options);
    }
    result?;
    closed?;
    log::debug!(
        "extracted {} entries into '{}'",
        extracted.len(),
        options.destination.display()
    );
    Ok(extracted)
}

fn extract_all(
    archive: &mut OpenArchive,
    selector: &Selector,
    options: &ExtractOptions,
    directories: &mut Vec<(PathBuf, EntryHeader)>,
    extracted: &mut Vec<String>,
) -> Result<()> {
    let mut index = 0;
    while let Some(header) = archive.cursor.next_header()? {
        index += 1;
        options.read.cancel.check()?;
        if !selector.matches(index, &header.pathname) {
            continue;
        }
        let Some(stripped) = strip_components(&header.pathname, options.strip_components) else {
            log::debug!("'{}' stripped to nothing, skipped", header.pathname);
            continue;
        };
        let stripped = stripped.to_string();
        let relative = relative_path(&stripped)?;
        if relative.as_os_str().is_empty() {
            continue;
        }
        let target = options.destination.join(&relative);

        match header.kind {
            EntryKind::Directory => {
                unlink_symlink(&target)?;
                fs::create_dir_all(&target)?;
                directories.push((target, header));
            }
            EntryKind::File => {
                extract_file(archive, &target, options)?;
                apply_metadata(&target, &header, options);
            }
            EntryKind::Symlink => {
                if !extract_symlink(&target, &relative, &header)? {
                    continue;
                }
            }
            EntryKind::Hardlink => {
                let Some(link) = header.link_target.as_deref() else {
                    log::warn!("hard link '{}' has no target, skipped", header.pathname);
                    continue;
                };
                let Some(link) = strip_components(link, options.strip_components) else {
                    log::warn!("hard link target of '{}' stripped away, skipped", header.pathname);
                    continue;
                };
                let original = options.destination.join(relative_path(link)?);
                create_parent(&target)?;
                unlink_symlink(&target)?;
                if target.exists() {
                    fs::remove_file(&target)?;
                }
                fs::hard_link(&original, &target)?;
            }
            EntryKind::Other => {
                log::warn!("'{}' is not a regular file, directory or link, skipped", header.pathname);
                continue;
            }
        }
        log::trace!("extracted '{stripped}'");
        extracted.push(stripped);
    }
    Ok(())
}

fn extract_file(archive: &mut OpenArchive, target: &Path, options: &ExtractOptions) -> Result<()> {
    create_parent(target)?;
    unlink_symlink(target)?;
    let mut file = File::create(target)?;
    let copied = {
        let mut data = archive.cursor.data()?;
        copy_blocks(
            &mut data,
            &mut file,
            options.read.block_size,
            &options.read.cancel,
        )
    };
    match copied {
        Ok(_) => Ok(()),
        Err(Error::Cancelled) => {
            drop(file);
            if let Err(e) = fs::remove_file(target) {
                log::warn!(
                    "failed to clean up partial file '{}': {e}",
                    target.display()
                );
            }
            Err(Error::Cancelled)
        }
        Err(e) => Err(e),
    }
}

/// Returns `false` when the platform cannot create the link.
#[cfg(unix)]
fn extract_symlink(target: &Path, relative: &Path, header: &EntryHeader) -> Result<bool> {
    let Some(link) = header.link_target.as_deref() else {
        log::warn!("symlink '{}' has no target, skipped", header.pathname);
        return Ok(false);
    };
    check_link_target(relative, link, &header.pathname)?;
    create_parent(target)?;
    if fs::symlink_metadata(target).is_ok() {
        fs::remove_file(target)?;
    }
    std::os::unix::fs::symlink(link, target)?;
    Ok(true)
}

#[cfg(not(unix))]
fn extract_symlink(_target: &Path, _relative: &Path, header: &EntryHeader) -> Result<bool> {
    log::warn!("symlinks are not supported here, skipped '{}'", header.pathname);
    Ok(false)
}
