//! Integration tests for bulk extraction and packing.

mod common;

use std::fs;
use std::time::{Duration, UNIX_EPOCH};

use arcstream::{
    CancelToken, Error, ExtractOptions, Format, PackOptions, ReadOptions, Selector, SharedStream,
    extract_entries, list_entries, pack_files,
};
use common::{
    CancelAt, MTIME, SCENARIO, make_tree, tar_bytes, tar_on_disk, tar_with_raw_name, write_file,
};
use filetime::FileTime;
use tempfile::TempDir;

#[test]
fn test_extract_everything() {
    let (dir, archive) = tar_on_disk(SCENARIO);
    let out = dir.path().join("out");
    let options = ExtractOptions::new().destination(&out);

    let written = extract_entries(&archive, &Selector::All, &options).unwrap();
    assert_eq!(written, ["a.txt", "dir/b.txt"]);
    assert_eq!(fs::read(out.join("a.txt")).unwrap(), b"hello");
    assert_eq!(fs::read(out.join("dir/b.txt")).unwrap(), b"world!");

    let modified = fs::metadata(out.join("a.txt")).unwrap().modified().unwrap();
    assert_eq!(modified, UNIX_EPOCH + Duration::from_secs(MTIME));
}

#[test]
fn test_strip_components_drops_shallow_entries() {
    let (dir, archive) = tar_on_disk(SCENARIO);
    let out = dir.path().join("out");
    let options = ExtractOptions::new().destination(&out).strip_components(1);

    let written = extract_entries(&archive, &Selector::All, &options).unwrap();
    assert_eq!(written, ["b.txt"]);
    assert_eq!(fs::read(out.join("b.txt")).unwrap(), b"world!");
    assert!(!out.join("a.txt").exists());
    assert!(!out.join("dir").exists());
}

#[test]
fn test_selection_uses_unstripped_names() {
    let (dir, archive) = tar_on_disk(SCENARIO);
    let out = dir.path().join("out");
    let options = ExtractOptions::new().destination(&out).strip_components(1);

    let selector = Selector::by_names(["dir/b.txt"]);
    assert_eq!(extract_entries(&archive, &selector, &options).unwrap(), ["b.txt"]);
}

#[test]
fn test_extract_by_indices() {
    let entries: &[(&str, &[u8])] = &[("one", b"1"), ("two", b"22"), ("three", b"333")];
    let (dir, archive) = tar_on_disk(entries);
    let out = dir.path().join("out");
    let options = ExtractOptions::new().destination(&out);

    let written = extract_entries(&archive, &Selector::by_indices([1, 3]), &options).unwrap();
    assert_eq!(written, ["one", "three"]);
    assert!(!out.join("two").exists());
}

#[test]
fn test_directories_get_their_mtime_after_children() {
    let entries: &[(&str, &[u8])] = &[("docs/", b""), ("docs/readme", b"read me")];
    let (dir, archive) = tar_on_disk(entries);
    let out = dir.path().join("out");
    let options = ExtractOptions::new().destination(&out);

    extract_entries(&archive, &Selector::All, &options).unwrap();
    let meta = fs::metadata(out.join("docs")).unwrap();
    assert!(meta.is_dir());
    assert_eq!(FileTime::from_last_modification_time(&meta).unix_seconds(), MTIME as i64);
}

#[test]
fn test_path_traversal_is_refused() {
    let dir = TempDir::new().unwrap();
    let archive = write_file(dir.path(), "evil.tar", &tar_with_raw_name("../escape.txt", b"x"));
    let out = dir.path().join("out");
    let options = ExtractOptions::new().destination(&out);

    let err = extract_entries(&archive, &Selector::All, &options).unwrap_err();
    assert!(matches!(err, Error::PathTraversal { ref path } if path == "../escape.txt"));
    assert!(!dir.path().join("escape.txt").exists());
}

#[test]
fn test_absolute_names_stay_inside_destination() {
    let dir = TempDir::new().unwrap();
    let archive = write_file(dir.path(), "abs.tar", &tar_with_raw_name("/etc/passwd", b"x"));
    let out = dir.path().join("out");
    let options = ExtractOptions::new().destination(&out);

    assert!(extract_entries(&archive, &Selector::All, &options).is_err());
    assert!(!out.join("etc/passwd").exists());
}

#[test]
fn test_extract_without_match_is_empty() {
    let (dir, archive) = tar_on_disk(SCENARIO);
    let options = ExtractOptions::new().destination(dir.path().join("out"));
    let selector = Selector::by_name("missing");
    // nothing matched is not an error for bulk extraction
    assert!(extract_entries(&archive, &selector, &options).unwrap().is_empty());
}

#[test]
fn test_extract_invalid_selector() {
    let (dir, archive) = tar_on_disk(SCENARIO);
    let options = ExtractOptions::new().destination(dir.path().join("out"));
    let err = extract_entries(&archive, &Selector::by_index(0), &options).unwrap_err();
    assert!(err.is_configuration());
}

#[test]
fn test_cancel_after_first_entry_stops_extraction() {
    let entries: &[(&str, &[u8])] = &[("one", &[1; 512]), ("two", &[2; 512]), ("three", &[3; 512])];
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("out");
    let token = CancelToken::new();
    // cancelled once the second header is read
    let host = CancelAt::new(tar_bytes(entries), 1024, token.clone());
    let read = ReadOptions::default().block_size(512).cancel_token(token);
    let options = ExtractOptions::new().read_options(read).destination(&out);

    let err = extract_entries(SharedStream::from_reader(host), &Selector::All, &options).unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert_eq!(fs::read(out.join("one")).unwrap(), vec![1u8; 512]);
    assert!(!out.join("two").exists());
    assert!(!out.join("three").exists());
}

#[test]
fn test_pack_then_list() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("project");
    make_tree(&root, &[("src/lib.rs", b"pub fn f() {}\n"), ("Cargo.toml", b"[package]\n")]);
    let stamp = FileTime::from_unix_time(MTIME as i64, 0);
    filetime::set_file_mtime(root.join("Cargo.toml"), stamp).unwrap();

    let archive = dir.path().join("project.tar");
    let options = PackOptions::new(Format::Tar).strip_prefix(dir.path());
    let packed = pack_files(&archive, &[&root], &options).unwrap();
    assert_eq!(
        packed.entries,
        ["project/", "project/Cargo.toml", "project/src/", "project/src/lib.rs"]
    );
    assert_eq!(packed.bytes, 24);

    let listed = list_entries(&archive, &ReadOptions::default()).unwrap();
    let names: Vec<&str> = listed.iter().map(|e| e.path.as_str()).collect();
    assert_eq!(names, packed.entries);
    let manifest = &listed[1];
    assert_eq!(manifest.size, Some(10));
    assert_eq!(manifest.modified, Some(UNIX_EPOCH + Duration::from_secs(MTIME)));
}

#[test]
fn test_pack_extract_round_trip() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("tree");
    make_tree(&root, &[("a/b/c.txt", b"deep"), ("top.txt", b"shallow")]);

    let archive = dir.path().join("tree.tar");
    let options = PackOptions::new(Format::Tar).strip_prefix(&root);
    pack_files(&archive, &[&root], &options).unwrap();

    let out = dir.path().join("out");
    let extracted =
        extract_entries(&archive, &Selector::All, &ExtractOptions::new().destination(&out)).unwrap();
    assert_eq!(extracted, ["a/", "a/b/", "a/b/c.txt", "top.txt"]);
    assert_eq!(fs::read(out.join("a/b/c.txt")).unwrap(), b"deep");
    assert_eq!(fs::read(out.join("top.txt")).unwrap(), b"shallow");
}

#[cfg(unix)]
#[test]
fn test_symlinks_round_trip() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("links");
    make_tree(&root, &[("target.txt", b"pointed at")]);
    std::os::unix::fs::symlink("target.txt", root.join("alias")).unwrap();

    let archive = dir.path().join("links.tar");
    let options = PackOptions::new(Format::Tar).strip_prefix(&root);
    pack_files(&archive, &[&root], &options).unwrap();

    let out = dir.path().join("out");
    extract_entries(&archive, &Selector::All, &ExtractOptions::new().destination(&out)).unwrap();
    let link = out.join("alias");
    assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
    assert_eq!(fs::read(&link).unwrap(), b"pointed at");
}

#[cfg(feature = "zstd")]
#[test]
fn test_pack_filtered_and_extract() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("data");
    make_tree(&root, &[("x.bin", &[7u8; 4096])]);

    let archive = dir.path().join("data.tar.zst");
    let write = arcstream::WriteOptions::new(Format::Tar).filter(arcstream::Filter::Zstd);
    let options = PackOptions::from(write).strip_prefix(&root);
    pack_files(&archive, &[&root], &options).unwrap();

    let out = dir.path().join("out");
    extract_entries(&archive, &Selector::All, &ExtractOptions::new().destination(&out)).unwrap();
    assert_eq!(fs::read(out.join("x.bin")).unwrap(), vec![7u8; 4096]);
}
