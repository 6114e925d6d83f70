//! Integration tests for write sessions.

mod common;

use std::fs;
use std::io::{Read, Write};

use arcstream::{
    ArchiveReader, ArchiveWriter, Error, Filter, Format, ReadOptions, Selector, WriteMode,
    WriteOptions, WriteState, list_entries,
};
use tempfile::TempDir;

fn read_back(path: &std::path::Path, selector: Selector, options: ReadOptions) -> Vec<u8> {
    let mut reader = ArchiveReader::new(path, selector, options).unwrap();
    let mut data = Vec::new();
    reader.open().unwrap().read_to_end(&mut data).unwrap();
    reader.close().unwrap();
    data
}

fn staging_files(marker: &str) -> usize {
    fs::read_dir(std::env::temp_dir())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(marker))
        .count()
}

#[test]
fn test_too_many_filters_creates_nothing() {
    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("out.tar");
    let options = WriteOptions::new(Format::Tar).filters([Filter::None; 9]);
    let err = ArchiveWriter::new(&dest, "entry", options).unwrap_err();
    assert!(matches!(err, Error::TooManyFilters { count: 9, max: 8 }));
    assert!(!dest.exists());
}

#[test]
fn test_invalid_option_string_creates_nothing() {
    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("out.tar");
    let options = WriteOptions::new(Format::Tar).options("tar:no_such_option");
    assert!(ArchiveWriter::new(&dest, "entry", options).unwrap_err().is_configuration());
    assert!(!dest.exists());
}

#[test]
fn test_deferred_entry_has_size_and_removes_staging() {
    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("out.tar");
    let marker = format!("stage-{}", rand::random::<u64>());
    let name = format!("{marker}.txt");

    let mut writer = ArchiveWriter::new(&dest, name.as_str(), WriteOptions::new(Format::Tar)).unwrap();
    for i in 0..100 {
        writeln!(writer, "row {i}").unwrap();
    }
    assert_eq!(staging_files(&marker), 1);
    writer.close().unwrap();
    assert_eq!(staging_files(&marker), 0);

    let listed = list_entries(&dest, &ReadOptions::default()).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].path, name);
    assert_eq!(listed[0].size, Some(writer.bytes_written()));
    assert!(listed[0].modified.is_some());
}

#[test]
fn test_failed_deferred_session_removes_staging() {
    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("out.tar");
    let marker = format!("cancel-{}", rand::random::<u64>());
    let token = arcstream::CancelToken::new();
    let options = WriteOptions::new(Format::Tar).cancel_token(token.clone());

    let mut writer = ArchiveWriter::new(&dest, format!("{marker}.bin"), options).unwrap();
    writer.write_all(&[1u8; 1000]).unwrap();
    token.cancel();
    assert!(writer.write_all(&[2u8; 1000]).is_err());
    assert_eq!(writer.state(), WriteState::Failed);
    drop(writer);
    assert_eq!(staging_files(&marker), 0);
    assert!(!dest.exists());
}

#[test]
fn test_raw_deferred_mode() {
    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("plain.bin");
    let options = WriteOptions::new(Format::Raw).mode(WriteMode::Deferred);
    let mut writer = ArchiveWriter::compressed_file(&dest, options).unwrap();
    writer.write_all(b"staged then copied").unwrap();
    assert!(!dest.exists());
    writer.close().unwrap();
    assert_eq!(fs::read(&dest).unwrap(), b"staged then copied");
}

#[test]
fn test_direct_tar_is_rejected() {
    let options = WriteOptions::new(Format::Tar).mode(WriteMode::Direct);
    let err = ArchiveWriter::new("never.tar", "x", options).unwrap_err();
    assert!(matches!(err, Error::Unsupported { .. }));
}

#[test]
fn test_passphrase_needs_zip() {
    let options = WriteOptions::new(Format::Tar).passphrase("secret");
    assert!(ArchiveWriter::new("never.tar", "x", options).is_err());
}

#[cfg(feature = "gzip")]
#[test]
fn test_gzip_tar_round_trip() {
    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("out.tar.gz");
    let options = WriteOptions::new(Format::Tar)
        .filter(Filter::Gzip)
        .options("gzip:compression-level=9");
    let content: Vec<u8> = (0..50_000u32).flat_map(|i| i.to_le_bytes()).collect();
    let mut writer = ArchiveWriter::new(&dest, "data/numbers.bin", options).unwrap();
    for chunk in content.chunks(3000) {
        writer.write_all(chunk).unwrap();
    }
    writer.close().unwrap();

    assert_eq!(&fs::read(&dest).unwrap()[..2], &[0x1f, 0x8b]);
    let read = read_back(&dest, Selector::by_name("data/numbers.bin"), ReadOptions::default());
    assert_eq!(read, content);
}

#[cfg(all(feature = "gzip", feature = "bzip2"))]
#[test]
fn test_filter_list_round_trips_with_same_order() {
    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("out.tar.gz.bz2");
    let filters = [Filter::Gzip, Filter::Bzip2];
    let options = WriteOptions::new(Format::Tar).filters(filters);
    let mut writer = ArchiveWriter::new(&dest, "x.txt", options).unwrap();
    writer.write_all(b"layered").unwrap();
    writer.close().unwrap();

    // outermost layer is the last filter in the list
    assert_eq!(&fs::read(&dest).unwrap()[..3], b"BZh");
    let explicit = ReadOptions::default().filters(filters);
    assert_eq!(read_back(&dest, Selector::All, explicit), b"layered");
    assert_eq!(read_back(&dest, Selector::All, ReadOptions::default()), b"layered");
}

#[cfg(feature = "lz4")]
#[test]
fn test_lz4_compressed_file() {
    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("out.lz4");
    let options = WriteOptions::new(Format::Raw).filter(Filter::Lz4);
    let mut writer = ArchiveWriter::compressed_file(&dest, options).unwrap();
    writer.write_all(&[9u8; 100_000]).unwrap();
    writer.close().unwrap();
    let read = read_back(&dest, Selector::RawSingle, ReadOptions::default());
    assert_eq!(read.len(), 100_000);
}

#[cfg(feature = "zip")]
mod zip_output {
    use super::*;

    #[test]
    fn test_zip_direct_stored() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("out.zip");
        let options = WriteOptions::new(Format::Zip).options("zip:compression=store");
        let mut writer = ArchiveWriter::new(&dest, "report.txt", options).unwrap();
        assert_eq!(writer.mode(), WriteMode::Direct);
        writer.write_all(b"stored as is").unwrap();
        writer.close().unwrap();
        assert_eq!(&fs::read(&dest).unwrap()[..4], b"PK\x03\x04");
        assert_eq!(
            read_back(&dest, Selector::by_name("report.txt"), ReadOptions::default()),
            b"stored as is"
        );
    }

    #[test]
    fn test_zip_passphrase_round_trip() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("secret.zip");
        let options = WriteOptions::new(Format::Zip).passphrase("open sesame");
        let mut writer = ArchiveWriter::new(&dest, "keys.txt", options).unwrap();
        writer.write_all(b"top secret").unwrap();
        writer.close().unwrap();

        let mut reader =
            ArchiveReader::new(&dest, Selector::All, ReadOptions::default()).unwrap();
        assert!(matches!(reader.open(), Err(Error::WrongPassword { .. })));
        drop(reader);

        let options = ReadOptions::default().passphrase("open sesame");
        assert_eq!(read_back(&dest, Selector::All, options), b"top secret");
    }

    #[test]
    fn test_zip_rejects_filters() {
        let options = WriteOptions::new(Format::Zip).filter(Filter::Gzip);
        assert!(ArchiveWriter::new("never.zip", "x", options).is_err());
    }
}
