//! Archive format detection from the first block of decoded input.

use crate::codes::Format;

/// Bytes needed to recognize every supported format.
pub(crate) const PROBE_LEN: usize = 512;

/// What the first block of input looks like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Detected {
    /// No bytes at all.
    Empty,
    /// A recognized format, supported or not.
    Format(Format),
    /// Nothing recognizable.
    Unknown,
}

const SIGNATURES: &[(&[u8], Format)] = &[
    (b"PK\x03\x04", Format::Zip),
    (b"PK\x05\x06", Format::Zip),
    (b"PK\x07\x08", Format::Zip),
    (&[b'7', b'z', 0xBC, 0xAF, 0x27, 0x1C], Format::SevenZip),
    (b"Rar!\x1a\x07", Format::Rar),
    (b"MSCF\0\0\0\0", Format::Cab),
    (b"xar!", Format::Xar),
    (b"070701", Format::Cpio),
    (b"070702", Format::Cpio),
    (b"070707", Format::Cpio),
    (&[0xC7, 0x71], Format::Cpio),
    (b"WARC/", Format::Warc),
    (b"#mtree", Format::Mtree),
];

/// Classifies `head`, the first [`PROBE_LEN`] bytes of the input (fewer
/// only when the input is shorter).
pub(crate) fn detect_format(head: &[u8]) -> Detected {
    if head.is_empty() {
        return Detected::Empty;
    }
    if let Some((_, format)) = SIGNATURES.iter().find(|(magic, _)| head.starts_with(magic)) {
        return Detected::Format(*format);
    }
    if is_tar_header(head) {
        return Detected::Format(Format::Tar);
    }
    if head.len() > 21 && head[2..5] == *b"-lh" && head[6] == b'-' {
        return Detected::Format(Format::Lha);
    }
    Detected::Unknown
}

/// Accepts a ustar or GNU header, a v7 header with a valid checksum, or
/// the all-zero block of an empty archive.
pub(crate) fn is_tar_header(head: &[u8]) -> bool {
    let Some(block) = head.get(..512) else {
        return false;
    };
    if block.iter().all(|b| *b == 0) {
        return true;
    }
    let mut header = tar::Header::new_old();
    header.as_mut_bytes().copy_from_slice(block);
    let Ok(stored) = header.cksum() else {
        return false;
    };
    header.set_cksum();
    header.cksum().is_ok_and(|computed| computed == stored)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tar_block(name: &str) -> Vec<u8> {
        let mut header = tar::Header::new_ustar();
        header.set_path(name).unwrap();
        header.set_size(0);
        header.set_cksum();
        header.as_bytes().to_vec()
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(detect_format(&[]), Detected::Empty);
    }

    #[test]
    fn test_zip_and_tar() {
        assert_eq!(detect_format(b"PK\x03\x04rest"), Detected::Format(Format::Zip));
        assert_eq!(detect_format(&tar_block("a.txt")), Detected::Format(Format::Tar));
        assert_eq!(detect_format(&[0u8; 512]), Detected::Format(Format::Tar));
    }

    #[test]
    fn test_bad_checksum_is_not_tar() {
        let mut block = tar_block("a.txt");
        block[0] = b'b';
        assert_eq!(detect_format(&block), Detected::Unknown);
    }

    #[test]
    fn test_recognized_unsupported_formats() {
        assert_eq!(
            detect_format(b"Rar!\x1a\x07\x00"),
            Detected::Format(Format::Rar)
        );
        assert_eq!(detect_format(b"070701000"), Detected::Format(Format::Cpio));
    }

    #[test]
    fn test_short_text_is_unknown() {
        assert_eq!(detect_format(b"hello world"), Detected::Unknown);
    }
}
