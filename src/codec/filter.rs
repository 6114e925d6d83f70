//! Compression filter chains.
//!
//! Filters are listed in the order they are applied when writing: data
//! passes through `filters[0]` first and `filters[last]` sits next to the
//! file. Reading undoes them from the file side, so both chains are built
//! by walking the list backwards.

use std::io::{self, Read, Seek, SeekFrom, Write};

use super::detect::{Detected, detect_format};
use crate::codes::{FILTER_MAX, Filter};
use crate::error::from_codec_io;
use crate::options::OptionString;
use crate::stream::StreamBinding;
use crate::{Error, Result};

/// Bytes inspected when sniffing and trial-decoding a filter; the
/// binding caps this at its block size.
const TRIAL_LEN: usize = 4096;

/// An encoder stage that must be finished explicitly to flush its trailer.
pub(crate) trait Encoder: Write {
    /// Finishes this stage and every stage below it.
    fn finish(self: Box<Self>) -> io::Result<()>;
}

/// The file at the bottom of an encoder chain.
pub(crate) struct FileSink {
    inner: io::BufWriter<std::fs::File>,
}

impl FileSink {
    pub(crate) fn new(file: std::fs::File) -> Self {
        Self {
            inner: io::BufWriter::new(file),
        }
    }
}

impl Write for FileSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl Encoder for FileSink {
    fn finish(self: Box<Self>) -> io::Result<()> {
        let file = self.inner.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()
    }
}

/// One compression stage wrapping the rest of the chain.
enum FilterEncoder {
    #[cfg(feature = "gzip")]
    Gzip(flate2::write::GzEncoder<Box<dyn Encoder>>),
    #[cfg(feature = "bzip2")]
    Bzip2(bzip2::write::BzEncoder<Box<dyn Encoder>>),
    #[cfg(feature = "xz")]
    Xz(xz2::write::XzEncoder<Box<dyn Encoder>>),
    #[cfg(feature = "zstd")]
    Zstd(zstd::stream::write::Encoder<'static, Box<dyn Encoder>>),
    #[cfg(feature = "lz4")]
    Lz4(lz4_flex::frame::FrameEncoder<Box<dyn Encoder>>),
}

impl std::fmt::Debug for FilterEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterEncoder").finish_non_exhaustive()
    }
}

impl Write for FilterEncoder {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match *self {
            #[cfg(feature = "gzip")]
            FilterEncoder::Gzip(ref mut e) => e.write(buf),
            #[cfg(feature = "bzip2")]
            FilterEncoder::Bzip2(ref mut e) => e.write(buf),
            #[cfg(feature = "xz")]
            FilterEncoder::Xz(ref mut e) => e.write(buf),
            #[cfg(feature = "zstd")]
            FilterEncoder::Zstd(ref mut e) => e.write(buf),
            #[cfg(feature = "lz4")]
            FilterEncoder::Lz4(ref mut e) => e.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match *self {
            #[cfg(feature = "gzip")]
            FilterEncoder::Gzip(ref mut e) => e.flush(),
            #[cfg(feature = "bzip2")]
            FilterEncoder::Bzip2(ref mut e) => e.flush(),
            #[cfg(feature = "xz")]
            FilterEncoder::Xz(ref mut e) => e.flush(),
            #[cfg(feature = "zstd")]
            FilterEncoder::Zstd(ref mut e) => e.flush(),
            #[cfg(feature = "lz4")]
            FilterEncoder::Lz4(ref mut e) => e.flush(),
        }
    }
}

impl Encoder for FilterEncoder {
    fn finish(self: Box<Self>) -> io::Result<()> {
        let inner: Box<dyn Encoder> = match *self {
            #[cfg(feature = "gzip")]
            FilterEncoder::Gzip(e) => e.finish()?,
            #[cfg(feature = "bzip2")]
            FilterEncoder::Bzip2(e) => e.finish()?,
            #[cfg(feature = "xz")]
            FilterEncoder::Xz(e) => e.finish()?,
            #[cfg(feature = "zstd")]
            FilterEncoder::Zstd(e) => e.finish()?,
            #[cfg(feature = "lz4")]
            FilterEncoder::Lz4(e) => e.finish().map_err(io::Error::other)?,
        };
        inner.finish()
    }
}

#[allow(unused_variables)]
fn wrap_encoder(
    filter: Filter,
    inner: Box<dyn Encoder>,
    options: &OptionString,
) -> Result<Box<dyn Encoder>> {
    let level = options.compression_level(filter)?;
    let stage: FilterEncoder = match filter {
        Filter::None => return Ok(inner),
        #[cfg(feature = "gzip")]
        Filter::Gzip => FilterEncoder::Gzip(flate2::write::GzEncoder::new(
            inner,
            flate2::Compression::new(level.unwrap_or(6)),
        )),
        #[cfg(feature = "bzip2")]
        Filter::Bzip2 => FilterEncoder::Bzip2(bzip2::write::BzEncoder::new(
            inner,
            bzip2::Compression::new(level.unwrap_or(9)),
        )),
        #[cfg(feature = "xz")]
        Filter::Xz => FilterEncoder::Xz(xz2::write::XzEncoder::new(inner, level.unwrap_or(6))),
        #[cfg(feature = "xz")]
        Filter::Lzma => {
            let preset = xz2::stream::LzmaOptions::new_preset(level.unwrap_or(6))
                .map_err(|e| Error::codec("lzma_alone_encoder", e))?;
            let stream = xz2::stream::Stream::new_lzma_encoder(&preset)
                .map_err(|e| Error::codec("lzma_alone_encoder", e))?;
            FilterEncoder::Xz(xz2::write::XzEncoder::new_stream(inner, stream))
        }
        #[cfg(feature = "zstd")]
        Filter::Zstd => {
            let level = level.unwrap_or(3) as i32;
            let encoder = zstd::stream::write::Encoder::new(inner, level)
                .map_err(|e| from_codec_io("zstd_encoder", e))?;
            FilterEncoder::Zstd(encoder)
        }
        #[cfg(feature = "lz4")]
        Filter::Lz4 => FilterEncoder::Lz4(lz4_flex::frame::FrameEncoder::new(inner)),
        other => {
            return Err(Error::unsupported(format!(
                "filter '{other}' is not available in this build"
            )));
        }
    };
    log::trace!("added {filter} encoder");
    Ok(Box::new(stage))
}

/// Builds the encoder chain for `filters` on top of `sink`.
pub(crate) fn encoder_chain(
    sink: Box<dyn Encoder>,
    filters: &[Filter],
    options: &OptionString,
) -> Result<Box<dyn Encoder>> {
    filters
        .iter()
        .rev()
        .try_fold(sink, |inner, filter| wrap_encoder(*filter, inner, options))
}

#[allow(unused_variables)]
fn wrap_decoder(filter: Filter, input: Box<dyn Read>) -> Result<Box<dyn Read>> {
    let stage: Box<dyn Read> = match filter {
        Filter::None => input,
        #[cfg(feature = "gzip")]
        Filter::Gzip => Box::new(flate2::read::MultiGzDecoder::new(input)),
        #[cfg(feature = "bzip2")]
        Filter::Bzip2 => Box::new(bzip2::read::MultiBzDecoder::new(input)),
        #[cfg(feature = "xz")]
        Filter::Xz => Box::new(xz2::read::XzDecoder::new_multi_decoder(input)),
        #[cfg(feature = "xz")]
        Filter::Lzma => {
            let stream = xz2::stream::Stream::new_lzma_decoder(u64::MAX)
                .map_err(|e| Error::codec("lzma_alone_decoder", e))?;
            Box::new(xz2::read::XzDecoder::new_stream(input, stream))
        }
        #[cfg(feature = "zstd")]
        Filter::Zstd => Box::new(
            zstd::stream::read::Decoder::new(input)
                .map_err(|e| from_codec_io("zstd_decoder", e))?,
        ),
        #[cfg(feature = "lz4")]
        Filter::Lz4 => Box::new(lz4_flex::frame::FrameDecoder::new(input)),
        other => {
            return Err(Error::unsupported(format!(
                "filter '{other}' is not available in this build"
            )));
        }
    };
    Ok(stage)
}

/// Recognizes a filter from the first bytes of a stream.
pub(crate) fn sniff_filter(head: &[u8]) -> Option<Filter> {
    const SIGNATURES: &[(&[u8], Filter)] = &[
        (&[0x1F, 0x8B, 0x08], Filter::Gzip),
        (&[0x1F, 0x9D], Filter::Compress),
        (&[0xFD, b'7', b'z', b'X', b'Z', 0x00], Filter::Xz),
        (&[0x28, 0xB5, 0x2F, 0xFD], Filter::Zstd),
        (&[0x04, 0x22, 0x4D, 0x18], Filter::Lz4),
        (b"LZIP", Filter::Lzip),
        (b"LRZI", Filter::Lrzip),
        (&[0x89, b'L', b'Z', b'O', 0x00], Filter::Lzop),
        (b"GRZipII", Filter::Grzip),
    ];
    if let Some((_, filter)) = SIGNATURES.iter().find(|(magic, _)| head.starts_with(magic)) {
        return Some(*filter);
    }
    if is_bzip2(head) {
        return Some(Filter::Bzip2);
    }
    if is_uuencode(head) {
        return Some(Filter::Uuencode);
    }
    is_lzma_alone(head).then_some(Filter::Lzma)
}

/// `BZh`, a block size digit, then the magic of the first block or of
/// the end-of-stream marker.
fn is_bzip2(head: &[u8]) -> bool {
    const BLOCK: &[u8] = &[0x31, 0x41, 0x59, 0x26, 0x53, 0x59];
    const END: &[u8] = &[0x17, 0x72, 0x45, 0x38, 0x50, 0x90];
    let Some(rest) = head.strip_prefix(b"BZh") else {
        return false;
    };
    match rest.split_first() {
        Some((level, magic)) if (b'1'..=b'9').contains(level) => {
            magic.starts_with(BLOCK) || magic.starts_with(END)
        }
        _ => false,
    }
}

/// `begin-base64 `, or `begin ` followed by an octal mode and a space.
fn is_uuencode(head: &[u8]) -> bool {
    if head.starts_with(b"begin-base64 ") {
        return true;
    }
    let Some(rest) = head.strip_prefix(b"begin ") else {
        return false;
    };
    let digits = rest.iter().take_while(|b| (b'0'..=b'7').contains(*b)).count();
    (1..=4).contains(&digits) && rest.get(digits) == Some(&b' ')
}

/// Sniffs a filter worth decoding: `head` must not already be a
/// container, the filter needs a backend and its decoder must accept
/// the first bytes.
fn detect_filter(head: &[u8]) -> Option<Filter> {
    if matches!(detect_format(head), Detected::Format(_)) {
        return None;
    }
    let filter = sniff_filter(head)?;
    if !filter.is_supported() {
        log::debug!("{filter} signature without a backend, reading unfiltered");
        return None;
    }
    if !decodes(filter, head) {
        log::debug!("{filter} signature does not decode, reading unfiltered");
        return None;
    }
    Some(filter)
}

/// Runs the decoder over a copy of `head`; running out of input is fine,
/// any other error rejects the filter.
fn decodes(filter: Filter, head: &[u8]) -> bool {
    let Ok(mut trial) = wrap_decoder(filter, Box::new(io::Cursor::new(head.to_vec()))) else {
        return false;
    };
    let mut byte = [0u8; 1];
    loop {
        match trial.read(&mut byte) {
            Ok(_) => return true,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return e.kind() == io::ErrorKind::UnexpectedEof,
        }
    }
}

/// The legacy `.lzma` container has no magic; accept the common
/// properties byte with a plausible dictionary size.
fn is_lzma_alone(head: &[u8]) -> bool {
    if head.len() < 13 || head[0] != 0x5D {
        return false;
    }
    let dict = u32::from_le_bytes([head[1], head[2], head[3], head[4]]);
    let plausible_dict = dict >= 4096
        && (dict.is_power_of_two() || (dict % 3 == 0 && (dict / 3).is_power_of_two()));
    let size = u64::from_le_bytes([
        head[5], head[6], head[7], head[8], head[9], head[10], head[11], head[12],
    ]);
    plausible_dict && (size == u64::MAX || size < 1 << 48)
}

/// Reader with a lookahead buffer, used on decoded streams.
pub(crate) struct Peekable<R> {
    inner: R,
    head: Vec<u8>,
    pos: usize,
}

impl<R: Read> Peekable<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self {
            inner,
            head: Vec::new(),
            pos: 0,
        }
    }

    /// Returns up to `len` upcoming bytes without consuming them.
    pub(crate) fn peek(&mut self, len: usize) -> io::Result<&[u8]> {
        if self.pos > 0 {
            self.head.drain(..self.pos);
            self.pos = 0;
        }
        let mut chunk = [0u8; 512];
        while self.head.len() < len {
            let want = (len - self.head.len()).min(chunk.len());
            match self.inner.read(&mut chunk[..want]) {
                Ok(0) => break,
                Ok(n) => self.head.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(&self.head[..len.min(self.head.len())])
    }

    fn into_inner_read(self) -> Box<dyn Read>
    where
        R: 'static,
    {
        let rest = self.head[self.pos..].to_vec();
        Box::new(io::Cursor::new(rest).chain(self.inner))
    }
}

impl<R: Read> Read for Peekable<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos < self.head.len() {
            let n = (self.head.len() - self.pos).min(buf.len());
            buf[..n].copy_from_slice(&self.head[self.pos..self.pos + n]);
            self.pos += n;
            return Ok(n);
        }
        self.inner.read(buf)
    }
}

/// A session's input after its filter chain has been applied.
pub(crate) enum DecodedInput {
    /// No filter: the binding itself, seekable when the host is.
    Plain(StreamBinding),
    /// At least one filter: forward-only.
    Filtered(Peekable<Box<dyn Read>>),
}

impl DecodedInput {
    /// Applies `filters`, or detects them when `filters` is `None`.
    ///
    /// Returns the input with the filters that ended up in the chain,
    /// listed in write-application order.
    pub(crate) fn open(
        mut binding: StreamBinding,
        filters: Option<&[Filter]>,
    ) -> Result<(Self, Vec<Filter>)> {
        let applied: Vec<Filter> = match filters {
            Some(list) => list.iter().copied().filter(|f| *f != Filter::None).collect(),
            None => {
                let head = binding.peek(TRIAL_LEN)?;
                detect_filter(head).into_iter().collect()
            }
        };
        if applied.is_empty() {
            return Ok((DecodedInput::Plain(binding), applied));
        }

        let mut reader: Box<dyn Read> = Box::new(binding);
        for filter in applied.iter().rev() {
            filter.ensure_supported()?;
            reader = wrap_decoder(*filter, reader)?;
            log::debug!("reading through {filter} filter");
        }
        let mut input = Peekable::new(reader);
        if filters.is_some() {
            return Ok((DecodedInput::Filtered(input), applied));
        }

        // detected filters are peeled one layer at a time
        let mut detected = applied;
        while detected.len() < FILTER_MAX {
            let head = input
                .peek(TRIAL_LEN)
                .map_err(|e| from_codec_io("read_filter_signature", e))?;
            let Some(next) = detect_filter(head) else {
                break;
            };
            let reader = wrap_decoder(next, input.into_inner_read())?;
            log::debug!("reading through nested {next} filter");
            input = Peekable::new(reader);
            detected.insert(0, next);
        }
        Ok((DecodedInput::Filtered(input), detected))
    }

    pub(crate) fn is_seekable(&self) -> bool {
        match self {
            DecodedInput::Plain(binding) => binding.is_seekable(),
            DecodedInput::Filtered(_) => false,
        }
    }

    pub(crate) fn peek(&mut self, len: usize) -> io::Result<&[u8]> {
        match self {
            DecodedInput::Plain(binding) => binding.peek(len),
            DecodedInput::Filtered(input) => input.peek(len),
        }
    }

    /// Discards `count` bytes, seeking when possible.
    pub(crate) fn skip(&mut self, count: u64) -> io::Result<()> {
        if count == 0 {
            return Ok(());
        }
        if self.is_seekable() {
            let offset = i64::try_from(count).map_err(io::Error::other)?;
            self.seek(SeekFrom::Current(offset))?;
            return Ok(());
        }
        let copied = io::copy(&mut self.by_ref().take(count), &mut io::sink())?;
        if copied < count {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "archive truncated inside entry data",
            ));
        }
        Ok(())
    }
}

impl Read for DecodedInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            DecodedInput::Plain(binding) => binding.read(buf),
            DecodedInput::Filtered(input) => input.read(buf),
        }
    }
}

impl Seek for DecodedInput {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            DecodedInput::Plain(binding) => binding.seek(pos),
            DecodedInput::Filtered(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "filtered input is not seekable",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::SharedStream;

    fn bind(bytes: Vec<u8>) -> StreamBinding {
        StreamBinding::bind(SharedStream::from_reader(io::Cursor::new(bytes)), 1024).unwrap()
    }

    #[test]
    fn test_sniff_signatures() {
        assert_eq!(sniff_filter(&[0x1F, 0x8B, 0x08]), Some(Filter::Gzip));
        assert_eq!(sniff_filter(b"BZh91AY&SY\x00"), Some(Filter::Bzip2));
        assert_eq!(sniff_filter(b"BZh9 report.txt"), None);
        assert_eq!(sniff_filter(b"BZx"), None);
        assert_eq!(sniff_filter(b"begin 644 notes.txt\n"), Some(Filter::Uuencode));
        assert_eq!(sniff_filter(b"begin-base64 644 notes.txt\n"), Some(Filter::Uuencode));
        assert_eq!(sniff_filter(b"begin the meeting notes\n"), None);
        assert_eq!(sniff_filter(b"begin 9 lives"), None);
        assert_eq!(sniff_filter(&[0x28, 0xB5, 0x2F, 0xFD, 0]), Some(Filter::Zstd));
        assert_eq!(sniff_filter(b"LZIP\x01"), Some(Filter::Lzip));
        assert_eq!(sniff_filter(b"plain text"), None);
    }

    #[test]
    fn test_sniff_lzma_alone() {
        let mut head = vec![0x5D, 0x00, 0x00, 0x80, 0x00];
        head.extend_from_slice(&[0xFF; 8]);
        assert_eq!(sniff_filter(&head), Some(Filter::Lzma));
        head[1] = 0x07;
        assert_eq!(sniff_filter(&head), None);
    }

    #[test]
    fn test_peekable_keeps_bytes() {
        let mut input = Peekable::new(&b"abcdef"[..]);
        assert_eq!(input.peek(3).unwrap(), b"abc");
        let mut two = [0u8; 2];
        input.read_exact(&mut two).unwrap();
        assert_eq!(input.peek(10).unwrap(), b"cdef");
        let mut rest = Vec::new();
        input.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"cdef");
    }

    #[test]
    fn test_plain_input_has_no_filters() {
        let (input, applied) = DecodedInput::open(bind(b"hello".to_vec()), None).unwrap();
        assert!(applied.is_empty());
        assert!(matches!(input, DecodedInput::Plain(_)));
    }

    #[test]
    fn test_filter_without_backend_reads_unfiltered() {
        let (input, applied) = DecodedInput::open(bind(b"LZIP\x01rest".to_vec()), None).unwrap();
        assert!(applied.is_empty());
        assert!(matches!(input, DecodedInput::Plain(_)));
    }

    #[test]
    fn test_container_wins_over_filter_signature() {
        let mut header = tar::Header::new_gnu();
        header.set_path("begin 644 x").unwrap();
        header.set_size(0);
        header.set_cksum();
        let mut block = header.as_bytes().to_vec();
        block.extend_from_slice(&[0u8; 1024]);
        assert_eq!(sniff_filter(&block), Some(Filter::Uuencode));
        assert_eq!(detect_filter(&block), None);
    }

    #[cfg(feature = "bzip2")]
    #[test]
    fn test_undecodable_signature_is_rejected() {
        let mut head = b"BZh91AY&SY".to_vec();
        head.extend_from_slice(&[0xFF; 64]);
        assert_eq!(sniff_filter(&head), Some(Filter::Bzip2));
        assert_eq!(detect_filter(&head), None);
    }

    #[cfg(feature = "gzip")]
    #[test]
    fn test_nested_filters_detected() {
        let mut inner = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
        inner.write_all(b"twice wrapped").unwrap();
        let once = inner.finish().unwrap();
        let mut outer = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
        outer.write_all(&once).unwrap();
        let twice = outer.finish().unwrap();

        let (mut input, applied) = DecodedInput::open(bind(twice), None).unwrap();
        assert_eq!(applied, vec![Filter::Gzip, Filter::Gzip]);
        let mut out = String::new();
        input.read_to_string(&mut out).unwrap();
        assert_eq!(out, "twice wrapped");
    }

    #[cfg(all(feature = "gzip", feature = "bzip2"))]
    #[test]
    fn test_encoder_chain_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let sink = Box::new(FileSink::new(std::fs::File::create(&path).unwrap()));
        let options = OptionString::default();
        let mut chain = encoder_chain(sink, &[Filter::Gzip, Filter::Bzip2], &options).unwrap();
        chain.write_all(b"layered").unwrap();
        chain.finish().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(b"BZh"));
        let host = SharedStream::from_path(&path);
        let binding = StreamBinding::bind(host, 1024).unwrap();
        let (mut input, _) =
            DecodedInput::open(binding, Some(&[Filter::Gzip, Filter::Bzip2][..])).unwrap();
        let mut out = String::new();
        input.read_to_string(&mut out).unwrap();
        assert_eq!(out, "layered");
    }
}
