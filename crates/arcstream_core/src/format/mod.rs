//! Container formats: detection, entry readers and entry writers.
//!
//! Readers walk entries strictly forward and hand each payload to a visitor
//! while the entry is current; writers take a header with a known size
//! together with a reader yielding exactly that many payload bytes.

mod ar;
mod cpio;
mod tar;
mod zip;

use crate::entry::EntryHeader;
use crate::filter::{Compression, Encoder};
use crate::options::{format_code, ArchiveOptions, WriteFormat};
use crate::stream::SinkAdapter;
use crate::{Error, Result};
use std::io::{self, BufWriter, Read, Seek, Write};

/// Bytes needed to recognize every supported container
pub(crate) const FORMAT_PEEK_LEN: usize = 512;

/// Writers hand output to the sink in blocks of this size
pub const WRITE_BLOCK_SIZE: usize = 1024;

/// Longest member name, or GNU ar name table, accepted on read
pub(crate) const MAX_NAME_LEN: u64 = 64 * 1024;

/// Detected container format, down to the variant when the header tells it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Zero bytes of input
    Empty,
    /// Pre-POSIX tar, or an archive holding only end-of-archive blocks
    Tar,
    TarUstar,
    TarPax,
    TarGnu,
    Zip,
    /// Portable ASCII ("odc")
    CpioOdc,
    /// SVR4 "newc"
    CpioNewc,
    /// SVR4 "newc" with checksums
    CpioCrc,
    Ar,
    ArGnu,
    ArBsd,
}

impl Format {
    pub fn code(self) -> i32 {
        match self {
            Format::Empty => format_code::EMPTY,
            Format::Tar => format_code::TAR,
            Format::TarUstar => format_code::TAR_USTAR,
            Format::TarPax => format_code::TAR_PAX,
            Format::TarGnu => format_code::TAR_GNU,
            Format::Zip => format_code::ZIP,
            Format::CpioOdc => format_code::CPIO_POSIX,
            Format::CpioNewc => format_code::CPIO_SVR4_NOCRC,
            Format::CpioCrc => format_code::CPIO_SVR4_CRC,
            Format::Ar => format_code::AR,
            Format::ArGnu => format_code::AR_GNU,
            Format::ArBsd => format_code::AR_BSD,
        }
    }

    /// Identify the container from the head of the (decompressed) stream.
    pub fn detect(head: &[u8]) -> Option<Format> {
        if head.is_empty() {
            return Some(Format::Empty);
        }
        if head.starts_with(b"PK\x03\x04") || head.starts_with(b"PK\x05\x06") {
            return Some(Format::Zip);
        }
        if head.starts_with(b"070701") {
            return Some(Format::CpioNewc);
        }
        if head.starts_with(b"070702") {
            return Some(Format::CpioCrc);
        }
        if head.starts_with(b"070707") {
            return Some(Format::CpioOdc);
        }
        if head.starts_with(ar::MAGIC) {
            return Some(Format::Ar);
        }
        tar::detect(head)
    }
}

/// Read `buf.len()` bytes unless the input ends first; returns the count read.
pub(crate) fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Discard exactly `len` bytes or fail with `what`.
pub(crate) fn discard<R: Read + ?Sized>(reader: &mut R, len: u64, what: &str) -> Result<()> {
    let skipped = io::copy(&mut reader.take(len), &mut io::sink())?;
    if skipped != len {
        return Err(Error::codec(format!("Truncated {} archive", what)));
    }
    Ok(())
}

/// Consume whatever payload a visitor left unread.
fn drain<R: Read + ?Sized>(data: &mut R) -> Result<()> {
    io::copy(data, &mut io::sink())?;
    Ok(())
}

/// Receives one entry: its header, then its payload as a reader that ends
/// with the entry.
pub(crate) type Visit<'v> = dyn FnMut(&EntryHeader, &mut dyn Read) -> Result<()> + 'v;

/// Forward-only entry walk over one container
pub(crate) trait EntryReader {
    /// Hand the next entry to `visit` and discard what it left unread.
    /// Returns `false` at end of archive.
    fn next_entry(&mut self, visit: &mut Visit<'_>) -> Result<bool>;

    fn format(&self) -> Format;
}

struct EmptyReader;

impl EntryReader for EmptyReader {
    fn next_entry(&mut self, _visit: &mut Visit<'_>) -> Result<bool> {
        Ok(false)
    }

    fn format(&self) -> Format {
        Format::Empty
    }
}

/// Build the reader for a detected format.
pub(crate) fn reader<'a>(format: Format, input: Box<dyn Read + 'a>) -> Box<dyn EntryReader + 'a> {
    match format {
        Format::Empty => Box::new(EmptyReader),
        Format::Tar | Format::TarUstar | Format::TarPax | Format::TarGnu => {
            Box::new(tar::TarReader::new(input, format))
        }
        Format::Zip => Box::new(zip::ZipReader::new(input)),
        Format::CpioOdc | Format::CpioNewc | Format::CpioCrc => {
            Box::new(cpio::CpioReader::new(input, format))
        }
        Format::Ar | Format::ArGnu | Format::ArBsd => Box::new(ar::ArReader::new(input)),
    }
}

// ============================================================================
// Writers
// ============================================================================

/// Entry-at-a-time archive writer
pub(crate) trait EntryWriter {
    type Sink;

    /// Write one entry. `header.size` must be set and `data` must yield
    /// exactly that many bytes.
    fn append(&mut self, header: &EntryHeader, data: &mut dyn Read) -> Result<()>;

    /// Write trailers and return the underlying sink.
    fn finish(self) -> Result<Self::Sink>;
}

/// Size a writer needs before the first payload byte
fn declared_size(header: &EntryHeader) -> Result<u64> {
    header
        .size
        .ok_or_else(|| Error::codec(format!("size of '{}' must be known before its header", header.path)))
}

/// Output stack of stream formats: format writer over compression over
/// fixed-size blocks over the caller's sink.
pub(crate) type BlockSink<W> = BufWriter<SinkAdapter<W>>;
type StreamSink<W> = Encoder<BlockSink<W>>;

pub(crate) fn block_sink<W: Write>(sink: W) -> BlockSink<W> {
    BufWriter::with_capacity(WRITE_BLOCK_SIZE, SinkAdapter::new(sink))
}

pub(crate) fn unwrap_block_sink<W: Write>(sink: BlockSink<W>) -> Result<W> {
    let adapter = sink.into_inner().map_err(|e| Error::Io(e.into_error()))?;
    Ok(adapter.into_inner())
}

fn finish_stream<W: Write>(encoder: StreamSink<W>) -> Result<W> {
    unwrap_block_sink(encoder.finish()?)
}

/// Writer for one open write session
pub(crate) enum FormatWriter<W: Write + Seek> {
    Tar(tar::TarWriter<StreamSink<W>>),
    Cpio(cpio::CpioWriter<StreamSink<W>>),
    Ar(ar::ArWriter<StreamSink<W>>),
    Zip(zip::ZipEntryWriter<BlockSink<W>>),
}

impl<W: Write + Seek> FormatWriter<W> {
    pub(crate) fn new(sink: W, options: &ArchiveOptions) -> Result<Self> {
        options.validate()?;

        if options.format == WriteFormat::Zip {
            let writer = zip::ZipEntryWriter::new(block_sink(sink), options.algorithm, options.level);
            return Ok(FormatWriter::Zip(writer));
        }

        let compression = options.algorithm.stream_compression().unwrap_or(Compression::None);
        let encoder = Encoder::new(block_sink(sink), compression, options.level)?;
        let writer = match options.format {
            WriteFormat::Tar => FormatWriter::Tar(tar::TarWriter::new(encoder)),
            WriteFormat::Cpio => FormatWriter::Cpio(cpio::CpioWriter::new(encoder)),
            WriteFormat::Ar => FormatWriter::Ar(ar::ArWriter::new(encoder)),
            WriteFormat::Zip => unreachable!("zip handled above"),
        };
        Ok(writer)
    }
}

impl<W: Write + Seek> EntryWriter for FormatWriter<W> {
    type Sink = W;

    fn append(&mut self, header: &EntryHeader, data: &mut dyn Read) -> Result<()> {
        match self {
            FormatWriter::Tar(w) => w.append(header, data),
            FormatWriter::Cpio(w) => w.append(header, data),
            FormatWriter::Ar(w) => w.append(header, data),
            FormatWriter::Zip(w) => w.append(header, data),
        }
    }

    fn finish(self) -> Result<W> {
        match self {
            FormatWriter::Tar(w) => finish_stream(w.finish()?),
            FormatWriter::Cpio(w) => finish_stream(w.finish()?),
            FormatWriter::Ar(w) => finish_stream(w.finish()?),
            FormatWriter::Zip(w) => unwrap_block_sink(w.finish()?),
        }
    }
}

/// Payload reader that fails unless its input yields exactly the declared
/// number of bytes.
pub(crate) struct ExactSize<'r> {
    inner: &'r mut dyn Read,
    remaining: u64,
}

impl<'r> ExactSize<'r> {
    pub(crate) fn new(inner: &'r mut dyn Read, size: u64) -> Self {
        Self { inner, remaining: size }
    }
}

impl Read for ExactSize<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.remaining == 0 {
            let mut extra = [0u8; 1];
            if read_full(&mut *self.inner, &mut extra)? > 0 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "entry payload exceeds its declared size",
                ));
            }
            return Ok(0);
        }
        let want = buf.len().min(self.remaining.min(usize::MAX as u64) as usize);
        let n = self.inner.read(&mut buf[..want])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("entry payload is {} bytes shorter than its declared size", self.remaining),
            ));
        }
        self.remaining -= n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect() {
        assert_eq!(Format::detect(b""), Some(Format::Empty));
        assert_eq!(Format::detect(b"PK\x03\x04rest"), Some(Format::Zip));
        assert_eq!(Format::detect(b"PK\x05\x06"), Some(Format::Zip));
        assert_eq!(Format::detect(b"07070100000001"), Some(Format::CpioNewc));
        assert_eq!(Format::detect(b"070707000001"), Some(Format::CpioOdc));
        assert_eq!(Format::detect(b"!<arch>\n"), Some(Format::Ar));
        assert_eq!(Format::detect(&[0u8; 512]), Some(Format::Tar));
        assert_eq!(Format::detect(b"definitely not an archive"), None);
    }

    #[test]
    fn test_exact_size() {
        let mut data: &[u8] = b"abc";
        let mut out = Vec::new();
        io::copy(&mut ExactSize::new(&mut data, 3), &mut out).unwrap();
        assert_eq!(out, b"abc");

        let mut data: &[u8] = b"abcd";
        let err = io::copy(&mut ExactSize::new(&mut data, 3), &mut io::sink()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        let mut data: &[u8] = b"ab";
        let err = io::copy(&mut ExactSize::new(&mut data, 3), &mut io::sink()).unwrap_err();
        assert_eq!(err.to_string(), "entry payload is 1 bytes shorter than its declared size");
    }
}
