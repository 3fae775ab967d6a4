//! Compression filters: magic-byte detection, stream decoders and encoders.

use crate::options::compression_code;
use crate::{Error, Result};
use std::io::{self, Read, Write};
use xz2::stream::{LzmaOptions, Stream};

/// Bytes needed to recognize every supported compression magic
pub(crate) const MAGIC_PEEK_LEN: usize = 13;

/// Stream-level compression applied around the container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Bzip2,
    /// Unix `compress` (LZW). Recognized but not decodable.
    Compress,
    Lzma,
    Xz,
}

impl Compression {
    pub fn code(self) -> i32 {
        match self {
            Compression::None => compression_code::NONE,
            Compression::Gzip => compression_code::GZIP,
            Compression::Bzip2 => compression_code::BZIP2,
            Compression::Compress => compression_code::COMPRESS,
            Compression::Lzma => compression_code::LZMA,
            Compression::Xz => compression_code::XZ,
        }
    }

    /// Identify the compression from the first bytes of a stream.
    pub fn detect(head: &[u8]) -> Compression {
        if head.starts_with(&[0x1f, 0x8b]) {
            Compression::Gzip
        } else if head.starts_with(b"BZh") && head.len() > 3 && (b'1'..=b'9').contains(&head[3]) {
            Compression::Bzip2
        } else if head.starts_with(&[0xfd, b'7', b'z', b'X', b'Z', 0x00]) {
            Compression::Xz
        } else if head.starts_with(&[0x1f, 0x9d]) {
            Compression::Compress
        } else if looks_like_lzma(head) {
            Compression::Lzma
        } else {
            Compression::None
        }
    }
}

/// `.lzma` (lzma-alone) has no magic; check the properties byte and the
/// dictionary size the way bidders usually do.
fn looks_like_lzma(head: &[u8]) -> bool {
    if head.len() < MAGIC_PEEK_LEN || head[0] != 0x5d {
        return false;
    }

    let dict = u32::from_le_bytes([head[1], head[2], head[3], head[4]]);
    if dict == 0 {
        return false;
    }
    let dict_ok = dict.is_power_of_two() && dict >= 1 << 12
        || (dict >> dict.trailing_zeros()) == 3 && dict >= 3 << 11;
    if !dict_ok {
        return false;
    }

    let mut size = [0u8; 8];
    size.copy_from_slice(&head[5..13]);
    let size = u64::from_le_bytes(size);
    size == u64::MAX || size < 1 << 40
}

/// Lets the handle inspect the head of a stream without consuming it.
pub(crate) struct PeekReader<R> {
    inner: R,
    head: Vec<u8>,
    pos: usize,
}

impl<R: Read> PeekReader<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self {
            inner,
            head: Vec::new(),
            pos: 0,
        }
    }

    /// Return up to `len` unread bytes, fewer only at end of input.
    pub(crate) fn peek(&mut self, len: usize) -> io::Result<&[u8]> {
        let mut chunk = [0u8; 512];
        while self.head.len() - self.pos < len {
            let want = (len - (self.head.len() - self.pos)).min(chunk.len());
            match self.inner.read(&mut chunk[..want]) {
                Ok(0) => break,
                Ok(n) => self.head.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        let end = self.head.len().min(self.pos + len);
        Ok(&self.head[self.pos..end])
    }
}

impl<R: Read> Read for PeekReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos < self.head.len() {
            let n = buf.len().min(self.head.len() - self.pos);
            buf[..n].copy_from_slice(&self.head[self.pos..self.pos + n]);
            self.pos += n;
            if self.pos == self.head.len() {
                self.head.clear();
                self.pos = 0;
            }
            return Ok(n);
        }
        self.inner.read(buf)
    }
}

/// Wrap `reader` in the decoder for `compression`.
pub(crate) fn decoder<'a>(
    compression: Compression,
    reader: Box<dyn Read + 'a>,
) -> Result<Box<dyn Read + 'a>> {
    let decoded: Box<dyn Read + 'a> = match compression {
        Compression::None => reader,
        Compression::Gzip => Box::new(flate2::read::MultiGzDecoder::new(reader)),
        Compression::Bzip2 => Box::new(bzip2::read::MultiBzDecoder::new(reader)),
        Compression::Xz => Box::new(xz2::read::XzDecoder::new_multi_decoder(reader)),
        Compression::Lzma => {
            let stream = Stream::new_lzma_decoder(u64::MAX)
                .map_err(|e| Error::HandleCreation(format!("lzma decoder: {}", e)))?;
            Box::new(xz2::read::XzDecoder::new_stream(reader, stream))
        }
        Compression::Compress => {
            return Err(Error::codec(
                "COMPRESS (.Z) streams are recognized but cannot be decompressed",
            ))
        }
    };
    Ok(decoded)
}

/// Output side of a compression filter
pub(crate) enum Encoder<W: Write> {
    None(W),
    Gzip(flate2::write::GzEncoder<W>),
    Bzip2(bzip2::write::BzEncoder<W>),
    /// Also carries lzma-alone, which only differs in the stream setup
    Xz(xz2::write::XzEncoder<W>),
}

impl<W: Write> Encoder<W> {
    pub(crate) fn new(inner: W, compression: Compression, level: u32) -> Result<Self> {
        let level = level.min(9);
        let encoder = match compression {
            Compression::None => Encoder::None(inner),
            Compression::Gzip => Encoder::Gzip(flate2::write::GzEncoder::new(
                inner,
                flate2::Compression::new(level),
            )),
            Compression::Bzip2 => Encoder::Bzip2(bzip2::write::BzEncoder::new(
                inner,
                bzip2::Compression::new(level.max(1)),
            )),
            Compression::Xz => Encoder::Xz(xz2::write::XzEncoder::new(inner, level)),
            Compression::Lzma => {
                let options = LzmaOptions::new_preset(level)
                    .map_err(|e| Error::HandleCreation(format!("lzma options: {}", e)))?;
                let stream = Stream::new_lzma_encoder(&options)
                    .map_err(|e| Error::HandleCreation(format!("lzma encoder: {}", e)))?;
                Encoder::Xz(xz2::write::XzEncoder::new_stream(inner, stream))
            }
            Compression::Compress => {
                return Err(Error::InvalidOptions(
                    "COMPRESS output is not supported".to_string(),
                ))
            }
        };
        Ok(encoder)
    }

    /// Flush trailers and hand back the inner writer
    pub(crate) fn finish(self) -> io::Result<W> {
        match self {
            Encoder::None(mut w) => {
                w.flush()?;
                Ok(w)
            }
            Encoder::Gzip(e) => e.finish(),
            Encoder::Bzip2(e) => e.finish(),
            Encoder::Xz(e) => e.finish(),
        }
    }
}

impl<W: Write> Write for Encoder<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Encoder::None(w) => w.write(buf),
            Encoder::Gzip(e) => e.write(buf),
            Encoder::Bzip2(e) => e.write(buf),
            Encoder::Xz(e) => e.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Encoder::None(w) => w.flush(),
            Encoder::Gzip(e) => e.flush(),
            Encoder::Bzip2(e) => e.flush(),
            Encoder::Xz(e) => e.flush(),
        }
    }
}
