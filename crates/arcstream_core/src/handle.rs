//! Archive handles: one open codec session bound to one source or sink.

use crate::entry::EntryHeader;
use crate::filter::{self, Compression, PeekReader, MAGIC_PEEK_LEN};
use crate::format::{self, EntryReader, EntryWriter, Format, FormatWriter, FORMAT_PEEK_LEN};
use crate::options::ArchiveOptions;
use crate::stream::ByteSource;
use crate::{Error, Result};
use std::io::{Read, Seek, Write};
use tracing::debug;

struct ReadSession<'a> {
    reader: Box<dyn EntryReader + 'a>,
    compression: Compression,
}

/// Read session over one archive, with compression and container
/// auto-detected on open.
pub struct ReadHandle<'a> {
    session: Option<ReadSession<'a>>,
}

impl<'a> ReadHandle<'a> {
    pub fn open(source: ByteSource<'a>) -> Result<Self> {
        let kind = source.kind();

        let mut raw = PeekReader::new(source.into_reader());
        let compression = Compression::detect(raw.peek(MAGIC_PEEK_LEN)?);
        let mut decoded = PeekReader::new(filter::decoder(compression, Box::new(raw))?);

        let format = Format::detect(decoded.peek(FORMAT_PEEK_LEN)?)
            .ok_or_else(|| Error::codec("Unrecognized archive format"))?;
        let reader = format::reader(format, Box::new(decoded));

        debug!(source = kind, ?format, ?compression, "archive opened for reading");
        Ok(Self {
            session: Some(ReadSession { reader, compression }),
        })
    }

    fn session(&mut self) -> Result<&mut ReadSession<'a>> {
        self.session.as_mut().ok_or(Error::HandleClosed)
    }

    /// Hand the next entry to `visit` while it is current. Payload the visitor
    /// leaves unread is discarded; `None` at end of archive.
    pub fn next_entry<T, F>(&mut self, visit: F) -> Result<Option<T>>
    where
        F: FnOnce(&EntryHeader, &mut dyn Read) -> Result<T>,
    {
        let reader = &mut self.session()?.reader;
        let mut visit = Some(visit);
        let mut output = None;
        let found = reader.next_entry(&mut |header, data| {
            if let Some(visit) = visit.take() {
                output = Some(visit(header, data)?);
            }
            Ok(())
        })?;
        Ok(if found { output } else { None })
    }

    /// Numeric code of the detected container. Variants may be refined
    /// as headers are read.
    pub fn format_code(&mut self) -> Result<i32> {
        Ok(self.session()?.reader.format().code())
    }

    pub fn compression_code(&mut self) -> Result<i32> {
        Ok(self.session()?.compression.code())
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    pub fn close(&mut self) -> Result<()> {
        let session = self.session.take().ok_or(Error::HandleClosed)?;
        debug!(format = ?session.reader.format(), "archive closed");
        Ok(())
    }
}

impl Drop for ReadHandle<'_> {
    fn drop(&mut self) {
        if self.session.take().is_some() {
            debug!("archive released without close");
        }
    }
}

/// Write session for a fixed format and compression
pub struct WriteHandle<W: Write + Seek> {
    writer: Option<FormatWriter<W>>,
    options: ArchiveOptions,
    entries: usize,
}

impl<W: Write + Seek> WriteHandle<W> {
    pub fn open(sink: W, options: &ArchiveOptions) -> Result<Self> {
        let writer = FormatWriter::new(sink, options).map_err(|e| match e {
            Error::Io(e) => Error::HandleCreation(e.to_string()),
            other => other,
        })?;

        debug!(
            format = %options.format,
            algorithm = %options.algorithm,
            level = options.level,
            "archive opened for writing"
        );
        Ok(Self {
            writer: Some(writer),
            options: *options,
            entries: 0,
        })
    }

    fn writer(&mut self) -> Result<&mut FormatWriter<W>> {
        self.writer.as_mut().ok_or(Error::HandleClosed)
    }

    pub fn options(&self) -> &ArchiveOptions {
        &self.options
    }

    /// Write one entry; `header.size` must be known and `data` must yield
    /// exactly that many bytes.
    pub fn append(&mut self, header: &EntryHeader, data: &mut dyn Read) -> Result<()> {
        self.writer()?.append(header, data)?;
        self.entries += 1;
        Ok(())
    }

    /// Write trailers and return the sink.
    pub fn finish(&mut self) -> Result<W> {
        let writer = self.writer.take().ok_or(Error::HandleClosed)?;
        let sink = writer.finish()?;
        debug!(entries = self.entries, "archive finished");
        Ok(sink)
    }

    /// Like [`finish`](Self::finish), dropping the sink.
    pub fn close(&mut self) -> Result<()> {
        self.finish().map(drop)
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{compression_code, format_code, Algorithm, WriteFormat};
    use std::io::Cursor;

    fn archive(options: ArchiveOptions) -> Vec<u8> {
        let mut handle = WriteHandle::open(Cursor::new(Vec::new()), &options).unwrap();
        handle.append(&EntryHeader::regular("one.txt", 3), &mut &b"one"[..]).unwrap();
        handle.finish().unwrap().into_inner()
    }

    #[test]
    fn test_detects_format_and_compression() {
        let bytes = archive(ArchiveOptions::new(WriteFormat::Tar, Algorithm::Xz));
        let mut handle = ReadHandle::open(ByteSource::from(bytes)).unwrap();
        assert_eq!(handle.compression_code().unwrap(), compression_code::XZ);

        let (path, payload) = handle
            .next_entry(|header, data| {
                let mut payload = Vec::new();
                data.read_to_end(&mut payload)?;
                Ok((header.path.clone(), payload))
            })
            .unwrap()
            .unwrap();
        assert_eq!(path, "one.txt");
        assert_eq!(payload, b"one");
        assert_eq!(handle.format_code().unwrap(), format_code::TAR_USTAR);
        assert!(handle.next_entry(|_, _| Ok(())).unwrap().is_none());
    }

    #[test]
    fn test_use_after_close() {
        let bytes = archive(ArchiveOptions::default());
        let mut handle = ReadHandle::open(ByteSource::from(bytes)).unwrap();
        handle.close().unwrap();
        assert!(!handle.is_open());
        assert!(matches!(handle.next_entry(|_, _| Ok(())), Err(Error::HandleClosed)));
        assert!(matches!(handle.close(), Err(Error::HandleClosed)));
    }

    #[test]
    fn test_write_after_finish() {
        let mut handle = WriteHandle::open(Cursor::new(Vec::new()), &ArchiveOptions::default()).unwrap();
        handle.close().unwrap();
        let err = handle.append(&EntryHeader::regular("x", 0), &mut &b""[..]).unwrap_err();
        assert!(matches!(err, Error::HandleClosed));
        assert_eq!(err.code().as_str(), "ARCH9999");
    }

    #[test]
    fn test_unrecognized_input() {
        let err = ReadHandle::open(ByteSource::from("just some text, not an archive")).err().unwrap();
        assert_eq!(err.to_string(), "Unrecognized archive format");
    }

    #[test]
    fn test_compress_input_rejected() {
        let err = ReadHandle::open(ByteSource::from(vec![0x1f, 0x9d, 0x90, 0, 0, 0])).err().unwrap();
        assert!(matches!(err, Error::Codec(_)));
        assert!(err.to_string().contains(".Z"));
    }

    #[test]
    fn test_empty_input() {
        let mut handle = ReadHandle::open(ByteSource::from(Vec::new())).unwrap();
        assert!(handle.next_entry(|_, _| Ok(())).unwrap().is_none());
        assert_eq!(handle.format_code().unwrap(), format_code::EMPTY);
        assert_eq!(handle.compression_code().unwrap(), compression_code::NONE);
    }

    #[test]
    fn test_unread_payload_is_skipped() {
        let options = ArchiveOptions::new(WriteFormat::Cpio, Algorithm::Gzip);
        let mut handle = WriteHandle::open(Cursor::new(Vec::new()), &options).unwrap();
        handle.append(&EntryHeader::regular("a", 5), &mut &b"aaaaa"[..]).unwrap();
        handle.append(&EntryHeader::regular("b", 1), &mut &b"b"[..]).unwrap();
        let bytes = handle.finish().unwrap().into_inner();

        let mut handle = ReadHandle::open(ByteSource::from(bytes)).unwrap();
        let first = handle
            .next_entry(|_, data| {
                let mut two = [0u8; 2];
                data.read_exact(&mut two)?;
                Ok(two)
            })
            .unwrap();
        assert_eq!(first, Some(*b"aa"));
        let second = handle.next_entry(|header, _| Ok(header.path.clone())).unwrap();
        assert_eq!(second.as_deref(), Some("b"));
    }

    #[test]
    fn test_invalid_pair_rejected_on_open() {
        let options = ArchiveOptions::new(WriteFormat::Cpio, Algorithm::Deflate);
        let err = WriteHandle::open(Cursor::new(Vec::new()), &options).err().unwrap();
        assert_eq!(err.code().as_str(), "ARCH0002");
    }
}
