//! Entry-by-entry archive creation.

use crate::entry::{EntryDescriptor, EntryHeader, EntryKind};
use crate::handle::WriteHandle;
use crate::options::ArchiveOptions;
use crate::stream::ByteSource;
use crate::{Error, Result};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use tracing::trace;

/// Payload reader together with its exact length
struct Staged<'a> {
    reader: Box<dyn Read + 'a>,
    len: u64,
}

/// Headers need the size before any payload, so measure each kind of
/// source the cheapest way it allows.
fn stage(content: ByteSource<'_>) -> Result<Staged<'_>> {
    match content {
        ByteSource::Memory(bytes) => Ok(Staged {
            len: bytes.len() as u64,
            reader: Box::new(Cursor::new(bytes)),
        }),
        ByteSource::Seekable(mut stream) => {
            let len = stream.seek(SeekFrom::End(0))?;
            stream.seek(SeekFrom::Start(0))?;
            Ok(Staged {
                len,
                reader: ByteSource::Seekable(stream).into_reader(),
            })
        }
        ByteSource::Stream(reader) => {
            let mut buffered = Vec::new();
            ByteSource::Stream(reader).into_reader().read_to_end(&mut buffered)?;
            Ok(Staged {
                len: buffered.len() as u64,
                reader: Box::new(Cursor::new(buffered)),
            })
        }
    }
}

/// Writes entries one at a time into a sink.
pub struct Compressor<W: Write + Seek> {
    handle: WriteHandle<W>,
}

impl<W: Write + Seek> Compressor<W> {
    pub fn new(sink: W, options: &ArchiveOptions) -> Result<Self> {
        Ok(Self {
            handle: WriteHandle::open(sink, options)?,
        })
    }

    /// Write one regular-file entry with the content of `content`.
    pub fn add(&mut self, descriptor: &EntryDescriptor, content: ByteSource<'_>) -> Result<()> {
        let Staged { mut reader, len } = stage(content)?;

        let header = EntryHeader {
            path: descriptor.path.clone(),
            size: Some(len),
            mtime: descriptor.last_modified,
            kind: EntryKind::Regular,
            mode: Some(descriptor.mode),
        };
        self.handle.append(&header, &mut reader)?;
        trace!(path = %descriptor.path, size = len, "entry written");
        Ok(())
    }

    /// Write trailers and return the sink.
    pub fn finish(mut self) -> Result<W> {
        self.handle.finish()
    }
}

/// Write `entries` paired in order with `contents` into `sink`.
pub fn create_into<'a, W, I>(sink: W, entries: &[EntryDescriptor], contents: I, options: &ArchiveOptions) -> Result<W>
where
    W: Write + Seek,
    I: IntoIterator<Item = ByteSource<'a>>,
{
    let mut compressor = Compressor::new(sink, options)?;
    let mut contents = contents.into_iter();

    for (index, descriptor) in entries.iter().enumerate() {
        let Some(content) = contents.next() else {
            return Err(Error::EntryCountMismatch {
                entries: entries.len(),
                contents: index,
            });
        };
        compressor.add(descriptor, content)?;
    }

    let extra = contents.count();
    if extra > 0 {
        return Err(Error::EntryCountMismatch {
            entries: entries.len(),
            contents: entries.len() + extra,
        });
    }
    compressor.finish()
}

/// Build an archive in memory; the cursor is positioned at the start.
pub fn create<'a, I>(entries: &[EntryDescriptor], contents: I, options: &ArchiveOptions) -> Result<Cursor<Vec<u8>>>
where
    I: IntoIterator<Item = ByteSource<'a>>,
{
    let mut archive = create_into(Cursor::new(Vec::new()), entries, contents, options)?;
    archive.set_position(0);
    Ok(archive)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{Algorithm, WriteFormat};
    use crate::walk::{entries as list, extract_binary};
    use crate::NameFilter;

    const ALL_OPTIONS: &[(WriteFormat, Algorithm)] = &[
        (WriteFormat::Zip, Algorithm::Deflate),
        (WriteFormat::Zip, Algorithm::None),
        (WriteFormat::Tar, Algorithm::None),
        (WriteFormat::Tar, Algorithm::Gzip),
        (WriteFormat::Tar, Algorithm::Bzip2),
        (WriteFormat::Tar, Algorithm::Xz),
        (WriteFormat::Tar, Algorithm::Lzma),
        (WriteFormat::Cpio, Algorithm::None),
        (WriteFormat::Cpio, Algorithm::Gzip),
        (WriteFormat::Ar, Algorithm::None),
        (WriteFormat::Ar, Algorithm::Bzip2),
    ];

    fn descriptors(paths: &[&str]) -> Vec<EntryDescriptor> {
        paths.iter().map(|p| EntryDescriptor::new(*p)).collect()
    }

    fn binary(archive: &[u8]) -> Vec<Vec<u8>> {
        extract_binary(ByteSource::from(archive), NameFilter::all())
            .unwrap()
            .collect::<Result<_>>()
            .unwrap()
    }

    #[test]
    fn test_every_pair_roundtrips() {
        let big: Vec<u8> = (0..10_000u32).map(|i| (i * 7 % 251) as u8).collect();
        for &(format, algorithm) in ALL_OPTIONS {
            let options = ArchiveOptions::new(format, algorithm);
            let archive = create(
                &descriptors(&["first.txt", "nested/second.bin", "empty"]),
                [ByteSource::from("hello"), ByteSource::from(big.clone()), ByteSource::from("")],
                &options,
            )
            .unwrap()
            .into_inner();

            let paths: Vec<String> = list(ByteSource::from(&archive))
                .unwrap()
                .map(|r| r.map(|r| r.path))
                .collect::<Result<_>>()
                .unwrap();
            assert_eq!(paths, ["first.txt", "nested/second.bin", "empty"], "{:?}", options);
            assert_eq!(binary(&archive), [b"hello".to_vec(), big.clone(), Vec::new()], "{:?}", options);
        }
    }

    #[test]
    fn test_ar_reserved_name() {
        let options = ArchiveOptions::new(WriteFormat::Ar, Algorithm::None);
        let err = create(
            &descriptors(&["__.SYMDEF", "b"]),
            [ByteSource::from("a"), ByteSource::from("b")],
            &options,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Codec(_)));
        assert_eq!(err.code().as_str(), "ARCH9999");
    }

    #[test]
    fn test_count_mismatch() {
        let err = create(&descriptors(&["a", "b"]), [ByteSource::from("1")], &ArchiveOptions::default()).unwrap_err();
        assert!(matches!(err, Error::EntryCountMismatch { entries: 2, contents: 1 }));
        assert_eq!(err.code().as_str(), "ARCH0001");

        let err = create(
            &descriptors(&["a"]),
            [ByteSource::from("1"), ByteSource::from("2"), ByteSource::from("3")],
            &ArchiveOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::EntryCountMismatch { entries: 1, contents: 3 }));
    }

    #[test]
    fn test_cursor_at_start() {
        let archive = create(&[], Vec::<ByteSource>::new(), &ArchiveOptions::default()).unwrap();
        assert_eq!(archive.position(), 0);
        assert!(!archive.get_ref().is_empty());
        assert!(binary(archive.get_ref()).is_empty());
    }

    #[test]
    fn test_seekable_and_stream_sources() {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(b"from a file").unwrap();

        let stream: &[u8] = b"from a pipe";
        let archive = create(
            &descriptors(&["file.txt", "pipe.txt"]),
            [ByteSource::seekable(file), ByteSource::stream(stream)],
            &ArchiveOptions::new(WriteFormat::Tar, Algorithm::None),
        )
        .unwrap();
        assert_eq!(binary(archive.get_ref()), [b"from a file".to_vec(), b"from a pipe".to_vec()]);
    }

    #[test]
    fn test_metadata_is_written() {
        let entry = EntryDescriptor::new("script.sh").with_mode(0o755).with_last_modified(1_500_000_000);
        for format in [WriteFormat::Tar, WriteFormat::Cpio, WriteFormat::Ar, WriteFormat::Zip] {
            let options = ArchiveOptions::new(format, format.default_algorithm());
            let archive = create(std::slice::from_ref(&entry), [ByteSource::from("#!/bin/sh")], &options).unwrap();
            let record = list(ByteSource::from(archive.get_ref()))
                .unwrap()
                .next()
                .unwrap()
                .unwrap();
            assert_eq!(record.last_modified.map(|t| t.timestamp()), Some(1_500_000_000), "{}", format);
            assert_eq!(record.size, Some(9));
        }
    }
}
