//! Lazy, single-pass walks over archive entries.
//!
//! Enumeration and both extraction flavors are one walk parameterized by
//! what happens to each matching entry's payload.

use crate::entry::{EntryHeader, EntryRecord, NameFilter};
use crate::handle::ReadHandle;
use crate::stream::{ByteSource, READ_CHUNK_SIZE};
use crate::transcode::{self, Charset};
use crate::Result;
use std::io::Read;
use std::iter::FusedIterator;
use tracing::trace;

/// Encoding assumed for text extraction when the caller names none
pub const DEFAULT_ENCODING: &str = "UTF-8";

/// Upper bound on the capacity reserved from a declared entry size
const SIZE_HINT_CAP: u64 = 16 * 1024 * 1024;

/// What a walk yields for each matching entry
pub trait Payload {
    type Output;

    /// Called while the entry is current; `data` ends with the entry.
    fn produce(&mut self, header: &EntryHeader, data: &mut dyn Read) -> Result<Self::Output>;
}

/// Metadata only; the payload is skipped.
#[derive(Debug, Default)]
pub struct SkipPayload;

impl Payload for SkipPayload {
    type Output = EntryRecord;

    fn produce(&mut self, header: &EntryHeader, _data: &mut dyn Read) -> Result<EntryRecord> {
        Ok(EntryRecord::from_header(header))
    }
}

/// Raw payload bytes
#[derive(Debug, Default)]
pub struct RawPayload;

impl Payload for RawPayload {
    type Output = Vec<u8>;

    fn produce(&mut self, header: &EntryHeader, data: &mut dyn Read) -> Result<Vec<u8>> {
        materialize(header, data)
    }
}

/// Payload decoded from `charset` into UTF-8 text
#[derive(Debug)]
pub struct TextPayload {
    charset: Charset,
}

impl TextPayload {
    pub fn new(label: &str) -> Result<Self> {
        Ok(Self {
            charset: transcode::lookup(label)?,
        })
    }
}

impl Payload for TextPayload {
    type Output = String;

    fn produce(&mut self, header: &EntryHeader, data: &mut dyn Read) -> Result<String> {
        let bytes = materialize(header, data)?;
        Ok(transcode::decode(bytes, self.charset))
    }
}

/// Read an entry's payload to its end.
pub fn materialize(header: &EntryHeader, data: &mut dyn Read) -> Result<Vec<u8>> {
    let hint = header.size.unwrap_or(0).min(SIZE_HINT_CAP) as usize;
    let mut payload = Vec::with_capacity(hint);
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        let n = data.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        trace!(path = %header.path, n, "payload chunk");
        payload.extend_from_slice(&chunk[..n]);
    }
    Ok(payload)
}

/// Filtered walk over the entries of one archive.
///
/// The walk owns its read handle and releases it at end of archive, on the
/// first error, on [`close`](Self::close), or when dropped.
pub struct EntryWalk<'a, P: Payload> {
    handle: Option<ReadHandle<'a>>,
    filter: NameFilter,
    payload: P,
}

pub type Entries<'a> = EntryWalk<'a, SkipPayload>;
pub type TextEntries<'a> = EntryWalk<'a, TextPayload>;
pub type BinaryEntries<'a> = EntryWalk<'a, RawPayload>;

impl<'a, P: Payload> EntryWalk<'a, P> {
    pub fn open(source: ByteSource<'a>, filter: NameFilter, payload: P) -> Result<Self> {
        Ok(Self {
            handle: Some(ReadHandle::open(source)?),
            filter,
            payload,
        })
    }

    /// Produce the next matching entry; `None` once the archive is exhausted.
    pub fn next_item(&mut self) -> Result<Option<P::Output>> {
        let result = self.advance();
        if !matches!(result, Ok(Some(_))) {
            self.release();
        }
        result
    }

    fn advance(&mut self) -> Result<Option<P::Output>> {
        let Self { handle, filter, payload } = self;
        let Some(handle) = handle.as_mut() else {
            return Ok(None);
        };

        loop {
            let produced = handle.next_entry(|header, data| {
                if !filter.matches(&header.path) {
                    trace!(path = %header.path, "entry filtered out");
                    return Ok(None);
                }
                payload.produce(header, data).map(Some)
            })?;
            match produced {
                None => return Ok(None),
                Some(None) => continue,
                Some(output) => return Ok(output),
            }
        }
    }

    fn release(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.close().ok();
        }
    }

    /// Stop the walk early. Closing an exhausted walk is a no-op.
    pub fn close(&mut self) -> Result<()> {
        match self.handle.take() {
            Some(mut handle) => handle.close(),
            None => Ok(()),
        }
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }
}

impl<P: Payload> Iterator for EntryWalk<'_, P> {
    type Item = Result<P::Output>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_item().transpose()
    }
}

impl<P: Payload> FusedIterator for EntryWalk<'_, P> {}

/// Enumerate entry metadata.
pub fn entries(source: ByteSource<'_>) -> Result<Entries<'_>> {
    EntryWalk::open(source, NameFilter::all(), SkipPayload)
}

/// Extract matching entries as text decoded from `encoding`.
///
/// The label is checked before the archive is opened.
pub fn extract_text<'a>(source: ByteSource<'a>, filter: NameFilter, encoding: &str) -> Result<TextEntries<'a>> {
    let payload = TextPayload::new(encoding)?;
    EntryWalk::open(source, filter, payload)
}

/// Extract matching entries as raw bytes.
pub fn extract_binary(source: ByteSource<'_>, filter: NameFilter) -> Result<BinaryEntries<'_>> {
    EntryWalk::open(source, filter, RawPayload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compress::create;
    use crate::entry::EntryDescriptor;
    use crate::options::{Algorithm, ArchiveOptions, WriteFormat};
    use crate::Error;

    fn sample(options: ArchiveOptions) -> Vec<u8> {
        let entries = [EntryDescriptor::new("a.txt"), EntryDescriptor::new("b.txt")];
        let contents = [ByteSource::from("hello"), ByteSource::from("world")];
        create(&entries, contents, &options).unwrap().into_inner()
    }

    #[test]
    fn test_entries_in_order() {
        let bytes = sample(ArchiveOptions::default());
        let records: Vec<_> = entries(ByteSource::from(&bytes)).unwrap().collect::<Result<_>>().unwrap();
        let paths: Vec<_> = records.iter().map(|r: &EntryRecord| r.path.as_str()).collect();
        assert_eq!(paths, ["a.txt", "b.txt"]);
        assert_eq!(records[0].size, Some(5));
    }

    #[test]
    fn test_extract_text_and_binary() {
        let bytes = sample(ArchiveOptions::new(WriteFormat::Tar, Algorithm::Gzip));

        let texts: Vec<String> = extract_text(ByteSource::from(&bytes), NameFilter::all(), DEFAULT_ENCODING)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(texts, ["hello", "world"]);

        let filter = NameFilter::from_names(["b.txt"]);
        let blobs: Vec<Vec<u8>> = extract_binary(ByteSource::from(&bytes), filter)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(blobs, [b"world".to_vec()]);
    }

    #[test]
    fn test_filter_with_no_match() {
        let bytes = sample(ArchiveOptions::default());
        let filter = NameFilter::from_names(["missing.txt"]);
        let mut walk = extract_binary(ByteSource::from(&bytes), filter).unwrap();
        assert!(walk.next_item().unwrap().is_none());
        assert!(!walk.is_open());
        assert!(walk.next().is_none());
    }

    #[test]
    fn test_bad_encoding_fails_before_reading() {
        let err = extract_text(ByteSource::from("not an archive"), NameFilter::all(), "BOGUS-9999")
            .err()
            .unwrap();
        assert!(matches!(err, Error::UnsupportedEncoding(_)));
        assert_eq!(err.code().as_str(), "ARCH0004");
    }

    #[test]
    fn test_latin1_control_range() {
        let archive = create(
            &[EntryDescriptor::new("c1.bin")],
            [ByteSource::from(vec![0x80u8, 0x9f])],
            &ArchiveOptions::default(),
        )
        .unwrap()
        .into_inner();
        let texts: Vec<String> = extract_text(ByteSource::from(&archive), NameFilter::all(), "ISO-8859-1")
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(texts, ["\u{80}\u{9f}"]);
    }

    #[test]
    fn test_materialize() {
        let header = EntryHeader::regular("big", 5000);
        let data = vec![3u8; 5000];
        assert_eq!(materialize(&header, &mut &data[..]).unwrap(), data);
    }

    #[test]
    fn test_close_early() {
        let bytes = sample(ArchiveOptions::default());
        let mut walk = entries(ByteSource::from(&bytes)).unwrap();
        assert!(walk.next_item().unwrap().is_some());
        walk.close().unwrap();
        assert!(walk.next_item().unwrap().is_none());
        walk.close().unwrap();
    }

    #[test]
    fn test_error_ends_walk() {
        let mut bytes = sample(ArchiveOptions::new(WriteFormat::Tar, Algorithm::None));
        // damage the second header
        bytes[1024] ^= 0xff;
        let mut walk = entries(ByteSource::from(bytes)).unwrap();
        assert!(walk.next().unwrap().is_ok());
        assert!(walk.next().unwrap().is_err());
        assert!(walk.next().is_none());
    }
}
