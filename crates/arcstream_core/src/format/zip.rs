//! zip: local headers are walked in stream order with
//! `zip::read::read_zipfile_from_stream`, so members are found without the
//! central directory. Writing goes through `zip::ZipWriter`.

use super::{declared_size, drain, EntryReader, EntryWriter, ExactSize, Format, Visit};
use crate::entry::{EntryHeader, EntryKind, DEFAULT_MODE};
use crate::options::{Algorithm, MAX_LEVEL};
use crate::{Error, Result};
use ::zip::extra_fields::ExtraField;
use ::zip::read::{read_zipfile_from_stream, ZipFile};
use ::zip::result::ZipError;
use chrono::{Datelike, Local, NaiveDate, TimeZone, Timelike};
use std::io::{self, BufRead, BufReader, Read, Seek, Write};
use tracing::trace;

/// End-of-central-directory records; the stream holds no more members.
const END_SIGNATURES: [&[u8; 4]; 2] = [b"PK\x05\x06", b"PK\x06\x06"];

fn zip_error(e: ZipError) -> Error {
    match e {
        ZipError::Io(e) => Error::Io(e),
        other => Error::codec(other.to_string()),
    }
}

/// MS-DOS timestamp, interpreted in the local time zone
fn dos_time(time: ::zip::DateTime) -> Option<i64> {
    let naive = NaiveDate::from_ymd_opt(time.year() as i32, time.month() as u32, time.day() as u32)?
        .and_hms_opt(time.hour() as u32, time.minute() as u32, time.second() as u32)?;
    Local.from_local_datetime(&naive).earliest().map(|dt| dt.timestamp())
}

fn describe<R: Read>(file: &ZipFile<'_, R>) -> EntryHeader {
    // the extended timestamp is UTC and to the second; prefer it
    let unix_time = file.extra_data_fields().find_map(|field| match field {
        ExtraField::ExtendedTimestamp(ts) => ts.mod_time().map(i64::from),
        _ => None,
    });
    EntryHeader {
        path: file.name().to_string(),
        size: Some(file.size()),
        mtime: unix_time.or_else(|| file.last_modified().and_then(dos_time)),
        kind: if file.is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::Regular
        },
        mode: file.unix_mode().map(|m| m & 0o7777),
    }
}

pub(super) struct ZipReader<'a> {
    input: BufReader<Box<dyn Read + 'a>>,
    done: bool,
}

impl<'a> ZipReader<'a> {
    pub(super) fn new(input: Box<dyn Read + 'a>) -> Self {
        Self {
            input: BufReader::new(input),
            done: false,
        }
    }

    /// An archive with no members starts with its end record, which the
    /// stream reader treats as damage.
    fn at_end(&mut self) -> Result<bool> {
        let head = self.input.fill_buf()?;
        Ok(head.is_empty() || END_SIGNATURES.iter().any(|sig| head.starts_with(&sig[..])))
    }
}

impl EntryReader for ZipReader<'_> {
    fn next_entry(&mut self, visit: &mut Visit<'_>) -> Result<bool> {
        if self.done || self.at_end()? {
            self.done = true;
            return Ok(false);
        }

        let Some(mut file) = read_zipfile_from_stream(&mut self.input).map_err(zip_error)? else {
            // central directory
            self.done = true;
            return Ok(false);
        };

        let header = describe(&file);
        trace!(path = %header.path, size = ?header.size, "zip member");
        visit(&header, &mut file)?;
        // through the decoder, so the checksum is verified for skipped members too
        drain(&mut file)?;
        Ok(true)
    }

    fn format(&self) -> Format {
        Format::Zip
    }
}

// ============================================================================
// Writer
// ============================================================================

fn zip_time(secs: i64) -> Option<::zip::DateTime> {
    let local = Local.timestamp_opt(secs, 0).single()?;
    ::zip::DateTime::from_date_and_time(
        u16::try_from(local.year()).ok()?,
        local.month() as u8,
        local.day() as u8,
        local.hour() as u8,
        local.minute() as u8,
        local.second() as u8,
    )
    .ok()
}

pub(super) struct ZipEntryWriter<W: Write + Seek> {
    zip: ::zip::ZipWriter<W>,
    method: ::zip::CompressionMethod,
    level: Option<i64>,
}

impl<W: Write + Seek> ZipEntryWriter<W> {
    pub(super) fn new(sink: W, algorithm: Algorithm, level: u32) -> Self {
        let (method, level) = match algorithm {
            Algorithm::Deflate => (
                ::zip::CompressionMethod::Deflated,
                Some(level.clamp(1, MAX_LEVEL) as i64),
            ),
            _ => (::zip::CompressionMethod::Stored, None),
        };
        Self {
            zip: ::zip::ZipWriter::new(sink),
            method,
            level,
        }
    }
}

impl<W: Write + Seek> EntryWriter for ZipEntryWriter<W> {
    type Sink = W;

    fn append(&mut self, entry: &EntryHeader, data: &mut dyn Read) -> Result<()> {
        let size = declared_size(entry)?;

        // without a time the crate stamps the DOS epoch, 1980-01-01
        let mut options = ::zip::write::SimpleFileOptions::default()
            .compression_method(self.method)
            .compression_level(self.level)
            .unix_permissions(entry.mode.unwrap_or(DEFAULT_MODE))
            .large_file(size >= u32::MAX as u64);
        if let Some(time) = entry.mtime.and_then(zip_time) {
            options = options.last_modified_time(time);
        }

        self.zip.start_file(entry.path.as_str(), options).map_err(zip_error)?;
        io::copy(&mut ExactSize::new(data, size), &mut self.zip)?;
        Ok(())
    }

    fn finish(self) -> Result<W> {
        self.zip.finish().map_err(zip_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn write_archive(algorithm: Algorithm, entries: &[(&str, &[u8])], mtime: Option<i64>) -> Vec<u8> {
        let mut writer = ZipEntryWriter::new(Cursor::new(Vec::new()), algorithm, 6);
        for (path, data) in entries {
            let mut header = EntryHeader::regular(*path, data.len() as u64);
            header.mtime = mtime;
            writer.append(&header, &mut &data[..]).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn read_all(bytes: Vec<u8>) -> Result<Vec<(EntryHeader, Vec<u8>)>> {
        let mut reader = ZipReader::new(Box::new(Cursor::new(bytes)));
        let mut out = Vec::new();
        while reader.next_entry(&mut |header, data| {
            let mut payload = Vec::new();
            data.read_to_end(&mut payload)?;
            out.push((header.clone(), payload));
            Ok(())
        })? {}
        Ok(out)
    }

    #[test]
    fn test_deflate_roundtrip() {
        let big = b"abcdefgh".repeat(500);
        let bytes = write_archive(
            Algorithm::Deflate,
            &[("a.txt", b"hello"), ("big.txt", &big)],
            Some(1_600_000_000),
        );
        assert!(bytes.starts_with(b"PK\x03\x04"));

        let entries = read_all(bytes).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0.path, "a.txt");
        assert_eq!(entries[0].1, b"hello");
        assert_eq!(entries[0].0.mtime, Some(1_600_000_000));
        assert_eq!(entries[1].0.size, Some(big.len() as u64));
        assert_eq!(entries[1].1, big);
    }

    #[test]
    fn test_stored_roundtrip() {
        let entries = read_all(write_archive(Algorithm::None, &[("s.bin", &[0u8, 1, 2, 3])], None)).unwrap();
        assert_eq!(entries[0].0.size, Some(4));
        assert_eq!(entries[0].1, vec![0u8, 1, 2, 3]);
    }

    #[test]
    fn test_missing_time_is_dos_epoch() {
        let entries = read_all(write_archive(Algorithm::Deflate, &[("a", b"a")], None)).unwrap();
        let modified = Local.timestamp_opt(entries[0].0.mtime.unwrap(), 0).unwrap();
        assert_eq!((modified.year(), modified.month(), modified.day()), (1980, 1, 1));
    }

    #[test]
    fn test_empty_archive() {
        let bytes = write_archive(Algorithm::Deflate, &[], None);
        assert!(bytes.starts_with(b"PK\x05\x06"));
        assert!(read_all(bytes).unwrap().is_empty());
    }

    #[test]
    fn test_skip_members() {
        let bytes = write_archive(Algorithm::Deflate, &[("a", b"aaaa"), ("b", b"bbbb")], None);
        let mut reader = ZipReader::new(Box::new(Cursor::new(bytes)));
        let mut paths = Vec::new();
        while reader
            .next_entry(&mut |header, _| {
                paths.push(header.path.clone());
                Ok(())
            })
            .unwrap()
        {}
        assert_eq!(paths, ["a", "b"]);
    }

    #[test]
    fn test_corrupt_crc() {
        let mut bytes = write_archive(Algorithm::None, &[("a", b"hello")], None);
        // stored payload follows the 30-byte header, the name and the extra block
        let name_len = u16::from_le_bytes([bytes[26], bytes[27]]) as usize;
        let extra_len = u16::from_le_bytes([bytes[28], bytes[29]]) as usize;
        bytes[30 + name_len + extra_len] ^= 0xff;
        assert!(read_all(bytes).is_err());
    }

    #[test]
    fn test_dos_time() {
        let time = ::zip::DateTime::from_date_and_time(2020, 1, 2, 3, 4, 6).unwrap();
        let local = Local.timestamp_opt(dos_time(time).unwrap(), 0).unwrap();
        assert_eq!((local.year(), local.month(), local.day()), (2020, 1, 2));
        assert_eq!((local.hour(), local.minute(), local.second()), (3, 4, 6));
    }

    #[test]
    fn test_bad_signature() {
        assert!(read_all(b"PK\x07\x07junk".to_vec()).is_err());
    }
}
