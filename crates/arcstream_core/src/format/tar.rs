//! tar through the `tar` crate: v7, ustar, GNU and pax on read; ustar with
//! GNU long-name records on write.

use super::{declared_size, discard, drain, EntryReader, EntryWriter, ExactSize, Format, Visit};
use crate::entry::{EntryHeader, EntryKind, DEFAULT_MODE};
use crate::{Error, Result};
use ::tar::{Archive, Builder, EntryType, Header};
use std::io::{Read, Write};
use tracing::trace;

const BLOCK: u64 = 512;

pub(super) fn detect(head: &[u8]) -> Option<Format> {
    if head.len() < BLOCK as usize {
        return None;
    }
    let block = &head[..BLOCK as usize];
    if block.iter().all(|b| *b == 0) {
        return Some(Format::Tar);
    }

    let header = Header::from_byte_slice(block);
    let mut expected = header.clone();
    expected.set_cksum();
    if header.cksum().ok()? != expected.cksum().ok()? {
        return None;
    }
    Some(variant(header, false))
}

fn variant(header: &Header, pax: bool) -> Format {
    if header.as_gnu().is_some() {
        Format::TarGnu
    } else if header.as_ustar().is_some() {
        if pax {
            Format::TarPax
        } else {
            Format::TarUstar
        }
    } else {
        Format::Tar
    }
}

fn kind_of(entry_type: EntryType) -> EntryKind {
    if entry_type.is_file() || entry_type.is_contiguous() {
        EntryKind::Regular
    } else if entry_type.is_dir() {
        EntryKind::Directory
    } else if entry_type.is_symlink() {
        EntryKind::Symlink
    } else {
        EntryKind::Other
    }
}

/// Counts bytes handed to the `tar` crate, so member padding can be
/// skipped after each entry.
struct Counted<R> {
    inner: R,
    count: u64,
}

impl<R: Read> Read for Counted<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}

/// Header fields and container variant of one `tar` crate entry
fn describe<R: Read>(entry: &mut ::tar::Entry<'_, R>) -> Result<(EntryHeader, Format)> {
    let mut pax = false;
    let mut pax_mtime = None;
    if let Some(extensions) = entry.pax_extensions()? {
        pax = true;
        for extension in extensions {
            let extension = extension?;
            if extension.key() == Ok("mtime") {
                // fractional seconds are dropped
                pax_mtime = extension
                    .value()
                    .ok()
                    .and_then(|v| v.split('.').next()?.parse::<i64>().ok());
            }
        }
    }

    let path = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
    let size = entry.size();
    let header = entry.header();
    let described = EntryHeader {
        path,
        size: Some(size),
        mtime: pax_mtime.or_else(|| header.mtime().ok().map(|t| t as i64)),
        kind: kind_of(header.entry_type()),
        mode: header.mode().ok().map(|m| m & 0o7777),
    };
    Ok((described, variant(header, pax)))
}

pub(super) struct TarReader<'a> {
    input: Counted<Box<dyn Read + 'a>>,
    format: Format,
    done: bool,
}

impl<'a> TarReader<'a> {
    pub(super) fn new(input: Box<dyn Read + 'a>, format: Format) -> Self {
        Self {
            input: Counted { inner: input, count: 0 },
            format,
            done: false,
        }
    }
}

impl EntryReader for TarReader<'_> {
    fn next_entry(&mut self, visit: &mut Visit<'_>) -> Result<bool> {
        while !self.done {
            // a fresh view per member; positions the crate reports are
            // relative to `start`
            let start = self.input.count;
            let visited = {
                let mut archive = Archive::new(&mut self.input);
                let mut entries = archive.entries()?;
                match entries.next() {
                    None => None,
                    Some(entry) => {
                        let mut entry = entry?;
                        let end = entry.raw_file_position() + entry.size();
                        let global = entry.header().entry_type().is_pax_global_extensions();
                        if !global {
                            let (header, format) = describe(&mut entry)?;
                            trace!(path = %header.path, size = ?header.size, "tar header");
                            self.format = format;
                            visit(&header, &mut entry)?;
                        }
                        drain(&mut entry)?;
                        Some((!global, end))
                    }
                }
            };

            match visited {
                None => self.done = true,
                Some((visited, end)) => {
                    if self.input.count - start < end {
                        return Err(Error::codec("Truncated tar archive"));
                    }
                    let padding = (BLOCK - self.input.count % BLOCK) % BLOCK;
                    discard(&mut self.input, padding, "tar")?;
                    if visited {
                        return Ok(true);
                    }
                }
            }
        }
        Ok(false)
    }

    fn format(&self) -> Format {
        self.format
    }
}

// ============================================================================
// Writer
// ============================================================================

pub(super) struct TarWriter<W: Write> {
    builder: Builder<W>,
}

impl<W: Write> TarWriter<W> {
    pub(super) fn new(output: W) -> Self {
        Self {
            builder: Builder::new(output),
        }
    }
}

impl<W: Write> EntryWriter for TarWriter<W> {
    type Sink = W;

    fn append(&mut self, entry: &EntryHeader, data: &mut dyn Read) -> Result<()> {
        let size = declared_size(entry)?;

        let mut header = Header::new_ustar();
        header.set_entry_type(EntryType::Regular);
        header.set_size(size);
        header.set_mode(entry.mode.unwrap_or(DEFAULT_MODE) & 0o7777);
        header.set_mtime(entry.mtime.unwrap_or(0).max(0) as u64);

        self.builder
            .append_data(&mut header, &entry.path, ExactSize::new(data, size))?;
        Ok(())
    }

    fn finish(self) -> Result<W> {
        let mut output = self.builder.into_inner()?;
        output.flush()?;
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = TarWriter::new(Vec::new());
        for (path, data) in entries {
            let mut header = EntryHeader::regular(*path, data.len() as u64);
            header.mtime = Some(1_600_000_000);
            writer.append(&header, &mut &data[..]).unwrap();
        }
        writer.finish().unwrap()
    }

    fn read_all(bytes: &[u8]) -> (Vec<(EntryHeader, Vec<u8>)>, Format) {
        let mut reader = TarReader::new(Box::new(bytes), Format::Tar);
        let mut out = Vec::new();
        while reader
            .next_entry(&mut |header, data| {
                let mut payload = Vec::new();
                data.read_to_end(&mut payload)?;
                out.push((header.clone(), payload));
                Ok(())
            })
            .unwrap()
        {}
        (out, reader.format())
    }

    fn count(bytes: &[u8]) -> Result<usize> {
        let mut reader = TarReader::new(Box::new(bytes), Format::Tar);
        let mut n = 0;
        while reader.next_entry(&mut |_, _| Ok(()))? {
            n += 1;
        }
        Ok(n)
    }

    #[test]
    fn test_roundtrip() {
        let bytes = write_archive(&[("a.txt", b"hello"), ("dir/b.bin", &[0u8; 700])]);
        assert_eq!(detect(&bytes), Some(Format::TarUstar));
        assert_eq!(bytes.len() % BLOCK as usize, 0);

        let (entries, format) = read_all(&bytes);
        assert_eq!(format, Format::TarUstar);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0.path, "a.txt");
        assert_eq!(entries[0].0.mtime, Some(1_600_000_000));
        assert_eq!(entries[0].0.mode, Some(0o644));
        assert_eq!(entries[0].0.kind, EntryKind::Regular);
        assert_eq!(entries[0].1, b"hello");
        assert_eq!(entries[1].0.size, Some(700));
        assert_eq!(entries[1].1, vec![0u8; 700]);
    }

    #[test]
    fn test_long_path() {
        let long = format!("{}/file.txt", "deep".repeat(40));
        let bytes = write_archive(&[(long.as_str(), b"x")]);
        let (entries, _) = read_all(&bytes);
        assert_eq!(entries[0].0.path, long);
        assert_eq!(entries[0].1, b"x");
    }

    #[test]
    fn test_pax_overrides() {
        let records = b"25 path=pax/override.txt\n22 mtime=1700000000.5\n";
        let mut builder = Builder::new(Vec::new());

        let mut pax = Header::new_ustar();
        pax.set_path("PaxHeaders/short.txt").unwrap();
        pax.set_entry_type(EntryType::XHeader);
        pax.set_size(records.len() as u64);
        pax.set_cksum();
        builder.append(&pax, &records[..]).unwrap();

        let mut header = Header::new_ustar();
        header.set_size(2);
        builder.append_data(&mut header, "short.txt", &b"hi"[..]).unwrap();
        let bytes = builder.into_inner().unwrap();

        let (entries, format) = read_all(&bytes);
        assert_eq!(format, Format::TarPax);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0.path, "pax/override.txt");
        assert_eq!(entries[0].0.mtime, Some(1_700_000_000));
        assert_eq!(entries[0].1, b"hi");
    }

    #[test]
    fn test_unread_payload_is_skipped() {
        let bytes = write_archive(&[("a", &[7u8; 1000]), ("b", b"bb"), ("c", b"")]);
        assert_eq!(count(&bytes).unwrap(), 3);
    }

    #[test]
    fn test_empty_archive() {
        let bytes = write_archive(&[]);
        assert_eq!(bytes, vec![0u8; 1024]);
        assert_eq!(detect(&bytes), Some(Format::Tar));
        assert_eq!(count(&bytes).unwrap(), 0);
    }

    #[test]
    fn test_bad_checksum() {
        let mut bytes = write_archive(&[("a", b"x")]);
        bytes[0] ^= 0xff;
        assert_eq!(detect(&bytes), None);
        assert!(count(&bytes).is_err());
    }

    #[test]
    fn test_truncated_payload() {
        let bytes = write_archive(&[("a", &[1u8; 600])]);
        assert!(count(&bytes[..700]).is_err());
        // cut on a block boundary inside the payload
        assert!(count(&bytes[..1024]).is_err());
    }

    #[test]
    fn test_declared_size_enforced() {
        let mut writer = TarWriter::new(Vec::new());
        let header = EntryHeader::regular("a", 4);
        assert!(writer.append(&header, &mut &b"abc"[..]).is_err());

        let mut writer = TarWriter::new(Vec::new());
        assert!(writer.append(&header, &mut &b"abcde"[..]).is_err());
    }

    #[test]
    fn test_parent_paths_rejected() {
        let mut writer = TarWriter::new(Vec::new());
        assert!(writer.append(&EntryHeader::regular("../escape", 0), &mut &b""[..]).is_err());
    }
}
