//! ar through the `ar` crate: common, GNU and BSD variants on read. Short
//! names are written as-is, anything else with BSD `#1/len` names.

use super::{declared_size, drain, read_full, EntryReader, EntryWriter, ExactSize, Format, Visit, MAX_NAME_LEN};
use crate::entry::{EntryHeader, EntryKind, DEFAULT_MODE};
use crate::{Error, Result};
use ::ar::{Archive, Builder, Header, Variant};
use std::io::{self, Read, Write};
use tracing::trace;

pub(crate) const MAGIC: &[u8] = b"!<arch>\n";

const HEADER_LEN: usize = 60;
const MAX_SIZE: u64 = 9_999_999_999;

/// Names the reader would take for a symbol table or a GNU/BSD name
/// reference rather than a member.
fn check_name(path: &str) -> Result<()> {
    let reserved = path.is_empty()
        || path.starts_with('/')
        || path.ends_with('/')
        || path.starts_with("#1/")
        || matches!(path, "__.SYMDEF" | "__.SYMDEF SORTED");
    if reserved {
        return Err(Error::codec(format!("'{}' cannot be stored as an ar member name", path)));
    }
    Ok(())
}

fn decimal(field: &[u8]) -> Option<u64> {
    std::str::from_utf8(field).ok()?.trim_end_matches(' ').parse().ok()
}

/// Looks at each member header before the `ar` crate parses it and refuses
/// name lengths above [`MAX_NAME_LEN`], which the crate would allocate
/// up front.
struct NameGuard<R> {
    inner: R,
    offset: u64,
    /// Offset of the next member header; `None` once the framing is lost
    next_header: Option<u64>,
    header: [u8; HEADER_LEN],
    served: usize,
    held: usize,
}

impl<R: Read> NameGuard<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            offset: 0,
            next_header: Some(MAGIC.len() as u64),
            header: [0; HEADER_LEN],
            served: 0,
            held: 0,
        }
    }

    fn load_header(&mut self) -> io::Result<()> {
        self.held = read_full(&mut self.inner, &mut self.header)?;
        self.served = 0;
        if self.held < HEADER_LEN {
            self.next_header = None;
            return Ok(());
        }

        let name = &self.header[..16];
        let size = decimal(&self.header[48..58]);
        let name_len = if name.starts_with(b"//") && name[2..].iter().all(|b| *b == b' ') {
            size
        } else if name.starts_with(b"#1/") {
            decimal(&name[3..])
        } else {
            Some(0)
        };
        if name_len.is_some_and(|len| len > MAX_NAME_LEN) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("ar member name longer than {} bytes", MAX_NAME_LEN),
            ));
        }
        self.next_header = size.map(|size| self.offset + HEADER_LEN as u64 + size + size % 2);
        Ok(())
    }
}

impl<R: Read> Read for NameGuard<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.served == self.held && self.next_header == Some(self.offset) {
            self.load_header()?;
        }
        if self.served < self.held {
            let n = buf.len().min(self.held - self.served);
            buf[..n].copy_from_slice(&self.header[self.served..self.served + n]);
            self.served += n;
            self.offset += n as u64;
            return Ok(n);
        }

        let want = match self.next_header {
            Some(next) => buf.len().min((next - self.offset).min(usize::MAX as u64) as usize),
            None => buf.len(),
        };
        let n = self.inner.read(&mut buf[..want])?;
        self.offset += n as u64;
        Ok(n)
    }
}

pub(super) struct ArReader<'a> {
    archive: Archive<NameGuard<Box<dyn Read + 'a>>>,
    format: Format,
}

impl<'a> ArReader<'a> {
    pub(super) fn new(input: Box<dyn Read + 'a>) -> Self {
        Self {
            archive: Archive::new(NameGuard::new(input)),
            format: Format::Ar,
        }
    }
}

impl EntryReader for ArReader<'_> {
    fn next_entry(&mut self, visit: &mut Visit<'_>) -> Result<bool> {
        let Some(entry) = self.archive.next_entry() else {
            return Ok(false);
        };
        let mut entry = entry?;

        let found = entry.header();
        let header = EntryHeader {
            path: String::from_utf8_lossy(found.identifier()).into_owned(),
            size: Some(found.size()),
            mtime: Some(found.mtime() as i64),
            kind: EntryKind::Regular,
            mode: Some(found.mode() & 0o7777),
        };
        trace!(path = %header.path, size = ?header.size, "ar header");
        visit(&header, &mut entry)?;
        drain(&mut entry)?;
        drop(entry);

        self.format = match self.archive.variant() {
            Variant::Common => Format::Ar,
            Variant::GNU => Format::ArGnu,
            Variant::BSD => Format::ArBsd,
        };
        Ok(true)
    }

    fn format(&self) -> Format {
        self.format
    }
}

// ============================================================================
// Writer
// ============================================================================

pub(super) struct ArWriter<W: Write> {
    builder: Builder<W>,
    entries: usize,
}

impl<W: Write> ArWriter<W> {
    pub(super) fn new(output: W) -> Self {
        Self {
            builder: Builder::new(output),
            entries: 0,
        }
    }
}

impl<W: Write> EntryWriter for ArWriter<W> {
    type Sink = W;

    fn append(&mut self, entry: &EntryHeader, data: &mut dyn Read) -> Result<()> {
        let size = declared_size(entry)?;
        let path = entry.path.as_str();
        check_name(path)?;
        if size + path.len() as u64 > MAX_SIZE {
            return Err(Error::codec(format!("'{}' is too large for ar format", path)));
        }

        let mut header = Header::new(path.as_bytes().to_vec(), size);
        header.set_mtime(entry.mtime.unwrap_or(0).max(0) as u64);
        header.set_mode(0o100000 | entry.mode.unwrap_or(DEFAULT_MODE) & 0o7777);
        self.builder.append(&header, ExactSize::new(data, size))?;
        self.entries += 1;
        Ok(())
    }

    fn finish(self) -> Result<W> {
        let mut output = self.builder.into_inner()?;
        // the builder writes the signature with the first member
        if self.entries == 0 {
            output.write_all(MAGIC)?;
        }
        output.flush()?;
        Ok(output)
    }
}
