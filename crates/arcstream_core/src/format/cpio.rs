//! cpio: odc, newc and crc variants on read; newc on write.

use super::{
    declared_size, discard, drain, read_full, EntryReader, EntryWriter, ExactSize, Format, Visit, MAX_NAME_LEN,
    WRITE_BLOCK_SIZE,
};
use crate::entry::{EntryHeader, EntryKind, DEFAULT_MODE};
use crate::{Error, Result};
use std::io::{self, Read, Write};
use tracing::trace;

const NEWC_MAGIC: &[u8; 6] = b"070701";
const CRC_MAGIC: &[u8; 6] = b"070702";
const ODC_MAGIC: &[u8; 6] = b"070707";
const TRAILER: &str = "TRAILER!!!";

const NEWC_HEADER_LEN: usize = 110;
const ODC_HEADER_LEN: usize = 76;

const S_IFMT: u32 = 0o170000;
const S_IFREG: u32 = 0o100000;
const S_IFDIR: u32 = 0o040000;
const S_IFLNK: u32 = 0o120000;

fn pad4(len: u64) -> u64 {
    (4 - len % 4) % 4
}

fn number(field: &[u8], radix: u32) -> Result<u64> {
    std::str::from_utf8(field)
        .ok()
        .and_then(|s| u64::from_str_radix(s.trim_end_matches('\0').trim(), radix).ok())
        .ok_or_else(|| Error::codec("Damaged cpio header (bad numeric field)"))
}

fn kind_of(mode: u32) -> EntryKind {
    match mode & S_IFMT {
        S_IFREG => EntryKind::Regular,
        S_IFDIR => EntryKind::Directory,
        S_IFLNK => EntryKind::Symlink,
        _ => EntryKind::Other,
    }
}

struct Parsed {
    mode: u32,
    mtime: i64,
    size: u64,
    name_len: u64,
    check: u32,
}

/// Payload of the current entry, summed for the crc variant
struct EntryData<'r, R: Read + ?Sized> {
    input: &'r mut R,
    remaining: u64,
    /// Expected checksum and the running sum
    check: Option<(u32, u32)>,
}

impl<R: Read + ?Sized> Read for EntryData<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = buf.len().min(self.remaining.min(usize::MAX as u64) as usize);
        let n = self.input.read(&mut buf[..want])?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "Truncated cpio archive"));
        }
        self.remaining -= n as u64;

        if let Some((expected, sum)) = self.check.as_mut() {
            *sum = buf[..n].iter().fold(*sum, |acc, b| acc.wrapping_add(*b as u32));
            if self.remaining == 0 && *sum != *expected {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "cpio entry checksum mismatch"));
            }
        }
        Ok(n)
    }
}

pub(super) struct CpioReader<'a> {
    input: Box<dyn Read + 'a>,
    format: Format,
    done: bool,
}

impl<'a> CpioReader<'a> {
    pub(super) fn new(input: Box<dyn Read + 'a>, format: Format) -> Self {
        Self {
            input,
            format,
            done: false,
        }
    }

    fn read_fields(&mut self, buf: &mut [u8]) -> Result<()> {
        if read_full(&mut self.input, buf)? != buf.len() {
            return Err(Error::codec("Truncated cpio header"));
        }
        Ok(())
    }

    fn parse_newc(&mut self) -> Result<Parsed> {
        let mut fields = [0u8; NEWC_HEADER_LEN - 6];
        self.read_fields(&mut fields)?;
        let field = |i: usize| number(&fields[i * 8..i * 8 + 8], 16);
        Ok(Parsed {
            mode: field(1)? as u32,
            mtime: field(5)? as i64,
            size: field(6)?,
            name_len: field(11)?,
            check: field(12)? as u32,
        })
    }

    fn parse_odc(&mut self) -> Result<Parsed> {
        let mut fields = [0u8; ODC_HEADER_LEN - 6];
        self.read_fields(&mut fields)?;
        // dev ino mode uid gid nlink rdev are six digits each
        Ok(Parsed {
            mode: number(&fields[12..18], 8)? as u32,
            mtime: number(&fields[42..53], 8)? as i64,
            name_len: number(&fields[53..59], 8)?,
            size: number(&fields[59..70], 8)?,
            check: 0,
        })
    }
}

impl EntryReader for CpioReader<'_> {
    fn next_entry(&mut self, visit: &mut Visit<'_>) -> Result<bool> {
        if self.done {
            return Ok(false);
        }

        let mut magic = [0u8; 6];
        let n = read_full(&mut self.input, &mut magic)?;
        if n == 0 {
            self.done = true;
            return Ok(false);
        }
        if n < magic.len() {
            return Err(Error::codec("Truncated cpio header"));
        }

        let (parsed, header_len, padded) = match &magic {
            NEWC_MAGIC | CRC_MAGIC => {
                self.format = if &magic == CRC_MAGIC {
                    Format::CpioCrc
                } else {
                    Format::CpioNewc
                };
                (self.parse_newc()?, NEWC_HEADER_LEN as u64, true)
            }
            ODC_MAGIC => {
                self.format = Format::CpioOdc;
                (self.parse_odc()?, ODC_HEADER_LEN as u64, false)
            }
            _ => return Err(Error::codec("Damaged cpio archive (bad magic)")),
        };

        if parsed.name_len > MAX_NAME_LEN {
            return Err(Error::codec(format!(
                "Damaged cpio header (name of {} bytes)",
                parsed.name_len
            )));
        }
        let mut name = vec![0u8; parsed.name_len as usize];
        self.read_fields(&mut name)?;
        if padded {
            discard(&mut self.input, pad4(header_len + parsed.name_len), "cpio")?;
        }
        if name.last() == Some(&0) {
            name.pop();
        }
        let path = String::from_utf8_lossy(&name).into_owned();

        if path == TRAILER {
            self.done = true;
            return Ok(false);
        }

        trace!(path = %path, size = parsed.size, "cpio header");
        let header = EntryHeader {
            path,
            size: Some(parsed.size),
            mtime: Some(parsed.mtime),
            kind: kind_of(parsed.mode),
            mode: Some(parsed.mode & 0o7777),
        };

        let mut data = EntryData {
            input: &mut self.input,
            remaining: parsed.size,
            check: (self.format == Format::CpioCrc && header.kind == EntryKind::Regular)
                .then_some((parsed.check, 0)),
        };
        visit(&header, &mut data)?;
        // the checksum needs every byte
        drain(&mut data)?;

        if padded {
            discard(&mut self.input, pad4(parsed.size), "cpio")?;
        }
        Ok(true)
    }

    fn format(&self) -> Format {
        self.format
    }
}

// ============================================================================
// Writer
// ============================================================================

pub(super) struct CpioWriter<W: Write> {
    output: W,
    written: u64,
    next_ino: u32,
}

impl<W: Write> CpioWriter<W> {
    pub(super) fn new(output: W) -> Self {
        Self {
            output,
            written: 0,
            next_ino: 1,
        }
    }

    fn emit(&mut self, bytes: &[u8]) -> Result<()> {
        self.output.write_all(bytes)?;
        self.written += bytes.len() as u64;
        Ok(())
    }

    fn emit_zeros(&mut self, len: u64) -> Result<()> {
        self.emit(&vec![0u8; len as usize])
    }

    fn emit_header(&mut self, ino: u32, mode: u32, nlink: u32, mtime: u32, size: u32, name: &str) -> Result<()> {
        let name_len = name.len() as u64 + 1;
        let header = format!(
            "070701{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}",
            ino, mode, 0, 0, nlink, mtime, size, 0, 0, 0, 0, name_len, 0
        );
        self.emit(header.as_bytes())?;
        self.emit(name.as_bytes())?;
        self.emit(&[0])?;
        self.emit_zeros(pad4(NEWC_HEADER_LEN as u64 + name_len))
    }
}

impl<W: Write> EntryWriter for CpioWriter<W> {
    type Sink = W;

    fn append(&mut self, entry: &EntryHeader, data: &mut dyn Read) -> Result<()> {
        let size = u32::try_from(declared_size(entry)?)
            .map_err(|_| Error::codec(format!("'{}' is too large for cpio format", entry.path)))?;
        let mtime = u32::try_from(entry.mtime.unwrap_or(0).max(0)).unwrap_or(u32::MAX);
        let mode = S_IFREG | entry.mode.unwrap_or(DEFAULT_MODE) & 0o7777;

        let ino = self.next_ino;
        self.next_ino += 1;
        self.emit_header(ino, mode, 1, mtime, size, &entry.path)?;

        let copied = io::copy(&mut ExactSize::new(data, size as u64), &mut self.output)?;
        self.written += copied;
        self.emit_zeros(pad4(size as u64))
    }

    fn finish(mut self) -> Result<W> {
        self.emit_header(0, 0, 1, 0, 0, TRAILER)?;
        let block = WRITE_BLOCK_SIZE as u64;
        let tail = (block - self.written % block) % block;
        self.emit_zeros(tail)?;
        self.output.flush()?;
        Ok(self.output)
    }
}
