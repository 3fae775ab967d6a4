//! Archive options: write-side configuration and read-side introspection.

use crate::filter::Compression;
use crate::handle::ReadHandle;
use crate::stream::ByteSource;
use crate::{Error, Result};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Numeric container-format codes reported by read handles.
/// The upper 16 bits select the family, the low bits the variant.
pub mod format_code {
    pub const BASE_MASK: i32 = 0xff0000;
    pub const CPIO: i32 = 0x10000;
    pub const CPIO_POSIX: i32 = CPIO | 1;
    pub const CPIO_SVR4_NOCRC: i32 = CPIO | 4;
    pub const CPIO_SVR4_CRC: i32 = CPIO | 5;
    pub const SHAR: i32 = 0x20000;
    pub const TAR: i32 = 0x30000;
    pub const TAR_USTAR: i32 = TAR | 1;
    pub const TAR_PAX: i32 = TAR | 2;
    pub const TAR_GNU: i32 = TAR | 4;
    pub const ISO9660: i32 = 0x40000;
    pub const ZIP: i32 = 0x50000;
    pub const EMPTY: i32 = 0x60000;
    pub const AR: i32 = 0x70000;
    pub const AR_GNU: i32 = AR | 1;
    pub const AR_BSD: i32 = AR | 2;
    pub const MTREE: i32 = 0x80000;
    pub const RAW: i32 = 0x90000;
    pub const XAR: i32 = 0xA0000;
}

/// Numeric compression codes reported by read handles
pub mod compression_code {
    pub const NONE: i32 = 0;
    pub const GZIP: i32 = 1;
    pub const BZIP2: i32 = 2;
    pub const COMPRESS: i32 = 3;
    pub const PROGRAM: i32 = 4;
    pub const LZMA: i32 = 5;
    pub const XZ: i32 = 6;
    pub const UU: i32 = 7;
    pub const RPM: i32 = 8;
}

/// Name of a container format family; empty for unknown codes
pub fn format_name(code: i32) -> &'static str {
    match code & format_code::BASE_MASK {
        format_code::CPIO => "CPIO",
        format_code::SHAR => "SHAR",
        format_code::TAR => "TAR",
        format_code::ISO9660 => "ISO9660",
        format_code::ZIP => "ZIP",
        format_code::EMPTY => "EMPTY",
        format_code::AR => "AR",
        format_code::MTREE => "MTREE",
        format_code::RAW => "RAW",
        format_code::XAR => "XAR",
        _ => "",
    }
}

/// Name of a compression code; empty for unknown codes
pub fn compression_name(code: i32) -> &'static str {
    match code {
        compression_code::NONE => "NONE",
        compression_code::GZIP => "GZIP",
        compression_code::BZIP2 => "BZIP2",
        compression_code::COMPRESS => "COMPRESS",
        compression_code::PROGRAM => "PROGRAM",
        compression_code::LZMA => "LZMA",
        compression_code::XZ => "XZ",
        compression_code::UU => "UU",
        compression_code::RPM => "RPM",
        _ => "",
    }
}

/// Detected format and compression of an archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OptionsRecord {
    pub format: String,
    pub algorithm: String,
}

/// Report the container format and compression of `source`.
///
/// Only the first header is read; an archive without entries is fine.
pub fn options(source: ByteSource<'_>) -> Result<OptionsRecord> {
    let mut handle = ReadHandle::open(source)?;
    // variants are refined by the first header
    handle.next_entry(|_, _| Ok(()))?;

    let format = format_name(handle.format_code()?);
    let mut algorithm = compression_name(handle.compression_code()?);

    // zip compresses per member, not per stream
    if format == "ZIP" {
        algorithm = "DEFLATE";
    }
    handle.close()?;

    debug!(format, algorithm, "archive options detected");
    Ok(OptionsRecord {
        format: format.to_string(),
        algorithm: algorithm.to_string(),
    })
}

// ============================================================================
// Write-side options
// ============================================================================

/// Container format to write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteFormat {
    /// ustar, with pax records for paths that do not fit
    Tar,
    Zip,
    /// SVR4 "newc"
    Cpio,
    Ar,
}

impl WriteFormat {
    pub fn name(&self) -> &'static str {
        match self {
            WriteFormat::Tar => "TAR",
            WriteFormat::Zip => "ZIP",
            WriteFormat::Cpio => "CPIO",
            WriteFormat::Ar => "AR",
        }
    }

    /// Algorithm used when only the format is given
    pub fn default_algorithm(&self) -> Algorithm {
        match self {
            WriteFormat::Zip => Algorithm::Deflate,
            _ => Algorithm::None,
        }
    }
}

impl FromStr for WriteFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TAR" | "USTAR" | "PAX" => Ok(WriteFormat::Tar),
            "ZIP" => Ok(WriteFormat::Zip),
            "CPIO" | "NEWC" => Ok(WriteFormat::Cpio),
            "AR" => Ok(WriteFormat::Ar),
            _ => Err(Error::InvalidOptions(format!("unknown archive format '{}'", s))),
        }
    }
}

impl fmt::Display for WriteFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Compression algorithm to write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    None,
    /// Per-member deflate; zip only
    Deflate,
    Gzip,
    Bzip2,
    Xz,
    Lzma,
}

impl Algorithm {
    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::None => "NONE",
            Algorithm::Deflate => "DEFLATE",
            Algorithm::Gzip => "GZIP",
            Algorithm::Bzip2 => "BZIP2",
            Algorithm::Xz => "XZ",
            Algorithm::Lzma => "LZMA",
        }
    }

    /// Stream filter for this algorithm; `None` for per-member deflate
    pub fn stream_compression(&self) -> Option<Compression> {
        match self {
            Algorithm::None => Some(Compression::None),
            Algorithm::Deflate => None,
            Algorithm::Gzip => Some(Compression::Gzip),
            Algorithm::Bzip2 => Some(Compression::Bzip2),
            Algorithm::Xz => Some(Compression::Xz),
            Algorithm::Lzma => Some(Compression::Lzma),
        }
    }
}

impl FromStr for Algorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NONE" | "STORE" => Ok(Algorithm::None),
            "DEFLATE" => Ok(Algorithm::Deflate),
            "GZIP" => Ok(Algorithm::Gzip),
            "BZIP2" => Ok(Algorithm::Bzip2),
            "XZ" => Ok(Algorithm::Xz),
            "LZMA" => Ok(Algorithm::Lzma),
            _ => Err(Error::InvalidOptions(format!("unknown compression algorithm '{}'", s))),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Write-side configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveOptions {
    pub format: WriteFormat,
    pub algorithm: Algorithm,
    /// 0 (fastest) to 9 (smallest)
    pub level: u32,
}

pub const DEFAULT_LEVEL: u32 = 4;
pub const MAX_LEVEL: u32 = 9;

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            format: WriteFormat::Zip,
            algorithm: Algorithm::Deflate,
            level: DEFAULT_LEVEL,
        }
    }
}

impl ArchiveOptions {
    pub fn new(format: WriteFormat, algorithm: Algorithm) -> Self {
        Self {
            format,
            algorithm,
            level: DEFAULT_LEVEL,
        }
    }

    pub fn with_level(mut self, level: u32) -> Self {
        self.level = level;
        self
    }

    /// Build options from optional names, as hosts and the CLI supply them.
    /// A missing algorithm falls back to the format's default.
    pub fn parse(format: Option<&str>, algorithm: Option<&str>, level: Option<u32>) -> Result<Self> {
        let defaults = Self::default();
        let format = match format {
            Some(name) => name.parse()?,
            None => defaults.format,
        };
        let algorithm = match algorithm {
            Some(name) => name.parse()?,
            None => format.default_algorithm(),
        };
        let options = Self {
            format,
            algorithm,
            level: level.unwrap_or(defaults.level),
        };
        options.validate()?;
        Ok(options)
    }

    /// Reject levels out of range and format/algorithm pairs the writers cannot produce.
    pub fn validate(&self) -> Result<()> {
        if self.level > MAX_LEVEL {
            return Err(Error::InvalidOptions(format!(
                "compression level {} is out of range 0-{}",
                self.level, MAX_LEVEL
            )));
        }

        let supported = match self.format {
            WriteFormat::Zip => matches!(self.algorithm, Algorithm::None | Algorithm::Deflate),
            _ => self.algorithm != Algorithm::Deflate,
        };
        if !supported {
            return Err(Error::InvalidOptions(format!(
                "{} archives cannot be written with {} compression",
                self.format, self.algorithm
            )));
        }
        Ok(())
    }
}
