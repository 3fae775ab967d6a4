//! Entry metadata: headers read from the codec, descriptors handed to the
//! compressor, and records produced by enumeration.

use crate::transcode::{self, Charset};
use crate::Result;
use chrono::{DateTime, FixedOffset, Local, TimeZone};
use serde::Serialize;
use std::collections::HashSet;

/// Permission bits applied to written entries unless a descriptor says otherwise
pub const DEFAULT_MODE: u32 = 0o644;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Regular,
    Directory,
    Symlink,
    Other,
}

/// One header as the codec sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryHeader {
    pub path: String,
    /// Uncompressed payload size, when the container records it up front
    pub size: Option<u64>,
    /// Modification time in seconds since the Unix epoch
    pub mtime: Option<i64>,
    pub kind: EntryKind,
    pub mode: Option<u32>,
}

impl EntryHeader {
    pub fn regular(path: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            size: Some(size),
            mtime: None,
            kind: EntryKind::Regular,
            mode: Some(DEFAULT_MODE),
        }
    }
}

/// Logical identity of one member to write
#[derive(Debug, Clone)]
pub struct EntryDescriptor {
    pub path: String,
    /// Text encoding of the entry's content
    pub encoding: Charset,
    /// Seconds since the Unix epoch
    pub last_modified: Option<i64>,
    pub mode: u32,
}

impl EntryDescriptor {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            encoding: Charset::utf8(),
            last_modified: None,
            mode: DEFAULT_MODE,
        }
    }

    pub fn with_encoding(mut self, label: &str) -> Result<Self> {
        self.encoding = transcode::lookup(label)?;
        Ok(self)
    }

    pub fn with_last_modified(mut self, secs: i64) -> Self {
        self.last_modified = Some(secs);
        self
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode & 0o7777;
        self
    }
}

/// Metadata-only view of an entry, as yielded by enumeration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryRecord {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(rename = "last-modified", skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<FixedOffset>>,
}

impl EntryRecord {
    pub fn from_header(header: &EntryHeader) -> Self {
        Self {
            path: header.path.clone(),
            size: header.size,
            last_modified: header.mtime.and_then(local_time),
        }
    }

    /// Local UTC offset of the modification time, in seconds
    pub fn utc_offset(&self) -> Option<i32> {
        self.last_modified.map(|dt| dt.offset().local_minus_utc())
    }
}

/// Convert an absolute instant into local civil time, keeping the offset
/// (daylight saving included) that applied at that instant.
pub fn local_time(secs: i64) -> Option<DateTime<FixedOffset>> {
    let local = Local.timestamp_opt(secs, 0).single()?;
    let offset = *local.offset();
    Some(local.with_timezone(&offset))
}

/// Set of requested entry paths. Exact matches only; no globbing.
#[derive(Debug, Clone, Default)]
pub struct NameFilter {
    names: Option<HashSet<String>>,
}

impl NameFilter {
    /// Accept every entry
    pub fn all() -> Self {
        Self { names: None }
    }

    /// Accept only the given paths. An empty set accepts everything.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: HashSet<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            Self::all()
        } else {
            Self { names: Some(names) }
        }
    }

    pub fn is_all(&self) -> bool {
        self.names.is_none()
    }

    pub fn matches(&self, path: &str) -> bool {
        match &self.names {
            Some(names) => names.contains(path),
            None => true,
        }
    }
}

impl<S: Into<String>> FromIterator<S> for NameFilter {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        NameFilter::from_names(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_exact_match() {
        let filter: NameFilter = ["a.txt", "dir/b.txt"].into_iter().collect();
        assert!(filter.matches("a.txt"));
        assert!(filter.matches("dir/b.txt"));
        assert!(!filter.matches("b.txt"));
        assert!(!filter.matches("*.txt"));
    }

    #[test]
    fn test_empty_filter_accepts_all() {
        let filter = NameFilter::from_names(Vec::<String>::new());
        assert!(filter.is_all());
        assert!(filter.matches("anything"));
    }

    #[test]
    fn test_record_from_header() {
        let mut header = EntryHeader::regular("a.txt", 5);
        header.mtime = Some(1_700_000_000);

        let record = EntryRecord::from_header(&header);
        assert_eq!(record.path, "a.txt");
        assert_eq!(record.size, Some(5));

        let modified = record.last_modified.unwrap();
        assert_eq!(modified.timestamp(), 1_700_000_000);
        let expected = Local.timestamp_opt(1_700_000_000, 0).unwrap().offset().local_minus_utc();
        assert_eq!(record.utc_offset(), Some(expected));
    }

    #[test]
    fn test_record_without_optional_fields() {
        let header = EntryHeader {
            path: "x".into(),
            size: None,
            mtime: None,
            kind: EntryKind::Regular,
            mode: None,
        };
        let record = EntryRecord::from_header(&header);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json, serde_json::json!({ "path": "x" }));
    }

    #[test]
    fn test_descriptor_builder() {
        let desc = EntryDescriptor::new("notes.txt")
            .with_encoding("ISO-8859-1")
            .unwrap()
            .with_mode(0o100600)
            .with_last_modified(42);
        assert_eq!(desc.encoding, Charset::Latin1);
        assert_eq!(desc.mode, 0o600);
        assert_eq!(desc.last_modified, Some(42));

        assert!(EntryDescriptor::new("x").with_encoding("BOGUS-9999").is_err());
    }
}
