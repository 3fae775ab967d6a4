//! arcstream core - streaming archive creation, enumeration and extraction
//!
//! Archives are read and written strictly forward through stream adapters,
//! so neither side has to hold the whole archive in memory. Entry walks are
//! lazy iterators that own their read handle.

pub mod compress;
pub mod entry;
pub mod error;
pub mod filter;
pub mod format;
pub mod handle;
pub mod modify;
pub mod options;
pub mod stream;
pub mod transcode;
pub mod walk;

pub use compress::{create, create_into, Compressor};
pub use entry::{EntryDescriptor, EntryHeader, EntryKind, EntryRecord, NameFilter};
pub use error::{Error, ErrorCode, Result};
pub use handle::{ReadHandle, WriteHandle};
pub use modify::{delete, update};
pub use options::{options, Algorithm, ArchiveOptions, OptionsRecord, WriteFormat};
pub use stream::ByteSource;
pub use walk::{
    entries, extract_binary, extract_text, BinaryEntries, Entries, EntryWalk, TextEntries,
    DEFAULT_ENCODING,
};
