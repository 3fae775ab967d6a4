//! In-place modification of existing archives. Not supported: both
//! operations always fail.

use crate::entry::{EntryDescriptor, NameFilter};
use crate::stream::ByteSource;
use crate::{Error, Result};
use std::io::Cursor;

/// Replace or add entries in an existing archive.
pub fn update<'a, I>(_archive: ByteSource<'_>, _entries: &[EntryDescriptor], _contents: I) -> Result<Cursor<Vec<u8>>>
where
    I: IntoIterator<Item = ByteSource<'a>>,
{
    Err(Error::NotImplemented("update"))
}

/// Remove entries from an existing archive.
pub fn delete(_archive: ByteSource<'_>, _names: &NameFilter) -> Result<Cursor<Vec<u8>>> {
    Err(Error::NotImplemented("delete"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_always_not_implemented() {
        let err = update(ByteSource::from("x"), &[EntryDescriptor::new("a")], [ByteSource::from("1")]).unwrap_err();
        assert_eq!(err.code().as_str(), "ImplementationError");
        assert_eq!(err.to_string(), "update: Function not yet Implemented");

        let err = delete(ByteSource::from(Vec::new()), &NameFilter::all()).unwrap_err();
        assert_eq!(err.code().qualified(), "arcstream:ImplementationError");
    }
}
