//! `archive` module: create, enumerate and extract archives from Lua.
//!
//! Enumeration and extraction return lazy iterators that work directly in a
//! generic `for`, or step by step through `:next()` and `:close()`.

use crate::buffer::Buffer;
use crate::error::{lua_error, Result};
use arcstream_core::{
    transcode, ArchiveOptions, BinaryEntries, ByteSource, EntryDescriptor, EntryRecord,
    Entries, NameFilter, OptionsRecord, TextEntries, DEFAULT_ENCODING,
};
use mlua::{Function, Lua, LuaSerdeExt, MetaMethod, MultiValue, Table, UserData, UserDataMethods, Value};
use std::sync::Mutex;
use tracing::debug;

// ============================================================================
// Operations
// ============================================================================

/// Every function exported by the module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Entries,
    ExtractText,
    ExtractBinary,
    Options,
    Update,
    Delete,
}

const OPERATIONS: [(&str, Operation); 7] = [
    ("create", Operation::Create),
    ("entries", Operation::Entries),
    ("extract_text", Operation::ExtractText),
    ("extract_binary", Operation::ExtractBinary),
    ("options", Operation::Options),
    ("update", Operation::Update),
    ("delete", Operation::Delete),
];

impl Operation {
    pub fn all() -> impl Iterator<Item = Operation> {
        OPERATIONS.iter().map(|(_, op)| *op)
    }

    pub fn name(self) -> &'static str {
        OPERATIONS
            .iter()
            .find(|(_, op)| *op == self)
            .map(|(name, _)| *name)
            .unwrap_or_default()
    }

    pub fn from_name(name: &str) -> Option<Operation> {
        OPERATIONS.iter().find(|(n, _)| *n == name).map(|(_, op)| *op)
    }

    fn function(self, lua: &Lua) -> mlua::Result<Function> {
        match self {
            Operation::Create => lua.create_function(archive_create),
            Operation::Entries => lua.create_function(archive_entries),
            Operation::ExtractText => lua.create_function(archive_extract_text),
            Operation::ExtractBinary => lua.create_function(archive_extract_binary),
            Operation::Options => lua.create_function(archive_options),
            Operation::Update => lua.create_function(archive_update),
            Operation::Delete => lua.create_function(archive_delete),
        }
    }
}

// ============================================================================
// Host values
// ============================================================================

/// Builds the Lua values handed back to scripts
pub struct HostContext<'lua> {
    lua: &'lua Lua,
}

impl<'lua> HostContext<'lua> {
    pub fn new(lua: &'lua Lua) -> Self {
        Self { lua }
    }

    /// `{ path=, size=?, last_modified=?, utc_offset=? }`
    pub fn record(&self, record: &EntryRecord) -> mlua::Result<Value> {
        let table = self.lua.create_table()?;
        table.set("path", record.path.as_str())?;
        if let Some(size) = record.size {
            table.set("size", size)?;
        }
        if let Some(modified) = record.last_modified {
            table.set("last_modified", modified.to_rfc3339())?;
            table.set("utc_offset", modified.offset().local_minus_utc())?;
        }
        Ok(Value::Table(table))
    }

    pub fn text(&self, text: String) -> mlua::Result<Value> {
        Ok(Value::String(self.lua.create_string(text)?))
    }

    pub fn binary(&self, bytes: Vec<u8>) -> mlua::Result<Value> {
        Ok(Value::UserData(self.lua.create_userdata(Buffer::from_bytes(bytes))?))
    }

    /// `{ format=, algorithm= }`
    pub fn options(&self, record: &OptionsRecord) -> mlua::Result<Value> {
        self.lua.to_value(record)
    }
}

// ============================================================================
// Argument conversion
// ============================================================================

/// Strings and Buffers are read from memory, `{ path = ... }` from a file.
fn source(value: Value) -> mlua::Result<ByteSource<'static>> {
    match value {
        Value::String(s) => Ok(ByteSource::from(s.as_bytes().to_vec())),
        Value::UserData(ud) => Ok(ByteSource::from(ud.borrow::<Buffer>()?.get_data()?)),
        Value::Table(t) => {
            let path: String = t
                .get::<Option<String>>("path")?
                .ok_or_else(|| mlua::Error::runtime("archive source table needs a 'path' field"))?;
            let file = std::fs::File::open(&path)
                .map_err(|e| mlua::Error::runtime(format!("Failed to open '{}': {}", path, e)))?;
            Ok(ByteSource::seekable(file))
        }
        other => Err(mlua::Error::runtime(format!(
            "Expected string, Buffer or {{ path = ... }}, got {}",
            other.type_name()
        ))),
    }
}

/// Array elements of `table`, in order
fn sequence(table: &Table) -> mlua::Result<Vec<Value>> {
    (1..=table.raw_len()).map(|i| table.raw_get::<Value>(i)).collect()
}

fn descriptor(value: Value) -> mlua::Result<EntryDescriptor> {
    match value {
        Value::String(s) => Ok(EntryDescriptor::new(s.to_str()?.to_string())),
        Value::Table(t) => {
            let path: String = t
                .get::<Option<String>>("path")?
                .ok_or_else(|| mlua::Error::runtime("entry table needs a 'path' field"))?;
            let mut entry = EntryDescriptor::new(path);
            if let Some(label) = t.get::<Option<String>>("encoding")? {
                entry = entry.with_encoding(&label).map_err(lua_error)?;
            }
            if let Some(secs) = t.get::<Option<i64>>("last_modified")? {
                entry = entry.with_last_modified(secs);
            }
            if let Some(mode) = t.get::<Option<u32>>("mode")? {
                entry = entry.with_mode(mode);
            }
            Ok(entry)
        }
        other => Err(mlua::Error::runtime(format!(
            "Expected entry path or table, got {}",
            other.type_name()
        ))),
    }
}

/// Lua strings are text in the entry's declared encoding; everything else
/// is taken as raw bytes.
fn content(value: Value, entry: &EntryDescriptor) -> mlua::Result<ByteSource<'static>> {
    match value {
        Value::String(s) if transcode::is_necessary(entry.encoding) => match s.to_str() {
            Ok(text) => Ok(ByteSource::from(transcode::encode(&text, entry.encoding))),
            Err(_) => Ok(ByteSource::from(s.as_bytes().to_vec())),
        },
        other => source(other),
    }
}

fn names(value: Option<Value>) -> mlua::Result<NameFilter> {
    match value {
        None | Some(Value::Nil) => Ok(NameFilter::all()),
        Some(Value::String(s)) => Ok(NameFilter::from_names([s.to_str()?.to_string()])),
        Some(Value::Table(t)) => {
            let mut list = Vec::new();
            for value in sequence(&t)? {
                match value {
                    Value::String(s) => list.push(s.to_str()?.to_string()),
                    other => {
                        return Err(mlua::Error::runtime(format!(
                            "entry names must be strings, got {}",
                            other.type_name()
                        )))
                    }
                }
            }
            Ok(NameFilter::from_names(list))
        }
        Some(other) => Err(mlua::Error::runtime(format!(
            "Expected entry name or list of names, got {}",
            other.type_name()
        ))),
    }
}

fn archive_options_arg(table: Option<Table>) -> mlua::Result<ArchiveOptions> {
    let Some(table) = table else {
        return Ok(ArchiveOptions::default());
    };
    let format = table.get::<Option<String>>("format")?;
    let algorithm = table.get::<Option<String>>("algorithm")?;
    let level = table.get::<Option<u32>>("level")?;
    ArchiveOptions::parse(format.as_deref(), algorithm.as_deref(), level).map_err(lua_error)
}

// ============================================================================
// Lazy iterators
// ============================================================================

enum Walk {
    Entries(Entries<'static>),
    Text(TextEntries<'static>),
    Binary(BinaryEntries<'static>),
}

/// Iterator userdata returned by `entries`, `extract_text` and `extract_binary`
struct EntryIterator {
    inner: Mutex<Option<Walk>>,
}

impl EntryIterator {
    fn new(walk: Walk) -> Self {
        Self {
            inner: Mutex::new(Some(walk)),
        }
    }

    /// Next value, or nil once the archive is exhausted
    fn next_value(&self, lua: &Lua) -> mlua::Result<Value> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|e| mlua::Error::runtime(format!("Lock error: {}", e)))?;
        let Some(walk) = guard.as_mut() else {
            return Ok(Value::Nil);
        };

        let host = HostContext::new(lua);
        let value = match walk {
            Walk::Entries(w) => w.next_item().map_err(lua_error)?.map(|r| host.record(&r)),
            Walk::Text(w) => w.next_item().map_err(lua_error)?.map(|t| host.text(t)),
            Walk::Binary(w) => w.next_item().map_err(lua_error)?.map(|b| host.binary(b)),
        };
        match value {
            Some(value) => value,
            None => {
                guard.take();
                Ok(Value::Nil)
            }
        }
    }

    fn close(&self) -> mlua::Result<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|e| mlua::Error::runtime(format!("Lock error: {}", e)))?;
        let result = match guard.take() {
            Some(Walk::Entries(mut w)) => w.close(),
            Some(Walk::Text(mut w)) => w.close(),
            Some(Walk::Binary(mut w)) => w.close(),
            None => Ok(()),
        };
        result.map_err(lua_error)
    }
}

impl UserData for EntryIterator {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("next", |lua, this, _: ()| this.next_value(lua));

        methods.add_method("close", |_, this, _: ()| this.close());

        // generic `for` calls the iterator with (state, control); both are ignored
        methods.add_meta_method(MetaMethod::Call, |lua, this, _: MultiValue| this.next_value(lua));
    }
}

// ============================================================================
// Module-level functions
// ============================================================================

fn archive_create(_: &Lua, (entries, contents, options): (Table, Table, Option<Table>)) -> mlua::Result<Buffer> {
    let options = archive_options_arg(options)?;
    let entries = sequence(&entries)?
        .into_iter()
        .map(descriptor)
        .collect::<mlua::Result<Vec<_>>>()?;

    // pair each content with its entry's encoding; surplus contents stay raw
    let mut sources = Vec::new();
    for (index, value) in sequence(&contents)?.into_iter().enumerate() {
        let source = match entries.get(index) {
            Some(entry) => content(value, entry)?,
            None => source(value)?,
        };
        sources.push(source);
    }

    debug!(entries = entries.len(), format = %options.format, "creating archive from Lua");
    let archive = arcstream_core::create(&entries, sources, &options).map_err(lua_error)?;
    Ok(Buffer::from_bytes(archive.into_inner()))
}

fn archive_entries(_: &Lua, src: Value) -> mlua::Result<EntryIterator> {
    let walk = arcstream_core::entries(source(src)?).map_err(lua_error)?;
    Ok(EntryIterator::new(Walk::Entries(walk)))
}

fn archive_extract_text(
    _: &Lua,
    (src, filter, encoding): (Value, Option<Value>, Option<String>),
) -> mlua::Result<EntryIterator> {
    let encoding = encoding.unwrap_or_else(|| DEFAULT_ENCODING.to_string());
    // reject the label before touching the source
    transcode::lookup(&encoding).map_err(lua_error)?;
    let walk = arcstream_core::extract_text(source(src)?, names(filter)?, &encoding).map_err(lua_error)?;
    Ok(EntryIterator::new(Walk::Text(walk)))
}

fn archive_extract_binary(_: &Lua, (src, filter): (Value, Option<Value>)) -> mlua::Result<EntryIterator> {
    let walk = arcstream_core::extract_binary(source(src)?, names(filter)?).map_err(lua_error)?;
    Ok(EntryIterator::new(Walk::Binary(walk)))
}

fn archive_options(lua: &Lua, src: Value) -> mlua::Result<Value> {
    let record = arcstream_core::options(source(src)?).map_err(lua_error)?;
    HostContext::new(lua).options(&record)
}

fn archive_update(_: &Lua, (src, entries, contents): (Value, Option<Table>, Option<Table>)) -> mlua::Result<Buffer> {
    let entries = match entries {
        Some(t) => sequence(&t)?.into_iter().map(descriptor).collect::<mlua::Result<Vec<_>>>()?,
        None => Vec::new(),
    };
    let contents = match contents {
        Some(t) => sequence(&t)?.into_iter().map(source).collect::<mlua::Result<Vec<_>>>()?,
        None => Vec::new(),
    };
    let archive = arcstream_core::update(source(src)?, &entries, contents).map_err(lua_error)?;
    Ok(Buffer::from_bytes(archive.into_inner()))
}

fn archive_delete(_: &Lua, (src, filter): (Value, Option<Value>)) -> mlua::Result<Buffer> {
    let archive = arcstream_core::delete(source(src)?, &names(filter)?).map_err(lua_error)?;
    Ok(Buffer::from_bytes(archive.into_inner()))
}

// ============================================================================
// Registration
// ============================================================================

pub fn register(lua: &Lua) -> Result<Table> {
    let archive_table = lua.create_table()?;

    for op in Operation::all() {
        archive_table.set(op.name(), op.function(lua)?)?;
    }

    Ok(archive_table)
}
