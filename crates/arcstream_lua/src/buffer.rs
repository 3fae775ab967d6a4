//! Buffer userdata: binary entry payloads and archive bytes on the Lua side.
//!
//! Lua strings can carry bytes too, but a Buffer keeps extracted payloads
//! distinct from text and can be handed back as an archive source.

use crate::error::Result;
use mlua::{Lua, MetaMethod, MultiValue, Table, UserData, UserDataMethods, Value};
use std::sync::Mutex;

pub(crate) struct Buffer {
    data: Mutex<Vec<u8>>,
}

impl Buffer {
    pub(crate) fn from_bytes(bytes: Vec<u8>) -> Self {
        Buffer {
            data: Mutex::new(bytes),
        }
    }

    /// Copy of the bytes, for use as an archive source or entry content
    pub(crate) fn get_data(&self) -> mlua::Result<Vec<u8>> {
        Ok(lock_data(self)?.clone())
    }
}

fn lock_data(buf: &Buffer) -> mlua::Result<std::sync::MutexGuard<'_, Vec<u8>>> {
    buf.data
        .lock()
        .map_err(|e| mlua::Error::runtime(format!("Buffer lock error: {}", e)))
}

/// Lua indices are 1-based and inclusive
fn byte_range(len: usize, start: Option<usize>, end: Option<usize>) -> mlua::Result<std::ops::Range<usize>> {
    let start = start.unwrap_or(1);
    let end = end.unwrap_or(len);
    if start < 1 || end > len || start > end + 1 {
        return Err(mlua::Error::runtime(format!(
            "Buffer range [{}, {}] out of bounds for length {}",
            start, end, len
        )));
    }
    Ok(start - 1..end)
}

impl UserData for Buffer {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("len", |_, this, _: ()| Ok(lock_data(this)?.len()));

        methods.add_method("get", |_, this, idx: usize| {
            let data = lock_data(this)?;
            let range = byte_range(data.len(), Some(idx), Some(idx))?;
            Ok(data[range.start] as i64)
        });

        methods.add_method("slice", |_, this, (start, end): (Option<usize>, Option<usize>)| {
            let data = lock_data(this)?;
            let range = byte_range(data.len(), start, end)?;
            Ok(Buffer::from_bytes(data[range].to_vec()))
        });

        methods.add_method("append", |_, this, bytes: mlua::String| {
            let mut data = lock_data(this)?;
            data.extend_from_slice(&bytes.as_bytes());
            Ok(data.len())
        });

        // raw bytes as a Lua string
        methods.add_method("toString", |lua, this, _: ()| {
            let data = lock_data(this)?;
            lua.create_string(&*data)
        });

        methods.add_meta_method(MetaMethod::ToString, |_, this, _: ()| {
            Ok(format!("Buffer({} bytes)", lock_data(this)?.len()))
        });

        methods.add_meta_method(MetaMethod::Len, |_, this, _: ()| Ok(lock_data(this)?.len()));

        methods.add_meta_method(MetaMethod::Eq, |_, this, other: mlua::AnyUserData| {
            let other = other.borrow::<Buffer>()?;
            if std::ptr::eq(this, &*other) {
                return Ok(true);
            }
            let equal = *lock_data(this)? == *lock_data(&other)?;
            Ok(equal)
        });
    }
}

fn buffer_from(_: &Lua, data: mlua::String) -> mlua::Result<Buffer> {
    Ok(Buffer::from_bytes(data.as_bytes().to_vec()))
}

fn buffer_concat(_: &Lua, args: MultiValue) -> mlua::Result<Buffer> {
    let mut combined = Vec::new();
    for arg in args {
        match arg {
            Value::UserData(ud) => {
                let buf = ud.borrow::<Buffer>()?;
                combined.extend_from_slice(&lock_data(&buf)?);
            }
            Value::String(s) => combined.extend_from_slice(&s.as_bytes()),
            _ => {
                return Err(mlua::Error::runtime(
                    "buffer.concat: arguments must be Buffers or strings",
                ))
            }
        }
    }
    Ok(Buffer::from_bytes(combined))
}

fn buffer_is_buffer(_: &Lua, value: Value) -> mlua::Result<bool> {
    match value {
        Value::UserData(ud) => Ok(ud.is::<Buffer>()),
        _ => Ok(false),
    }
}

pub fn register(lua: &Lua) -> Result<Table> {
    let buffer_table = lua.create_table()?;

    buffer_table.set("from", lua.create_function(buffer_from)?)?;
    buffer_table.set("concat", lua.create_function(buffer_concat)?)?;
    buffer_table.set("isBuffer", lua.create_function(buffer_is_buffer)?)?;

    Ok(buffer_table)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lua() -> Lua {
        let lua = Lua::new();
        lua.globals().set("buffer", register(&lua).unwrap()).unwrap();
        lua
    }

    #[test]
    fn test_buffer_basics() {
        let lua = lua();
        let ok: bool = lua
            .load(
                r#"
                local b = buffer.from("hello")
                assert(#b == 5 and b:len() == 5)
                assert(b:get(1) == string.byte("h"))
                assert(b:slice(2, 3):toString() == "el")
                b:append(" world")
                assert(b:toString() == "hello world")
                assert(buffer.concat(buffer.from("a"), "b"):toString() == "ab")
                assert(buffer.from("x") == buffer.from("x"))
                return buffer.isBuffer(b) and not buffer.isBuffer("b")
                "#,
            )
            .eval()
            .unwrap();
        assert!(ok);
    }

    #[test]
    fn test_out_of_range() {
        let lua = lua();
        assert!(lua.load("buffer.from('ab'):get(3)").exec().is_err());
        assert!(lua.load("buffer.from('ab'):slice(0, 1)").exec().is_err());
    }
}
