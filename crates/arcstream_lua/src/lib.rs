//! arcstream Lua host
//!
//! Registers the `archive` and `buffer` modules in a Lua state and provides
//! a small runtime for running scripts against them.

pub mod archive;
pub mod buffer;
pub mod error;
pub mod runtime;

pub use error::{Error, Result};
pub use runtime::Runtime;

use mlua::Lua;

/// Register every module as a global in the Lua state
pub fn register_all(lua: &Lua) -> Result<()> {
    let globals = lua.globals();

    // buffer module (binary payloads)
    globals.set("buffer", buffer::register(lua)?)?;

    // archive module (create, entries, extract_text, extract_binary, options)
    globals.set("archive", archive::register(lua)?)?;

    Ok(())
}
