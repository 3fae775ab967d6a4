//! Error types for the Lua host

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Lua error: {0}")]
    Lua(#[from] mlua::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{}: {}", .0.code().qualified(), .0)]
    Archive(#[from] arcstream_core::Error),

    #[error("Runtime error: {0}")]
    Runtime(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Raise a core failure inside Lua, tagged with its qualified code.
pub(crate) fn lua_error(e: arcstream_core::Error) -> mlua::Error {
    mlua::Error::runtime(format!("{}: {}", e.code().qualified(), e))
}
