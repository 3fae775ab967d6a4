//! Lua runtime with the archive modules preloaded

use crate::error::{Error, Result};
use mlua::{Lua, MultiValue, StdLib, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A Lua state with `archive` and `buffer` registered
pub struct Runtime {
    lua: Lua,
    /// Relative script paths resolve against this directory
    base_path: PathBuf,
}

impl Runtime {
    pub fn new() -> Result<Self> {
        let lua = Lua::new();
        lua.load_std_libs(StdLib::ALL_SAFE)?;
        crate::register_all(&lua)?;

        let base_path = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

        debug!("arcstream Lua runtime initialized");

        Ok(Self { lua, base_path })
    }

    pub fn with_base_path<P: AsRef<Path>>(base_path: P) -> Result<Self> {
        let mut runtime = Self::new()?;
        runtime.base_path = base_path.as_ref().to_path_buf();
        Ok(runtime)
    }

    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    pub fn exec(&self, code: &str) -> Result<()> {
        self.lua.load(code).exec()?;
        Ok(())
    }

    /// Evaluate a chunk and format its results, tab separated
    pub fn eval(&self, code: &str) -> Result<String> {
        let result: MultiValue = self.lua.load(code).eval()?;

        let formatted = result
            .iter()
            .map(format_value)
            .collect::<Vec<_>>()
            .join("\t");

        Ok(formatted)
    }

    pub fn exec_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let absolute_path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_path.join(path)
        };

        info!("Executing file: {}", absolute_path.display());

        let code = std::fs::read_to_string(&absolute_path).map_err(|e| {
            Error::Runtime(format!(
                "Failed to read file '{}': {}",
                absolute_path.display(),
                e
            ))
        })?;

        self.lua
            .load(&code)
            .set_name(absolute_path.to_string_lossy())
            .exec()?;

        Ok(())
    }

    pub fn set_global<V: mlua::IntoLua>(&self, name: &str, value: V) -> Result<()> {
        self.lua.globals().set(name, value)?;
        Ok(())
    }

    pub fn get_global<V: mlua::FromLua>(&self, name: &str) -> Result<V> {
        let value = self.lua.globals().get(name)?;
        Ok(value)
    }
}

fn format_value(value: &Value) -> String {
    match value {
        Value::Nil => "nil".to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("\"{}\"", s.to_string_lossy()),
        Value::Table(_) => "table".to_string(),
        Value::UserData(_) => "userdata".to_string(),
        Value::Error(e) => format!("error: {}", e),
        other => other.type_name().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_creation() {
        let runtime = Runtime::new().unwrap();
        let has_archive: bool = runtime.lua().load("return type(archive) == 'table'").eval().unwrap();
        assert!(has_archive);
    }

    #[test]
    fn test_eval() {
        let runtime = Runtime::new().unwrap();
        assert_eq!(runtime.eval("return 1 + 1, 'x'").unwrap(), "2\t\"x\"");
    }

    #[test]
    fn test_exec_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("script.lua"), "answer = #archive.options(buffer.from('')).format").unwrap();

        let runtime = Runtime::with_base_path(dir.path()).unwrap();
        runtime.exec_file("script.lua").unwrap();
        let answer: i64 = runtime.get_global("answer").unwrap();
        assert_eq!(answer, "EMPTY".len() as i64);

        assert!(runtime.exec_file("missing.lua").is_err());
    }
}
