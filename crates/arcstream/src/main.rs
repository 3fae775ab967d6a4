//! arcstream CLI
//!
//! Lists, extracts and creates archives, and runs Lua scripts that use the
//! archive module.

mod cli;

use anyhow::{bail, Context, Result};
use arcstream_core::entry::EntryHeader;
use arcstream_core::transcode::{self, Charset};
use arcstream_core::walk::{materialize, EntryWalk, Payload};
use arcstream_core::{ArchiveOptions, ByteSource, EntryDescriptor, NameFilter, DEFAULT_ENCODING};
use clap::Parser;
use cli::{Cli, Commands};
use colored::Colorize;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(e) = dispatch(cli.command) {
        eprintln!("{}: {:#}", "error".red().bold(), e);
        std::process::exit(1);
    }
}

fn dispatch(command: Commands) -> Result<()> {
    match command {
        Commands::List { archive, json } => list(&archive, json),
        Commands::Extract {
            archive,
            names,
            text,
            encoding,
            output_dir,
        } => extract(&archive, names, text.then_some(encoding.as_str()), &output_dir),
        Commands::Create {
            output,
            files,
            format,
            algorithm,
            level,
        } => {
            let options = ArchiveOptions::parse(format.as_deref(), algorithm.as_deref(), level)?;
            create(&output, &files, &options)
        }
        Commands::Options { archive } => show_options(&archive),
        Commands::Run { file, args } => run_file(&file, args),
    }
}

/// `-` is stdin, read strictly forward; anything else is a seekable file.
fn open_source(archive: &str) -> Result<ByteSource<'static>> {
    if archive == "-" {
        return Ok(ByteSource::stream(std::io::stdin()));
    }
    let file = File::open(archive).with_context(|| format!("Failed to open '{}'", archive))?;
    Ok(ByteSource::seekable(file))
}

fn list(archive: &str, json: bool) -> Result<()> {
    let mut out = std::io::stdout().lock();
    for record in arcstream_core::entries(open_source(archive)?)? {
        let record = record?;
        if json {
            writeln!(out, "{}", serde_json::to_string(&record)?)?;
            continue;
        }
        let size = record.size.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string());
        let modified = record
            .last_modified
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        writeln!(out, "{:>12}  {}  {}", size, modified.dimmed(), record.path)?;
    }
    Ok(())
}

/// Entry path and payload, read in one pass
struct NamedPayload {
    /// Decode payloads into UTF-8 from this encoding when set
    text: Option<Charset>,
}

enum Extracted {
    Text(String),
    Bytes(Vec<u8>),
}

impl Payload for NamedPayload {
    type Output = (String, Extracted);

    fn produce(&mut self, header: &EntryHeader, data: &mut dyn Read) -> arcstream_core::Result<Self::Output> {
        let bytes = materialize(header, data)?;
        let payload = match self.text {
            Some(charset) => Extracted::Text(transcode::decode(bytes, charset)),
            None => Extracted::Bytes(bytes),
        };
        Ok((header.path.clone(), payload))
    }
}

/// Join an entry path onto `root`, refusing absolute paths and `..`.
fn target_path(root: &Path, entry: &str) -> Result<PathBuf> {
    let relative = Path::new(entry);
    let safe = relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !safe {
        bail!("refusing to extract '{}' outside the output directory", entry);
    }
    Ok(root.join(relative))
}

fn extract(archive: &str, names: Vec<String>, encoding: Option<&str>, output_dir: &Path) -> Result<()> {
    let text = encoding.map(transcode::lookup).transpose()?;
    let walk = EntryWalk::open(open_source(archive)?, NameFilter::from_names(names), NamedPayload { text })?;

    let mut out = std::io::stdout().lock();
    for item in walk {
        let (path, payload) = item?;
        match payload {
            Extracted::Text(text) => {
                writeln!(out, "{}", format!("==> {} <==", path).bold())?;
                writeln!(out, "{}", text)?;
            }
            Extracted::Bytes(bytes) => {
                if path.ends_with('/') {
                    continue;
                }
                let target = target_path(output_dir, &path)?;
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("Failed to create '{}'", parent.display()))?;
                }
                std::fs::write(&target, &bytes)
                    .with_context(|| format!("Failed to write '{}'", target.display()))?;
                debug!(path = %target.display(), size = bytes.len(), "extracted");
                writeln!(out, "{}", path)?;
            }
        }
    }
    Ok(())
}

/// Archive path for a file argument: forward slashes, no leading `./`
fn entry_name(file: &Path) -> String {
    file.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn descriptor(file: &Path) -> Result<EntryDescriptor> {
    let metadata = std::fs::metadata(file).with_context(|| format!("Failed to read '{}'", file.display()))?;
    if !metadata.is_file() {
        bail!("'{}' is not a regular file", file.display());
    }

    let mut entry = EntryDescriptor::new(entry_name(file));
    if let Ok(modified) = metadata.modified() {
        entry = entry.with_last_modified(chrono::DateTime::<chrono::Utc>::from(modified).timestamp());
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        entry = entry.with_mode(metadata.permissions().mode());
    }
    Ok(entry)
}

fn create(output: &Path, files: &[PathBuf], options: &ArchiveOptions) -> Result<()> {
    let entries = files.iter().map(|f| descriptor(f)).collect::<Result<Vec<_>>>()?;
    let contents = files
        .iter()
        .map(|f| Ok(ByteSource::seekable(File::open(f)?)))
        .collect::<Result<Vec<_>>>()?;

    let sink = File::create(output).with_context(|| format!("Failed to create '{}'", output.display()))?;
    arcstream_core::create_into(sink, &entries, contents, options)?;

    println!(
        "{} {} ({} {}, {} entries)",
        "created".green().bold(),
        output.display(),
        options.format,
        options.algorithm,
        entries.len()
    );
    Ok(())
}

fn show_options(archive: &str) -> Result<()> {
    let record = arcstream_core::options(open_source(archive)?)?;
    println!("format:    {}", record.format);
    println!("algorithm: {}", record.algorithm);
    Ok(())
}

fn run_file(file: &str, args: Vec<String>) -> Result<()> {
    let path = Path::new(file);
    let absolute_path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let base_path = absolute_path.parent().unwrap_or(Path::new("."));
    let runtime = arcstream_lua::Runtime::with_base_path(base_path)?;

    // arg[0] is the script as given, arg[1..] its arguments
    let lua = runtime.lua();
    let arg_table = lua.create_table()?;
    arg_table.set(0, file)?;
    for (i, arg) in args.iter().enumerate() {
        arg_table.set(i as i64 + 1, arg.as_str())?;
    }
    lua.globals().set("arg", arg_table)?;

    runtime.exec_file(&absolute_path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_name() {
        assert_eq!(entry_name(Path::new("./dir/file.txt")), "dir/file.txt");
        assert_eq!(entry_name(Path::new("file.txt")), "file.txt");
    }

    #[test]
    fn test_target_path_rejects_traversal() {
        let root = Path::new("/tmp/out");
        assert_eq!(target_path(root, "a/b.txt").unwrap(), root.join("a/b.txt"));
        assert!(target_path(root, "../evil").is_err());
        assert!(target_path(root, "/etc/passwd").is_err());
    }

    #[test]
    fn test_create_then_extract() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("hello.txt");
        std::fs::write(&input, "hello").unwrap();
        let archive = dir.path().join("out.tar.gz");

        let options = ArchiveOptions::parse(Some("tar"), Some("gzip"), None).unwrap();
        create(&archive, &[input.clone()], &options).unwrap();

        let out = dir.path().join("extracted");
        extract(archive.to_str().unwrap(), Vec::new(), None, &out).unwrap();
        let name = entry_name(&input);
        assert_eq!(std::fs::read_to_string(out.join(name)).unwrap(), "hello");
    }

    #[test]
    fn test_named_payload_text() {
        let archive = arcstream_core::create(
            &[EntryDescriptor::new("a.txt")],
            [ByteSource::from("hi")],
            &ArchiveOptions::default(),
        )
        .unwrap();
        let payload = NamedPayload {
            text: Some(transcode::lookup(DEFAULT_ENCODING).unwrap()),
        };
        let mut walk = EntryWalk::open(ByteSource::from(archive.into_inner()), NameFilter::all(), payload).unwrap();
        let (path, extracted) = walk.next_item().unwrap().unwrap();
        assert_eq!(path, "a.txt");
        assert!(matches!(extracted, Extracted::Text(t) if t == "hi"));
    }
}
