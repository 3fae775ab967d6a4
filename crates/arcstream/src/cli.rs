//! CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "arcstream")]
#[command(author, version, about = "Streaming archive creation, listing and extraction")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List the entries of an archive (`-` reads stdin)
    List {
        archive: String,

        /// Print one JSON record per line
        #[arg(long)]
        json: bool,
    },

    /// Extract entries, all of them unless names are given
    Extract {
        archive: String,

        /// Exact entry paths to extract
        names: Vec<String>,

        /// Print entries as text instead of writing files
        #[arg(long)]
        text: bool,

        /// Character set of the entries, with --text
        #[arg(long, default_value = arcstream_core::DEFAULT_ENCODING)]
        encoding: String,

        /// Directory to extract into
        #[arg(long, short = 'C', default_value = ".")]
        output_dir: PathBuf,
    },

    /// Create an archive from files
    Create {
        /// Archive to write
        output: PathBuf,

        /// Files to add, stored under the path as given
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// TAR, ZIP, CPIO or AR
        #[arg(long, short = 'f')]
        format: Option<String>,

        /// NONE, DEFLATE, GZIP, BZIP2, XZ or LZMA
        #[arg(long, short = 'a')]
        algorithm: Option<String>,

        /// Compression level, 0-9
        #[arg(long, short = 'l')]
        level: Option<u32>,
    },

    /// Show the detected format and compression of an archive
    Options { archive: String },

    /// Run a Lua script with the archive module loaded
    Run {
        /// The Lua file to execute
        file: String,

        /// Arguments to pass to the script
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
    },
}
