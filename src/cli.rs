use clap::{Parser, Subcommand};
use log::LevelFilter;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "nachos-fs", about = "Nachos file system on a disk image")]
pub struct Cli {
    /// Disk image
    #[arg(long, short, default_value = "DISK")]
    pub disk: PathBuf,

    /// Working directory inside the file system, entered before the command
    #[arg(long)]
    pub dir: Option<String>,

    /// Log level (off, error, warn, info, debug, trace); falls back to $LOG
    #[arg(long)]
    pub log: Option<LevelFilter>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Format the disk: empty root directory and bitmap
    Format,
    /// Copy a host file into the file system
    Cp { host: PathBuf, name: String },
    /// Print a file's contents
    Cat { name: String },
    /// List the working directory
    Ls,
    /// Remove a file or an empty directory
    Rm { name: String },
    Mkdir { name: String },
    Rmdir {
        name: String,
        /// Remove everything below the directory too
        #[arg(long, short)]
        recursive: bool,
    },
    /// Grow a file by DELTA bytes
    Extend {
        name: String,
        #[arg(allow_negative_numbers = true)]
        delta: isize,
    },
    /// Shrink a file by DELTA bytes
    Shrink {
        name: String,
        #[arg(allow_negative_numbers = true)]
        delta: isize,
    },
    /// Print one file's header, or the whole file system when no name is given
    Dump {
        name: Option<String>,
        #[arg(long)]
        content: bool,
    },
    /// Print size and sector usage of a file
    Stat { name: String },
}
