//! vmdiff - guest disk inspection and comparison
//!
//! Every subcommand maps to one engine call. Disk paths that are directories
//! are treated as extracted guest filesystems; files are raw disk images.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use vmdiff_engine::{write_listing, BlockRange, Content, ContentLimits, Engine, EngineConfig};
use vmdiff_guest::{HostProvider, RawImageConfig};

#[derive(Parser)]
#[command(name = "vmdiff")]
#[command(about = "Inspect and compare guest disk images", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Block size in bytes for diff and block (overrides VMDIFF_BLOCK_SIZE)
    #[arg(long, global = true)]
    block_size: Option<usize>,

    /// Directory for scratch downloads (overrides VMDIFF_SCRATCH_DIR)
    #[arg(long, global = true)]
    scratch_dir: Option<PathBuf>,

    /// Read raw images through file I/O instead of memory mapping
    #[arg(long, global = true)]
    no_mmap: bool,
}

#[derive(Subcommand)]
enum Command {
    /// List every file with size, permissions and modification time
    List {
        #[arg(long)]
        disk: PathBuf,

        /// Write the listing table to this file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,

        /// Print numbered JSON rows
        #[arg(long)]
        json: bool,
    },

    /// Ownership and size statistics
    Meta {
        #[arg(long)]
        disk: PathBuf,
    },

    /// Print a file's contents
    Cat {
        #[arg(long)]
        disk: PathBuf,

        /// Guest path
        path: String,

        /// Write raw bytes instead of UTF-8 text
        #[arg(long)]
        binary: bool,

        /// Keep at most this many bytes (-1 = all)
        #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
        read: i64,

        /// Stop before the first occurrence of this string
        #[arg(long, default_value = "")]
        stop: String,
    },

    /// Print a file's contents as hex or bits
    Format {
        #[arg(long)]
        disk: PathBuf,

        /// Guest path
        path: String,

        /// hex or bits
        #[arg(long, default_value = "hex")]
        format: String,

        /// Keep at most this many bytes (-1 = all)
        #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
        read: i64,

        /// Stop before the first occurrence of this string
        #[arg(long, default_value = "")]
        stop: String,
    },

    /// Check whether a guest path exists
    Exists {
        #[arg(long)]
        disk: PathBuf,

        path: String,
    },

    /// List one directory
    Ls {
        #[arg(long)]
        disk: PathBuf,

        #[arg(default_value = "/")]
        dir: String,

        /// Include metadata for every entry (JSON)
        #[arg(long)]
        detailed: bool,
    },

    /// List every path, or every path below a directory
    Names {
        #[arg(long)]
        disk: PathBuf,

        dir: Option<String>,
    },

    /// Compare two images block by block
    Diff {
        #[arg(long)]
        disk1: PathBuf,

        #[arg(long)]
        disk2: PathBuf,

        /// First block to compare
        #[arg(long, default_value_t = 0)]
        start: u64,

        /// Last block to compare (-1 = last block)
        #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
        end: i64,

        #[arg(long)]
        json: bool,
    },

    /// Print one raw block as hex or bits
    Block {
        #[arg(long)]
        disk: PathBuf,

        index: u64,

        #[arg(long, default_value = "hex")]
        format: String,
    },

    /// Print version and provider information
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays clean for content
    tracing_subscriber::fmt()
        .with_env_filter(cli.log_level.as_str())
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let mut config = EngineConfig::from_env();
    if let Some(block_size) = cli.block_size {
        config.block_size = block_size;
    }
    if let Some(dir) = cli.scratch_dir.clone() {
        config.scratch_dir = Some(dir);
    }

    let provider = HostProvider::new(RawImageConfig {
        use_mmap: !cli.no_mmap,
    });
    let engine = Engine::with_config(provider, config);
    tracing::debug!(
        "{} with block size {}",
        engine.provider_identity(),
        engine.config().block_size
    );

    run(&engine, cli.command)
}

fn run(engine: &Engine, command: Command) -> Result<()> {
    match command {
        Command::List { disk, out, json } => cmd_list(engine, &disk, out.as_deref(), json),
        Command::Meta { disk } => {
            let report = engine
                .disk_metadata(&disk)
                .with_context(|| format!("Failed to read metadata of {}", disk.display()))?;
            print_json(&report)
        }
        Command::Cat {
            disk,
            path,
            binary,
            read,
            stop,
        } => {
            let limits = ContentLimits::from_read(read, stop);
            let content = engine
                .file_contents(&disk, &path, binary, &limits)
                .with_context(|| format!("Failed to read {} from {}", path, disk.display()))?;

            let mut stdout = io::stdout().lock();
            match content {
                Content::Binary(bytes) => stdout.write_all(&bytes)?,
                Content::Text(text) => stdout.write_all(text.as_bytes())?,
            }
            stdout.flush()?;
            Ok(())
        }
        Command::Format {
            disk,
            path,
            format,
            read,
            stop,
        } => {
            let limits = ContentLimits::from_read(read, stop);
            let rendered = engine
                .file_contents_in_format(&disk, &path, &format, &limits)
                .with_context(|| format!("Failed to read {} from {}", path, disk.display()))?;
            println!("{}", rendered);
            Ok(())
        }
        Command::Exists { disk, path } => {
            let status = engine.check_file_exists(&disk, &path)?;
            print_json(&status)
        }
        Command::Ls {
            disk,
            dir,
            detailed,
        } => {
            let listing = engine
                .list_directory(&disk, &dir, detailed)
                .with_context(|| format!("Failed to list {} in {}", dir, disk.display()))?;
            if detailed {
                print_json(&listing)
            } else {
                for name in listing.names() {
                    println!("{}", name);
                }
                Ok(())
            }
        }
        Command::Names { disk, dir } => {
            let names = match dir {
                Some(dir) => engine.list_filenames_in_directory(&disk, &dir)?,
                None => engine.list_all_filenames(&disk)?,
            };
            for name in names {
                println!("{}", name);
            }
            Ok(())
        }
        Command::Diff {
            disk1,
            disk2,
            start,
            end,
            json,
        } => {
            let report = engine
                .diff_blocks(&disk1, &disk2, None, BlockRange::new(start, end))
                .with_context(|| {
                    format!("Failed to compare {} and {}", disk1.display(), disk2.display())
                })?;
            if json {
                return print_json(&report);
            }
            for label in report.labels() {
                println!("{}", label);
            }
            println!("total_differing_blocks: {}", report.total_differing_blocks);
            Ok(())
        }
        Command::Block {
            disk,
            index,
            format,
        } => {
            let rendered = engine.get_block_data(&disk, index, None, &format)?;
            println!("{}", rendered);
            Ok(())
        }
        Command::Version => {
            println!("vmdiff v{}", env!("CARGO_PKG_VERSION"));
            println!("Provider: {}", engine.provider_identity());
            println!("Block size: {}", engine.config().block_size);
            Ok(())
        }
    }
}

fn cmd_list(engine: &Engine, disk: &Path, out: Option<&Path>, json: bool) -> Result<()> {
    if let Some(out) = out {
        let written = engine
            .write_files_with_metadata(disk, out)
            .with_context(|| format!("Failed to write listing to {}", out.display()))?;
        eprintln!("Wrote {} rows to {}", written, out.display());
        return Ok(());
    }

    if json {
        let rows = engine.files_with_metadata_json(disk)?;
        return print_json(&rows);
    }

    let rows = engine.list_files(disk)?;
    let mut stdout = io::stdout().lock();
    write_listing(&rows, &mut stdout)?;
    stdout.flush()?;
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
