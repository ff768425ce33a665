//! cowdisk CLI
//!
//! Command-line tools for raw disk images and overlay files.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use cowdisk::config::DEFAULT_TABLE_SIZE;
use cowdisk::overlay::format;
use cowdisk::{BlockStore, ChildRef, DirectStore, OverlayStore, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// cowdisk CLI
#[derive(Parser, Debug)]
#[command(name = "cowdisk-cli")]
#[command(about = "Inspect and manage raw disk images and copy-on-write overlays")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a zero-filled raw image
    Create {
        /// Image file to create (truncated if it exists)
        image: PathBuf,

        /// Image size in bytes
        #[arg(short, long)]
        size: u64,
    },

    /// Show the contents of an overlay file
    Info {
        /// Overlay file
        overlay: PathBuf,
    },

    /// Write an overlay's sectors into its base image
    Commit {
        /// Overlay file
        overlay: PathBuf,

        /// Raw image the overlay was taken over
        base: PathBuf,
    },

    /// Hex dump bytes of an image, optionally through an overlay
    Read {
        /// Raw image
        base: PathBuf,

        /// Overlay file stacked on the image
        #[arg(short, long)]
        overlay: Option<PathBuf>,

        /// Absolute byte offset
        #[arg(long, default_value = "0")]
        offset: u64,

        /// Number of bytes to dump
        #[arg(long, default_value = "512")]
        len: usize,
    },
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,cowdisk=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if let Err(e) = run(args.command) {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Create { image, size } => {
            DirectStore::create("image", &image, size)?;
            println!("created {} ({} bytes)", image.display(), size);
        }

        Commands::Info { overlay } => {
            let mut reader = BufReader::new(File::open(&overlay)?);
            let (major, minor) = format::read_header(&mut reader)?;
            println!("file:        {}", overlay.display());
            println!("version:     {}.{}", major, minor);

            let mut reader = BufReader::new(File::open(&overlay)?);
            let table = format::decode(&mut reader)?;
            println!("sectors:     {}", table.len());
            println!("fingerprint: {:08x}", table.fingerprint());
            for index in table.indices_sorted() {
                match index.checked_mul(cowdisk::SECTOR_SIZE as u64) {
                    Some(offset) => println!("  sector {:>12}  offset {:#x}", index, offset),
                    None => println!("  sector {:>12}  offset overflows", index),
                }
            }
        }

        Commands::Commit { overlay, base } => {
            let mut image = DirectStore::open("base", &base, false)?;
            let committed = {
                let mut cow = OverlayStore::with_backing_file(
                    "overlay",
                    ChildRef::exclusive(&mut image),
                    DEFAULT_TABLE_SIZE,
                    &overlay,
                    true,
                );
                cow.open()?;
                cow.writeback()?
            };
            image.sync()?;
            println!("committed {} sectors into {}", committed, base.display());
        }

        Commands::Read { base, overlay, offset, len } => {
            let image = DirectStore::open("base", &base, true)?;
            let mut buf = vec![0u8; len];

            let read = match overlay {
                Some(path) => {
                    let mut cow = OverlayStore::with_backing_file(
                        "overlay",
                        ChildRef::shared(&image),
                        DEFAULT_TABLE_SIZE,
                        path,
                        true,
                    );
                    cow.open()?;
                    cow.read(&mut buf, offset)?
                }
                None => image.read(&mut buf, offset)?,
            };

            hex_dump(&buf[..read], offset);
        }
    }

    Ok(())
}

fn hex_dump(data: &[u8], base: u64) {
    for (row, chunk) in data.chunks(16).enumerate() {
        let hex: Vec<String> = chunk.iter().map(|b| format!("{:02x}", b)).collect();
        let ascii: String = chunk
            .iter()
            .map(|&b| if b.is_ascii_graphic() { b as char } else { '.' })
            .collect();
        println!("{:08x}  {:<47}  {}", base + (row * 16) as u64, hex.join(" "), ascii);
    }
}
