//! `mkfs.raidfs` — the format tool. One-shot: parse
//! flags, round counts, compute the layout, and write consistent
//! initial state across every backing image.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::error;

use raidfs_core::format::{format_images, FormatRequest};
use raidfs_core::RaidMode;

/// Format one or more backing images as a single raidfs filesystem.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// RAID mode: 0 (striped), 1 (mirrored), or 1v (mirrored-verified)
    #[arg(short = 'r', long = "raid-mode")]
    raid_mode: String,

    /// Backing image path; repeat for each disk (at least two required)
    #[arg(short = 'd', long = "disk", required = true)]
    disk: Vec<PathBuf>,

    /// Number of inodes (rounded up to a multiple of 32)
    #[arg(short = 'i', long = "inodes")]
    inodes: u32,

    /// Number of data blocks (rounded up to a multiple of 32)
    #[arg(short = 'b', long = "blocks")]
    blocks: u32,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let raid_mode = match RaidMode::parse(&cli.raid_mode) {
        Ok(mode) => mode,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let req = FormatRequest {
        raid_mode,
        disks: cli.disk,
        inode_count: cli.inodes,
        block_count: cli.blocks,
    };

    match format_images(&req) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("format failed: {e}");
            ExitCode::FAILURE
        }
    }
}
