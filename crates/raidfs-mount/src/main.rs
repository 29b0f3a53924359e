//! `mount.raidfs` — mounts a set of formatted backing images through
//! FUSE. Argument parsing beyond the flags below is out of scope; the
//! dispatch loop itself is `fuser`'s own session loop, not reimplemented
//! here.

mod adapter;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use fuser::MountOption;
use log::{error, info};

use raidfs_core::{DiskSet, Filesystem as RaidFilesystem};

use adapter::RaidFsAdapter;

/// Mount a raidfs filesystem spanning one or more backing images.
///
/// Positional arguments are the backing-image paths followed by the
/// mount point; `clap` can't express "N positionals then one
/// more" directly, so they're all collected here and split by hand the
/// way the format tool's own CLI collects its trailing file list.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Backing image paths (at least two), followed by the mount point
    #[arg(required = true, trailing_var_arg = true, num_args = 3..)]
    args: Vec<PathBuf>,

    /// Stay attached to the controlling terminal instead of
    /// backgrounding after mount
    #[arg(short = 'f', long = "foreground")]
    foreground: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    let mut cli = Cli::parse();
    let mountpoint = cli.args.pop().expect("clap enforces at least 3 positionals");
    let disks = cli.args;

    if cli.foreground {
        info!("staying in the foreground");
    }

    let disk_set = match DiskSet::open(&disks) {
        Ok(disk_set) => disk_set,
        Err(e) => {
            error!("mount failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        "mounting {} images at {mountpoint:?}, raid_mode={:?}",
        disk_set.image_count(),
        disk_set.raid_mode()
    );

    let fs = RaidFilesystem::mount(disk_set);
    let adapter = RaidFsAdapter::new(fs);
    let options = [MountOption::FSName("raidfs".to_string()), MountOption::AutoUnmount];

    match fuser::mount2(adapter, &mountpoint, &options) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fuse session ended with an error: {e}");
            ExitCode::FAILURE
        }
    }
}
