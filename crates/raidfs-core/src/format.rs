//! The format tool's state machine: a one-shot pass that
//! computes the layout and writes consistent initial state across every
//! backing image.

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use log::info;

use crate::disk::{bincode_config, image_path_str};
use crate::error::FsError;
use crate::inode::Inode;
use crate::layout::Layout;
use crate::superblock::{RaidMode, SuperBlock};
use crate::{round_up, BLOCK_SIZE, MAGIC, MAX_DISK};

pub struct FormatRequest {
    pub raid_mode: RaidMode,
    pub disks: Vec<PathBuf>,
    pub inode_count: u32,
    pub block_count: u32,
}

/// Formats every image in `req.disks` identically: computes the shared
/// layout, then for each image writes the superblock (stamped with that
/// image's mount position and the run's shared id), zeroed bitmaps with
/// inode 0 marked allocated, and the root directory inode.
pub fn format_images(req: &FormatRequest) -> Result<(), FsError> {
    if req.disks.len() < 2 {
        return Err(FsError::TooFewImages);
    }
    if req.disks.len() > MAX_DISK {
        return Err(FsError::TooManyImages(MAX_DISK));
    }
    if req.inode_count == 0 || req.block_count == 0 {
        return Err(FsError::NoSpace);
    }
    for disk in &req.disks {
        if image_path_str(disk).len() >= crate::MAX_IMAGE_PATH {
            return Err(FsError::NameTooLong(crate::MAX_IMAGE_PATH - 1));
        }
    }

    let inode_count = round_up(req.inode_count as u64, 32) as u32;
    let block_count = round_up(req.block_count as u64, 32) as u32;
    let wire_size = SuperBlock::wire_size() as u64;
    let layout = Layout::compute(inode_count, block_count, wire_size);

    let run_id = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    info!(
        "formatting {} images: raid_mode={:?} inodes={} blocks={} image_size={}",
        req.disks.len(),
        req.raid_mode,
        inode_count,
        block_count,
        layout.image_size
    );

    let mut superblock = SuperBlock::zeroed();
    superblock.magic = MAGIC;
    superblock.raid_mode = req.raid_mode;
    superblock.inode_count = inode_count;
    superblock.block_count = block_count;
    superblock.inode_bitmap_offset = layout.inode_bitmap_offset;
    superblock.data_bitmap_offset = layout.data_bitmap_offset;
    superblock.inode_table_offset = layout.inode_table_offset;
    superblock.data_region_offset = layout.data_region_offset;
    superblock.image_count = req.disks.len() as u32;
    superblock.run_id = run_id;
    for (i, disk) in req.disks.iter().enumerate() {
        superblock.set_disk_path(i, &image_path_str(disk))?;
    }

    let now = run_id as i64;
    let mut root = Inode::new(0, libc::S_IFDIR | 0o755, unsafe { libc::getuid() }, unsafe {
        libc::getgid()
    }, now);
    root.nlink = 2;

    for (position, disk) in req.disks.iter().enumerate() {
        let mut file = OpenOptions::new().read(true).write(true).open(disk)?;
        let len = file.metadata()?.len();
        if len < layout.image_size {
            return Err(FsError::ImageTooSmall {
                needed: layout.image_size,
                have: len,
            });
        }

        superblock.mount_position = position as u32;

        let mut sb_buf = vec![0u8; wire_size as usize];
        bincode::serde::encode_into_slice(&superblock, &mut sb_buf, bincode_config())?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&sb_buf)?;

        let inode_bitmap_len = layout.inode_bitmap_len(inode_count);
        let mut inode_bitmap = vec![0u8; inode_bitmap_len];
        inode_bitmap[0] = 1; // root inode allocated
        file.seek(SeekFrom::Start(layout.inode_bitmap_offset))?;
        file.write_all(&inode_bitmap)?;

        let data_bitmap_len = layout.data_bitmap_len(block_count);
        let data_bitmap = vec![0u8; data_bitmap_len];
        file.seek(SeekFrom::Start(layout.data_bitmap_offset))?;
        file.write_all(&data_bitmap)?;

        let mut root_block = [0u8; BLOCK_SIZE];
        bincode::serde::encode_into_slice(&root, &mut root_block, bincode_config())?;
        file.seek(SeekFrom::Start(layout.inode_table_offset))?;
        file.write_all(&root_block)?;

        file.flush()?;
    }

    Ok(())
}
