//! Core engine for `raidfs`: a userspace filesystem striped or mirrored
//! across a fixed set of backing image files, mounted through FUSE.
//!
//! This crate owns everything below the FUSE dispatch boundary: the
//! on-disk layout, the RAID-aware block layer, the bitmap allocators,
//! path resolution and directory operations, and file I/O. `raidfs-mkfs`
//! and `raidfs-mount` are thin binaries built on top of it.

pub mod bitmap;
pub mod dentry;
pub mod dirops;
pub mod disk;
pub mod error;
pub mod fileio;
pub mod format;
pub mod fs;
pub mod inode;
pub mod layout;
pub mod raid;
pub mod superblock;

pub use dentry::DirEntry;
pub use error::FsError;
pub use disk::DiskSet;
pub use fs::{Attr, DirListEntry, Filesystem};
pub use inode::Inode;
pub use superblock::{RaidMode, SuperBlock};

/// Size of one block, in bytes. The unit of allocation in the data region
/// and the size of one inode-table slot.
pub const BLOCK_SIZE: usize = 512;

/// Maximum number of backing images a single filesystem may span.
pub const MAX_DISK: usize = 10;

/// Maximum length, in bytes, of a directory entry's name.
pub const MAX_NAME: usize = 28;

/// Maximum length, in bytes, of a backing image's path as stored in the
/// superblock's disk table.
pub const MAX_IMAGE_PATH: usize = 40;

/// Value stamped into every superblock to distinguish a formatted image
/// from an arbitrary file.
pub const MAGIC: u32 = 0x5241_4944; // "RAID"

pub(crate) fn round_up(n: u64, multiple: u64) -> u64 {
    if n == 0 {
        0
    } else {
        (n + multiple - 1) / multiple * multiple
    }
}


/// Property tests for the allocator and mirroring invariants: randomized
/// sequences of allocator and file-I/O calls checked against the
/// bitmap/mirroring invariants rather than a single example per behavior.
#[cfg(test)]
mod proptests {
    use proptest::prelude::*;

    use crate::fs::Filesystem;
    use crate::superblock::RaidMode;
    use crate::testutil::mounted_fixture;
    use crate::BLOCK_SIZE;

    proptest! {
        /// Free-inode followed by allocate-inode returns the same index
        /// (the lowest-free-bit property), for any inode freed out of an
        /// arbitrary batch of allocations.
        #[test]
        fn free_then_allocate_inode_is_lowest_free_bit(batch in 1usize..20, free_at in 0usize..20) {
            let (_dir, mut disks) = mounted_fixture(RaidMode::Mirrored, 2, 64, 32);
            let free_at = free_at % batch;
            let mut allocated = Vec::with_capacity(batch);
            for _ in 0..batch {
                allocated.push(disks.allocate_inode_slot().unwrap());
            }
            let freed = allocated[free_at];
            disks.free_inode_slot(freed);
            let reused = disks.allocate_inode_slot().unwrap();
            prop_assert_eq!(reused, freed);
        }

        /// Write(path, bytes, offset) followed by Read(path, len, offset)
        /// returns exactly those bytes, for arbitrary payloads and
        /// offsets that stay within the direct+indirect addressable
        /// range.
        #[test]
        fn write_read_round_trips(
            offset in 0u64..(4 * BLOCK_SIZE as u64),
            payload in proptest::collection::vec(any::<u8>(), 0..(3 * BLOCK_SIZE)),
        ) {
            let (_dir, mut disks) = mounted_fixture(RaidMode::Mirrored, 2, 32, 512);
            let mut fs = Filesystem::mount(disks);
            fs.mknod("/f", 0o644).unwrap();
            fs.write("/f", offset, &payload).unwrap();
            let got = fs.read("/f", offset, payload.len()).unwrap();
            prop_assert_eq!(got, payload);
            disks = fs.into_disks();
            let _ = &mut disks; // keep the image set alive for the test's duration
        }

        /// Every image pair stays byte-identical across the mirrored
        /// metadata regions after an arbitrary sequence of directory and
        /// file mutations.
        #[test]
        fn mirrored_metadata_stays_identical_after_mixed_ops(names in proptest::collection::vec("[a-z]{1,8}", 1..8)) {
            let (_dir, disks) = mounted_fixture(RaidMode::Mirrored, 3, 64, 64);
            let mut fs = Filesystem::mount(disks);
            for (i, name) in names.iter().enumerate() {
                let path = format!("/{name}");
                if i % 2 == 0 {
                    let _ = fs.mknod(&path, 0o644);
                } else {
                    let _ = fs.mkdir(&path, 0o755);
                }
            }

            let disks = fs.into_disks();
            let (start, end) = (
                disks.layout.inode_bitmap_offset as usize,
                disks.layout.metadata_end(disks.superblock.inode_count),
            );
            for image in &disks.images[1..] {
                prop_assert_eq!(&image.map[start..end], &disks.images[0].map[start..end]);
            }
        }
    }
}
