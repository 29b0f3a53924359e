//! The disk image set: opens and memory-maps every backing
//! image, verifies they were formatted together, and serves metadata
//! reads from a single canonical buffer.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use bincode::config::{Configuration, Fixint, LittleEndian};
use log::debug;
use memmap2::MmapMut;

use crate::bitmap;
use crate::error::FsError;
use crate::inode::Inode;
use crate::layout::Layout;
use crate::superblock::{RaidMode, SuperBlock};
use crate::BLOCK_SIZE;

/// The encoding used for every on-disk struct in this crate: fixed-width
/// integers, so a type's wire size never depends on the values it holds.
pub fn bincode_config() -> Configuration<LittleEndian, Fixint> {
    bincode::config::standard().with_fixed_int_encoding()
}

pub struct Image {
    pub path: PathBuf,
    pub file: File,
    pub map: MmapMut,
}

/// The mounted set of backing images plus the canonical metadata buffer.
/// Every mutating operation in `dirops`/`fileio`/`fs` goes through this
/// type.
pub struct DiskSet {
    pub images: Vec<Image>,
    pub superblock: SuperBlock,
    pub layout: Layout,
    /// Superblock through the end of the inode table, mirrored from
    /// image 0 at mount time. Authoritative for the superblock, inode
    /// bitmap, and inode table in every RAID mode; authoritative for the
    /// data bitmap only in the mirrored modes (see [`Self::block_allocated`]).
    metadata: Vec<u8>,
}

impl DiskSet {
    pub fn raid_mode(&self) -> RaidMode {
        self.superblock.raid_mode
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn open(paths: &[PathBuf]) -> Result<Self, FsError> {
        if paths.len() < 2 {
            return Err(FsError::TooFewImages);
        }

        let mut opened = Vec::with_capacity(paths.len());
        for path in paths {
            let file = OpenOptions::new().read(true).write(true).open(path)?;
            let map = unsafe { MmapMut::map_mut(&file)? };
            opened.push(Image {
                path: path.clone(),
                file,
                map,
            });
        }

        let wire_size = SuperBlock::wire_size();
        let mut slots: Vec<Option<Image>> = Vec::new();
        let mut run_id = None;
        let mut superblock = None;
        let mut layout = None;

        for image in opened {
            let (sb, _): (SuperBlock, usize) =
                bincode::serde::decode_from_slice(&image.map[..wire_size], bincode_config())?;
            if !sb.is_formatted() {
                return Err(FsError::MountMismatch);
            }

            match run_id {
                None => run_id = Some(sb.run_id),
                Some(r) if r == sb.run_id => {}
                Some(_) => return Err(FsError::MountMismatch),
            }

            let pos = sb.mount_position as usize;
            if pos >= paths.len() {
                return Err(FsError::MountMismatch);
            }
            if slots.len() <= pos {
                slots.resize_with(pos + 1, || None);
            }
            if slots[pos].is_some() {
                return Err(FsError::MountMismatch);
            }

            if layout.is_none() {
                layout = Some(Layout::compute(sb.inode_count, sb.block_count, wire_size as u64));
            }
            if superblock.is_none() {
                superblock = Some(sb);
            }

            slots[pos] = Some(image);
        }

        if slots.iter().any(Option::is_none) || slots.len() != paths.len() {
            return Err(FsError::MountMismatch);
        }

        let images: Vec<Image> = slots.into_iter().map(|s| s.unwrap()).collect();
        let superblock = superblock.expect("at least one image parsed");
        let layout = layout.expect("at least one image parsed");
        let metadata_end = layout.metadata_end(superblock.inode_count);

        for image in &images {
            if (image.map.len() as u64) < layout.image_size {
                return Err(FsError::ImageTooSmall {
                    needed: layout.image_size,
                    have: image.map.len() as u64,
                });
            }
        }

        let mut metadata = images[0].map[..metadata_end].to_vec();

        if superblock.raid_mode.is_mirrored_family() {
            let inode_bitmap_len = layout.inode_bitmap_len(superblock.inode_count);
            let data_bitmap_len = layout.data_bitmap_len(superblock.block_count);
            let ranges: [(usize, usize, &'static str); 3] = [
                (
                    layout.inode_bitmap_offset as usize,
                    layout.inode_bitmap_offset as usize + inode_bitmap_len,
                    "inode bitmap",
                ),
                (
                    layout.data_bitmap_offset as usize,
                    layout.data_bitmap_offset as usize + data_bitmap_len,
                    "data bitmap",
                ),
                (
                    layout.inode_table_offset as usize,
                    metadata_end,
                    "inode table",
                ),
            ];
            for image in &images[1..] {
                for &(start, end, label) in &ranges {
                    if image.map[start..end] != metadata[start..end] {
                        return Err(FsError::MirrorDivergence(label));
                    }
                }
            }
        } else {
            // Striped: each image's on-disk data bitmap only records bit L
            // for blocks it owns (L mod N == this image's index); rebuild
            // the canonical copy by aggregating every image's bits instead
            // of trusting image 0 alone.
            let data_start = layout.data_bitmap_offset as usize;
            let data_end = data_start + layout.data_bitmap_len(superblock.block_count);
            for byte in &mut metadata[data_start..data_end] {
                *byte = 0;
            }
            let n = images.len() as u32;
            for l in 0..superblock.block_count {
                let owner = (l % n) as usize;
                if bitmap::is_set(&images[owner].map[data_start..], l as usize) {
                    bitmap::set_bit(&mut metadata[data_start..data_end], l as usize);
                }
            }
        }

        debug!(
            "mounted {} images, raid_mode={:?}, inodes={}, blocks={}",
            images.len(),
            superblock.raid_mode,
            superblock.inode_count,
            superblock.block_count
        );

        Ok(Self {
            images,
            superblock,
            layout,
            metadata,
        })
    }

    // ---- canonical metadata buffer -------------------------------------

    fn broadcast_range(&mut self, start: usize, end: usize) {
        for image in &mut self.images {
            image.map[start..end].copy_from_slice(&self.metadata[start..end]);
        }
    }

    fn inode_bitmap_range(&self) -> (usize, usize) {
        let start = self.layout.inode_bitmap_offset as usize;
        let len = self.layout.inode_bitmap_len(self.superblock.inode_count);
        (start, start + len)
    }

    fn data_bitmap_range(&self) -> (usize, usize) {
        let start = self.layout.data_bitmap_offset as usize;
        let len = self.layout.data_bitmap_len(self.superblock.block_count);
        (start, start + len)
    }

    // ---- inode bitmap / inode table (always broadcast to every image) -

    pub fn inode_allocated(&self, n: u32) -> bool {
        let (start, _) = self.inode_bitmap_range();
        bitmap::is_set(&self.metadata[start..], n as usize)
    }

    pub fn allocate_inode_slot(&mut self) -> Result<u32, FsError> {
        let (start, end) = self.inode_bitmap_range();
        let n = bitmap::first_clear_bit(&self.metadata[start..end], self.superblock.inode_count as usize)
            .ok_or(FsError::NoSpace)?;
        bitmap::set_bit(&mut self.metadata[start..end], n);
        self.broadcast_range(start, end);
        Ok(n as u32)
    }

    pub fn free_inode_slot(&mut self, n: u32) {
        let (start, end) = self.inode_bitmap_range();
        bitmap::clear_bit(&mut self.metadata[start..end], n as usize);
        self.broadcast_range(start, end);
    }

    fn inode_table_slot(&self, n: u32) -> (usize, usize) {
        let start = self.layout.inode_table_offset as usize + n as usize * BLOCK_SIZE;
        (start, start + BLOCK_SIZE)
    }

    pub fn read_inode(&self, n: u32) -> Result<Inode, FsError> {
        if n >= self.superblock.inode_count || !self.inode_allocated(n) {
            return Err(FsError::NoEntry);
        }
        let (start, end) = self.inode_table_slot(n);
        let (inode, _): (Inode, usize) =
            bincode::serde::decode_from_slice(&self.metadata[start..end], bincode_config())?;
        Ok(inode)
    }

    pub fn write_inode(&mut self, inode: &Inode) -> Result<(), FsError> {
        let (start, end) = self.inode_table_slot(inode.number);
        let mut block = [0u8; BLOCK_SIZE];
        bincode::serde::encode_into_slice(inode, &mut block, bincode_config())?;
        self.metadata[start..end].copy_from_slice(&block);
        self.broadcast_range(start, end);
        Ok(())
    }

    // ---- data bitmap (per-mode authority) ------------------------------

    pub(crate) fn striped_owner(&self, l: u32) -> (usize, u64) {
        let n = self.images.len() as u32;
        ((l % n) as usize, (l / n) as u64)
    }

    pub fn block_allocated(&self, l: u32) -> bool {
        if l >= self.superblock.block_count {
            return false;
        }
        match self.raid_mode() {
            RaidMode::Striped => {
                let (owner, _) = self.striped_owner(l);
                let start = self.layout.data_bitmap_offset as usize;
                bitmap::is_set(&self.images[owner].map[start..], l as usize)
            }
            RaidMode::Mirrored | RaidMode::MirroredVerified => {
                let (start, _) = self.data_bitmap_range();
                bitmap::is_set(&self.metadata[start..], l as usize)
            }
        }
    }

    /// Allocates the first free data block. The canonical buffer's data
    /// bitmap section is always used to find it; the bit is then
    /// published to the image(s) that actually own block `L` for that
    /// RAID mode, which is also where subsequent existence checks read
    /// from. The two stay in sync because this type is the
    /// only writer of either copy.
    pub fn allocate_data_block(&mut self) -> Result<u32, FsError> {
        let (start, end) = self.data_bitmap_range();
        let l = bitmap::first_clear_bit(&self.metadata[start..end], self.superblock.block_count as usize)
            .ok_or(FsError::NoSpace)? as u32;
        bitmap::set_bit(&mut self.metadata[start..end], l as usize);

        match self.raid_mode() {
            RaidMode::Striped => {
                let (owner, _) = self.striped_owner(l);
                let image_start = self.layout.data_bitmap_offset as usize;
                bitmap::set_bit(&mut self.images[owner].map[image_start..], l as usize);
            }
            RaidMode::Mirrored | RaidMode::MirroredVerified => {
                self.broadcast_range(start, end);
            }
        }

        self.zero_block(l)?;
        Ok(l)
    }

    pub fn free_data_block(&mut self, l: u32) -> Result<(), FsError> {
        let (start, end) = self.data_bitmap_range();
        bitmap::clear_bit(&mut self.metadata[start..end], l as usize);

        match self.raid_mode() {
            RaidMode::Striped => {
                let (owner, _) = self.striped_owner(l);
                let image_start = self.layout.data_bitmap_offset as usize;
                bitmap::clear_bit(&mut self.images[owner].map[image_start..], l as usize);
            }
            RaidMode::Mirrored | RaidMode::MirroredVerified => {
                self.broadcast_range(start, end);
            }
        }

        self.zero_block(l)
    }

    pub(crate) fn zero_block(&mut self, l: u32) -> Result<(), FsError> {
        self.write_block(l, &[0u8; BLOCK_SIZE])
    }
}

pub(crate) fn image_path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use crate::superblock::RaidMode;
    use crate::testutil::mounted_fixture;

    #[test]
    fn format_then_mount_leaves_only_root_allocated() {
        let (_dir, disks) = mounted_fixture(RaidMode::Mirrored, 2, 32, 32);
        assert!(disks.inode_allocated(0));
        for n in 1..disks.superblock.inode_count {
            assert!(!disks.inode_allocated(n));
        }
        for l in 0..disks.superblock.block_count {
            assert!(!disks.block_allocated(l));
        }
    }

    #[test]
    fn mirrored_images_stay_byte_identical_after_allocation() {
        let (_dir, mut disks) = mounted_fixture(RaidMode::Mirrored, 3, 32, 32);
        let l = disks.allocate_data_block().unwrap();
        disks.write_block(l, &[0xAB; crate::BLOCK_SIZE]).unwrap();

        let (start, end) = (
            disks.layout.inode_bitmap_offset as usize,
            disks.layout.metadata_end(disks.superblock.inode_count),
        );
        for image in &disks.images[1..] {
            assert_eq!(image.map[start..end], disks.images[0].map[start..end]);
        }
    }

    #[test]
    fn striped_block_allocation_is_recorded_on_exactly_one_image() {
        let (_dir, mut disks) = mounted_fixture(RaidMode::Striped, 2, 32, 64);
        let l = disks.allocate_data_block().unwrap();
        let (owner, _) = disks.striped_owner(l);
        let other = 1 - owner;
        let start = disks.layout.data_bitmap_offset as usize;
        assert!(crate::bitmap::is_set(&disks.images[owner].map[start..], l as usize));
        assert!(!crate::bitmap::is_set(&disks.images[other].map[start..], l as usize));
    }

    #[test]
    fn striped_allocation_survives_remount() {
        let (dir, mut disks) = mounted_fixture(RaidMode::Striped, 3, 32, 64);
        let mut allocated = Vec::new();
        for _ in 0..10 {
            allocated.push(disks.allocate_data_block().unwrap());
        }
        let paths: Vec<_> = (0..3).map(|i| dir.path().join(format!("disk{i}.img"))).collect();
        drop(disks);

        let reopened = super::DiskSet::open(&paths).unwrap();
        for &l in &allocated {
            assert!(reopened.block_allocated(l));
        }
        for l in 0..reopened.superblock.block_count {
            if !allocated.contains(&l) {
                assert!(!reopened.block_allocated(l));
            }
        }
    }

    #[test]
    fn mirrored_verified_read_returns_majority_after_corruption() {
        let (_dir, mut disks) = mounted_fixture(RaidMode::MirroredVerified, 3, 32, 32);
        let l = disks.allocate_data_block().unwrap();
        disks.write_block(l, &[0xCD; crate::BLOCK_SIZE]).unwrap();

        let offset = disks.layout.data_region_offset as usize + l as usize * crate::BLOCK_SIZE;
        disks.images[0].map[offset..offset + crate::BLOCK_SIZE].fill(0x00);

        let block = disks.read_block(l).unwrap();
        assert_eq!(block, &[0xCDu8; crate::BLOCK_SIZE][..]);
    }

    #[test]
    fn free_inode_then_allocate_returns_same_index() {
        let (_dir, mut disks) = mounted_fixture(RaidMode::Mirrored, 2, 32, 32);
        let n = disks.allocate_inode_slot().unwrap();
        disks.free_inode_slot(n);
        let again = disks.allocate_inode_slot().unwrap();
        assert_eq!(n, again);
    }
}
