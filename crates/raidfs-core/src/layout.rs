//! Byte-offset arithmetic for the on-disk regions.

use crate::{round_up, BLOCK_SIZE};

/// Offsets and total size derived from an inode count, a data-block
/// count, and the wire size of the superblock. Identical on every
/// backing image of one filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub inode_bitmap_offset: u64,
    pub data_bitmap_offset: u64,
    pub inode_table_offset: u64,
    pub data_region_offset: u64,
    pub image_size: u64,
}

impl Layout {
    pub fn compute(inode_count: u32, block_count: u32, superblock_wire_size: u64) -> Self {
        let inode_bitmap_size = round_up(inode_count as u64, 8) / 8;
        let data_bitmap_size = round_up(block_count as u64, 8) / 8;

        let inode_bitmap_offset = superblock_wire_size;
        let data_bitmap_offset = inode_bitmap_offset + inode_bitmap_size;
        let inode_table_offset =
            round_up(data_bitmap_offset + data_bitmap_size, BLOCK_SIZE as u64);
        let data_region_offset = round_up(
            inode_table_offset + inode_count as u64 * BLOCK_SIZE as u64,
            BLOCK_SIZE as u64,
        );
        let image_size = round_up(
            data_region_offset + block_count as u64 * BLOCK_SIZE as u64,
            BLOCK_SIZE as u64,
        );

        Self {
            inode_bitmap_offset,
            data_bitmap_offset,
            inode_table_offset,
            data_region_offset,
            image_size,
        }
    }

    pub fn inode_bitmap_len(&self, inode_count: u32) -> usize {
        (round_up(inode_count as u64, 8) / 8) as usize
    }

    pub fn data_bitmap_len(&self, block_count: u32) -> usize {
        (round_up(block_count as u64, 8) / 8) as usize
    }

    /// End of the region the canonical metadata buffer covers: the
    /// superblock through the last inode-table block.
    pub fn metadata_end(&self, inode_count: u32) -> usize {
        self.inode_table_offset as usize + inode_count as usize * BLOCK_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_are_block_aligned_where_required() {
        let layout = Layout::compute(32, 32, 96);
        assert_eq!(layout.inode_bitmap_offset, 96);
        assert_eq!(layout.data_bitmap_offset, 96 + 4);
        assert_eq!(layout.inode_table_offset % BLOCK_SIZE as u64, 0);
        assert_eq!(layout.data_region_offset % BLOCK_SIZE as u64, 0);
        assert_eq!(layout.image_size % BLOCK_SIZE as u64, 0);
        assert!(layout.image_size >= layout.data_region_offset + 32 * BLOCK_SIZE as u64);
    }

    #[test]
    fn round_up_matches_zero_special_case() {
        assert_eq!(round_up(0, 32), 0);
        assert_eq!(round_up(1, 32), 32);
        assert_eq!(round_up(32, 32), 32);
        assert_eq!(round_up(33, 32), 64);
    }
}
