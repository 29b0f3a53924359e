use serde::{Deserialize, Serialize};

use crate::error::FsError;
use crate::{MAGIC, MAX_DISK, MAX_IMAGE_PATH};

/// The RAID mode chosen at format time.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RaidMode {
    Striped = 0,
    Mirrored = 1,
    MirroredVerified = 2,
}

impl RaidMode {
    /// Parses the `-r` flag's argument: `0`, `1`, or `1v`.
    pub fn parse(s: &str) -> Result<Self, FsError> {
        match s {
            "0" => Ok(Self::Striped),
            "1" => Ok(Self::Mirrored),
            "1v" => Ok(Self::MirroredVerified),
            other => Err(FsError::ModeUnrecognized(other.to_string())),
        }
    }

    pub fn is_mirrored_family(self) -> bool {
        matches!(self, Self::Mirrored | Self::MirroredVerified)
    }
}

/// Fixed-size header at offset 0 of every backing image.
///
/// Every field is fixed-width so its encoded size under
/// `bincode`'s fixed-integer config never depends on the values it holds
/// — that encoded size, not `size_of::<SuperBlock>()`, is what the
/// layout math in [`crate::layout`] calls "size_of(superblock)".
#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct SuperBlock {
    pub magic: u32,
    pub raid_mode: RaidMode,
    pub inode_count: u32,
    pub block_count: u32,
    pub inode_bitmap_offset: u64,
    pub data_bitmap_offset: u64,
    pub inode_table_offset: u64,
    pub data_region_offset: u64,
    pub image_count: u32,
    pub mount_position: u32,
    pub run_id: u64,
    pub disk_paths: [[u8; MAX_IMAGE_PATH]; MAX_DISK],
}

impl SuperBlock {
    pub fn zeroed() -> Self {
        Self {
            magic: 0,
            raid_mode: RaidMode::Striped,
            inode_count: 0,
            block_count: 0,
            inode_bitmap_offset: 0,
            data_bitmap_offset: 0,
            inode_table_offset: 0,
            data_region_offset: 0,
            image_count: 0,
            mount_position: 0,
            run_id: 0,
            disk_paths: [[0u8; MAX_IMAGE_PATH]; MAX_DISK],
        }
    }

    pub fn is_formatted(&self) -> bool {
        self.magic == MAGIC
    }

    pub fn set_disk_path(&mut self, index: usize, path: &str) -> Result<(), FsError> {
        if path.len() >= MAX_IMAGE_PATH {
            return Err(FsError::NameTooLong(MAX_IMAGE_PATH - 1));
        }
        let mut buf = [0u8; MAX_IMAGE_PATH];
        buf[..path.len()].copy_from_slice(path.as_bytes());
        self.disk_paths[index] = buf;
        Ok(())
    }

    pub fn disk_path(&self, index: usize) -> &str {
        let bytes = &self.disk_paths[index];
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        std::str::from_utf8(&bytes[..end]).unwrap_or("")
    }

    /// The exact number of bytes `bincode` writes for a `SuperBlock`
    /// under the fixed-integer config used throughout this crate. Every
    /// field is fixed-width, so this is independent of the instance's
    /// values and safe to call once and reuse.
    pub fn wire_size() -> usize {
        let probe = Self::zeroed();
        let mut buf = [0u8; 4096];
        bincode::serde::encode_into_slice(&probe, &mut buf, crate::disk::bincode_config())
            .expect("superblock must fit the probe buffer")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_size_is_stable_across_instances() {
        let a = SuperBlock::zeroed();
        let mut b = SuperBlock::zeroed();
        b.inode_count = 12345;
        b.run_id = u64::MAX;
        b.set_disk_path(0, "a very different disk path").unwrap();

        let mut buf_a = [0u8; 4096];
        let mut buf_b = [0u8; 4096];
        let len_a =
            bincode::serde::encode_into_slice(&a, &mut buf_a, crate::disk::bincode_config())
                .unwrap();
        let len_b =
            bincode::serde::encode_into_slice(&b, &mut buf_b, crate::disk::bincode_config())
                .unwrap();
        assert_eq!(len_a, len_b);
        assert_eq!(len_a, SuperBlock::wire_size());
    }

    #[test]
    fn raid_mode_parses_known_flags_only() {
        assert_eq!(RaidMode::parse("0").unwrap(), RaidMode::Striped);
        assert_eq!(RaidMode::parse("1").unwrap(), RaidMode::Mirrored);
        assert_eq!(RaidMode::parse("1v").unwrap(), RaidMode::MirroredVerified);
        assert!(RaidMode::parse("2").is_err());
    }
}
