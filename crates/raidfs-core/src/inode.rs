use serde::{Deserialize, Serialize};

use crate::disk::bincode_config;
use crate::error::FsError;
use crate::BLOCK_SIZE;

/// Direct block references stored inline in the inode.
pub const INODE_DIRECT_POINTERS: usize = 6;

/// Block references held by one single-indirect block.
pub const IND_BLOCK_REFS: usize = BLOCK_SIZE / std::mem::size_of::<i32>();

/// A block reference as stored on disk: a block number, or the sentinel
/// "no reference".
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct BlockRef(i32);

impl BlockRef {
    pub const NONE: BlockRef = BlockRef(-1);

    pub fn some(block: u32) -> Self {
        BlockRef(block as i32)
    }

    pub fn get(self) -> Option<u32> {
        if self.0 < 0 {
            None
        } else {
            Some(self.0 as u32)
        }
    }

    pub fn is_none(self) -> bool {
        self.0 < 0
    }
}

/// Typed view of one inode-table slot.
#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct Inode {
    pub number: u32,
    /// POSIX mode, file-type bits included (`libc::S_IFDIR`/`S_IFREG` or'd
    /// with permission bits).
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub nlink: u32,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
    pub direct: [BlockRef; INODE_DIRECT_POINTERS],
    pub indirect: BlockRef,
}

impl Inode {
    pub fn new(number: u32, mode: u32, uid: u32, gid: u32, now: i64) -> Self {
        Self {
            number,
            mode,
            uid,
            gid,
            size: 0,
            nlink: 0,
            atime: now,
            mtime: now,
            ctime: now,
            direct: [BlockRef::NONE; INODE_DIRECT_POINTERS],
            indirect: BlockRef::NONE,
        }
    }

    pub fn zeroed(number: u32) -> Self {
        Self {
            number,
            mode: 0,
            uid: 0,
            gid: 0,
            size: 0,
            nlink: 0,
            atime: 0,
            mtime: 0,
            ctime: 0,
            direct: [BlockRef::NONE; INODE_DIRECT_POINTERS],
            indirect: BlockRef::NONE,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.mode as libc::mode_t & libc::S_IFMT == libc::S_IFDIR
    }

    pub fn is_regular(&self) -> bool {
        self.mode as libc::mode_t & libc::S_IFMT == libc::S_IFREG
    }

    /// Maximum logical block index this inode can address: direct slots
    /// plus every slot of the indirect block.
    pub fn max_block_index(&self) -> usize {
        INODE_DIRECT_POINTERS + IND_BLOCK_REFS
    }

    /// The wire size of one encoded `Inode`, analogous to
    /// [`crate::superblock::SuperBlock::wire_size`].
    pub fn wire_size() -> usize {
        let probe = Self::zeroed(0);
        let mut buf = [0u8; BLOCK_SIZE];
        bincode::serde::encode_into_slice(&probe, &mut buf, crate::disk::bincode_config())
            .expect("inode must fit one block")
    }
}

/// The array of block references held by one single-indirect block.
/// Encoded and decoded a whole block at a time.
#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct IndirectBlock(pub [BlockRef; IND_BLOCK_REFS]);

impl IndirectBlock {
    pub fn empty() -> Self {
        Self([BlockRef::NONE; IND_BLOCK_REFS])
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, FsError> {
        let (block, _): (Self, usize) = bincode::serde::decode_from_slice(bytes, bincode_config())?;
        Ok(block)
    }

    pub fn encode(&self) -> Result<[u8; BLOCK_SIZE], FsError> {
        let mut buf = [0u8; BLOCK_SIZE];
        bincode::serde::encode_into_slice(self, &mut buf, bincode_config())?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_round_trips() {
        assert!(BlockRef::NONE.is_none());
        assert_eq!(BlockRef::NONE.get(), None);
        assert_eq!(BlockRef::some(0).get(), Some(0));
        assert_eq!(BlockRef::some(41).get(), Some(41));
    }

    #[test]
    fn inode_fits_one_block() {
        assert!(Inode::wire_size() <= BLOCK_SIZE);
    }

    #[test]
    fn new_inode_has_all_sentinel_references() {
        let inode = Inode::new(3, libc::S_IFREG | 0o644, 1000, 1000, 12345);
        assert!(inode.direct.iter().all(|r| r.is_none()));
        assert!(inode.indirect.is_none());
        assert!(inode.is_regular());
    }
}
