use serde::{Deserialize, Serialize};

use crate::error::FsError;
use crate::{BLOCK_SIZE, MAX_NAME};

/// Fixed-width directory entry record. `inode_number == 0`
/// means the slot is free.
#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct DirEntry {
    pub inode_number: u32,
    pub name: [u8; MAX_NAME],
}

impl DirEntry {
    pub fn empty() -> Self {
        Self {
            inode_number: 0,
            name: [0u8; MAX_NAME],
        }
    }

    pub fn new(inode_number: u32, name: &str) -> Result<Self, FsError> {
        if name.len() >= MAX_NAME {
            return Err(FsError::NameTooLong(MAX_NAME - 1));
        }
        let mut buf = [0u8; MAX_NAME];
        buf[..name.len()].copy_from_slice(name.as_bytes());
        Ok(Self {
            inode_number,
            name: buf,
        })
    }

    pub fn is_free(&self) -> bool {
        self.inode_number == 0
    }

    pub fn name_str(&self) -> &str {
        let end = self
            .name
            .iter()
            .position(|&c| c == 0)
            .unwrap_or(MAX_NAME);
        std::str::from_utf8(&self.name[..end]).unwrap_or("<invalid>")
    }

    pub fn wire_size() -> usize {
        let probe = Self::empty();
        let mut buf = [0u8; BLOCK_SIZE];
        bincode::serde::encode_into_slice(&probe, &mut buf, crate::disk::bincode_config())
            .expect("dir entry must fit one block")
    }

    pub fn entries_per_block() -> usize {
        BLOCK_SIZE / Self::wire_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_round_trips() {
        let entry = DirEntry::new(7, "notes.txt").unwrap();
        assert_eq!(entry.name_str(), "notes.txt");
        assert!(!entry.is_free());
    }

    #[test]
    fn overlong_name_is_rejected() {
        let long = "x".repeat(MAX_NAME);
        assert!(DirEntry::new(1, &long).is_err());
    }

    #[test]
    fn several_entries_fit_in_one_block() {
        assert!(DirEntry::entries_per_block() >= 8);
    }
}
