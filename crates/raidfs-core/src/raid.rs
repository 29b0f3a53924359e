//! Block addressing / RAID layer: translates a logical
//! block number into a physical (image, offset) and, under
//! mirrored-verified mode, reconciles reads by majority vote.

use log::warn;

use crate::disk::DiskSet;
use crate::error::FsError;
use crate::superblock::RaidMode;
use crate::BLOCK_SIZE;

impl DiskSet {
    fn mirrored_block_offset(&self, l: u32) -> usize {
        self.layout.data_region_offset as usize + l as usize * BLOCK_SIZE
    }

    fn striped_block_offset(&self, l: u32) -> (usize, usize) {
        let (owner, local) = self.striped_owner(l);
        (
            owner,
            self.layout.data_region_offset as usize + local as usize * BLOCK_SIZE,
        )
    }

    /// Picks the winner under mirrored-verified read reconciliation:
    /// majority vote over byte-identical copies, lowest image index
    /// breaking ties.
    fn majority_vote(&self, offset: usize) -> usize {
        let n = self.images.len();
        let mut best = 0;
        let mut best_votes = 0;
        for i in 0..n {
            let block_i = &self.images[i].map[offset..offset + BLOCK_SIZE];
            let votes = (0..n)
                .filter(|&j| j != i && self.images[j].map[offset..offset + BLOCK_SIZE] == *block_i)
                .count();
            if votes > best_votes {
                best_votes = votes;
                best = i;
            }
        }
        best
    }

    /// Returns a view of logical block `L`'s bytes. Fails with
    /// [`FsError::NoEntry`] if the data bitmap says `L` is not
    /// allocated.
    pub fn read_block(&self, l: u32) -> Result<&[u8], FsError> {
        if !self.block_allocated(l) {
            return Err(FsError::NoEntry);
        }
        Ok(match self.raid_mode() {
            RaidMode::Striped => {
                let (owner, offset) = self.striped_block_offset(l);
                &self.images[owner].map[offset..offset + BLOCK_SIZE]
            }
            RaidMode::Mirrored => {
                let offset = self.mirrored_block_offset(l);
                &self.images[0].map[offset..offset + BLOCK_SIZE]
            }
            RaidMode::MirroredVerified => {
                let offset = self.mirrored_block_offset(l);
                let winner = self.majority_vote(offset);
                if winner != 0 {
                    warn!("mirrored-verified reconciled block {l} from image {winner}");
                }
                &self.images[winner].map[offset..offset + BLOCK_SIZE]
            }
        })
    }

    /// Writes a full block's worth of bytes. Striped mode writes only to
    /// the owning image; both mirrored modes write the same bytes to
    /// every image's data region.
    pub fn write_block(&mut self, l: u32, bytes: &[u8]) -> Result<(), FsError> {
        debug_assert_eq!(bytes.len(), BLOCK_SIZE);
        match self.raid_mode() {
            RaidMode::Striped => {
                let (owner, offset) = self.striped_block_offset(l);
                self.images[owner].map[offset..offset + BLOCK_SIZE].copy_from_slice(bytes);
            }
            RaidMode::Mirrored | RaidMode::MirroredVerified => {
                let offset = self.mirrored_block_offset(l);
                for image in &mut self.images {
                    image.map[offset..offset + BLOCK_SIZE].copy_from_slice(bytes);
                }
            }
        }
        Ok(())
    }
}
