//! Direct/indirect block file I/O: translates a byte range
//! within a file into logical block indices and serves reads/writes
//! against the RAID block layer.

use crate::disk::DiskSet;
use crate::error::FsError;
use crate::inode::{IndirectBlock, Inode, INODE_DIRECT_POINTERS};
use crate::BLOCK_SIZE;

/// Returns the logical block number backing file-relative block index
/// `i`, if one has been allocated.
pub(crate) fn block_ref_at(disks: &DiskSet, inode: &Inode, i: usize) -> Result<Option<u32>, FsError> {
    if i < INODE_DIRECT_POINTERS {
        return Ok(inode.direct[i].get());
    }
    let indirect_index = i - INODE_DIRECT_POINTERS;
    if indirect_index >= crate::inode::IND_BLOCK_REFS {
        return Err(FsError::NoSpace);
    }
    match inode.indirect.get() {
        None => Ok(None),
        Some(indirect_block_num) => {
            let block = disks.read_block(indirect_block_num)?;
            let table = IndirectBlock::decode(block)?;
            Ok(table.0[indirect_index].get())
        }
    }
}

/// Same as [`block_ref_at`], but allocates the indirect block and/or the
/// data block on demand, writing the inode and indirect block back as
/// needed.
pub(crate) fn block_ref_at_mut(disks: &mut DiskSet, inode: &mut Inode, i: usize) -> Result<u32, FsError> {
    if i < INODE_DIRECT_POINTERS {
        if let Some(block) = inode.direct[i].get() {
            return Ok(block);
        }
        let block = disks.allocate_data_block()?;
        inode.direct[i] = crate::inode::BlockRef::some(block);
        return Ok(block);
    }

    let indirect_index = i - INODE_DIRECT_POINTERS;
    if indirect_index >= crate::inode::IND_BLOCK_REFS {
        return Err(FsError::NoSpace);
    }

    let indirect_block_num = match inode.indirect.get() {
        Some(n) => n,
        None => {
            let n = disks.allocate_data_block()?;
            inode.indirect = crate::inode::BlockRef::some(n);
            n
        }
    };

    let mut table = IndirectBlock::decode(disks.read_block(indirect_block_num)?)?;
    if let Some(block) = table.0[indirect_index].get() {
        return Ok(block);
    }
    let block = disks.allocate_data_block()?;
    table.0[indirect_index] = crate::inode::BlockRef::some(block);
    disks.write_block(indirect_block_num, &table.encode()?)?;
    Ok(block)
}

/// Reads `len` bytes starting at `offset` from `inode`'s data, treating
/// any region past the allocated blocks or past `inode.size` as zero.
pub fn read_file(disks: &DiskSet, inode: &Inode, offset: u64, len: usize) -> Result<Vec<u8>, FsError> {
    let mut out = vec![0u8; len];
    let file_size = inode.size;
    let mut filled = 0usize;
    while filled < len {
        let pos = offset + filled as u64;
        if pos >= file_size {
            break;
        }
        let i = (pos / BLOCK_SIZE as u64) as usize;
        let within = (pos % BLOCK_SIZE as u64) as usize;
        let chunk_len = (BLOCK_SIZE - within)
            .min(len - filled)
            .min((file_size - pos) as usize);

        if let Some(block_num) = block_ref_at(disks, inode, i)? {
            let block = disks.read_block(block_num)?;
            out[filled..filled + chunk_len].copy_from_slice(&block[within..within + chunk_len]);
        }
        filled += chunk_len;
    }
    Ok(out)
}

/// Writes `data` starting at `offset`, allocating blocks as needed and
/// growing `inode.size` to cover the write. The caller is
/// responsible for persisting `inode` afterward via
/// [`crate::disk::DiskSet::write_inode`].
pub fn write_file(disks: &mut DiskSet, inode: &mut Inode, offset: u64, data: &[u8]) -> Result<usize, FsError> {
    let mut written = 0;
    while written < data.len() {
        let pos = offset + written as u64;
        let i = (pos / BLOCK_SIZE as u64) as usize;
        let within = (pos % BLOCK_SIZE as u64) as usize;
        let block_num = block_ref_at_mut(disks, inode, i)?;

        let chunk_len = (BLOCK_SIZE - within).min(data.len() - written);
        let mut block = disks.read_block(block_num)?.to_vec();
        block[within..within + chunk_len].copy_from_slice(&data[written..written + chunk_len]);
        disks.write_block(block_num, &block)?;

        written += chunk_len;
    }
    inode.size = inode.size.max(offset + written as u64);
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::superblock::RaidMode;
    use crate::testutil::mounted_fixture;

    fn fresh_file(disks: &mut DiskSet) -> Inode {
        let n = disks.allocate_inode_slot().unwrap();
        Inode::new(n, libc::S_IFREG | 0o644, 0, 0, 0)
    }

    #[test]
    fn write_then_read_within_one_block() {
        let (_dir, mut disks) = mounted_fixture(RaidMode::Mirrored, 2, 32, 64);
        let mut inode = fresh_file(&mut disks);
        let payload = b"hello raidfs";
        write_file(&mut disks, &mut inode, 10, payload).unwrap();
        disks.write_inode(&inode).unwrap();

        assert_eq!(inode.size, 10 + payload.len() as u64);
        let got = read_file(&disks, &inode, 10, payload.len()).unwrap();
        assert_eq!(&got, payload);
    }

    #[test]
    fn write_spans_direct_and_indirect_blocks() {
        let (_dir, mut disks) = mounted_fixture(RaidMode::Mirrored, 2, 64, 256);
        let mut inode = fresh_file(&mut disks);

        let span = (INODE_DIRECT_POINTERS + 3) * BLOCK_SIZE;
        let payload: Vec<u8> = (0..span).map(|i| (i % 251) as u8).collect();
        write_file(&mut disks, &mut inode, 0, &payload).unwrap();
        disks.write_inode(&inode).unwrap();

        assert!(inode.indirect.get().is_some());
        let got = read_file(&disks, &inode, 0, span).unwrap();
        assert_eq!(got, payload);
    }

    #[test]
    fn unwritten_region_reads_as_zero() {
        let (_dir, mut disks) = mounted_fixture(RaidMode::Mirrored, 2, 32, 64);
        let mut inode = fresh_file(&mut disks);
        write_file(&mut disks, &mut inode, 0, &[0xFF; 4]).unwrap();
        disks.write_inode(&inode).unwrap();

        let got = read_file(&disks, &inode, 0, BLOCK_SIZE).unwrap();
        assert_eq!(&got[..4], &[0xFF; 4]);
        assert!(got[4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn read_spanning_several_blocks_matches_written_payload() {
        let (_dir, mut disks) = mounted_fixture(RaidMode::Mirrored, 2, 32, 64);
        let mut inode = fresh_file(&mut disks);
        let payload: Vec<u8> = (0..(5 * BLOCK_SIZE)).map(|i| (i % 251) as u8).collect();
        write_file(&mut disks, &mut inode, 0, &payload).unwrap();
        disks.write_inode(&inode).unwrap();

        let got = read_file(&disks, &inode, 0, payload.len()).unwrap();
        assert_eq!(got, payload);

        let mid = read_file(&disks, &inode, (BLOCK_SIZE / 2) as u64, 3 * BLOCK_SIZE).unwrap();
        assert_eq!(&mid, &payload[BLOCK_SIZE / 2..BLOCK_SIZE / 2 + 3 * BLOCK_SIZE]);
    }

    #[test]
    fn write_beyond_max_block_index_fails_with_no_space() {
        let (_dir, mut disks) = mounted_fixture(RaidMode::Mirrored, 2, 512, 512);
        let mut inode = fresh_file(&mut disks);
        let offset = inode.max_block_index() as u64 * BLOCK_SIZE as u64;
        let err = write_file(&mut disks, &mut inode, offset, &[1]).unwrap_err();
        assert!(matches!(err, FsError::NoSpace));
    }
}
