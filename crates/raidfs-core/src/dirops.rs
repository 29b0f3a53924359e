//! Path resolution and directory operations. A
//! directory's data is an unordered sequence of fixed-size
//! [`DirEntry`] slots spread across its allocated blocks; `.` and `..`
//! are synthesized at lookup/readdir time rather than stored.

use crate::dentry::DirEntry;
use crate::disk::DiskSet;
use crate::error::FsError;
use crate::fileio::{block_ref_at, block_ref_at_mut};
use crate::inode::Inode;
use crate::BLOCK_SIZE;

fn blocks_in_use(inode: &Inode) -> usize {
    (inode.size as usize + BLOCK_SIZE - 1) / BLOCK_SIZE
}

fn decode_block_entries(block: &[u8]) -> Result<Vec<DirEntry>, FsError> {
    let entry_size = DirEntry::wire_size();
    let mut entries = Vec::with_capacity(DirEntry::entries_per_block());
    for chunk in block.chunks(entry_size) {
        if chunk.len() < entry_size {
            break;
        }
        let (entry, _): (DirEntry, usize) =
            bincode::serde::decode_from_slice(chunk, crate::disk::bincode_config())?;
        entries.push(entry);
    }
    Ok(entries)
}

fn encode_entry_into_block(block: &mut [u8], slot: usize, entry: &DirEntry) -> Result<(), FsError> {
    let entry_size = DirEntry::wire_size();
    let start = slot * entry_size;
    bincode::serde::encode_into_slice(entry, &mut block[start..start + entry_size], crate::disk::bincode_config())?;
    Ok(())
}

/// Looks up `name` among `dir`'s entries, returning the matching
/// inode number if present.
pub fn find_entry(disks: &DiskSet, dir: &Inode, name: &str) -> Result<Option<u32>, FsError> {
    if !dir.is_dir() {
        return Err(FsError::NotADirectory);
    }
    for i in 0..blocks_in_use(dir) {
        let Some(block_num) = block_ref_at(disks, dir, i)? else {
            continue;
        };
        let block = disks.read_block(block_num)?;
        for entry in decode_block_entries(block)? {
            if !entry.is_free() && entry.name_str() == name {
                return Ok(Some(entry.inode_number));
            }
        }
    }
    Ok(None)
}

/// Resolves an absolute, `/`-separated path to an inode, starting from
/// the root inode (number 0). An empty path or `/` resolves to root.
pub fn resolve(disks: &DiskSet, path: &str) -> Result<Inode, FsError> {
    let mut current = disks.read_inode(0)?;
    for component in path.split('/').filter(|c| !c.is_empty()) {
        if !current.is_dir() {
            return Err(FsError::NotADirectory);
        }
        let child = find_entry(disks, &current, component)?.ok_or(FsError::NoEntry)?;
        current = disks.read_inode(child)?;
    }
    Ok(current)
}

/// Adds a `(child_ino, name)` entry to `dir`, reusing a free slot in an
/// already-allocated block before growing the directory by one block
/// ("two-pass insertion"). A directory only ever uses direct block
/// references, so growth past [`crate::inode::INODE_DIRECT_POINTERS`]
/// blocks fails with [`FsError::NoSpace`] rather than falling back to the
/// indirect block. Does not persist `dir` itself; callers write it back
/// via [`DiskSet::write_inode`].
pub fn alloc_entry(disks: &mut DiskSet, dir: &mut Inode, child_ino: u32, name: &str) -> Result<(), FsError> {
    if !dir.is_dir() {
        return Err(FsError::NotADirectory);
    }
    if find_entry(disks, dir, name)?.is_some() {
        return Err(FsError::Exists);
    }
    let entry = DirEntry::new(child_ino, name)?;

    for i in 0..blocks_in_use(dir) {
        let block_num = block_ref_at_mut(disks, dir, i)?;
        let mut block = disks.read_block(block_num)?.to_vec();
        let entries = decode_block_entries(&block)?;
        if let Some(slot) = entries.iter().position(DirEntry::is_free) {
            encode_entry_into_block(&mut block, slot, &entry)?;
            disks.write_block(block_num, &block)?;
            return Ok(());
        }
    }

    let i = blocks_in_use(dir);
    if i >= crate::inode::INODE_DIRECT_POINTERS {
        return Err(FsError::NoSpace);
    }
    let block_num = block_ref_at_mut(disks, dir, i)?;
    let mut block = disks.read_block(block_num)?.to_vec();
    encode_entry_into_block(&mut block, 0, &entry)?;
    disks.write_block(block_num, &block)?;
    dir.size += BLOCK_SIZE as u64;
    Ok(())
}

/// Removes the entry named `name` from `dir`, returning the inode
/// number it referred to. Does not persist `dir`.
pub fn clear_entry(disks: &mut DiskSet, dir: &mut Inode, name: &str) -> Result<u32, FsError> {
    if !dir.is_dir() {
        return Err(FsError::NotADirectory);
    }
    for i in 0..blocks_in_use(dir) {
        let Some(block_num) = block_ref_at(disks, dir, i)? else {
            continue;
        };
        let mut block = disks.read_block(block_num)?.to_vec();
        let entries = decode_block_entries(&block)?;
        if let Some(slot) = entries
            .iter()
            .position(|e| !e.is_free() && e.name_str() == name)
        {
            let removed = entries[slot].inode_number;
            encode_entry_into_block(&mut block, slot, &DirEntry::empty())?;
            disks.write_block(block_num, &block)?;
            return Ok(removed);
        }
    }
    Err(FsError::NoEntry)
}

/// Returns every live entry in `dir`, in on-disk order. `.` and `..`
/// are not included; callers synthesize those.
pub fn readdir_entries(disks: &DiskSet, dir: &Inode) -> Result<Vec<DirEntry>, FsError> {
    if !dir.is_dir() {
        return Err(FsError::NotADirectory);
    }
    let mut out = Vec::new();
    for i in 0..blocks_in_use(dir) {
        let Some(block_num) = block_ref_at(disks, dir, i)? else {
            continue;
        };
        let block = disks.read_block(block_num)?;
        out.extend(decode_block_entries(block)?.into_iter().filter(|e| !e.is_free()));
    }
    Ok(out)
}

/// `true` if `dir` has no entries besides the synthesized `.`/`..`.
pub fn is_empty_dir(disks: &DiskSet, dir: &Inode) -> Result<bool, FsError> {
    Ok(readdir_entries(disks, dir)?.is_empty())
}
