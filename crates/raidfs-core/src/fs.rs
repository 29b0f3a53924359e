//! The operation surface: getattr, mknod, mkdir, unlink,
//! rmdir, read, write, readdir, each composing the layers below into
//! what the FUSE adapter in `raidfs-mount` calls per-request.
//!
//! [`Filesystem`] is the single mount context: the disk set plus nothing
//! else, threaded into every operation rather than kept in process-wide
//! statics.

use std::time::{SystemTime, UNIX_EPOCH};

use log::debug;

use crate::dirops;
use crate::disk::DiskSet;
use crate::error::FsError;
use crate::fileio;
use crate::inode::Inode;

/// One entry yielded by [`Filesystem::readdir`]: a name and the inode
/// number it binds to. `.` and `..` are synthesized here, not stored.
/// `is_dir` lets a FUSE adapter report the right `FileType` without a
/// second round-trip through `getattr`.
#[derive(Debug, Clone)]
pub struct DirListEntry {
    pub name: String,
    pub inode: u32,
    pub is_dir: bool,
}

/// Attribute snapshot returned by [`Filesystem::getattr`].
#[derive(Debug, Clone, Copy)]
pub struct Attr {
    pub inode: u32,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub nlink: u32,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
}

impl From<&Inode> for Attr {
    fn from(inode: &Inode) -> Self {
        Self {
            inode: inode.number,
            mode: inode.mode,
            uid: inode.uid,
            gid: inode.gid,
            size: inode.size,
            nlink: inode.nlink,
            atime: inode.atime,
            mtime: inode.mtime,
            ctime: inode.ctime,
        }
    }
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

fn split_parent(path: &str) -> Result<(&str, &str), FsError> {
    let trimmed = path.trim_end_matches('/');
    let trimmed = if trimmed.is_empty() { path } else { trimmed };
    match trimmed.rfind('/') {
        Some(idx) => {
            let name = &trimmed[idx + 1..];
            if name.is_empty() {
                return Err(FsError::Exists); // "/" itself: mknod/mkdir target already present
            }
            let parent = if idx == 0 { "/" } else { &trimmed[..idx] };
            Ok((parent, name))
        }
        None => Ok(("/", trimmed)),
    }
}

/// The mounted filesystem: a thin composition layer over [`DiskSet`],
/// [`dirops`], and [`fileio`]. Holds no state of its own beyond the disk
/// set, so a new request never needs more than a `&mut Filesystem`.
pub struct Filesystem {
    disks: DiskSet,
}

impl Filesystem {
    pub fn mount(disks: DiskSet) -> Self {
        Self { disks }
    }

    pub fn disks(&self) -> &DiskSet {
        &self.disks
    }

    pub fn into_disks(self) -> DiskSet {
        self.disks
    }

    pub fn getattr(&self, path: &str) -> Result<Attr, FsError> {
        let inode = dirops::resolve(&self.disks, path)?;
        Ok(Attr::from(&inode))
    }

    fn create_node(&mut self, path: &str, mode: u32, is_dir: bool) -> Result<Attr, FsError> {
        let (parent_path, name) = split_parent(path)?;
        let mut parent = dirops::resolve(&self.disks, parent_path)?;
        if !parent.is_dir() {
            return Err(FsError::NotADirectory);
        }
        if dirops::find_entry(&self.disks, &parent, name)?.is_some() {
            return Err(FsError::Exists);
        }

        let n = self.disks.allocate_inode_slot()?;
        let uid = unsafe { libc::getuid() };
        let gid = unsafe { libc::getgid() };
        let mut child = Inode::new(n, mode, uid, gid, now());
        child.nlink = if is_dir { 2 } else { 1 };

        dirops::alloc_entry(&mut self.disks, &mut parent, n, name)?;
        if is_dir {
            parent.nlink += 1;
        }

        self.disks.write_inode(&child)?;
        self.disks.write_inode(&parent)?;
        debug!("created inode {n} ({name:?}) under {parent_path:?}");
        Ok(Attr::from(&child))
    }

    pub fn mknod(&mut self, path: &str, mode: u32) -> Result<Attr, FsError> {
        self.create_node(path, (mode as libc::mode_t & !libc::S_IFMT) | libc::S_IFREG, false)
    }

    pub fn mkdir(&mut self, path: &str, mode: u32) -> Result<Attr, FsError> {
        self.create_node(path, (mode as libc::mode_t & !libc::S_IFMT) | libc::S_IFDIR, true)
    }

    pub fn unlink(&mut self, path: &str) -> Result<(), FsError> {
        let (parent_path, name) = split_parent(path)?;
        let mut parent = dirops::resolve(&self.disks, parent_path)?;
        let target_ino = dirops::find_entry(&self.disks, &parent, name)?.ok_or(FsError::NoEntry)?;
        let mut target = self.disks.read_inode(target_ino)?;
        if !target.is_regular() {
            return Err(FsError::NotADirectory);
        }

        dirops::clear_entry(&mut self.disks, &mut parent, name)?;
        self.disks.write_inode(&parent)?;

        target.nlink = target.nlink.saturating_sub(1);
        if target.nlink == 0 {
            self.free_inode(&target)?;
        } else {
            self.disks.write_inode(&target)?;
        }
        debug!("unlinked {path:?} (inode {target_ino})");
        Ok(())
    }

    pub fn rmdir(&mut self, path: &str) -> Result<(), FsError> {
        let (parent_path, name) = split_parent(path)?;
        let resolved = dirops::resolve(&self.disks, path)?;
        if resolved.number == 0 {
            return Err(FsError::PermissionDenied);
        }
        if !resolved.is_dir() {
            return Err(FsError::NotADirectory);
        }
        if !dirops::is_empty_dir(&self.disks, &resolved)? {
            return Err(FsError::NotEmpty);
        }

        let mut parent = dirops::resolve(&self.disks, parent_path)?;
        dirops::clear_entry(&mut self.disks, &mut parent, name)?;
        parent.nlink = parent.nlink.saturating_sub(1);
        self.disks.write_inode(&parent)?;

        self.free_inode(&resolved)?;
        debug!("removed directory {path:?} (inode {})", resolved.number);
        Ok(())
    }

    pub fn read(&self, path: &str, offset: u64, size: usize) -> Result<Vec<u8>, FsError> {
        let inode = dirops::resolve(&self.disks, path)?;
        fileio::read_file(&self.disks, &inode, offset, size)
    }

    pub fn write(&mut self, path: &str, offset: u64, data: &[u8]) -> Result<usize, FsError> {
        let mut inode = dirops::resolve(&self.disks, path)?;
        if !inode.is_regular() {
            return Err(FsError::NotADirectory);
        }
        let written = fileio::write_file(&mut self.disks, &mut inode, offset, data)?;
        inode.mtime = now();
        self.disks.write_inode(&inode)?;
        Ok(written)
    }

    pub fn readdir(&self, path: &str) -> Result<Vec<DirListEntry>, FsError> {
        let dir = dirops::resolve(&self.disks, path)?;
        if !dir.is_dir() {
            return Err(FsError::NotADirectory);
        }
        let parent_ino = if path == "/" || path.is_empty() {
            0
        } else {
            let (parent_path, _) = split_parent(path)?;
            dirops::resolve(&self.disks, parent_path)?.number
        };

        let parent_is_dir = if parent_ino == dir.number {
            true
        } else {
            self.disks.read_inode(parent_ino)?.is_dir()
        };
        let mut out = vec![
            DirListEntry { name: ".".to_string(), inode: dir.number, is_dir: true },
            DirListEntry { name: "..".to_string(), inode: parent_ino, is_dir: parent_is_dir },
        ];
        for entry in dirops::readdir_entries(&self.disks, &dir)? {
            let is_dir = self.disks.read_inode(entry.inode_number)?.is_dir();
            out.push(DirListEntry {
                name: entry.name_str().to_string(),
                inode: entry.inode_number,
                is_dir,
            });
        }
        Ok(out)
    }

    /// Releases every block an inode references (direct and indirect),
    /// the indirect block itself, then the inode slot.
    fn free_inode(&mut self, inode: &Inode) -> Result<(), FsError> {
        for block_ref in inode.direct {
            if let Some(l) = block_ref.get() {
                self.disks.free_data_block(l)?;
            }
        }
        if let Some(ind) = inode.indirect.get() {
            let table = crate::inode::IndirectBlock::decode(self.disks.read_block(ind)?)?;
            for block_ref in table.0 {
                if let Some(l) = block_ref.get() {
                    self.disks.free_data_block(l)?;
                }
            }
            self.disks.free_data_block(ind)?;
        }
        let zeroed = Inode::zeroed(inode.number);
        self.disks.write_inode(&zeroed)?;
        self.disks.free_inode_slot(inode.number);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::superblock::RaidMode;
    use crate::testutil::mounted_fixture;

    fn fixture() -> (tempfile::TempDir, Filesystem) {
        let (dir, disks) = mounted_fixture(RaidMode::Mirrored, 2, 32, 32);
        (dir, Filesystem::mount(disks))
    }

    #[test]
    fn getattr_root_is_directory_with_two_links() {
        let (_dir, fs) = fixture();
        let attr = fs.getattr("/").unwrap();
        assert_eq!(attr.inode, 0);
        assert_eq!(attr.nlink, 2);
        assert_eq!(attr.size, 0);
        assert_eq!(attr.mode as libc::mode_t & libc::S_IFMT, libc::S_IFDIR);
    }

    #[test]
    fn mkdir_then_readdir_lists_child() {
        let (_dir, mut fs) = fixture();
        fs.mkdir("/a", 0o755).unwrap();
        fs.mkdir("/a/b", 0o755).unwrap();

        let names: Vec<String> = fs.readdir("/a").unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec![".", "..", "b"]);
    }

    #[test]
    fn mknod_write_read_round_trip() {
        let (_dir, mut fs) = fixture();
        fs.mknod("/f", 0o644).unwrap();
        let payload = vec![0xABu8; 5000];
        let written = fs.write("/f", 0, &payload).unwrap();
        assert_eq!(written, payload.len());

        let got = fs.read("/f", 0, payload.len()).unwrap();
        assert_eq!(got, payload);
        assert_eq!(fs.getattr("/f").unwrap().size, payload.len() as u64);
    }

    #[test]
    fn rmdir_rejects_non_empty_then_succeeds_once_emptied() {
        let (_dir, mut fs) = fixture();
        fs.mkdir("/a", 0o755).unwrap();
        fs.mknod("/a/x", 0o644).unwrap();

        assert!(matches!(fs.rmdir("/a").unwrap_err(), FsError::NotEmpty));
        fs.unlink("/a/x").unwrap();
        fs.rmdir("/a").unwrap();

        let names: Vec<String> = fs.readdir("/").unwrap().into_iter().map(|e| e.name).collect();
        assert!(!names.contains(&"a".to_string()));
    }

    #[test]
    fn rmdir_root_is_rejected() {
        let (_dir, mut fs) = fixture();
        assert!(matches!(fs.rmdir("/").unwrap_err(), FsError::PermissionDenied));
    }

    #[test]
    fn mknod_duplicate_path_fails_with_exists() {
        let (_dir, mut fs) = fixture();
        fs.mknod("/f", 0o644).unwrap();
        assert!(matches!(fs.mknod("/f", 0o644).unwrap_err(), FsError::Exists));
    }

    #[test]
    fn mknod_unlink_restores_inode_bitmap() {
        let (_dir, mut fs) = fixture();
        let before: Vec<bool> = (0..32).map(|n| fs.disks().inode_allocated(n)).collect();

        fs.mknod("/f", 0o644).unwrap();
        fs.unlink("/f").unwrap();

        let after: Vec<bool> = (0..32).map(|n| fs.disks().inode_allocated(n)).collect();
        assert_eq!(before, after);
    }
}
