//! The `fuser::Filesystem` adapter. `raidfs-core::fs::Filesystem` is path-addressed; FUSE
//! addresses nodes by a 64-bit inode number it hands back on every
//! call. This module bridges the two with a `fuse_ino -> path` cache
//! populated as the kernel walks the tree (`lookup`, `readdir`),
//! exactly the way a toy FUSE adapter over a path-based backend has to.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::time::{Duration, UNIX_EPOCH};

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry,
    ReplyOpen, ReplyWrite, Request,
};
use log::{debug, warn};

use raidfs_core::{Attr, FsError};

/// FUSE reserves inode 1 for the mount root; raidfs's root inode is
/// number 0, so every raidfs inode number is offset by one to get its
/// fuse ino.
const ROOT_INO: u64 = 1;
const TTL: Duration = Duration::from_secs(1);

fn fuse_ino(raidfs_number: u32) -> u64 {
    raidfs_number as u64 + 1
}

fn join_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

fn file_attr(attr: &Attr) -> FileAttr {
    let kind = if attr.mode as libc::mode_t & libc::S_IFMT == libc::S_IFDIR {
        FileType::Directory
    } else {
        FileType::RegularFile
    };
    let perm = (attr.mode & 0o7777) as u16;
    let to_time = |secs: i64| UNIX_EPOCH + Duration::from_secs(secs.max(0) as u64);
    let blocks = attr.size.div_ceil(raidfs_core::BLOCK_SIZE as u64);
    FileAttr {
        ino: fuse_ino(attr.inode),
        size: attr.size,
        blocks,
        atime: to_time(attr.atime),
        mtime: to_time(attr.mtime),
        ctime: to_time(attr.ctime),
        crtime: to_time(attr.ctime),
        kind,
        perm,
        nlink: attr.nlink,
        uid: attr.uid,
        gid: attr.gid,
        rdev: 0,
        blksize: raidfs_core::BLOCK_SIZE as u32,
        flags: 0,
    }
}

/// Wraps one mounted [`raidfs_core::Filesystem`] and the path cache
/// that lets FUSE's ino-addressed calls reach it.
pub struct RaidFsAdapter {
    fs: raidfs_core::Filesystem,
    paths: HashMap<u64, String>,
}

impl RaidFsAdapter {
    pub fn new(fs: raidfs_core::Filesystem) -> Self {
        let mut paths = HashMap::new();
        paths.insert(ROOT_INO, "/".to_string());
        Self { fs, paths }
    }

    fn path_of(&self, ino: u64) -> Option<String> {
        self.paths.get(&ino).cloned()
    }

    fn remember(&mut self, ino: u64, path: String) {
        self.paths.entry(ino).or_insert(path);
    }
}

impl Filesystem for RaidFsAdapter {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        let Some(parent_path) = self.path_of(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        let child_path = join_path(&parent_path, name);
        match self.fs.getattr(&child_path) {
            Ok(attr) => {
                let ino = fuse_ino(attr.inode);
                self.remember(ino, child_path);
                reply.entry(&TTL, &file_attr(&attr), 0);
            }
            Err(e) => {
                log_error("lookup", &child_path, &e);
                reply.error(e.errno());
            }
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.fs.getattr(&path) {
            Ok(attr) => reply.attr(&TTL, &file_attr(&attr)),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn mknod(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: ReplyEntry,
    ) {
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        let Some(parent_path) = self.path_of(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        let child_path = join_path(&parent_path, name);
        match self.fs.mknod(&child_path, mode) {
            Ok(attr) => {
                self.remember(fuse_ino(attr.inode), child_path);
                reply.entry(&TTL, &file_attr(&attr), 0);
            }
            Err(e) => {
                log_error("mknod", &child_path, &e);
                reply.error(e.errno());
            }
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        let Some(parent_path) = self.path_of(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        let child_path = join_path(&parent_path, name);
        match self.fs.mkdir(&child_path, mode) {
            Ok(attr) => {
                self.remember(fuse_ino(attr.inode), child_path);
                reply.entry(&TTL, &file_attr(&attr), 0);
            }
            Err(e) => {
                log_error("mkdir", &child_path, &e);
                reply.error(e.errno());
            }
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        let Some(parent_path) = self.path_of(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        let child_path = join_path(&parent_path, name);
        match self.fs.unlink(&child_path) {
            Ok(()) => reply.ok(),
            Err(e) => {
                log_error("unlink", &child_path, &e);
                reply.error(e.errno());
            }
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        let Some(parent_path) = self.path_of(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        let child_path = join_path(&parent_path, name);
        match self.fs.rmdir(&child_path) {
            Ok(()) => reply.ok(),
            Err(e) => {
                log_error("rmdir", &child_path, &e);
                reply.error(e.errno());
            }
        }
    }

    fn open(&mut self, _req: &Request<'_>, _ino: u64, _flags: i32, reply: ReplyOpen) {
        reply.opened(0, 0);
    }

    fn opendir(&mut self, _req: &Request<'_>, _ino: u64, _flags: i32, reply: ReplyOpen) {
        reply.opened(0, 0);
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }
        match self.fs.read(&path, offset as u64, size as usize) {
            Ok(data) => reply.data(&data),
            Err(e) => {
                log_error("read", &path, &e);
                reply.error(e.errno());
            }
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }
        match self.fs.write(&path, offset as u64, data) {
            Ok(written) => reply.written(written as u32),
            Err(e) => {
                log_error("write", &path, &e);
                reply.error(e.errno());
            }
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let entries = match self.fs.readdir(&path) {
            Ok(entries) => entries,
            Err(e) => {
                log_error("readdir", &path, &e);
                reply.error(e.errno());
                return;
            }
        };

        for (i, entry) in entries.into_iter().enumerate().skip(offset.max(0) as usize) {
            let kind = if entry.is_dir { FileType::Directory } else { FileType::RegularFile };
            let child_ino = fuse_ino(entry.inode);
            if entry.name != "." && entry.name != ".." {
                self.remember(child_ino, join_path(&path, &entry.name));
            }
            let buffer_full = reply.add(child_ino, (i + 1) as i64, kind, &entry.name);
            if buffer_full {
                break;
            }
        }
        reply.ok();
    }
}

/// Maps an internal error to a one-line, `log`-visible diagnosis
/// without changing the errno the caller already decided on.
pub fn log_error(op: &str, path: &str, err: &FsError) {
    match err {
        FsError::NoEntry => debug!("{op} {path:?}: no entry"),
        _ => warn!("{op} {path:?}: {err}"),
    }
}
