//! File attributes and content identity.

use std::fs::Metadata;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

/// Semantic attribute record for a file, directory, or symlink.
///
/// This is what `getattr` returns: plain values, no native struct layout.
/// The kernel adapter converts it into whatever representation the mount
/// protocol wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub ino: u64,
    pub size: u64,
    pub blocks: u64,
    pub blksize: u64,
    pub mode: u32,
    pub nlink: u64,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u64,
    pub atime: (i64, i64),
    pub mtime: (i64, i64),
    pub ctime: (i64, i64),
}

impl FileStat {
    /// Stat a path without following a trailing symlink.
    pub fn of(path: &Path) -> io::Result<Self> {
        std::fs::symlink_metadata(path).map(|meta| Self::from_metadata(&meta))
    }

    fn from_metadata(meta: &Metadata) -> Self {
        Self {
            ino: meta.ino(),
            size: meta.size(),
            blocks: meta.blocks(),
            blksize: meta.blksize(),
            mode: meta.mode(),
            nlink: meta.nlink(),
            uid: meta.uid(),
            gid: meta.gid(),
            rdev: meta.rdev(),
            atime: (meta.atime(), meta.atime_nsec()),
            mtime: (meta.mtime(), meta.mtime_nsec()),
            ctime: (meta.ctime(), meta.ctime_nsec()),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.mode & libc::S_IFMT == libc::S_IFDIR
    }

    pub fn is_symlink(&self) -> bool {
        self.mode & libc::S_IFMT == libc::S_IFLNK
    }

    /// Same record with the reported size grown by `extra` bytes.
    pub fn with_extra_size(mut self, extra: u64) -> Self {
        self.size = self.size.saturating_add(extra);
        self
    }
}

/// Uniquely and stably identifies the content of an unnamed file at a point
/// in time.
///
/// If the file is modified, mtime changes. If the metadata changes, ctime
/// changes. Two stats of the same untouched file compare equal, which is
/// why this is the registry key instead of a path: paths can be reused for
/// different files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileIdentity {
    ino: u64,
    mtime: (i64, i64),
    ctime: (i64, i64),
    size: u64,
}

impl FileIdentity {
    /// Stat a path, following symlinks, and capture its identity.
    pub fn of(path: &Path) -> io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        Ok(Self {
            ino: meta.ino(),
            mtime: (meta.mtime(), meta.mtime_nsec()),
            ctime: (meta.ctime(), meta.ctime_nsec()),
            size: meta.size(),
        })
    }

    /// Size of the identified file in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }
}
