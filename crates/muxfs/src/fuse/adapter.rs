//! Kernel-facing adapter: fuser callbacks over a [`PathFs`].
//!
//! All marshalling (inode numbers, reply buffers, kernel offsets) lives
//! here; the engine below only ever sees virtual paths and semantic values.

use std::ffi::OsStr;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{
    FileAttr, FileType, Filesystem, MountOption, ReplyAttr, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, Request,
};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::MountConfig;
use crate::fs::{DirSink, FileStat, PathFs, SinkFlow};
use crate::fuse::inode_table::InodeTable;

/// How long the kernel may cache attributes and lookups.
const TTL: Duration = Duration::from_secs(1);

/// Mount `fs` at the configured mount point and block until unmounted.
///
/// `read-only` and `default_permissions` are always forced; whatever the
/// user passed through is appended after them.
pub fn mount<F: PathFs + 'static>(fs: Arc<F>, config: &MountConfig) -> io::Result<()> {
    let mut options = vec![
        MountOption::RO,
        MountOption::DefaultPermissions,
        MountOption::FSName(fs.name().to_string()),
    ];
    options.extend(config.options.iter().cloned().map(MountOption::CUSTOM));
    info!(
        source = %config.source.display(),
        mount_point = %config.mount_point.display(),
        "mounting"
    );
    fuser::mount2(MountFs::new(fs), &config.mount_point, &options)
}

/// fuser driver for any [`PathFs`].
pub struct MountFs<F> {
    fs: Arc<F>,
    inodes: Mutex<InodeTable>,
}

impl<F: PathFs> MountFs<F> {
    pub fn new(fs: Arc<F>) -> Self {
        Self {
            fs,
            inodes: Mutex::new(InodeTable::new()),
        }
    }

    fn path_of(&self, ino: u64) -> Option<String> {
        self.inodes.lock().path(ino).map(str::to_string)
    }
}

fn system_time(secs: i64, nanos: i64) -> SystemTime {
    if secs >= 0 {
        UNIX_EPOCH + Duration::new(secs as u64, nanos as u32)
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs())
    }
}

fn file_type(mode: u32) -> FileType {
    match mode & libc::S_IFMT {
        libc::S_IFDIR => FileType::Directory,
        libc::S_IFLNK => FileType::Symlink,
        libc::S_IFCHR => FileType::CharDevice,
        libc::S_IFBLK => FileType::BlockDevice,
        libc::S_IFIFO => FileType::NamedPipe,
        libc::S_IFSOCK => FileType::Socket,
        _ => FileType::RegularFile,
    }
}

fn file_attr(stat: &FileStat, ino: u64) -> FileAttr {
    FileAttr {
        ino,
        size: stat.size,
        blocks: stat.blocks,
        atime: system_time(stat.atime.0, stat.atime.1),
        mtime: system_time(stat.mtime.0, stat.mtime.1),
        ctime: system_time(stat.ctime.0, stat.ctime.1),
        crtime: UNIX_EPOCH,
        kind: file_type(stat.mode),
        perm: (stat.mode & 0o7777) as u16,
        nlink: stat.nlink as u32,
        uid: stat.uid,
        gid: stat.gid,
        rdev: stat.rdev as u32,
        blksize: stat.blksize as u32,
        flags: 0,
    }
}

/// Streams engine directory entries straight into the kernel reply buffer,
/// honoring the kernel's resume offset and reporting buffer exhaustion
/// back as [`SinkFlow::Full`].
struct ReplySink<'a, 'b> {
    reply: &'a mut ReplyDirectory,
    inodes: &'b Mutex<InodeTable>,
    dir_path: String,
    dir_ino: u64,
    /// Entries seen so far in this enumeration, 0-based.
    seen: i64,
    /// Entries already delivered by previous readdir calls.
    skip: i64,
}

impl ReplySink<'_, '_> {
    fn push(&mut self, name: &str, real: &Path) -> SinkFlow {
        let index = self.seen;
        self.seen += 1;
        if index < self.skip {
            return SinkFlow::More;
        }
        let (ino, kind) = match name {
            "." => (self.dir_ino, FileType::Directory),
            ".." => {
                let parent = InodeTable::parent_path(&self.dir_path);
                (self.inodes.lock().get_or_create(&parent), FileType::Directory)
            }
            _ => {
                let child = InodeTable::child_path(&self.dir_path, name);
                let ino = self.inodes.lock().get_or_create(&child);
                let kind = std::fs::symlink_metadata(real)
                    .map(|meta| file_type(meta.mode()))
                    .unwrap_or(FileType::RegularFile);
                (ino, kind)
            }
        };
        if self.reply.add(ino, index + 1, kind, name) {
            SinkFlow::Full
        } else {
            SinkFlow::More
        }
    }
}

impl DirSink for ReplySink<'_, '_> {
    fn entry(&mut self, name: &str, real: &Path) -> io::Result<SinkFlow> {
        Ok(self.push(name, real))
    }

    fn entry_with_extra_size(
        &mut self,
        name: &str,
        real: &Path,
        _extra_size: u64,
    ) -> io::Result<SinkFlow> {
        // Listing carries no sizes; the inflation shows up in getattr.
        Ok(self.push(name, real))
    }
}

impl<F: PathFs> Filesystem for MountFs<F> {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(parent_path) = self.path_of(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        let child = InodeTable::child_path(&parent_path, &name.to_string_lossy());
        match self.fs.getattr(Path::new(&child)) {
            Ok(stat) => {
                let ino = self.inodes.lock().get_or_create(&child);
                reply.entry(&TTL, &file_attr(&stat, ino), 0);
            }
            Err(err) => reply.error(err.errno()),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.fs.getattr(Path::new(&path)) {
            Ok(stat) => reply.attr(&TTL, &file_attr(&stat, ino)),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.fs.readlink(Path::new(&path)) {
            Ok(target) => reply.data(target.as_os_str().as_encoded_bytes()),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.fs.open(Path::new(&path)) {
            Ok(handle) => reply.opened(handle, 0),
            Err(err) => reply.error(err.errno()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }
        match self.fs.read(fh, size, offset as u64) {
            Ok(bytes) => reply.data(&bytes),
            Err(err) => reply.error(err.errno()),
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
        let mut sink = ReplySink {
            reply: &mut reply,
            inodes: &self.inodes,
            dir_path: path.clone(),
            dir_ino: ino,
            seen: 0,
            skip: offset,
        };
        match self.fs.readdir(Path::new(&path), &mut sink) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        match self.fs.release(fh) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn destroy(&mut self) {
        debug!("unmounting");
        self.fs.destroy();
    }
}
