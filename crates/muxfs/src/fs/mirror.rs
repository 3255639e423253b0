//! One-to-one mirror of a real directory tree.

use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, trace, warn};

use crate::error::FsError;
use crate::fs::handles::HandleTable;
use crate::fs::{DirSink, FileStat, PathFs, SinkFlow};

/// Mirrors a source directory: every virtual path maps to exactly one real
/// path underneath the mirrored root. Owns nothing beyond the lifetime of
/// its open handles.
#[derive(Debug)]
pub struct MirrorFs {
    root: PathBuf,
    handles: HandleTable,
}

impl MirrorFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            handles: HandleTable::new(),
        }
    }

    /// Resolve a virtual path to its real counterpart under the root.
    pub fn real(&self, virtual_path: &Path) -> PathBuf {
        let mut real = self.root.clone();
        for component in virtual_path.components() {
            if let Component::Normal(part) = component {
                real.push(part);
            }
        }
        real
    }

    /// Open an already-resolved real path and register a handle for it.
    ///
    /// Used by the mux layer to serve reads from merge outputs living
    /// outside the mirrored tree.
    pub fn open_real(&self, real: &Path) -> Result<u64, FsError> {
        let file = File::open(real)?;
        let handle = self.handles.insert(file);
        debug!(path = %real.display(), handle, "opened");
        Ok(handle)
    }

    /// Emit `.` and `..` before the real entries. Failures on these two are
    /// logged and ignored; enumeration continues regardless.
    pub(crate) fn emit_dot_entries(&self, real: &Path, sink: &mut dyn DirSink) {
        if let Err(err) = sink.entry(".", real) {
            trace!(%err, "failed to emit .");
        }
        let parent = real.parent().unwrap_or(real);
        if let Err(err) = sink.entry("..", parent) {
            trace!(%err, "failed to emit ..");
        }
    }

    /// Emit a single real entry into the sink.
    ///
    /// Returns `Full` only on sink resource exhaustion. A per-entry I/O
    /// error is logged and skipped: files may be deleted or renamed while
    /// we iterate, and one bad entry must not abort the listing.
    pub(crate) fn emit(&self, sink: &mut dyn DirSink, real: &Path) -> SinkFlow {
        let Some(name) = file_name(real) else {
            return SinkFlow::More;
        };
        match sink.entry(&name, real) {
            Ok(flow) => flow,
            Err(err) => {
                trace!(path = %real.display(), %err, "skipping unreadable entry");
                SinkFlow::More
            }
        }
    }

    pub(crate) fn emit_with_extra_size(
        &self,
        sink: &mut dyn DirSink,
        real: &Path,
        extra_size: u64,
    ) -> SinkFlow {
        let Some(name) = file_name(real) else {
            return SinkFlow::More;
        };
        match sink.entry_with_extra_size(&name, real, extra_size) {
            Ok(flow) => flow,
            Err(err) => {
                trace!(path = %real.display(), %err, "skipping unreadable entry");
                SinkFlow::More
            }
        }
    }
}

/// Final component of a real path, if it has one.
pub(crate) fn file_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

impl PathFs for MirrorFs {
    fn name(&self) -> &str {
        "mirrorfs"
    }

    fn getattr(&self, path: &Path) -> Result<FileStat, FsError> {
        debug!(path = %path.display(), "getattr");
        Ok(FileStat::of(&self.real(path))?)
    }

    fn readdir(&self, path: &Path, sink: &mut dyn DirSink) -> Result<(), FsError> {
        debug!(path = %path.display(), "readdir");
        let real = self.real(path);
        self.emit_dot_entries(&real, sink);
        for entry in std::fs::read_dir(&real)? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    trace!(%err, "skipping unreadable entry");
                    continue;
                }
            };
            if self.emit(sink, &entry.path()) == SinkFlow::Full {
                return Ok(());
            }
        }
        Ok(())
    }

    fn readlink(&self, path: &Path) -> Result<PathBuf, FsError> {
        debug!(path = %path.display(), "readlink");
        Ok(std::fs::read_link(self.real(path))?)
    }

    fn open(&self, path: &Path) -> Result<u64, FsError> {
        debug!(path = %path.display(), "open");
        self.open_real(&self.real(path))
    }

    fn read(&self, handle: u64, size: u32, offset: u64) -> Result<Vec<u8>, FsError> {
        let file = self.handles.get(handle).ok_or(FsError::BadHandle)?;
        let mut buf = vec![0u8; size as usize];
        let mut filled = 0;
        while filled < buf.len() {
            match file.read_at(&mut buf[filled..], offset + filled as u64) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {
                    return Err(FsError::Interrupted)
                }
                Err(err) => return Err(err.into()),
            }
        }
        buf.truncate(filled);
        Ok(buf)
    }

    fn release(&self, handle: u64) -> Result<(), FsError> {
        debug!(handle, "release");
        self.handles.remove(handle).ok_or(FsError::BadHandle)?;
        Ok(())
    }

    fn destroy(&self) {
        let remaining = self.handles.drain();
        if !remaining.is_empty() {
            warn!(count = remaining.len(), "closing handles left open at teardown");
        }
    }
}
