//! The filesystem engine.
//!
//! # Architecture
//!
//! - [`MirrorFs`]: maps virtual paths one-to-one onto a real directory tree
//! - [`MuxFs`]: wraps the mirror and substitutes remuxed containers for
//!   video files with matching subtitles
//! - [`PathFs`]: the operation surface both implement, consumed by the
//!   kernel-facing adapter
//!
//! The layering is plain composition: `MuxFs` holds a `MirrorFs` by value
//! and delegates everything it does not intercept.

mod handles;
mod mirror;
mod mux_fs;
pub mod pairing;
mod stat;
#[cfg(test)]
pub(crate) mod testing;

pub use handles::HandleTable;
pub use mirror::MirrorFs;
pub use mux_fs::{MuxFs, MuxRegistryStats};
pub use stat::{FileIdentity, FileStat};

use std::io;
use std::path::{Path, PathBuf};

use crate::error::FsError;

/// Flow control reported by a [`DirSink`] after accepting an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkFlow {
    /// Keep enumerating.
    More,
    /// The sink's buffer is exhausted; stop enumerating, successfully.
    Full,
}

/// Receiver for directory enumeration.
///
/// An `Err` from the sink is an ordinary per-entry failure: the caller logs
/// it and moves on to the next entry. Only [`SinkFlow::Full`] aborts the
/// enumeration, and that is a success, not an error.
pub trait DirSink {
    /// Emit one directory entry. `real` is the backing path, which the sink
    /// may stat for entry attributes.
    fn entry(&mut self, name: &str, real: &Path) -> io::Result<SinkFlow>;

    /// Emit one entry whose reported size should be grown by `extra_size`
    /// bytes over what a stat of `real` says.
    fn entry_with_extra_size(
        &mut self,
        name: &str,
        real: &Path,
        extra_size: u64,
    ) -> io::Result<SinkFlow>;
}

/// Path-addressed, read-only filesystem operation surface.
///
/// Implementations are called concurrently from multiple dispatch threads
/// and must be internally synchronized. All paths are virtual (rooted at
/// the mount point); errors are semantic and carry their POSIX translation.
pub trait PathFs: Send + Sync {
    /// Short filesystem name, advertised to the mount.
    fn name(&self) -> &str;

    fn getattr(&self, path: &Path) -> Result<FileStat, FsError>;

    fn readdir(&self, path: &Path, sink: &mut dyn DirSink) -> Result<(), FsError>;

    fn readlink(&self, path: &Path) -> Result<PathBuf, FsError>;

    fn open(&self, path: &Path) -> Result<u64, FsError>;

    fn read(&self, handle: u64, size: u32, offset: u64) -> Result<Vec<u8>, FsError>;

    fn release(&self, handle: u64) -> Result<(), FsError>;

    /// Tear down: close remaining handles and drop any scratch state.
    /// Best-effort; failures are logged, never propagated.
    fn destroy(&self);
}
