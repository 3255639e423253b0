// Filesystem engine
pub mod error;
pub mod fs;
pub mod mux;

// Kernel-facing adapter
#[cfg(feature = "fuse")]
pub mod fuse;

// Mount configuration
pub mod config;

// Re-exports for consumers
pub use config::{ConfigError, MountConfig, MuxCacheConfig};
pub use error::FsError;
pub use fs::{FileIdentity, FileStat, MirrorFs, MuxFs, PathFs};
pub use mux::{MuxState, Muxer, MuxerFactory, ThreadSleeper, ToolLauncher};
