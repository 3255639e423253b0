//! Mount-level configuration.

use std::path::PathBuf;

/// Configuration for the completed-merge cache.
#[derive(Debug, Clone)]
pub struct MuxCacheConfig {
    /// Budget for retained merges, in megabytes of *source* file size.
    pub max_size_mb: u32,
    /// How long a finished merge is kept after its last handle closes.
    pub ttl_secs: u32,
}

impl Default for MuxCacheConfig {
    fn default() -> Self {
        Self {
            max_size_mb: 10 * 1024,
            ttl_secs: 3600,
        }
    }
}

/// Everything needed to bring up one mount.
#[derive(Debug, Clone)]
pub struct MountConfig {
    /// Directory tree to mirror.
    pub source: PathBuf,
    /// Where the filesystem is mounted.
    pub mount_point: PathBuf,
    /// Working directory for merge outputs.
    pub temp_dir: PathBuf,
    /// External merge tool program.
    pub mux_tool: PathBuf,
    /// Pass-through mount options. `read-only` and `default_permissions`
    /// are forced on top of these, whatever they say.
    pub options: Vec<String>,
    pub cache: MuxCacheConfig,
}

impl MountConfig {
    /// Check that every configured directory actually is one.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for dir in [&self.source, &self.mount_point, &self.temp_dir] {
            if !dir.is_dir() {
                return Err(ConfigError::NotADirectory(dir.clone()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} doesn't exist, or is not a directory")]
    NotADirectory(PathBuf),
}
