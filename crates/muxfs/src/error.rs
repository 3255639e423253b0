//! Error taxonomy for filesystem operations.
//!
//! Every failure the engine can surface is folded into [`FsError`], which
//! maps one-to-one onto a POSIX errno. Callers outside the kernel adapter
//! only ever see these semantic variants; the adapter turns them into
//! negative error codes at the boundary.

use std::io;

use tracing::warn;

/// Semantic filesystem error, translatable to a POSIX errno.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FsError {
    #[error("no such file or directory")]
    NotFound,
    #[error("permission denied")]
    PermissionDenied,
    #[error("not a directory")]
    NotADirectory,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("operation not supported")]
    Unsupported,
    #[error("bad file handle")]
    BadHandle,
    #[error("interrupted")]
    Interrupted,
    #[error("I/O error")]
    Io,
}

impl FsError {
    /// The positive errno value for this error. The kernel adapter negates
    /// it when replying.
    pub fn errno(self) -> i32 {
        match self {
            FsError::NotFound => libc::ENOENT,
            FsError::PermissionDenied => libc::EPERM,
            FsError::NotADirectory => libc::ENOTDIR,
            FsError::InvalidArgument => libc::EINVAL,
            FsError::Unsupported => libc::ENOSYS,
            FsError::BadHandle => libc::EBADF,
            FsError::Interrupted => libc::EINTR,
            FsError::Io => libc::EIO,
        }
    }
}

impl From<io::Error> for FsError {
    /// Translate an OS-level error into the fixed taxonomy.
    ///
    /// Unmapped kinds are logged before collapsing into [`FsError::Io`] so
    /// the underlying cause is never silently lost.
    fn from(err: io::Error) -> Self {
        use io::ErrorKind;
        match err.kind() {
            ErrorKind::NotFound => FsError::NotFound,
            ErrorKind::PermissionDenied => FsError::PermissionDenied,
            ErrorKind::NotADirectory => FsError::NotADirectory,
            ErrorKind::InvalidInput | ErrorKind::InvalidData => FsError::InvalidArgument,
            ErrorKind::Unsupported => FsError::Unsupported,
            ErrorKind::Interrupted => FsError::Interrupted,
            kind => {
                warn!(%err, ?kind, "unmapped I/O error");
                FsError::Io
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(FsError::NotFound.errno(), libc::ENOENT);
        assert_eq!(FsError::PermissionDenied.errno(), libc::EPERM);
        assert_eq!(FsError::NotADirectory.errno(), libc::ENOTDIR);
        assert_eq!(FsError::InvalidArgument.errno(), libc::EINVAL);
        assert_eq!(FsError::Unsupported.errno(), libc::ENOSYS);
        assert_eq!(FsError::BadHandle.errno(), libc::EBADF);
        assert_eq!(FsError::Interrupted.errno(), libc::EINTR);
        assert_eq!(FsError::Io.errno(), libc::EIO);
    }

    #[test]
    fn test_io_error_translation() {
        let not_found = io::Error::new(io::ErrorKind::NotFound, "gone");
        assert_eq!(FsError::from(not_found), FsError::NotFound);

        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "nope");
        assert_eq!(FsError::from(denied), FsError::PermissionDenied);

        let interrupted = io::Error::new(io::ErrorKind::Interrupted, "signal");
        assert_eq!(FsError::from(interrupted), FsError::Interrupted);
    }

    #[test]
    fn test_unmapped_kind_becomes_io() {
        let odd = io::Error::new(io::ErrorKind::ConnectionReset, "weird");
        assert_eq!(FsError::from(odd), FsError::Io);
    }
}
