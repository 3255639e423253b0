//! Process and timing seams for the muxer.
//!
//! The state machine never touches `std::process` directly: it goes through
//! [`Launch`] and [`Sleep`] so tests can count invocations and script exits
//! without spawning anything.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use tracing::debug;

/// A spawned merge process, reduced to exit observation.
pub trait MuxProcess: Send {
    /// Non-blocking exit check: `Some(code)` once the process has exited.
    fn try_wait(&mut self) -> io::Result<Option<i32>>;

    /// Block until the process exits and return its code.
    fn wait(&mut self) -> io::Result<i32>;
}

/// Everything needed to launch one merge.
#[derive(Debug, Clone)]
pub struct MuxCommand {
    pub container: PathBuf,
    pub subtitle: PathBuf,
    pub output: PathBuf,
    pub work_dir: PathBuf,
}

/// Factory for merge processes.
pub trait Launch: Send + Sync {
    fn launch(&self, command: &MuxCommand) -> io::Result<Box<dyn MuxProcess>>;
}

/// Puts a thread to sleep. Returning an `Interrupted` error models the
/// thread being interrupted mid-wait; it must be reported, not swallowed.
pub trait Sleep: Send + Sync {
    fn sleep(&self, duration: Duration) -> io::Result<()>;
}

/// Real launcher: runs `<tool> -o <output> <container> <subtitle>` in the
/// working directory, inheriting the host's standard streams.
#[derive(Debug, Clone)]
pub struct ToolLauncher {
    program: PathBuf,
}

impl ToolLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Launch for ToolLauncher {
    fn launch(&self, command: &MuxCommand) -> io::Result<Box<dyn MuxProcess>> {
        debug!(
            tool = %self.program.display(),
            container = %command.container.display(),
            subtitle = %command.subtitle.display(),
            output = %command.output.display(),
            "launching merge"
        );
        let child = Command::new(&self.program)
            .arg("-o")
            .arg(&command.output)
            .arg(&command.container)
            .arg(&command.subtitle)
            .current_dir(&command.work_dir)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()?;
        Ok(Box::new(ChildProcess(child)))
    }
}

/// Wrapper adapting [`std::process::Child`] to [`MuxProcess`].
struct ChildProcess(Child);

impl ChildProcess {
    fn code(status: std::process::ExitStatus) -> i32 {
        // A signal-terminated process has no code; treat it as failure.
        status.code().unwrap_or(-1)
    }
}

impl MuxProcess for ChildProcess {
    fn try_wait(&mut self) -> io::Result<Option<i32>> {
        Ok(self.0.try_wait()?.map(Self::code))
    }

    fn wait(&mut self) -> io::Result<i32> {
        Ok(Self::code(self.0.wait()?))
    }
}

/// Real sleeper backed by the OS clock.
#[derive(Debug, Clone, Default)]
pub struct ThreadSleeper;

impl Sleep for ThreadSleeper {
    fn sleep(&self, duration: Duration) -> io::Result<()> {
        std::thread::sleep(duration);
        Ok(())
    }
}

/// Check `access(2)`-style permissions on a path.
pub(crate) fn check_access(path: &Path, mode: libc::c_int) -> io::Result<()> {
    use std::os::unix::ffi::OsStrExt;
    let cpath = std::ffi::CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL"))?;
    // Safety: cpath is a valid NUL-terminated string for the duration of
    // the call.
    let rc = unsafe { libc::access(cpath.as_ptr(), mode) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}
