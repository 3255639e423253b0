//! External-process merge state machine.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::mux::process::{check_access, Launch, MuxCommand, MuxProcess, Sleep};

/// Interval between polls while waiting on an in-progress merge.
pub const MUX_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Finer tick used inside bounded waits so short timeouts stay accurate.
const WAIT_TICK: Duration = Duration::from_millis(10);

const NOT_STARTED: u8 = 0;
const RUNNING: u8 = 1;
const SUCCESSFUL: u8 = 2;
const FAILED: u8 = 3;

/// Lifecycle of one merge attempt. `Successful` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxState {
    NotStarted,
    Running,
    Successful,
    Failed,
}

impl MuxState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            NOT_STARTED => MuxState::NotStarted,
            RUNNING => MuxState::Running,
            SUCCESSFUL => MuxState::Successful,
            _ => MuxState::Failed,
        }
    }
}

/// One merge of a container and a subtitle into a freshly named output
/// file.
///
/// Owns its spawned process and its output file. The output path is unique
/// per muxer and never aliases an existing file. State is observed lazily:
/// there is no background thread watching the process; whoever asks for
/// [`Muxer::state`] while it is `Running` performs the exit check.
pub struct Muxer {
    container: PathBuf,
    subtitle: PathBuf,
    work_dir: PathBuf,
    output: PathBuf,
    state: AtomicU8,
    process: Mutex<Option<Box<dyn MuxProcess>>>,
    launcher: Arc<dyn Launch>,
    sleeper: Arc<dyn Sleep>,
}

impl std::fmt::Debug for Muxer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Muxer")
            .field("container", &self.container)
            .field("subtitle", &self.subtitle)
            .field("output", &self.output)
            .field("state", &self.state())
            .finish()
    }
}

impl Muxer {
    pub fn new(
        container: PathBuf,
        subtitle: PathBuf,
        work_dir: PathBuf,
        launcher: Arc<dyn Launch>,
        sleeper: Arc<dyn Sleep>,
    ) -> Self {
        let output = work_dir.join(format!("{}.mkv", Uuid::new_v4()));
        Self {
            container,
            subtitle,
            work_dir,
            output,
            state: AtomicU8::new(NOT_STARTED),
            process: Mutex::new(None),
            launcher,
            sleeper,
        }
    }

    /// The container this merge was created for.
    pub fn container(&self) -> &Path {
        &self.container
    }

    /// Start the merge, if not already started.
    ///
    /// Safe to call concurrently and repeatedly; only the caller that wins
    /// the `NotStarted -> Running` transition launches the process, after
    /// verifying read access to both inputs and write access to the working
    /// directory. Any failure here moves straight to `Failed` and removes
    /// whatever partial output exists.
    pub fn start(&self) -> io::Result<()> {
        if self
            .state
            .compare_exchange(NOT_STARTED, RUNNING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }
        match self.launch() {
            Ok(process) => {
                *self.process.lock() = Some(process);
                Ok(())
            }
            Err(err) => {
                self.state.store(FAILED, Ordering::SeqCst);
                self.delete_output();
                Err(err)
            }
        }
    }

    fn launch(&self) -> io::Result<Box<dyn MuxProcess>> {
        check_access(&self.container, libc::R_OK)?;
        check_access(&self.subtitle, libc::R_OK)?;
        check_access(&self.work_dir, libc::W_OK)?;
        self.launcher.launch(&MuxCommand {
            container: self.container.clone(),
            subtitle: self.subtitle.clone(),
            output: self.output.clone(),
            work_dir: self.work_dir.clone(),
        })
    }

    /// Current state, observing process exit lazily.
    ///
    /// While `Running`, checks whether the process has exited and performs
    /// the `Running -> Successful | Failed` transition on the spot.
    pub fn state(&self) -> MuxState {
        let current = MuxState::from_u8(self.state.load(Ordering::SeqCst));
        if current != MuxState::Running {
            return current;
        }
        let mut guard = self.process.lock();
        let Some(process) = guard.as_mut() else {
            return MuxState::Running;
        };
        match process.try_wait() {
            Ok(None) => MuxState::Running,
            Ok(Some(0)) => {
                self.state.store(SUCCESSFUL, Ordering::SeqCst);
                debug!(output = %self.output.display(), "merge finished");
                MuxState::Successful
            }
            Ok(Some(code)) => {
                self.state.store(FAILED, Ordering::SeqCst);
                warn!(container = %self.container.display(), code, "merge failed");
                drop(guard);
                self.delete_output();
                MuxState::Failed
            }
            Err(err) => {
                warn!(%err, "could not observe merge process");
                MuxState::Running
            }
        }
    }

    /// Block until the process exits; returns its exit code.
    ///
    /// Calling this before [`Muxer::start`] is a programming error and is
    /// reported as such rather than retried.
    pub fn wait(&self) -> io::Result<i32> {
        match self.state() {
            MuxState::NotStarted => Err(not_started()),
            MuxState::Failed => {
                let mut guard = self.process.lock();
                match guard.as_mut() {
                    Some(process) => process.wait(),
                    // Failed before launch; there is no real exit code.
                    None => Ok(-127),
                }
            }
            MuxState::Running | MuxState::Successful => {
                let mut guard = self.process.lock();
                match guard.as_mut() {
                    Some(process) => process.wait(),
                    None => Ok(-127),
                }
            }
        }
    }

    /// Block until the process exits or the timeout elapses; returns
    /// whether it finished.
    pub fn wait_timeout(&self, timeout: Duration) -> io::Result<bool> {
        if self.state() == MuxState::NotStarted {
            return Err(not_started());
        }
        let deadline = Instant::now() + timeout;
        loop {
            match self.state() {
                MuxState::NotStarted => return Err(not_started()),
                MuxState::Successful | MuxState::Failed => return Ok(true),
                MuxState::Running => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(false);
                    }
                    self.sleeper.sleep((deadline - now).min(WAIT_TICK))?;
                }
            }
        }
    }

    /// The output path, available only while the merge is producing or has
    /// produced it (`Running` or `Successful`).
    pub fn output(&self) -> Option<&Path> {
        match self.state() {
            MuxState::Running | MuxState::Successful => Some(&self.output),
            MuxState::NotStarted | MuxState::Failed => None,
        }
    }

    /// Sleep-poll until the output file physically exists or the merge
    /// leaves `Running`; returns whether the file exists.
    ///
    /// The file becomes readable well before process exit is observed, so
    /// this lets callers start serving reads early.
    pub fn wait_for_output(&self) -> bool {
        while !self.output.is_file() && self.state() == MuxState::Running {
            if let Err(err) = self.sleeper.sleep(MUX_POLL_INTERVAL) {
                info!(%err, container = %self.container.display(), "interrupted waiting for merge output");
                return false;
            }
        }
        self.output.is_file()
    }

    /// Remove the output file, best-effort.
    pub fn delete_output(&self) {
        match std::fs::remove_file(&self.output) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(output = %self.output.display(), %err, "failed to delete merge output"),
        }
    }
}

fn not_started() -> io::Error {
    io::Error::other("merge was never started")
}

/// Creates muxers sharing one launcher, sleeper, and working directory.
#[derive(Clone)]
pub struct MuxerFactory {
    work_dir: PathBuf,
    launcher: Arc<dyn Launch>,
    sleeper: Arc<dyn Sleep>,
}

impl MuxerFactory {
    pub fn new(work_dir: PathBuf, launcher: Arc<dyn Launch>, sleeper: Arc<dyn Sleep>) -> Self {
        Self {
            work_dir,
            launcher,
            sleeper,
        }
    }

    pub fn create(&self, container: PathBuf, subtitle: PathBuf) -> Muxer {
        Muxer::new(
            container,
            subtitle,
            self.work_dir.clone(),
            self.launcher.clone(),
            self.sleeper.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mux::testing::{MockLauncher, MockSleeper};

    fn inputs(dir: &Path) -> (PathBuf, PathBuf) {
        let container = dir.join("movie.mkv");
        let subtitle = dir.join("movie.srt");
        std::fs::write(&container, b"video").unwrap();
        std::fs::write(&subtitle, b"subs").unwrap();
        (container, subtitle)
    }

    fn muxer_with(
        dir: &Path,
        launcher: &Arc<MockLauncher>,
        sleeper: &Arc<MockSleeper>,
    ) -> Muxer {
        let (container, subtitle) = inputs(dir);
        Muxer::new(
            container,
            subtitle,
            dir.to_path_buf(),
            launcher.clone() as Arc<dyn Launch>,
            sleeper.clone() as Arc<dyn Sleep>,
        )
    }

    #[test]
    fn test_start_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = Arc::new(MockLauncher::running());
        let sleeper = Arc::new(MockSleeper::new());
        let muxer = muxer_with(dir.path(), &launcher, &sleeper);

        muxer.start().unwrap();
        muxer.start().unwrap();
        muxer.start().unwrap();

        assert_eq!(launcher.launches(), 1);
        assert_eq!(muxer.state(), MuxState::Running);
    }

    #[test]
    fn test_start_missing_input_fails_without_launch() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = Arc::new(MockLauncher::running());
        let sleeper = Arc::new(MockSleeper::new());
        let muxer = Muxer::new(
            dir.path().join("missing.mkv"),
            dir.path().join("missing.srt"),
            dir.path().to_path_buf(),
            launcher.clone() as Arc<dyn Launch>,
            sleeper as Arc<dyn Sleep>,
        );

        assert!(muxer.start().is_err());
        assert_eq!(muxer.state(), MuxState::Failed);
        assert_eq!(launcher.launches(), 0);
        // Terminal: a retry must not relaunch.
        muxer.start().unwrap();
        assert_eq!(launcher.launches(), 0);
    }

    #[test]
    fn test_launch_error_fails() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = Arc::new(MockLauncher::failing_launch());
        let sleeper = Arc::new(MockSleeper::new());
        let muxer = muxer_with(dir.path(), &launcher, &sleeper);

        assert!(muxer.start().is_err());
        assert_eq!(muxer.state(), MuxState::Failed);
        assert!(muxer.output().is_none());
    }

    #[test]
    fn test_zero_exit_is_successful() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = Arc::new(MockLauncher::writing(b"merged".to_vec()));
        let sleeper = Arc::new(MockSleeper::new());
        let muxer = muxer_with(dir.path(), &launcher, &sleeper);

        muxer.start().unwrap();
        launcher.finish(0);

        assert_eq!(muxer.state(), MuxState::Successful);
        let output = muxer.output().unwrap();
        assert_eq!(std::fs::read(output).unwrap(), b"merged");
    }

    #[test]
    fn test_nonzero_exit_fails_and_deletes_output() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = Arc::new(MockLauncher::writing(b"partial".to_vec()));
        let sleeper = Arc::new(MockSleeper::new());
        let muxer = muxer_with(dir.path(), &launcher, &sleeper);

        muxer.start().unwrap();
        let output = muxer.output().unwrap().to_path_buf();
        assert!(output.is_file());

        launcher.finish(2);
        assert_eq!(muxer.state(), MuxState::Failed);
        assert!(!output.exists());
        assert!(muxer.output().is_none());
    }

    #[test]
    fn test_output_hidden_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = Arc::new(MockLauncher::running());
        let sleeper = Arc::new(MockSleeper::new());
        let muxer = muxer_with(dir.path(), &launcher, &sleeper);

        assert!(muxer.output().is_none());
        muxer.start().unwrap();
        assert!(muxer.output().is_some());
    }

    #[test]
    fn test_wait_before_start_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = Arc::new(MockLauncher::running());
        let sleeper = Arc::new(MockSleeper::new());
        let muxer = muxer_with(dir.path(), &launcher, &sleeper);

        assert!(muxer.wait().is_err());
        assert!(muxer.wait_timeout(Duration::from_millis(1)).is_err());
    }

    #[test]
    fn test_wait_returns_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = Arc::new(MockLauncher::writing(Vec::new()));
        let sleeper = Arc::new(MockSleeper::new());
        let muxer = muxer_with(dir.path(), &launcher, &sleeper);

        muxer.start().unwrap();
        launcher.finish(3);
        assert_eq!(muxer.wait().unwrap(), 3);
    }

    #[test]
    fn test_wait_timeout_expires_on_running_process() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = Arc::new(MockLauncher::running());
        let sleeper = Arc::new(MockSleeper::new());
        let muxer = muxer_with(dir.path(), &launcher, &sleeper);

        muxer.start().unwrap();
        assert!(!muxer.wait_timeout(Duration::from_millis(20)).unwrap());
        assert!(sleeper.sleep_count() > 0);

        launcher.finish(0);
        assert!(muxer.wait_timeout(Duration::from_millis(20)).unwrap());
    }

    #[test]
    fn test_wait_for_output_polls_until_file_appears() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = Arc::new(MockLauncher::running());
        let sleeper = Arc::new(MockSleeper::new());
        let muxer = muxer_with(dir.path(), &launcher, &sleeper);
        muxer.start().unwrap();

        let output = muxer.output().unwrap().to_path_buf();
        sleeper.on_sleep(move || {
            std::fs::write(&output, b"bytes").unwrap();
        });

        assert!(muxer.wait_for_output());
        assert!(sleeper.sleep_count() >= 1);
    }

    #[test]
    fn test_wait_for_output_interrupted() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = Arc::new(MockLauncher::running());
        let sleeper = Arc::new(MockSleeper::interrupting());
        let muxer = muxer_with(dir.path(), &launcher, &sleeper);
        muxer.start().unwrap();

        assert!(!muxer.wait_for_output());
    }

    #[test]
    fn test_wait_for_output_stops_when_merge_fails() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = Arc::new(MockLauncher::running());
        let sleeper = Arc::new(MockSleeper::new());
        let muxer = muxer_with(dir.path(), &launcher, &sleeper);
        muxer.start().unwrap();

        let launcher_ref = launcher.clone();
        sleeper.on_sleep(move || launcher_ref.finish(1));

        assert!(!muxer.wait_for_output());
        assert_eq!(muxer.state(), MuxState::Failed);
    }
}
