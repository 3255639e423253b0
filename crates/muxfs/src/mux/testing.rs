//! Test doubles for the process and timing seams.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::mux::process::{Launch, MuxCommand, MuxProcess, Sleep};

/// Process whose exit code is scripted from the outside.
struct ScriptedProcess {
    exit: Arc<Mutex<Option<i32>>>,
}

impl MuxProcess for ScriptedProcess {
    fn try_wait(&mut self) -> io::Result<Option<i32>> {
        Ok(*self.exit.lock())
    }

    fn wait(&mut self) -> io::Result<i32> {
        loop {
            if let Some(code) = *self.exit.lock() {
                return Ok(code);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

/// Launcher that counts invocations and hands out [`ScriptedProcess`]es
/// sharing one scripted exit code.
pub(crate) struct MockLauncher {
    launches: AtomicUsize,
    fail_launch: bool,
    initial_output: Option<Vec<u8>>,
    exit: Arc<Mutex<Option<i32>>>,
    last_command: Mutex<Option<MuxCommand>>,
}

impl MockLauncher {
    fn new(fail_launch: bool, initial_output: Option<Vec<u8>>) -> Self {
        Self {
            launches: AtomicUsize::new(0),
            fail_launch,
            initial_output,
            exit: Arc::new(Mutex::new(None)),
            last_command: Mutex::new(None),
        }
    }

    /// Launches succeed; processes stay running until [`Self::finish`].
    pub fn running() -> Self {
        Self::new(false, None)
    }

    /// Like [`Self::running`], but each launch writes `bytes` to the
    /// requested output path, simulating the tool starting to produce.
    pub fn writing(bytes: Vec<u8>) -> Self {
        Self::new(false, Some(bytes))
    }

    /// Every launch attempt errors.
    pub fn failing_launch() -> Self {
        Self::new(true, None)
    }

    /// Let every outstanding process exit with `code`.
    pub fn finish(&self, code: i32) {
        *self.exit.lock() = Some(code);
    }

    /// Forget the scripted exit so later launches stay running again.
    pub fn reset(&self) {
        *self.exit.lock() = None;
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// Output path of the most recent launch.
    pub fn last_output(&self) -> Option<std::path::PathBuf> {
        self.last_command
            .lock()
            .as_ref()
            .map(|command| command.output.clone())
    }
}

impl Launch for MockLauncher {
    fn launch(&self, command: &MuxCommand) -> io::Result<Box<dyn MuxProcess>> {
        if self.fail_launch {
            return Err(io::Error::other("scripted launch failure"));
        }
        self.launches.fetch_add(1, Ordering::SeqCst);
        *self.last_command.lock() = Some(command.clone());
        if let Some(bytes) = &self.initial_output {
            std::fs::write(&command.output, bytes)?;
        }
        Ok(Box::new(ScriptedProcess {
            exit: self.exit.clone(),
        }))
    }
}

type SleepHook = Box<dyn FnMut() + Send>;

/// Sleeper that records calls instead of sleeping, with an optional hook
/// run on every call (useful to make progress "during" a sleep).
pub(crate) struct MockSleeper {
    sleeps: Mutex<Vec<Duration>>,
    hook: Mutex<Option<SleepHook>>,
    interrupt: bool,
}

impl MockSleeper {
    pub fn new() -> Self {
        Self {
            sleeps: Mutex::new(Vec::new()),
            hook: Mutex::new(None),
            interrupt: false,
        }
    }

    /// Every sleep reports the thread as interrupted.
    pub fn interrupting() -> Self {
        Self {
            interrupt: true,
            ..Self::new()
        }
    }

    pub fn on_sleep(&self, hook: impl FnMut() + Send + 'static) {
        *self.hook.lock() = Some(Box::new(hook));
    }

    pub fn sleep_count(&self) -> usize {
        self.sleeps.lock().len()
    }
}

impl Sleep for MockSleeper {
    fn sleep(&self, duration: Duration) -> io::Result<()> {
        self.sleeps.lock().push(duration);
        if self.interrupt {
            return Err(io::Error::new(io::ErrorKind::Interrupted, "interrupted"));
        }
        if let Some(hook) = self.hook.lock().as_mut() {
            hook();
        }
        Ok(())
    }
}
