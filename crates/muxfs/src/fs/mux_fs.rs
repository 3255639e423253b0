//! Mux-aware filesystem orchestrator.
//!
//! Wraps a [`MirrorFs`] and substitutes, for every container with a
//! matching subtitle beside it, the output of an external merge. The
//! substitution is decided fresh per operation; nothing about pairing is
//! persisted.
//!
//! # Registries
//!
//! One `MuxFs` owns all mutable state for its mount:
//!
//! - the in-flight map, keyed by [`FileIdentity`], whose install-if-absent
//!   is the single point collapsing concurrent opens onto one merge
//! - the muxed-open table, handle -> live merge reference
//! - the completed cache, bounded by summed source size in megabytes and a
//!   TTL, so a rapid close/reopen skips re-merging

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::config::MuxCacheConfig;
use crate::error::FsError;
use crate::fs::pairing;
use crate::fs::{DirSink, FileIdentity, FileStat, MirrorFs, PathFs, SinkFlow};
use crate::mux::{MuxState, Muxer, MuxerFactory, Sleep, MUX_POLL_INTERVAL};

/// Bounded wait right after launching a merge, so a tool that dies
/// immediately is caught at open time instead of at first read.
const EARLY_FAILURE_WAIT: Duration = Duration::from_millis(50);

const MEGABYTE: u64 = 1024 * 1024;

/// A live file handle backed by a (possibly still running) merge.
#[derive(Clone)]
struct MuxedFile {
    identity: FileIdentity,
    muxer: Arc<Muxer>,
}

/// Snapshot of registry occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MuxRegistryStats {
    pub in_flight: usize,
    pub open_muxed: usize,
    pub completed: u64,
}

pub struct MuxFs {
    mirror: MirrorFs,
    factory: MuxerFactory,
    sleeper: Arc<dyn Sleep>,
    in_flight: Mutex<HashMap<FileIdentity, Arc<Muxer>>>,
    open_muxed: Arc<Mutex<HashMap<u64, MuxedFile>>>,
    completed: Cache<FileIdentity, Arc<Muxer>>,
}

impl MuxFs {
    pub fn new(
        source: PathBuf,
        factory: MuxerFactory,
        sleeper: Arc<dyn Sleep>,
        cache: MuxCacheConfig,
    ) -> Self {
        let open_muxed: Arc<Mutex<HashMap<u64, MuxedFile>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let listener_handles = open_muxed.clone();
        let completed = Cache::builder()
            .max_capacity(cache.max_size_mb as u64)
            .time_to_live(Duration::from_secs(cache.ttl_secs as u64))
            .weigher(|identity: &FileIdentity, _: &Arc<Muxer>| {
                (identity.size() / MEGABYTE).clamp(1, u32::MAX as u64) as u32
            })
            .eviction_listener(move |_identity, muxer: Arc<Muxer>, cause| {
                // The check is racy: a reopen may grab this muxer right
                // after we look. Accepted; the worst case is a redundant
                // re-merge later, never a deleted file under a live handle.
                let still_open = listener_handles
                    .lock()
                    .values()
                    .any(|open| Arc::ptr_eq(&open.muxer, &muxer));
                if still_open {
                    debug!(?cause, "evicted merge is still open, keeping its output");
                } else {
                    debug!(?cause, "evicted merge, deleting its output");
                    muxer.delete_output();
                }
            })
            .build();

        Self {
            mirror: MirrorFs::new(source),
            factory,
            sleeper,
            in_flight: Mutex::new(HashMap::new()),
            open_muxed,
            completed,
        }
    }

    pub fn stats(&self) -> MuxRegistryStats {
        MuxRegistryStats {
            in_flight: self.in_flight.lock().len(),
            open_muxed: self.open_muxed.lock().len(),
            completed: self.completed.entry_count(),
        }
    }

    /// Drop completed entries recorded for this container under a previous
    /// identity.
    ///
    /// The cache key is the identity itself, so a changed file can never
    /// hit an old entry; this sweep just keeps superseded outputs from
    /// sitting on disk for a full TTL.
    fn drop_stale_completed(&self, container: &Path, identity: FileIdentity) {
        let stale: Vec<FileIdentity> = self
            .completed
            .iter()
            .filter(|(key, muxer)| muxer.container() == container && **key != identity)
            .map(|(key, _)| *key)
            .collect();
        for key in stale {
            debug!(container = %container.display(), "dropping superseded merge");
            self.completed.invalidate(&key);
        }
    }

    /// Remove `muxer` from the in-flight map, but only if it is still the
    /// registered task for `identity`.
    fn remove_in_flight(&self, identity: &FileIdentity, muxer: &Arc<Muxer>) {
        let mut in_flight = self.in_flight.lock();
        if in_flight
            .get(identity)
            .is_some_and(|current| Arc::ptr_eq(current, muxer))
        {
            in_flight.remove(identity);
        }
    }

    /// Open the merge output through the mirror layer and register the
    /// muxed handle.
    fn open_muxed_output(
        &self,
        muxer: &Arc<Muxer>,
        identity: FileIdentity,
    ) -> Result<u64, FsError> {
        let output = muxer.output().ok_or(FsError::Io)?.to_path_buf();
        let handle = self.mirror.open_real(&output)?;
        self.open_muxed.lock().insert(
            handle,
            MuxedFile {
                identity,
                muxer: muxer.clone(),
            },
        );
        Ok(handle)
    }

    /// Drop a muxed handle after a read-time failure: the task is gone from
    /// both registries and the mirror handle is closed.
    fn abandon_muxed_handle(&self, handle: u64, muxed: &MuxedFile) {
        self.remove_in_flight(&muxed.identity, &muxed.muxer);
        self.open_muxed.lock().remove(&handle);
        if let Err(err) = self.mirror.release(handle) {
            trace!(handle, ?err, "failed to release abandoned handle");
        }
    }
}

impl PathFs for MuxFs {
    fn name(&self) -> &str {
        "muxfs"
    }

    fn getattr(&self, path: &Path) -> Result<FileStat, FsError> {
        let real = self.mirror.real(path);
        if !pairing::is_container(&real) {
            return self.mirror.getattr(path);
        }
        let Some(summary) = pairing::summarize_matches(&real) else {
            return self.mirror.getattr(path);
        };
        let stat = self.mirror.getattr(path)?;
        // A finished merge knows its true size; before that, anticipate the
        // output growing by at least the subtitle bytes.
        if let Ok(identity) = FileIdentity::of(&real) {
            if let Some(output_size) = self
                .completed
                .get(&identity)
                .and_then(|muxer| muxer.output().map(Path::to_path_buf))
                .and_then(|output| std::fs::metadata(output).ok())
                .map(|meta| meta.len())
            {
                let mut stat = stat;
                stat.size = output_size;
                return Ok(stat);
            }
        }
        Ok(stat.with_extra_size(summary.extra_size))
    }

    fn readdir(&self, path: &Path, sink: &mut dyn DirSink) -> Result<(), FsError> {
        debug!(path = %path.display(), "readdir");
        let real = self.mirror.real(path);
        self.mirror.emit_dot_entries(&real, sink);

        // Partition the listing, holding containers and subtitles back for
        // pairing; everything else streams straight through.
        let mut containers: Vec<PathBuf> = Vec::new();
        let mut subtitles: Vec<PathBuf> = Vec::new();
        for entry in std::fs::read_dir(&real)? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    trace!(%err, "skipping unreadable entry");
                    continue;
                }
            };
            let entry_path = entry.path();
            if pairing::is_container(&entry_path) {
                containers.push(entry_path);
            } else if pairing::is_subtitle(&entry_path) {
                subtitles.push(entry_path);
            } else if self.mirror.emit(sink, &entry_path) == SinkFlow::Full {
                return Ok(());
            }
        }

        // Each container absorbs its matching subtitles and reports their
        // summed size on top of its own.
        for container in containers {
            let extra = pairing::claim_matching(&container, &mut subtitles);
            if self.mirror.emit_with_extra_size(sink, &container, extra) == SinkFlow::Full {
                return Ok(());
            }
        }

        // Whatever matched nothing is listed unchanged.
        for subtitle in subtitles {
            if self.mirror.emit(sink, &subtitle) == SinkFlow::Full {
                return Ok(());
            }
        }
        Ok(())
    }

    fn readlink(&self, path: &Path) -> Result<PathBuf, FsError> {
        self.mirror.readlink(path)
    }

    fn open(&self, path: &Path) -> Result<u64, FsError> {
        debug!(path = %path.display(), "open");
        let real = self.mirror.real(path);
        if !pairing::is_container(&real) {
            return self.mirror.open(path);
        }
        let Some(summary) = pairing::summarize_matches(&real) else {
            return self.mirror.open(path);
        };
        let identity = match FileIdentity::of(&real) {
            Ok(identity) => identity,
            Err(err) => {
                warn!(path = %real.display(), %err, "cannot identify container, serving it plain");
                return self.mirror.open(path);
            }
        };

        self.drop_stale_completed(&real, identity);

        // Fast path: an unchanged file that was merged recently.
        if let Some(muxer) = self.completed.get(&identity) {
            match self.open_muxed_output(&muxer, identity) {
                Ok(handle) => return Ok(handle),
                Err(err) => {
                    info!(%err, container = %real.display(), "cached merge unusable, serving original");
                    self.completed.invalidate(&identity);
                    muxer.delete_output();
                    return self.mirror.open(path);
                }
            }
        }

        // Single serialization point: racing opens of the same identity
        // collapse onto one merge task.
        let muxer = self
            .in_flight
            .lock()
            .entry(identity)
            .or_insert_with(|| Arc::new(self.factory.create(real.clone(), summary.first.clone())))
            .clone();

        if let Err(err) = muxer.start() {
            warn!(%err, container = %real.display(), "merge failed to launch, serving original");
            self.remove_in_flight(&identity, &muxer);
            return self.mirror.open(path);
        }

        match muxer.wait_timeout(EARLY_FAILURE_WAIT) {
            Ok(_) => {}
            Err(err) => {
                info!(%err, "interrupted while opening");
                return Err(FsError::Interrupted);
            }
        }
        if muxer.state() == MuxState::Failed {
            info!(container = %real.display(), "merge died early, serving original");
            self.remove_in_flight(&identity, &muxer);
            return self.mirror.open(path);
        }

        if !muxer.wait_for_output() {
            info!(container = %real.display(), "merge produced no output, serving original");
            self.remove_in_flight(&identity, &muxer);
            return self.mirror.open(path);
        }

        match self.open_muxed_output(&muxer, identity) {
            Ok(handle) => Ok(handle),
            Err(err) => {
                warn!(%err, container = %real.display(), "cannot open merge output, serving original");
                self.remove_in_flight(&identity, &muxer);
                muxer.delete_output();
                self.mirror.open(path)
            }
        }
    }

    fn read(&self, handle: u64, size: u32, offset: u64) -> Result<Vec<u8>, FsError> {
        let Some(muxed) = self.open_muxed.lock().get(&handle).cloned() else {
            return self.mirror.read(handle, size, offset);
        };
        let end = offset + size as u64;
        loop {
            match muxed.muxer.state() {
                MuxState::Successful => return self.mirror.read(handle, size, offset),
                MuxState::Failed | MuxState::NotStarted => {
                    warn!(handle, "merge failed under a live handle");
                    self.abandon_muxed_handle(handle, &muxed);
                    return Err(FsError::Io);
                }
                MuxState::Running => {
                    // Serve as soon as the output covers the requested
                    // range; otherwise wait for the merge to catch up. The
                    // wait is unbounded: a truncated read would be a
                    // correctness bug, a slow one is not.
                    let produced = muxed
                        .muxer
                        .output()
                        .and_then(|output| std::fs::metadata(output).ok())
                        .map(|meta| meta.len())
                        .unwrap_or(0);
                    if produced >= end {
                        return self.mirror.read(handle, size, offset);
                    }
                    if let Err(err) = self.sleeper.sleep(MUX_POLL_INTERVAL) {
                        info!(%err, handle, "interrupted during catch-up wait");
                        return Err(FsError::Interrupted);
                    }
                }
            }
        }
    }

    fn release(&self, handle: u64) -> Result<(), FsError> {
        debug!(handle, "release");
        let muxed = self.open_muxed.lock().remove(&handle);
        let result = self.mirror.release(handle);
        if let Some(muxed) = muxed {
            let still_open = self
                .open_muxed
                .lock()
                .values()
                .any(|open| Arc::ptr_eq(&open.muxer, &muxed.muxer));
            if !still_open {
                self.remove_in_flight(&muxed.identity, &muxed.muxer);
                if muxed.muxer.state() == MuxState::Failed {
                    muxed.muxer.delete_output();
                } else {
                    // Park the finished merge so an immediate reopen (a
                    // player probing the file) skips the whole dance.
                    self.completed.insert(muxed.identity, muxed.muxer);
                }
            }
        }
        result
    }

    fn destroy(&self) {
        info!("tearing down");
        self.open_muxed.lock().clear();
        let in_flight: Vec<(FileIdentity, Arc<Muxer>)> =
            self.in_flight.lock().drain().collect();
        for (_, muxer) in in_flight {
            muxer.delete_output();
        }
        self.completed.invalidate_all();
        self.completed.run_pending_tasks();
        self.mirror.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::testing::VecSink;
    use crate::mux::testing::{MockLauncher, MockSleeper};
    use tempfile::TempDir;

    struct Fixture {
        source: TempDir,
        _work: TempDir,
        fs: MuxFs,
        launcher: Arc<MockLauncher>,
        sleeper: Arc<MockSleeper>,
    }

    fn fixture_with_cache(cache: MuxCacheConfig) -> Fixture {
        let source = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let launcher = Arc::new(MockLauncher::writing(b"merged-output".to_vec()));
        let sleeper = Arc::new(MockSleeper::new());
        let factory = MuxerFactory::new(
            work.path().to_path_buf(),
            launcher.clone(),
            sleeper.clone(),
        );
        let fs = MuxFs::new(
            source.path().to_path_buf(),
            factory,
            sleeper.clone(),
            cache,
        );
        Fixture {
            source,
            _work: work,
            fs,
            launcher,
            sleeper,
        }
    }

    fn fixture() -> Fixture {
        fixture_with_cache(MuxCacheConfig::default())
    }

    impl Fixture {
        fn add_movie(&self, name: &str, video: &[u8], subtitle_sizes: &[u64]) {
            let stem = name.strip_suffix(".mkv").unwrap();
            std::fs::write(self.source.path().join(name), video).unwrap();
            for (index, size) in subtitle_sizes.iter().enumerate() {
                let subtitle = format!("{stem}.{index}.srt");
                std::fs::write(self.source.path().join(subtitle), vec![b's'; *size as usize])
                    .unwrap();
            }
        }
    }

    #[test]
    fn test_readdir_hides_matched_subtitles_and_inflates_size() {
        let fx = fixture();
        fx.add_movie("Movie.mkv", b"12345", &[7, 9]);
        std::fs::write(fx.source.path().join("Other.srt"), b"abc").unwrap();
        std::fs::write(fx.source.path().join("notes.txt"), b"n").unwrap();

        let mut sink = VecSink::new();
        fx.fs.readdir(Path::new("/"), &mut sink).unwrap();

        assert_eq!(&sink.entries[..2], &[".".to_string(), "..".to_string()]);
        assert!(sink.contains("Movie.mkv"));
        assert!(sink.contains("notes.txt"));
        assert!(sink.contains("Other.srt"));
        assert!(!sink.contains("Movie.0.srt"));
        assert!(!sink.contains("Movie.1.srt"));
        assert_eq!(sink.extra_sizes.get("Movie.mkv"), Some(&16));
    }

    #[test]
    fn test_readdir_case_insensitive_pairing() {
        let fx = fixture();
        std::fs::write(fx.source.path().join("My Movie.mkv"), b"v").unwrap();
        std::fs::write(fx.source.path().join("MY MOVIE.en.srt"), b"sub").unwrap();

        let mut sink = VecSink::new();
        fx.fs.readdir(Path::new("/"), &mut sink).unwrap();

        assert!(sink.contains("My Movie.mkv"));
        assert!(!sink.contains("MY MOVIE.en.srt"));
        assert_eq!(sink.extra_sizes.get("My Movie.mkv"), Some(&3));
    }

    #[test]
    fn test_getattr_inflates_by_subtitle_sum() {
        let fx = fixture();
        fx.add_movie("Movie.mkv", b"12345", &[7, 9]);
        std::fs::write(fx.source.path().join("plain.txt"), b"abc").unwrap();

        let stat = fx.fs.getattr(Path::new("/Movie.mkv")).unwrap();
        assert_eq!(stat.size, 5 + 16);

        let stat = fx.fs.getattr(Path::new("/plain.txt")).unwrap();
        assert_eq!(stat.size, 3);
    }

    #[test]
    fn test_getattr_unmatched_container_is_plain() {
        let fx = fixture();
        std::fs::write(fx.source.path().join("Lonely.mkv"), b"12345").unwrap();

        let stat = fx.fs.getattr(Path::new("/Lonely.mkv")).unwrap();
        assert_eq!(stat.size, 5);
    }

    #[test]
    fn test_getattr_uses_actual_size_once_merged() {
        let fx = fixture();
        fx.add_movie("Movie.mkv", b"12345", &[7]);
        fx.launcher.finish(0);

        let handle = fx.fs.open(Path::new("/Movie.mkv")).unwrap();
        fx.fs.release(handle).unwrap();

        // "merged-output" is 13 bytes; the estimate would say 12.
        let stat = fx.fs.getattr(Path::new("/Movie.mkv")).unwrap();
        assert_eq!(stat.size, 13);
    }

    #[test]
    fn test_open_without_match_delegates() {
        let fx = fixture();
        std::fs::write(fx.source.path().join("Lonely.mkv"), b"original").unwrap();

        let handle = fx.fs.open(Path::new("/Lonely.mkv")).unwrap();
        assert_eq!(fx.fs.read(handle, 100, 0).unwrap(), b"original");
        assert_eq!(fx.launcher.launches(), 0);
        fx.fs.release(handle).unwrap();
    }

    #[test]
    fn test_concurrent_opens_share_one_merge() {
        let fx = fixture();
        fx.add_movie("Movie.mkv", b"12345", &[7]);

        let first = fx.fs.open(Path::new("/Movie.mkv")).unwrap();
        let second = fx.fs.open(Path::new("/Movie.mkv")).unwrap();

        assert_ne!(first, second);
        assert_eq!(fx.launcher.launches(), 1);
        assert_eq!(fx.fs.stats().in_flight, 1);
        assert_eq!(fx.fs.stats().open_muxed, 2);

        fx.launcher.finish(0);
        assert_eq!(fx.fs.read(first, 100, 0).unwrap(), b"merged-output");
        assert_eq!(fx.fs.read(second, 6, 7).unwrap(), b"output");

        fx.fs.release(first).unwrap();
        fx.fs.release(second).unwrap();
        assert_eq!(fx.fs.stats().open_muxed, 0);
        assert_eq!(fx.fs.stats().in_flight, 0);
    }

    #[test]
    fn test_open_launch_failure_serves_original() {
        let source = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let launcher = Arc::new(MockLauncher::failing_launch());
        let sleeper = Arc::new(MockSleeper::new());
        let factory =
            MuxerFactory::new(work.path().to_path_buf(), launcher.clone(), sleeper.clone());
        let fs = MuxFs::new(
            source.path().to_path_buf(),
            factory,
            sleeper,
            MuxCacheConfig::default(),
        );
        std::fs::write(source.path().join("Movie.mkv"), b"original").unwrap();
        std::fs::write(source.path().join("Movie.srt"), b"sub").unwrap();

        let handle = fs.open(Path::new("/Movie.mkv")).unwrap();
        assert_eq!(fs.read(handle, 100, 0).unwrap(), b"original");
        assert_eq!(fs.stats().in_flight, 0);
        assert_eq!(fs.stats().open_muxed, 0);
        fs.release(handle).unwrap();
    }

    #[test]
    fn test_read_blocks_until_output_catches_up() {
        let fx = fixture();
        fx.add_movie("Movie.mkv", b"12345", &[7]);

        let handle = fx.fs.open(Path::new("/Movie.mkv")).unwrap();
        let output = fx.launcher.last_output().unwrap();

        // A range the 13 launch bytes already cover comes back without a
        // single sleep.
        let before = fx.sleeper.sleep_count();
        assert_eq!(fx.fs.read(handle, 13, 0).unwrap(), b"merged-output");
        assert_eq!(fx.sleeper.sleep_count(), before);

        // A range past the produced bytes waits until the file grows.
        let grown = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let grown_flag = grown.clone();
        fx.sleeper.on_sleep(move || {
            std::fs::write(&output, b"merged-output-and-then-some").unwrap();
            grown_flag.store(true, std::sync::atomic::Ordering::SeqCst);
        });
        let bytes = fx.fs.read(handle, 14, 13).unwrap();
        assert_eq!(bytes, b"-and-then-some");
        assert!(grown.load(std::sync::atomic::Ordering::SeqCst));
        assert!(fx.sleeper.sleep_count() > before);

        fx.fs.release(handle).unwrap();
    }

    #[test]
    fn test_failed_merge_fails_reads_and_forgets_task() {
        let fx = fixture();
        fx.add_movie("Movie.mkv", b"12345", &[7]);

        let handle = fx.fs.open(Path::new("/Movie.mkv")).unwrap();
        fx.launcher.finish(2);

        assert_eq!(fx.fs.read(handle, 4, 0), Err(FsError::Io));
        assert_eq!(fx.fs.stats().in_flight, 0);
        assert_eq!(fx.fs.stats().open_muxed, 0);
        // The handle went with the task.
        assert!(fx.fs.read(handle, 4, 0).is_err());

        // A fresh open must not resurrect the failed task.
        fx.launcher.reset();
        let handle = fx.fs.open(Path::new("/Movie.mkv")).unwrap();
        assert_eq!(fx.launcher.launches(), 2);
        fx.launcher.finish(0);
        assert_eq!(fx.fs.read(handle, 13, 0).unwrap(), b"merged-output");
        fx.fs.release(handle).unwrap();
    }

    #[test]
    fn test_reopen_unchanged_file_skips_remerge() {
        let fx = fixture();
        fx.add_movie("Movie.mkv", b"12345", &[7]);
        fx.launcher.finish(0);

        let handle = fx.fs.open(Path::new("/Movie.mkv")).unwrap();
        fx.fs.release(handle).unwrap();
        assert_eq!(fx.fs.stats().in_flight, 0);

        let handle = fx.fs.open(Path::new("/Movie.mkv")).unwrap();
        assert_eq!(fx.launcher.launches(), 1);
        assert_eq!(fx.fs.read(handle, 13, 0).unwrap(), b"merged-output");
        fx.fs.release(handle).unwrap();
    }

    #[test]
    fn test_changed_file_forces_fresh_merge() {
        let fx = fixture();
        fx.add_movie("Movie.mkv", b"12345", &[7]);
        fx.launcher.finish(0);

        let handle = fx.fs.open(Path::new("/Movie.mkv")).unwrap();
        fx.fs.release(handle).unwrap();
        let old_output = fx.launcher.last_output().unwrap();
        assert_eq!(fx.launcher.launches(), 1);

        // Change the file contents (and so its identity).
        std::fs::write(fx.source.path().join("Movie.mkv"), b"different bytes").unwrap();

        let handle = fx.fs.open(Path::new("/Movie.mkv")).unwrap();
        assert_eq!(fx.launcher.launches(), 2);
        fx.fs.release(handle).unwrap();

        // The superseded merge was swept out and its output removed.
        fx.fs.completed.run_pending_tasks();
        assert!(!old_output.exists());
    }

    #[test]
    fn test_eviction_deletes_some_but_not_all_outputs() {
        // Weight is source megabytes (min 1 per entry); four entries
        // against a budget of two must evict something and keep something.
        let fx = fixture_with_cache(MuxCacheConfig {
            max_size_mb: 2,
            ttl_secs: 3600,
        });
        fx.launcher.finish(0);

        let mut outputs = Vec::new();
        for name in ["A.mkv", "B.mkv", "C.mkv", "D.mkv"] {
            fx.add_movie(name, b"12345", &[3]);
            let virtual_path = format!("/{name}");
            let handle = fx.fs.open(Path::new(&virtual_path)).unwrap();
            outputs.push(fx.launcher.last_output().unwrap());
            fx.fs.release(handle).unwrap();
        }

        fx.fs.completed.run_pending_tasks();
        let deleted = outputs.iter().filter(|output| !output.exists()).count();
        assert!(deleted >= 1, "budget overflow must evict at least one");
        assert!(deleted < outputs.len(), "eviction must not clear the cache");
    }

    #[test]
    fn test_release_unknown_handle() {
        let fx = fixture();
        assert_eq!(fx.fs.release(4242), Err(FsError::BadHandle));
    }

    #[test]
    fn test_destroy_deletes_outputs_and_clears_registries() {
        let fx = fixture();
        fx.add_movie("Movie.mkv", b"12345", &[7]);
        fx.add_movie("Short.mkv", b"123", &[2]);
        fx.launcher.finish(0);

        let open_handle = fx.fs.open(Path::new("/Movie.mkv")).unwrap();
        let first_output = fx.launcher.last_output().unwrap();
        let released = fx.fs.open(Path::new("/Short.mkv")).unwrap();
        let second_output = fx.launcher.last_output().unwrap();
        fx.fs.release(released).unwrap();
        let _ = open_handle;

        fx.fs.destroy();
        fx.fs.completed.run_pending_tasks();

        assert!(!first_output.exists());
        assert!(!second_output.exists());
        let stats = fx.fs.stats();
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.open_muxed, 0);
    }

    #[test]
    fn test_readlink_delegates() {
        let fx = fixture();
        std::fs::write(fx.source.path().join("real.txt"), b"x").unwrap();
        std::os::unix::fs::symlink("real.txt", fx.source.path().join("link")).unwrap();

        assert_eq!(
            fx.fs.readlink(Path::new("/link")).unwrap(),
            PathBuf::from("real.txt")
        );
    }
}
