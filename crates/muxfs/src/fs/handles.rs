//! Open-file handle table.
//!
//! Handles are monotonically increasing integers allocated from an atomic
//! counter, so a handle number is never reused for the lifetime of the
//! mount. Low numbers are skipped to stay clear of conventional descriptor
//! values.

use std::collections::HashMap;
use std::fs::File;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// First handle number ever allocated.
const FIRST_HANDLE: u64 = 32;

/// Concurrent table of live file handles.
#[derive(Debug)]
pub struct HandleTable {
    entries: Mutex<HashMap<u64, Arc<File>>>,
    next: AtomicU64,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next: AtomicU64::new(FIRST_HANDLE),
        }
    }

    /// Store an open file and return its freshly allocated handle.
    pub fn insert(&self, file: File) -> u64 {
        let handle = self.next.fetch_add(1, Ordering::SeqCst);
        self.entries.lock().insert(handle, Arc::new(file));
        handle
    }

    /// Look up a live handle.
    pub fn get(&self, handle: u64) -> Option<Arc<File>> {
        self.entries.lock().get(&handle).cloned()
    }

    /// Remove a handle, returning its file if it was live.
    pub fn remove(&self, handle: u64) -> Option<Arc<File>> {
        self.entries.lock().remove(&handle)
    }

    /// Remove and return every remaining entry.
    pub fn drain(&self) -> Vec<(u64, Arc<File>)> {
        self.entries.lock().drain().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
