//! Shared test doubles for the filesystem engine.

use std::collections::HashMap;
use std::io;
use std::path::Path;

use crate::fs::{DirSink, SinkFlow};

/// Sink that records emitted names, optionally refusing after a fixed
/// capacity to simulate buffer exhaustion.
pub(crate) struct VecSink {
    pub entries: Vec<String>,
    pub extra_sizes: HashMap<String, u64>,
    pub capacity: usize,
}

impl VecSink {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            extra_sizes: HashMap::new(),
            capacity: usize::MAX,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::new()
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|entry| entry == name)
    }
}

impl DirSink for VecSink {
    fn entry(&mut self, name: &str, real: &Path) -> io::Result<SinkFlow> {
        self.entry_with_extra_size(name, real, 0)
    }

    fn entry_with_extra_size(
        &mut self,
        name: &str,
        _real: &Path,
        extra_size: u64,
    ) -> io::Result<SinkFlow> {
        if self.entries.len() >= self.capacity {
            return Ok(SinkFlow::Full);
        }
        self.entries.push(name.to_string());
        if extra_size > 0 {
            self.extra_sizes.insert(name.to_string(), extra_size);
        }
        Ok(SinkFlow::More)
    }
}
