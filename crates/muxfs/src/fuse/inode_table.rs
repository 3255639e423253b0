//! Bidirectional inode ↔ virtual-path mapping.
//!
//! The kernel addresses files by 64-bit inode numbers while the engine is
//! path-addressed; this table bridges the two. Inodes are handed out from
//! an atomic counter and, on this read-only filesystem, stay valid for the
//! lifetime of the mount.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Bidirectional mapping between inode numbers and virtual paths.
#[derive(Debug)]
pub struct InodeTable {
    path_to_inode: HashMap<String, u64>,
    inode_to_path: HashMap<u64, String>,
    next_inode: AtomicU64,
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeTable {
    /// The root directory's inode, fixed by the protocol.
    pub const ROOT_INODE: u64 = 1;

    pub fn new() -> Self {
        let mut table = Self {
            path_to_inode: HashMap::new(),
            inode_to_path: HashMap::new(),
            next_inode: AtomicU64::new(2),
        };
        table.path_to_inode.insert("/".to_string(), Self::ROOT_INODE);
        table.inode_to_path.insert(Self::ROOT_INODE, "/".to_string());
        table
    }

    /// Inode for a path, allocating one on first sight.
    pub fn get_or_create(&mut self, path: &str) -> u64 {
        let normalized = Self::normalize(path);
        if let Some(&inode) = self.path_to_inode.get(&normalized) {
            return inode;
        }
        let inode = self.next_inode.fetch_add(1, Ordering::SeqCst);
        self.path_to_inode.insert(normalized.clone(), inode);
        self.inode_to_path.insert(inode, normalized);
        inode
    }

    /// Path for a known inode.
    pub fn path(&self, inode: u64) -> Option<&str> {
        self.inode_to_path.get(&inode).map(String::as_str)
    }

    /// Inode for a path, if one was allocated.
    pub fn inode(&self, path: &str) -> Option<u64> {
        self.path_to_inode.get(&Self::normalize(path)).copied()
    }

    /// Virtual path of `name` inside the directory `parent`.
    pub fn child_path(parent: &str, name: &str) -> String {
        let parent = Self::normalize(parent);
        if parent == "/" {
            format!("/{name}")
        } else {
            format!("{parent}/{name}")
        }
    }

    /// Virtual path of the directory containing `path`.
    pub fn parent_path(path: &str) -> String {
        let normalized = Self::normalize(path);
        match normalized.rfind('/') {
            Some(0) | None => "/".to_string(),
            Some(pos) => normalized[..pos].to_string(),
        }
    }

    /// Leading slash, no trailing slash, root spelled `/`.
    fn normalize(path: &str) -> String {
        let path = path.trim();
        if path.is_empty() || path == "/" {
            return "/".to_string();
        }
        let mut normalized = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        if normalized.len() > 1 && normalized.ends_with('/') {
            normalized.pop();
        }
        normalized
    }
}
