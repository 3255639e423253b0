//! Container/subtitle filename pairing.
//!
//! A subtitle pairs with a container iff the subtitle's filename, compared
//! case-insensitively, starts with the container's base name (the container
//! filename with its extension stripped). Multiple subtitles may match one
//! container; their sizes sum. This rule is relied on elsewhere and must
//! not drift.

use std::path::Path;

use tracing::{debug, trace};

/// Extensions treated as video containers eligible for merging.
pub const CONTAINER_EXTENSIONS: &[&str] = &["mkv"];

/// Extensions treated as external subtitle files.
pub const SUBTITLE_EXTENSIONS: &[&str] = &["srt"];

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.iter().any(|e| ext.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

/// Is this a video container by extension?
pub fn is_container(path: &Path) -> bool {
    has_extension(path, CONTAINER_EXTENSIONS)
}

/// Is this a subtitle file by extension?
pub fn is_subtitle(path: &Path) -> bool {
    has_extension(path, SUBTITLE_EXTENSIONS)
}

/// Lowercased container filename with its extension stripped.
fn container_stem(container: &Path) -> Option<String> {
    container
        .file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_lowercase)
}

/// Does `subtitle` pair with `container` under the prefix rule?
pub fn matches(container: &Path, subtitle: &Path) -> bool {
    let Some(stem) = container_stem(container) else {
        return false;
    };
    subtitle
        .file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.to_lowercase().starts_with(&stem))
        .unwrap_or(false)
}

/// Remove every subtitle matching `container` from `subtitles` and return
/// the sum of their sizes. A stat failure contributes nothing; size
/// inflation is non-critical.
pub fn claim_matching(container: &Path, subtitles: &mut Vec<std::path::PathBuf>) -> u64 {
    let mut extra = 0;
    subtitles.retain(|subtitle| {
        if !matches(container, subtitle) {
            return true;
        }
        debug!(
            subtitle = %subtitle.display(),
            container = %container.display(),
            "hiding matched subtitle"
        );
        match std::fs::metadata(subtitle) {
            Ok(meta) => extra += meta.len(),
            Err(err) => trace!(%err, "ignoring unreadable subtitle size"),
        }
        false
    });
    extra
}

/// What pairing found for one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchSummary {
    /// First matching subtitle in lexical order; the one handed to the
    /// merge tool.
    pub first: std::path::PathBuf,
    /// Summed size of every matching subtitle, the readdir/getattr size
    /// inflation.
    pub extra_size: u64,
}

/// Scan the container's siblings for matching subtitles.
///
/// Fresh scan on every call, nothing persisted. Returns `None` when no
/// subtitle pairs with the container; enumeration or stat errors degrade to
/// "no match" / zero size rather than failing the caller, since the
/// inflation is non-critical.
pub fn summarize_matches(container: &Path) -> Option<MatchSummary> {
    let parent = container.parent()?;
    let entries = match std::fs::read_dir(parent) {
        Ok(entries) => entries,
        Err(err) => {
            trace!(%err, "ignoring unreadable directory while matching subtitles");
            return None;
        }
    };
    let mut matched: Vec<std::path::PathBuf> = Vec::new();
    let mut extra = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if is_subtitle(&path) && matches(container, &path) {
            match entry.metadata() {
                Ok(meta) => extra += meta.len(),
                Err(err) => trace!(%err, "ignoring unreadable subtitle size"),
            }
            matched.push(path);
        }
    }
    matched.sort();
    matched.into_iter().next().map(|first| MatchSummary {
        first,
        extra_size: extra,
    })
}
