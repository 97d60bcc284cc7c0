//! Scanner for discovering video files under local directories.
//!
//! Feeds the validator when a directory is given as a validation target.

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Video file extensions recognised by the scanner (case-insensitive matching).
pub const VIDEO_EXTENSIONS: &[&str] = &[
    ".mp4", ".m4v", ".mov", ".mkv", ".webm", ".avi", ".ts", ".m2ts",
];

/// Checks if a file has a video extension (case-insensitive).
pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext_lower = format!(".{}", ext.to_lowercase());
            VIDEO_EXTENSIONS.contains(&ext_lower.as_str())
        })
        .unwrap_or(false)
}

/// Scans the given roots for video files.
///
/// - Recursively walks each root directory
/// - Skips hidden directories (names starting with `.`), but never the root itself
/// - Keeps files with a recognised video extension
///
/// Missing roots are skipped. The result is sorted so repeated scans report in
/// the same order.
pub fn scan_media(roots: &[PathBuf]) -> Vec<PathBuf> {
    let mut found = Vec::new();

    for root in roots {
        if !root.exists() {
            tracing::warn!(root = %root.display(), "Scan root does not exist");
            continue;
        }

        let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
            if entry.depth() == 0 || !entry.file_type().is_dir() {
                return true;
            }
            !entry
                .file_name()
                .to_str()
                .map_or(false, |name| name.starts_with('.'))
        });

        for entry in walker.filter_map(|e| e.ok()) {
            if entry.file_type().is_file() && is_video_file(entry.path()) {
                found.push(entry.into_path());
            }
        }
    }

    found.sort();
    found.dedup();
    tracing::debug!(files = found.len(), "Scan finished");
    found
}
