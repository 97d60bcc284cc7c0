//! Crash-safe report writes.
//!
//! Checkpoints and the final result file share one path; every write goes to a
//! temp file in the same directory, is synced, then renamed over the target so
//! readers see either the previous or the new contents, never a torn file.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Temp sibling used for the write: `<name>.tmp.<pid>.<nanos>`
///
/// # Arguments
///
/// * `target` - Final destination of the write
pub fn temp_path(target: &Path) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);

    let mut tmp = target.as_os_str().to_owned();
    tmp.push(format!(".tmp.{}.{}", std::process::id(), nanos));
    PathBuf::from(tmp)
}

/// Write `contents` to `target` atomically.
///
/// Creates the parent directory if needed. On failure the temp file is
/// removed and the previous contents of `target` stay untouched.
pub fn write_atomic(target: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let tmp = temp_path(target);
    let result = (|| {
        let mut file = File::create(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
        fs::rename(&tmp, target)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}
