//! Filesystem helpers shared by both pipelines.
//!
//! Extraction writes `{prefix}{n:03}.{ext}`; encoding lists a directory in
//! file-name order. Zero-padding keeps the two orders identical.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::FrameCodecError;

/// File name of the `number`-th persisted frame (1-based).
///
/// # Example
///
/// ```
/// assert_eq!(framecodec::files::frame_file_name("image_", 2, "jpg"), "image_002.jpg");
/// ```
pub fn frame_file_name(prefix: &str, number: usize, extension: &str) -> String {
    format!("{prefix}{number:03}.{extension}")
}

/// Regular files in `directory`, sorted by file name.
pub fn list_frames(directory: &Path) -> Result<Vec<PathBuf>, FrameCodecError> {
    let mut frames = Vec::new();
    for entry in fs::read_dir(directory)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            frames.push(entry.path());
        }
    }
    frames.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(frames)
}

/// Recursively delete `directory`, logging instead of failing.
///
/// Returns whether the directory is gone.
pub fn remove_directory(directory: &Path) -> bool {
    match fs::remove_dir_all(directory) {
        Ok(()) => true,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => true,
        Err(error) => {
            log::warn!("Failed to delete {}: {error}", directory.display());
            false
        }
    }
}
