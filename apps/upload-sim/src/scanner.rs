//! Turns a directory into upload descriptors.
//!
//! Every regular file below the root becomes one [`FileDescriptor`] whose
//! relative path uses `/` separators and whose MIME type is guessed from the
//! extension. Symlinks are not followed.

use std::path::{Path, PathBuf};

use tracing::trace;

use chunkflow_protocol::FileDescriptor;

use crate::error::SimError;

/// Extension to MIME type. Anything else uploads as `application/octet-stream`.
const MIME_TYPES: &[(&str, &str)] = &[
    ("txt", "text/plain"),
    ("md", "text/markdown"),
    ("csv", "text/csv"),
    ("html", "text/html"),
    ("json", "application/json"),
    ("pdf", "application/pdf"),
    ("zip", "application/zip"),
    ("gz", "application/gzip"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("mp3", "audio/mpeg"),
    ("mp4", "video/mp4"),
];

const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Scans `root`. Returns the descriptors, sorted by relative path, and
/// their total size in bytes.
pub fn scan_dir(root: &Path) -> Result<(Vec<FileDescriptor>, u64), SimError> {
    let mut files = Vec::new();
    let mut pending: Vec<PathBuf> = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let kind = entry.file_type()?;
            let path = entry.path();
            if kind.is_dir() {
                pending.push(path);
            } else if kind.is_file() {
                files.push(describe(root, &path, entry.metadata()?.len())?);
            } else {
                trace!(path = %path.display(), "skipping non-regular entry");
            }
        }
    }

    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    let total_size = files.iter().map(|f| f.size).sum();
    Ok((files, total_size))
}

fn describe(root: &Path, path: &Path, size: u64) -> Result<FileDescriptor, SimError> {
    let relative = path
        .strip_prefix(root)
        .map_err(std::io::Error::other)?
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    Ok(FileDescriptor::new(relative, size).with_mime_type(mime_type(path)))
}

fn mime_type(path: &Path) -> &'static str {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return DEFAULT_MIME_TYPE;
    };
    MIME_TYPES
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(ext))
        .map_or(DEFAULT_MIME_TYPE, |&(_, mime)| mime)
}
