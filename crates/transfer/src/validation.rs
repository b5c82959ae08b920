use crate::TransferError;

/// Normalizes a relative upload path to `/`-separated segments.
///
/// Backslashes become `/`, `.` and empty segments are dropped. Rejects:
/// - Empty paths (or paths with no file name left)
/// - Absolute paths (`/tmp/x`, `C:/x`)
/// - Parent directory traversal (`..`)
pub fn normalize_relative_path(file_path: &str) -> Result<String, TransferError> {
    if file_path.is_empty() {
        return Err(TransferError::InvalidPath("empty path".into()));
    }

    let unified = file_path.replace('\\', "/");
    if unified.starts_with('/') || has_drive_prefix(&unified) {
        return Err(TransferError::InvalidPath(format!(
            "absolute path not allowed: {file_path}"
        )));
    }

    let mut segments = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                return Err(TransferError::InvalidPath(format!(
                    "parent directory traversal not allowed: {file_path}"
                )));
            }
            s => segments.push(s),
        }
    }

    if segments.is_empty() || unified.ends_with('/') {
        return Err(TransferError::InvalidPath(format!(
            "path has no file name: {file_path}"
        )));
    }

    Ok(segments.join("/"))
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Ancestor folder paths of a normalized file path, shortest first.
///
/// `a/b/c.txt` yields `["a/", "a/b/"]`; a bare file name yields nothing.
pub fn ancestor_paths(path: &str) -> Vec<String> {
    let mut out = Vec::new();
    for (i, ch) in path.char_indices() {
        if ch == '/' {
            out.push(path[..=i].to_string());
        }
    }
    out
}
