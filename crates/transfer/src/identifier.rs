//! File fingerprinting.
//!
//! The fingerprint becomes the file's `unique_identifier`, which servers use
//! to match chunks of the same file across requests and sessions.

use sha2::{Digest, Sha256};

use chunkflow_protocol::FileDescriptor;

/// Produces a stable identifier for a file.
pub trait Identifier: Send + Sync {
    fn fingerprint(&self, descriptor: &FileDescriptor) -> String;
}

/// `"{size}-{path}"` with every character outside `[0-9A-Za-z_-]` dropped
/// from the path.
#[derive(Debug, Default, Clone, Copy)]
pub struct SizePathIdentifier;

impl Identifier for SizePathIdentifier {
    fn fingerprint(&self, descriptor: &FileDescriptor) -> String {
        let path: String = descriptor
            .effective_path()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        format!("{}-{}", descriptor.size, path)
    }
}

/// Hex SHA-256 over the size and the path.
///
/// Unlike [`SizePathIdentifier`] two distinct paths never collapse onto the
/// same identifier.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256Identifier;

impl Identifier for Sha256Identifier {
    fn fingerprint(&self, descriptor: &FileDescriptor) -> String {
        let mut hasher = Sha256::new();
        hasher.update(descriptor.size.to_le_bytes());
        hasher.update(descriptor.effective_path().as_bytes());
        hex::encode(hasher.finalize())
    }
}
