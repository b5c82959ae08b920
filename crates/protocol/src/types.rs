use serde::{Deserialize, Serialize};

/// A local file handed to the uploader by a reader.
///
/// Only metadata travels here; the bytes stay with whoever owns the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    pub name: String,
    /// Path relative to the dropped folder, `/`-separated.
    ///
    /// Empty means the file was picked on its own and sits at the root.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub relative_path: String,
    pub size: u64,
    /// MIME type as reported by the source (`image/png`), if known.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mime_type: String,
}

impl FileDescriptor {
    /// Creates a descriptor for a file at `relative_path`.
    ///
    /// The name is the last path segment.
    pub fn new(relative_path: impl Into<String>, size: u64) -> Self {
        let relative_path = relative_path.into();
        let name = relative_path
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        Self {
            name,
            relative_path,
            size,
            mime_type: String::new(),
        }
    }

    /// Sets the MIME type.
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    /// The relative path, falling back to the bare name.
    pub fn effective_path(&self) -> &str {
        if self.relative_path.is_empty() {
            &self.name
        } else {
            &self.relative_path
        }
    }
}

/// Transfer state of a single chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    /// Waiting to be picked up by the scheduler.
    Pending,
    /// Bytes are being read from local storage.
    Reading,
    /// Bytes are on the wire.
    Uploading,
    Success,
    Error,
    /// Transfer was interrupted; the chunk can be picked up again and keeps
    /// the bytes already acknowledged.
    Aborted,
}

impl ChunkStatus {
    /// Whether a transport currently holds the chunk.
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Reading | Self::Uploading)
    }

    /// Whether the scheduler may hand the chunk to a transport.
    pub fn is_ready(self) -> bool {
        matches!(self, Self::Pending | Self::Aborted)
    }
}

/// Outcome a transport reports for a chunk it was handed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChunkEvent {
    /// Bytes of the chunk acknowledged so far in this attempt.
    Progress { bytes: u64 },
    /// The server accepted the whole chunk.
    Success {
        #[serde(default)]
        message: String,
    },
    /// The chunk failed and the file should stop.
    Error {
        #[serde(default)]
        message: String,
    },
    /// The transport is about to try the chunk again from scratch.
    Retry,
}
