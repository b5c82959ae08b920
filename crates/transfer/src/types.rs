use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable handle to an entry in a session's tree.
///
/// Handles are never reused within a session, so a handle to a removed entry
/// stays invalid instead of silently pointing at a newer one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryId(pub(crate) usize);

impl EntryId {
    /// Raw arena index, useful as a map key on the caller side.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Addresses one chunk of one file.
///
/// `generation` counts bootstraps of the file; events carrying an older
/// generation belong to chunks that were since discarded and are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkRef {
    pub file: EntryId,
    pub index: usize,
    pub generation: u64,
}

/// Notification published by a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UploadEvent {
    /// Overall progress changed.
    Progress,
    /// A file made progress on one of its chunks.
    FileProgress { file: EntryId, chunk: usize },
    /// A file stopped because one of its chunks failed.
    FileError {
        file: EntryId,
        chunk: usize,
        message: String,
    },
    /// Session-level error, published right after the matching `FileError`.
    Error {
        file: EntryId,
        chunk: usize,
        message: String,
    },
    /// Every chunk of a file has been uploaded.
    FileSuccess {
        file: EntryId,
        chunk: usize,
        message: String,
    },
    /// A transport is retrying one of the file's chunks.
    FileRetry { file: EntryId, chunk: usize },
}

/// Work produced by a tree mutation that has to happen outside the session
/// lock: collaborator calls and outbound notifications.
#[derive(Debug, Default)]
pub(crate) struct Effects {
    /// In-flight transfers the transport must drop.
    pub aborted: Vec<ChunkRef>,
    /// Transport slots freed by those aborts.
    pub freed_slots: usize,
    /// Ask the scheduler to (re)start pumping.
    pub upload: bool,
    pub events: Vec<UploadEvent>,
}

impl Effects {
    pub fn abort(&mut self, chunk: ChunkRef) {
        self.aborted.push(chunk);
        self.freed_slots += 1;
    }

    pub fn emit(&mut self, event: UploadEvent) {
        self.events.push(event);
    }

    pub fn is_empty(&self) -> bool {
        self.aborted.is_empty() && !self.upload && self.events.is_empty()
    }
}
