//! Collaborator seams: who moves bytes and who decides when.
//!
//! Both traits are implemented by the embedding application. The session
//! only calls them after releasing its lock, so an implementation may call
//! straight back into the session (e.g. `dispatch_next` from `upload`).

use serde::{Deserialize, Serialize};

use crate::types::ChunkRef;

/// Moves chunk bytes to the server.
///
/// Outcomes are reported back through
/// [`UploadSession::chunk_event`](crate::UploadSession::chunk_event).
pub trait Transport: Send + Sync {
    /// Starts transferring one chunk.
    fn send(&self, request: ChunkRequest);

    /// Drops an in-flight transfer. Must tolerate chunks it no longer knows.
    fn abort(&self, chunk: ChunkRef);
}

/// Decides when chunks are dispatched and how many run at once.
pub trait Scheduler: Send + Sync {
    /// Start (or restart) pumping ready chunks.
    fn upload(&self);

    /// One transport slot was freed.
    fn upload_next_chunk(&self);
}

/// Everything a transport needs to send one chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRequest {
    pub chunk: ChunkRef,
    pub relative_path: String,
    pub unique_identifier: String,
    pub total_size: u64,
    pub total_chunks: usize,
    pub start_byte: u64,
    pub end_byte: u64,
    /// Bytes of this chunk already acknowledged; non-zero when resuming.
    pub resume_from: u64,
}

impl ChunkRequest {
    /// Byte range still to be sent.
    pub fn remaining_range(&self) -> std::ops::Range<u64> {
        (self.start_byte + self.resume_from).min(self.end_byte)..self.end_byte
    }
}

/// Transport that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTransport;

impl Transport for NoopTransport {
    fn send(&self, _request: ChunkRequest) {}
    fn abort(&self, _chunk: ChunkRef) {}
}

/// Scheduler that never pumps.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopScheduler;

impl Scheduler for NoopScheduler {
    fn upload(&self) {}
    fn upload_next_chunk(&self) {}
}
