//! Resumable chunked upload orchestration.
//!
//! The crate owns the file/folder tree of an upload, splits files into
//! chunks, tracks every chunk's transfer state and aggregates progress,
//! size, speed and time remaining across the tree. It never moves bytes:
//! a [`Transport`] does that, a [`Scheduler`] decides when, and an
//! [`Identifier`] fingerprints files.
//!
//! # Flow
//!
//! 1. **Add**: descriptors go into an [`UploadSession`], which synthesizes
//!    folder entries from their relative paths.
//! 2. **Bootstrap**: each file is partitioned into chunks.
//! 3. **Dispatch**: the scheduler calls [`UploadSession::dispatch_next`]
//!    while it has capacity; ready chunks are handed to the transport.
//! 4. **React**: the transport reports [`ChunkEvent`]s back through
//!    [`UploadSession::chunk_event`]; the session updates metrics and
//!    publishes [`UploadEvent`]s.

mod chunk;
mod entry;
mod events;
mod identifier;
mod lifecycle;
mod metrics;
mod progress;
mod session;
mod transport;
mod tree;
mod types;
mod validation;

pub use chunk::{Chunk, partition};
pub use chunkflow_protocol::{ChunkEvent, ChunkStatus, FileDescriptor, UploadOptions};
pub use entry::{Entry, EntryKind, FileState};
pub use identifier::{Identifier, Sha256Identifier, SizePathIdentifier};
pub use progress::{SpeedMeter, eta, time_remaining};
pub use session::{InitFileFn, SessionBuilder, UploadSession};
pub use transport::{ChunkRequest, NoopScheduler, NoopTransport, Scheduler, Transport};
pub use types::{ChunkRef, EntryId, UploadEvent};
pub use validation::normalize_relative_path;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("entry not found: {0}")]
    EntryNotFound(EntryId),

    #[error("entry is not a file: {0}")]
    NotAFile(EntryId),

    #[error("chunk {index} out of range for file {file}")]
    ChunkOutOfRange { file: EntryId, index: usize },

    #[error("stale chunk reference: {0:?}")]
    StaleChunk(ChunkRef),

    #[error("invalid chunk transition: {from:?} -> {to:?}")]
    InvalidTransition { from: ChunkStatus, to: ChunkStatus },

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("the root entry cannot be removed")]
    RootNotRemovable,

    #[error("invalid options: {0}")]
    Options(#[from] chunkflow_protocol::OptionsError),
}
