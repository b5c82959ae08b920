//! Data types shared between the chunkflow orchestration core and its callers.
//!
//! Everything here is plain serde data: upload options, the descriptors a
//! reader hands in for each local file, and the chunk states/events a
//! transport reports back.

pub mod options;
pub mod types;

pub use options::{OptionsError, UploadOptions};
pub use types::{ChunkEvent, ChunkStatus, FileDescriptor};
