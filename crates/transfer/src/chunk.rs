use chunkflow_protocol::{ChunkStatus, UploadOptions};

use crate::TransferError;

/// A byte range of one file and the state of its transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Position of the chunk within its file.
    pub index: usize,
    /// First byte of the range.
    pub start_byte: u64,
    /// One past the last byte of the range.
    pub end_byte: u64,
    status: ChunkStatus,
    bytes_uploaded: u64,
    retry_count: u32,
    read_in_flight: bool,
    preprocess_in_flight: bool,
}

impl Chunk {
    /// Creates a pending chunk covering `[start_byte, end_byte)`.
    pub fn new(index: usize, start_byte: u64, end_byte: u64) -> Self {
        debug_assert!(end_byte >= start_byte);
        Self {
            index,
            start_byte,
            end_byte,
            status: ChunkStatus::Pending,
            bytes_uploaded: 0,
            retry_count: 0,
            read_in_flight: false,
            preprocess_in_flight: false,
        }
    }

    pub fn status(&self) -> ChunkStatus {
        self.status
    }

    /// Length of the byte range.
    pub fn len(&self) -> u64 {
        self.end_byte - self.start_byte
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes acknowledged by the transport for this chunk.
    pub fn bytes_uploaded(&self) -> u64 {
        self.bytes_uploaded
    }

    /// Transport retries since the last success.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Whether the chunk's bytes are still being read from local storage.
    pub fn is_reading(&self) -> bool {
        self.read_in_flight
    }

    /// Whether an external pre-upload transform is still working on the chunk.
    pub fn is_preprocessing(&self) -> bool {
        self.preprocess_in_flight
    }

    /// Fraction of the chunk that has been transferred (0.0–1.0).
    pub fn progress(&self) -> f64 {
        match self.status {
            ChunkStatus::Success => 1.0,
            _ if self.is_empty() => 0.0,
            _ => self.bytes_uploaded as f64 / self.len() as f64,
        }
    }

    /// Bytes of the chunk counted as uploaded.
    pub fn size_uploaded(&self) -> u64 {
        match self.status {
            ChunkStatus::Success => self.len(),
            _ => self.bytes_uploaded.min(self.len()),
        }
    }

    /// Whether the chunk still has work ahead of it before the file is done.
    pub fn is_outstanding(&self) -> bool {
        self.status != ChunkStatus::Success || self.read_in_flight || self.preprocess_in_flight
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    fn transition(
        &mut self,
        allowed: &[ChunkStatus],
        to: ChunkStatus,
    ) -> Result<ChunkStatus, TransferError> {
        let from = self.status;
        if !allowed.contains(&from) {
            return Err(TransferError::InvalidTransition { from, to });
        }
        self.status = to;
        Ok(from)
    }

    /// Marks the start of an external pre-upload transform.
    pub fn begin_preprocess(&mut self) {
        self.preprocess_in_flight = true;
    }

    /// Marks the end of an external pre-upload transform.
    pub fn finish_preprocess(&mut self) {
        self.preprocess_in_flight = false;
    }

    /// Starts reading the chunk's bytes from local storage.
    pub fn begin_read(&mut self) -> Result<(), TransferError> {
        self.transition(
            &[ChunkStatus::Pending, ChunkStatus::Aborted],
            ChunkStatus::Reading,
        )?;
        self.read_in_flight = true;
        Ok(())
    }

    /// Hands the chunk to the transport.
    ///
    /// An aborted chunk resumes from the bytes it already had acknowledged.
    pub fn begin_upload(&mut self) -> Result<(), TransferError> {
        self.transition(
            &[
                ChunkStatus::Pending,
                ChunkStatus::Aborted,
                ChunkStatus::Reading,
            ],
            ChunkStatus::Uploading,
        )?;
        self.read_in_flight = false;
        Ok(())
    }

    /// Records the bytes acknowledged so far in the current attempt.
    ///
    /// Values are clamped to the chunk length and never move backwards.
    pub fn record_progress(&mut self, bytes: u64) -> Result<(), TransferError> {
        if self.status != ChunkStatus::Uploading {
            return Err(TransferError::InvalidTransition {
                from: self.status,
                to: ChunkStatus::Uploading,
            });
        }
        self.bytes_uploaded = self.bytes_uploaded.max(bytes.min(self.len()));
        Ok(())
    }

    /// The transport finished the chunk.
    pub fn succeed(&mut self) -> Result<(), TransferError> {
        self.transition(&[ChunkStatus::Uploading], ChunkStatus::Success)?;
        self.bytes_uploaded = self.len();
        self.retry_count = 0;
        Ok(())
    }

    /// The transport gave up on the chunk.
    pub fn fail(&mut self) -> Result<(), TransferError> {
        self.transition(
            &[ChunkStatus::Uploading, ChunkStatus::Reading],
            ChunkStatus::Error,
        )?;
        self.read_in_flight = false;
        Ok(())
    }

    /// The transport starts another attempt from the first byte.
    ///
    /// The chunk stays with the transport, so it remains in flight.
    pub fn restart_attempt(&mut self) -> Result<(), TransferError> {
        self.transition(
            &[ChunkStatus::Uploading, ChunkStatus::Reading],
            ChunkStatus::Uploading,
        )?;
        self.read_in_flight = false;
        self.bytes_uploaded = 0;
        self.retry_count += 1;
        Ok(())
    }

    /// Interrupts an in-flight transfer.
    ///
    /// Returns `true` when the chunk was in flight, i.e. a transport slot was
    /// freed. Calling it on an idle chunk does nothing.
    pub fn abort(&mut self) -> bool {
        if !self.status.is_in_flight() {
            return false;
        }
        self.status = ChunkStatus::Aborted;
        self.read_in_flight = false;
        true
    }
}

/// Splits a file of `size` bytes into contiguous chunks.
///
/// The chunk count follows [`UploadOptions::chunk_count`]; the last chunk
/// always ends at `size`, absorbing the remainder when the count was rounded
/// down. A zero-byte file yields one empty chunk.
pub fn partition(size: u64, options: &UploadOptions) -> Vec<Chunk> {
    let count = options.chunk_count(size);
    let chunk_size = options.chunk_size;
    (0..count)
        .map(|i| {
            let start = (i * chunk_size).min(size);
            let end = if i + 1 == count {
                size
            } else {
                ((i + 1) * chunk_size).min(size)
            };
            Chunk::new(i as usize, start, end)
        })
        .collect()
}
