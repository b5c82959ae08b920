//! Bootstrap, abort, pause, resume, retry and cancel.
//!
//! Every operation accepts a file, a folder or the root; folder variants
//! apply the file behaviour to each descendant file.

use tracing::{debug, trace};

use crate::chunk::partition;
use crate::entry::FileState;
use crate::transport::ChunkRequest;
use crate::tree::EntryTree;
use crate::types::{ChunkRef, Effects, EntryId, UploadEvent};
use crate::TransferError;

impl EntryTree {
    /// Rebuilds a file's chunks from scratch. No-op for folders.
    ///
    /// Runs the `init_file` hook, aborts whatever is still in flight, clears
    /// the error flag and the progress floor, then partitions the file anew.
    pub(crate) fn bootstrap(&mut self, id: EntryId, fx: &mut Effects) -> Result<(), TransferError> {
        if !self.get(id)?.is_file() {
            return Ok(());
        }

        if let Some(hook) = self.init_file.clone() {
            hook(self.get_mut(id)?);
        }

        self.abort(id, true, fx)?;

        let size = self.file(id)?.size;
        let chunks = partition(size, &self.options);
        let file = self.file_mut(id)?;
        file.has_error = false;
        file.success_emitted = false;
        file.success_message.clear();
        file.prev_progress = 0.0;
        file.generation += 1;
        file.chunks = chunks;

        debug!(
            file = %id,
            size,
            chunks = file.chunks.len(),
            generation = file.generation,
            "file bootstrapped"
        );
        Ok(())
    }

    /// Stops in-flight transfers and zeroes the speed readings.
    ///
    /// With `reset` the chunk list is discarded as well; without it, the
    /// interrupted chunks become `Aborted` and keep their acknowledged bytes
    /// so a later upload resumes them. Each interrupted chunk frees one
    /// transport slot.
    pub(crate) fn abort(
        &mut self,
        id: EntryId,
        reset: bool,
        fx: &mut Effects,
    ) -> Result<(), TransferError> {
        for file_id in self.files_of(id)? {
            let file = self.file_mut(file_id)?;
            file.speed.reset();
            let generation = file.generation;

            let mut discarded = if reset {
                std::mem::take(&mut file.chunks)
            } else {
                Vec::new()
            };
            let chunks = if reset {
                &mut discarded
            } else {
                &mut file.chunks
            };

            for chunk in chunks.iter_mut() {
                if chunk.abort() {
                    fx.abort(ChunkRef {
                        file: file_id,
                        index: chunk.index,
                        generation,
                    });
                }
            }
        }
        Ok(())
    }

    pub(crate) fn pause(&mut self, id: EntryId, fx: &mut Effects) -> Result<(), TransferError> {
        for file_id in self.files_of(id)? {
            self.file_mut(file_id)?.paused = true;
            self.abort(file_id, false, fx)?;
        }
        debug!(entry = %id, "paused");
        Ok(())
    }

    pub(crate) fn resume(&mut self, id: EntryId, fx: &mut Effects) -> Result<(), TransferError> {
        for file_id in self.files_of(id)? {
            self.file_mut(file_id)?.paused = false;
        }
        fx.upload = true;
        debug!(entry = %id, "resumed");
        Ok(())
    }

    /// Re-bootstraps `target` when given, otherwise every file under `id`.
    pub(crate) fn retry(
        &mut self,
        id: EntryId,
        target: Option<EntryId>,
        fx: &mut Effects,
    ) -> Result<(), TransferError> {
        for file_id in self.files_of(target.unwrap_or(id))? {
            self.bootstrap(file_id, fx)?;
        }
        fx.upload = true;
        Ok(())
    }

    /// Removes a file, or every direct child of a folder (last first).
    ///
    /// Cancelling a folder leaves the folder itself in place, empty.
    pub(crate) fn cancel(&mut self, id: EntryId, fx: &mut Effects) -> Result<(), TransferError> {
        let entry = self.get(id)?;
        if entry.is_file() {
            return self.remove(id, fx);
        }
        let children = entry.children.clone();
        for child in children.into_iter().rev() {
            self.remove(child, fx)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Scheduling support
    // -----------------------------------------------------------------------

    /// First chunk, in file order, that a scheduler may hand to a transport.
    ///
    /// Paused and errored files are skipped, as are chunks still being
    /// preprocessed.
    pub(crate) fn next_ready_chunk(&self) -> Option<ChunkRef> {
        let root = self.get(self.root()).ok()?;
        root.descendant_files.iter().find_map(|&file_id| {
            let file = self.file(file_id).ok()?;
            if file.paused || file.has_error {
                return None;
            }
            file.chunks
                .iter()
                .find(|c| c.status().is_ready() && !c.is_preprocessing())
                .map(|c| file.chunk_ref(file_id, c.index))
        })
    }

    /// The file owning `chunk`, provided the reference is current and in range.
    fn chunk_owner_mut(&mut self, chunk: ChunkRef) -> Result<&mut FileState, TransferError> {
        let file = self.file_mut(chunk.file)?;
        if file.generation != chunk.generation {
            return Err(TransferError::StaleChunk(chunk));
        }
        if chunk.index >= file.chunks.len() {
            return Err(TransferError::ChunkOutOfRange {
                file: chunk.file,
                index: chunk.index,
            });
        }
        Ok(file)
    }

    /// Moves a ready chunk to `Reading` while its bytes are loaded.
    pub(crate) fn begin_read(&mut self, chunk: ChunkRef) -> Result<(), TransferError> {
        let file = self.chunk_owner_mut(chunk)?;
        file.chunks[chunk.index].begin_read()?;
        trace!(file = %chunk.file, chunk = chunk.index, "reading chunk");
        Ok(())
    }

    /// Flags a chunk as held by an external pre-upload transform.
    ///
    /// The file cannot complete, and the chunk is not offered for dispatch,
    /// until [`finish_preprocess`](Self::finish_preprocess) clears the flag.
    pub(crate) fn begin_preprocess(&mut self, chunk: ChunkRef) -> Result<(), TransferError> {
        let file = self.chunk_owner_mut(chunk)?;
        file.chunks[chunk.index].begin_preprocess();
        trace!(file = %chunk.file, chunk = chunk.index, "preprocessing chunk");
        Ok(())
    }

    /// Clears the transform flag. A file whose last outstanding work was
    /// this transform completes here.
    pub(crate) fn finish_preprocess(
        &mut self,
        chunk: ChunkRef,
        fx: &mut Effects,
    ) -> Result<(), TransferError> {
        let file = self.chunk_owner_mut(chunk)?;
        file.chunks[chunk.index].finish_preprocess();
        if file.is_complete() && !file.success_emitted {
            file.speed.reset();
            file.success_emitted = true;
            debug!(file = %chunk.file, "file complete");
            fx.emit(UploadEvent::FileSuccess {
                file: chunk.file,
                chunk: chunk.index,
                message: file.success_message.clone(),
            });
        }
        Ok(())
    }

    /// Moves a ready (or reading) chunk to `Uploading` and describes the
    /// work for the transport.
    pub(crate) fn start_chunk(&mut self, chunk: ChunkRef) -> Result<ChunkRequest, TransferError> {
        let file = self.chunk_owner_mut(chunk)?;
        let total_chunks = file.chunks.len();
        let c = &mut file.chunks[chunk.index];
        c.begin_upload()?;
        Ok(ChunkRequest {
            chunk,
            relative_path: file.relative_path.clone(),
            unique_identifier: file.unique_identifier.clone(),
            total_size: file.size,
            total_chunks,
            start_byte: c.start_byte,
            end_byte: c.end_byte,
            resume_from: c.bytes_uploaded(),
        })
    }
}
