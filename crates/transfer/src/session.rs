//! The public entry point: one upload session and its collaborators.
//!
//! Every operation locks the tree, mutates it, collects the resulting
//! [`Effects`], releases the lock and only then calls the transport, the
//! scheduler and the event channel.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use chunkflow_protocol::{ChunkEvent, FileDescriptor, UploadOptions};

use crate::chunk::Chunk;
use crate::entry::Entry;
use crate::identifier::{Identifier, SizePathIdentifier};
use crate::transport::{ChunkRequest, NoopScheduler, NoopTransport, Scheduler, Transport};
use crate::tree::EntryTree;
use crate::types::{ChunkRef, Effects, EntryId, UploadEvent};
use crate::TransferError;

/// Hook run on a file entry before each bootstrap.
pub type InitFileFn = Arc<dyn Fn(&mut Entry) + Send + Sync>;

/// Default capacity of the outbound event channel.
const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Configures and builds an [`UploadSession`].
pub struct SessionBuilder {
    options: UploadOptions,
    transport: Arc<dyn Transport>,
    scheduler: Arc<dyn Scheduler>,
    identifier: Arc<dyn Identifier>,
    init_file: Option<InitFileFn>,
    event_capacity: usize,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self {
            options: UploadOptions::default(),
            transport: Arc::new(NoopTransport),
            scheduler: Arc::new(NoopScheduler),
            identifier: Arc::new(SizePathIdentifier),
            init_file: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn options(mut self, options: UploadOptions) -> Self {
        self.options = options;
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn identifier(mut self, identifier: Arc<dyn Identifier>) -> Self {
        self.identifier = identifier;
        self
    }

    /// Runs `hook` on every file entry right before it is (re)partitioned.
    pub fn init_file_fn(mut self, hook: impl Fn(&mut Entry) + Send + Sync + 'static) -> Self {
        self.init_file = Some(Arc::new(hook));
        self
    }

    /// Events beyond this many unread ones are dropped with a warning.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    pub fn build(self) -> Result<UploadSession, TransferError> {
        self.options.validate()?;
        let (events_tx, events_rx) = mpsc::channel(self.event_capacity);
        debug!(
            chunk_size = self.options.chunk_size,
            force_chunk_size = self.options.force_chunk_size,
            "upload session created"
        );
        Ok(UploadSession {
            tree: RwLock::new(EntryTree::new(self.options, self.init_file)),
            transport: self.transport,
            scheduler: self.scheduler,
            identifier: self.identifier,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        })
    }
}

/// A tree of files and folders being uploaded in chunks.
///
/// Entries are addressed by [`EntryId`]. Operations on a folder (or the
/// root) apply to every file below it.
pub struct UploadSession {
    tree: RwLock<EntryTree>,
    transport: Arc<dyn Transport>,
    scheduler: Arc<dyn Scheduler>,
    identifier: Arc<dyn Identifier>,
    events_tx: mpsc::Sender<UploadEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<UploadEvent>>>,
}

impl UploadSession {
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// Takes the event receiver. Returns `None` after the first call.
    pub fn take_events(&self) -> Option<mpsc::Receiver<UploadEvent>> {
        self.events_rx.lock().take()
    }

    pub fn root(&self) -> EntryId {
        self.tree.read().root()
    }

    pub fn options(&self) -> UploadOptions {
        self.tree.read().options.clone()
    }

    // -----------------------------------------------------------------------
    // Building the tree
    // -----------------------------------------------------------------------

    /// Adds a file, creating folder entries for its relative path, and
    /// partitions it into chunks.
    pub fn add_file(&self, descriptor: &FileDescriptor) -> Result<EntryId, TransferError> {
        let identifier = self.identifier.fingerprint(descriptor);
        let mut fx = Effects::default();
        let id = self.tree.write().add_file(descriptor, identifier, &mut fx)?;
        self.apply(fx);
        debug!(file = %id, path = %descriptor.effective_path(), size = descriptor.size, "file added");
        Ok(id)
    }

    /// Adds a batch of files. Stops at the first invalid descriptor; files
    /// added before it stay.
    pub fn add_files<'a>(
        &self,
        descriptors: impl IntoIterator<Item = &'a FileDescriptor>,
    ) -> Result<Vec<EntryId>, TransferError> {
        let ids = descriptors
            .into_iter()
            .map(|d| self.add_file(d))
            .collect::<Result<Vec<_>, _>>()?;
        info!(count = ids.len(), "files added");
        Ok(ids)
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    /// Runs `f` against an entry while the tree is read-locked.
    ///
    /// `f` must not call back into the session.
    pub fn with_entry<R>(&self, id: EntryId, f: impl FnOnce(&Entry) -> R) -> Result<R, TransferError> {
        let tree = self.tree.read();
        Ok(f(tree.get(id)?))
    }

    pub fn name(&self, id: EntryId) -> Result<String, TransferError> {
        self.with_entry(id, |e| e.name().to_string())
    }

    pub fn parent(&self, id: EntryId) -> Result<Option<EntryId>, TransferError> {
        self.with_entry(id, Entry::parent)
    }

    pub fn children(&self, id: EntryId) -> Result<Vec<EntryId>, TransferError> {
        self.with_entry(id, |e| e.children().to_vec())
    }

    pub fn descendant_files(&self, id: EntryId) -> Result<Vec<EntryId>, TransferError> {
        self.with_entry(id, |e| e.descendant_files().to_vec())
    }

    /// Snapshot of a file's chunks. Chunk state changes go through
    /// [`begin_read`](Self::begin_read), [`begin_preprocess`](Self::begin_preprocess)
    /// and the other chunk operations.
    pub fn chunks(&self, id: EntryId) -> Result<Vec<Chunk>, TransferError> {
        Ok(self.tree.read().file(id)?.chunks().to_vec())
    }

    pub fn has_error(&self, id: EntryId) -> Result<bool, TransferError> {
        Ok(self.tree.read().file(id)?.has_error())
    }

    pub fn is_paused(&self, id: EntryId) -> Result<bool, TransferError> {
        Ok(self.tree.read().file(id)?.is_paused())
    }

    /// Folder registered for `path` (`docs/sub` or `docs/sub/`).
    pub fn folder(&self, path: &str) -> Option<EntryId> {
        self.tree.read().folder(path)
    }

    /// Every file in the session, in insertion order.
    pub fn files(&self) -> Vec<EntryId> {
        let tree = self.tree.read();
        tree.files_of(tree.root()).unwrap_or_default()
    }

    pub fn get_from_unique_identifier(&self, identifier: &str) -> Option<EntryId> {
        self.tree.read().find_by_identifier(identifier)
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Discards a file's chunks and partitions it again.
    pub fn bootstrap(&self, id: EntryId) -> Result<(), TransferError> {
        self.mutate(|tree, fx| tree.bootstrap(id, fx))
    }

    pub fn pause(&self, id: EntryId) -> Result<(), TransferError> {
        self.mutate(|tree, fx| tree.pause(id, fx))
    }

    pub fn resume(&self, id: EntryId) -> Result<(), TransferError> {
        self.mutate(|tree, fx| tree.resume(id, fx))
    }

    /// Removes a file, or empties a folder.
    pub fn cancel(&self, id: EntryId) -> Result<(), TransferError> {
        self.mutate(|tree, fx| tree.cancel(id, fx))?;
        info!(entry = %id, "cancelled");
        Ok(())
    }

    /// Removes an entry and everything below it.
    pub fn remove_file(&self, id: EntryId) -> Result<(), TransferError> {
        self.mutate(|tree, fx| tree.remove(id, fx))
    }

    /// Re-bootstraps `target` if given, otherwise every file under `id`,
    /// and asks the scheduler to pump.
    pub fn retry(&self, id: EntryId, target: Option<EntryId>) -> Result<(), TransferError> {
        self.mutate(|tree, fx| tree.retry(id, target, fx))?;
        info!(entry = %id, target = ?target, "retrying");
        Ok(())
    }

    /// Stops in-flight transfers; `reset` also discards the chunk lists.
    pub fn abort(&self, id: EntryId, reset: bool) -> Result<(), TransferError> {
        self.mutate(|tree, fx| tree.abort(id, reset, fx))
    }

    pub fn pause_all(&self) -> Result<(), TransferError> {
        self.pause(self.root())
    }

    pub fn resume_all(&self) -> Result<(), TransferError> {
        self.resume(self.root())
    }

    pub fn cancel_all(&self) -> Result<(), TransferError> {
        self.cancel(self.root())
    }

    // -----------------------------------------------------------------------
    // Metrics
    // -----------------------------------------------------------------------

    pub fn is_complete(&self, id: EntryId) -> Result<bool, TransferError> {
        self.tree.read().is_complete(id)
    }

    pub fn is_uploading(&self, id: EntryId) -> Result<bool, TransferError> {
        self.tree.read().is_uploading(id)
    }

    /// Fraction done, 0.0 to 1.0. Needs the write lock because a file
    /// remembers its highest reported value.
    pub fn progress(&self, id: EntryId) -> Result<f64, TransferError> {
        self.tree.write().progress(id)
    }

    pub fn size(&self, id: EntryId) -> Result<u64, TransferError> {
        self.tree.read().size(id)
    }

    pub fn size_uploaded(&self, id: EntryId) -> Result<u64, TransferError> {
        self.tree.read().size_uploaded(id)
    }

    /// Seconds left; infinite while bytes remain and nothing moves.
    pub fn time_remaining(&self, id: EntryId) -> Result<f64, TransferError> {
        self.tree.read().time_remaining(id)
    }

    /// Instantaneous speed of a file, bytes per second.
    pub fn current_speed(&self, id: EntryId) -> Result<f64, TransferError> {
        Ok(self.tree.read().file(id)?.current_speed())
    }

    /// Smoothed speed of a file, bytes per second.
    pub fn average_speed(&self, id: EntryId) -> Result<f64, TransferError> {
        Ok(self.tree.read().file(id)?.average_speed())
    }

    // -----------------------------------------------------------------------
    // Transport interplay
    // -----------------------------------------------------------------------

    /// Reports the outcome of a chunk transfer.
    pub fn chunk_event(&self, chunk: ChunkRef, event: ChunkEvent) -> Result<(), TransferError> {
        let now = Instant::now();
        self.mutate(|tree, fx| tree.chunk_event(chunk, &event, now, fx))
    }

    pub fn next_ready_chunk(&self) -> Option<ChunkRef> {
        self.tree.read().next_ready_chunk()
    }

    /// Marks a ready chunk as uploading without handing it to the transport.
    pub fn start_chunk(&self, chunk: ChunkRef) -> Result<ChunkRequest, TransferError> {
        self.tree.write().start_chunk(chunk)
    }

    /// Marks a ready chunk as being read from local storage. A later
    /// [`start_chunk`](Self::start_chunk) moves it on to `Uploading`.
    pub fn begin_read(&self, chunk: ChunkRef) -> Result<(), TransferError> {
        self.tree.write().begin_read(chunk)
    }

    /// Marks a chunk as held by a pre-upload transform. Its file cannot
    /// complete until [`finish_preprocess`](Self::finish_preprocess).
    pub fn begin_preprocess(&self, chunk: ChunkRef) -> Result<(), TransferError> {
        self.tree.write().begin_preprocess(chunk)
    }

    /// Releases a chunk from its pre-upload transform, publishing
    /// `FileSuccess` if that was the last work left on the file.
    pub fn finish_preprocess(&self, chunk: ChunkRef) -> Result<(), TransferError> {
        self.mutate(|tree, fx| tree.finish_preprocess(chunk, fx))
    }

    /// Starts the next ready chunk and sends it. Returns `None` when
    /// nothing is ready.
    pub fn dispatch_next(&self) -> Result<Option<ChunkRef>, TransferError> {
        let request = {
            let mut tree = self.tree.write();
            let Some(chunk) = tree.next_ready_chunk() else {
                return Ok(None);
            };
            tree.start_chunk(chunk)?
        };
        let chunk = request.chunk;
        trace!(file = %chunk.file, chunk = chunk.index, "dispatching chunk");
        self.transport.send(request);
        Ok(Some(chunk))
    }

    fn mutate(
        &self,
        op: impl FnOnce(&mut EntryTree, &mut Effects) -> Result<(), TransferError>,
    ) -> Result<(), TransferError> {
        let mut fx = Effects::default();
        let result = op(&mut *self.tree.write(), &mut fx);
        // Work done before a failure still has to reach the collaborators.
        self.apply(fx);
        result
    }

    /// Runs collaborator calls and publishes events. Never called with the
    /// tree lock held.
    fn apply(&self, fx: Effects) {
        for chunk in &fx.aborted {
            self.transport.abort(*chunk);
        }
        for _ in 0..fx.freed_slots {
            self.scheduler.upload_next_chunk();
        }
        if fx.upload {
            self.scheduler.upload();
        }
        for event in fx.events {
            match self.events_tx.try_send(event) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(event)) => {
                    warn!(?event, "event channel full, dropping event");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
    }
}
