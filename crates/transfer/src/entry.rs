//! Nodes of the upload tree.

use tokio::time::Instant;

use chunkflow_protocol::{ChunkStatus, FileDescriptor};

use crate::chunk::Chunk;
use crate::progress::SpeedMeter;
use crate::types::{ChunkRef, EntryId};

/// What an entry stands for.
#[derive(Debug)]
pub enum EntryKind {
    /// The synthetic container owned by the session.
    Root,
    /// A directory synthesized from relative paths.
    Folder {
        /// Full normalized path with a trailing `/` (`docs/sub/`).
        path: String,
    },
    File(FileState),
}

/// A file or folder in the upload tree.
#[derive(Debug)]
pub struct Entry {
    pub(crate) id: EntryId,
    pub(crate) name: String,
    pub(crate) parent: Option<EntryId>,
    pub(crate) children: Vec<EntryId>,
    pub(crate) descendant_files: Vec<EntryId>,
    pub(crate) kind: EntryKind,
}

impl Entry {
    pub(crate) fn root(id: EntryId) -> Self {
        Self {
            id,
            name: String::new(),
            parent: None,
            children: Vec::new(),
            descendant_files: Vec::new(),
            kind: EntryKind::Root,
        }
    }

    pub(crate) fn folder(id: EntryId, path: String, parent: EntryId, parent_path: &str) -> Self {
        let name = path
            .strip_prefix(parent_path)
            .unwrap_or(&path)
            .trim_end_matches('/')
            .to_string();
        Self {
            id,
            name,
            parent: Some(parent),
            children: Vec::new(),
            descendant_files: Vec::new(),
            kind: EntryKind::Folder { path },
        }
    }

    pub(crate) fn file(id: EntryId, file: FileState) -> Self {
        Self {
            id,
            name: file.name.clone(),
            parent: None,
            children: Vec::new(),
            descendant_files: Vec::new(),
            kind: EntryKind::File(file),
        }
    }

    pub fn id(&self) -> EntryId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Owning entry; `None` only for the root.
    pub fn parent(&self) -> Option<EntryId> {
        self.parent
    }

    /// Direct members, in insertion order.
    pub fn children(&self) -> &[EntryId] {
        &self.children
    }

    /// Every file below this entry, in insertion order.
    pub fn descendant_files(&self) -> &[EntryId] {
        &self.descendant_files
    }

    pub fn kind(&self) -> &EntryKind {
        &self.kind
    }

    pub fn is_root(&self) -> bool {
        matches!(self.kind, EntryKind::Root)
    }

    /// Folders and the root both group other entries.
    pub fn is_folder(&self) -> bool {
        !self.is_file()
    }

    pub fn is_file(&self) -> bool {
        matches!(self.kind, EntryKind::File(_))
    }

    /// Folder path with trailing `/`, empty for the root and files.
    pub fn path(&self) -> &str {
        match &self.kind {
            EntryKind::Folder { path } => path,
            _ => "",
        }
    }

    pub fn as_file(&self) -> Option<&FileState> {
        match &self.kind {
            EntryKind::File(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_file_mut(&mut self) -> Option<&mut FileState> {
        match &mut self.kind {
            EntryKind::File(f) => Some(f),
            _ => None,
        }
    }

    /// MIME subtype of a file (`png` for `image/png`), `"Folder"` for folders.
    pub fn file_type(&self) -> &str {
        match &self.kind {
            EntryKind::File(f) => f.mime_type.split('/').nth(1).unwrap_or_default(),
            _ => "Folder",
        }
    }

    /// Lowercase extension of a file name, empty when there is none.
    pub fn extension(&self) -> String {
        if !self.is_file() {
            return String::new();
        }
        match self.name.rfind('.') {
            Some(dot) if dot > 0 => self.name[dot + 1..].to_lowercase(),
            _ => String::new(),
        }
    }
}

/// Per-file transfer state.
#[derive(Debug)]
pub struct FileState {
    pub name: String,
    pub relative_path: String,
    pub size: u64,
    pub mime_type: String,
    /// Fingerprint from the identifier collaborator; opaque to the core.
    pub unique_identifier: String,
    pub(crate) chunks: Vec<Chunk>,
    /// Bumped on every bootstrap.
    pub(crate) generation: u64,
    pub(crate) paused: bool,
    pub(crate) has_error: bool,
    pub(crate) success_emitted: bool,
    /// Server message of the latest chunk success.
    pub(crate) success_message: String,
    pub(crate) speed: SpeedMeter,
    pub(crate) last_progress_at: Instant,
    /// Highest progress reported so far; progress never goes below it.
    pub(crate) prev_progress: f64,
}

impl FileState {
    pub(crate) fn new(descriptor: &FileDescriptor, relative_path: String, identifier: String) -> Self {
        Self {
            name: descriptor.name.clone(),
            relative_path,
            size: descriptor.size,
            mime_type: descriptor.mime_type.clone(),
            unique_identifier: identifier,
            chunks: Vec::new(),
            generation: 0,
            paused: false,
            has_error: false,
            success_emitted: false,
            success_message: String::new(),
            speed: SpeedMeter::default(),
            last_progress_at: Instant::now(),
            prev_progress: 0.0,
        }
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Sticky until the file is retried.
    pub fn has_error(&self) -> bool {
        self.has_error
    }

    /// Bytes per second measured over the last sample.
    pub fn current_speed(&self) -> f64 {
        self.speed.current()
    }

    /// Smoothed bytes per second.
    pub fn average_speed(&self) -> f64 {
        self.speed.average()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether no chunk has work left.
    pub fn is_complete(&self) -> bool {
        !self.chunks.iter().any(Chunk::is_outstanding)
    }

    /// Whether any chunk is on the wire.
    pub fn is_uploading(&self) -> bool {
        self.chunks
            .iter()
            .any(|c| c.status() == ChunkStatus::Uploading)
    }

    /// Bytes acknowledged across all chunks.
    pub fn size_uploaded(&self) -> u64 {
        self.chunks.iter().map(Chunk::size_uploaded).sum()
    }

    pub(crate) fn chunk_ref(&self, file: EntryId, index: usize) -> ChunkRef {
        ChunkRef {
            file,
            index,
            generation: self.generation,
        }
    }
}
