//! Arena-backed entry tree and the hierarchy builder.
//!
//! Entries live in a slot vector indexed by [`EntryId`]; parents are stored
//! as ids, so the back-references never form ownership cycles. Folder nodes
//! are memoized by their full path (`docs/sub/`) per tree.

use std::collections::HashMap;

use tracing::debug;

use chunkflow_protocol::{FileDescriptor, UploadOptions};

use crate::entry::{Entry, EntryKind, FileState};
use crate::session::InitFileFn;
use crate::types::{Effects, EntryId};
use crate::validation::{ancestor_paths, normalize_relative_path};
use crate::TransferError;

/// The file/folder tree of one upload session.
pub(crate) struct EntryTree {
    entries: Vec<Option<Entry>>,
    root: EntryId,
    folders: HashMap<String, EntryId>,
    pub(crate) options: UploadOptions,
    pub(crate) init_file: Option<InitFileFn>,
}

impl EntryTree {
    pub(crate) fn new(options: UploadOptions, init_file: Option<InitFileFn>) -> Self {
        let root = EntryId(0);
        Self {
            entries: vec![Some(Entry::root(root))],
            root,
            folders: HashMap::new(),
            options,
            init_file,
        }
    }

    pub(crate) fn root(&self) -> EntryId {
        self.root
    }

    pub(crate) fn get(&self, id: EntryId) -> Result<&Entry, TransferError> {
        self.entries
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or(TransferError::EntryNotFound(id))
    }

    pub(crate) fn get_mut(&mut self, id: EntryId) -> Result<&mut Entry, TransferError> {
        self.entries
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(TransferError::EntryNotFound(id))
    }

    pub(crate) fn file(&self, id: EntryId) -> Result<&FileState, TransferError> {
        self.get(id)?.as_file().ok_or(TransferError::NotAFile(id))
    }

    pub(crate) fn file_mut(&mut self, id: EntryId) -> Result<&mut FileState, TransferError> {
        self.get_mut(id)?
            .as_file_mut()
            .ok_or(TransferError::NotAFile(id))
    }

    /// Folder entry registered for `path` (with or without trailing `/`).
    pub(crate) fn folder(&self, path: &str) -> Option<EntryId> {
        let key = if path.ends_with('/') {
            path.to_string()
        } else {
            format!("{path}/")
        };
        self.folders.get(&key).copied()
    }

    /// The entry itself when it is a file, otherwise every file below it.
    pub(crate) fn files_of(&self, id: EntryId) -> Result<Vec<EntryId>, TransferError> {
        let entry = self.get(id)?;
        Ok(if entry.is_file() {
            vec![id]
        } else {
            entry.descendant_files.clone()
        })
    }

    pub(crate) fn find_by_identifier(&self, identifier: &str) -> Option<EntryId> {
        self.entries
            .iter()
            .flatten()
            .find(|e| {
                e.as_file()
                    .is_some_and(|f| f.unique_identifier == identifier)
            })
            .map(Entry::id)
    }

    fn alloc(&mut self, make: impl FnOnce(EntryId) -> Entry) -> EntryId {
        let id = EntryId(self.entries.len());
        self.entries.push(Some(make(id)));
        id
    }

    // -----------------------------------------------------------------------
    // Hierarchy builder
    // -----------------------------------------------------------------------

    /// Adds a file, creating any missing ancestor folders, and bootstraps it.
    pub(crate) fn add_file(
        &mut self,
        descriptor: &FileDescriptor,
        identifier: String,
        fx: &mut Effects,
    ) -> Result<EntryId, TransferError> {
        let path = normalize_relative_path(descriptor.effective_path())?;

        let mut parent = self.root;
        for folder_path in ancestor_paths(&path) {
            parent = match self.folders.get(&folder_path) {
                Some(id) => *id,
                None => self.create_folder(folder_path, parent)?,
            };
        }

        let state = FileState::new(descriptor, path, identifier);
        let id = self.alloc(|id| Entry::file(id, state));
        self.attach_file(id, parent)?;
        self.bootstrap(id, fx)?;
        Ok(id)
    }

    fn create_folder(&mut self, path: String, parent: EntryId) -> Result<EntryId, TransferError> {
        let parent_path = self.get(parent)?.path().to_string();
        let key = path.clone();
        let id = self.alloc(|id| Entry::folder(id, path, parent, &parent_path));
        self.get_mut(parent)?.children.push(id);
        self.folders.insert(key, id);
        debug!(folder = %id, parent = %parent, "folder created");
        Ok(id)
    }

    /// Links a file under `parent`: direct membership there, and a
    /// descendant-file entry in `parent` and every ancestor up to the root.
    fn attach_file(&mut self, id: EntryId, parent: EntryId) -> Result<(), TransferError> {
        self.get_mut(id)?.parent = Some(parent);
        self.get_mut(parent)?.children.push(id);
        let mut cursor = Some(parent);
        while let Some(p) = cursor {
            let entry = self.get_mut(p)?;
            entry.descendant_files.push(id);
            cursor = entry.parent;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Removal
    // -----------------------------------------------------------------------

    /// Removes an entry from the tree.
    ///
    /// A file is dropped from its parent's children and from every ancestor's
    /// descendant files, and its in-flight chunks are aborted. A folder
    /// removes all its files first, then unlinks itself and its sub-folders.
    pub(crate) fn remove(&mut self, id: EntryId, fx: &mut Effects) -> Result<(), TransferError> {
        let entry = self.get(id)?;
        if entry.is_root() {
            return Err(TransferError::RootNotRemovable);
        }
        if entry.is_file() {
            return self.remove_file(id, fx);
        }

        let files = entry.descendant_files.clone();
        for file in files.into_iter().rev() {
            self.remove_file(file, fx)?;
        }
        self.unlink(id)?;
        self.drop_folders(id);
        Ok(())
    }

    fn remove_file(&mut self, id: EntryId, fx: &mut Effects) -> Result<(), TransferError> {
        self.abort(id, false, fx)?;
        self.unlink(id)?;

        let mut cursor = self.get(id)?.parent;
        while let Some(p) = cursor {
            let entry = self.get_mut(p)?;
            entry.descendant_files.retain(|f| *f != id);
            cursor = entry.parent;
        }

        self.entries[id.0] = None;
        debug!(file = %id, "file removed");
        Ok(())
    }

    /// Drops `id` from its direct parent's bookkeeping.
    fn unlink(&mut self, id: EntryId) -> Result<(), TransferError> {
        if let Some(parent) = self.get(id)?.parent {
            let p = self.get_mut(parent)?;
            p.children.retain(|c| *c != id);
            p.descendant_files.retain(|c| *c != id);
        }
        Ok(())
    }

    /// Frees a folder and every folder below it. Files must be gone already.
    fn drop_folders(&mut self, id: EntryId) {
        let Some(entry) = self.entries.get_mut(id.0).and_then(Option::take) else {
            return;
        };
        if let EntryKind::Folder { path } = &entry.kind {
            self.folders.remove(path);
        }
        for child in entry.children {
            self.drop_folders(child);
        }
        debug!(folder = %id, "folder removed");
    }
}
