//! Recursive aggregation of size, progress and time remaining.

use crate::entry::FileState;
use crate::progress;
use crate::tree::EntryTree;
use crate::types::EntryId;
use crate::TransferError;

/// Fraction above which a multi-chunk file is reported as fully done.
const PROGRESS_CEILING: f64 = 0.9999;

impl EntryTree {
    /// Total bytes of a file, or of every file below a folder.
    pub(crate) fn size(&self, id: EntryId) -> Result<u64, TransferError> {
        let entry = self.get(id)?;
        match entry.as_file() {
            Some(file) => Ok(file.size),
            None => entry
                .children
                .iter()
                .try_fold(0, |acc, child| Ok(acc + self.size(*child)?)),
        }
    }

    /// Bytes acknowledged by the transport.
    pub(crate) fn size_uploaded(&self, id: EntryId) -> Result<u64, TransferError> {
        let entry = self.get(id)?;
        match entry.as_file() {
            Some(file) => Ok(file.size_uploaded()),
            None => entry
                .children
                .iter()
                .try_fold(0, |acc, child| Ok(acc + self.size_uploaded(*child)?)),
        }
    }

    pub(crate) fn is_complete(&self, id: EntryId) -> Result<bool, TransferError> {
        let entry = self.get(id)?;
        if let Some(file) = entry.as_file() {
            return Ok(file.is_complete());
        }
        for file_id in &entry.descendant_files {
            if !self.file(*file_id)?.is_complete() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub(crate) fn is_uploading(&self, id: EntryId) -> Result<bool, TransferError> {
        let entry = self.get(id)?;
        if let Some(file) = entry.as_file() {
            return Ok(file.is_uploading());
        }
        for file_id in &entry.descendant_files {
            if self.file(*file_id)?.is_uploading() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Fraction done (0.0–1.0).
    ///
    /// A file's value never decreases between bootstraps. An errored file
    /// reads 1.0 so it does not hold back an aggregate "all done" view;
    /// check [`FileState::has_error`] to tell the two apart. Folders weigh
    /// their children by size, and a zero-byte folder reads 1.0 once every
    /// file in it is complete.
    pub(crate) fn progress(&mut self, id: EntryId) -> Result<f64, TransferError> {
        if self.get(id)?.is_file() {
            return Ok(file_progress(self.file_mut(id)?));
        }

        let children = self.get(id)?.children.clone();
        let mut done = 0.0;
        let mut total = 0u64;
        for child in children {
            let size = self.size(child)?;
            done += self.progress(child)? * size as f64;
            total += size;
        }

        if total > 0 {
            Ok(done / total as f64)
        } else if self.is_complete(id)? {
            Ok(1.0)
        } else {
            Ok(0.0)
        }
    }

    /// Estimated seconds until the entry finishes; `f64::INFINITY` while
    /// bytes remain and nothing is moving.
    ///
    /// Paused and errored files contribute neither bytes nor speed.
    pub(crate) fn time_remaining(&self, id: EntryId) -> Result<f64, TransferError> {
        let mut remaining = 0u64;
        let mut speed = 0.0;
        for file_id in self.files_of(id)? {
            let file = self.file(file_id)?;
            if file.paused || file.has_error {
                continue;
            }
            remaining += file.size.saturating_sub(file.size_uploaded());
            speed += file.average_speed();
        }
        Ok(progress::time_remaining(remaining, speed))
    }
}

fn file_progress(file: &mut FileState) -> f64 {
    if file.has_error {
        return 1.0;
    }

    let percent = match file.chunks.as_slice() {
        [] => return file.prev_progress,
        [only] => only.progress(),
        chunks => {
            let loaded: f64 = chunks.iter().map(|c| c.progress() * c.len() as f64).sum();
            let percent = loaded / file.size as f64;
            if percent > PROGRESS_CEILING { 1.0 } else { percent }
        }
    };

    file.prev_progress = file.prev_progress.max(percent);
    file.prev_progress
}

#[cfg(test)]
mod tests {
    use chunkflow_protocol::{FileDescriptor, UploadOptions};

    use super::*;
    use crate::types::Effects;

    fn tree(chunk_size: u64) -> EntryTree {
        EntryTree::new(
            UploadOptions {
                chunk_size,
                ..Default::default()
            },
            None,
        )
    }

    fn add(tree: &mut EntryTree, path: &str, size: u64) -> EntryId {
        let mut fx = Effects::default();
        tree.add_file(&FileDescriptor::new(path, size), path.into(), &mut fx)
            .unwrap()
    }

    /// Uploads `bytes` of chunk `index` and optionally completes it.
    fn push(tree: &mut EntryTree, file: EntryId, index: usize, bytes: u64, finish: bool) {
        let f = tree.file_mut(file).unwrap();
        let chunk = &mut f.chunks[index];
        if !chunk.status().is_in_flight() {
            chunk.begin_upload().unwrap();
        }
        chunk.record_progress(bytes).unwrap();
        if finish {
            chunk.succeed().unwrap();
        }
    }

    #[test]
    fn folder_size_sums_nested_children_once() {
        let mut t = tree(10);
        add(&mut t, "docs/a.txt", 10);
        add(&mut t, "docs/sub/b.txt", 20);
        add(&mut t, "top.txt", 5);
        let docs = t.folder("docs/").unwrap();
        assert_eq!(t.size(docs).unwrap(), 30);
        assert_eq!(t.size(t.root()).unwrap(), 35);
    }

    #[test]
    fn size_uploaded_follows_chunks() {
        let mut t = tree(10);
        let f = add(&mut t, "d/a.bin", 30);
        push(&mut t, f, 0, 10, true);
        push(&mut t, f, 1, 4, false);
        let d = t.folder("d/").unwrap();
        assert_eq!(t.size_uploaded(f).unwrap(), 14);
        assert_eq!(t.size_uploaded(d).unwrap(), 14);
    }

    #[test]
    fn single_chunk_progress() {
        let mut t = tree(100);
        let f = add(&mut t, "a.bin", 50);
        push(&mut t, f, 0, 25, false);
        assert!((t.progress(f).unwrap() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn multi_chunk_progress_is_size_weighted() {
        let mut t = tree(10);
        let f = add(&mut t, "a.bin", 25);
        // Chunks: [0,10) and [10,25).
        push(&mut t, f, 0, 10, true);
        push(&mut t, f, 1, 5, false);
        assert!((t.progress(f).unwrap() - 15.0 / 25.0).abs() < 1e-9);
    }

    #[test]
    fn progress_never_regresses_across_pause() {
        let mut t = tree(10);
        let f = add(&mut t, "a.bin", 20);
        push(&mut t, f, 0, 8, false);
        let before = t.progress(f).unwrap();

        // A transport that re-counts the chunk from zero.
        let chunk = &mut t.file_mut(f).unwrap().chunks[0];
        chunk.restart_attempt().unwrap();
        assert!(t.progress(f).unwrap() >= before);

        let mut fx = Effects::default();
        t.pause(f, &mut fx).unwrap();
        assert!(t.progress(f).unwrap() >= before);
    }

    #[test]
    fn progress_resets_on_bootstrap() {
        let mut t = tree(10);
        let f = add(&mut t, "a.bin", 20);
        push(&mut t, f, 0, 10, true);
        assert!(t.progress(f).unwrap() > 0.0);
        let mut fx = Effects::default();
        t.bootstrap(f, &mut fx).unwrap();
        assert_eq!(t.progress(f).unwrap(), 0.0);
    }

    #[test]
    fn errored_file_reads_complete_progress() {
        let mut t = tree(10);
        let f = add(&mut t, "a.bin", 20);
        t.file_mut(f).unwrap().has_error = true;
        assert_eq!(t.progress(f).unwrap(), 1.0);
        assert!(!t.is_complete(f).unwrap());
    }

    #[test]
    fn folder_progress_weighted_by_child_size() {
        let mut t = tree(100);
        let a = add(&mut t, "d/a.bin", 10);
        add(&mut t, "d/e/b.bin", 30);
        push(&mut t, a, 0, 10, true);
        let d = t.folder("d/").unwrap();
        assert!((t.progress(d).unwrap() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn zero_byte_folder_progress_uses_completion() {
        let mut t = tree(100);
        let f = add(&mut t, "d/empty.txt", 0);
        let d = t.folder("d/").unwrap();
        assert_eq!(t.progress(d).unwrap(), 0.0);
        push(&mut t, f, 0, 0, true);
        assert_eq!(t.progress(d).unwrap(), 1.0);
    }

    #[test]
    fn empty_root_progress_is_complete() {
        let mut t = tree(100);
        let root = t.root();
        assert_eq!(t.progress(root).unwrap(), 1.0);
        assert!(t.is_complete(root).unwrap());
    }

    #[test]
    fn folder_completion_over_nested_depth() {
        let mut t = tree(100);
        let a = add(&mut t, "x/a.bin", 5);
        let b = add(&mut t, "x/y/z/b.bin", 5);
        let x = t.folder("x/").unwrap();
        let z = t.folder("x/y/z/").unwrap();

        push(&mut t, a, 0, 5, true);
        assert!(!t.is_complete(x).unwrap());
        assert!(!t.is_complete(z).unwrap());

        push(&mut t, b, 0, 5, true);
        assert!(t.is_complete(z).unwrap());
        assert!(t.is_complete(x).unwrap());
        assert!(t.is_complete(t.root()).unwrap());
    }

    #[test]
    fn uploading_propagates_to_folders() {
        let mut t = tree(100);
        let a = add(&mut t, "x/y/a.bin", 5);
        let x = t.folder("x/").unwrap();
        assert!(!t.is_uploading(x).unwrap());
        push(&mut t, a, 0, 1, false);
        assert!(t.is_uploading(a).unwrap());
        assert!(t.is_uploading(x).unwrap());
    }

    #[test]
    fn time_remaining_without_speed() {
        let mut t = tree(100);
        let f = add(&mut t, "a.bin", 50);
        assert_eq!(t.time_remaining(f).unwrap(), f64::INFINITY);

        push(&mut t, f, 0, 50, true);
        assert_eq!(t.time_remaining(f).unwrap(), 0.0);
    }

    #[test]
    fn time_remaining_uses_average_speed() {
        let mut t = tree(1000);
        let f = add(&mut t, "a.bin", 1000);
        t.file_mut(f)
            .unwrap()
            .speed
            .sample(0, std::time::Duration::from_secs(1), 1.0);
        // No bytes yet: speed is 0, still unbounded.
        assert_eq!(t.time_remaining(f).unwrap(), f64::INFINITY);

        push(&mut t, f, 0, 300, false);
        t.file_mut(f)
            .unwrap()
            .speed
            .sample(300, std::time::Duration::from_secs(1), 1.0);
        // 700 bytes left at 300 B/s.
        assert_eq!(t.time_remaining(f).unwrap(), 2.0);
    }

    #[test]
    fn time_remaining_skips_paused_and_errored() {
        let mut t = tree(100);
        let a = add(&mut t, "d/a.bin", 100);
        let b = add(&mut t, "d/b.bin", 100);
        let d = t.folder("d/").unwrap();
        let mut fx = Effects::default();
        t.pause(a, &mut fx).unwrap();
        t.file_mut(b).unwrap().has_error = true;

        assert_eq!(t.time_remaining(a).unwrap(), 0.0);
        assert_eq!(t.time_remaining(b).unwrap(), 0.0);
        assert_eq!(t.time_remaining(d).unwrap(), 0.0);
    }

    #[test]
    fn folder_time_remaining_counts_only_active_files() {
        let mut t = tree(1000);
        let a = add(&mut t, "d/a.bin", 1000);
        let b = add(&mut t, "d/b.bin", 1000);
        let c = add(&mut t, "d/c.bin", 1000);
        let d = t.folder("d/").unwrap();
        let second = std::time::Duration::from_secs(1);

        push(&mut t, a, 0, 400, false);
        t.file_mut(a).unwrap().speed.sample(400, second * 2, 1.0);
        push(&mut t, b, 0, 100, false);
        let mut fx = Effects::default();
        t.pause(b, &mut fx).unwrap();
        t.file_mut(b).unwrap().speed.sample(100, second, 1.0);
        push(&mut t, c, 0, 100, false);
        t.file_mut(c).unwrap().speed.sample(900, second, 1.0);
        t.file_mut(c).unwrap().has_error = true;

        // Only a: 600 bytes left at 200 B/s.
        assert_eq!(t.file(a).unwrap().average_speed(), 200.0);
        assert_eq!(t.time_remaining(d).unwrap(), (600.0_f64 / 200.0).floor());
        assert_eq!(t.time_remaining(d).unwrap(), t.time_remaining(a).unwrap());
    }
}
