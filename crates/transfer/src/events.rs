//! Reactions to transport-reported chunk events.

use tokio::time::Instant;
use tracing::{debug, trace, warn};

use chunkflow_protocol::ChunkEvent;

use crate::entry::FileState;
use crate::tree::EntryTree;
use crate::types::{ChunkRef, Effects, UploadEvent};
use crate::TransferError;

impl EntryTree {
    /// Applies a transport report for `chunk`, observed at `now`.
    ///
    /// Reports for chunks that were discarded by a bootstrap, or that no
    /// longer sit with the transport (aborted by a pause, say), are dropped.
    pub(crate) fn chunk_event(
        &mut self,
        chunk: ChunkRef,
        event: &ChunkEvent,
        now: Instant,
        fx: &mut Effects,
    ) -> Result<(), TransferError> {
        let interval = self.options.progress_interval();
        let smoothing = self.options.speed_smoothing_factor;
        let file_id = chunk.file;
        let index = chunk.index;

        let file = self.file_mut(file_id)?;
        if file.generation != chunk.generation {
            trace!(file = %file_id, chunk = index, "dropping event for discarded chunk");
            return Ok(());
        }
        let Some(c) = file.chunks.get_mut(index) else {
            return Err(TransferError::ChunkOutOfRange {
                file: file_id,
                index,
            });
        };

        match event {
            ChunkEvent::Progress { bytes } => {
                if let Err(e) = c.record_progress(*bytes) {
                    trace!(file = %file_id, chunk = index, error = %e, "late progress ignored");
                    return Ok(());
                }
                if now.duration_since(file.last_progress_at) < interval {
                    return Ok(());
                }
                measure_speed(file, now, smoothing);
                fx.emit(UploadEvent::FileProgress {
                    file: file_id,
                    chunk: index,
                });
                fx.emit(UploadEvent::Progress);
                file.last_progress_at = now;
            }
            ChunkEvent::Error { message } => {
                if let Err(e) = c.fail() {
                    debug!(file = %file_id, chunk = index, error = %e, "late error ignored");
                    return Ok(());
                }
                file.has_error = true;
                warn!(file = %file_id, chunk = index, %message, "chunk failed, stopping file");
                self.abort(file_id, false, fx)?;
                fx.emit(UploadEvent::FileError {
                    file: file_id,
                    chunk: index,
                    message: message.clone(),
                });
                fx.emit(UploadEvent::Error {
                    file: file_id,
                    chunk: index,
                    message: message.clone(),
                });
            }
            ChunkEvent::Success { message } => {
                if file.has_error {
                    debug!(file = %file_id, chunk = index, "success after file error ignored");
                    return Ok(());
                }
                if let Err(e) = c.succeed() {
                    debug!(file = %file_id, chunk = index, error = %e, "late success ignored");
                    return Ok(());
                }
                file.success_message.clone_from(message);
                measure_speed(file, now, smoothing);
                fx.emit(UploadEvent::FileProgress {
                    file: file_id,
                    chunk: index,
                });
                fx.emit(UploadEvent::Progress);
                file.last_progress_at = now;

                if file.is_complete() && !file.success_emitted {
                    file.speed.reset();
                    file.success_emitted = true;
                    debug!(file = %file_id, "file complete");
                    fx.emit(UploadEvent::FileSuccess {
                        file: file_id,
                        chunk: index,
                        message: message.clone(),
                    });
                }
            }
            ChunkEvent::Retry => {
                if let Err(e) = c.restart_attempt() {
                    trace!(file = %file_id, chunk = index, error = %e, "late retry ignored");
                    return Ok(());
                }
                fx.emit(UploadEvent::FileRetry {
                    file: file_id,
                    chunk: index,
                });
            }
        }
        Ok(())
    }
}

fn measure_speed(file: &mut FileState, now: Instant, smoothing: f64) {
    let elapsed = now.duration_since(file.last_progress_at);
    let uploaded = file.size_uploaded();
    file.speed.sample(uploaded, elapsed, smoothing);
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chunkflow_protocol::{ChunkStatus, FileDescriptor, UploadOptions};

    use super::*;
    use crate::types::EntryId;

    fn tree(options: UploadOptions) -> EntryTree {
        EntryTree::new(options, None)
    }

    fn add(tree: &mut EntryTree, path: &str, size: u64) -> EntryId {
        let mut fx = Effects::default();
        tree.add_file(&FileDescriptor::new(path, size), path.into(), &mut fx)
            .unwrap()
    }

    fn start_all(tree: &mut EntryTree) -> Vec<ChunkRef> {
        let mut started = Vec::new();
        while let Some(c) = tree.next_ready_chunk() {
            tree.start_chunk(c).unwrap();
            started.push(c);
        }
        started
    }

    fn success() -> ChunkEvent {
        ChunkEvent::Success {
            message: "ok".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn progress_is_rate_limited() {
        let mut t = tree(UploadOptions {
            chunk_size: 1000,
            progress_callbacks_interval: 500,
            ..Default::default()
        });
        let f = add(&mut t, "a.bin", 1000);
        let chunks = start_all(&mut t);
        let start = Instant::now();

        let mut fx = Effects::default();
        t.chunk_event(chunks[0], &ChunkEvent::Progress { bytes: 100 }, start, &mut fx)
            .unwrap();
        assert!(fx.events.is_empty());
        // Bytes are recorded even when the notification is skipped.
        assert_eq!(t.file(f).unwrap().size_uploaded(), 100);

        let later = start + Duration::from_millis(600);
        t.chunk_event(chunks[0], &ChunkEvent::Progress { bytes: 400 }, later, &mut fx)
            .unwrap();
        assert_eq!(
            fx.events,
            vec![
                UploadEvent::FileProgress { file: f, chunk: 0 },
                UploadEvent::Progress
            ]
        );
        let file = t.file(f).unwrap();
        assert!(file.current_speed() > 0.0);
        assert!(file.average_speed() > 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn error_stops_file_and_success_is_ignored_afterwards() {
        let mut t = tree(UploadOptions {
            chunk_size: 10,
            ..Default::default()
        });
        let f = add(&mut t, "a.bin", 30);
        let chunks = start_all(&mut t);
        let now = Instant::now();

        let mut fx = Effects::default();
        t.chunk_event(
            chunks[0],
            &ChunkEvent::Error {
                message: "boom".into(),
            },
            now,
            &mut fx,
        )
        .unwrap();

        let file = t.file(f).unwrap();
        assert!(file.has_error());
        assert_eq!(file.chunks().len(), 3);
        assert_eq!(file.chunks()[0].status(), ChunkStatus::Error);
        assert_eq!(file.chunks()[1].status(), ChunkStatus::Aborted);
        assert_eq!(fx.freed_slots, 2);
        assert!(matches!(fx.events[0], UploadEvent::FileError { .. }));
        assert!(matches!(fx.events[1], UploadEvent::Error { .. }));

        let mut fx = Effects::default();
        t.chunk_event(chunks[1], &success(), now, &mut fx).unwrap();
        assert!(fx.events.is_empty());
        assert_eq!(
            t.file(f).unwrap().chunks()[1].status(),
            ChunkStatus::Aborted
        );
    }

    #[tokio::test(start_paused = true)]
    async fn file_success_emitted_once() {
        let mut t = tree(UploadOptions {
            chunk_size: 10,
            ..Default::default()
        });
        let f = add(&mut t, "a.bin", 20);
        let chunks = start_all(&mut t);
        let now = Instant::now() + Duration::from_secs(1);

        let mut fx = Effects::default();
        t.chunk_event(chunks[0], &success(), now, &mut fx).unwrap();
        assert!(
            !fx.events
                .iter()
                .any(|e| matches!(e, UploadEvent::FileSuccess { .. }))
        );

        t.chunk_event(chunks[1], &success(), now, &mut fx).unwrap();
        t.chunk_event(chunks[1], &success(), now, &mut fx).unwrap();
        let successes = fx
            .events
            .iter()
            .filter(|e| matches!(e, UploadEvent::FileSuccess { .. }))
            .count();
        assert_eq!(successes, 1);

        let file = t.file(f).unwrap();
        assert!(file.is_complete());
        assert_eq!(file.current_speed(), 0.0);
        assert_eq!(file.average_speed(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_restarts_chunk_and_notifies() {
        let mut t = tree(UploadOptions {
            chunk_size: 10,
            ..Default::default()
        });
        let f = add(&mut t, "a.bin", 10);
        let chunks = start_all(&mut t);
        let now = Instant::now();

        let mut fx = Effects::default();
        t.chunk_event(chunks[0], &ChunkEvent::Progress { bytes: 6 }, now, &mut fx)
            .unwrap();
        t.chunk_event(chunks[0], &ChunkEvent::Retry, now, &mut fx)
            .unwrap();
        assert_eq!(
            fx.events.last(),
            Some(&UploadEvent::FileRetry { file: f, chunk: 0 })
        );
        let chunk = &t.file(f).unwrap().chunks()[0];
        assert_eq!(chunk.bytes_uploaded(), 0);
        assert_eq!(chunk.retry_count(), 1);
        assert_eq!(chunk.status(), ChunkStatus::Uploading);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_generation_is_dropped() {
        let mut t = tree(UploadOptions {
            chunk_size: 10,
            ..Default::default()
        });
        let f = add(&mut t, "a.bin", 10);
        let chunks = start_all(&mut t);
        let mut fx = Effects::default();
        t.retry(f, None, &mut fx).unwrap();

        let mut fx = Effects::default();
        t.chunk_event(chunks[0], &success(), Instant::now(), &mut fx)
            .unwrap();
        assert!(fx.events.is_empty());
        assert_eq!(
            t.file(f).unwrap().chunks()[0].status(),
            ChunkStatus::Pending
        );
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_range_chunk_is_an_error() {
        let mut t = tree(UploadOptions::default());
        let f = add(&mut t, "a.bin", 10);
        let bogus = ChunkRef {
            file: f,
            index: 7,
            generation: 1,
        };
        let mut fx = Effects::default();
        assert!(matches!(
            t.chunk_event(bogus, &success(), Instant::now(), &mut fx),
            Err(TransferError::ChunkOutOfRange { index: 7, .. })
        ));
    }
}
