//! The event loop that pumps a session through the simulated transport.

use std::sync::Arc;

use chunkflow_transfer::{EntryId, FileDescriptor, UploadEvent, UploadSession};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SimConfig;
use crate::error::SimError;
use crate::transport::{ChannelScheduler, ChunkReport, SimTransport};

/// Outcome of a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Summary {
    pub files: usize,
    pub completed: usize,
    pub failed: usize,
    pub bytes_uploaded: u64,
    pub bytes_total: u64,
    /// The run was stopped before every file settled.
    pub interrupted: bool,
}

/// Uploads `files` with the simulated transport until every file has either
/// completed or failed, or `cancel` fires.
pub async fn run(
    config: &SimConfig,
    files: &[FileDescriptor],
    cancel: CancellationToken,
) -> Result<Summary, SimError> {
    let (reports_tx, mut reports_rx) = mpsc::unbounded_channel::<ChunkReport>();
    let (wake_tx, mut wake_rx) = mpsc::unbounded_channel();

    let transport = Arc::new(SimTransport::new(config, reports_tx));
    let session = UploadSession::builder()
        .options(config.upload.clone())
        .transport(transport.clone())
        .scheduler(Arc::new(ChannelScheduler::new(wake_tx)))
        .build()?;
    let mut events = session
        .take_events()
        .ok_or_else(|| SimError::Config("event stream already taken".into()))?;

    session.add_files(files)?;
    let root = session.root();
    info!(
        files = files.len(),
        total_bytes = session.size(root)?,
        concurrency = config.concurrency,
        "starting upload"
    );

    let mut report = tokio::time::interval(config.report_interval());
    let mut interrupted = false;

    loop {
        while transport.in_flight() < config.concurrency {
            if session.dispatch_next()?.is_none() {
                break;
            }
        }
        if !session.is_uploading(root)? && session.next_ready_chunk().is_none() {
            break;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("interrupted, pausing all transfers");
                session.pause_all()?;
                interrupted = true;
                break;
            }
            Some((chunk, event)) = reports_rx.recv() => session.chunk_event(chunk, event)?,
            Some(()) = wake_rx.recv() => {}
            Some(event) = events.recv() => log_event(&session, &event),
            _ = report.tick() => report_progress(&session, root)?,
        }
    }

    while let Ok(event) = events.try_recv() {
        log_event(&session, &event);
    }
    report_progress(&session, root)?;

    let mut summary = Summary {
        files: files.len(),
        bytes_uploaded: session.size_uploaded(root)?,
        bytes_total: session.size(root)?,
        interrupted,
        ..Default::default()
    };
    for file in session.files() {
        if session.is_complete(file)? {
            summary.completed += 1;
        } else if session.has_error(file)? {
            summary.failed += 1;
        }
    }
    Ok(summary)
}

fn display_name(session: &UploadSession, id: EntryId) -> String {
    session
        .with_entry(id, |e| match e.as_file() {
            Some(file) => file.relative_path.clone(),
            None => e.path().to_string(),
        })
        .unwrap_or_else(|_| id.to_string())
}

fn log_event(session: &UploadSession, event: &UploadEvent) {
    match event {
        UploadEvent::FileSuccess { file, .. } => {
            let kind = session
                .with_entry(*file, |e| e.file_type().to_string())
                .unwrap_or_default();
            info!(file = %display_name(session, *file), %kind, "file uploaded");
        }
        UploadEvent::FileError {
            file,
            chunk,
            message,
        } => {
            warn!(file = %display_name(session, *file), chunk, %message, "file failed");
        }
        UploadEvent::FileRetry { file, chunk } => {
            debug!(file = %display_name(session, *file), chunk, "chunk retrying");
        }
        UploadEvent::Error { .. } | UploadEvent::Progress | UploadEvent::FileProgress { .. } => {}
    }
}

fn report_progress(session: &UploadSession, root: EntryId) -> Result<(), SimError> {
    let progress = session.progress(root)?;
    let remaining = session.time_remaining(root)?;
    let eta = if remaining.is_finite() {
        format!("{remaining}s")
    } else {
        "unknown".to_string()
    };
    info!(
        progress = %format!("{:.1}%", progress * 100.0),
        uploaded = session.size_uploaded(root)?,
        total = session.size(root)?,
        %eta,
        "upload progress"
    );
    Ok(())
}
