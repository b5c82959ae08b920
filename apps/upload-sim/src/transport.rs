//! Simulated network transport and channel-backed scheduler.
//!
//! Each sent chunk runs as its own task that moves `bytes_per_tick` bytes
//! per tick and may break with `failure_rate` probability on any tick.
//! Broken attempts are retried from byte zero up to `max_retries` times,
//! after which the chunk is reported as failed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chunkflow_transfer::{ChunkEvent, ChunkRef, ChunkRequest, Scheduler, Transport};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::config::SimConfig;

/// A chunk outcome on its way back to the session.
pub type ChunkReport = (ChunkRef, ChunkEvent);

#[derive(Debug, Clone, Copy)]
struct LinkProfile {
    bytes_per_tick: u64,
    tick: Duration,
    failure_rate: f64,
    max_retries: u32,
    seed: u64,
}

/// Transport that pretends to upload over a flaky link.
pub struct SimTransport {
    inner: Arc<Inner>,
    handle: Handle,
}

struct Inner {
    in_flight: Mutex<HashMap<ChunkRef, CancellationToken>>,
    reports: mpsc::UnboundedSender<ChunkReport>,
    profile: LinkProfile,
}

impl SimTransport {
    /// Must be called from within a Tokio runtime.
    pub fn new(config: &SimConfig, reports: mpsc::UnboundedSender<ChunkReport>) -> Self {
        let profile = LinkProfile {
            bytes_per_tick: config.bytes_per_tick(),
            tick: config.tick(),
            failure_rate: config.failure_rate,
            max_retries: config.max_retries,
            seed: config.seed,
        };
        Self {
            inner: Arc::new(Inner {
                in_flight: Mutex::new(HashMap::new()),
                reports,
                profile,
            }),
            handle: Handle::current(),
        }
    }

    /// Transfers currently running.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.lock().len()
    }
}

impl Transport for SimTransport {
    fn send(&self, request: ChunkRequest) {
        let token = CancellationToken::new();
        self.inner
            .in_flight
            .lock()
            .insert(request.chunk, token.clone());
        let inner = Arc::clone(&self.inner);
        self.handle.spawn(inner.transfer(request, token));
    }

    fn abort(&self, chunk: ChunkRef) {
        if let Some(token) = self.inner.in_flight.lock().remove(&chunk) {
            token.cancel();
            debug!(file = %chunk.file, chunk = chunk.index, "transfer aborted");
        }
    }
}

impl Inner {
    async fn transfer(self: Arc<Self>, request: ChunkRequest, token: CancellationToken) {
        let chunk = request.chunk;
        let profile = self.profile;
        let len = request.end_byte - request.start_byte;
        let mut sent = request.resume_from.min(len);
        let mut retries = 0;
        let mut rng = StdRng::seed_from_u64(profile.seed ^ chunk_seed(chunk));

        while sent < len {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(profile.tick) => {}
            }

            if rng.gen_bool(profile.failure_rate) {
                if retries < profile.max_retries {
                    retries += 1;
                    sent = 0;
                    trace!(file = %chunk.file, chunk = chunk.index, retries, "attempt broke, retrying");
                    self.report(chunk, ChunkEvent::Retry);
                    continue;
                }
                self.finish(
                    chunk,
                    ChunkEvent::Error {
                        message: format!("connection reset after {retries} retries"),
                    },
                );
                return;
            }

            sent = (sent + profile.bytes_per_tick).min(len);
            self.report(chunk, ChunkEvent::Progress { bytes: sent });
        }

        self.finish(
            chunk,
            ChunkEvent::Success {
                message: format!("stored {} bytes", request.end_byte - request.start_byte),
            },
        );
    }

    fn report(&self, chunk: ChunkRef, event: ChunkEvent) {
        // The driver is gone only when the run is over.
        let _ = self.reports.send((chunk, event));
    }

    /// Reports the final outcome unless the transfer was aborted meanwhile.
    fn finish(&self, chunk: ChunkRef, event: ChunkEvent) {
        if self.in_flight.lock().remove(&chunk).is_some() {
            self.report(chunk, event);
        }
    }
}

fn chunk_seed(chunk: ChunkRef) -> u64 {
    (chunk.file.index() as u64)
        .wrapping_mul(1_000_003)
        .wrapping_add((chunk.index as u64).wrapping_mul(7919))
        .wrapping_add(chunk.generation)
}

/// Scheduler that wakes the driver loop; the loop itself enforces the
/// concurrency limit.
pub struct ChannelScheduler {
    wake: mpsc::UnboundedSender<()>,
}

impl ChannelScheduler {
    pub fn new(wake: mpsc::UnboundedSender<()>) -> Self {
        Self { wake }
    }
}

impl Scheduler for ChannelScheduler {
    fn upload(&self) {
        let _ = self.wake.send(());
    }

    fn upload_next_chunk(&self) {
        let _ = self.wake.send(());
    }
}

#[cfg(test)]
mod tests {
    use chunkflow_transfer::{FileDescriptor, UploadSession};

    use super::*;

    fn config(failure_rate: f64) -> SimConfig {
        SimConfig {
            throughput: 1000,
            tick_ms: 100,
            failure_rate,
            max_retries: 1,
            ..Default::default()
        }
    }

    async fn collect(rx: &mut mpsc::UnboundedReceiver<ChunkReport>) -> Vec<ChunkEvent> {
        let mut events = Vec::new();
        while let Some((_, event)) = rx.recv().await {
            let done = matches!(event, ChunkEvent::Success { .. } | ChunkEvent::Error { .. });
            events.push(event);
            if done {
                break;
            }
        }
        events
    }

    fn request_for(session: &UploadSession, size: u64) -> ChunkRequest {
        session.add_file(&FileDescriptor::new("a.bin", size)).unwrap();
        let chunk = session.next_ready_chunk().unwrap();
        session.start_chunk(chunk).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn clean_link_reports_progress_then_success() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let transport = SimTransport::new(&config(0.0), tx);
        let session = UploadSession::builder().build().unwrap();

        transport.send(request_for(&session, 250));
        assert_eq!(transport.in_flight(), 1);

        let events = collect(&mut rx).await;
        assert_eq!(
            &events[..3],
            &[
                ChunkEvent::Progress { bytes: 100 },
                ChunkEvent::Progress { bytes: 200 },
                ChunkEvent::Progress { bytes: 250 },
            ]
        );
        assert!(matches!(events[3], ChunkEvent::Success { .. }));
        assert_eq!(transport.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn broken_link_retries_then_fails() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let transport = SimTransport::new(&config(1.0), tx);
        let session = UploadSession::builder().build().unwrap();

        transport.send(request_for(&session, 250));
        let events = collect(&mut rx).await;
        assert_eq!(events[0], ChunkEvent::Retry);
        assert!(matches!(events[1], ChunkEvent::Error { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn aborted_transfer_stays_silent() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let transport = SimTransport::new(&config(0.0), tx);
        let session = UploadSession::builder().build().unwrap();

        let request = request_for(&session, 10_000);
        let chunk = request.chunk;
        transport.send(request);
        transport.abort(chunk);
        transport.abort(chunk);
        assert_eq!(transport.in_flight(), 0);

        drop(transport);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn scheduler_wakes_driver() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let scheduler = ChannelScheduler::new(tx);
        scheduler.upload();
        scheduler.upload_next_chunk();
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());
    }
}
