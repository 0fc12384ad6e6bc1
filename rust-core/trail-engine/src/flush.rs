// SPDX-License-Identifier: PMPL-1.0-or-later
//
// TrailStore engine - Background flush worker
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// One thread takes sealed buffers off a bounded queue, stores each as a chunk
// file named after its first id, registers the file, retires the buffer and
// trims the WAL range the file now covers. Buffers are handled strictly in
// queue order and a failing buffer is retried before anything behind it.
// A buffer given up on at close stops the worker from storing anything
// else, so no later chunk file or WAL truncation can cover its ids.

use std::path::PathBuf;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};
use trail_chunks::{chunk_path, ChunkCatalog, ChunkError, ChunkInfo, MemoryBuffer};
use trail_wal::{SyncMode, WalTruncator};

use crate::config::EngineConfig;
use crate::engine::{SharedState, WriteSide};

/// Idle wake-up used when the WAL has no periodic commit interval.
const IDLE_TICK: Duration = Duration::from_secs(1);

/// A sealed buffer waiting to be stored.
pub(crate) struct FlushJob {
    pub(crate) buffer: Arc<MemoryBuffer>,
}

/// Counts buffers handed to the worker that have not been stored or given up
/// on yet.
#[derive(Debug, Default)]
pub(crate) struct FlushTracker {
    pending: Mutex<usize>,
    idle: Condvar,
}

impl FlushTracker {
    pub(crate) fn started(&self) {
        *self.pending.lock() += 1;
    }

    pub(crate) fn finished(&self) {
        let mut pending = self.pending.lock();
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.idle.notify_all();
        }
    }

    pub(crate) fn pending(&self) -> usize {
        *self.pending.lock()
    }

    /// Wait until nothing is pending. Returns `false` on timeout.
    pub(crate) fn wait_idle(&self, timeout: Duration) -> bool {
        let mut pending = self.pending.lock();
        if *pending == 0 {
            return true;
        }
        let result = self.idle.wait_while_for(&mut pending, |pending| *pending > 0, timeout);
        !result.timed_out() || *pending == 0
    }
}

pub(crate) struct FlushWorker {
    catalog: Arc<ChunkCatalog>,
    truncator: WalTruncator,
    writer: Weak<Mutex<WriteSide>>,
    tracker: Arc<FlushTracker>,
    state: Arc<SharedState>,
    retry_interval: Duration,
    close_attempts: u32,
    tick: Duration,
}

impl FlushWorker {
    pub(crate) fn new(
        config: &EngineConfig,
        catalog: Arc<ChunkCatalog>,
        truncator: WalTruncator,
        writer: Weak<Mutex<WriteSide>>,
        tracker: Arc<FlushTracker>,
        state: Arc<SharedState>,
    ) -> Self {
        let tick = match config.wal.sync_mode {
            SyncMode::Periodic(interval) if !interval.is_zero() => interval,
            _ => IDLE_TICK,
        };
        Self {
            catalog,
            truncator,
            writer,
            tracker,
            state,
            retry_interval: config.flush_retry_interval,
            close_attempts: config.close_flush_attempts.max(1),
            tick,
        }
    }

    /// Start the worker thread. It exits once every sender is dropped and
    /// the queue is drained.
    pub(crate) fn spawn(self, jobs: Receiver<FlushJob>) -> std::io::Result<thread::JoinHandle<()>> {
        thread::Builder::new()
            .name("trail-flush".into())
            .spawn(move || self.run(jobs))
    }

    fn run(self, jobs: Receiver<FlushJob>) {
        debug!("Flush worker started");
        let mut stalled = false;
        loop {
            match jobs.recv_timeout(self.tick) {
                Ok(job) => {
                    if stalled {
                        warn!(
                            first_id = ?job.buffer.first_id(),
                            rows = job.buffer.len(),
                            "Not storing buffer behind one that failed; its events remain in the WAL"
                        );
                    } else if !self.flush(&job.buffer) {
                        stalled = true;
                    }
                    self.tracker.finished();
                }
                Err(RecvTimeoutError::Timeout) => self.idle(),
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        debug!("Flush worker stopped");
    }

    /// Periodic housekeeping while no buffer is waiting.
    fn idle(&self) {
        if let Some(writer) = self.writer.upgrade() {
            // A writer holding the lock is appending and will sync itself.
            if let Some(mut side) = writer.try_lock() {
                if let Err(err) = side.wal.sync_if_due() {
                    warn!(error = %err, "Periodic WAL commit failed");
                }
            }
        }
        self.catalog.purge_idle_readers();
    }

    /// Store `buffer`, retrying until it succeeds or the engine is closing
    /// and the close attempts are used up. Returns `false` if it gave up.
    fn flush(&self, buffer: &Arc<MemoryBuffer>) -> bool {
        let Some(first_id) = buffer.first_id() else {
            return true;
        };

        info!(first_id, rows = buffer.len(), "Flushing buffer to chunk file");
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.store(buffer, first_id) {
                Ok(info) => {
                    self.complete(buffer, first_id, info);
                    return true;
                }
                Err(err) => {
                    error!(
                        first_id,
                        attempt = attempts,
                        error = %err,
                        "Flushing buffer to chunk file failed"
                    );
                    if self.state.is_closing() && attempts >= self.close_attempts {
                        warn!(
                            first_id,
                            rows = buffer.len(),
                            "Giving up on buffer at close; its events remain in the WAL"
                        );
                        return false;
                    }
                    thread::sleep(self.retry_interval);
                }
            }
        }
    }

    /// Write the chunk file, stepping the name past existing files.
    fn store(&self, buffer: &MemoryBuffer, first_id: u64) -> Result<(PathBuf, ChunkInfo), ChunkError> {
        let mut candidate = first_id;
        loop {
            let path = chunk_path(self.catalog.chunk_dir(), candidate);
            match buffer.seal_and_store(&path) {
                Ok(info) => return Ok((path, info)),
                Err(ChunkError::AlreadyExists { .. }) => {
                    error!(first_id, candidate, "Chunk file name already taken, trying the next id");
                    candidate = candidate.checked_add(1).ok_or_else(|| ChunkError::Integrity {
                        path: path.clone(),
                        reason: "no free chunk file name".into(),
                    })?;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn complete(&self, buffer: &MemoryBuffer, first_id: u64, (path, info): (PathBuf, ChunkInfo)) {
        // Register before leaving the flushing set so readers always find
        // the rows in one of the two.
        self.catalog.register_file(path.clone(), info);
        self.catalog.finish_flush(first_id);
        buffer.retire();

        // Never past a buffer that is still waiting for its file.
        let upto = self
            .catalog
            .flushing()
            .iter()
            .filter_map(|waiting| waiting.first_id())
            .fold(info.last_id.saturating_add(1), u64::min);
        let report = self.truncator.truncate_sealed(upto);
        info!(
            path = %path.display(),
            rows = info.rows,
            first_id = info.first_id,
            last_id = info.last_id,
            wal_segments_deleted = report.deleted,
            wal_segments_rewritten = report.rewritten,
            "Buffer flushed to chunk file"
        );
        if report.skipped > 0 {
            warn!(skipped = report.skipped, "Some WAL segments could not be truncated");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_idle_when_nothing_started() {
        let tracker = FlushTracker::default();
        assert!(tracker.wait_idle(Duration::from_millis(1)));
    }

    #[test]
    fn test_tracker_times_out_while_pending() {
        let tracker = FlushTracker::default();
        tracker.started();
        assert_eq!(tracker.pending(), 1);
        assert!(!tracker.wait_idle(Duration::from_millis(20)));
    }

    #[test]
    fn test_tracker_wakes_waiter() {
        let tracker = Arc::new(FlushTracker::default());
        tracker.started();
        let finisher = {
            let tracker = Arc::clone(&tracker);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                tracker.finished();
            })
        };
        assert!(tracker.wait_idle(Duration::from_secs(5)));
        finisher.join().unwrap();
        assert_eq!(tracker.pending(), 0);
    }
}
