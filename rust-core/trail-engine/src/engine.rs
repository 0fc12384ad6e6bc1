// SPDX-License-Identifier: PMPL-1.0-or-later
//
// TrailStore engine - Storage engine
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The write path (WAL, live buffer, swap) runs under one mutex. Swapped-out
// buffers go to the flush worker over a bounded channel, so a writer that
// outpaces the disk blocks on the send instead of piling up buffers. Reads
// go straight to the catalog and never take the write lock.

use std::fs;
use std::ops::Range;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc::{self, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use trail_chunks::{
    predicates, CatalogIter, ChunkCatalog, ChunkWatcher, MemoryBuffer, RoaringTreemap,
};
use trail_event::{Event, Sequencer};
use trail_wal::WriteAheadLog;

use crate::config::EngineConfig;
use crate::error::{AppendError, EngineResult, ReadError};
use crate::flush::{FlushJob, FlushTracker, FlushWorker};
use crate::recovery::{self, RecoveryReport};

/// Lifecycle of a [`StorageEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Open,
    Closing,
    Closed,
}

impl EngineState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => EngineState::Open,
            1 => EngineState::Closing,
            _ => EngineState::Closed,
        }
    }
}

/// Engine state shared with the flush worker.
#[derive(Debug)]
pub(crate) struct SharedState(AtomicU8);

impl SharedState {
    fn new() -> Self {
        Self(AtomicU8::new(EngineState::Open as u8))
    }

    pub(crate) fn get(&self) -> EngineState {
        EngineState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn is_closing(&self) -> bool {
        self.get() != EngineState::Open
    }

    /// Move from `Open` to `Closing`. Only the first caller gets `true`.
    fn begin_close(&self) -> bool {
        self.0
            .compare_exchange(
                EngineState::Open as u8,
                EngineState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    fn set_closed(&self) {
        self.0.store(EngineState::Closed as u8, Ordering::Release);
    }
}

/// Everything the write path owns.
pub(crate) struct WriteSide {
    pub(crate) wal: WriteAheadLog,
    pub(crate) last_id: Option<u64>,
    sequencer: Sequencer,
    sender: Option<SyncSender<FlushJob>>,
}

impl WriteSide {
    /// Mint an id greater than everything stored so far.
    fn next_id(&mut self) -> u64 {
        let id = self.sequencer.tick_now();
        match self.last_id {
            Some(last) if id <= last => {
                // Explicit ids from `append` ran ahead of the clock.
                self.sequencer = Sequencer::starting_after(last);
                self.sequencer.tick_now()
            }
            _ => id,
        }
    }
}

/// Point-in-time counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub state: EngineState,
    /// Rows in the live buffer.
    pub live_rows: usize,
    /// Sealed buffers not yet replaced by chunk files.
    pub flushing_buffers: usize,
    /// Buffers handed to the flush worker and not finished.
    pub pending_flushes: usize,
    pub chunk_files: usize,
    pub cached_readers: usize,
    /// WAL segments on disk, the active one included.
    pub wal_segments: usize,
    /// Newest id accepted by the write path.
    pub last_id: Option<u64>,
}

/// Embedded append-only event store.
pub struct StorageEngine {
    config: EngineConfig,
    state: Arc<SharedState>,
    writer: Arc<Mutex<WriteSide>>,
    catalog: Arc<ChunkCatalog>,
    tracker: Arc<FlushTracker>,
    worker: Mutex<Option<JoinHandle<()>>>,
    watcher: Mutex<Option<ChunkWatcher>>,
    recovery: RecoveryReport,
}

impl StorageEngine {
    /// Open (or create) a store and recover the events the WAL holds beyond
    /// the newest chunk file.
    pub fn open(config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        if !config.read_only {
            fs::create_dir_all(&config.chunk_dir)?;
            fs::create_dir_all(&config.wal_dir)?;
        }

        let live = Arc::new(MemoryBuffer::new(config.memory_threshold));
        let catalog = Arc::new(ChunkCatalog::open(
            &config.chunk_dir,
            live,
            config.reader_cache_capacity,
            config.reader_cache_ttl,
        )?);

        let watcher = if config.watch_chunk_dir {
            let handler_catalog = Arc::clone(&catalog);
            match ChunkWatcher::spawn(&config.chunk_dir, move |event| handler_catalog.apply(event)) {
                Ok(watcher) => {
                    // Files created between the first listing and the watch.
                    catalog.rescan()?;
                    Some(watcher)
                }
                Err(err) => {
                    warn!(
                        dir = %config.chunk_dir.display(),
                        error = %err,
                        "Chunk directory watch unavailable; externally created files will not be seen"
                    );
                    None
                }
            }
        } else {
            None
        };

        let wal = if config.read_only {
            WriteAheadLog::open_read_only(&config.wal_dir, config.wal.clone())?
        } else {
            WriteAheadLog::open(&config.wal_dir, config.wal.clone())?
        };
        let truncator = if config.read_only {
            None
        } else {
            Some(wal.truncator()?)
        };

        let state = Arc::new(SharedState::new());
        let tracker = Arc::new(FlushTracker::default());
        let (sender, receiver) = if config.read_only {
            (None, None)
        } else {
            let (sender, receiver) = mpsc::sync_channel(config.flush_queue_depth);
            (Some(sender), Some(receiver))
        };

        let writer = Arc::new(Mutex::new(WriteSide {
            wal,
            last_id: None,
            sequencer: Sequencer::new(),
            sender,
        }));

        let worker = match (receiver, truncator) {
            (Some(receiver), Some(truncator)) => Some(
                FlushWorker::new(
                    &config,
                    Arc::clone(&catalog),
                    truncator,
                    Arc::downgrade(&writer),
                    Arc::clone(&tracker),
                    Arc::clone(&state),
                )
                .spawn(receiver)?,
            ),
            _ => None,
        };

        let mut engine = Self {
            config,
            state,
            writer,
            catalog,
            tracker,
            worker: Mutex::new(worker),
            watcher: Mutex::new(watcher),
            recovery: RecoveryReport::default(),
        };

        let boundary = engine.catalog.newest_file_id();
        let report = {
            let mut side = engine.writer.lock();
            let report = recovery::replay(&engine, &mut side, boundary)?;
            let last_id = [Some(boundary).filter(|id| *id > 0), side.wal.last_id(), report.last_replayed]
                .into_iter()
                .flatten()
                .max();
            side.last_id = last_id;
            side.sequencer = Sequencer::starting_after(last_id.unwrap_or(0));
            report
        };
        engine.recovery = report;

        info!(
            chunk_dir = %engine.config.chunk_dir.display(),
            wal_dir = %engine.config.wal_dir.display(),
            read_only = engine.config.read_only,
            chunk_files = engine.catalog.stats().files,
            replayed = engine.recovery.replayed,
            "Opened storage engine"
        );
        Ok(engine)
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Append an event. Its id must be greater than every id already stored.
    ///
    /// The event is handed to readers before this returns. It reaches stable
    /// storage according to the WAL sync mode.
    pub fn append(&self, event: Event) -> Result<(), AppendError> {
        self.check_writable()?;
        let mut side = self.writer.lock();
        self.check_writable()?;
        self.append_locked(&mut side, event)
    }

    /// Append an event under a freshly minted id and return the id.
    pub fn append_new(
        &self,
        key: impl Into<Vec<u8>>,
        metadata: Option<Vec<u8>>,
        data: impl Into<Vec<u8>>,
    ) -> Result<u64, AppendError> {
        self.check_writable()?;
        let mut side = self.writer.lock();
        self.check_writable()?;
        let id = side.next_id();
        self.append_locked(&mut side, Event::new(id, key.into(), metadata, data.into()))?;
        Ok(id)
    }

    /// Force appended events to stable storage now.
    pub fn sync(&self) -> Result<(), AppendError> {
        self.check_writable()?;
        self.writer.lock().wal.sync()?;
        Ok(())
    }

    fn check_writable(&self) -> Result<(), AppendError> {
        if self.state.is_closing() {
            return Err(AppendError::Closed);
        }
        if self.config.read_only {
            return Err(AppendError::ReadOnly);
        }
        Ok(())
    }

    fn append_locked(&self, side: &mut WriteSide, event: Event) -> Result<(), AppendError> {
        if let Some(last) = side.last_id {
            if event.id <= last {
                return Err(AppendError::NonIncreasingId { id: event.id, last });
            }
        }
        // The buffer must take the event once the WAL has it.
        let mut live = self.catalog.live();
        if live.is_sealed() || live.is_full() {
            self.swap(side, live);
            live = self.catalog.live();
        }

        let id = event.id;
        side.wal.append(&event)?;
        side.last_id = Some(id);
        live.append(event)?;
        self.check_swap(side);
        Ok(())
    }

    /// Hand the live buffer to the flush worker once it holds
    /// `memory_threshold` rows.
    pub(crate) fn check_swap(&self, side: &mut WriteSide) {
        let live = self.catalog.live();
        if live.len() >= self.config.memory_threshold {
            self.swap(side, live);
        }
    }

    /// Seal `live`, put a fresh buffer in its place and queue it for storing.
    fn swap(&self, side: &mut WriteSide, live: Arc<MemoryBuffer>) {
        live.seal();
        if live.is_empty() {
            self.catalog
                .set_live(Arc::new(MemoryBuffer::new(self.config.memory_threshold)));
            return;
        }
        if side.sender.is_some() {
            // Later appends go to a new segment, so the sealed buffer's
            // events are only ever in sealed segments.
            if let Err(err) = side.wal.roll() {
                warn!(error = %err, "Rolling the WAL at buffer swap failed");
            }
        }
        self.catalog.begin_flush(Arc::clone(&live));
        self.catalog
            .set_live(Arc::new(MemoryBuffer::new(self.config.memory_threshold)));
        debug!(
            first_id = ?live.first_id(),
            last_id = ?live.last_id(),
            rows = live.len(),
            "Swapped live buffer"
        );

        match &side.sender {
            Some(sender) => {
                self.tracker.started();
                if sender.send(FlushJob { buffer: live }).is_err() {
                    self.tracker.finished();
                    error!("Flush worker is not running; sealed buffer stays in memory and in the WAL");
                }
            }
            None => debug!("Read-only engine keeps sealed buffer in memory"),
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Every stored event, each id exactly once. Events of one source come
    /// in append order; the iterator keeps finding newer events after it
    /// first returns `None`.
    pub fn read_all(&self) -> CatalogIter {
        self.catalog.read_all()
    }

    /// Every stored event for which `predicate` holds.
    pub fn read_filtered<P>(&self, predicate: P) -> impl Iterator<Item = Event>
    where
        P: FnMut(&Event) -> bool,
    {
        self.catalog.read_filtered(predicate)
    }

    /// Ids of every stored event for which `predicate` holds.
    pub fn event_index<P>(&self, predicate: P) -> RoaringTreemap
    where
        P: FnMut(&Event) -> bool,
    {
        self.catalog.event_index(predicate)
    }

    /// Every stored event whose id is in `index`.
    pub fn read_ids(&self, index: &RoaringTreemap) -> impl Iterator<Item = Event> {
        self.catalog.read_ids(index)
    }

    /// Events minted in `[from, to)`, to the second.
    pub fn read_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> impl Iterator<Item = Event> {
        self.read_filtered(predicates::id_in(Self::id_window(from, to)))
    }

    /// The id range covering ids minted in `[from, to)`.
    pub fn id_window(from: DateTime<Utc>, to: DateTime<Utc>) -> Range<u64> {
        Sequencer::fixed_tick_at(from)..Sequencer::fixed_tick_at(to)
    }

    /// Events with `from <= id < to` as recorded in the WAL alone, newest
    /// first when `reverse` is set.
    ///
    /// Only covers what has not been flushed and truncated yet.
    pub fn wal_events(
        &self,
        from: u64,
        to: u64,
        reverse: bool,
    ) -> impl Iterator<Item = Result<Event, ReadError>> {
        let snapshot = self.writer.lock().wal.snapshot(from, to, reverse);
        snapshot.map(|event| event.map_err(ReadError::from))
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    pub fn stats(&self) -> EngineStats {
        let catalog = self.catalog.stats();
        let (wal_segments, last_id) = {
            let side = self.writer.lock();
            (side.wal.segments().len(), side.last_id)
        };
        EngineStats {
            state: self.state.get(),
            live_rows: catalog.live_rows,
            flushing_buffers: catalog.flushing,
            pending_flushes: self.tracker.pending(),
            chunk_files: catalog.files,
            cached_readers: catalog.cached_readers,
            wal_segments,
            last_id,
        }
    }

    /// Wait until every swapped-out buffer has been flushed (or given up
    /// on). Returns `false` on timeout.
    pub fn await_flushed(&self, timeout: Duration) -> bool {
        self.tracker.wait_idle(timeout)
    }

    pub fn state(&self) -> EngineState {
        self.state.get()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// What the last open recovered from the WAL.
    pub fn recovery(&self) -> &RecoveryReport {
        &self.recovery
    }

    pub fn catalog(&self) -> &Arc<ChunkCatalog> {
        &self.catalog
    }

    // -----------------------------------------------------------------------
    // Shutdown
    // -----------------------------------------------------------------------

    /// Stop the watcher, let the flush worker drain its queue and seal the
    /// WAL. Further appends fail with [`AppendError::Closed`]; reads keep
    /// working. Idempotent.
    ///
    /// Events still in the live buffer are not flushed. They are in the WAL
    /// and are replayed on the next open.
    pub fn close(&self) -> EngineResult<()> {
        if !self.state.begin_close() {
            return Ok(());
        }
        info!("Closing storage engine");

        if let Some(mut watcher) = self.watcher.lock().take() {
            watcher.stop();
        }

        // Dropping the sender ends the worker once the queue is empty.
        let sender = self.writer.lock().sender.take();
        drop(sender);
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                error!("Flush worker panicked");
            }
        }

        let result = self.writer.lock().wal.close();

        let readers = self.catalog.live().reader_count();
        if readers > 0 {
            debug!(readers, "Live buffer still has readers; it is released when they finish");
        }
        self.state.set_closed();
        info!("Closed storage engine");
        result.map_err(Into::into)
    }
}

impl Drop for StorageEngine {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            error!(error = %err, "Closing storage engine on drop failed");
        }
    }
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("chunk_dir", &self.config.chunk_dir)
            .field("wal_dir", &self.config.wal_dir)
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn engine(dir: &TempDir, threshold: usize) -> StorageEngine {
        let config = EngineConfig::new(dir.path())
            .with_memory_threshold(threshold)
            .with_watch_chunk_dir(false);
        StorageEngine::open(config).unwrap()
    }

    #[test]
    fn test_state_transitions() {
        let state = SharedState::new();
        assert_eq!(state.get(), EngineState::Open);
        assert!(state.begin_close());
        assert!(!state.begin_close());
        assert!(state.is_closing());
        state.set_closed();
        assert_eq!(state.get(), EngineState::Closed);
    }

    #[test]
    fn test_append_new_mints_increasing_ids() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, 100);
        let first = engine.append_new("k", None, "a").unwrap();
        let second = engine.append_new("k", None, "b").unwrap();
        assert!(second > first);
        assert_eq!(engine.stats().last_id, Some(second));
    }

    #[test]
    fn test_append_new_after_explicit_future_id() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, 100);
        let far = u64::MAX / 2;
        engine.append(Event::new(far, b"k".to_vec(), None, vec![])).unwrap();
        let minted = engine.append_new("k", None, "x").unwrap();
        assert!(minted > far);
    }

    #[test]
    fn test_rejects_non_increasing_id() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, 100);
        engine.append(Event::new(10, b"k".to_vec(), None, vec![])).unwrap();
        let err = engine
            .append(Event::new(10, b"k".to_vec(), None, vec![]))
            .unwrap_err();
        assert!(matches!(err, AppendError::NonIncreasingId { id: 10, last: 10 }));
        assert_eq!(engine.read_all().count(), 1);
    }

    #[test]
    fn test_oversized_event_is_refused_everywhere() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, 100);
        engine.append(Event::new(1, b"k".to_vec(), None, vec![])).unwrap();

        let data = vec![0u8; trail_event::codec::MAX_FRAME_SIZE as usize];
        let err = engine.append(Event::new(2, b"k".to_vec(), None, data)).unwrap_err();
        assert!(matches!(err, AppendError::Wal(trail_wal::WalError::FrameTooLarge { id: 2, .. })));
        assert_eq!(engine.stats().last_id, Some(1));
        assert_eq!(engine.read_all().count(), 1);
        engine.append(Event::new(2, b"k".to_vec(), None, vec![])).unwrap();
    }

    #[test]
    fn test_append_replaces_a_sealed_live_buffer() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, 100);
        for id in 1..=3 {
            engine.append(Event::new(id, b"k".to_vec(), None, vec![])).unwrap();
        }
        engine.catalog().live().seal();

        engine.append(Event::new(4, b"k".to_vec(), None, vec![])).unwrap();
        let ids: Vec<u64> = engine.read_all().map(|event| event.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert!(engine.await_flushed(Duration::from_secs(10)));
        assert_eq!(engine.stats().chunk_files, 1);
        assert_eq!(engine.stats().live_rows, 1);
    }

    #[test]
    fn test_swap_at_threshold() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, 4);
        for id in 1..=9 {
            engine.append(Event::new(id, b"k".to_vec(), None, vec![])).unwrap();
        }
        assert!(engine.await_flushed(Duration::from_secs(10)));
        let stats = engine.stats();
        assert_eq!(stats.chunk_files, 2);
        assert_eq!(stats.live_rows, 1);
        assert_eq!(stats.flushing_buffers, 0);
    }

    #[test]
    fn test_close_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, 4);
        engine.append_new("k", None, "v").unwrap();
        engine.close().unwrap();
        engine.close().unwrap();
        assert_eq!(engine.state(), EngineState::Closed);
        assert!(matches!(engine.append_new("k", None, "v"), Err(AppendError::Closed)));
        assert_eq!(engine.read_all().count(), 1);
    }

    #[test]
    fn test_id_window_covers_whole_seconds() {
        let from = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let to = DateTime::from_timestamp(1_700_000_002, 0).unwrap();
        let window = StorageEngine::id_window(from, to);
        let inside = Sequencer::fixed_tick_at(from) + 7;
        assert!(window.contains(&inside));
        assert!(!window.contains(&Sequencer::fixed_tick_at(to)));
    }
}
