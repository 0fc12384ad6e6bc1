// SPDX-License-Identifier: PMPL-1.0-or-later
//
// TrailStore Write-Ahead Log - Log facade
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// `WriteAheadLog` owns the active segment and the shared registry. Appends
// must arrive in strictly increasing id order. Segments are only ever
// created fresh, so a record torn by a crash stays at the tail of a sealed
// segment where readers treat it as end-of-stream.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};
use trail_event::{codec, Event};

use crate::config::WalConfig;
use crate::error::{WalError, WalResult};
use crate::reader::{SegmentReader, WalScanner, WalSnapshot};
use crate::segment::{list_segments, SegmentInfo, SegmentRegistry};
use crate::truncate::{TruncateReport, WalTruncator};
use crate::writer::SegmentWriter;

/// Segmented, append-only event log.
#[derive(Debug)]
pub struct WriteAheadLog {
    wal_dir: PathBuf,
    config: WalConfig,
    registry: Arc<SegmentRegistry>,
    active: Option<SegmentWriter>,
    last_id: Option<u64>,
    read_only: bool,
    closed: bool,
    scratch: Vec<u8>,
}

impl WriteAheadLog {
    /// Open (or create) a WAL in `wal_dir` for appending.
    ///
    /// Existing segments become sealed; the first append starts a new one.
    /// Zero-length segments left by a crash right after creation are removed.
    pub fn open(wal_dir: impl AsRef<Path>, config: WalConfig) -> WalResult<Self> {
        let wal_dir = wal_dir.as_ref().to_path_buf();
        fs::create_dir_all(&wal_dir)?;

        let mut segments = Vec::new();
        for segment in list_segments(&wal_dir)? {
            if segment.file_size == 0 {
                debug!(path = %segment.path.display(), "Removing empty WAL segment");
                fs::remove_file(&segment.path)?;
            } else {
                segments.push(segment);
            }
        }

        Self::from_segments(wal_dir, config, segments, false)
    }

    /// Open an existing WAL for reading only. Appends, rolls and
    /// truncations fail with [`WalError::ReadOnly`].
    pub fn open_read_only(wal_dir: impl AsRef<Path>, config: WalConfig) -> WalResult<Self> {
        let wal_dir = wal_dir.as_ref().to_path_buf();
        let segments = list_segments(&wal_dir)?;
        Self::from_segments(wal_dir, config, segments, true)
    }

    fn from_segments(
        wal_dir: PathBuf,
        config: WalConfig,
        segments: Vec<SegmentInfo>,
        read_only: bool,
    ) -> WalResult<Self> {
        let last_id = scan_last_id(&segments)?;

        info!(
            dir = %wal_dir.display(),
            segments = segments.len(),
            last_id = ?last_id,
            read_only,
            "Opened WAL"
        );

        Ok(Self {
            registry: Arc::new(SegmentRegistry::new(&wal_dir, segments)),
            wal_dir,
            config,
            active: None,
            last_id,
            read_only,
            closed: false,
            scratch: Vec::new(),
        })
    }

    /// Append one event. Its id must be greater than every id already
    /// logged.
    pub fn append(&mut self, event: &Event) -> WalResult<()> {
        self.check_writable()?;
        if let Some(last) = self.last_id {
            if event.id <= last {
                return Err(WalError::NonIncreasingId { id: event.id, last });
            }
        }
        let size = codec::body_len(event);
        if size > codec::MAX_FRAME_SIZE as usize {
            return Err(WalError::FrameTooLarge {
                id: event.id,
                size,
                max: codec::MAX_FRAME_SIZE,
            });
        }

        let mut frame = std::mem::take(&mut self.scratch);
        frame.clear();
        codec::encode_into(event, &mut frame);
        let result = self.append_frame(event.id, &frame);
        self.scratch = frame;
        result?;

        self.last_id = Some(event.id);
        Ok(())
    }

    fn append_frame(&mut self, id: u64, frame: &[u8]) -> WalResult<()> {
        let frame_size = frame.len() as u64;
        let needs_roll = match &self.active {
            None => false,
            Some(writer) => {
                writer.is_poisoned()
                    || (!writer.is_empty()
                        && writer.size() + frame_size + self.config.guard_bytes
                            >= self.config.max_segment_size)
            }
        };
        if needs_roll {
            self.roll()?;
            return self.append_frame(id, frame);
        }

        let writer = match self.active.take() {
            Some(writer) => writer,
            None => {
                let writer = SegmentWriter::create(&self.wal_dir, id)?;
                self.registry
                    .set_active(Some((writer.first_id(), writer.path().to_path_buf())));
                writer
            }
        };
        let writer = self.active.insert(writer);
        writer.write_frame(frame)?;
        writer.sync_after_append(&self.config.sync_mode)
    }

    /// Seal the active segment so the next append opens a new one.
    ///
    /// Returns the sealed segment, or `None` if nothing was active.
    pub fn roll(&mut self) -> WalResult<Option<SegmentInfo>> {
        self.check_writable()?;
        self.seal_active()
    }

    fn seal_active(&mut self) -> WalResult<Option<SegmentInfo>> {
        let Some(writer) = self.active.take() else {
            return Ok(None);
        };
        let path = writer.path().to_path_buf();
        let first_id = writer.first_id();
        let info = match writer.seal() {
            Ok(info) => info,
            Err(err) => {
                // The bytes are still in the file; list it as sealed anyway.
                warn!(path = %path.display(), error = %err, "Failed to sync WAL segment while sealing");
                let file_size = fs::metadata(&path).map(|meta| meta.len()).unwrap_or(0);
                self.registry.seal_active(SegmentInfo {
                    path,
                    first_id,
                    file_size,
                });
                return Err(err);
            }
        };
        info!(
            path = %info.path.display(),
            first_id = info.first_id,
            size = info.file_size,
            "Rolled WAL segment"
        );
        self.registry.seal_active(info.clone());
        Ok(Some(info))
    }

    /// Force everything appended so far to stable storage.
    pub fn sync(&mut self) -> WalResult<()> {
        match self.active.as_mut() {
            Some(writer) => writer.sync(),
            None => Ok(()),
        }
    }

    /// Sync if the periodic commit interval has elapsed.
    pub fn sync_if_due(&mut self) -> WalResult<()> {
        match self.active.as_mut() {
            Some(writer) => writer.sync_if_due(&self.config.sync_mode),
            None => Ok(()),
        }
    }

    /// Lazily yield events with `from <= id < to`, in ascending order, or
    /// descending when `reverse` is set. Only segments named below `to` are
    /// opened.
    pub fn snapshot(&self, from: u64, to: u64, reverse: bool) -> WalSnapshot {
        WalSnapshot::new(self.registry.listing().segments, from, to, reverse)
    }

    /// Cursor over the whole log that follows later appends.
    pub fn scan(&self) -> WalScanner {
        WalScanner::new(Arc::clone(&self.registry))
    }

    /// Drop every event with `id < upto`.
    ///
    /// The active segment is sealed first if it could hold such events.
    pub fn truncate(&mut self, upto: u64) -> WalResult<TruncateReport> {
        self.check_writable()?;
        if self.registry.active_first_id().is_some_and(|first| first < upto) {
            self.seal_active()?;
        }
        Ok(self.truncator()?.truncate_sealed(upto))
    }

    /// A handle for truncating sealed segments from another thread.
    pub fn truncator(&self) -> WalResult<WalTruncator> {
        if self.read_only {
            return Err(WalError::ReadOnly);
        }
        Ok(WalTruncator::new(Arc::clone(&self.registry)))
    }

    /// All segments, oldest first, with the active one last.
    pub fn segments(&self) -> Vec<(u64, PathBuf)> {
        self.registry.listing().segments
    }

    /// Newest id in the log.
    pub fn last_id(&self) -> Option<u64> {
        self.last_id
    }

    /// The WAL directory.
    pub fn wal_dir(&self) -> &Path {
        &self.wal_dir
    }

    /// `true` if opened with [`WriteAheadLog::open_read_only`].
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Seal the active segment and refuse further writes. Idempotent.
    pub fn close(&mut self) -> WalResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.seal_active()?;
        info!(dir = %self.wal_dir.display(), "Closed WAL");
        Ok(())
    }

    /// `true` once [`WriteAheadLog::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn check_writable(&self) -> WalResult<()> {
        if self.closed {
            return Err(WalError::Closed);
        }
        if self.read_only {
            return Err(WalError::ReadOnly);
        }
        Ok(())
    }
}

impl Drop for WriteAheadLog {
    fn drop(&mut self) {
        if let Some(writer) = self.active.as_mut() {
            if let Err(err) = writer.sync() {
                warn!(error = %err, "Failed to sync WAL segment on drop");
            }
        }
    }
}

/// Find the newest readable id, walking back from the newest segment.
fn scan_last_id(segments: &[SegmentInfo]) -> WalResult<Option<u64>> {
    for segment in segments.iter().rev() {
        let mut last = None;
        for item in SegmentReader::open(&segment.path)? {
            match item {
                Ok(event) => last = Some(event.id),
                Err(WalError::Integrity { .. }) => continue,
                Err(err) => return Err(err),
            }
        }
        if last.is_some() {
            return Ok(last);
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncMode;
    use tempfile::TempDir;

    fn event(id: u64) -> Event {
        Event::new(id, format!("key-{id}").into_bytes(), Some(b"meta".to_vec()), vec![7u8; 32])
    }

    fn small_config() -> WalConfig {
        WalConfig::default()
            .with_max_segment_size(512)
            .with_sync_mode(SyncMode::Async)
    }

    fn collect_ids(wal: &WriteAheadLog) -> Vec<u64> {
        wal.snapshot(0, u64::MAX, false)
            .map(|item| item.unwrap().id)
            .collect()
    }

    #[test]
    fn test_append_and_snapshot() {
        let dir = TempDir::new().unwrap();
        let mut wal = WriteAheadLog::open(dir.path(), small_config()).unwrap();
        for id in 1..=50 {
            wal.append(&event(id)).unwrap();
        }
        assert_eq!(collect_ids(&wal), (1..=50).collect::<Vec<_>>());
        assert!(wal.segments().len() > 1, "small cap should force rolls");
    }

    #[test]
    fn test_segments_respect_size_cap() {
        let dir = TempDir::new().unwrap();
        let config = small_config();
        let mut wal = WriteAheadLog::open(dir.path(), config.clone()).unwrap();
        for id in 1..=50 {
            wal.append(&event(id)).unwrap();
        }
        wal.close().unwrap();
        for segment in list_segments(dir.path()).unwrap() {
            assert!(segment.file_size + config.guard_bytes <= config.max_segment_size);
        }
    }

    #[test]
    fn test_oversized_event_gets_its_own_segment() {
        let dir = TempDir::new().unwrap();
        let mut wal = WriteAheadLog::open(dir.path(), small_config()).unwrap();
        wal.append(&event(1)).unwrap();
        let big = Event::new(2, b"big".to_vec(), None, vec![0u8; 4096]);
        wal.append(&big).unwrap();
        wal.append(&event(3)).unwrap();

        let ids: Vec<u64> = wal.segments().iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(collect_ids(&wal), vec![1, 2, 3]);
    }

    #[test]
    fn test_rejects_non_increasing_ids() {
        let dir = TempDir::new().unwrap();
        let mut wal = WriteAheadLog::open(dir.path(), small_config()).unwrap();
        wal.append(&event(10)).unwrap();
        assert!(matches!(
            wal.append(&event(10)),
            Err(WalError::NonIncreasingId { id: 10, last: 10 })
        ));
        assert!(matches!(
            wal.append(&event(3)),
            Err(WalError::NonIncreasingId { .. })
        ));
        wal.append(&event(11)).unwrap();
    }

    #[test]
    fn test_rejects_event_larger_than_a_record() {
        let dir = TempDir::new().unwrap();
        let mut wal = WriteAheadLog::open(dir.path(), small_config()).unwrap();
        wal.append(&event(1)).unwrap();

        let huge = Event::new(2, b"k".to_vec(), None, vec![0u8; codec::MAX_FRAME_SIZE as usize]);
        let result = wal.append(&huge);
        assert!(matches!(result, Err(WalError::FrameTooLarge { id: 2, .. })));

        // Nothing was written and the id is still free.
        wal.append(&event(2)).unwrap();
        assert_eq!(collect_ids(&wal), vec![1, 2]);
    }

    #[test]
    fn test_reopen_recovers_last_id() {
        let dir = TempDir::new().unwrap();
        {
            let mut wal = WriteAheadLog::open(dir.path(), small_config()).unwrap();
            for id in 1..=20 {
                wal.append(&event(id)).unwrap();
            }
        }
        let mut wal = WriteAheadLog::open(dir.path(), small_config()).unwrap();
        assert_eq!(wal.last_id(), Some(20));
        assert!(wal.append(&event(20)).is_err());
        wal.append(&event(21)).unwrap();
        assert_eq!(collect_ids(&wal).len(), 21);
    }

    #[test]
    fn test_truncate_seals_and_drops_old_events() {
        let dir = TempDir::new().unwrap();
        let mut wal = WriteAheadLog::open(dir.path(), small_config()).unwrap();
        for id in 1..=30 {
            wal.append(&event(id)).unwrap();
        }
        let report = wal.truncate(25).unwrap();
        assert_eq!(report.skipped, 0);
        assert_eq!(collect_ids(&wal), (25..=30).collect::<Vec<_>>());

        wal.append(&event(31)).unwrap();
        assert_eq!(collect_ids(&wal).last(), Some(&31));
    }

    #[test]
    fn test_scanner_restarts_on_truncate() {
        let dir = TempDir::new().unwrap();
        let mut wal = WriteAheadLog::open(dir.path(), small_config()).unwrap();
        for id in 1..=10 {
            wal.append(&event(id)).unwrap();
        }
        let mut scanner = wal.scan();
        assert_eq!(scanner.next().unwrap().unwrap().id, 1);
        assert_eq!(scanner.next().unwrap().unwrap().id, 2);

        wal.truncate(5).unwrap();
        assert_eq!(scanner.next().unwrap().unwrap().id, 5);
    }

    #[test]
    fn test_read_only_refuses_writes() {
        let dir = TempDir::new().unwrap();
        {
            let mut wal = WriteAheadLog::open(dir.path(), small_config()).unwrap();
            wal.append(&event(1)).unwrap();
        }
        let mut wal = WriteAheadLog::open_read_only(dir.path(), small_config()).unwrap();
        assert_eq!(collect_ids(&wal), vec![1]);
        assert!(matches!(wal.append(&event(2)), Err(WalError::ReadOnly)));
        assert!(matches!(wal.truncate(2), Err(WalError::ReadOnly)));
        assert!(matches!(wal.truncator(), Err(WalError::ReadOnly)));
    }

    #[test]
    fn test_closed_refuses_writes() {
        let dir = TempDir::new().unwrap();
        let mut wal = WriteAheadLog::open(dir.path(), small_config()).unwrap();
        wal.append(&event(1)).unwrap();
        wal.close().unwrap();
        wal.close().unwrap();
        assert!(matches!(wal.append(&event(2)), Err(WalError::Closed)));
        assert_eq!(collect_ids(&wal), vec![1]);
    }

    #[test]
    fn test_empty_segment_removed_on_open() {
        let dir = TempDir::new().unwrap();
        fs::File::create(dir.path().join("99.wal")).unwrap();
        let mut wal = WriteAheadLog::open(dir.path(), small_config()).unwrap();
        assert!(wal.segments().is_empty());
        wal.append(&event(99)).unwrap();
    }
}
