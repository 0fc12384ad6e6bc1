// SPDX-License-Identifier: PMPL-1.0-or-later
//
// TrailStore Write-Ahead Log - Segment writer
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Appends encoded frames to the active segment file and decides when that
// file has to be fsynced. A frame is written with a single `write_all`; if
// that fails the file is cut back to its previous length so no partial frame
// is left between two complete ones.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, warn};

use crate::config::SyncMode;
use crate::error::WalResult;
use crate::segment::{segment_path, SegmentInfo};

/// Writer for the segment currently receiving appends.
#[derive(Debug)]
pub struct SegmentWriter {
    path: PathBuf,
    first_id: u64,
    file: File,
    size: u64,
    dirty: bool,
    poisoned: bool,
    last_sync: Instant,
}

impl SegmentWriter {
    /// Create a brand new segment named for `first_id`.
    ///
    /// Fails if a file of that name already exists; segments are never
    /// reopened for writing.
    pub fn create(wal_dir: &Path, first_id: u64) -> WalResult<Self> {
        let path = segment_path(wal_dir, first_id);
        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(&path)?;

        debug!(path = %path.display(), first_id, "Created WAL segment");

        Ok(Self {
            path,
            first_id,
            file,
            size: 0,
            dirty: false,
            poisoned: false,
            last_sync: Instant::now(),
        })
    }

    /// Append one complete frame.
    pub fn write_frame(&mut self, frame: &[u8]) -> WalResult<()> {
        if let Err(err) = self.file.write_all(frame) {
            if let Err(cut) = self.file.set_len(self.size) {
                warn!(
                    path = %self.path.display(),
                    error = %cut,
                    "Could not cut back a failed WAL write; segment will be sealed"
                );
                self.poisoned = true;
            }
            return Err(err.into());
        }
        self.size += frame.len() as u64;
        self.dirty = true;
        Ok(())
    }

    /// Force buffered bytes to stable storage.
    pub fn sync(&mut self) -> WalResult<()> {
        if self.dirty {
            self.file.sync_data()?;
            self.dirty = false;
        }
        self.last_sync = Instant::now();
        Ok(())
    }

    /// Sync after an append according to `mode`.
    pub fn sync_after_append(&mut self, mode: &SyncMode) -> WalResult<()> {
        match mode {
            SyncMode::Fsync => self.sync(),
            SyncMode::Periodic(_) => self.sync_if_due(mode),
            SyncMode::Async => Ok(()),
        }
    }

    /// Sync if `mode` is periodic and its interval has elapsed.
    pub fn sync_if_due(&mut self, mode: &SyncMode) -> WalResult<()> {
        match mode {
            SyncMode::Periodic(interval) if self.dirty && self.last_sync.elapsed() >= *interval => {
                self.sync()
            }
            _ => Ok(()),
        }
    }

    /// Sync and close, returning the finished segment's metadata.
    pub fn seal(mut self) -> WalResult<SegmentInfo> {
        self.sync()?;
        debug!(path = %self.path.display(), size = self.size, "Sealed WAL segment");
        Ok(SegmentInfo {
            path: self.path,
            first_id: self.first_id,
            file_size: self.size,
        })
    }

    /// Id the segment is named for.
    pub fn first_id(&self) -> u64 {
        self.first_id
    }

    /// Path of the segment file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes written so far.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// `true` until the first frame lands.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// `true` if a failed write could not be undone. Nothing more may be
    /// appended to this file.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WalError;
    use std::time::Duration;
    use tempfile::TempDir;
    use trail_event::{encode, Event};

    fn frame(id: u64) -> Vec<u8> {
        encode(&Event::new(id, b"key".to_vec(), None, b"payload".to_vec()))
    }

    #[test]
    fn test_create_and_write() {
        let dir = TempDir::new().unwrap();
        let mut writer = SegmentWriter::create(dir.path(), 7).unwrap();
        assert!(writer.is_empty());

        let bytes = frame(7);
        writer.write_frame(&bytes).unwrap();
        writer.write_frame(&frame(8)).unwrap();
        assert_eq!(writer.size(), 2 * bytes.len() as u64);

        let info = writer.seal().unwrap();
        assert_eq!(info.first_id, 7);
        assert_eq!(std::fs::metadata(&info.path).unwrap().len(), info.file_size);
    }

    #[test]
    fn test_create_refuses_existing_segment() {
        let dir = TempDir::new().unwrap();
        let _first = SegmentWriter::create(dir.path(), 1).unwrap();
        let second = SegmentWriter::create(dir.path(), 1);
        assert!(matches!(second, Err(WalError::Io(_))));
    }

    #[test]
    fn test_periodic_sync_waits_for_interval() {
        let dir = TempDir::new().unwrap();
        let mut writer = SegmentWriter::create(dir.path(), 1).unwrap();
        writer.write_frame(&frame(1)).unwrap();

        let mode = SyncMode::Periodic(Duration::from_secs(3600));
        writer.sync_after_append(&mode).unwrap();
        assert!(writer.dirty);

        writer.sync_if_due(&SyncMode::Periodic(Duration::ZERO)).unwrap();
        assert!(!writer.dirty);
    }

    #[test]
    fn test_fsync_mode_syncs_every_append() {
        let dir = TempDir::new().unwrap();
        let mut writer = SegmentWriter::create(dir.path(), 1).unwrap();
        writer.write_frame(&frame(1)).unwrap();
        writer.sync_after_append(&SyncMode::Fsync).unwrap();
        assert!(!writer.dirty);
    }
}
