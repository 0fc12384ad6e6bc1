// SPDX-License-Identifier: PMPL-1.0-or-later
//
// TrailStore Write-Ahead Log - Segment management
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Each WAL segment is a single append-only file named `{first_id}.wal`, where
// `first_id` is the id of the first event written to it. Every id in a segment
// is greater than or equal to its name and less than the next segment's name,
// so ordering segments by name orders the whole log by id.
//
// The registry is the shared, in-memory view of the directory: the sealed
// segments, the active one (if any) and a generation counter that moves every
// time a truncation rewrites or deletes files.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::debug;

use crate::error::{WalError, WalResult};

/// Default maximum segment size in bytes (20 MiB).
pub const DEFAULT_MAX_SEGMENT_SIZE: u64 = 20 * 1024 * 1024;

/// Default headroom kept free at the end of a segment before rolling.
pub const DEFAULT_GUARD_BYTES: u64 = 256;

/// The file extension used for WAL segment files.
pub const SEGMENT_EXTENSION: &str = "wal";

/// Metadata about a single WAL segment file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentInfo {
    /// The full path to the segment file on disk.
    pub path: PathBuf,

    /// The id encoded in the file name. All events in this segment have
    /// `id >= first_id`.
    pub first_id: u64,

    /// File size in bytes when this info was taken.
    pub file_size: u64,
}

impl PartialOrd for SegmentInfo {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SegmentInfo {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.first_id.cmp(&other.first_id)
    }
}

/// Build the canonical file name for a segment whose first event has the
/// given id.
///
/// Format: `7301543201616723969.wal`
pub fn segment_filename(first_id: u64) -> String {
    format!("{first_id}.{SEGMENT_EXTENSION}")
}

/// Build the full path for a segment file in the given WAL directory.
pub fn segment_path(wal_dir: &Path, first_id: u64) -> PathBuf {
    wal_dir.join(segment_filename(first_id))
}

/// Parse the first id from a segment file name.
///
/// Returns `None` unless the name is decimal digits followed by `.wal`.
pub fn parse_segment_filename(name: &str) -> Option<u64> {
    let digits = name.strip_suffix(&format!(".{SEGMENT_EXTENSION}"))?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse::<u64>().ok()
}

/// Scan a WAL directory and return metadata for all segment files, sorted
/// by first id (ascending).
///
/// Non-segment files in the directory (including in-flight rewrite
/// temporaries) are silently ignored.
pub fn list_segments(wal_dir: &Path) -> WalResult<Vec<SegmentInfo>> {
    if !wal_dir.is_dir() {
        return Err(WalError::DirectoryNotFound(wal_dir.display().to_string()));
    }

    let mut segments = Vec::new();

    for dir_entry in fs::read_dir(wal_dir)? {
        let dir_entry = dir_entry?;
        let file_name = dir_entry.file_name();
        let name = file_name.to_string_lossy();

        if let Some(first_id) = parse_segment_filename(&name) {
            let metadata = dir_entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            segments.push(SegmentInfo {
                path: dir_entry.path(),
                first_id,
                file_size: metadata.len(),
            });
        }
    }

    segments.sort();

    debug!(
        count = segments.len(),
        dir = %wal_dir.display(),
        "Discovered WAL segments"
    );

    Ok(segments)
}

// ---------------------------------------------------------------------------
// Shared registry
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct RegistryState {
    generation: u64,
    sealed: Vec<SegmentInfo>,
    active: Option<(u64, PathBuf)>,
}

/// A point-in-time copy of the segment list, oldest first. The active
/// segment, if any, is last.
#[derive(Debug, Clone)]
pub struct SegmentListing {
    /// Registry generation the listing was taken at.
    pub generation: u64,
    /// `(first_id, path)` pairs in ascending id order.
    pub segments: Vec<(u64, PathBuf)>,
}

impl SegmentListing {
    /// The first segment whose id is greater than `after`, or the oldest
    /// segment when `after` is `None`.
    pub fn next_after(&self, after: Option<u64>) -> Option<&(u64, PathBuf)> {
        self.segments
            .iter()
            .find(|(first_id, _)| after.map_or(true, |after| *first_id > after))
    }
}

/// In-memory view of a WAL directory shared by the writer, readers and the
/// truncator.
#[derive(Debug)]
pub struct SegmentRegistry {
    wal_dir: PathBuf,
    state: RwLock<RegistryState>,
    rewrite_lock: Mutex<()>,
}

impl SegmentRegistry {
    /// Build a registry whose sealed list is `segments`.
    pub fn new(wal_dir: impl Into<PathBuf>, mut segments: Vec<SegmentInfo>) -> Self {
        segments.sort();
        Self {
            wal_dir: wal_dir.into(),
            state: RwLock::new(RegistryState {
                generation: 0,
                sealed: segments,
                active: None,
            }),
            rewrite_lock: Mutex::new(()),
        }
    }

    /// The directory this registry describes.
    pub fn wal_dir(&self) -> &Path {
        &self.wal_dir
    }

    /// Current generation. Moves whenever the set of files is rewritten.
    pub fn generation(&self) -> u64 {
        self.state.read().generation
    }

    /// Copy of every segment, sealed and active.
    pub fn listing(&self) -> SegmentListing {
        let state = self.state.read();
        let mut segments: Vec<(u64, PathBuf)> = state
            .sealed
            .iter()
            .map(|segment| (segment.first_id, segment.path.clone()))
            .collect();
        if let Some((first_id, path)) = &state.active {
            segments.push((*first_id, path.clone()));
        }
        SegmentListing {
            generation: state.generation,
            segments,
        }
    }

    /// Copy of the sealed segments only.
    pub fn sealed(&self) -> Vec<SegmentInfo> {
        self.state.read().sealed.clone()
    }

    /// Id of the segment currently receiving appends.
    pub fn active_first_id(&self) -> Option<u64> {
        self.state.read().active.as_ref().map(|(first_id, _)| *first_id)
    }

    pub(crate) fn set_active(&self, active: Option<(u64, PathBuf)>) {
        self.state.write().active = active;
    }

    /// Move the active segment into the sealed list.
    pub(crate) fn seal_active(&self, info: SegmentInfo) {
        let mut state = self.state.write();
        state.active = None;
        let position = state.sealed.partition_point(|segment| segment.first_id < info.first_id);
        state.sealed.insert(position, info);
    }

    pub(crate) fn update_sealed_size(&self, first_id: u64, file_size: u64) {
        let mut state = self.state.write();
        if let Some(segment) = state.sealed.iter_mut().find(|s| s.first_id == first_id) {
            segment.file_size = file_size;
        }
    }

    pub(crate) fn remove_sealed(&self, first_id: u64) {
        self.state.write().sealed.retain(|segment| segment.first_id != first_id);
    }

    pub(crate) fn bump_generation(&self) {
        let mut state = self.state.write();
        state.generation = state.generation.wrapping_add(1);
    }

    /// Serializes truncations against one another.
    pub(crate) fn lock_rewrites(&self) -> MutexGuard<'_, ()> {
        self.rewrite_lock.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    struct TestDir {
        _inner: TempDir,
        path: PathBuf,
    }

    impl TestDir {
        fn new() -> Self {
            let inner = TempDir::new().unwrap();
            let path = inner.path().to_path_buf();
            Self {
                _inner: inner,
                path,
            }
        }

        fn create_segment(&self, first_id: u64, size_bytes: usize) {
            let file_path = segment_path(&self.path, first_id);
            let mut file = File::create(file_path).unwrap();
            file.write_all(&vec![0u8; size_bytes]).unwrap();
        }
    }

    #[test]
    fn test_segment_filename_format() {
        assert_eq!(segment_filename(0), "0.wal");
        assert_eq!(segment_filename(42), "42.wal");
        assert_eq!(segment_filename(u64::MAX), "18446744073709551615.wal");
    }

    #[test]
    fn test_parse_segment_filename_valid() {
        assert_eq!(parse_segment_filename("0.wal"), Some(0));
        assert_eq!(parse_segment_filename("7301543201616723969.wal"), Some(7_301_543_201_616_723_969));
    }

    #[test]
    fn test_parse_segment_filename_invalid() {
        assert_eq!(parse_segment_filename("not-a-segment.txt"), None);
        assert_eq!(parse_segment_filename(".wal"), None);
        assert_eq!(parse_segment_filename("+12.wal"), None);
        assert_eq!(parse_segment_filename("12.wal.tmp"), None);
        assert_eq!(parse_segment_filename(".3f2a.wal.tmp"), None);
        assert_eq!(parse_segment_filename("99999999999999999999999.wal"), None);
    }

    #[test]
    fn test_list_segments_sorted_numerically() {
        let dir = TestDir::new();
        dir.create_segment(100, 10);
        dir.create_segment(9, 20);
        dir.create_segment(25, 30);
        File::create(dir.path.join("notes.txt")).unwrap();

        let segments = list_segments(&dir.path).unwrap();
        let ids: Vec<u64> = segments.iter().map(|s| s.first_id).collect();
        assert_eq!(ids, vec![9, 25, 100]);
        assert_eq!(segments[0].file_size, 20);
    }

    #[test]
    fn test_list_segments_nonexistent_dir() {
        let result = list_segments(Path::new("/nonexistent/trail/wal/dir"));
        assert!(matches!(result, Err(WalError::DirectoryNotFound(_))));
    }

    #[test]
    fn test_registry_listing_puts_active_last() {
        let dir = TestDir::new();
        dir.create_segment(5, 0);
        dir.create_segment(1, 0);
        let registry = SegmentRegistry::new(&dir.path, list_segments(&dir.path).unwrap());
        registry.set_active(Some((10, segment_path(&dir.path, 10))));

        let listing = registry.listing();
        let ids: Vec<u64> = listing.segments.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![1, 5, 10]);
        assert_eq!(listing.next_after(None).map(|(id, _)| *id), Some(1));
        assert_eq!(listing.next_after(Some(5)).map(|(id, _)| *id), Some(10));
        assert!(listing.next_after(Some(10)).is_none());
    }

    #[test]
    fn test_registry_seal_and_remove() {
        let dir = TestDir::new();
        let registry = SegmentRegistry::new(&dir.path, Vec::new());
        registry.set_active(Some((3, segment_path(&dir.path, 3))));
        registry.seal_active(SegmentInfo {
            path: segment_path(&dir.path, 3),
            first_id: 3,
            file_size: 64,
        });
        assert!(registry.active_first_id().is_none());
        assert_eq!(registry.sealed().len(), 1);

        let before = registry.generation();
        registry.remove_sealed(3);
        registry.bump_generation();
        assert!(registry.sealed().is_empty());
        assert_eq!(registry.generation(), before + 1);
    }
}
