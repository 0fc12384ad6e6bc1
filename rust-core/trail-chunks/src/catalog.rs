// SPDX-License-Identifier: PMPL-1.0-or-later
//
// TrailStore chunks - Chunk catalog
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The catalog tracks every source of events: chunk files on disk, sealed
// buffers waiting for their flush, and the live buffer. Sources move between
// these sets in a fixed order, and lookups read the sets in the reverse
// order, so a reader racing a transition always finds the source in at least
// one place:
//
//   swap:   begin_flush(buffer)   then  set_live(new_buffer)
//   flush:  register_file(..)     then  finish_flush(first_id)
//   lookup: live, then flushing, then files

use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::buffer::MemoryBuffer;
use crate::cache::TtlCache;
use crate::chunk_file::{self, chunk_id_of, ChunkFile, ChunkInfo};
use crate::error::{ChunkError, ChunkResult};
use crate::iter::CatalogIter;
use crate::watcher::FolderEvent;

#[derive(Debug)]
struct FileEntry {
    path: PathBuf,
    info: OnceLock<ChunkInfo>,
    reported_unreadable: AtomicBool,
}

impl FileEntry {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            info: OnceLock::new(),
            reported_unreadable: AtomicBool::new(false),
        }
    }

    fn with_info(path: PathBuf, info: ChunkInfo) -> Self {
        let entry = Self::new(path);
        let _ = entry.info.set(info);
        entry
    }

    /// Header metadata, read once and kept.
    fn info(&self) -> ChunkResult<ChunkInfo> {
        if let Some(info) = self.info.get() {
            return Ok(*info);
        }
        let info = chunk_file::read_info(&self.path)?;
        Ok(*self.info.get_or_init(|| info))
    }

    fn report_unreadable(&self, error: &ChunkError) {
        if !self.reported_unreadable.swap(true, Ordering::Relaxed) {
            warn!(path = %self.path.display(), error = %error, "Skipping unreadable chunk file");
        }
    }
}

/// Where a source sits in a walk over the catalog.
///
/// Files are placed by the id in their name, which can be above the first id
/// they hold when a flush had to step past a taken name. Buffers are placed
/// by their first id. At equal positions files come first, then buffers
/// waiting for their flush, then the live buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SourceKey {
    /// File name id, or a buffer's first id.
    pub position: u64,
    /// 0 for files, 1 for flushing buffers, 2 for the live buffer.
    pub rank: u8,
}

impl SourceKey {
    const FILE: u8 = 0;
    const FLUSHING: u8 = 1;
    const LIVE: u8 = 2;

    fn new(position: u64, rank: u8) -> Self {
        Self { position, rank }
    }

    fn after(self, floor: Option<SourceKey>) -> bool {
        floor.map_or(true, |floor| self > floor)
    }
}

/// One place events can be read from.
#[derive(Debug, Clone)]
pub enum Source {
    /// A chunk file on disk.
    File {
        /// Id in the file name.
        name_id: u64,
        /// Smallest id in the file.
        first_id: u64,
        /// The file.
        path: PathBuf,
    },
    /// A sealed buffer mid-flush or the live buffer.
    Buffer {
        /// Id of the buffer's first row.
        first_id: u64,
        /// The buffer.
        buffer: Arc<MemoryBuffer>,
    },
}

impl Source {
    /// Smallest id the source holds.
    pub fn first_id(&self) -> u64 {
        match self {
            Source::File { first_id, .. } | Source::Buffer { first_id, .. } => *first_id,
        }
    }
}

/// Counts of what the catalog currently holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatalogStats {
    /// Known chunk files.
    pub files: usize,
    /// Sealed buffers not yet replaced by a file.
    pub flushing: usize,
    /// Rows in the live buffer.
    pub live_rows: usize,
    /// Opened chunk readers held by the cache.
    pub cached_readers: usize,
}

/// Registry of all event sources and the entry point for reads.
#[derive(Debug)]
pub struct ChunkCatalog {
    chunk_dir: PathBuf,
    files: RwLock<BTreeMap<u64, Arc<FileEntry>>>,
    flushing: RwLock<BTreeMap<u64, Arc<MemoryBuffer>>>,
    live: RwLock<Arc<MemoryBuffer>>,
    readers: TtlCache<PathBuf, Arc<ChunkFile>>,
}

impl ChunkCatalog {
    /// Build a catalog over the chunk files already in `chunk_dir`, with
    /// `live` as the live buffer.
    pub fn open(
        chunk_dir: impl Into<PathBuf>,
        live: Arc<MemoryBuffer>,
        cache_capacity: usize,
        cache_ttl: Duration,
    ) -> ChunkResult<Self> {
        let chunk_dir = chunk_dir.into();
        let files = chunk_file::list_chunks(&chunk_dir)?
            .into_iter()
            .map(|(id, path)| (id, Arc::new(FileEntry::new(path))))
            .collect::<BTreeMap<_, _>>();

        info!(dir = %chunk_dir.display(), files = files.len(), "Opened chunk catalog");

        Ok(Self {
            chunk_dir,
            files: RwLock::new(files),
            flushing: RwLock::new(BTreeMap::new()),
            live: RwLock::new(live),
            readers: TtlCache::new(cache_capacity, cache_ttl),
        })
    }

    /// The chunk directory.
    pub fn chunk_dir(&self) -> &Path {
        &self.chunk_dir
    }

    // -----------------------------------------------------------------------
    // Files
    // -----------------------------------------------------------------------

    /// Record a file this process just wrote.
    pub fn register_file(&self, path: PathBuf, info: ChunkInfo) {
        let Some(id) = chunk_id_of(&path) else {
            warn!(path = %path.display(), "Not registering a file without a chunk name");
            return;
        };
        self.files
            .write()
            .insert(id, Arc::new(FileEntry::with_info(path, info)));
        debug!(id, rows = info.rows, "Registered chunk file");
    }

    /// Note a chunk file that showed up in the directory.
    pub fn file_appeared(&self, path: &Path) {
        let Some(id) = chunk_id_of(path) else { return };
        let mut files = self.files.write();
        if !files.contains_key(&id) {
            files.insert(id, Arc::new(FileEntry::new(path.to_path_buf())));
            debug!(id, "Chunk file appeared");
        }
    }

    /// Forget a chunk file that left the directory.
    pub fn file_disappeared(&self, path: &Path) {
        let Some(id) = chunk_id_of(path) else { return };
        if self.files.write().remove(&id).is_some() {
            debug!(id, "Chunk file disappeared");
        }
        self.readers.invalidate(&path.to_path_buf());
    }

    /// Re-list the directory, keeping known entries and their cached info.
    pub fn rescan(&self) -> ChunkResult<()> {
        let listed = chunk_file::list_chunks(&self.chunk_dir)?;
        let mut files = self.files.write();
        let mut next = BTreeMap::new();
        for (id, path) in listed {
            let entry = match files.remove(&id) {
                Some(entry) if entry.path == path => entry,
                _ => Arc::new(FileEntry::new(path)),
            };
            next.insert(id, entry);
        }
        for entry in files.values() {
            self.readers.invalidate(&entry.path);
        }
        *files = next;
        info!(files = files.len(), "Rescanned chunk directory");
        Ok(())
    }

    /// Apply a directory change.
    pub fn apply(&self, event: FolderEvent) {
        match event {
            FolderEvent::Appeared(path) => self.file_appeared(&path),
            FolderEvent::Disappeared(path) => self.file_disappeared(&path),
            FolderEvent::Rescan => {
                warn!(dir = %self.chunk_dir.display(), "Chunk directory notifications lost; rescanning");
                if let Err(err) = self.rescan() {
                    warn!(error = %err, "Chunk directory rescan failed");
                }
            }
        }
    }

    /// Ids of the known chunk files, ascending.
    pub fn file_ids(&self) -> Vec<u64> {
        self.files.read().keys().copied().collect()
    }

    /// `true` if a chunk file with this id is known.
    pub fn contains_file(&self, id: u64) -> bool {
        self.files.read().contains_key(&id)
    }

    /// Header metadata of the file with this id.
    pub fn file_info(&self, id: u64) -> Option<ChunkResult<ChunkInfo>> {
        let entry = self.files.read().get(&id).cloned()?;
        Some(entry.info())
    }

    /// Largest id held by any readable chunk file, or 0 if there is none.
    pub fn newest_file_id(&self) -> u64 {
        let entries: Vec<Arc<FileEntry>> = self.files.read().values().cloned().collect();
        entries
            .iter()
            .filter_map(|entry| match entry.info() {
                Ok(info) => Some(info.last_id),
                Err(err) => {
                    entry.report_unreadable(&err);
                    None
                }
            })
            .max()
            .unwrap_or(0)
    }

    /// Open (or fetch from the cache) the reader for a chunk file.
    pub fn open_file(&self, path: &Path) -> ChunkResult<Arc<ChunkFile>> {
        self.readers
            .get_or_load(&path.to_path_buf(), || ChunkFile::open(path).map(Arc::new))
    }

    /// Drop cached readers that have been idle past their TTL.
    pub fn purge_idle_readers(&self) {
        self.readers.purge_expired();
    }

    // -----------------------------------------------------------------------
    // Buffers
    // -----------------------------------------------------------------------

    /// The buffer receiving appends.
    pub fn live(&self) -> Arc<MemoryBuffer> {
        Arc::clone(&self.live.read())
    }

    /// Make `buffer` the live buffer.
    pub fn set_live(&self, buffer: Arc<MemoryBuffer>) {
        *self.live.write() = buffer;
    }

    /// List a sealed buffer as waiting for its flush. Empty buffers are
    /// ignored.
    pub fn begin_flush(&self, buffer: Arc<MemoryBuffer>) {
        if let Some(first_id) = buffer.first_id() {
            self.flushing.write().insert(first_id, buffer);
        }
    }

    /// Drop a flushed buffer from the waiting list.
    pub fn finish_flush(&self, first_id: u64) -> Option<Arc<MemoryBuffer>> {
        self.flushing.write().remove(&first_id)
    }

    /// Sealed buffers waiting for their flush, oldest first.
    pub fn flushing(&self) -> Vec<Arc<MemoryBuffer>> {
        self.flushing.read().values().cloned().collect()
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// One deduplicated pass over every source.
    pub fn read_all(self: &Arc<Self>) -> CatalogIter {
        CatalogIter::new(Arc::clone(self))
    }

    /// The source with the smallest key above `floor` (or the smallest
    /// overall when `floor` is `None`), with its key.
    pub fn next_source(&self, floor: Option<SourceKey>) -> Option<(SourceKey, Source)> {
        let from = floor.map_or(0, |floor| floor.position);
        let mut best: Option<(SourceKey, Source)> = None;
        let mut offer = |key: SourceKey, source: Source| {
            if key.after(floor) && best.as_ref().map_or(true, |(best, _)| key < *best) {
                best = Some((key, source));
            }
        };

        let live = self.live();
        if let Some(first_id) = live.first_id() {
            offer(
                SourceKey::new(first_id, SourceKey::LIVE),
                Source::Buffer { first_id, buffer: live },
            );
        }

        let flushing: Vec<(u64, Arc<MemoryBuffer>)> = self
            .flushing
            .read()
            .range(from..)
            .take(2)
            .map(|(first_id, buffer)| (*first_id, Arc::clone(buffer)))
            .collect();
        for (first_id, buffer) in flushing {
            offer(
                SourceKey::new(first_id, SourceKey::FLUSHING),
                Source::Buffer { first_id, buffer },
            );
        }

        // Files rank first, so only a name strictly above the floor position
        // sorts after the floor.
        let lower = floor.map_or(Bound::Unbounded, |floor| Bound::Excluded(floor.position));
        let candidates: Vec<(u64, Arc<FileEntry>)> = self
            .files
            .read()
            .range((lower, Bound::Unbounded))
            .map(|(name_id, entry)| (*name_id, Arc::clone(entry)))
            .collect();
        for (name_id, entry) in candidates {
            match entry.info() {
                Ok(info) => {
                    offer(
                        SourceKey::new(name_id, SourceKey::FILE),
                        Source::File {
                            name_id,
                            first_id: info.first_id,
                            path: entry.path.clone(),
                        },
                    );
                    break;
                }
                Err(err) => entry.report_unreadable(&err),
            }
        }

        best
    }

    /// Current counts.
    pub fn stats(&self) -> CatalogStats {
        CatalogStats {
            files: self.files.read().len(),
            flushing: self.flushing.read().len(),
            live_rows: self.live().len(),
            cached_readers: self.readers.len(),
        }
    }
}
