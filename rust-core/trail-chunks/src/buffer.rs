// SPDX-License-Identifier: PMPL-1.0-or-later
//
// TrailStore chunks - In-memory buffer
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// A `MemoryBuffer` collects appended events until it is sealed and written to
// a chunk file. Rows live in fixed-size blocks of write-once cells, allocated
// as the buffer grows. A row is published by storing the new length with
// release ordering after the cell is set, so readers that load the length
// with acquire ordering only ever see complete rows and never take a lock.

use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::debug;
use trail_event::Event;

use crate::chunk_file::{self, ChunkInfo};
use crate::error::{ChunkError, ChunkResult};

/// Largest block of row cells; small buffers use one block of their own size.
const BLOCK_SIZE: usize = 4096;

/// Lifecycle of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BufferState {
    /// Accepting appends.
    Live = 0,
    /// Full; waiting to be written to a chunk file.
    Sealed = 1,
    /// Written to a chunk file.
    Stored = 2,
    /// Replaced by its chunk file in the catalog. Still readable by cursors
    /// that hold it.
    Retired = 3,
}

impl BufferState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => BufferState::Live,
            1 => BufferState::Sealed,
            2 => BufferState::Stored,
            _ => BufferState::Retired,
        }
    }
}

type Block = Box<[OnceLock<Event>]>;

/// Append-only, lock-free-to-read event buffer.
#[derive(Debug)]
pub struct MemoryBuffer {
    capacity: usize,
    block_len: usize,
    blocks: Box<[OnceLock<Block>]>,
    len: AtomicUsize,
    first_id: AtomicU64,
    last_id: AtomicU64,
    state: AtomicU8,
    readers: AtomicUsize,
    append_lock: Mutex<()>,
    store_lock: Mutex<()>,
}

impl MemoryBuffer {
    /// Create an empty buffer holding up to `capacity` rows.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let block_len = capacity.min(BLOCK_SIZE);
        let block_count = capacity.div_ceil(block_len);
        Self {
            capacity,
            block_len,
            blocks: (0..block_count).map(|_| OnceLock::new()).collect(),
            len: AtomicUsize::new(0),
            first_id: AtomicU64::new(0),
            last_id: AtomicU64::new(0),
            state: AtomicU8::new(BufferState::Live as u8),
            readers: AtomicUsize::new(0),
            append_lock: Mutex::new(()),
            store_lock: Mutex::new(()),
        }
    }

    /// Append at the next free row.
    ///
    /// Id order is not checked; the engine's write path guarantees it.
    pub fn append(&self, event: Event) -> ChunkResult<()> {
        let _guard = self.append_lock.lock();
        if self.state() != BufferState::Live {
            return Err(ChunkError::BufferSealed);
        }
        let row = self.len.load(Ordering::Relaxed);
        if row >= self.capacity {
            return Err(ChunkError::BufferFull {
                capacity: self.capacity,
            });
        }

        let id = event.id;
        let block_len = self.block_len;
        let block = self.blocks[row / block_len]
            .get_or_init(|| (0..block_len).map(|_| OnceLock::new()).collect());
        if block[row % block_len].set(event).is_err() {
            return Err(ChunkError::BufferFull {
                capacity: self.capacity,
            });
        }

        if row == 0 {
            self.first_id.store(id, Ordering::Relaxed);
        }
        self.last_id.store(id, Ordering::Relaxed);
        self.len.store(row + 1, Ordering::Release);
        Ok(())
    }

    /// Rows appended so far.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// `true` before the first append.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of rows.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// `true` once `len() == capacity()`.
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    /// Row `row`, if it has been published.
    pub fn get(&self, row: usize) -> Option<&Event> {
        if row >= self.len() {
            return None;
        }
        self.blocks[row / self.block_len].get()?[row % self.block_len].get()
    }

    /// Id of the first row.
    pub fn first_id(&self) -> Option<u64> {
        if self.is_empty() {
            None
        } else {
            Some(self.first_id.load(Ordering::Relaxed))
        }
    }

    /// Id of the newest row.
    pub fn last_id(&self) -> Option<u64> {
        if self.is_empty() {
            None
        } else {
            Some(self.last_id.load(Ordering::Relaxed))
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> BufferState {
        BufferState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// `true` once no more rows can be appended.
    pub fn is_sealed(&self) -> bool {
        self.state() != BufferState::Live
    }

    /// Stop accepting appends. Idempotent.
    pub fn seal(&self) {
        let _guard = self.append_lock.lock();
        let _ = self.state.compare_exchange(
            BufferState::Live as u8,
            BufferState::Sealed as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Seal the buffer and write all of its rows to a new chunk file.
    ///
    /// May be retried after a failure. Once it has succeeded, further calls
    /// fail with [`ChunkError::AlreadyStored`]. The rows stay readable.
    pub fn seal_and_store(&self, path: &Path) -> ChunkResult<ChunkInfo> {
        self.seal();
        let _guard = self.store_lock.lock();
        if matches!(self.state(), BufferState::Stored | BufferState::Retired) {
            return Err(ChunkError::AlreadyStored);
        }
        if self.is_empty() {
            return Err(ChunkError::EmptyBuffer);
        }

        let info = chunk_file::write_chunk_file(path, self.rows())?;
        self.state
            .store(BufferState::Stored as u8, Ordering::Release);
        debug!(path = %path.display(), rows = info.rows, "Stored buffer");
        Ok(info)
    }

    /// Mark the buffer as superseded by its chunk file. Storage is released
    /// when the last handle is dropped.
    pub fn retire(&self) {
        self.state
            .store(BufferState::Retired as u8, Ordering::Release);
    }

    /// Count, smallest and largest id, from a full scan.
    pub fn info(&self) -> Option<ChunkInfo> {
        let mut rows = 0u64;
        let mut first_id = u64::MAX;
        let mut last_id = 0u64;
        for event in self.rows() {
            rows += 1;
            first_id = first_id.min(event.id);
            last_id = last_id.max(event.id);
        }
        (rows > 0).then_some(ChunkInfo {
            rows,
            first_id,
            last_id,
        })
    }

    /// Published rows, in append order, as of the call.
    pub fn rows(&self) -> impl Iterator<Item = &Event> {
        let len = self.len();
        (0..len).filter_map(move |row| self.get(row))
    }

    /// Cursors currently reading this buffer.
    pub fn reader_count(&self) -> usize {
        self.readers.load(Ordering::Acquire)
    }

    /// A cursor that follows the buffer as it grows.
    pub fn cursor(self: &Arc<Self>) -> BufferCursor {
        self.readers.fetch_add(1, Ordering::AcqRel);
        BufferCursor {
            buffer: Arc::clone(self),
            row: 0,
        }
    }
}

/// Reads a buffer in append order, yielding rows appended after the cursor
/// was created too.
#[derive(Debug)]
pub struct BufferCursor {
    buffer: Arc<MemoryBuffer>,
    row: usize,
}

impl BufferCursor {
    /// The buffer being read.
    pub fn buffer(&self) -> &Arc<MemoryBuffer> {
        &self.buffer
    }

    /// `true` if every row has been read and no more can arrive.
    pub fn is_exhausted(&self) -> bool {
        self.buffer.is_sealed() && self.row >= self.buffer.len()
    }
}

impl Iterator for BufferCursor {
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        let event = self.buffer.get(self.row)?.clone();
        self.row += 1;
        Some(event)
    }
}

impl Drop for BufferCursor {
    fn drop(&mut self) {
        self.buffer.readers.fetch_sub(1, Ordering::AcqRel);
    }
}
