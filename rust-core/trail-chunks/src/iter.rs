// SPDX-License-Identifier: PMPL-1.0-or-later
//
// TrailStore chunks - Unified read iterator
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Walks every source in the catalog in ascending key order, asking
// the catalog for the next source each time one runs out so that sources
// created after the walk began are still found. The same id range can be
// present twice while a buffer is being replaced by its chunk file; every id
// handed out is recorded in a bitmap and later copies are dropped.

use std::sync::Arc;

use roaring::RoaringTreemap;
use tracing::{trace, warn};
use trail_event::Event;

use crate::buffer::BufferCursor;
use crate::catalog::{ChunkCatalog, Source, SourceKey};
use crate::chunk_file::ChunkFile;

enum SourceCursor {
    File { file: Arc<ChunkFile>, row: usize },
    Buffer(BufferCursor),
}

impl SourceCursor {
    fn next(&mut self) -> Option<Event> {
        match self {
            SourceCursor::File { file, row } => {
                let event = file.event(*row)?;
                *row += 1;
                Some(event)
            }
            SourceCursor::Buffer(cursor) => cursor.next(),
        }
    }
}

/// Deduplicated iterator over files, flushing buffers and the live buffer.
///
/// Within one source events come in append order. `None` means the reader
/// has caught up; calling `next` again later picks up newer events.
pub struct CatalogIter {
    catalog: Arc<ChunkCatalog>,
    floor: Option<SourceKey>,
    current: Option<SourceCursor>,
    seen: RoaringTreemap,
    duplicates: u64,
}

impl CatalogIter {
    pub(crate) fn new(catalog: Arc<ChunkCatalog>) -> Self {
        Self {
            catalog,
            floor: None,
            current: None,
            seen: RoaringTreemap::new(),
            duplicates: 0,
        }
    }

    /// Ids handed out so far.
    pub fn seen(&self) -> &RoaringTreemap {
        &self.seen
    }

    /// Copies dropped because their id had already been handed out.
    pub fn duplicates_skipped(&self) -> u64 {
        self.duplicates
    }

    fn pull(&mut self) -> Option<Event> {
        while let Some(event) = self.current.as_mut()?.next() {
            if self.seen.insert(event.id) {
                return Some(event);
            }
            self.duplicates += 1;
        }
        None
    }

    fn open(&self, source: Source) -> Option<SourceCursor> {
        match source {
            Source::Buffer { buffer, .. } => Some(SourceCursor::Buffer(buffer.cursor())),
            Source::File { path, .. } => match self.catalog.open_file(&path) {
                Ok(file) => Some(SourceCursor::File { file, row: 0 }),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "Skipping unreadable chunk file");
                    None
                }
            },
        }
    }
}

impl Iterator for CatalogIter {
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        loop {
            if let Some(event) = self.pull() {
                return Some(event);
            }

            let next = self.catalog.next_source(self.floor);

            // A buffer can take its last rows between the pull above and the
            // lookup; the lookup observing a newer source makes them visible.
            if let Some(event) = self.pull() {
                return Some(event);
            }

            let (key, source) = next?;
            trace!(position = key.position, rank = key.rank, "Advancing to next source");
            self.floor = Some(key);
            self.current = self.open(source);
        }
    }
}
