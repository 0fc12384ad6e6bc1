// SPDX-License-Identifier: PMPL-1.0-or-later
//
// TrailStore chunks crate
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Everything between the WAL and a reader: the in-memory buffer appends land
// in, the immutable chunk files buffers are flushed to, the cache of opened
// chunk readers, the watcher that notices chunk files created by anyone, and
// the catalog that stitches all of it into one deduplicated read.
//
// ## Usage
//
// ```no_run
// use std::sync::Arc;
// use std::time::Duration;
// use trail_chunks::{ChunkCatalog, MemoryBuffer};
// use trail_event::Event;
//
// let live = Arc::new(MemoryBuffer::new(1_000));
// let catalog = Arc::new(
//     ChunkCatalog::open("/tmp/trail-chunks", Arc::clone(&live), 50, Duration::from_secs(60)).unwrap(),
// );
// live.append(Event::new(1, b"k".to_vec(), None, b"v".to_vec())).unwrap();
//
// for event in catalog.read_all() {
//     println!("{}", event.id);
// }
// ```

pub mod buffer;
pub mod cache;
pub mod catalog;
pub mod chunk_file;
pub mod error;
pub mod filter;
pub mod iter;
pub mod watcher;

pub use buffer::{BufferCursor, BufferState, MemoryBuffer};
pub use cache::{TtlCache, DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL};
pub use catalog::{CatalogStats, ChunkCatalog, Source, SourceKey};
pub use chunk_file::{chunk_path, ChunkFile, ChunkInfo, ColumnBatch};
pub use error::{ChunkError, ChunkResult};
pub use filter::predicates;
pub use iter::CatalogIter;
pub use watcher::{ChunkWatcher, FolderEvent};

// Re-exported so callers can hold and combine id indexes.
pub use roaring::RoaringTreemap;
