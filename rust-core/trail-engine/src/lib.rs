// SPDX-License-Identifier: PMPL-1.0-or-later
//
// TrailStore storage engine
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Ties the WAL and the chunk catalog together. Appends are written to the WAL
// and the live in-memory buffer under one lock; a full buffer is swapped out
// and stored as an immutable chunk file by a background worker, after which
// the WAL range it covers is truncated. On open, WAL events newer than the
// newest chunk file are replayed into memory.
//
// ## Usage
//
// ```no_run
// use trail_engine::{EngineConfig, StorageEngine};
//
// let engine = StorageEngine::open(EngineConfig::new("/tmp/trailstore")).unwrap();
// engine.append_new("sensor-1", None, b"21.5".to_vec()).unwrap();
//
// for event in engine.read_all() {
//     println!("{} {:?}", event.id, event.data);
// }
// engine.close().unwrap();
// ```

pub mod config;
pub mod engine;
pub mod error;
mod flush;
pub mod recovery;

pub use config::{EngineConfig, DEFAULT_MEMORY_THRESHOLD};
pub use engine::{EngineState, EngineStats, StorageEngine};
pub use error::{AppendError, EngineError, EngineResult, ReadError};
pub use recovery::RecoveryReport;

pub use trail_event::{Event, Sequencer};
