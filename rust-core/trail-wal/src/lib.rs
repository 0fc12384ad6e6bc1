// SPDX-License-Identifier: PMPL-1.0-or-later
//
// TrailStore Write-Ahead Log (WAL) crate
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Every appended event is written here before it becomes visible in memory.
// After a crash the log is replayed from just past the newest id already
// flushed to a chunk file; once a chunk is durable, the WAL events it covers
// are truncated away.
//
// # Architecture
//
// The WAL is a directory of **segment files**, each named `{first_id}.wal`
// after the id of its first event. Exactly one segment is active at a time;
// once the active file would cross `max_segment_size - guard_bytes` it is
// sealed and never written again. Records use the `trail-event` frame format
// (`[u32 body_len][u64 id][key][metadata][data][u32 crc32]`, big-endian).
//
// ## Usage
//
// ```no_run
// use trail_event::Event;
// use trail_wal::{WalConfig, WriteAheadLog};
//
// let mut wal = WriteAheadLog::open("/tmp/trail-wal", WalConfig::default()).unwrap();
// wal.append(&Event::new(1, b"sensor-7".to_vec(), None, b"21.5".to_vec())).unwrap();
// wal.sync().unwrap();
//
// for event in wal.snapshot(0, u64::MAX, false) {
//     let event = event.unwrap();
//     println!("id={} key={:?}", event.id, event.key);
// }
//
// // Events below 2 are now held elsewhere.
// wal.truncate(2).unwrap();
// ```

pub mod config;
pub mod error;
pub mod reader;
pub mod segment;
pub mod truncate;
pub mod wal;
pub mod writer;

// Re-export the primary public API for ergonomic imports.
pub use config::{SyncMode, WalConfig};
pub use error::{WalError, WalResult};
pub use reader::{SegmentReader, WalScanner, WalSnapshot};
pub use segment::{SegmentInfo, DEFAULT_GUARD_BYTES, DEFAULT_MAX_SEGMENT_SIZE};
pub use truncate::{TruncateReport, WalTruncator};
pub use wal::WriteAheadLog;
