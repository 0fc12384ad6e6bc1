// SPDX-License-Identifier: PMPL-1.0-or-later
//
// TrailStore event crate
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The leaf crate of the TrailStore workspace. It defines the immutable
// `Event` record, the binary frame used by the write-ahead log, and the
// `Sequencer` that mints globally increasing 64-bit event ids.
//
// ## Frame format (all integers big-endian)
//
// ```text
// [4 bytes: total_length (u32)]   -- bytes from `id` through `checksum`
// [8 bytes: id (u64)]
// [4 bytes: key_len (u32)]
// [N bytes: key]
// [4 bytes: metadata_len (u32)]   -- u32::MAX marks null metadata
// [M bytes: metadata]
// [4 bytes: data_len (u32)]
// [K bytes: data]
// [4 bytes: checksum (u32)]       -- CRC32 over id..data + 0xFFFFFFFF
// ```
//
// ## Usage
//
// ```
// use trail_event::{codec, Event, Sequencer};
//
// let sequencer = Sequencer::new();
// let event = Event::new(sequencer.tick_now(), b"key".to_vec(), None, b"payload".to_vec());
//
// let frame = codec::encode(&event);
// let decoded = codec::decode(&frame).unwrap();
// assert_eq!(decoded, event);
// ```

pub mod codec;
pub mod error;
pub mod event;
pub mod sequencer;

pub use codec::{decode, decode_frame, encode, FrameOutcome};
pub use error::{IntegrityError, IntegrityResult};
pub use event::Event;
pub use sequencer::Sequencer;
