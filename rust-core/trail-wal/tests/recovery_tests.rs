// SPDX-License-Identifier: PMPL-1.0-or-later
//! Crash-recovery tests for the TrailStore WAL.
//!
//! Simulates processes that die mid-write by cutting segment files short or
//! damaging bytes, then checks what a fresh [`WriteAheadLog`] sees.

use std::fs::{self, OpenOptions};

use proptest::prelude::*;
use tempfile::TempDir;
use trail_event::{encode, Event};
use trail_wal::{SyncMode, WalConfig, WalError, WriteAheadLog};

fn event(id: u64) -> Event {
    Event::new(
        id,
        format!("device-{}", id % 7).into_bytes(),
        (id % 3 == 0).then(|| b"tagged".to_vec()),
        id.to_be_bytes().repeat(4),
    )
}

fn config(max_segment_size: u64) -> WalConfig {
    WalConfig::default()
        .with_max_segment_size(max_segment_size)
        .with_sync_mode(SyncMode::Async)
}

fn all_ids(wal: &WriteAheadLog) -> Vec<u64> {
    wal.snapshot(0, u64::MAX, false)
        .map(|item| item.unwrap().id)
        .collect()
}

// ===========================================================================
// Torn writes
// ===========================================================================

#[test]
fn test_torn_tail_is_not_an_error_after_restart() {
    let dir = TempDir::new().unwrap();
    {
        let mut wal = WriteAheadLog::open(dir.path(), config(1 << 20)).unwrap();
        for id in 1..=10 {
            wal.append(&event(id)).unwrap();
        }
    }

    // Half of an eleventh record, as if the process died inside write().
    let segment = dir.path().join("1.wal");
    let frame = encode(&event(11));
    let mut file = OpenOptions::new().append(true).open(&segment).unwrap();
    std::io::Write::write_all(&mut file, &frame[..frame.len() - 3]).unwrap();
    drop(file);

    let mut wal = WriteAheadLog::open(dir.path(), config(1 << 20)).unwrap();
    assert_eq!(wal.last_id(), Some(10));
    for item in wal.snapshot(0, u64::MAX, false) {
        item.expect("torn tail must read as end of stream");
    }

    // Appending after recovery goes to a fresh segment.
    wal.append(&event(11)).unwrap();
    assert_eq!(all_ids(&wal), (1..=11).collect::<Vec<_>>());
    assert!(dir.path().join("11.wal").exists());
}

#[test]
fn test_damaged_record_surfaces_but_neighbours_survive() {
    let dir = TempDir::new().unwrap();
    {
        let mut wal = WriteAheadLog::open(dir.path(), config(1 << 20)).unwrap();
        for id in 1..=5 {
            wal.append(&event(id)).unwrap();
        }
    }

    let segment = dir.path().join("1.wal");
    let mut bytes = fs::read(&segment).unwrap();
    let first = encode(&event(1)).len();
    let last = bytes.len() - 1;
    bytes[first + 14] ^= 0x40;
    bytes[last] ^= 0x01;
    fs::write(&segment, bytes).unwrap();

    let wal = WriteAheadLog::open_read_only(dir.path(), config(1 << 20)).unwrap();
    let items: Vec<_> = wal.snapshot(0, u64::MAX, false).collect();
    assert_eq!(items.len(), 5);
    let good: Vec<u64> = items
        .iter()
        .filter_map(|item| item.as_ref().ok().map(|event| event.id))
        .collect();
    assert_eq!(good, vec![1, 3, 4]);
    assert!(items
        .iter()
        .filter(|item| item.is_err())
        .all(|item| matches!(item, Err(WalError::Integrity { .. }))));
}

// ===========================================================================
// Range reads across segments
// ===========================================================================

#[test]
fn test_reverse_snapshot_spans_segments() {
    let dir = TempDir::new().unwrap();
    let mut wal = WriteAheadLog::open(dir.path(), config(600)).unwrap();
    for id in 1..=40 {
        wal.append(&event(id)).unwrap();
    }
    assert!(wal.segments().len() > 3);

    let reversed: Vec<u64> = wal
        .snapshot(5, 35, true)
        .map(|item| item.unwrap().id)
        .collect();
    assert_eq!(reversed, (5..35).rev().collect::<Vec<_>>());
}

#[test]
fn test_scan_sees_appends_made_after_it_started() {
    let dir = TempDir::new().unwrap();
    let mut wal = WriteAheadLog::open(dir.path(), config(600)).unwrap();
    wal.append(&event(1)).unwrap();

    let mut scanner = wal.scan();
    assert_eq!(scanner.next().unwrap().unwrap().id, 1);
    assert!(scanner.next().is_none());

    for id in 2..=20 {
        wal.append(&event(id)).unwrap();
    }
    let rest: Vec<u64> = scanner.by_ref().map(|item| item.unwrap().id).collect();
    assert_eq!(rest, (2..=20).collect::<Vec<_>>());
}

// ===========================================================================
// Truncation
// ===========================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn test_replay_after_truncate_keeps_only_newer_events(
        count in 1u64..120,
        boundary in 0u64..140,
        cap in 300u64..2_000,
    ) {
        let dir = TempDir::new().unwrap();
        let mut wal = WriteAheadLog::open(dir.path(), config(cap)).unwrap();
        for id in 1..=count {
            wal.append(&event(id)).unwrap();
        }
        let report = wal.truncate(boundary).unwrap();
        prop_assert_eq!(report.skipped, 0);
        wal.close().unwrap();

        let reopened = WriteAheadLog::open_read_only(dir.path(), config(cap)).unwrap();
        let expected: Vec<u64> = (boundary.max(1)..=count).collect();
        prop_assert_eq!(all_ids(&reopened), expected);
    }
}
