// SPDX-License-Identifier: PMPL-1.0-or-later
//! Performance benchmarks for the TrailStore write and read paths

use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tempfile::TempDir;
use trail_chunks::{ChunkCatalog, MemoryBuffer};
use trail_engine::{EngineConfig, StorageEngine};
use trail_event::{codec, Event, Sequencer};
use trail_wal::{SyncMode, WalConfig, WriteAheadLog};

fn sample_event(id: u64, payload: usize) -> Event {
    Event::new(id, b"bench-key".to_vec(), None, vec![0xAB; payload])
}

// ============================================================================
// Codec and sequencer
// ============================================================================

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");
    for payload in [16usize, 256, 4096] {
        let event = sample_event(42, payload);
        let frame = codec::encode(&event);
        group.throughput(Throughput::Bytes(frame.len() as u64));

        group.bench_with_input(BenchmarkId::new("encode", payload), &event, |b, event| {
            let mut buffer = Vec::with_capacity(frame.len());
            b.iter(|| {
                buffer.clear();
                codec::encode_into(black_box(event), &mut buffer);
            });
        });

        group.bench_with_input(BenchmarkId::new("decode", payload), &frame, |b, frame| {
            b.iter(|| black_box(codec::decode(black_box(frame)).unwrap()));
        });
    }
    group.finish();
}

fn bench_sequencer(c: &mut Criterion) {
    let sequencer = Sequencer::new();
    c.bench_function("sequencer/tick_now", |b| b.iter(|| black_box(sequencer.tick_now())));
}

// ============================================================================
// WAL
// ============================================================================

fn bench_wal_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("wal");
    group.throughput(Throughput::Elements(1));

    group.bench_function("append_async", |b| {
        let dir = TempDir::new().unwrap();
        let config = WalConfig::default().with_sync_mode(SyncMode::Async);
        let mut wal = WriteAheadLog::open(dir.path(), config).unwrap();
        let mut id = 0u64;
        b.iter(|| {
            id += 1;
            wal.append(&sample_event(id, 64)).unwrap();
        });
    });

    group.bench_function("snapshot_10k", |b| {
        let dir = TempDir::new().unwrap();
        let config = WalConfig::default().with_sync_mode(SyncMode::Async);
        let mut wal = WriteAheadLog::open(dir.path(), config).unwrap();
        for id in 1..=10_000 {
            wal.append(&sample_event(id, 64)).unwrap();
        }
        wal.sync().unwrap();
        b.iter(|| black_box(wal.snapshot(0, u64::MAX, false).count()));
    });

    group.finish();
}

// ============================================================================
// Buffer and catalog reads
// ============================================================================

fn bench_catalog_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("catalog");
    for rows in [1_000u64, 50_000] {
        let dir = TempDir::new().unwrap();
        let live = Arc::new(MemoryBuffer::new(rows as usize));
        for id in 1..=rows {
            live.append(sample_event(id, 32)).unwrap();
        }
        let catalog = Arc::new(
            ChunkCatalog::open(dir.path(), live, 50, Duration::from_secs(60)).unwrap(),
        );

        group.throughput(Throughput::Elements(rows));
        group.bench_with_input(BenchmarkId::new("read_all_live", rows), &catalog, |b, catalog| {
            b.iter(|| black_box(catalog.read_all().count()));
        });
    }
    group.finish();
}

// ============================================================================
// Engine
// ============================================================================

fn bench_engine_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine");
    group.throughput(Throughput::Elements(1));

    group.bench_function("append_new_with_flushes", |b| {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig::new(dir.path())
            .with_memory_threshold(10_000)
            .with_watch_chunk_dir(false)
            .with_wal(WalConfig::default().with_sync_mode(SyncMode::Async));
        let engine = StorageEngine::open(config).unwrap();
        b.iter(|| black_box(engine.append_new("bench-key", None, vec![0xAB; 64]).unwrap()));
        engine.close().unwrap();
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_codec,
    bench_sequencer,
    bench_wal_append,
    bench_catalog_read,
    bench_engine_append,
);
criterion_main!(benches);
