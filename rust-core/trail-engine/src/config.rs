// SPDX-License-Identifier: PMPL-1.0-or-later
//
// TrailStore engine - Configuration
//
// Where the engine keeps its files and when it swaps, flushes and retries.
// Every field has a default, so a JSON config only names what it changes.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use trail_chunks::{DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL};
use trail_wal::config::duration_millis;
use trail_wal::WalConfig;

use crate::error::{EngineError, EngineResult};

/// Rows per in-memory buffer before it is swapped out and flushed.
pub const DEFAULT_MEMORY_THRESHOLD: usize = 1_000_000;

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding `<first_id>.chunk` files.
    pub chunk_dir: PathBuf,

    /// Directory holding `<first_id>.wal` segments.
    pub wal_dir: PathBuf,

    /// Rows in the live buffer that trigger a swap.
    pub memory_threshold: usize,

    /// Sealed buffers that may wait for the flush worker before `append`
    /// blocks.
    pub flush_queue_depth: usize,

    /// Pause between attempts to flush a buffer that failed to store.
    #[serde(with = "duration_millis")]
    pub flush_retry_interval: Duration,

    /// Attempts per buffer once the engine is closing. Buffers that still
    /// fail stay in the WAL and are replayed on the next open.
    pub close_flush_attempts: u32,

    /// Opened chunk readers kept in the cache.
    pub reader_cache_capacity: usize,

    /// Idle time after which a cached chunk reader is dropped.
    #[serde(with = "duration_millis")]
    pub reader_cache_ttl: Duration,

    /// Follow chunk files created or deleted by other processes.
    pub watch_chunk_dir: bool,

    /// Serve reads only. No appends, flushes or WAL truncation.
    pub read_only: bool,

    /// Write-ahead log settings.
    pub wal: WalConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new("data")
    }
}

impl EngineConfig {
    /// Defaults with `chunks/` and `wal/` placed under `root`.
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            chunk_dir: root.join("chunks"),
            wal_dir: root.join("wal"),
            memory_threshold: DEFAULT_MEMORY_THRESHOLD,
            flush_queue_depth: 1,
            flush_retry_interval: Duration::from_millis(500),
            close_flush_attempts: 3,
            reader_cache_capacity: DEFAULT_CACHE_CAPACITY,
            reader_cache_ttl: DEFAULT_CACHE_TTL,
            watch_chunk_dir: true,
            read_only: false,
            wal: WalConfig::default(),
        }
    }

    /// Load a configuration from a JSON file. Missing fields take their
    /// defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let text = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the configuration can run an engine.
    pub fn validate(&self) -> EngineResult<()> {
        if self.memory_threshold == 0 {
            return Err(EngineError::Config("memory_threshold must be at least 1".into()));
        }
        if self.flush_queue_depth == 0 {
            return Err(EngineError::Config("flush_queue_depth must be at least 1".into()));
        }
        if self.wal.max_segment_size <= self.wal.guard_bytes {
            return Err(EngineError::Config(format!(
                "wal.max_segment_size ({}) must exceed wal.guard_bytes ({})",
                self.wal.max_segment_size, self.wal.guard_bytes
            )));
        }
        Ok(())
    }

    pub fn with_memory_threshold(mut self, rows: usize) -> Self {
        self.memory_threshold = rows;
        self
    }

    pub fn with_flush_queue_depth(mut self, depth: usize) -> Self {
        self.flush_queue_depth = depth;
        self
    }

    pub fn with_flush_retry_interval(mut self, interval: Duration) -> Self {
        self.flush_retry_interval = interval;
        self
    }

    pub fn with_reader_cache(mut self, capacity: usize, ttl: Duration) -> Self {
        self.reader_cache_capacity = capacity;
        self.reader_cache_ttl = ttl;
        self
    }

    pub fn with_watch_chunk_dir(mut self, watch: bool) -> Self {
        self.watch_chunk_dir = watch;
        self
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn with_wal(mut self, wal: WalConfig) -> Self {
        self.wal = wal;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use trail_wal::SyncMode;

    #[test]
    fn test_new_places_directories_under_root() {
        let config = EngineConfig::new("/var/lib/trail");
        assert_eq!(config.chunk_dir, PathBuf::from("/var/lib/trail/chunks"));
        assert_eq!(config.wal_dir, PathBuf::from("/var/lib/trail/wal"));
        assert_eq!(config.memory_threshold, DEFAULT_MEMORY_THRESHOLD);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_threshold_and_depth() {
        let config = EngineConfig::default().with_memory_threshold(0);
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));

        let config = EngineConfig::default().with_flush_queue_depth(0);
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trail.json");
        fs::write(
            &path,
            r#"{
                "chunk_dir": "/srv/chunks",
                "memory_threshold": 5000,
                "flush_retry_interval": 250,
                "wal": { "sync_mode": { "mode": "periodic", "interval_ms": 20 } }
            }"#,
        )
        .unwrap();

        let config = EngineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.chunk_dir, PathBuf::from("/srv/chunks"));
        assert_eq!(config.wal_dir, PathBuf::from("data/wal"));
        assert_eq!(config.memory_threshold, 5000);
        assert_eq!(config.flush_retry_interval, Duration::from_millis(250));
        assert_eq!(config.wal.sync_mode, SyncMode::Periodic(Duration::from_millis(20)));
        assert_eq!(config.reader_cache_ttl, DEFAULT_CACHE_TTL);
    }

    #[test]
    fn test_invalid_json_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ memory_threshold: ").unwrap();
        assert!(matches!(
            EngineConfig::from_json_file(&path),
            Err(EngineError::ConfigFormat(_))
        ));
    }

    #[test]
    fn test_json_round_trip_keeps_durations() {
        let config = EngineConfig::new("/tmp/t").with_flush_retry_interval(Duration::from_secs(2));
        let text = serde_json::to_string(&config).unwrap();
        let back: EngineConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(back, config);
    }
}
