// SPDX-License-Identifier: PMPL-1.0-or-later
//
// TrailStore Write-Ahead Log - Configuration
//
// Durability and segment sizing knobs. All fields have defaults so a config
// file only needs to name what it changes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::segment::{DEFAULT_GUARD_BYTES, DEFAULT_MAX_SEGMENT_SIZE};

/// Controls how aggressively the WAL calls `fsync` on the active segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode", content = "interval_ms")]
pub enum SyncMode {
    /// Call `fsync` after every append. Nothing acknowledged is lost on
    /// power failure, at a large throughput cost.
    Fsync,

    /// Call `fsync` at most once per interval. The interval is checked on
    /// append and by [`crate::WriteAheadLog::sync_if_due`], so an idle log
    /// still reaches disk.
    Periodic(#[serde(with = "duration_millis")] Duration),

    /// Never call `fsync` explicitly; rely on the OS page cache. A process
    /// crash loses nothing, a power failure may.
    Async,
}

impl Default for SyncMode {
    fn default() -> Self {
        SyncMode::Periodic(Duration::from_millis(100))
    }
}

/// WAL configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalConfig {
    /// Size in bytes at which the active segment is sealed and a new one
    /// begun.
    pub max_segment_size: u64,

    /// Bytes kept free at the end of a segment. A frame that would cross
    /// `max_segment_size - guard_bytes` goes to a fresh segment.
    pub guard_bytes: u64,

    /// When appended bytes are forced to stable storage.
    pub sync_mode: SyncMode,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            max_segment_size: DEFAULT_MAX_SEGMENT_SIZE,
            guard_bytes: DEFAULT_GUARD_BYTES,
            sync_mode: SyncMode::default(),
        }
    }
}

impl WalConfig {
    /// Set the segment size cap.
    pub fn with_max_segment_size(mut self, bytes: u64) -> Self {
        self.max_segment_size = bytes;
        self
    }

    /// Set the sync mode.
    pub fn with_sync_mode(mut self, sync_mode: SyncMode) -> Self {
        self.sync_mode = sync_mode;
        self
    }
}

/// Serialize a [`Duration`] as whole milliseconds.
pub mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WalConfig::default();
        assert_eq!(config.max_segment_size, 20 * 1024 * 1024);
        assert_eq!(config.guard_bytes, 256);
        assert_eq!(config.sync_mode, SyncMode::Periodic(Duration::from_millis(100)));
    }

    #[test]
    fn test_builder_setters() {
        let config = WalConfig::default()
            .with_max_segment_size(4096)
            .with_sync_mode(SyncMode::Fsync);
        assert_eq!(config.max_segment_size, 4096);
        assert_eq!(config.sync_mode, SyncMode::Fsync);
    }
}
