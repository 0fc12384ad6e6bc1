// SPDX-License-Identifier: PMPL-1.0-or-later
//
// TrailStore engine - Error types
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

use thiserror::Error;
use trail_chunks::ChunkError;
use trail_wal::WalError;

/// Why an append was refused. The event is not visible to readers.
#[derive(Debug, Error)]
pub enum AppendError {
    /// The engine is closing or closed.
    #[error("storage engine is closed")]
    Closed,

    /// The engine was opened read-only.
    #[error("storage engine is read-only")]
    ReadOnly,

    /// The id does not sort after the newest stored id.
    #[error("event id {id} is not greater than the newest stored id {last}")]
    NonIncreasingId {
        /// The rejected id.
        id: u64,
        /// The newest id already stored.
        last: u64,
    },

    /// Writing to the WAL failed.
    #[error("WAL append failed: {0}")]
    Wal(WalError),

    /// Adding the event to the live buffer failed.
    #[error("buffer append failed: {0}")]
    Buffer(#[from] ChunkError),
}

impl From<WalError> for AppendError {
    fn from(error: WalError) -> Self {
        match error {
            WalError::NonIncreasingId { id, last } => AppendError::NonIncreasingId { id, last },
            WalError::Closed => AppendError::Closed,
            WalError::ReadOnly => AppendError::ReadOnly,
            other => AppendError::Wal(other),
        }
    }
}

/// A source could not be read.
#[derive(Debug, Error)]
pub enum ReadError {
    /// A WAL segment could not be read.
    #[error("WAL read failed: {0}")]
    Wal(#[from] WalError),

    /// A chunk file could not be read.
    #[error("chunk read failed: {0}")]
    Chunk(#[from] ChunkError),
}

/// Failures opening or closing the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// File system failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The WAL could not be opened, replayed or closed.
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    /// The chunk directory could not be read.
    #[error("chunk error: {0}")]
    Chunk(#[from] ChunkError),

    /// The configuration is unusable.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A configuration file could not be parsed.
    #[error("configuration file is not valid JSON: {0}")]
    ConfigFormat(#[from] serde_json::Error),
}

/// Convenience alias for engine lifecycle results.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wal_ordering_error_maps_to_append_error() {
        let error = AppendError::from(WalError::NonIncreasingId { id: 3, last: 8 });
        assert!(matches!(error, AppendError::NonIncreasingId { id: 3, last: 8 }));
        assert!(matches!(AppendError::from(WalError::Closed), AppendError::Closed));
    }

    #[test]
    fn test_error_display() {
        let message = EngineError::Config("memory_threshold must be positive".into()).to_string();
        assert!(message.contains("memory_threshold"));
    }
}
