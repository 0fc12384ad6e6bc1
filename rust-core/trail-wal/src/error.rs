// SPDX-License-Identifier: PMPL-1.0-or-later
//
// TrailStore Write-Ahead Log - Error types
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Defines all error conditions that can arise during WAL operations including
// I/O failures, damaged records, and appends the log refuses.

use thiserror::Error;
use trail_event::IntegrityError;

/// Errors that can occur during WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// An I/O error occurred while reading or writing a WAL segment file.
    #[error("WAL I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A complete record in a segment failed its integrity check.
    #[error("damaged record at offset {offset} in segment {segment}: {source}")]
    Integrity {
        /// The segment file name.
        segment: String,
        /// Byte offset of the record's length prefix.
        offset: u64,
        /// The underlying decode failure.
        #[source]
        source: IntegrityError,
    },

    /// The log has been closed.
    #[error("WAL is closed")]
    Closed,

    /// The log was opened read-only.
    #[error("WAL is read-only")]
    ReadOnly,

    /// The submitted id does not sort after the newest id in the log.
    #[error("event id {id} is not greater than the last logged id {last}")]
    NonIncreasingId {
        /// The rejected id.
        id: u64,
        /// The newest id already in the log.
        last: u64,
    },

    /// The encoded event is larger than a readable WAL record.
    #[error("event {id} encodes to {size} bytes, exceeding the maximum record size of {max}")]
    FrameTooLarge {
        /// The rejected id.
        id: u64,
        /// Encoded body length.
        size: usize,
        /// Largest body a reader accepts.
        max: u32,
    },

    /// The WAL directory does not exist or is not accessible.
    #[error("WAL directory not found or inaccessible: {0}")]
    DirectoryNotFound(String),
}

/// Convenience type alias for WAL results.
pub type WalResult<T> = Result<T, WalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_integrity() {
        let error = WalError::Integrity {
            segment: "42.wal".to_string(),
            offset: 128,
            source: IntegrityError::ChecksumMismatch {
                id: 7,
                stored: 0xDEADBEEF,
                computed: 0xCAFEBABE,
            },
        };
        let message = error.to_string();
        assert!(message.contains("42.wal"));
        assert!(message.contains("128"));
        assert!(message.contains("0xdeadbeef"));
    }

    #[test]
    fn test_error_display_io() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file gone");
        let message = WalError::Io(io_error).to_string();
        assert!(message.contains("file gone"));
    }

    #[test]
    fn test_error_display_non_increasing() {
        let message = WalError::NonIncreasingId { id: 5, last: 9 }.to_string();
        assert!(message.contains('5'));
        assert!(message.contains('9'));
    }
}
