// SPDX-License-Identifier: PMPL-1.0-or-later
//
// TrailStore chunks - Error types
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by buffers, chunk files and the catalog.
#[derive(Debug, Error)]
pub enum ChunkError {
    /// Underlying file system failure.
    #[error("chunk I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A chunk file's header disagrees with its contents.
    #[error("chunk file {path} is inconsistent: {reason}")]
    Integrity {
        /// The offending file.
        path: PathBuf,
        /// What disagreed.
        reason: String,
    },

    /// The file does not start with the chunk magic bytes.
    #[error("{path} is not a chunk file")]
    BadMagic {
        /// The offending file.
        path: PathBuf,
    },

    /// The chunk format version is newer than this build understands.
    #[error("chunk file {path} has unsupported format version {version}")]
    UnsupportedVersion {
        /// The offending file.
        path: PathBuf,
        /// Version found in the header.
        version: u16,
    },

    /// The body checksum stored in the header does not match the body.
    #[error("chunk file {path} body checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        /// The offending file.
        path: PathBuf,
        /// Checksum from the header.
        stored: u32,
        /// Checksum of the body as read.
        computed: u32,
    },

    /// Column batch encoding or decoding failed.
    #[error("chunk serialization error: {0}")]
    Serialization(#[from] postcard::Error),

    /// The buffer no longer accepts appends.
    #[error("buffer is sealed")]
    BufferSealed,

    /// The buffer holds as many rows as it was sized for.
    #[error("buffer is full ({capacity} rows)")]
    BufferFull {
        /// Row capacity of the buffer.
        capacity: usize,
    },

    /// The buffer has already been written to a chunk file.
    #[error("buffer was already stored")]
    AlreadyStored,

    /// A chunk file with the requested name exists.
    #[error("chunk file {path} already exists")]
    AlreadyExists {
        /// The existing file.
        path: PathBuf,
    },

    /// There is nothing to store.
    #[error("buffer is empty")]
    EmptyBuffer,

    /// The directory watcher could not be set up.
    #[error("chunk directory watch failed: {0}")]
    Watch(#[from] notify::Error),
}

/// Convenience alias for chunk results.
pub type ChunkResult<T> = Result<T, ChunkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_checksum_mismatch() {
        let error = ChunkError::ChecksumMismatch {
            path: PathBuf::from("/data/chunks/12.chunk"),
            stored: 0xDEADBEEF,
            computed: 0x0BADF00D,
        };
        let message = error.to_string();
        assert!(message.contains("12.chunk"));
        assert!(message.contains("0xdeadbeef"));
    }

    #[test]
    fn test_error_display_buffer_full() {
        assert!(ChunkError::BufferFull { capacity: 1000 }
            .to_string()
            .contains("1000"));
    }
}
