// SPDX-License-Identifier: PMPL-1.0-or-later
//
// TrailStore event - Error types
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Every way a frame can fail to decode is an integrity failure of that
// single record.

use thiserror::Error;

/// Errors raised while decoding an event frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrityError {
    /// The stored checksum does not match the one recomputed from the
    /// decoded fields.
    #[error("checksum mismatch for event {id}: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        /// The id read from the (possibly corrupted) frame.
        id: u64,
        /// The checksum stored in the frame trailer.
        stored: u32,
        /// The checksum recomputed from the frame content.
        computed: u32,
    },

    /// The frame's `total_length` does not match the bytes supplied.
    #[error("frame declares {declared} bytes but {actual} are present")]
    LengthMismatch {
        /// Length from the frame header.
        declared: u64,
        /// Length actually available to the decoder.
        actual: u64,
    },

    /// The field lengths inside the frame are inconsistent with its size.
    #[error("malformed frame: {reason}")]
    Malformed {
        /// What was inconsistent.
        reason: String,
    },

    /// The frame header declares a length above the accepted maximum,
    /// which only happens when the header itself is corrupted.
    #[error("frame declares length {length} bytes, exceeding maximum {max}")]
    FrameTooLarge {
        /// The declared length.
        length: u32,
        /// The maximum accepted length.
        max: u32,
    },
}

/// Convenience alias for codec results.
pub type IntegrityResult<T> = Result<T, IntegrityError>;
