// SPDX-License-Identifier: PMPL-1.0-or-later
//
// TrailStore event - Binary framing
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Encodes a single event to the length-prefixed, checksummed frame described
// in the crate documentation, and decodes it back. The checksum is CRC32
// (IEEE) over the field bytes followed by a fixed sentinel standing in for
// the checksum slot, so encoder and decoder hash byte-identical input.

use crc32fast::Hasher as Crc32Hasher;

use crate::error::{IntegrityError, IntegrityResult};
use crate::event::Event;

/// Maximum accepted body length: 64 MiB. Larger declared lengths are
/// treated as a corrupted header.
pub const MAX_FRAME_SIZE: u32 = 64 * 1024 * 1024;

/// Size of the `total_length` prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Smallest possible body: id + three length fields + checksum.
pub const MIN_BODY_SIZE: usize = 8 + 4 + 4 + 4 + 4;

/// Length value written in place of `metadata_len` for null metadata.
pub const NULL_METADATA_LEN: u32 = u32::MAX;

/// Value hashed in place of the checksum field.
pub const CHECKSUM_SENTINEL: u32 = 0xFFFF_FFFF;

const CHECKSUM_SIZE: usize = 4;

/// Result of trying to decode one frame from the front of a byte buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// A whole frame was present and passed its integrity check.
    Complete {
        /// The decoded event.
        event: Event,
        /// Bytes consumed, including the length prefix.
        consumed: usize,
    },

    /// A whole frame was present but failed to decode. The caller can skip
    /// `consumed` bytes to reach the next frame boundary.
    Corrupt {
        /// Why the frame was rejected.
        error: IntegrityError,
        /// Bytes occupied by the rejected frame, including the prefix.
        consumed: usize,
    },

    /// The buffer ends before the frame does (for example a record torn by
    /// a crash mid-write).
    Incomplete {
        /// Total bytes the frame requires, when the prefix was readable.
        needed: Option<usize>,
    },
}

/// Length of the body (everything after the length prefix) for `event`.
pub fn body_len(event: &Event) -> usize {
    MIN_BODY_SIZE + event.payload_len()
}

/// Length of the full encoded frame for `event`.
pub fn frame_len(event: &Event) -> usize {
    LENGTH_PREFIX_SIZE + body_len(event)
}

/// Encode `event` to a standalone frame.
pub fn encode(event: &Event) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(frame_len(event));
    encode_into(event, &mut buffer);
    buffer
}

/// Append the frame for `event` to `buffer`.
pub fn encode_into(event: &Event, buffer: &mut Vec<u8>) {
    let start = buffer.len();
    buffer.reserve(frame_len(event));
    buffer.extend_from_slice(&(body_len(event) as u32).to_be_bytes());

    let fields_start = buffer.len();
    buffer.extend_from_slice(&event.id.to_be_bytes());
    put_bytes(buffer, &event.key);
    match &event.metadata {
        Some(metadata) => put_bytes(buffer, metadata),
        None => buffer.extend_from_slice(&NULL_METADATA_LEN.to_be_bytes()),
    }
    put_bytes(buffer, &event.data);

    let checksum = compute_checksum(&buffer[fields_start..]);
    buffer.extend_from_slice(&checksum.to_be_bytes());

    debug_assert_eq!(buffer.len() - start, frame_len(event));
}

/// Decode a complete frame, length prefix included.
///
/// The slice must hold exactly one frame; any disagreement between the
/// declared length and the slice length is an integrity error.
pub fn decode(bytes: &[u8]) -> IntegrityResult<Event> {
    if bytes.len() < LENGTH_PREFIX_SIZE {
        return Err(IntegrityError::LengthMismatch {
            declared: 0,
            actual: bytes.len() as u64,
        });
    }
    let declared = read_u32(&bytes[..LENGTH_PREFIX_SIZE]);
    if declared > MAX_FRAME_SIZE {
        return Err(IntegrityError::FrameTooLarge {
            length: declared,
            max: MAX_FRAME_SIZE,
        });
    }
    let body = &bytes[LENGTH_PREFIX_SIZE..];
    if declared as usize != body.len() {
        return Err(IntegrityError::LengthMismatch {
            declared: declared as u64,
            actual: body.len() as u64,
        });
    }
    decode_body(body)
}

/// Decode a frame body: the bytes after the length prefix, ending with the
/// checksum.
pub fn decode_body(body: &[u8]) -> IntegrityResult<Event> {
    if body.len() < MIN_BODY_SIZE {
        return Err(IntegrityError::Malformed {
            reason: format!("body of {} bytes is shorter than {MIN_BODY_SIZE}", body.len()),
        });
    }

    let (fields, trailer) = body.split_at(body.len() - CHECKSUM_SIZE);
    let mut cursor = FieldCursor::new(fields);

    let id = cursor.u64()?;
    let key_len = cursor.u32()?;
    let key = cursor.take(key_len as usize)?.to_vec();
    let metadata_len = cursor.u32()?;
    let metadata = if metadata_len == NULL_METADATA_LEN {
        None
    } else {
        Some(cursor.take(metadata_len as usize)?.to_vec())
    };
    let data_len = cursor.u32()?;
    let data = cursor.take(data_len as usize)?.to_vec();

    if cursor.remaining() != 0 {
        return Err(IntegrityError::Malformed {
            reason: format!("{} unexpected bytes before checksum", cursor.remaining()),
        });
    }

    let stored = read_u32(trailer);
    let computed = compute_checksum(fields);
    if stored != computed {
        return Err(IntegrityError::ChecksumMismatch {
            id,
            stored,
            computed,
        });
    }

    Ok(Event {
        id,
        key,
        metadata,
        data,
    })
}

/// Try to decode the first frame in `buffer`.
///
/// Returns `Err` only when the length prefix itself is unusable, in which
/// case no later frame boundary can be located.
pub fn decode_frame(buffer: &[u8]) -> IntegrityResult<FrameOutcome> {
    if buffer.len() < LENGTH_PREFIX_SIZE {
        return Ok(FrameOutcome::Incomplete { needed: None });
    }
    let declared = read_u32(&buffer[..LENGTH_PREFIX_SIZE]);
    if declared > MAX_FRAME_SIZE {
        return Err(IntegrityError::FrameTooLarge {
            length: declared,
            max: MAX_FRAME_SIZE,
        });
    }

    let consumed = LENGTH_PREFIX_SIZE + declared as usize;
    if buffer.len() < consumed {
        return Ok(FrameOutcome::Incomplete {
            needed: Some(consumed),
        });
    }

    let outcome = match decode_body(&buffer[LENGTH_PREFIX_SIZE..consumed]) {
        Ok(event) => FrameOutcome::Complete { event, consumed },
        Err(error) => FrameOutcome::Corrupt { error, consumed },
    };
    Ok(outcome)
}

/// Read the declared body length from a 4-byte prefix.
pub fn read_length_prefix(prefix: [u8; LENGTH_PREFIX_SIZE]) -> u32 {
    u32::from_be_bytes(prefix)
}

/// Compute the frame checksum over the field bytes (`id` through `data`).
pub fn compute_checksum(fields: &[u8]) -> u32 {
    let mut hasher = Crc32Hasher::new();
    hasher.update(fields);
    hasher.update(&CHECKSUM_SENTINEL.to_be_bytes());
    hasher.finalize()
}

fn put_bytes(buffer: &mut Vec<u8>, bytes: &[u8]) {
    buffer.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    buffer.extend_from_slice(bytes);
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[..4]);
    u32::from_be_bytes(raw)
}

/// Bounds-checked reader over the field section of a body.
struct FieldCursor<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> FieldCursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    fn take(&mut self, len: usize) -> IntegrityResult<&'a [u8]> {
        if self.remaining() < len {
            return Err(IntegrityError::Malformed {
                reason: format!(
                    "field of {len} bytes at offset {} overruns {}-byte body",
                    self.offset,
                    self.bytes.len()
                ),
            });
        }
        let slice = &self.bytes[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    fn u32(&mut self) -> IntegrityResult<u32> {
        self.take(4).map(read_u32)
    }

    fn u64(&mut self) -> IntegrityResult<u64> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(u64::from_be_bytes(raw))
    }
}
