// SPDX-License-Identifier: PMPL-1.0-or-later
//
// TrailStore event - Record type
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

use serde::{Deserialize, Serialize};

/// A single immutable record in the log.
///
/// Within one log, ids are strictly increasing in append order and never
/// reused. `metadata` is the only nullable column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Event {
    /// Globally increasing id, usually minted by a [`crate::Sequencer`].
    pub id: u64,

    /// Caller-defined key bytes.
    pub key: Vec<u8>,

    /// Optional opaque metadata.
    pub metadata: Option<Vec<u8>>,

    /// Opaque payload bytes.
    pub data: Vec<u8>,
}

impl Event {
    pub fn new(id: u64, key: Vec<u8>, metadata: Option<Vec<u8>>, data: Vec<u8>) -> Self {
        Self {
            id,
            key,
            metadata,
            data,
        }
    }

    /// Number of payload bytes carried by the event (key + metadata + data).
    pub fn payload_len(&self) -> usize {
        self.key.len() + self.metadata.as_ref().map_or(0, Vec::len) + self.data.len()
    }
}
