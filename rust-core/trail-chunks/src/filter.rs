// SPDX-License-Identifier: PMPL-1.0-or-later
//
// TrailStore chunks - Predicate reads
//
// Filtered scans over the catalog and id indexes built from them. An index
// is an exact set of ids, so it can be stored, combined with the usual set
// operators, and replayed later with `read_ids`.

use std::ops::RangeBounds;
use std::sync::Arc;

use roaring::RoaringTreemap;
use trail_event::Event;

use crate::catalog::ChunkCatalog;

impl ChunkCatalog {
    /// Every event for which `predicate` holds.
    pub fn read_filtered<P>(self: &Arc<Self>, mut predicate: P) -> impl Iterator<Item = Event>
    where
        P: FnMut(&Event) -> bool,
    {
        self.read_all().filter(move |event| predicate(event))
    }

    /// Ids of every event for which `predicate` holds.
    pub fn event_index<P>(self: &Arc<Self>, predicate: P) -> RoaringTreemap
    where
        P: FnMut(&Event) -> bool,
    {
        self.read_filtered(predicate).map(|event| event.id).collect()
    }

    /// Every event whose id is in `index`.
    pub fn read_ids(self: &Arc<Self>, index: &RoaringTreemap) -> impl Iterator<Item = Event> {
        let index = index.clone();
        let mut remaining = index.len();
        let mut events = self.read_all();
        std::iter::from_fn(move || {
            while remaining > 0 {
                let event = events.next()?;
                if index.contains(event.id) {
                    remaining -= 1;
                    return Some(event);
                }
            }
            None
        })
    }
}

/// Ready-made predicates.
pub mod predicates {
    use super::*;

    /// Events whose key equals `key`.
    pub fn key_is(key: impl Into<Vec<u8>>) -> impl FnMut(&Event) -> bool {
        let key = key.into();
        move |event| event.key == key
    }

    /// Events whose key starts with `prefix`.
    pub fn key_starts_with(prefix: impl Into<Vec<u8>>) -> impl FnMut(&Event) -> bool {
        let prefix = prefix.into();
        move |event| event.key.starts_with(&prefix)
    }

    /// Events whose id falls in `range`.
    pub fn id_in<R: RangeBounds<u64>>(range: R) -> impl FnMut(&Event) -> bool {
        move |event| range.contains(&event.id)
    }

    /// Events carrying metadata (possibly empty).
    pub fn has_metadata() -> impl FnMut(&Event) -> bool {
        |event| event.metadata.is_some()
    }
}
