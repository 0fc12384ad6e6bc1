// SPDX-License-Identifier: PMPL-1.0-or-later
//
// TrailStore event - Id sequencer
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Ids are `[epoch: u32][counter: u32]` where the epoch is the wall clock in
// whole seconds (rounded). A sequencer never hands out a value twice and
// never goes backwards, whatever the clock does.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, TimeZone, Utc};

/// Lock-free generator of strictly increasing 64-bit ids.
#[derive(Debug)]
pub struct Sequencer {
    latest: AtomicU64,
}

impl Sequencer {
    /// Create a sequencer positioned at the current epoch.
    pub fn new() -> Self {
        Self {
            latest: AtomicU64::new(compose(epoch(now_millis()), 1)),
        }
    }

    /// Create a sequencer whose first id is greater than `last_id`.
    ///
    /// Used after recovery so freshly minted ids sort after everything
    /// already stored, even if the clock has moved backwards since.
    pub fn starting_after(last_id: u64) -> Self {
        let clock = compose(epoch(now_millis()), 1);
        Self {
            latest: AtomicU64::new(clock.max(last_id.saturating_add(1))),
        }
    }

    /// Mint an id for the given wall-clock time (Unix milliseconds).
    ///
    /// If the stored epoch is current or ahead of `timestamp_millis`, the
    /// counter advances; if the timestamp opens a newer epoch the counter
    /// restarts at 1 under it. Returns the state that was replaced, so no
    /// two callers ever receive the same value.
    pub fn tick(&self, timestamp_millis: i64) -> u64 {
        let requested_epoch = epoch(timestamp_millis);
        let mut current = self.latest.load(Ordering::Acquire);
        loop {
            let next = if requested_epoch > epoch_part(current) {
                compose(requested_epoch, 1)
            } else {
                current.saturating_add(1)
            };
            match self.latest.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(previous) => return previous,
                Err(observed) => current = observed,
            }
        }
    }

    /// Mint an id using the current wall clock.
    pub fn tick_now(&self) -> u64 {
        self.tick(now_millis())
    }

    /// The boundary id for a timestamp: its epoch with a zero counter.
    ///
    /// Pure; never assigned to an event, since minted ids always carry a
    /// counter of at least 1.
    pub fn fixed_tick(timestamp_millis: i64) -> u64 {
        compose(epoch(timestamp_millis), 0)
    }

    /// Boundary id for a `chrono` timestamp.
    pub fn fixed_tick_at(time: DateTime<Utc>) -> u64 {
        Self::fixed_tick(time.timestamp_millis())
    }

    /// The coarse (one second) wall-clock time encoded in an id.
    pub fn timestamp_of(id: u64) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(epoch_part(id) as i64, 0).single()
    }

    /// The value the next `tick` within the same epoch would return.
    pub fn peek(&self) -> u64 {
        self.latest.load(Ordering::Acquire)
    }
}

impl Default for Sequencer {
    fn default() -> Self {
        Self::new()
    }
}

/// The epoch (high 32 bits) of an id.
pub fn epoch_part(id: u64) -> u32 {
    (id >> 32) as u32
}

/// The per-epoch counter (low 32 bits) of an id.
pub fn counter_part(id: u64) -> u32 {
    id as u32
}

fn compose(epoch: u32, counter: u32) -> u64 {
    ((epoch as u64) << 32) | counter as u64
}

fn epoch(timestamp_millis: i64) -> u32 {
    let seconds = (timestamp_millis.max(0) as f64 / 1000.0).round();
    seconds.min(u32::MAX as f64) as u32
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
