// SPDX-License-Identifier: PMPL-1.0-or-later
//
// TrailStore engine - Startup recovery
//
// The newest chunk file marks what is already durable in columnar form.
// Every WAL event past it is put back into the live buffer, through the
// normal swap check, so a long replay produces chunk files as it goes.

use serde::Serialize;
use tracing::{error, info};
use trail_wal::WalError;

use crate::engine::{StorageEngine, WriteSide};
use crate::error::EngineResult;

/// What recovery found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Newest id held by a chunk file at open (0 if none).
    pub boundary: u64,
    /// WAL events put back into memory.
    pub replayed: u64,
    /// WAL records that failed their integrity check and were left out.
    pub damaged: u64,
    /// Id of the last replayed event.
    pub last_replayed: Option<u64>,
}

pub(crate) fn replay(
    engine: &StorageEngine,
    side: &mut WriteSide,
    boundary: u64,
) -> EngineResult<RecoveryReport> {
    let mut report = RecoveryReport {
        boundary,
        ..RecoveryReport::default()
    };

    let snapshot = side.wal.snapshot(boundary.saturating_add(1), u64::MAX, false);
    for record in snapshot {
        match record {
            Ok(event) => {
                let id = event.id;
                engine.catalog().live().append(event)?;
                report.replayed += 1;
                report.last_replayed = Some(id);
                side.last_id = Some(id);
                engine.check_swap(side);
            }
            Err(WalError::Integrity { segment, offset, source }) => {
                report.damaged += 1;
                error!(
                    segment = %segment,
                    offset,
                    error = %source,
                    "Damaged WAL record left out of recovery"
                );
            }
            Err(err) => return Err(err.into()),
        }
    }

    info!(
        boundary,
        replayed = report.replayed,
        damaged = report.damaged,
        "Recovered WAL events"
    );
    Ok(report)
}
