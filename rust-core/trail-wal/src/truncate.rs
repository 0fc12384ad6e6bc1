// SPDX-License-Identifier: PMPL-1.0-or-later
//
// TrailStore Write-Ahead Log - Truncation
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Removes events below a boundary from sealed segments. A segment that still
// holds events at or above the boundary is rewritten to a temporary file and
// renamed over the original under the same name; one left with nothing is
// deleted. Each segment is handled on its own: a failure is logged and that
// segment stays as it was.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info};
use trail_event::codec;
use uuid::Uuid;

use crate::error::WalResult;
use crate::reader::SegmentReader;
use crate::segment::{SegmentInfo, SegmentRegistry};

/// Outcome of one truncation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TruncateReport {
    /// Segments rewritten with fewer events.
    pub rewritten: usize,
    /// Segments deleted outright.
    pub deleted: usize,
    /// Segments left untouched because they could not be processed.
    pub skipped: usize,
    /// Events dropped from segments that had to be read. Segments deleted
    /// on their name alone are not opened and not counted here.
    pub events_removed: u64,
}

/// Handle that truncates sealed segments. Cheap to clone and safe to use
/// from another thread than the writer.
#[derive(Debug, Clone)]
pub struct WalTruncator {
    registry: Arc<SegmentRegistry>,
}

enum SegmentAction {
    Keep,
    Delete { removed: u64 },
    Rewrite { kept: Vec<u8>, removed: u64 },
}

impl WalTruncator {
    pub(crate) fn new(registry: Arc<SegmentRegistry>) -> Self {
        Self { registry }
    }

    /// Drop every event with `id < upto` from the sealed segments.
    ///
    /// The active segment is never touched. Any open [`crate::WalScanner`]
    /// restarts on its next call.
    pub fn truncate_sealed(&self, upto: u64) -> TruncateReport {
        let _guard = self.registry.lock_rewrites();
        let sealed = self.registry.sealed();
        let active_first = self.registry.active_first_id();
        let mut report = TruncateReport::default();

        for (index, segment) in sealed.iter().enumerate() {
            if segment.first_id >= upto {
                break;
            }
            let next_first = sealed
                .get(index + 1)
                .map(|next| next.first_id)
                .or(active_first);

            let action = if next_first.is_some_and(|next| next <= upto) {
                // Every id here is below the next segment's name.
                SegmentAction::Delete { removed: 0 }
            } else {
                match plan_rewrite(&segment.path, upto) {
                    Ok(action) => action,
                    Err(err) => {
                        error!(
                            segment = %segment.path.display(),
                            error = %err,
                            "Skipping WAL segment during truncation"
                        );
                        report.skipped += 1;
                        continue;
                    }
                }
            };

            if let Err(err) = self.apply(segment, action, &mut report) {
                error!(
                    segment = %segment.path.display(),
                    error = %err,
                    "Skipping WAL segment during truncation"
                );
                report.skipped += 1;
            }
        }

        self.registry.bump_generation();

        info!(
            upto,
            rewritten = report.rewritten,
            deleted = report.deleted,
            skipped = report.skipped,
            "Truncated WAL"
        );
        report
    }

    fn apply(
        &self,
        segment: &SegmentInfo,
        action: SegmentAction,
        report: &mut TruncateReport,
    ) -> WalResult<()> {
        match action {
            SegmentAction::Keep => {}
            SegmentAction::Delete { removed } => {
                fs::remove_file(&segment.path)?;
                self.registry.remove_sealed(segment.first_id);
                report.deleted += 1;
                report.events_removed += removed;
                debug!(segment = %segment.path.display(), "Deleted WAL segment");
            }
            SegmentAction::Rewrite { kept, removed } => {
                replace_contents(self.registry.wal_dir(), &segment.path, &kept)?;
                self.registry
                    .update_sealed_size(segment.first_id, kept.len() as u64);
                report.rewritten += 1;
                report.events_removed += removed;
                debug!(
                    segment = %segment.path.display(),
                    removed,
                    "Rewrote WAL segment"
                );
            }
        }
        Ok(())
    }
}

/// Decide what to do with one segment. Damaged records make the segment
/// unsafe to rewrite, so they surface as an error.
fn plan_rewrite(path: &Path, upto: u64) -> WalResult<SegmentAction> {
    let mut kept = Vec::new();
    let mut kept_count = 0u64;
    let mut removed = 0u64;

    for item in SegmentReader::open(path)? {
        let event = item?;
        if event.id < upto {
            removed += 1;
        } else {
            codec::encode_into(&event, &mut kept);
            kept_count += 1;
        }
    }

    Ok(match (kept_count, removed) {
        (0, _) => SegmentAction::Delete { removed },
        (_, 0) => SegmentAction::Keep,
        _ => SegmentAction::Rewrite { kept, removed },
    })
}

/// Write `contents` beside `target` and rename it into place.
fn replace_contents(wal_dir: &Path, target: &Path, contents: &[u8]) -> WalResult<()> {
    let temp: PathBuf = wal_dir.join(format!(".{}.wal.tmp", Uuid::new_v4()));
    let result = (|| -> WalResult<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp)?;
        file.write_all(contents)?;
        file.sync_all()?;
        fs::rename(&temp, target)?;
        Ok(())
    })();
    if result.is_err() {
        let _ = fs::remove_file(&temp);
    }
    result
}
