// SPDX-License-Identifier: PMPL-1.0-or-later
//
// TrailStore Write-Ahead Log - Reader
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Lazy readers over WAL segments. Three layers:
//
// * `SegmentReader` walks the frames of one file. A record cut short by a
//   crash is end-of-stream, not an error; the reader steps back to the start
//   of that record so a later call picks it up once it is complete.
// * `WalSnapshot` walks a fixed list of segments for an id range.
// * `WalScanner` walks whatever the registry holds, following new segments
//   as they appear and restarting when a truncation rewrites the files.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};
use trail_event::codec::{self, LENGTH_PREFIX_SIZE, MAX_FRAME_SIZE};
use trail_event::{Event, IntegrityError};

use crate::error::{WalError, WalResult};
use crate::segment::SegmentRegistry;

// ---------------------------------------------------------------------------
// Single segment
// ---------------------------------------------------------------------------

/// Frame-by-frame reader over one segment file.
#[derive(Debug)]
pub struct SegmentReader {
    path: PathBuf,
    reader: BufReader<File>,
    offset: u64,
    finished: bool,
}

impl SegmentReader {
    /// Open a segment for reading from its first frame.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        Ok(Self {
            path,
            reader: BufReader::new(file),
            offset: 0,
            finished: false,
        })
    }

    /// Path of the file being read.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every remaining record into memory.
    pub fn read_remaining(&mut self) -> Vec<WalResult<Event>> {
        self.by_ref().collect()
    }

    fn segment_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn integrity_error(&self, offset: u64, source: IntegrityError) -> WalError {
        WalError::Integrity {
            segment: self.segment_name(),
            offset,
            source,
        }
    }

    /// Step back to `start` so an incomplete record is re-read next time.
    fn rewind(&mut self, start: u64) -> Option<WalResult<Event>> {
        debug!(
            segment = %self.path.display(),
            offset = start,
            "WAL segment ends in an incomplete record; treating as end of stream"
        );
        self.offset = start;
        match self.reader.seek(SeekFrom::Start(start)) {
            Ok(_) => None,
            Err(err) => {
                self.finished = true;
                Some(Err(err.into()))
            }
        }
    }

    fn next_record(&mut self) -> Option<WalResult<Event>> {
        if self.finished {
            return None;
        }
        let start = self.offset;

        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        let read = match read_up_to(&mut self.reader, &mut prefix) {
            Ok(read) => read,
            Err(err) => {
                self.finished = true;
                return Some(Err(err.into()));
            }
        };
        if read == 0 {
            return None;
        }
        if read < LENGTH_PREFIX_SIZE {
            return self.rewind(start);
        }

        let declared = codec::read_length_prefix(prefix);
        if declared == 0 {
            // Space the file system allocated but never filled.
            return self.rewind(start);
        }
        if declared > MAX_FRAME_SIZE {
            warn!(
                segment = %self.path.display(),
                offset = start,
                declared,
                "WAL record length is out of range; abandoning the rest of the segment"
            );
            self.finished = true;
            let source = IntegrityError::FrameTooLarge {
                length: declared,
                max: MAX_FRAME_SIZE,
            };
            return Some(Err(self.integrity_error(start, source)));
        }

        let mut body = vec![0u8; declared as usize];
        let read = match read_up_to(&mut self.reader, &mut body) {
            Ok(read) => read,
            Err(err) => {
                self.finished = true;
                return Some(Err(err.into()));
            }
        };
        if read < body.len() {
            return self.rewind(start);
        }
        self.offset = start + (LENGTH_PREFIX_SIZE + body.len()) as u64;

        match codec::decode_body(&body) {
            Ok(event) => Some(Ok(event)),
            Err(source) => {
                warn!(
                    segment = %self.path.display(),
                    offset = start,
                    error = %source,
                    "Damaged WAL record"
                );
                Some(Err(self.integrity_error(start, source)))
            }
        }
    }
}

impl Iterator for SegmentReader {
    type Item = WalResult<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record()
    }
}

/// Fill `buf` as far as the reader allows. Returns the bytes read, which is
/// less than `buf.len()` only at end of file.
fn read_up_to(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

/// Open a segment, treating "already deleted" as empty.
fn open_segment(path: &Path) -> Option<WalResult<SegmentReader>> {
    match SegmentReader::open(path) {
        Ok(reader) => Some(Ok(reader)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!(segment = %path.display(), "WAL segment removed before it could be read");
            None
        }
        Err(err) => Some(Err(err.into())),
    }
}

// ---------------------------------------------------------------------------
// Range snapshot
// ---------------------------------------------------------------------------

enum Cursor {
    Forward(SegmentReader),
    Backward(std::iter::Rev<std::vec::IntoIter<WalResult<Event>>>),
}

/// Lazy iterator over the events with `from <= id < to`.
///
/// Damaged records and unreadable segments come through as `Err` items; the
/// iterator carries on with the next record or segment.
pub struct WalSnapshot {
    segments: VecDeque<PathBuf>,
    from: u64,
    to: u64,
    reverse: bool,
    current: Option<Cursor>,
    done: bool,
}

impl WalSnapshot {
    /// Build a snapshot over `segments`, given as `(first_id, path)` in
    /// ascending id order.
    pub fn new(segments: Vec<(u64, PathBuf)>, from: u64, to: u64, reverse: bool) -> Self {
        let mut selected = VecDeque::new();
        for (index, (first_id, path)) in segments.iter().enumerate() {
            if *first_id >= to {
                break;
            }
            // Everything in this segment sorts below the next one's name.
            let below_range = segments
                .get(index + 1)
                .is_some_and(|(next_first, _)| *next_first <= from);
            if !below_range {
                selected.push_back(path.clone());
            }
        }
        if reverse {
            selected = selected.into_iter().rev().collect();
        }
        Self {
            segments: selected,
            from,
            to,
            reverse,
            current: None,
            done: from >= to,
        }
    }

    fn open_next(&mut self) -> Option<WalResult<()>> {
        let path = self.segments.pop_front()?;
        match open_segment(&path) {
            None => Some(Ok(())),
            Some(Err(err)) => Some(Err(err)),
            Some(Ok(mut reader)) => {
                self.current = Some(if self.reverse {
                    Cursor::Backward(reader.read_remaining().into_iter().rev())
                } else {
                    Cursor::Forward(reader)
                });
                Some(Ok(()))
            }
        }
    }
}

impl Iterator for WalSnapshot {
    type Item = WalResult<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let item = match self.current.as_mut() {
                Some(Cursor::Forward(reader)) => reader.next(),
                Some(Cursor::Backward(events)) => events.next(),
                None => match self.open_next() {
                    None => {
                        self.done = true;
                        return None;
                    }
                    Some(Ok(())) => continue,
                    Some(Err(err)) => return Some(Err(err)),
                },
            };

            match item {
                None => self.current = None,
                Some(Err(err)) => return Some(Err(err)),
                Some(Ok(event)) if event.id >= self.to => {
                    if !self.reverse {
                        // Ids only grow from here on.
                        self.done = true;
                    }
                }
                Some(Ok(event)) if event.id < self.from => {}
                Some(Ok(event)) => return Some(Ok(event)),
            }
        }
        None
    }
}

// ---------------------------------------------------------------------------
// Live scan cursor
// ---------------------------------------------------------------------------

/// Cursor over the whole log that keeps up with appends.
///
/// Returning `None` means "nothing more right now": calling `next` again
/// after more appends yields the new events. When a truncation rewrites the
/// segment files, the cursor starts over from the oldest remaining segment.
pub struct WalScanner {
    registry: Arc<SegmentRegistry>,
    generation: u64,
    current_first: Option<u64>,
    reader: Option<SegmentReader>,
}

impl WalScanner {
    pub(crate) fn new(registry: Arc<SegmentRegistry>) -> Self {
        let generation = registry.generation();
        Self {
            registry,
            generation,
            current_first: None,
            reader: None,
        }
    }

    /// Start again from the oldest segment.
    pub fn reset(&mut self) {
        self.generation = self.registry.generation();
        self.current_first = None;
        self.reader = None;
    }
}

impl Iterator for WalScanner {
    type Item = WalResult<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.registry.generation() != self.generation {
                debug!("WAL files were rewritten; restarting scan");
                self.reset();
            }

            if let Some(reader) = self.reader.as_mut() {
                if let Some(item) = reader.next() {
                    return Some(item);
                }
            }

            let listing = self.registry.listing();
            let (first_id, path) = listing.next_after(self.current_first)?.clone();
            self.current_first = Some(first_id);
            self.reader = None;
            match open_segment(&path) {
                None => continue,
                Some(Ok(reader)) => self.reader = Some(reader),
                Some(Err(err)) => return Some(Err(err)),
            }
        }
    }
}
