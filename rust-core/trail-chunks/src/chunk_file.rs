// SPDX-License-Identifier: PMPL-1.0-or-later
//
// TrailStore chunks - Immutable chunk files
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// A chunk file holds one sealed buffer as a single four-column batch:
//
// ```text
// [4 bytes:  magic "TRCH"]
// [2 bytes:  format version (u16)]
// [2 bytes:  reserved, zero]
// [8 bytes:  row count (u64)]
// [8 bytes:  first id (u64)]
// [8 bytes:  last id (u64)]
// [8 bytes:  body length (u64)]
// [4 bytes:  CRC32 of body]
// [N bytes:  postcard-encoded ColumnBatch]
// ```
//
// All header integers are big-endian. Files are written to a temporary name
// and hard-linked into place, so a finished file never changes and an
// existing file is never overwritten.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use trail_event::Event;
use uuid::Uuid;

use crate::error::{ChunkError, ChunkResult};

/// Chunk file extension.
pub const CHUNK_EXTENSION: &str = "chunk";

/// Leading bytes of every chunk file.
pub const CHUNK_MAGIC: [u8; 4] = *b"TRCH";

/// Current format version.
pub const CHUNK_VERSION: u16 = 1;

/// Size of the fixed header.
pub const HEADER_SIZE: usize = 4 + 2 + 2 + 8 + 8 + 8 + 8 + 4;

/// Cheap metadata for a chunk source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkInfo {
    /// Number of events.
    pub rows: u64,
    /// Smallest id held.
    pub first_id: u64,
    /// Largest id held.
    pub last_id: u64,
}

/// The four logical columns of a chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnBatch {
    /// `id: int64 not null`
    pub ids: Vec<u64>,
    /// `key: binary not null`
    pub keys: Vec<Vec<u8>>,
    /// `metadata: binary nullable`
    pub metadata: Vec<Option<Vec<u8>>>,
    /// `data: binary not null`
    pub data: Vec<Vec<u8>>,
}

impl ColumnBatch {
    /// Build a batch from events in order.
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a Event>) -> Self {
        let mut batch = ColumnBatch::default();
        for event in events {
            batch.ids.push(event.id);
            batch.keys.push(event.key.clone());
            batch.metadata.push(event.metadata.clone());
            batch.data.push(event.data.clone());
        }
        batch
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// `true` if the batch has no rows.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Materialize one row.
    pub fn event(&self, row: usize) -> Option<Event> {
        Some(Event {
            id: *self.ids.get(row)?,
            key: self.keys.get(row)?.clone(),
            metadata: self.metadata.get(row)?.clone(),
            data: self.data.get(row)?.clone(),
        })
    }

    fn is_consistent(&self) -> bool {
        let rows = self.ids.len();
        self.keys.len() == rows && self.metadata.len() == rows && self.data.len() == rows
    }
}

// ---------------------------------------------------------------------------
// Naming
// ---------------------------------------------------------------------------

/// File name for a chunk whose first event has `first_id`.
pub fn chunk_filename(first_id: u64) -> String {
    format!("{first_id}.{CHUNK_EXTENSION}")
}

/// Full path of a chunk file in `chunk_dir`.
pub fn chunk_path(chunk_dir: &Path, first_id: u64) -> PathBuf {
    chunk_dir.join(chunk_filename(first_id))
}

/// Parse the id from a chunk file name.
pub fn parse_chunk_filename(name: &str) -> Option<u64> {
    let digits = name.strip_suffix(&format!(".{CHUNK_EXTENSION}"))?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Id of a chunk file path, if it is one.
pub fn chunk_id_of(path: &Path) -> Option<u64> {
    parse_chunk_filename(&path.file_name()?.to_string_lossy())
}

/// All chunk files in `chunk_dir`, sorted by id.
pub fn list_chunks(chunk_dir: &Path) -> ChunkResult<Vec<(u64, PathBuf)>> {
    let mut chunks = Vec::new();
    for dir_entry in fs::read_dir(chunk_dir)? {
        let dir_entry = dir_entry?;
        let Some(id) = parse_chunk_filename(&dir_entry.file_name().to_string_lossy()) else {
            continue;
        };
        if dir_entry.file_type()?.is_file() {
            chunks.push((id, dir_entry.path()));
        }
    }
    chunks.sort();
    debug!(count = chunks.len(), dir = %chunk_dir.display(), "Discovered chunk files");
    Ok(chunks)
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Write `events` as a new chunk file at `path`.
///
/// Fails with [`ChunkError::AlreadyExists`] if `path` exists; nothing is
/// left behind on any failure.
pub fn write_chunk_file<'a>(
    path: &Path,
    events: impl IntoIterator<Item = &'a Event>,
) -> ChunkResult<ChunkInfo> {
    let batch = ColumnBatch::from_events(events);
    let (Some(&first_id), Some(&last_id)) = (batch.ids.first(), batch.ids.last()) else {
        return Err(ChunkError::EmptyBuffer);
    };
    let info = ChunkInfo {
        rows: batch.len() as u64,
        first_id: batch.ids.iter().copied().min().unwrap_or(first_id),
        last_id: batch.ids.iter().copied().max().unwrap_or(last_id),
    };

    let body = postcard::to_allocvec(&batch)?;
    let mut bytes = Vec::with_capacity(HEADER_SIZE + body.len());
    encode_header(&info, &body, &mut bytes);
    bytes.extend_from_slice(&body);

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let temp = dir.join(format!(".{}.{CHUNK_EXTENSION}.tmp", Uuid::new_v4()));
    let result = write_and_link(&temp, path, &bytes);
    if let Err(err) = fs::remove_file(&temp) {
        if err.kind() != io::ErrorKind::NotFound {
            warn!(path = %temp.display(), error = %err, "Could not remove temporary chunk file");
        }
    }
    result?;
    sync_dir(dir);

    debug!(path = %path.display(), rows = info.rows, "Wrote chunk file");
    Ok(info)
}

fn write_and_link(temp: &Path, target: &Path, bytes: &[u8]) -> ChunkResult<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(temp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);
    match fs::hard_link(temp, target) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Err(ChunkError::AlreadyExists {
            path: target.to_path_buf(),
        }),
        Err(err) => Err(err.into()),
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Err(err) = File::open(dir).and_then(|handle| handle.sync_all()) {
        warn!(dir = %dir.display(), error = %err, "Could not sync chunk directory");
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

fn encode_header(info: &ChunkInfo, body: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(&CHUNK_MAGIC);
    out.extend_from_slice(&CHUNK_VERSION.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&info.rows.to_be_bytes());
    out.extend_from_slice(&info.first_id.to_be_bytes());
    out.extend_from_slice(&info.last_id.to_be_bytes());
    out.extend_from_slice(&(body.len() as u64).to_be_bytes());
    out.extend_from_slice(&crc32fast::hash(body).to_be_bytes());
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

struct Header {
    info: ChunkInfo,
    body_len: u64,
    body_crc: u32,
}

fn decode_header(path: &Path, bytes: &[u8; HEADER_SIZE]) -> ChunkResult<Header> {
    let u16_at = |at: usize| u16::from_be_bytes([bytes[at], bytes[at + 1]]);
    let u32_at = |at: usize| {
        u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
    };
    let u64_at = |at: usize| {
        let mut word = [0u8; 8];
        word.copy_from_slice(&bytes[at..at + 8]);
        u64::from_be_bytes(word)
    };

    if bytes[..4] != CHUNK_MAGIC {
        return Err(ChunkError::BadMagic {
            path: path.to_path_buf(),
        });
    }
    let version = u16_at(4);
    if version != CHUNK_VERSION {
        return Err(ChunkError::UnsupportedVersion {
            path: path.to_path_buf(),
            version,
        });
    }
    let info = ChunkInfo {
        rows: u64_at(8),
        first_id: u64_at(16),
        last_id: u64_at(24),
    };
    if info.rows == 0 || info.first_id > info.last_id {
        return Err(ChunkError::Integrity {
            path: path.to_path_buf(),
            reason: format!(
                "header describes {} rows spanning {}..={}",
                info.rows, info.first_id, info.last_id
            ),
        });
    }
    Ok(Header {
        info,
        body_len: u64_at(32),
        body_crc: u32_at(40),
    })
}

fn read_header(path: &Path, file: &mut File) -> ChunkResult<Header> {
    let mut bytes = [0u8; HEADER_SIZE];
    file.read_exact(&mut bytes).map_err(|err| match err.kind() {
        io::ErrorKind::UnexpectedEof => ChunkError::Integrity {
            path: path.to_path_buf(),
            reason: "file is shorter than its header".to_string(),
        },
        _ => ChunkError::Io(err),
    })?;
    decode_header(path, &bytes)
}

/// Read only the header of a chunk file.
pub fn read_info(path: &Path) -> ChunkResult<ChunkInfo> {
    let mut file = File::open(path)?;
    Ok(read_header(path, &mut file)?.info)
}

/// A fully loaded, verified chunk file.
#[derive(Debug)]
pub struct ChunkFile {
    path: PathBuf,
    info: ChunkInfo,
    batch: ColumnBatch,
}

impl ChunkFile {
    /// Load and verify a chunk file.
    pub fn open(path: impl AsRef<Path>) -> ChunkResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)?;
        let header = read_header(&path, &mut file)?;

        let mut body = Vec::new();
        file.read_to_end(&mut body)?;
        if body.len() as u64 != header.body_len {
            return Err(ChunkError::Integrity {
                path,
                reason: format!(
                    "header declares {} body bytes, found {}",
                    header.body_len,
                    body.len()
                ),
            });
        }
        let computed = crc32fast::hash(&body);
        if computed != header.body_crc {
            return Err(ChunkError::ChecksumMismatch {
                path,
                stored: header.body_crc,
                computed,
            });
        }

        let batch: ColumnBatch = postcard::from_bytes(&body)?;
        if !batch.is_consistent() || batch.len() as u64 != header.info.rows {
            return Err(ChunkError::Integrity {
                path,
                reason: format!(
                    "header declares {} rows, batch holds {}",
                    header.info.rows,
                    batch.len()
                ),
            });
        }

        Ok(Self {
            path,
            info: header.info,
            batch,
        })
    }

    /// Where the file lives.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Header metadata.
    pub fn info(&self) -> ChunkInfo {
        self.info
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.batch.len()
    }

    /// Row `row`, in the order it was appended.
    pub fn event(&self, row: usize) -> Option<Event> {
        self.batch.event(row)
    }

    /// The underlying columns.
    pub fn batch(&self) -> &ColumnBatch {
        &self.batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn events(range: std::ops::RangeInclusive<u64>) -> Vec<Event> {
        range
            .map(|id| {
                let metadata = (id % 2 == 0).then(|| format!("m{id}").into_bytes());
                Event::new(id, format!("k{id}").into_bytes(), metadata, vec![id as u8; 8])
            })
            .collect()
    }

    #[test]
    fn test_write_then_open() {
        let dir = TempDir::new().unwrap();
        let path = chunk_path(dir.path(), 10);
        let written = events(10..=19);

        let info = write_chunk_file(&path, &written).unwrap();
        assert_eq!(info, ChunkInfo { rows: 10, first_id: 10, last_id: 19 });
        assert_eq!(read_info(&path).unwrap(), info);

        let chunk = ChunkFile::open(&path).unwrap();
        let read: Vec<Event> = (0..chunk.rows()).filter_map(|row| chunk.event(row)).collect();
        assert_eq!(read, written);
        assert!(chunk.event(10).is_none());
    }

    #[test]
    fn test_existing_file_is_not_overwritten() {
        let dir = TempDir::new().unwrap();
        let path = chunk_path(dir.path(), 1);
        write_chunk_file(&path, &events(1..=3)).unwrap();
        let original = fs::read(&path).unwrap();

        let second = write_chunk_file(&path, &events(1..=5));
        assert!(matches!(second, Err(ChunkError::AlreadyExists { .. })));
        assert_eq!(fs::read(&path).unwrap(), original);

        let names: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(names.len(), 1, "temporary file was left behind");
    }

    #[test]
    fn test_empty_batch_is_rejected() {
        let dir = TempDir::new().unwrap();
        let result = write_chunk_file(&chunk_path(dir.path(), 1), &[]);
        assert!(matches!(result, Err(ChunkError::EmptyBuffer)));
    }

    #[test]
    fn test_corrupted_body_is_detected() {
        let dir = TempDir::new().unwrap();
        let path = chunk_path(dir.path(), 1);
        write_chunk_file(&path, &events(1..=4)).unwrap();
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x10;
        fs::write(&path, bytes).unwrap();

        assert!(matches!(
            ChunkFile::open(&path),
            Err(ChunkError::ChecksumMismatch { .. })
        ));
        // The header alone is still fine.
        assert_eq!(read_info(&path).unwrap().rows, 4);
    }

    #[test]
    fn test_foreign_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = chunk_path(dir.path(), 1);
        fs::write(&path, vec![b'x'; HEADER_SIZE + 4]).unwrap();
        assert!(matches!(read_info(&path), Err(ChunkError::BadMagic { .. })));

        fs::write(&path, b"TRCH").unwrap();
        assert!(matches!(read_info(&path), Err(ChunkError::Integrity { .. })));
    }

    #[test]
    fn test_list_chunks_ignores_other_files() {
        let dir = TempDir::new().unwrap();
        write_chunk_file(&chunk_path(dir.path(), 30), &events(30..=31)).unwrap();
        write_chunk_file(&chunk_path(dir.path(), 4), &events(4..=5)).unwrap();
        fs::write(dir.path().join("readme.txt"), b"hi").unwrap();
        fs::write(dir.path().join(".abc.chunk.tmp"), b"partial").unwrap();

        let ids: Vec<u64> = list_chunks(dir.path()).unwrap().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![4, 30]);
    }

    #[test]
    fn test_parse_chunk_filename() {
        assert_eq!(parse_chunk_filename("123.chunk"), Some(123));
        assert_eq!(parse_chunk_filename("123.wal"), None);
        assert_eq!(parse_chunk_filename("x.chunk"), None);
        assert_eq!(chunk_id_of(Path::new("/a/b/77.chunk")), Some(77));
    }
}
