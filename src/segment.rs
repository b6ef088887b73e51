//! Append-only, per-slab storage with random-index lookup and sequential
//! tail iteration. No published crate exposes exactly this contract, so it
//! lives here as a length-prefixed, CRC-suffixed record log. Two files
//! back one slab:
//!
//! - `<name>-<id>.data`: back-to-back records `[u32 len LE][payload][u32 crc32 LE]`.
//! - `<name>-<id>.index`: one `u64` little-endian byte offset per committed
//!   record, in commit order — gives O(1) random access by excerpt index.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crc32fast::Hasher;

use crate::error::QueueError;

const LEN_SIZE: u64 = 4;
const CRC_SIZE: u64 = 4;
const INDEX_ENTRY_SIZE: u64 = 8;

pub(crate) fn data_path(dir: &Path, name: &str, slab_id: u32) -> PathBuf {
    dir.join(format!("{name}-{slab_id}.data"))
}

pub(crate) fn index_path(dir: &Path, name: &str, slab_id: u32) -> PathBuf {
    dir.join(format!("{name}-{slab_id}.index"))
}

/// Deletes both files backing a slab. Missing files are not an error —
/// deletion is meant to be idempotent with respect to a crash that already
/// removed one half of the pair.
pub(crate) fn delete_slab_files(dir: &Path, name: &str, slab_id: u32) -> Result<(), QueueError> {
    for path in [data_path(dir, name, slab_id), index_path(dir, name, slab_id)] {
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// The write side of a slab: the only handle appending to its `.data`/`.index`.
pub(crate) struct SegmentWriter {
    data: File,
    index: File,
    data_len: u64,
    next_index: i32,
    slab_block_size: u64,
    message_capacity: usize,
    fsync_on_commit: bool,
}

impl SegmentWriter {
    /// Opens (creating if necessary) the slab's files, recovering
    /// `data_len` and `next_index` from what's already on disk — so
    /// reopening an existing, partially filled slab resumes appending in
    /// the right place rather than starting over.
    pub(crate) fn create_or_open(
        dir: &Path,
        name: &str,
        slab_id: u32,
        slab_block_size: u64,
        message_capacity: usize,
        fsync_on_commit: bool,
    ) -> Result<Self, QueueError> {
        let data = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(data_path(dir, name, slab_id))?;
        let index = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(index_path(dir, name, slab_id))?;

        let data_len = data.metadata()?.len();
        let next_index = (index.metadata()?.len() / INDEX_ENTRY_SIZE) as i32;

        Ok(Self {
            data,
            index,
            data_len,
            next_index,
            slab_block_size,
            message_capacity,
            fsync_on_commit,
        })
    }

    /// `true` once the slab's data region has reached its configured
    /// budget — the engine treats this as "the slab is full" and rolls
    /// over to a new one rather than attempting a commit here.
    pub(crate) fn is_full(&self) -> bool {
        self.data_len >= self.slab_block_size
    }

    /// Appends `payload` as a new excerpt and returns its assigned index.
    ///
    /// Fails only on a payload exceeding `message_capacity` or on I/O
    /// error. Callers must check [`Self::is_full`] before calling this —
    /// `commit` never refuses on slab fullness itself; rollover is decided
    /// one layer up.
    pub(crate) fn commit(&mut self, payload: &[u8]) -> Result<i32, QueueError> {
        if payload.len() > self.message_capacity {
            return Err(QueueError::InvalidConfiguration(format!(
                "payload of {} bytes exceeds message_capacity of {} bytes",
                payload.len(),
                self.message_capacity
            )));
        }

        let mut hasher = Hasher::new();
        hasher.update(payload);
        let crc = hasher.finalize();

        let offset = self.data_len;
        let len = payload.len() as u32;

        self.data.write_all(&len.to_le_bytes())?;
        self.data.write_all(payload)?;
        self.data.write_all(&crc.to_le_bytes())?;
        if self.fsync_on_commit {
            self.data.sync_data()?;
        }

        self.index.write_all(&offset.to_le_bytes())?;
        if self.fsync_on_commit {
            self.index.sync_data()?;
        }

        self.data_len += LEN_SIZE + u64::from(len) + CRC_SIZE;
        let assigned = self.next_index;
        self.next_index += 1;
        Ok(assigned)
    }
}

/// The read side of a slab. Independent file handles from any
/// [`SegmentWriter`] open on the same slab — a reader may be trailing a
/// writer that is still appending to the same files.
pub(crate) struct SegmentReader {
    dir: PathBuf,
    name: String,
    slab_id: u32,
    data: File,
    index: File,
    committed: i64,
    /// Last index successfully read; `-1` means "nothing read yet".
    pos: i32,
}

impl SegmentReader {
    pub(crate) fn open(dir: &Path, name: &str, slab_id: u32) -> Result<Self, QueueError> {
        let data = OpenOptions::new().read(true).open(data_path(dir, name, slab_id))?;
        let index = OpenOptions::new().read(true).open(index_path(dir, name, slab_id))?;
        let committed = (index.metadata()?.len() / INDEX_ENTRY_SIZE) as i64;

        Ok(Self {
            dir: dir.to_path_buf(),
            name: name.to_string(),
            slab_id,
            data,
            index,
            committed,
            pos: -1,
        })
    }

    pub(crate) fn slab_id(&self) -> u32 {
        self.slab_id
    }

    /// Re-reads the index file's length to pick up excerpts committed by a
    /// writer (in this process or another) since this reader was opened or
    /// last refreshed.
    fn refresh(&mut self) -> Result<(), QueueError> {
        self.committed = (self.index.metadata()?.len() / INDEX_ENTRY_SIZE) as i64;
        Ok(())
    }

    pub(crate) fn seek_to_start(&mut self) {
        self.pos = -1;
    }

    pub(crate) fn seek_to_index(&mut self, index: i32) {
        self.pos = index;
    }

    pub(crate) fn current_index(&self) -> i32 {
        self.pos
    }

    /// Computes the next excerpt index after the current position without
    /// moving it. Returns `None` if nothing is committed there (after a
    /// refresh from disk). Pair with [`Self::commit_advance`] once the
    /// caller has successfully consumed that index, so a failure in
    /// between (e.g. a deserialization error) never silently advances the
    /// position.
    pub(crate) fn peek_next_index(&mut self) -> Result<Option<i32>, QueueError> {
        let candidate = self.pos + 1;
        if (candidate as i64) >= self.committed {
            self.refresh()?;
            if (candidate as i64) >= self.committed {
                return Ok(None);
            }
        }
        Ok(Some(candidate))
    }

    /// Moves the current position to `index`, without re-validating it.
    /// Callers only pass a value previously returned by
    /// [`Self::peek_next_index`].
    pub(crate) fn commit_advance(&mut self, index: i32) {
        self.pos = index;
    }

    /// Attempts to advance to the next excerpt after the current position.
    /// Returns the new index on success, or `None` if the slab has no more
    /// committed excerpts right now (refreshing once from disk first, to
    /// observe excerpts committed concurrently).
    pub(crate) fn advance(&mut self) -> Result<Option<i32>, QueueError> {
        let candidate = self.pos + 1;
        if (candidate as i64) >= self.committed {
            self.refresh()?;
            if (candidate as i64) >= self.committed {
                return Ok(None);
            }
        }
        self.pos = candidate;
        Ok(Some(candidate))
    }

    /// Reads the payload at `index` without moving the cursor, verifying
    /// its CRC. Used by both `poll` (after `advance`) and `peek`
    /// (speculative, does not call `advance`).
    ///
    /// Returns `Ok(None)` if `index` has no committed entry (even after a
    /// refresh from disk) — that is not corruption, just "not there yet".
    /// `Err(QueueError::CorruptState)` is reserved for a CRC mismatch on an
    /// entry that *is* present.
    pub(crate) fn read_excerpt(&mut self, index: i32) -> Result<Option<Vec<u8>>, QueueError> {
        if index < 0 {
            return Ok(None);
        }
        if (index as i64) >= self.committed {
            self.refresh()?;
            if (index as i64) >= self.committed {
                return Ok(None);
            }
        }

        let mut offset_buf = [0u8; 8];
        self.index
            .seek(SeekFrom::Start(index as u64 * INDEX_ENTRY_SIZE))?;
        self.index.read_exact(&mut offset_buf)?;
        let offset = u64::from_le_bytes(offset_buf);

        self.data.seek(SeekFrom::Start(offset))?;
        let mut len_buf = [0u8; 4];
        self.data.read_exact(&mut len_buf)?;
        let len = u32::from_le_bytes(len_buf) as usize;

        let mut payload = vec![0u8; len];
        self.data.read_exact(&mut payload)?;

        let mut crc_buf = [0u8; 4];
        self.data.read_exact(&mut crc_buf)?;
        let stored_crc = u32::from_le_bytes(crc_buf);

        let mut hasher = Hasher::new();
        hasher.update(&payload);
        if hasher.finalize() != stored_crc {
            return Err(QueueError::CorruptState {
                slab: self.slab_id,
                index,
                detail: "CRC32 mismatch reading committed excerpt".to_string(),
            });
        }

        Ok(Some(payload))
    }

    /// Reopens this reader against the next slab id, positioned at start.
    /// Used on cursor rollover and by the free-standing iterator.
    pub(crate) fn reopen_on(&mut self, slab_id: u32) -> Result<(), QueueError> {
        let next = Self::open(&self.dir, &self.name, slab_id)?;
        *self = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_then_read_round_trip() {
        let dir = tempdir().unwrap();
        let mut writer =
            SegmentWriter::create_or_open(dir.path(), "q", 1, 1 << 20, 4096, false).unwrap();

        for i in 0..5u8 {
            let idx = writer.commit(&[i; 10]).unwrap();
            assert_eq!(idx, i32::from(i));
        }

        let mut reader = SegmentReader::open(dir.path(), "q", 1).unwrap();
        for i in 0..5u8 {
            let idx = reader.advance().unwrap().unwrap();
            assert_eq!(idx, i32::from(i));
            let payload = reader.read_excerpt(idx).unwrap().unwrap();
            assert_eq!(payload, vec![i; 10]);
        }
        assert!(reader.advance().unwrap().is_none());
    }

    #[test]
    fn reader_sees_writes_committed_after_it_was_opened() {
        let dir = tempdir().unwrap();
        let mut writer =
            SegmentWriter::create_or_open(dir.path(), "q", 1, 1 << 20, 4096, false).unwrap();
        writer.commit(b"first").unwrap();

        let mut reader = SegmentReader::open(dir.path(), "q", 1).unwrap();
        assert_eq!(reader.advance().unwrap(), Some(0));
        assert!(reader.advance().unwrap().is_none());

        writer.commit(b"second").unwrap();
        assert_eq!(reader.advance().unwrap(), Some(1));
        assert_eq!(reader.read_excerpt(1).unwrap().unwrap(), b"second");
    }

    #[test]
    fn is_full_once_block_size_reached() {
        let dir = tempdir().unwrap();
        let mut writer = SegmentWriter::create_or_open(dir.path(), "q", 1, 20, 4096, false).unwrap();
        assert!(!writer.is_full());
        writer.commit(&[0u8; 10]).unwrap();
        assert!(writer.is_full());
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let dir = tempdir().unwrap();
        let mut writer = SegmentWriter::create_or_open(dir.path(), "q", 1, 1 << 20, 4, false).unwrap();
        assert!(writer.commit(&[0u8; 5]).is_err());
    }

    #[test]
    fn corrupt_crc_is_detected() {
        let dir = tempdir().unwrap();
        {
            let mut writer =
                SegmentWriter::create_or_open(dir.path(), "q", 1, 1 << 20, 4096, false).unwrap();
            writer.commit(b"hello").unwrap();
        }

        // Flip a byte in the payload region to corrupt the CRC check.
        let data_file = data_path(dir.path(), "q", 1);
        let mut bytes = fs::read(&data_file).unwrap();
        bytes[4] ^= 0xFF;
        fs::write(&data_file, bytes).unwrap();

        let mut reader = SegmentReader::open(dir.path(), "q", 1).unwrap();
        reader.advance().unwrap();
        assert!(matches!(
            reader.read_excerpt(0),
            Err(QueueError::CorruptState { .. })
        ));
    }

    #[test]
    fn delete_slab_files_is_idempotent() {
        let dir = tempdir().unwrap();
        {
            let mut writer =
                SegmentWriter::create_or_open(dir.path(), "q", 1, 1 << 20, 4096, false).unwrap();
            writer.commit(b"x").unwrap();
        }
        delete_slab_files(dir.path(), "q", 1).unwrap();
        assert!(!data_path(dir.path(), "q", 1).exists());
        // Second call on already-missing files must not error.
        delete_slab_files(dir.path(), "q", 1).unwrap();
    }
}
