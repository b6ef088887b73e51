//! The persistent read cursor: an 8-byte memory-mapped file holding the
//! consumer's `(slab_id, last_read_excerpt_index)` position.
//!
//! Packed as a single `u64` so that a slab advance plus index reset is one
//! atomic write, eliminating a torn state visible across process restarts
//! or between a producer and a consumer in different processes sharing the
//! same mapping.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use memmap2::MmapMut;

use crate::error::QueueError;

const SENTINEL_INDEX: i32 = -1;
const FILE_LEN: u64 = 8;

/// Packs `(slab, index)` into the on-disk/on-wire `u64` layout.
#[inline]
fn pack(slab: u32, index: i32) -> u64 {
    (u64::from(slab) << 32) | (u64::from(index as u32))
}

#[inline]
fn unpack_slab(word: u64) -> u32 {
    (word >> 32) as u32
}

#[inline]
fn unpack_index(word: u64) -> i32 {
    (word & 0xFFFF_FFFF) as u32 as i32
}

/// The memory-mapped `<name>.position` file.
pub(crate) struct CursorFile {
    mmap: MmapMut,
}

impl CursorFile {
    /// Opens (creating if necessary) the cursor file and, if it was freshly
    /// created (all-zero content), initialises it to `(head_slab, -1)`.
    pub(crate) fn open(path: &Path, head_slab: u32) -> Result<Self, QueueError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        file.set_len(FILE_LEN)?;

        // SAFETY: the file is exclusively ours for the lifetime of this
        // mapping (single consumer per storage directory); resizing never
        // happens after this point since the cursor is a fixed 8 bytes.
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        let cursor = Self { mmap };

        if cursor.load() == 0 {
            cursor.store(pack(head_slab, SENTINEL_INDEX));
        }
        Ok(cursor)
    }

    #[inline]
    fn atomic(&self) -> &AtomicU64 {
        debug_assert_eq!(self.mmap.len(), FILE_LEN as usize);
        // SAFETY: `mmap` is 8 bytes and `AtomicU64` is 8-byte aligned on
        // every platform this crate targets; `MmapMut::map_mut` returns
        // page-aligned memory, which satisfies `AtomicU64`'s alignment.
        unsafe { &*(self.mmap.as_ptr().cast::<AtomicU64>()) }
    }

    /// Volatile 64-bit read of the packed cursor.
    pub(crate) fn load(&self) -> u64 {
        self.atomic().load(Ordering::Acquire)
    }

    /// Ordered 64-bit write of the packed cursor.
    pub(crate) fn store(&self, value: u64) {
        self.atomic().store(value, Ordering::Release);
    }

    /// Compare-and-swap; returns `true` on success.
    pub(crate) fn cas(&self, expected: u64, next: u64) -> bool {
        self.atomic()
            .compare_exchange(expected, next, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn slab(&self) -> u32 {
        unpack_slab(self.load())
    }

    pub(crate) fn index(&self) -> i32 {
        unpack_index(self.load())
    }

    pub(crate) fn set_index(&self, index: i32) {
        let slab = self.slab();
        self.store(pack(slab, index));
    }

    /// Changes only the slab, preserving the current index.
    pub(crate) fn set_slab(&self, slab: u32) {
        let index = self.index();
        self.store(pack(slab, index));
    }

    /// Atomically advances the cursor to `(next_slab, -1)` in a single
    /// write — the slab-advance-plus-index-reset this module exists for.
    pub(crate) fn advance_slab(&self, next_slab: u32) {
        self.store(pack(next_slab, SENTINEL_INDEX));
    }

    pub(crate) fn flush(&self) -> Result<(), QueueError> {
        self.mmap.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn fresh_file_initialises_to_head_slab_sentinel() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("q.position");
        let cursor = CursorFile::open(&path, 3).unwrap();
        assert_eq!(cursor.slab(), 3);
        assert_eq!(cursor.index(), -1);
    }

    #[test]
    fn reopen_preserves_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("q.position");
        {
            let cursor = CursorFile::open(&path, 1).unwrap();
            cursor.set_index(7);
        }
        let cursor = CursorFile::open(&path, 1).unwrap();
        assert_eq!(cursor.slab(), 1);
        assert_eq!(cursor.index(), 7);
    }

    #[test]
    fn cas_semantics() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("q.position");
        let cursor = CursorFile::open(&path, 0).unwrap();
        // initial state packs to (0, -1); force a known value first.
        cursor.store(0);
        assert_eq!(cursor.load(), 0);

        assert!(cursor.cas(0, 42));
        assert_eq!(cursor.load(), 42);

        cursor.store(1);
        assert!(!cursor.cas(0, 42));
        assert_eq!(cursor.load(), 1);
    }

    #[test]
    fn advance_slab_resets_index_atomically() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("q.position");
        let cursor = CursorFile::open(&path, 1).unwrap();
        cursor.set_index(5);
        cursor.advance_slab(2);
        assert_eq!(cursor.slab(), 2);
        assert_eq!(cursor.index(), -1);
    }

    #[test]
    fn set_index_preserves_slab() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("q.position");
        let cursor = CursorFile::open(&path, 9).unwrap();
        cursor.set_index(123);
        assert_eq!(cursor.slab(), 9);
        assert_eq!(cursor.index(), 123);
    }

    #[test]
    fn set_slab_preserves_index() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("q.position");
        let cursor = CursorFile::open(&path, 1).unwrap();
        cursor.set_index(42);
        cursor.set_slab(5);
        assert_eq!(cursor.slab(), 5);
        assert_eq!(cursor.index(), 42);
    }
}
