//! A snapshot-at-creation iterator over committed excerpts, starting from
//! the persistent cursor's position at the moment [`crate::Queue::iter`] was
//! called.
//!
//! Weakly consistent with concurrent producers/consumers: it never
//! mutates the persistent cursor or deletes slab files, so it is always
//! safe to hold alongside `poll`/`offer` calls on the same queue, but it
//! may or may not observe excerpts appended after it was constructed
//! (`SPEC_FULL.md` section 4.6).

use std::marker::PhantomData;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::codec::Deserializer;
use crate::error::QueueError;
use crate::segment::SegmentReader;

pub struct QueueIter<'a, T, D> {
    reader: SegmentReader,
    active_slab_id: &'a AtomicU32,
    deserializer: &'a D,
    _marker: PhantomData<fn() -> T>,
}

impl<'a, T, D> QueueIter<'a, T, D>
where
    D: Deserializer<T>,
{
    pub(crate) fn new(
        dir: &Path,
        name: &str,
        start_slab: u32,
        start_index: i32,
        active_slab_id: &'a AtomicU32,
        deserializer: &'a D,
    ) -> Result<Self, QueueError> {
        let mut reader = SegmentReader::open(dir, name, start_slab)?;
        reader.seek_to_index(start_index);
        Ok(Self {
            reader,
            active_slab_id,
            deserializer,
            _marker: PhantomData,
        })
    }

    /// Always fails: this iterator is read-only and never mutates the
    /// persistent cursor or deletes slabs, so it has no element to remove.
    pub fn remove(&self) -> Result<(), QueueError> {
        Err(QueueError::Unsupported(
            "iterator does not support element removal",
        ))
    }

    fn next_inner(&mut self) -> Result<Option<T>, QueueError> {
        loop {
            match self.reader.advance()? {
                Some(idx) => {
                    let slab = self.reader.slab_id();
                    let bytes = self.reader.read_excerpt(idx)?.ok_or_else(|| {
                        QueueError::CorruptState {
                            slab,
                            index: idx,
                            detail: "excerpt vanished during iteration".to_string(),
                        }
                    })?;
                    let value = self.deserializer.deserialize(&bytes).map_err(|_| {
                        QueueError::CorruptState {
                            slab,
                            index: idx,
                            detail: "deserialization failed".to_string(),
                        }
                    })?;
                    return Ok(Some(value));
                }
                None => {
                    let current = self.reader.slab_id();
                    let active = self.active_slab_id.load(Ordering::Acquire);
                    if current == active {
                        return Ok(None);
                    }
                    // Not the active slab and drained: a newer slab must
                    // already exist (or is in the middle of being created),
                    // so cross into it rather than stopping early.
                    self.reader.reopen_on(current + 1)?;
                }
            }
        }
    }
}

impl<'a, T, D> Iterator for QueueIter<'a, T, D>
where
    D: Deserializer<T>,
{
    type Item = Result<T, QueueError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_inner() {
            Ok(Some(value)) => Some(Ok(value)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
