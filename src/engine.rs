//! The queue engine: ties the cursor, slab registry, segment files, and
//! blocking primitives together into the public [`Queue`] API.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::cancel::CancellationToken;
use crate::codec::{Deserializer, Serializer};
use crate::config::QueueConfig;
use crate::cursor::CursorFile;
use crate::error::QueueError;
use crate::invariants::{
    debug_assert_bounded_slab_count, debug_assert_contiguous_slab_range, debug_assert_cursor_in_range,
    debug_assert_peek_poll_agree,
};
use crate::iter::QueueIter;
use crate::notify::Notify;
use crate::registry;
use crate::segment::{self, SegmentReader, SegmentWriter};

/// A persistent, file-backed, single-producer/single-consumer-per-handle
/// FIFO queue. See the crate-level docs for the on-disk layout.
///
/// Cloning is not supported; share a `Queue` across threads behind an
/// `Arc` instead.
pub struct Queue<T, S = crate::codec::BincodeCodec, D = crate::codec::BincodeCodec> {
    config: QueueConfig,
    serializer: S,
    deserializer: D,
    cursor: CursorFile,
    /// Lowest live slab id currently on disk. Updated whenever a drained
    /// slab is deleted; used only for the `I2` debug assertion.
    head_slab_id: AtomicU32,
    active_slab_id: AtomicU32,
    live_slab_count: Mutex<u32>,
    writer: Mutex<SegmentWriter>,
    reader: Mutex<SegmentReader>,
    closed: AtomicBool,
    item_available: Notify,
    slot_available: Notify,
    /// The `(slab, index, hash)` of the excerpt the most recent `try_peek`
    /// returned, checked against the next `try_poll` to enforce `I5`.
    /// Debug-only: purely a verification aid, never read outside
    /// `debug_assert!`.
    #[cfg(debug_assertions)]
    last_peek: Mutex<Option<(u32, i32, u64)>>,
    _marker: PhantomData<fn() -> T>,
}

#[cfg(debug_assertions)]
fn hash_bytes(bytes: &[u8]) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    hasher.finish()
}

impl<T, S, D> Queue<T, S, D> {
    pub(crate) fn open(config: QueueConfig, serializer: S, deserializer: D) -> Result<Self, QueueError>
    where
        S: Serializer<T>,
        D: Deserializer<T>,
    {
        let dir = config.storage_directory.clone();
        let mut ids = registry::all_slab_ids(&dir, &config.name)?;

        let position_path = dir.join(format!("{}.position", config.name));
        let initial_head = registry::head_slab_id(&ids).unwrap_or(1);
        let cursor = CursorFile::open(&position_path, initial_head)?;

        if ids.is_empty() {
            // Brand-new queue: force the cursor to (1, -1) regardless of
            // whatever a stale position file from a previously-wiped
            // storage directory might contain.
            cursor.advance_slab(1);
        } else {
            let cursor_slab = cursor.slab();
            let mut orphaned = Vec::new();
            ids.retain(|&id| {
                if id < cursor_slab {
                    orphaned.push(id);
                    false
                } else {
                    true
                }
            });
            for id in orphaned {
                match segment::delete_slab_files(&dir, &config.name, id) {
                    Ok(()) => info!(slab = id, "swept orphan slab left by a prior crash"),
                    Err(error) => warn!(slab = id, %error, "failed to sweep orphan slab on open"),
                }
            }
        }

        let (head, tail) = if ids.is_empty() {
            (1u32, 1u32)
        } else {
            (registry::head_slab_id(&ids).unwrap(), registry::tail_slab_id(&ids))
        };
        debug_assert_contiguous_slab_range!(head, tail);

        let writer = SegmentWriter::create_or_open(
            &dir,
            &config.name,
            tail,
            config.slab_block_size,
            config.message_capacity,
            config.fsync_on_commit,
        )?;

        let mut reader = SegmentReader::open(&dir, &config.name, cursor.slab())?;
        reader.seek_to_index(cursor.index());

        let live_slab_count = tail - head + 1;
        info!(head, tail, live_slab_count, name = %config.name, "queue opened");

        Ok(Self {
            config,
            serializer,
            deserializer,
            cursor,
            head_slab_id: AtomicU32::new(head),
            active_slab_id: AtomicU32::new(tail),
            live_slab_count: Mutex::new(live_slab_count),
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            closed: AtomicBool::new(false),
            item_available: Notify::new(),
            slot_available: Notify::new(),
            #[cfg(debug_assertions)]
            last_peek: Mutex::new(None),
            _marker: PhantomData,
        })
    }

    fn serialize_value(&self, value: &T) -> Result<Vec<u8>, QueueError>
    where
        S: Serializer<T>,
    {
        let mut buf = Vec::new();
        self.serializer.serialize(value, &mut buf)?;
        Ok(buf)
    }

    /// Appends `payload` to the active slab, rolling over to a new slab
    /// first if the active one is full. Returns `Ok(false)` if rollover is
    /// blocked by `max_number_of_slabs` (the queue is, for now, full).
    fn offer_bytes(&self, payload: &[u8]) -> Result<bool, QueueError> {
        let mut writer = self.writer.lock().unwrap();

        if writer.is_full() {
            let active = self.active_slab_id.load(Ordering::Acquire);
            let next = active + 1;

            let mut live = self.live_slab_count.lock().unwrap();
            let mut reader = self.reader.lock().unwrap();

            // A full slab the reader has already entirely consumed is dead
            // weight: nothing will ever append to or read from it again.
            // Retiring it as part of this same rollover keeps it from
            // occupying a `max_number_of_slabs` slot indefinitely — without
            // this, a fully-drained-but-full active slab would otherwise
            // permanently block further writes once the bound is reached.
            let old_fully_drained = reader.slab_id() == active && reader.peek_next_index()?.is_none();

            if !old_fully_drained {
                if let Some(max) = self.config.max_number_of_slabs {
                    if *live >= max {
                        return Ok(false);
                    }
                }
            }

            *writer = SegmentWriter::create_or_open(
                &self.config.storage_directory,
                &self.config.name,
                next,
                self.config.slab_block_size,
                self.config.message_capacity,
                self.config.fsync_on_commit,
            )?;
            self.active_slab_id.store(next, Ordering::Release);

            if old_fully_drained {
                segment::delete_slab_files(&self.config.storage_directory, &self.config.name, active)?;
                self.cursor.advance_slab(next);
                reader.reopen_on(next)?;
                self.head_slab_id.store(next, Ordering::Release);
                info!(retired_slab = active, new_slab = next, "retired drained, full active slab during rollover");
            } else {
                *live += 1;
                if let Some(max) = self.config.max_number_of_slabs {
                    debug_assert_bounded_slab_count!(*live, max);
                }
                debug!(new_slab = next, "rolled over to new slab");
            }
        }

        writer.commit(payload)?;
        drop(writer);
        self.item_available.notify_all();
        Ok(true)
    }

    /// Non-blocking push. Returns `Ok(false)` if the queue has reached
    /// `max_number_of_slabs` and cannot accept more without draining.
    pub fn try_offer(&self, value: T) -> Result<bool, QueueError>
    where
        S: Serializer<T>,
    {
        let bytes = self.serialize_value(&value)?;
        self.offer_bytes(&bytes)
    }

    /// Blocks until the value is accepted or `cancel` is signalled.
    pub fn put(&self, value: T, cancel: &CancellationToken) -> Result<(), QueueError>
    where
        S: Serializer<T>,
    {
        let bytes = self.serialize_value(&value)?;
        let mut backoff = Backoff::new();
        loop {
            if self.offer_bytes(&bytes)? {
                return Ok(());
            }
            if cancel.is_cancelled() {
                return Err(QueueError::Cancelled);
            }
            if backoff.is_completed() {
                self.slot_available.wait_one_slice();
                backoff.reset();
            } else {
                backoff.snooze();
            }
        }
    }

    /// Blocks until the value is accepted, `timeout` elapses, or `cancel`
    /// is signalled. Returns `Ok(false)` on timeout.
    pub fn offer_timeout(
        &self,
        value: T,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<bool, QueueError>
    where
        S: Serializer<T>,
    {
        let bytes = self.serialize_value(&value)?;
        let deadline = Instant::now() + timeout;
        let mut backoff = Backoff::new();
        loop {
            if self.offer_bytes(&bytes)? {
                return Ok(true);
            }
            if cancel.is_cancelled() {
                return Err(QueueError::Cancelled);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            if backoff.is_completed() {
                self.slot_available.wait_one_slice();
                backoff.reset();
            } else {
                backoff.snooze();
            }
        }
    }

    /// Wraps `try_offer`, surfacing a refusal as `QueueError::QueueFull`
    /// instead of `Ok(false)`.
    pub fn add(&self, value: T) -> Result<(), QueueError>
    where
        S: Serializer<T>,
    {
        if self.try_offer(value)? {
            Ok(())
        } else {
            Err(QueueError::QueueFull)
        }
    }

    /// Non-blocking pop. Advances and persists the cursor on success.
    pub fn try_poll(&self) -> Result<Option<T>, QueueError>
    where
        D: Deserializer<T>,
    {
        let mut reader = self.reader.lock().unwrap();
        loop {
            match reader.peek_next_index()? {
                Some(idx) => {
                    let slab = reader.slab_id();
                    let bytes = reader.read_excerpt(idx)?.ok_or_else(|| QueueError::CorruptState {
                        slab,
                        index: idx,
                        detail: "excerpt vanished between peek and read".to_string(),
                    })?;
                    let value = self.deserializer.deserialize(&bytes).map_err(|_| {
                        QueueError::CorruptState {
                            slab,
                            index: idx,
                            detail: "deserialization failed".to_string(),
                        }
                    })?;
                    #[cfg(debug_assertions)]
                    {
                        let peeked = self.last_peek.lock().unwrap().take();
                        if let Some((peeked_slab, peeked_idx, peeked_hash)) = peeked {
                            if peeked_slab == slab && peeked_idx == idx {
                                debug_assert_peek_poll_agree!(peeked_hash, hash_bytes(&bytes));
                            }
                        }
                    }
                    // Deserialization succeeded: only now do reader and
                    // persistent cursor move past this excerpt. A failed
                    // deserialize above leaves both untouched, so the next
                    // attempt (even after a restart) retries the same entry.
                    reader.commit_advance(idx);
                    self.cursor.set_index(idx);
                    debug_assert_cursor_in_range!(
                        self.cursor.slab(),
                        self.head_slab_id.load(Ordering::Acquire),
                        self.active_slab_id.load(Ordering::Acquire)
                    );
                    self.slot_available.notify_all();
                    return Ok(Some(value));
                }
                None => {
                    let current = reader.slab_id();
                    let active = self.active_slab_id.load(Ordering::Acquire);
                    if current == active {
                        return Ok(None);
                    }

                    let next = current + 1;
                    self.cursor.advance_slab(next);
                    reader.reopen_on(next)?;

                    {
                        let mut live = self.live_slab_count.lock().unwrap();
                        segment::delete_slab_files(&self.config.storage_directory, &self.config.name, current)?;
                        *live -= 1;
                    }
                    self.head_slab_id.store(next, Ordering::Release);
                    info!(drained_slab = current, now_reading = next, "slab drained and removed");
                    self.slot_available.notify_all();
                }
            }
        }
    }

    /// Non-destructive lookahead at what `try_poll` would return next,
    /// without advancing the cursor or deleting anything.
    pub fn try_peek(&self) -> Result<Option<T>, QueueError>
    where
        D: Deserializer<T>,
    {
        let mut reader = self.reader.lock().unwrap();
        match reader.peek_next_index()? {
            Some(idx) => {
                let slab = reader.slab_id();
                let bytes = reader.read_excerpt(idx)?.ok_or_else(|| QueueError::CorruptState {
                    slab,
                    index: idx,
                    detail: "excerpt vanished between peek and read".to_string(),
                })?;
                let value = self
                    .deserializer
                    .deserialize(&bytes)
                    .map_err(|_| QueueError::CorruptState {
                        slab,
                        index: idx,
                        detail: "deserialization failed".to_string(),
                    })?;
                #[cfg(debug_assertions)]
                {
                    *self.last_peek.lock().unwrap() = Some((slab, idx, hash_bytes(&bytes)));
                }
                Ok(Some(value))
            }
            None => {
                let current = reader.slab_id();
                let active = self.active_slab_id.load(Ordering::Acquire);
                if current == active {
                    return Ok(None);
                }
                // The current slab is drained but is not the active one:
                // peek speculatively into the next slab's first excerpt
                // without touching the real reader or cursor.
                let next = current + 1;
                let mut probe = SegmentReader::open(&self.config.storage_directory, &self.config.name, next)?;
                match probe.read_excerpt(0)? {
                    Some(bytes) => {
                        let value = self.deserializer.deserialize(&bytes).map_err(|_| {
                            QueueError::CorruptState {
                                slab: next,
                                index: 0,
                                detail: "deserialization failed".to_string(),
                            }
                        })?;
                        #[cfg(debug_assertions)]
                        {
                            *self.last_peek.lock().unwrap() = Some((next, 0, hash_bytes(&bytes)));
                        }
                        Ok(Some(value))
                    }
                    None => Ok(None),
                }
            }
        }
    }

    /// Wraps `try_poll`, surfacing an empty queue as
    /// `QueueError::EmptyQueue` instead of `Ok(None)`.
    pub fn try_remove(&self) -> Result<T, QueueError>
    where
        D: Deserializer<T>,
    {
        self.try_poll()?.ok_or(QueueError::EmptyQueue)
    }

    /// Wraps `try_peek`, surfacing an empty queue as
    /// `QueueError::EmptyQueue` instead of `Ok(None)`.
    pub fn try_element(&self) -> Result<T, QueueError>
    where
        D: Deserializer<T>,
    {
        self.try_peek()?.ok_or(QueueError::EmptyQueue)
    }

    /// Blocks until an element is available or `cancel` is signalled.
    pub fn take(&self, cancel: &CancellationToken) -> Result<T, QueueError>
    where
        D: Deserializer<T>,
    {
        let mut backoff = Backoff::new();
        loop {
            if let Some(value) = self.try_poll()? {
                return Ok(value);
            }
            if cancel.is_cancelled() {
                return Err(QueueError::Cancelled);
            }
            if backoff.is_completed() {
                self.item_available.wait_one_slice();
                backoff.reset();
            } else {
                backoff.snooze();
            }
        }
    }

    /// Blocks until an element is available, `timeout` elapses, or `cancel`
    /// is signalled. Returns `Ok(None)` on timeout.
    pub fn poll_timeout(&self, timeout: Duration, cancel: &CancellationToken) -> Result<Option<T>, QueueError>
    where
        D: Deserializer<T>,
    {
        let deadline = Instant::now() + timeout;
        let mut backoff = Backoff::new();
        loop {
            if let Some(value) = self.try_poll()? {
                return Ok(Some(value));
            }
            if cancel.is_cancelled() {
                return Err(QueueError::Cancelled);
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            if backoff.is_completed() {
                self.item_available.wait_one_slice();
                backoff.reset();
            } else {
                backoff.snooze();
            }
        }
    }

    /// Polls up to `max_elements` values into `sink`, stopping early if the
    /// queue empties. Returns the number of elements transferred.
    ///
    /// `sink` is any `Extend<T>` (e.g. `Vec<T>`). A `Vec<T>` can never alias
    /// `&Queue<T, S, D>`, so draining a queue into itself is ruled out by
    /// the type system rather than by a runtime check.
    pub fn drain_to<E: Extend<T>>(&self, sink: &mut E, max_elements: usize) -> Result<usize, QueueError>
    where
        D: Deserializer<T>,
    {
        let mut drained = 0;
        while drained < max_elements {
            match self.try_poll()? {
                Some(value) => {
                    sink.extend(std::iter::once(value));
                    drained += 1;
                }
                None => break,
            }
        }
        Ok(drained)
    }

    /// Always fails: the append-only slab model has no way to delete a
    /// single arbitrary element without rewriting every slab after it.
    pub fn remove_value(&self, _value: &T) -> Result<bool, QueueError>
    where
        T: PartialEq,
    {
        Err(QueueError::Unsupported(
            "remove(value): arbitrary-element removal is not supported",
        ))
    }

    /// Always fails, for the same reason as [`Self::remove_value`].
    pub fn remove_all(&self, _values: &[T]) -> Result<bool, QueueError>
    where
        T: PartialEq,
    {
        Err(QueueError::Unsupported(
            "removeAll: arbitrary-element removal is not supported",
        ))
    }

    /// Always fails, for the same reason as [`Self::remove_value`].
    pub fn retain_all(&self, _values: &[T]) -> Result<bool, QueueError>
    where
        T: PartialEq,
    {
        Err(QueueError::Unsupported(
            "retainAll: arbitrary-element removal is not supported",
        ))
    }

    /// Always fails: dropping every live excerpt in one call would require
    /// out-of-order deletion this queue's slab model does not provide.
    pub fn clear(&self) -> Result<(), QueueError> {
        Err(QueueError::Unsupported(
            "clear: bulk arbitrary deletion is not supported",
        ))
    }

    /// Number of excerpts between the cursor and the tail of the active
    /// slab. `O(n)` in the number of unread excerpts: this crate keeps no
    /// running counter, matching the append-only model's "count by reading"
    /// tradeoff.
    pub fn len(&self) -> Result<usize, QueueError>
    where
        D: Deserializer<T>,
    {
        let mut count = 0;
        for item in self.iter()? {
            item?;
            count += 1;
        }
        Ok(count)
    }

    pub fn is_empty(&self) -> Result<bool, QueueError>
    where
        D: Deserializer<T>,
    {
        Ok(self.try_peek()?.is_none())
    }

    /// Always `None`: this queue is bounded by slab count and disk space,
    /// not by a fixed element capacity, so there is no meaningful finite
    /// answer.
    pub fn remaining_capacity(&self) -> Option<u64> {
        None
    }

    /// Linear scan through unread excerpts, deserializing each to compare.
    pub fn contains(&self, value: &T) -> Result<bool, QueueError>
    where
        D: Deserializer<T>,
        T: PartialEq,
    {
        for item in self.iter()? {
            if &item? == value {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn contains_all(&self, values: &[T]) -> Result<bool, QueueError>
    where
        D: Deserializer<T>,
        T: PartialEq,
    {
        for value in values {
            if !self.contains(value)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// A weakly consistent iterator over unread excerpts, starting from the
    /// cursor's position as of this call.
    pub fn iter(&self) -> Result<QueueIter<'_, T, D>, QueueError>
    where
        D: Deserializer<T>,
    {
        QueueIter::new(
            &self.config.storage_directory,
            &self.config.name,
            self.cursor.slab(),
            self.cursor.index(),
            &self.active_slab_id,
            &self.deserializer,
        )
    }

    /// Snapshots all unread excerpts into a `Vec`.
    pub fn to_vec(&self) -> Result<Vec<T>, QueueError>
    where
        D: Deserializer<T>,
    {
        self.iter()?.collect()
    }

    /// Marks the queue closed and flushes the cursor to disk. Idempotent.
    /// Further operations are not guaranteed to fail cleanly afterward —
    /// callers are expected to stop using the handle once closed.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            if let Err(error) = self.cursor.flush() {
                warn!(%error, "failed to flush cursor on close");
            }
            info!(name = %self.config.name, "queue closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use crate::config::QueueBuilder;
    use crate::error::QueueError;

    #[test]
    fn offer_then_poll_round_trips() {
        let dir = tempdir().unwrap();
        let queue = QueueBuilder::<u64>::new()
            .storage_directory(dir.path())
            .name("basic")
            .fsync_on_commit(false)
            .build()
            .unwrap();

        assert!(queue.try_offer(7).unwrap());
        assert_eq!(queue.try_poll().unwrap(), Some(7));
        assert_eq!(queue.try_poll().unwrap(), None);
    }

    #[test]
    fn peek_does_not_consume() {
        let dir = tempdir().unwrap();
        let queue = QueueBuilder::<u64>::new()
            .storage_directory(dir.path())
            .name("peek")
            .fsync_on_commit(false)
            .build()
            .unwrap();

        queue.try_offer(1).unwrap();
        assert_eq!(queue.try_peek().unwrap(), Some(1));
        assert_eq!(queue.try_peek().unwrap(), Some(1));
        assert_eq!(queue.try_poll().unwrap(), Some(1));
    }

    #[test]
    fn remove_and_element_report_empty_queue() {
        let dir = tempdir().unwrap();
        let queue = QueueBuilder::<u64>::new()
            .storage_directory(dir.path())
            .name("empty")
            .fsync_on_commit(false)
            .build()
            .unwrap();

        assert!(matches!(queue.try_remove(), Err(QueueError::EmptyQueue)));
        assert!(matches!(queue.try_element(), Err(QueueError::EmptyQueue)));
    }

    #[test]
    fn add_refuses_once_max_slabs_reached() {
        let dir = tempdir().unwrap();
        let queue = QueueBuilder::<u64>::new()
            .storage_directory(dir.path())
            .name("bounded")
            .slab_block_size(24)
            .max_number_of_slabs(1)
            .fsync_on_commit(false)
            .build()
            .unwrap();

        let mut n = 0u64;
        while queue.try_offer(n).unwrap() {
            n += 1;
        }
        assert!(matches!(queue.add(n), Err(QueueError::QueueFull)));
    }

    #[test]
    fn close_is_idempotent() {
        let dir = tempdir().unwrap();
        let queue = QueueBuilder::<u64>::new()
            .storage_directory(dir.path())
            .name("closeme")
            .fsync_on_commit(false)
            .build()
            .unwrap();

        assert!(!queue.is_closed());
        queue.close();
        queue.close();
        assert!(queue.is_closed());
    }

    #[test]
    fn arbitrary_mutators_report_unsupported() {
        let dir = tempdir().unwrap();
        let queue = QueueBuilder::<u64>::new()
            .storage_directory(dir.path())
            .name("unsupported")
            .fsync_on_commit(false)
            .build()
            .unwrap();

        queue.try_offer(1).unwrap();

        assert!(matches!(queue.remove_value(&1), Err(QueueError::Unsupported(_))));
        assert!(matches!(queue.remove_all(&[1]), Err(QueueError::Unsupported(_))));
        assert!(matches!(queue.retain_all(&[1]), Err(QueueError::Unsupported(_))));
        assert!(matches!(queue.clear(), Err(QueueError::Unsupported(_))));

        // None of the rejected calls above mutated the queue.
        assert_eq!(queue.try_poll().unwrap(), Some(1));
    }

    #[test]
    fn iterator_remove_reports_unsupported() {
        let dir = tempdir().unwrap();
        let queue = QueueBuilder::<u64>::new()
            .storage_directory(dir.path())
            .name("iter-unsupported")
            .fsync_on_commit(false)
            .build()
            .unwrap();

        queue.try_offer(1).unwrap();
        let mut iter = queue.iter().unwrap();
        assert_eq!(iter.next().unwrap().unwrap(), 1);
        assert!(matches!(iter.remove(), Err(QueueError::Unsupported(_))));
    }
}
