use std::path::PathBuf;

use thiserror::Error;

/// Error type returned by every fallible operation on [`crate::Queue`].
///
/// Follows the single-enum, `thiserror`-derived shape the rest of this
/// crate's ecosystem uses for library-boundary errors (no `anyhow` here —
/// callers get a typed, matchable error).
#[derive(Debug, Error)]
pub enum QueueError {
    /// The storage directory is missing, not a directory, or otherwise
    /// unusable, or another configuration option failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A strict push (`put`/`offer` without a timeout, used through the
    /// `add`-style call) was attempted while the queue refused the element
    /// and the caller asked to fail fast rather than block.
    #[error("queue is full (slab_block_size exceeded and max_number_of_slabs reached)")]
    QueueFull,

    /// `try_remove`/`try_element` observed an empty queue.
    #[error("queue is empty")]
    EmptyQueue,

    /// An operation with no well-defined out-of-order semantics under the
    /// append-only slab model: arbitrary-element removal, bulk clearing,
    /// or iterator-driven removal.
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    /// A blocking operation observed its cooperative cancellation flag.
    #[error("operation cancelled")]
    Cancelled,

    /// The cursor refers to a slab or excerpt index that does not exist on
    /// disk, or a deserializer failed to decode a committed excerpt.
    #[error("corrupt queue state at slab {slab}, index {index}: {detail}")]
    CorruptState {
        slab: u32,
        index: i32,
        detail: String,
    },

    /// Any underlying I/O failure, wrapped with the originating cause
    /// retained.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl QueueError {
    pub(crate) fn invalid_dir(path: &PathBuf) -> Self {
        Self::InvalidConfiguration(format!("storage directory does not exist: {}", path.display()))
    }
}
