//! Validating builder for [`crate::Queue`]. Directory existence can only be
//! checked at runtime, so validation failures surface as
//! `Result<_, QueueError>` rather than a panic.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use crate::codec::{BincodeCodec, Deserializer, Serializer};
use crate::engine::Queue;
use crate::error::QueueError;

const DEFAULT_NAME: &str = "chronicleblockingqueue";
const DEFAULT_SLAB_BLOCK_SIZE: u64 = 64 * 1024 * 1024;
const DEFAULT_MESSAGE_CAPACITY: usize = 128 * 1024;

/// Runtime configuration, validated once at [`QueueBuilder::build`] and
/// then immutable for the life of the [`Queue`].
#[derive(Debug, Clone)]
pub(crate) struct QueueConfig {
    pub(crate) storage_directory: PathBuf,
    pub(crate) name: String,
    pub(crate) max_number_of_slabs: Option<u32>,
    pub(crate) slab_block_size: u64,
    pub(crate) message_capacity: usize,
    pub(crate) fsync_on_commit: bool,
}

/// Builds a [`Queue`], validating all options eagerly at [`Self::build`].
///
/// ```no_run
/// use slabqueue::{Queue, QueueBuilder};
///
/// let queue: Queue<u64> = QueueBuilder::new()
///     .storage_directory("/tmp/my-queue")
///     .name("orders")
///     .max_number_of_slabs(8)
///     .build()
///     .unwrap();
/// ```
pub struct QueueBuilder<T, S = BincodeCodec, D = BincodeCodec> {
    storage_directory: Option<PathBuf>,
    name: String,
    max_number_of_slabs: Option<u32>,
    slab_block_size: u64,
    message_capacity: usize,
    fsync_on_commit: bool,
    serializer: S,
    deserializer: D,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Default for QueueBuilder<T, BincodeCodec, BincodeCodec> {
    fn default() -> Self {
        Self {
            storage_directory: None,
            name: DEFAULT_NAME.to_string(),
            max_number_of_slabs: None,
            slab_block_size: DEFAULT_SLAB_BLOCK_SIZE,
            message_capacity: DEFAULT_MESSAGE_CAPACITY,
            fsync_on_commit: true,
            serializer: BincodeCodec,
            deserializer: BincodeCodec,
            _marker: PhantomData,
        }
    }
}

impl<T> QueueBuilder<T, BincodeCodec, BincodeCodec> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<T, S, D> QueueBuilder<T, S, D> {
    pub fn storage_directory(mut self, dir: impl AsRef<Path>) -> Self {
        self.storage_directory = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Upper bound on concurrent live slabs; back-pressures producers once
    /// reached. `None` (the default) means unbounded.
    pub fn max_number_of_slabs(mut self, max: u32) -> Self {
        self.max_number_of_slabs = Some(max);
        self
    }

    /// Data-region byte budget per slab; drives rollover. Default 64 MiB.
    pub fn slab_block_size(mut self, bytes: u64) -> Self {
        self.slab_block_size = bytes;
        self
    }

    /// Max bytes per single excerpt. Default 128 KiB.
    pub fn message_capacity(mut self, bytes: usize) -> Self {
        self.message_capacity = bytes;
        self
    }

    /// Whether every commit calls `fsync`. Default `true`; set `false` to
    /// trade durability for throughput.
    pub fn fsync_on_commit(mut self, enabled: bool) -> Self {
        self.fsync_on_commit = enabled;
        self
    }

    pub fn serializer<S2>(self, serializer: S2) -> QueueBuilder<T, S2, D>
    where
        S2: Serializer<T>,
    {
        QueueBuilder {
            storage_directory: self.storage_directory,
            name: self.name,
            max_number_of_slabs: self.max_number_of_slabs,
            slab_block_size: self.slab_block_size,
            message_capacity: self.message_capacity,
            fsync_on_commit: self.fsync_on_commit,
            serializer,
            deserializer: self.deserializer,
            _marker: PhantomData,
        }
    }

    pub fn deserializer<D2>(self, deserializer: D2) -> QueueBuilder<T, S, D2>
    where
        D2: Deserializer<T>,
    {
        QueueBuilder {
            storage_directory: self.storage_directory,
            name: self.name,
            max_number_of_slabs: self.max_number_of_slabs,
            slab_block_size: self.slab_block_size,
            message_capacity: self.message_capacity,
            fsync_on_commit: self.fsync_on_commit,
            serializer: self.serializer,
            deserializer,
            _marker: PhantomData,
        }
    }

    pub fn build(self) -> Result<Queue<T, S, D>, QueueError>
    where
        S: Serializer<T>,
        D: Deserializer<T>,
    {
        let storage_directory = self
            .storage_directory
            .ok_or_else(|| QueueError::InvalidConfiguration("storage_directory is required".to_string()))?;

        if !storage_directory.is_dir() {
            return Err(QueueError::invalid_dir(&storage_directory));
        }
        if self.name.is_empty() {
            return Err(QueueError::InvalidConfiguration("name must not be empty".to_string()));
        }
        if self.slab_block_size == 0 {
            return Err(QueueError::InvalidConfiguration(
                "slab_block_size must be greater than zero".to_string(),
            ));
        }
        if self.message_capacity == 0 {
            return Err(QueueError::InvalidConfiguration(
                "message_capacity must be greater than zero".to_string(),
            ));
        }
        if let Some(max) = self.max_number_of_slabs {
            if max == 0 {
                return Err(QueueError::InvalidConfiguration(
                    "max_number_of_slabs must be greater than zero when set".to_string(),
                ));
            }
        }

        let config = QueueConfig {
            storage_directory,
            name: self.name,
            max_number_of_slabs: self.max_number_of_slabs,
            slab_block_size: self.slab_block_size,
            message_capacity: self.message_capacity,
            fsync_on_commit: self.fsync_on_commit,
        };

        Queue::open(config, self.serializer, self.deserializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn rejects_missing_storage_directory() {
        let builder: QueueBuilder<u64> = QueueBuilder::new().storage_directory("/no/such/path");
        assert!(matches!(
            builder.build(),
            Err(QueueError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn rejects_empty_name() {
        let dir = tempdir().unwrap();
        let builder: QueueBuilder<u64> = QueueBuilder::new().storage_directory(dir.path()).name("");
        assert!(matches!(
            builder.build(),
            Err(QueueError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn rejects_zero_max_slabs() {
        let dir = tempdir().unwrap();
        let builder: QueueBuilder<u64> = QueueBuilder::new()
            .storage_directory(dir.path())
            .max_number_of_slabs(0);
        assert!(matches!(
            builder.build(),
            Err(QueueError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn defaults_match_spec() {
        let builder: QueueBuilder<u64> = QueueBuilder::new();
        assert_eq!(builder.name, DEFAULT_NAME);
        assert_eq!(builder.slab_block_size, DEFAULT_SLAB_BLOCK_SIZE);
        assert_eq!(builder.message_capacity, DEFAULT_MESSAGE_CAPACITY);
        assert_eq!(builder.max_number_of_slabs, None);
        assert!(builder.fsync_on_commit);
    }
}
