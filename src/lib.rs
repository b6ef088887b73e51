//! A persistent, file-backed, blocking FIFO queue.
//!
//! Elements are serialized into fixed-size append-only segments ("slabs")
//! under a storage directory. A consumer's read position is tracked in a
//! small memory-mapped cursor file that survives process restarts, so a
//! queue can be closed and reopened against the same directory without
//! losing unread elements. Producers and a single logical consumer per
//! storage directory coordinate through the slab files themselves; no
//! separate broker process is involved.
//!
//! Start with [`QueueBuilder`]:
//!
//! ```no_run
//! use slabqueue::QueueBuilder;
//!
//! let queue = QueueBuilder::<String>::new()
//!     .storage_directory("/var/lib/myapp/queue")
//!     .name("events")
//!     .build()
//!     .unwrap();
//!
//! queue.try_offer("hello".to_string()).unwrap();
//! let value = queue.try_poll().unwrap();
//! assert_eq!(value.as_deref(), Some("hello"));
//! ```

mod backoff;
mod cancel;
mod codec;
mod config;
mod cursor;
mod engine;
mod error;
mod invariants;
mod iter;
mod notify;
mod registry;
mod segment;

pub use cancel::CancellationToken;
pub use codec::{BincodeCodec, Deserializer, Serializer};
pub use config::QueueBuilder;
pub use engine::Queue;
pub use error::QueueError;
pub use iter::QueueIter;
