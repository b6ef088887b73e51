//! Codec plumbing: the translation between a user value and the byte
//! region of a slab excerpt. External contract only — this crate ships one
//! default implementation and otherwise just defines the trait seam.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::QueueError;

/// Translates a value into bytes written to a slab excerpt.
///
/// Implementations write into `out`, which is reused across calls as a
/// scratch buffer (cleared by the caller before each `serialize`), to avoid
/// an allocation per append on the common path.
pub trait Serializer<T>: Send + Sync {
    fn serialize(&self, value: &T, out: &mut Vec<u8>) -> Result<(), QueueError>;
}

/// Translates bytes read from a slab excerpt back into a value.
pub trait Deserializer<T>: Send + Sync {
    fn deserialize(&self, bytes: &[u8]) -> Result<T, QueueError>;
}

/// The generic object reader/writer this crate falls back on when a caller
/// supplies only one half of a custom codec pair, or neither.
///
/// Backed by `bincode` over `serde`, the same pairing a write-ahead-log
/// crate in this workspace's wider dependency graph reaches for its own
/// records.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl<T> Serializer<T> for BincodeCodec
where
    T: Serialize,
{
    fn serialize(&self, value: &T, out: &mut Vec<u8>) -> Result<(), QueueError> {
        out.clear();
        bincode::serialize_into(out, value).map_err(|e| {
            QueueError::CorruptState {
                slab: 0,
                index: 0,
                detail: format!("bincode serialization failed: {e}"),
            }
        })
    }
}

impl<T> Deserializer<T> for BincodeCodec
where
    T: DeserializeOwned,
{
    fn deserialize(&self, bytes: &[u8]) -> Result<T, QueueError> {
        // Errors here surface as `CorruptState` without slab/index context;
        // `engine.rs` rewraps with the caller's actual (slab, index) before
        // returning, since only it knows where the bytes came from.
        bincode::deserialize(bytes).map_err(|e| QueueError::CorruptState {
            slab: 0,
            index: 0,
            detail: format!("bincode deserialization failed: {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bincode() {
        let codec = BincodeCodec;
        let mut buf = Vec::new();
        Serializer::<u64>::serialize(&codec, &42u64, &mut buf).unwrap();
        let value: u64 = Deserializer::<u64>::deserialize(&codec, &buf).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn mismatched_custom_writer_surfaces_as_corrupt_state() {
        // A custom writer that encodes a `u64` where the reader expects the
        // bincode wire shape of a `u32`: the lengths never line up, so the
        // default reader must fail rather than silently misread.
        struct RawU64Writer;
        impl Serializer<u64> for RawU64Writer {
            fn serialize(&self, value: &u64, out: &mut Vec<u8>) -> Result<(), QueueError> {
                out.clear();
                out.push(*value as u8); // deliberately truncated, 1 byte only
                Ok(())
            }
        }

        let mut buf = Vec::new();
        RawU64Writer.serialize(&7u64, &mut buf).unwrap();

        // Pairing a truncated custom writer with the default bincode reader
        // must surface as a deserialization error, not a silent misread.
        let result: Result<u32, QueueError> = BincodeCodec.deserialize(&buf);
        assert!(result.is_err());
    }
}
