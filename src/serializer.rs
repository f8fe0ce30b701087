/*!
C3 — encode/decode a typed value to/from a byte stream.

The engine itself never sees a `T`; it stores and retrieves opaque byte
slices. `ValueSerializer` is the seam where a typed `Get<T>`/`Add*` call
crosses into the engine's untyped world (spec §4.1's "Dynamic dispatch over
target type" redesign note: rather than dispatch on a runtime type tag, the
serializer trait is generic over `T` at the call site).
*/

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes/decodes values for storage. Implementations must round-trip
/// every type the caller stores; a failed decode becomes
/// [`Error::SerializationFailure`], which readers downgrade to "absent"
/// (spec §7).
pub trait ValueSerializer: Send + Sync {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>>;
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;
}

/// The default serializer. Readable on the wire, works with every `serde`
/// type without an extra derive, and is what every caller of this crate
/// already depends on transitively.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl ValueSerializer for JsonSerializer {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).map_err(Error::from)
    }
}

/// A compact binary serializer, for deployments that care about payload
/// size over human-readability. Uses the same `rmp-serde` crate the
/// teacher's disk store used for its on-disk representation.
#[cfg(feature = "msgpack")]
#[derive(Debug, Default, Clone, Copy)]
pub struct MessagePackSerializer;

#[cfg(feature = "msgpack")]
impl ValueSerializer for MessagePackSerializer {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(value)?)
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        rmp_serde::from_slice(bytes).map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Widget {
        name: String,
        count: u32,
    }

    #[test]
    fn json_round_trips() {
        let s = JsonSerializer;
        let w = Widget {
            name: "bolt".into(),
            count: 12,
        };
        let bytes = s.encode(&w).unwrap();
        let back: Widget = s.decode(&bytes).unwrap();
        assert_eq!(w, back);
    }

    #[test]
    fn json_decode_of_garbage_is_serialization_failure() {
        let s = JsonSerializer;
        let err = s.decode::<Widget>(b"not json").unwrap_err();
        assert!(matches!(err, Error::SerializationFailure(_)));
    }

    #[cfg(feature = "msgpack")]
    #[test]
    fn msgpack_round_trips() {
        let s = MessagePackSerializer;
        let w = Widget {
            name: "nut".into(),
            count: 4,
        };
        let bytes = s.encode(&w).unwrap();
        let back: Widget = s.decode(&bytes).unwrap();
        assert_eq!(w, back);
    }
}
