//! Pluggable payload serialization.
//!
//! The original implementation pickled arbitrary Python objects. Rust has no equivalent
//! of pickle, so payloads are parameterized by the user's chosen type (`T: Serialize +
//! DeserializeOwned`) and encoded through the small [`Codec`] capability pair rather than
//! a hardcoded format. [`CborCodec`] is the only implementation: compact, self-describing,
//! and already used elsewhere in this pack for exactly this kind of length-prefixed peer
//! framing.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

/// A symmetric encoder/decoder pair for frame payloads.
pub trait Codec {
    /// Serialize `value` to bytes.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>>;
    /// Deserialize bytes previously produced by [`Codec::encode`].
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;
}

/// CBOR via `ciborium`. The default codec for user payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct CborCodec;

impl Codec for CborCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf).map_err(|e| Error::Codec(e.to_string()))?;
        Ok(buf)
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        ciborium::from_reader(bytes).map_err(|e| Error::Codec(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        key1: Vec<i64>,
        key2: (String, String),
    }

    #[test]
    fn cbor_round_trip() {
        let codec = CborCodec;
        let value = Sample {
            key1: vec![7, 2, 3],
            key2: ("abc".into(), "xyz".into()),
        };
        let bytes = codec.encode(&value).unwrap();
        let decoded: Sample = codec.decode(&bytes).unwrap();
        assert_eq!(value, decoded);
    }
}
