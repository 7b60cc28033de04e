//! Byte encodings for queue elements.
//!
//! All producers and consumers of one queue must agree on the codec; the
//! encoding is otherwise private to a deployment.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Errors raised while encoding or decoding a queue element.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("encode error: {0}")]
    Encode(String),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Converts values of `T` to and from bytes.
///
/// Implementations are deterministic: equal inputs produce equal bytes, and
/// `decode(encode(x)) == x` for every value the codec accepts.
pub trait Codec<T>: Send + Sync + 'static {
    fn encode(&self, value: &T) -> Result<Vec<u8>, CodecError>;
    fn decode(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

/// JSON bytes, the default queue encoding. Readable with `redis-cli`.
///
/// This is a self-describing text encoding, not a binary one: field names
/// travel with every item and numbers are written in decimal. Floats survive
/// the trip exactly because serde_json is built with `float_roundtrip`.
/// A compact binary encoding can be plugged in through [`Codec`].
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<T> Codec<T> for JsonCodec
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}
