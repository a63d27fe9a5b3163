//! # Cache Codec
//!
//! Turns payloads into the text stored under a cache key and back:
//!
//! ```text
//! write: value --MessagePack--> bytes --gzip (optional)--> bytes --base64--> text
//! read:  text  --base64-------> bytes --gunzip (optional)--> bytes --MessagePack--> value
//! ```
//!
//! Compression is a process-wide policy: a store written with compression
//! enabled must be read with it enabled. Entries carry no compression flag
//! so that the stored layout stays identical to existing entries.

use crate::core::error::{CacheError, CacheResult};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// A cacheable response body.
///
/// Raw bytes are stored as a MessagePack `bin` value; structured data is
/// stored as the equivalent MessagePack map/array/scalar. On the way back
/// `bin` values always come out as [`CachePayload::Bytes`] and everything else
/// as [`CachePayload::Structured`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CachePayload {
    Structured(serde_json::Value),
    Bytes(#[serde(with = "raw_bytes")] Bytes),
}

impl CachePayload {
    /// Body bytes to send to a client; structured data is rendered as JSON
    pub fn to_body(&self) -> CacheResult<Bytes> {
        match self {
            Self::Bytes(bytes) => Ok(bytes.clone()),
            Self::Structured(value) => serde_json::to_vec(value)
                .map(Bytes::from)
                .map_err(|e| CacheError::serialization(e.to_string())),
        }
    }

    /// True only for an empty byte body
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Bytes(bytes) if bytes.is_empty())
    }
}

impl From<Bytes> for CachePayload {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<Vec<u8>> for CachePayload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(bytes))
    }
}

impl From<serde_json::Value> for CachePayload {
    fn from(value: serde_json::Value) -> Self {
        Self::Structured(value)
    }
}

/// Serde adapter that writes `Bytes` as a MessagePack `bin` and only accepts
/// `bin` back, so strings and integer arrays are never mistaken for bytes.
mod raw_bytes {
    use bytes::Bytes;
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        struct BinVisitor;

        impl<'de> Visitor<'de> for BinVisitor {
            type Value = Bytes;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a binary blob")
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
                Ok(Bytes::copy_from_slice(v))
            }

            fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Self::Value, E> {
                Ok(Bytes::from(v))
            }
        }

        deserializer.deserialize_bytes(BinVisitor)
    }
}

/// The serialize / compress / encode pipeline
#[derive(Debug, Clone, Copy)]
pub struct CacheCodec {
    compression: bool,
}

impl Default for CacheCodec {
    fn default() -> Self {
        Self { compression: true }
    }
}

impl CacheCodec {
    pub fn new(compression: bool) -> Self {
        Self { compression }
    }

    /// Encode any serializable value into its stored text form
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> CacheResult<String> {
        let packed = rmp_serde::to_vec(value)?;

        let bytes = if self.compression {
            compress(&packed)?
        } else {
            packed
        };

        Ok(STANDARD.encode(bytes))
    }

    /// Decode stored text back into a value
    pub fn decode<T: DeserializeOwned>(&self, stored: &[u8]) -> CacheResult<T> {
        let bytes = STANDARD.decode(stored)?;

        let packed = if self.compression {
            decompress(&bytes)?
        } else {
            bytes
        };

        Ok(rmp_serde::from_slice(&packed)?)
    }
}

/// Gzip `data` with the default compression level
pub fn compress(data: &[u8]) -> CacheResult<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| CacheError::serialization(format!("gzip write failed: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| CacheError::serialization(format!("gzip finish failed: {}", e)))
}

/// Inflate a complete gzip stream
pub fn decompress(data: &[u8]) -> CacheResult<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::with_capacity(data.len() * 2);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| CacheError::decode(format!("corrupt gzip stream: {}", e)))?;
    Ok(out)
}
