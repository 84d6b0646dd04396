//! Value codecs for the generic cache interface.
//!
//! The generic interface stores arbitrary `T: Serialize` values. Two wire
//! encodings are supported:
//!
//! - [`Codec::Json`] (default): plain JSON text. Values stay readable by any
//!   other client sharing the store, which is how most cache managers write.
//! - [`Codec::Postcard`]: compact binary wrapped in a versioned envelope.
//!
//! # Postcard envelope
//!
//! ```text
//! ┌─────────────────┬─────────────────┬──────────────────────────┐
//! │  MAGIC (4 bytes)│VERSION (varint) │POSTCARD PAYLOAD (N bytes)│
//! └─────────────────┴─────────────────┴──────────────────────────┘
//!   "KVB1"              u32                postcard::to_allocvec(T)
//! ```
//!
//! Magic and version are checked on every decode; a mismatch is an error,
//! never a silent migration.
//!
//! # Example
//!
//! ```rust
//! use kvbridge::serialization::Codec;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Session {
//!     user_id: u64,
//!     token: String,
//! }
//!
//! # fn main() -> kvbridge::Result<()> {
//! let session = Session { user_id: 1, token: "abc".to_string() };
//!
//! for codec in [Codec::Json, Codec::Postcard] {
//!     let bytes = codec.encode(&session)?;
//!     let decoded: Session = codec.decode(&bytes)?;
//!     assert_eq!(session, decoded);
//! }
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Magic header for postcard entries: b"KVB1"
pub const CACHE_MAGIC: [u8; 4] = *b"KVB1";

/// Current envelope schema version.
///
/// Increment when making breaking changes to cached types so old entries
/// fail to decode instead of decoding into the wrong shape.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Value encoding used by the generic cache interface.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Codec {
    #[default]
    Json,
    Postcard,
}

impl Codec {
    /// Encode a value for storage.
    ///
    /// # Errors
    /// Returns `Error::SerializationError` if the value cannot be encoded.
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            Codec::Json => serde_json::to_vec(value).map_err(|e| {
                error!("JSON cache serialization failed: {}", e);
                Error::SerializationError(e.to_string())
            }),
            Codec::Postcard => {
                let envelope = CacheEnvelope::new(value);
                postcard::to_allocvec(&envelope).map_err(|e| {
                    error!("Postcard cache serialization failed: {}", e);
                    Error::SerializationError(e.to_string())
                })
            }
        }
    }

    /// Decode bytes read from the store.
    ///
    /// # Errors
    ///
    /// - `Error::DeserializationError`: malformed payload
    /// - `Error::InvalidCacheEntry`: postcard entry with a foreign magic
    /// - `Error::VersionMismatch`: postcard entry from another schema version
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self {
            Codec::Json => serde_json::from_slice(bytes).map_err(|e| {
                error!("JSON cache deserialization failed: {}", e);
                Error::DeserializationError(e.to_string())
            }),
            Codec::Postcard => decode_envelope(bytes),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Codec::Json => "json",
            Codec::Postcard => "postcard",
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Codec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Codec::Json),
            "postcard" => Ok(Codec::Postcard),
            other => Err(Error::ConfigError(format!("Unknown codec: {}", other))),
        }
    }
}

/// Versioned envelope for postcard entries.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CacheEnvelope<T> {
    pub magic: [u8; 4],
    pub version: u32,
    pub payload: T,
}

impl<T> CacheEnvelope<T> {
    pub fn new(payload: T) -> Self {
        Self {
            magic: CACHE_MAGIC,
            version: CURRENT_SCHEMA_VERSION,
            payload,
        }
    }
}

fn decode_envelope<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    // Header first, so a foreign magic is reported as such rather than as a
    // payload decode failure.
    let (magic, rest): ([u8; 4], &[u8]) = postcard::take_from_bytes(bytes).map_err(|e| {
        error!("Cache envelope header unreadable: {}", e);
        Error::DeserializationError(e.to_string())
    })?;

    if magic != CACHE_MAGIC {
        warn!(
            "Invalid cache entry: expected magic {:?}, got {:?}",
            CACHE_MAGIC, magic
        );
        return Err(Error::InvalidCacheEntry(format!(
            "Invalid magic: expected {:?}, got {:?}",
            CACHE_MAGIC, magic
        )));
    }

    let (version, payload): (u32, &[u8]) = postcard::take_from_bytes(rest).map_err(|e| {
        error!("Cache envelope version unreadable: {}", e);
        Error::DeserializationError(e.to_string())
    })?;

    if version != CURRENT_SCHEMA_VERSION {
        warn!(
            "Cache version mismatch: expected {}, got {}",
            CURRENT_SCHEMA_VERSION, version
        );
        return Err(Error::VersionMismatch {
            expected: CURRENT_SCHEMA_VERSION,
            found: version,
        });
    }

    postcard::from_bytes(payload).map_err(|e| {
        error!("Cache deserialization failed: {}", e);
        Error::DeserializationError(e.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
    struct Profile {
        id: u64,
        name: String,
        active: bool,
    }

    fn profile() -> Profile {
        Profile {
            id: 123,
            name: "test".to_string(),
            active: true,
        }
    }

    #[test]
    fn test_json_is_plain_text() {
        let bytes = Codec::Json.encode(&profile()).unwrap();
        assert_eq!(
            std::str::from_utf8(&bytes).unwrap(),
            r#"{"id":123,"name":"test","active":true}"#
        );
    }

    #[test]
    fn test_envelope_structure() {
        let bytes = Codec::Postcard.encode(&profile()).unwrap();

        let envelope: CacheEnvelope<Profile> = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(envelope.magic, CACHE_MAGIC);
        assert_eq!(envelope.version, CURRENT_SCHEMA_VERSION);
        assert_eq!(envelope.payload, profile());
    }

    #[test]
    fn test_invalid_magic_rejected() {
        let mut bytes = vec![0u8; 32];
        bytes[0..4].copy_from_slice(b"XXXX");

        let result: Result<Profile> = Codec::Postcard.decode(&bytes);
        match result.unwrap_err() {
            Error::InvalidCacheEntry(_) => {}
            e => panic!("Expected InvalidCacheEntry, got {:?}", e),
        }
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let mut envelope = CacheEnvelope::new(profile());
        envelope.version = 999;
        let bytes = postcard::to_allocvec(&envelope).unwrap();

        let result: Result<Profile> = Codec::Postcard.decode(&bytes);
        match result.unwrap_err() {
            Error::VersionMismatch { expected, found } => {
                assert_eq!(expected, CURRENT_SCHEMA_VERSION);
                assert_eq!(found, 999);
            }
            e => panic!("Expected VersionMismatch, got {:?}", e),
        }
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let mut bytes = Codec::Postcard.encode(&profile()).unwrap();
        bytes.truncate(7);

        let result: Result<Profile> = Codec::Postcard.decode(&bytes);
        assert!(matches!(result, Err(Error::DeserializationError(_))));
    }

    #[test]
    fn test_json_decode_of_foreign_bytes() {
        let result: Result<Profile> = Codec::Json.decode(b"\x00\x01garbage");
        assert!(matches!(result, Err(Error::DeserializationError(_))));
    }

    #[test]
    fn test_codec_from_str() {
        assert_eq!("JSON".parse::<Codec>().unwrap(), Codec::Json);
        assert_eq!("postcard".parse::<Codec>().unwrap(), Codec::Postcard);
        assert!(matches!(
            "yaml".parse::<Codec>(),
            Err(Error::ConfigError(_))
        ));
    }
}
