//! Versioned cache wire format for records.
//!
//! Every cache entry is a small envelope around a postcard-encoded payload:
//!
//! ```text
//! ┌─────────────────┬────────────────┬───────────────────────────────────────┐
//! │  MAGIC (4 bytes)│ VERSION (1 byte)│ PAYLOAD: family tag + typed field list│
//! └─────────────────┴────────────────┴───────────────────────────────────────┘
//!   "CTBL"             u8               postcard::to_allocvec(RecordPayload)
//! ```
//!
//! The payload carries the cache family and the set fields in structure order,
//! each value tagged with its [`Value`] variant, so integers, floats, booleans
//! and strings survive the round trip without guessing.
//!
//! # Validation
//!
//! - **Magic mismatch:** `Error::InvalidCacheEntry` (foreign or corrupt entry)
//! - **Version mismatch:** `Error::VersionMismatch` (written by another format version)
//! - **Family or field mismatch:** `Error::InvalidCacheEntry`
//! - **Broken payload:** `Error::DeserializationError`
//!
//! The batched fetch treats every one of these as a cache miss, so a format
//! change evicts old entries instead of failing reads.
//!
//! # Example
//!
//! ```rust
//! use cache_table::record::Record;
//! use cache_table::serialization::{deserialize_record, serialize_record};
//! use cache_table::structure::RecordStructure;
//! use cache_table::value::Value;
//! use std::sync::Arc;
//!
//! # fn main() -> cache_table::Result<()> {
//! let users = Arc::new(RecordStructure::new(
//!     "users",
//!     &[("id", "uint"), ("email", "string")],
//!     "id",
//!     true,
//! )?);
//! let record = Record::from_values(
//!     Arc::clone(&users),
//!     [("id", Value::UInt(7)), ("email", Value::from("a@x.com"))],
//! )?;
//!
//! let bytes = serialize_record(&record)?;
//! assert_eq!(&bytes[0..4], b"CTBL");
//!
//! let decoded = deserialize_record(&bytes, &users)?;
//! assert_eq!(decoded.get("email"), Some(&Value::from("a@x.com")));
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use crate::record::Record;
use crate::structure::RecordStructure;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Magic header for cache-table entries: b"CTBL"
pub const CACHE_MAGIC: [u8; 4] = *b"CTBL";

/// Current wire format version.
///
/// Increment on any change to the envelope, the payload layout or the
/// [`Value`] variant order. Entries of other versions are read as misses.
pub const CURRENT_SCHEMA_VERSION: u8 = 1;

const HEADER_LEN: usize = 5;

/// Versioned envelope for cache entries.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CacheEnvelope<T> {
    /// Magic header: must be b"CTBL"
    pub magic: [u8; 4],
    /// Must match CURRENT_SCHEMA_VERSION
    pub version: u8,
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

/// Family tag plus typed field list.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RecordPayload {
    pub family: String,
    pub fields: Vec<(String, Value)>,
}

/// Encode a record for cache storage.
///
/// # Errors
///
/// - `Error::SerializationError` if the record holds a raw SQL expression,
///   whose stored value is unknown until the relational store evaluates it
/// - `Error::SerializationError` if postcard encoding fails
pub fn serialize_record(record: &Record) -> Result<Vec<u8>> {
    let structure = record.structure();
    let mut fields = Vec::with_capacity(structure.field_count());
    for (name, value) in record.fields() {
        if value.is_raw() {
            return Err(Error::SerializationError(format!(
                "Field '{}' of '{}' holds a raw expression and cannot be cached",
                name,
                structure.name()
            )));
        }
        fields.push((name.to_string(), value.clone()));
    }

    let envelope = CacheEnvelope::new(RecordPayload {
        family: structure.cache_family().to_string(),
        fields,
    });
    postcard::to_allocvec(&envelope).map_err(|e| {
        error!("Cache serialization failed: {}", e);
        Error::SerializationError(e.to_string())
    })
}

/// Decode a cache entry into a record of `structure`.
///
/// The header is checked before the payload is decoded, so entries of a
/// different version are rejected even if their payload layout changed.
///
/// # Errors
///
/// - `Error::InvalidCacheEntry`: bad magic, wrong family, unknown field or a
///   raw expression
/// - `Error::VersionMismatch`: entry written by another format version
/// - `Error::DeserializationError`: corrupt payload
pub fn deserialize_record(bytes: &[u8], structure: &Arc<RecordStructure>) -> Result<Record> {
    if bytes.len() < HEADER_LEN {
        return Err(Error::InvalidCacheEntry(format!(
            "Entry too short: {} bytes",
            bytes.len()
        )));
    }

    if bytes[0..4] != CACHE_MAGIC {
        warn!(
            "Invalid cache entry: expected magic {:?}, got {:?}",
            CACHE_MAGIC,
            &bytes[0..4]
        );
        return Err(Error::InvalidCacheEntry(format!(
            "Invalid magic: expected {:?}, got {:?}",
            CACHE_MAGIC,
            &bytes[0..4]
        )));
    }

    if bytes[4] != CURRENT_SCHEMA_VERSION {
        warn!(
            "Cache version mismatch: expected {}, got {}",
            CURRENT_SCHEMA_VERSION, bytes[4]
        );
        return Err(Error::VersionMismatch {
            expected: CURRENT_SCHEMA_VERSION,
            found: bytes[4],
        });
    }

    let (payload, rest): (RecordPayload, &[u8]) =
        postcard::take_from_bytes(&bytes[HEADER_LEN..]).map_err(|e| {
            debug!("Cache deserialization failed: {}", e);
            Error::DeserializationError(e.to_string())
        })?;
    if !rest.is_empty() {
        return Err(Error::DeserializationError(format!(
            "{} trailing bytes after payload",
            rest.len()
        )));
    }

    if payload.family != structure.cache_family() {
        return Err(Error::InvalidCacheEntry(format!(
            "Entry belongs to family '{}', expected '{}'",
            payload.family,
            structure.cache_family()
        )));
    }

    if let Some((unknown, _)) = payload
        .fields
        .iter()
        .find(|(name, _)| !structure.has_field(name))
    {
        return Err(Error::InvalidCacheEntry(format!(
            "Unknown field '{}' for family '{}'",
            unknown,
            structure.cache_family()
        )));
    }

    // raw expressions only ever come from callers, never from the store
    if let Some((name, _)) = payload.fields.iter().find(|(_, value)| value.is_raw()) {
        warn!(
            "⚠ Cache entry for '{}' carries a raw expression in '{}'",
            structure.cache_family(),
            name
        );
        return Err(Error::InvalidCacheEntry(format!(
            "Field '{}' holds a raw expression",
            name
        )));
    }

    Record::from_values(Arc::clone(structure), payload.fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> Arc<RecordStructure> {
        Arc::new(
            RecordStructure::new(
                "users",
                &[
                    ("id", "uint"),
                    ("email", "string"),
                    ("active", "bool"),
                    ("score", "float"),
                    ("delta", "int"),
                ],
                "id",
                true,
            )
            .expect("Failed to build structure"),
        )
    }

    fn sample(structure: &Arc<RecordStructure>) -> Record {
        Record::from_values(
            Arc::clone(structure),
            [
                ("id", Value::UInt(7)),
                ("email", Value::from("a@x.com")),
                ("active", Value::Bool(true)),
                ("score", Value::Float(-0.5)),
                ("delta", Value::Int(-12)),
            ],
        )
        .expect("Failed to hydrate")
    }

    #[test]
    fn test_round_trip_preserves_types() {
        let structure = users();
        let record = sample(&structure);

        let bytes = serialize_record(&record).expect("Failed to serialize");
        let decoded = deserialize_record(&bytes, &structure).expect("Failed to deserialize");

        assert_eq!(decoded.to_map(), record.to_map());
        assert!(!decoded.has_changes());
    }

    #[test]
    fn test_serialization_is_deterministic() {
        let structure = users();
        let a = serialize_record(&sample(&structure)).expect("Failed to serialize");
        let b = serialize_record(&sample(&structure)).expect("Failed to serialize");
        assert_eq!(a, b);
    }

    #[test]
    fn test_header_layout() {
        let structure = users();
        let bytes = serialize_record(&sample(&structure)).expect("Failed to serialize");
        assert_eq!(&bytes[0..4], b"CTBL");
        assert_eq!(bytes[4], CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_invalid_magic() {
        let structure = users();
        let mut bytes = serialize_record(&sample(&structure)).expect("Failed to serialize");
        bytes[0] = b'X';
        assert!(matches!(
            deserialize_record(&bytes, &structure),
            Err(Error::InvalidCacheEntry(_))
        ));
    }

    #[test]
    fn test_version_mismatch() {
        let structure = users();
        let mut bytes = serialize_record(&sample(&structure)).expect("Failed to serialize");
        bytes[4] = 9;
        match deserialize_record(&bytes, &structure) {
            Err(Error::VersionMismatch { expected, found }) => {
                assert_eq!(expected, CURRENT_SCHEMA_VERSION);
                assert_eq!(found, 9);
            }
            other => panic!("Expected VersionMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_truncated_and_short_entries() {
        let structure = users();
        let bytes = serialize_record(&sample(&structure)).expect("Failed to serialize");
        assert!(matches!(
            deserialize_record(&bytes[..bytes.len() - 3], &structure),
            Err(Error::DeserializationError(_))
        ));
        assert!(matches!(
            deserialize_record(b"CTB", &structure),
            Err(Error::InvalidCacheEntry(_))
        ));
    }

    #[test]
    fn test_family_mismatch() {
        let structure = users();
        let other = Arc::new(
            RecordStructure::builder("users")
                .field("id", crate::structure::FieldType::UInt)
                .primary("id", true)
                .cache_family("users_v2")
                .build()
                .expect("Failed to build"),
        );
        let bytes = serialize_record(&sample(&structure)).expect("Failed to serialize");
        assert!(matches!(
            deserialize_record(&bytes, &other),
            Err(Error::InvalidCacheEntry(_))
        ));
    }

    #[test]
    fn test_raw_values_are_not_cacheable() {
        let structure = users();
        let mut record = sample(&structure);
        record
            .set("email", Value::raw("LOWER('A@X.COM')"))
            .expect("Failed to set");
        assert!(matches!(
            serialize_record(&record),
            Err(Error::SerializationError(_))
        ));
    }

    #[test]
    fn test_stored_raw_expression_rejected() {
        let structure = users();
        let envelope = CacheEnvelope::new(RecordPayload {
            family: "users".to_string(),
            fields: vec![
                ("id".to_string(), Value::UInt(7)),
                (
                    "email".to_string(),
                    Value::raw("(SELECT password FROM admins LIMIT 1)"),
                ),
            ],
        });
        let bytes = postcard::to_allocvec(&envelope).expect("Failed to encode envelope");

        assert!(matches!(
            deserialize_record(&bytes, &structure),
            Err(Error::InvalidCacheEntry(_))
        ));
    }
}
